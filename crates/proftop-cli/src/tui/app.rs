//! TUI application state and event loop.
//!
//! The poller runs on the tokio runtime in the background and publishes its
//! status on a watch channel. This loop only reads the latest status, draws
//! it, and turns key presses into view-option and interval changes.

use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;

use proftop_core::{PollerHandle, PollerStatus, SortKey};

/// Rows taken by everything except table rows: title block, table borders,
/// table header and key bar.
pub const CHROME_ROWS: u16 = 7;

const MIN_INTERVAL: Duration = Duration::from_millis(100);
const MAX_INTERVAL: Duration = Duration::from_secs(10);

/// Table rows that fit a terminal of `height` lines.
pub fn visible_rows(height: u16) -> usize {
    usize::from(height.saturating_sub(CHROME_ROWS)).max(1)
}

pub struct App {
    handle: PollerHandle,
    workers: usize,
    running: bool,
    /// Status shown while paused. The poller keeps running underneath.
    frozen: Option<PollerStatus>,
}

impl App {
    pub fn new(handle: PollerHandle, workers: usize) -> Self {
        Self {
            handle,
            workers,
            running: true,
            frozen: None,
        }
    }

    pub fn into_handle(self) -> PollerHandle {
        self.handle
    }

    pub fn run(&mut self) -> io::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        // Install panic hook that restores terminal before printing the panic.
        let original_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen, crossterm::cursor::Show);
            original_hook(info);
        }));

        let result = self.run_loop(&mut terminal);

        // Always restore terminal, even if the loop returned an error.
        let _ = std::panic::take_hook();
        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            crossterm::cursor::Show
        )?;

        result
    }

    fn run_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> io::Result<()> {
        while self.running {
            self.fit_rows(terminal.size()?.height);
            terminal.draw(|f| super::ui::draw(f, self))?;

            if event::poll(Duration::from_millis(100))?
                && let Event::Key(key) = event::read()?
                && key.kind == KeyEventKind::Press
            {
                self.handle_key(key.code);
            }
        }

        Ok(())
    }

    fn fit_rows(&self, height: u16) {
        let limit = visible_rows(height);
        let mut options = self.handle.view_options();
        if options.limit != limit {
            options.limit = limit;
            self.handle.set_view_options(options);
        }
    }

    fn handle_key(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q') | KeyCode::Esc => self.running = false,
            KeyCode::Char('s') => {
                let mut options = self.handle.view_options();
                options.sort_key = options.sort_key.next();
                self.handle.set_view_options(options);
            }
            KeyCode::Char('p') => {
                self.frozen = match self.frozen {
                    Some(_) => None,
                    None => Some(self.handle.status()),
                };
            }
            KeyCode::Char('+') | KeyCode::Char('=') => {
                let faster = (self.handle.interval() / 2).max(MIN_INTERVAL);
                self.handle.set_interval(faster);
            }
            KeyCode::Char('-') => {
                let slower = (self.handle.interval() * 2).min(MAX_INTERVAL);
                self.handle.set_interval(slower);
            }
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Accessors for the renderer
    // -----------------------------------------------------------------------

    pub fn status(&self) -> PollerStatus {
        match &self.frozen {
            Some(status) => status.clone(),
            None => self.handle.status(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.frozen.is_some()
    }

    pub fn sort_key(&self) -> SortKey {
        self.handle.view_options().sort_key
    }

    pub fn interval(&self) -> Duration {
        self.handle.interval()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}
