//! TUI rendering.
//!
//! ┌──────────────────────────────────────────────────────────────┐
//! │ proftop  4 workers  #12  every 1.0s  sort: inlinetime        │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Function                 CPU%  Inline-Time  ...  Calls       │
//! │ db/session.py:execute:88   31         12.4  ...  8.1k        │
//! │ ...                                                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │ q: quit   s: sort   p: pause   +/-: refresh                  │
//! └──────────────────────────────────────────────────────────────┘

use super::app::App;
use crate::format::{TOP_HEADERS, top_cells};
use proftop_core::{DerivedCallStat, PollerStatus, ProfileView, SortKey};
use ratatui::{prelude::*, widgets::*};

pub fn draw(f: &mut Frame, app: &App) {
    let status = app.status();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // title
            Constraint::Min(3),    // table
            Constraint::Length(1), // keys
        ])
        .split(f.area());

    draw_title(f, rows[0], app, &status);
    match &status.view {
        Some(view) => draw_table(f, rows[1], view),
        None => draw_collecting(f, rows[1], app),
    }
    draw_keys(f, rows[2]);
}

fn draw_title(f: &mut Frame, area: Rect, app: &App, status: &PollerStatus) {
    let paused = if app.is_paused() { "  [paused]" } else { "" };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(Line::from(vec![
            Span::styled(" proftop ", Style::default().bold().fg(Color::Cyan)),
            Span::raw(format!(" {} workers ", app.workers())),
            Span::styled(
                format!(
                    " #{}  every {:.1}s  sort: {}{paused} ",
                    status.cycles,
                    app.interval().as_secs_f64(),
                    app.sort_key()
                ),
                Style::default().fg(Color::DarkGray),
            ),
        ]));

    let line = match &status.last_error {
        Some(err) => Line::from(Span::styled(
            format!("last cycle failed: {err}"),
            Style::default().fg(Color::Red),
        )),
        None => match &status.view {
            Some(view) => Line::from(format!(
                "{} call sites merged over {:.2}s",
                view.merged_keys, view.interval_secs
            )),
            None => Line::from(""),
        },
    };

    f.render_widget(Paragraph::new(line).block(block), area);
}

fn draw_collecting(f: &mut Frame, area: Rect, app: &App) {
    let text = Paragraph::new(Line::from(Span::styled(
        format!("Collecting from {} workers...", app.workers()),
        Style::default().bold(),
    )))
    .block(Block::default().borders(Borders::ALL).title(" Calls "));
    f.render_widget(text, area);
}

fn draw_table(f: &mut Frame, area: Rect, view: &ProfileView) {
    let sorted = sort_column(view.sort_key);

    let header = Row::new(TOP_HEADERS.iter().enumerate().map(|(i, h)| {
        let style = if i == sorted {
            Style::default().bold().fg(Color::Yellow)
        } else {
            Style::default().bold()
        };
        Cell::from(align(h.to_string(), i)).style(style)
    }));

    let rows: Vec<Row> = view
        .rows
        .iter()
        .map(|row| {
            let cells = top_cells(row)
                .into_iter()
                .enumerate()
                .map(|(i, text)| Cell::from(align(text, i)));
            Row::new(cells).style(row_style(row))
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Min(30),    // function
            Constraint::Length(6),  // cpu
            Constraint::Length(11), // inline
            Constraint::Length(10), // total
            Constraint::Length(12), // per call
            Constraint::Length(8),  // calls/s
            Constraint::Length(8),  // calls
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" Calls (sorted by {}) ", view.sort_key)),
    );

    f.render_widget(table, area);
}

fn draw_keys(f: &mut Frame, area: Rect) {
    let bar = Paragraph::new(" q: quit   s: sort   p: pause   +/-: refresh")
        .style(Style::default().bg(Color::DarkGray).fg(Color::White));
    f.render_widget(bar, area);
}

fn align(text: String, column: usize) -> Line<'static> {
    if column == 0 {
        Line::from(text)
    } else {
        Line::from(text).alignment(Alignment::Right)
    }
}

fn row_style(row: &DerivedCallStat) -> Style {
    if row.cpu_percent >= 0.5 {
        Style::default().fg(Color::Red)
    } else if row.cpu_percent >= 0.1 {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    }
}

/// Column of [`TOP_HEADERS`] a sort key ranks by.
fn sort_column(key: SortKey) -> usize {
    match key {
        SortKey::CpuPercent => 1,
        SortKey::InlineTime => 2,
        SortKey::TotalTime => 3,
        SortKey::PerCallTime => 4,
        SortKey::CallRate => 5,
        SortKey::CallCount => 6,
    }
}
