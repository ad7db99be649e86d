//! `proftop top`: live per-interval call statistics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use proftop_core::{CycleOutcome, DEFAULT_VIEW_LIMIT, Poller, SortKey, ViewOptions};

use crate::format::view_table;

use super::SourceArgs;

pub fn run(
    source_args: &SourceArgs,
    interval: Duration,
    sort_key: SortKey,
    plain: bool,
    limit: Option<usize>,
) {
    let sources = super::sources_or_exit(source_args);
    let poller = Poller::new(sources, super::poller_config(source_args, interval));
    let workers = poller.source_count();
    let rt = super::runtime();

    if plain {
        let options = ViewOptions {
            limit: limit.unwrap_or(DEFAULT_VIEW_LIMIT),
            sort_key,
        };
        run_plain(&rt, poller, options);
        return;
    }

    // The TUI sizes the table to the terminal; the first frame corrects this.
    let options = ViewOptions {
        limit: DEFAULT_VIEW_LIMIT,
        sort_key,
    };
    let handle = {
        let _guard = rt.enter();
        poller.spawn(options)
    };
    let mut app = crate::tui::app::App::new(handle, workers);
    let result = app.run();
    if let Err(e) = rt.block_on(app.into_handle().shutdown()) {
        log::warn!("poller task ended abnormally: {e}");
    }
    if let Err(e) = result {
        eprintln!("TUI error: {e}");
        std::process::exit(1);
    }
}

/// Print a text table per cycle until Ctrl+C.
fn run_plain(rt: &tokio::runtime::Runtime, mut poller: Poller, options: ViewOptions) {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Error setting Ctrl+C handler: {e}");
        std::process::exit(1);
    }

    let settle = poller.config().settle_delay;
    let interval = poller.config().interval;
    rt.block_on(async {
        while running.load(Ordering::SeqCst) {
            let delay = match poller.poll_cycle(&options).await {
                Ok(CycleOutcome::Baseline { workers, .. }) => {
                    println!("Collecting from {workers} workers...");
                    settle
                }
                Ok(CycleOutcome::View(view)) => {
                    println!("{}", view_table(&view));
                    interval
                }
                Err(e) => {
                    eprintln!("cycle skipped: {e}");
                    interval
                }
            };
            tokio::time::sleep(delay).await;
        }
    });
    println!("Stopped after {} cycles.", poller.cycles());
}
