//! `proftop serve`: poll workers and publish the live view over HTTP.

use std::time::Duration;

use proftop_core::{Poller, SortKey, ViewOptions};

use super::SourceArgs;

pub fn run(
    source_args: &SourceArgs,
    host: &str,
    port: u16,
    interval: Duration,
    sort_key: SortKey,
    limit: usize,
) {
    let sources = super::sources_or_exit(source_args);
    let poller = Poller::new(sources, super::poller_config(source_args, interval));
    let workers = poller.source_count();

    let base = format!("http://{host}:{port}");
    println!("proftop server v{}", proftop_core::VERSION);
    println!("   {base}");
    println!("   {workers} workers, polled every {:.1}s", interval.as_secs_f64());
    println!();
    println!("   Endpoints:");
    println!("     GET /                      API index");
    println!("     GET /api/v1/profiler/top   Latest ranked call statistics");
    println!("     GET /health                Poller health");
    println!();
    println!("   Examples:");
    println!("     curl {base}/api/v1/profiler/top?limit=10");
    println!("     curl {base}/health");
    println!();

    let rt = super::runtime();
    let result = rt.block_on(async {
        let handle = poller.spawn(ViewOptions { limit, sort_key });
        let served = proftop_server::run_server(handle.subscribe(), workers, host, port).await;
        if let Err(e) = handle.shutdown().await {
            log::warn!("poller task ended abnormally: {e}");
        }
        served
    });

    if let Err(e) = result {
        eprintln!("Error: server on {host}:{port} failed: {e}");
        std::process::exit(1);
    }
}
