//! CLI for proftop: live per-interval profiler rates across workers.

mod commands;
mod format;
mod tui;

use std::time::Duration;

use clap::{Parser, Subcommand};
use proftop_core::{DEFAULT_VIEW_LIMIT, SortKey};

use commands::SourceArgs;

#[derive(Parser)]
#[command(name = "proftop")]
#[command(about = "proftop: merge per-worker call statistics into live ranked rates")]
#[command(version = proftop_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Live view of the hottest call sites, refreshed every interval.
    /// Keys: q quit, s sort, p pause, +/- refresh rate.
    Top {
        #[command(flatten)]
        sources: SourceArgs,

        /// Time between cycles (e.g. 500ms, 2s, 1m)
        #[arg(long, default_value = "1s", value_parser = commands::parse_duration)]
        refresh: Duration,

        /// Sort column: totaltime, inlinetime, callcount, cpu, callrate, percall
        #[arg(long, default_value = "inlinetime")]
        sortby: SortKey,

        /// Print a text table per cycle instead of the interactive view
        #[arg(long)]
        plain: bool,

        /// Rows per cycle in plain mode (the TUI fits the terminal)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// One-shot merged cumulative table across all workers
    Report {
        #[command(flatten)]
        sources: SourceArgs,

        /// Sort column: totaltime (default), inlinetime, callcount
        #[arg(long, default_value = "totaltime", value_parser = commands::report::parse_cumulative_key)]
        sortby: SortKey,

        /// Maximum rows (default: all)
        #[arg(long)]
        limit: Option<usize>,

        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },

    /// Poll workers in the background and serve the latest view over HTTP
    Serve {
        #[command(flatten)]
        sources: SourceArgs,

        /// Host to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(long, default_value = "8042")]
        port: u16,

        /// Time between cycles (e.g. 500ms, 2s, 1m)
        #[arg(long, default_value = "1s", value_parser = commands::parse_duration)]
        refresh: Duration,

        /// Sort column: totaltime, inlinetime, callcount, cpu, callrate, percall
        #[arg(long, default_value = "inlinetime")]
        sortby: SortKey,

        /// Rows kept per cycle
        #[arg(long, default_value_t = DEFAULT_VIEW_LIMIT)]
        limit: usize,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Top {
            sources,
            refresh,
            sortby,
            plain,
            limit,
        } => commands::top::run(&sources, refresh, sortby, plain, limit),
        Commands::Report {
            sources,
            sortby,
            limit,
            json,
        } => commands::report::run(&sources, sortby, limit, json),
        Commands::Serve {
            sources,
            host,
            port,
            refresh,
            sortby,
            limit,
        } => commands::serve::run(&sources, &host, port, refresh, sortby, limit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn top_parses_refresh_and_sort() {
        let cli = Cli::try_parse_from([
            "proftop", "top", "--synthetic", "3", "--refresh", "250ms", "--sortby", "cpu",
        ])
        .unwrap();
        match cli.command {
            Commands::Top {
                sources,
                refresh,
                sortby,
                plain,
                limit,
            } => {
                assert_eq!(sources.synthetic, Some(3));
                assert_eq!(refresh, Duration::from_millis(250));
                assert_eq!(sortby, SortKey::CpuPercent);
                assert!(!plain);
                assert_eq!(limit, None);
            }
            _ => panic!("expected top"),
        }
    }

    #[test]
    fn report_rejects_rate_sort() {
        assert!(
            Cli::try_parse_from(["proftop", "report", "--report", "a.json", "--sortby", "callrate"])
                .is_err()
        );
    }

    #[test]
    fn report_and_synthetic_conflict() {
        assert!(
            Cli::try_parse_from(["proftop", "top", "--report", "a.json", "--synthetic", "2"])
                .is_err()
        );
    }

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["proftop", "serve", "--synthetic", "1"]).unwrap();
        match cli.command {
            Commands::Serve {
                host,
                port,
                refresh,
                sortby,
                limit,
                ..
            } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 8042);
                assert_eq!(refresh, Duration::from_secs(1));
                assert_eq!(sortby, SortKey::InlineTime);
                assert_eq!(limit, DEFAULT_VIEW_LIMIT);
            }
            _ => panic!("expected serve"),
        }
    }
}
