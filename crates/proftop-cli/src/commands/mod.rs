pub mod report;
pub mod serve;
pub mod top;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use proftop_core::{
    AggregatorConfig, CallDeltaPolicy, FetchPolicy, PollerConfig, ReportFileSource,
    SnapshotSource, SyntheticConfig, SyntheticSource,
};

/// Where worker tables come from.
#[derive(Debug, Clone, Default, Args)]
pub struct SourceArgs {
    /// Worker report file to poll (repeat for each worker)
    #[arg(long = "report", value_name = "PATH")]
    pub reports: Vec<PathBuf>,

    /// Simulate this many workers instead of reading reports
    #[arg(long, value_name = "WORKERS", conflicts_with = "reports")]
    pub synthetic: Option<usize>,

    /// Seed for simulated workers (default: random)
    #[arg(long, requires = "synthetic")]
    pub seed: Option<u64>,

    /// Chance per fetch that a simulated worker restarts, 0.0-1.0
    #[arg(long, default_value = "0.0", requires = "synthetic")]
    pub restart_chance: f64,

    /// Keep polling when a worker fails, merging the ones that answered
    #[arg(long)]
    pub partial: bool,

    /// Report a shrinking call count as zero calls instead of a negative rate
    #[arg(long)]
    pub clamp_calls: bool,
}

/// Build the snapshot sources selected on the command line.
pub fn make_sources(args: &SourceArgs) -> Result<Vec<Arc<dyn SnapshotSource>>, String> {
    if let Some(workers) = args.synthetic {
        if workers == 0 {
            return Err("--synthetic needs at least one worker".to_string());
        }
        let config = SyntheticConfig {
            seed: args.seed,
            restart_chance: args.restart_chance,
            ..SyntheticConfig::default()
        };
        return Ok(SyntheticSource::fleet(workers, &config)
            .into_iter()
            .map(|s| Arc::new(s) as Arc<dyn SnapshotSource>)
            .collect());
    }

    if args.reports.is_empty() {
        return Err("no workers to poll: pass --report <PATH> or --synthetic <WORKERS>".to_string());
    }
    Ok(args
        .reports
        .iter()
        .map(|path| Arc::new(ReportFileSource::new(path)) as Arc<dyn SnapshotSource>)
        .collect())
}

/// Same as [`make_sources`], exiting with a message on error.
pub fn sources_or_exit(args: &SourceArgs) -> Vec<Arc<dyn SnapshotSource>> {
    make_sources(args).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(2);
    })
}

pub fn poller_config(args: &SourceArgs, interval: Duration) -> PollerConfig {
    PollerConfig {
        interval,
        fetch_policy: if args.partial {
            FetchPolicy::Partial
        } else {
            FetchPolicy::SkipCycle
        },
        aggregator: AggregatorConfig {
            call_delta: if args.clamp_calls {
                CallDeltaPolicy::Clamped
            } else {
                CallDeltaPolicy::Signed
            },
        },
        ..PollerConfig::default()
    }
}

pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Error starting async runtime: {e}");
        std::process::exit(1);
    })
}

/// Parse "500ms", "2s", "1.5", "1m" into a positive duration. Bare numbers
/// are seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    let (numeric, to_secs): (&str, fn(f64) -> f64) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, |v| v / 1000.0)
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, |v| v)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, |v| v * 60.0)
    } else {
        (s, |v| v)
    };

    let value: f64 = numeric
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration '{s}'"))?;
    let secs = to_secs(value);
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("duration must be positive, got '{s}'"));
    }
    Ok(Duration::from_secs_f64(secs))
}
