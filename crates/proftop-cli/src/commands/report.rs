//! `proftop report`: one-shot merged cumulative table.

use std::time::Duration;

use proftop_core::{Poller, SortKey, ViewOptions};

use crate::format::{REPORT_HEADERS, report_cells, table};

use super::SourceArgs;

/// Accept only the cumulative sort keys; a single fetch has no rates.
pub fn parse_cumulative_key(s: &str) -> Result<SortKey, String> {
    let key: SortKey = s.parse()?;
    if key.is_cumulative() {
        Ok(key)
    } else {
        Err(format!(
            "'{s}' needs two samples; use totaltime, inlinetime or callcount"
        ))
    }
}

pub fn run(source_args: &SourceArgs, sort_key: SortKey, limit: Option<usize>, json: bool) {
    let sources = super::sources_or_exit(source_args);
    // Single fetch, so the polling interval is unused.
    let poller = Poller::new(sources, super::poller_config(source_args, Duration::ZERO));
    let options = ViewOptions {
        limit: limit.unwrap_or(usize::MAX),
        sort_key,
    };

    let rt = super::runtime();
    let rows = match rt.block_on(poller.cumulative_report(&options)) {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if json {
        match serde_json::to_string_pretty(&rows) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("Error encoding report: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let cells: Vec<[String; 4]> = rows.iter().map(report_cells).collect();
    print!("{}", table(REPORT_HEADERS, &cells));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cumulative_key() {
        assert_eq!(parse_cumulative_key("totaltime"), Ok(SortKey::TotalTime));
        assert_eq!(parse_cumulative_key("inlinetime"), Ok(SortKey::InlineTime));
        assert_eq!(parse_cumulative_key("callcount"), Ok(SortKey::CallCount));
        assert!(parse_cumulative_key("cpu").is_err());
        assert!(parse_cumulative_key("nope").is_err());
    }
}
