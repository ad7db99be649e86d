//! Text formatting shared by the table printers and the TUI.

use proftop_core::{CallKey, DerivedCallStat, ProfileView};

/// Compact number with a k/m/b/t suffix.
///
/// `precision` is the number of significant decimals for values below 1;
/// larger values give up one decimal per order of magnitude. Trailing zeros
/// are dropped.
pub fn human_num(num: f64, precision: usize) -> String {
    let sign = if num < 0.0 { "-" } else { "" };
    let mut n = num.abs();
    let suffix = if n > 1e12 {
        n /= 1e12;
        "t"
    } else if n > 1e9 {
        n /= 1e9;
        "b"
    } else if n > 1e6 {
        n /= 1e6;
        "m"
    } else if n > 1e3 {
        n /= 1e3;
        "k"
    } else {
        ""
    };

    let used = if n > 100.0 {
        3
    } else if n > 10.0 {
        2
    } else if n > 1.0 {
        1
    } else {
        0
    };
    let prec = precision.saturating_sub(used);

    let mut digits = format!("{n:.prec$}");
    if digits.contains('.') {
        digits = digits.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    format!("{sign}{digits}{suffix}")
}

/// `parent/file.py:function:line`, keeping only the last two path segments.
/// Built-ins have no location and show as just the function name.
pub fn short_label(key: &CallKey) -> String {
    if key.is_builtin() {
        return key.function.clone();
    }
    let mut segments = key.file.rsplitn(3, '/');
    let name = segments.next().unwrap_or("");
    let file = match segments.next() {
        Some(parent) => format!("{parent}/{name}"),
        None => name.to_string(),
    };
    format!("{file}:{}:{}", key.function, key.line)
}

pub fn per_call(us: f64) -> String {
    format!("{us:.0} μs")
}

/// Column values of one live row, in [`TOP_HEADERS`] order.
pub fn top_cells(row: &DerivedCallStat) -> [String; 7] {
    [
        short_label(&row.key),
        human_num(row.cpu_percent * 100.0, 1),
        human_num(row.stat.inline_time, 3),
        human_num(row.stat.total_time, 3),
        per_call(row.per_call_time_us),
        human_num(row.call_rate, 3),
        human_num(row.stat.call_count as f64, 3),
    ]
}

pub const TOP_HEADERS: [&str; 7] = [
    "Function",
    "CPU%",
    "Inline-Time",
    "Total-Time",
    "Time/call",
    "Calls/s",
    "Calls",
];

pub const REPORT_HEADERS: [&str; 4] = ["Function", "Total Time", "Inline Time", "Calls"];

/// Column values of one cumulative report row, in [`REPORT_HEADERS`] order.
pub fn report_cells(row: &DerivedCallStat) -> [String; 4] {
    [
        short_label(&row.key),
        format!("{:.6}", row.stat.total_time),
        format!("{:.6}", row.stat.inline_time),
        row.stat.call_count.to_string(),
    ]
}

/// Left-align the first column, right-align the rest.
pub fn table<const N: usize>(headers: [&str; N], rows: &[[String; N]]) -> String {
    let mut widths = headers.map(|h| h.chars().count());
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, headers.iter().copied(), &widths);
    for row in rows {
        push_row(&mut out, row.iter().map(String::as_str), &widths);
    }
    out
}

fn push_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let line: Vec<String> = cells
        .zip(widths)
        .enumerate()
        .map(|(i, (cell, &w))| {
            if i == 0 {
                format!("{cell:<w$}")
            } else {
                format!("{cell:>w$}")
            }
        })
        .collect();
    out.push_str(line.join("  ").trim_end());
    out.push('\n');
}

/// Plain-text rendering of a live view.
pub fn view_table(view: &ProfileView) -> String {
    let rows: Vec<[String; 7]> = view.rows.iter().map(top_cells).collect();
    format!(
        "cycle #{}  {} workers  {} call sites  {:.2}s interval  sorted by {}\n{}",
        view.cycle,
        view.workers,
        view.merged_keys,
        view.interval_secs,
        view.sort_key,
        table(TOP_HEADERS, &rows)
    )
}
