//! Human and machine output for a finished run

use crate::bench::BenchReport;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::fmt::Write;

/// Pretty JSON with a trailing newline
pub fn to_json(report: &BenchReport) -> Result<String> {
    let mut json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    json.push('\n');
    Ok(json)
}

/// Colored summary table
pub fn render(report: &BenchReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", "Debounce Benchmark".bold());
    let _ = writeln!(out, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let _ = writeln!(out, "Threads:       {}", report.threads);
    let _ = writeln!(out, "Triggers:      {}", report.triggers.to_string().cyan());
    if report.rejected > 0 {
        let _ = writeln!(out, "Rejected:      {} (retried)", report.rejected.to_string().yellow());
    }

    let delivered = report.delivered.to_string();
    if report.delivered == report.triggers {
        let _ = writeln!(out, "Delivered:     {}", delivered.green());
    } else {
        let _ = writeln!(out, "Delivered:     {}", delivered.red());
    }
    if report.delivered_payloads > 0 {
        let _ = writeln!(out, "Payloads:      {}", report.delivered_payloads);
    }

    let _ = writeln!(out, "Dispatches:    {}", report.dispatches);
    let _ = writeln!(out, "Largest batch: {}", report.largest_batch);

    let concurrency = report.max_concurrency.to_string();
    if report.max_concurrency <= 1 {
        let _ = writeln!(out, "Concurrency:   {}", concurrency.green());
    } else {
        let _ = writeln!(out, "Concurrency:   {}", concurrency.red());
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Triggering:    {:.1} ms ({})",
        report.trigger_elapsed_ms,
        format_rate(report.triggers_per_sec).dimmed()
    );
    let _ = writeln!(out, "Total:         {:.1} ms", report.total_elapsed_ms);
    out
}

fn format_rate(per_sec: f64) -> String {
    if per_sec >= 1_000_000.0 {
        format!("{:.2} M triggers/s", per_sec / 1_000_000.0)
    } else if per_sec >= 1_000.0 {
        format!("{:.1} k triggers/s", per_sec / 1_000.0)
    } else {
        format!("{per_sec:.0} triggers/s")
    }
}
