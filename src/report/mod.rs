//! Rendering of the run summary: a Markdown report plus a JSON dump of the
//! raw records. The core hands the summary over read-only; nothing in here
//! feeds back into the run.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::result::{InfoRow, LatencyRecord, RunSummary, SweepResults, TestStatus, ThroughputRecord};
use crate::util;

/// Port count the theoretical-maximum column is computed for.
const REPORT_PORTS: u32 = 4;

#[derive(Debug)]
pub struct ReportPaths {
    pub markdown: PathBuf,
    pub json: PathBuf,
}

/// Write `summary.md` and `summary.json` into `dir`, creating it if needed.
pub fn write(summary: &RunSummary, dir: &Path) -> Result<ReportPaths> {
    fs::create_dir_all(dir)
        .with_context(|| format!("could not create report directory {}", dir.display()))?;

    let markdown = dir.join("summary.md");
    fs::write(&markdown, render_markdown(summary))
        .with_context(|| format!("could not write {}", markdown.display()))?;

    let json = dir.join("summary.json");
    fs::write(&json, serde_json::to_string_pretty(summary)?)
        .with_context(|| format!("could not write {}", json.display()))?;

    Ok(ReportPaths { markdown, json })
}

pub fn render_markdown(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str("# Dataplane Characterization Report\n\n");
    let _ = writeln!(
        out,
        "Generated by pktbench v{} on {}.\n",
        summary.version,
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    out.push_str("## Executed tests\n\n");
    let mut rows = vec![vec!["Test Name".to_string(), "KPI".to_string()]];
    for outcome in &summary.outcomes {
        let kpi = match (&outcome.status, &outcome.kpi) {
            (TestStatus::Completed { .. }, Some(kpi)) => kpi.clone(),
            (TestStatus::Completed { .. }, None) => "n/a".to_string(),
            _ => "Error running test".to_string(),
        };
        rows.push(vec![outcome.short_descr.clone(), kpi]);
    }
    out.push_str(&simple_table(&rows));
    let _ = writeln!(
        out,
        "\nThe tolerated packet loss for these tests was {}%.\n",
        summary.tolerated_loss
    );

    out.push_str("## System under test\n\n");
    out.push_str(&info_table("Hardware", &summary.sut.hardware));
    out.push_str(&info_table("Software", &summary.sut.software));

    out.push_str("## Test details\n\n");
    for outcome in &summary.outcomes {
        let _ = writeln!(out, "### {}\n", outcome.short_descr);
        for paragraph in outcome.long_descr.split('\n') {
            if !paragraph.trim().is_empty() {
                let _ = writeln!(out, "{}\n", paragraph.trim());
            }
        }
        match &outcome.status {
            TestStatus::Completed { results } => {
                out.push_str(&fragment(results));
                out.push('\n');
            }
            TestStatus::Failed { error } => {
                let _ = writeln!(out, "**Error while running test:** {error}\n");
            }
            TestStatus::Interrupted => {
                out.push_str("**Error while running test:** test run interrupted by user\n\n");
            }
        }
    }

    out
}

/// The per-test result table; the inputs are the ordered records the sweep
/// produced.
pub fn fragment(results: &SweepResults) -> String {
    match results {
        SweepResults::Throughput(records) => throughput_table(records),
        SweepResults::Latency(records) => latency_table(records),
    }
}

fn throughput_table(records: &[ThroughputRecord]) -> String {
    let mut rows = vec![vec![
        "Packet size (B)".to_string(),
        "Throughput (Mpps)".to_string(),
        "Theoretical max (Mpps)".to_string(),
        "Duration (s)".to_string(),
    ]];
    for record in records {
        rows.push(vec![
            record.pkt_size.to_string(),
            format!("{:.2}", record.mpps),
            format!(
                "{:.2}",
                util::line_rate_to_pps(record.pkt_size, REPORT_PORTS) / 1_000_000.0
            ),
            format!("{:.1}", record.duration_secs),
        ]);
    }
    simple_table(&rows)
}

fn latency_table(records: &[LatencyRecord]) -> String {
    let mut rows = vec![vec![
        "Packet size (B)".to_string(),
        "Min latency (ns)".to_string(),
        "Max latency (ns)".to_string(),
        "Avg latency (ns)".to_string(),
    ]];
    for record in records {
        rows.push(vec![
            record.pkt_size.to_string(),
            format!("{:.0}", record.min_ns),
            format!("{:.0}", record.max_ns),
            format!("{:.0}", record.avg_ns),
        ]);
    }
    simple_table(&rows)
}

fn info_table(title: &str, rows: &[InfoRow]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    let mut table = vec![vec![title.to_string(), String::new()]];
    for row in rows {
        table.push(vec![row.label.clone(), row.value.clone()]);
    }
    simple_table(&table)
}

/// Render rows as a Markdown table, columns padded for readability in the
/// raw file. The first row is the header.
fn simple_table(rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut widths = vec![0usize; columns];
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let mut out = String::new();
    for (n, row) in rows.iter().enumerate() {
        out.push('|');
        for (i, width) in widths.iter().copied().enumerate() {
            let cell = row.get(i).map(String::as_str).unwrap_or("");
            let _ = write!(out, " {cell:<width$} |");
        }
        out.push('\n');
        if n == 0 {
            out.push('|');
            for width in &widths {
                let _ = write!(out, "{}|", "-".repeat(width + 2));
            }
            out.push('\n');
        }
    }
    out.push('\n');
    out
}
