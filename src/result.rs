//! Result records produced by sweeps and aggregated per run.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of a single throughput probe at a fixed packet size and speed.
///
/// `mpps` is recorded regardless of pass/fail; the search reports the value
/// from the probe that set its final lower bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProbeOutcome {
    pub success: bool,
    pub mpps: f64,
}

/// Latency distribution observed by a single probe, nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencyStats {
    pub min_ns: f64,
    pub max_ns: f64,
    pub avg_ns: f64,
}

/// Converged result for one packet size of a throughput test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThroughputRecord {
    pub pkt_size: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    /// Highest throughput that still satisfied the loss criterion, Mpps.
    pub mpps: f64,
    /// Wall-clock duration of the whole search for this size, seconds.
    pub duration_secs: f64,
}

/// Result for one packet size of a latency test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyRecord {
    pub pkt_size: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub min_ns: f64,
    pub max_ns: f64,
    pub avg_ns: f64,
}

/// Ordered per-packet-size records of one completed sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "records", rename_all = "snake_case")]
pub enum SweepResults {
    Throughput(Vec<ThroughputRecord>),
    Latency(Vec<LatencyRecord>),
}

impl SweepResults {
    pub fn len(&self) -> usize {
        match self {
            SweepResults::Throughput(records) => records.len(),
            SweepResults::Latency(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestStatus {
    Completed { results: SweepResults },
    Failed { error: String },
    Interrupted,
}

/// Exactly one per executed test case, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestOutcome {
    pub name: String,
    pub short_descr: String,
    pub long_descr: String,
    pub kpi: Option<String>,
    pub status: TestStatus,
}

impl TestOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self.status, TestStatus::Completed { .. })
    }
}

/// One labelled row of the SUT description tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoRow {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SutInfo {
    pub hardware: Vec<InfoRow>,
    pub software: Vec<InfoRow>,
}

/// Everything the reporting boundary needs for one run.
///
/// Owned and appended to by the orchestrator only; handed off read-only.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tolerated_loss: f64,
    pub sut: SutInfo,
    pub outcomes: Vec<TestOutcome>,
}
