//! pktbench -- adaptive throughput and latency characterization of
//! dataplane systems under test.
//!
//! The harness drives a remote traffic generator and a remote SUT through a
//! sequence of load levels: per test case and packet size, a bisection
//! search converges on the highest load still meeting the loss tolerance,
//! and the per-test results are aggregated into a single report.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod remote;
pub mod report;
pub mod result;
pub mod search;
pub mod sweep;
pub mod testcase;
pub mod util;

use tokio_util::sync::CancellationToken;

use config::Config;
use orchestrator::Orchestrator;
use result::RunSummary;

/// Run the requested tests against the configured peers and return the
/// aggregated summary. `cancel` aborts the run at test granularity.
pub async fn run_suite(
    config: &Config,
    requested: &[String],
    cancel: CancellationToken,
) -> error::Result<RunSummary> {
    config.validate()?;

    let catalog = testcase::builtin();
    let orchestrator = Orchestrator::new(catalog, cancel);
    let sut = orchestrator::gather_sut_info(&config.sut).await;
    Ok(orchestrator.run(config, requested, sut).await)
}
