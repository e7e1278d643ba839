//! Test lifecycle orchestration: resolve the requested test names, run each
//! test through setup, sweep and teardown with per-test failure isolation,
//! and assemble the run summary.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, PeerConfig};
use crate::error::{BenchError, Result};
use crate::remote::RemoteSystem;
use crate::result::{InfoRow, RunSummary, SutInfo, SweepResults, TestOutcome, TestStatus};
use crate::sweep;
use crate::testcase::{TestCatalog, TestHandle};

const SUT_HW_COMMANDS: &[(&str, &str)] = &[
    (
        "Platform",
        "sudo dmidecode --type system | grep 'Product Name' | cut -d: -f2 2>/dev/null",
    ),
    (
        "Processor",
        "grep 'model name' /proc/cpuinfo | uniq | cut -d: -f2 | cut -c2-",
    ),
    ("# of cores", "grep -c processor /proc/cpuinfo"),
    (
        "RAM",
        "printf '%d MB' $(free -m | grep Mem | tr -s ' ' | cut -d' ' -f2)",
    ),
];

const SUT_SW_COMMANDS: &[(&str, &str)] = &[
    (
        "BIOS version",
        "sudo dmidecode --type bios | grep 'Version' | cut -d: -f2 2>/dev/null",
    ),
    ("OS", "sed '1!d' /etc/*-release"),
    ("Kernel", "uname -rm"),
    (
        "Hugepages - 2 MB",
        "cat /sys/devices/system/node/node0/hugepages/hugepages-2048kB/nr_hugepages 2>/dev/null",
    ),
    (
        "Hugepages - 1 GB",
        "cat /sys/devices/system/node/node0/hugepages/hugepages-1048576kB/nr_hugepages 2>/dev/null",
    ),
];

pub struct Orchestrator {
    catalog: TestCatalog,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(catalog: TestCatalog, cancel: CancellationToken) -> Self {
        Self { catalog, cancel }
    }

    /// Which tests to run. Checked in order, first non-empty source wins:
    /// names passed on the command line, names from the configuration, all
    /// catalog entries sorted.
    pub fn resolve_tests(&self, requested: &[String], config: &Config) -> Vec<String> {
        if !requested.is_empty() {
            return requested.to_vec();
        }
        if let Some(tests) = &config.general.tests {
            if !tests.is_empty() {
                debug!("no tests on the command line, using the configured list");
                return tests.clone();
            }
        }
        debug!("no tests requested, running the whole catalog");
        self.catalog.names().map(String::from).collect()
    }

    /// Run the requested tests and aggregate their outcomes.
    ///
    /// A failing test is recorded and the run continues with the next one;
    /// an interrupt records the in-flight test and stops the run. The
    /// summary is produced either way. `sut` is the environment description
    /// gathered before the run (see [`gather_sut_info`]).
    pub async fn run(&self, config: &Config, requested: &[String], sut: SutInfo) -> RunSummary {
        let started_at = Utc::now();
        let names = self.resolve_tests(requested, config);
        debug!(?names, "tests to run");

        let mut outcomes = Vec::new();
        for name in &names {
            let Some(entry) = self.catalog.get(name) else {
                error!(
                    test = %name,
                    "test not found; `pktbench list` shows the available tests"
                );
                continue;
            };
            let mut test = (entry.factory)(config);
            info!(test = %name, descr = test.short_descr(), "running test");

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(BenchError::Interrupted),
                result = run_lifecycle(&mut test, config, &self.cancel) => result,
            };

            match result {
                Ok(results) => {
                    outcomes.push(outcome_of(name, &test, TestStatus::Completed { results }));
                }
                Err(BenchError::Interrupted) => {
                    error!(test = %name, "test run interrupted, generating partial report");
                    outcomes.push(outcome_of(name, &test, TestStatus::Interrupted));
                    break;
                }
                Err(err) => {
                    if err.is_io() {
                        error!(test = %name, %err, "I/O failure, skipping to next test");
                    } else {
                        error!(test = %name, %err, "test failed, skipping to next test");
                    }
                    outcomes.push(outcome_of(
                        name,
                        &test,
                        TestStatus::Failed {
                            error: err.to_string(),
                        },
                    ));
                }
            }
        }

        log_summary(&outcomes);

        RunSummary {
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at,
            finished_at: Utc::now(),
            tolerated_loss: config.general.tolerated_loss,
            sut,
            outcomes,
        }
    }
}

/// Setup, sweep and teardown form one protected region; the first error
/// unwinds to the caller (teardown is skipped when the sweep errors).
async fn run_lifecycle(
    test: &mut TestHandle,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<SweepResults> {
    test.setup(cancel).await?;
    let results = sweep::run(test, config).await?;
    test.teardown().await?;
    Ok(results)
}

fn outcome_of(name: &str, test: &TestHandle, status: TestStatus) -> TestOutcome {
    TestOutcome {
        name: name.to_string(),
        short_descr: test.short_descr().to_string(),
        long_descr: test.long_descr().to_string(),
        kpi: test.kpi(),
        status,
    }
}

fn log_summary(outcomes: &[TestOutcome]) {
    info!("{}", "-".repeat(72));
    info!("Test summary");
    info!("{}", "-".repeat(72));
    for outcome in outcomes {
        let kpi = match (&outcome.status, &outcome.kpi) {
            (TestStatus::Completed { .. }, Some(kpi)) => kpi.clone(),
            (TestStatus::Completed { .. }, None) => "n/a".to_string(),
            _ => "error running test".to_string(),
        };
        info!("{}: {}", outcome.short_descr, kpi);
    }
    info!("{}", "-".repeat(72));
}

/// Describe the SUT before the run. Best effort: a command that fails or
/// prints nothing contributes no row.
pub async fn gather_sut_info(peer: &PeerConfig) -> SutInfo {
    let sut = RemoteSystem::new("sut", peer);
    let mut info = SutInfo::default();

    info!("retrieving SUT hardware description");
    for (label, cmd) in SUT_HW_COMMANDS {
        append_rows(&sut, &mut info.hardware, label, cmd).await;
    }
    info!("retrieving SUT software description");
    for (label, cmd) in SUT_SW_COMMANDS {
        append_rows(&sut, &mut info.software, label, cmd).await;
    }
    info
}

async fn append_rows(sut: &RemoteSystem, rows: &mut Vec<InfoRow>, label: &str, cmd: &str) {
    match sut.run_cmd(cmd).await {
        Ok(out) if out.ok() && !out.output.is_empty() => {
            rows.extend(fold_output(label, &out.output));
        }
        Ok(out) => debug!(label, status = out.status, "SUT info command gave no output"),
        Err(err) => warn!(label, %err, "could not retrieve SUT information"),
    }
}

/// Run-length encode consecutive identical lines of a multi-line command
/// output into `Nx <line>` rows.
fn fold_output(label: &str, output: &str) -> Vec<InfoRow> {
    let lines: Vec<&str> = output.lines().collect();
    if lines.len() <= 1 {
        return vec![InfoRow {
            label: label.to_string(),
            value: output.trim().to_string(),
        }];
    }

    let mut rows = Vec::new();
    let mut current = lines[0];
    let mut count = 1usize;
    for &line in &lines[1..] {
        if line == current {
            count += 1;
        } else {
            rows.push(InfoRow {
                label: label.to_string(),
                value: format!("{count}x {current}"),
            });
            current = line;
            count = 1;
        }
    }
    rows.push(InfoRow {
        label: label.to_string(),
        value: format!("{count}x {current}"),
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{ProbeOutcome, ThroughputRecord};
    use crate::testcase::{TestCase, ThroughputTest};
    use async_trait::async_trait;
    use std::time::Duration;

    struct ScriptedTest {
        breakpoint: f64,
        fail_setup: bool,
        fail_probe: bool,
        cancel_on_probe: Option<CancellationToken>,
        kpi: Option<String>,
    }

    impl ScriptedTest {
        fn handle(breakpoint: f64) -> TestHandle {
            TestHandle::Throughput(Box::new(Self {
                breakpoint,
                fail_setup: false,
                fail_probe: false,
                cancel_on_probe: None,
                kpi: None,
            }))
        }
    }

    #[async_trait]
    impl TestCase for ScriptedTest {
        fn short_descr(&self) -> &'static str {
            "scripted"
        }
        fn long_descr(&self) -> &'static str {
            "scripted test"
        }
        fn lower_bound(&self, _pkt_size: u32) -> f64 {
            0.0
        }
        fn upper_bound(&self, _pkt_size: u32) -> f64 {
            100.0
        }
        fn kpi(&self) -> Option<String> {
            self.kpi.clone()
        }
        async fn setup(&mut self, _cancel: &CancellationToken) -> Result<()> {
            if self.fail_setup {
                return Err(BenchError::Transport {
                    peer: "tester".to_string(),
                    detail: "setup refused".to_string(),
                });
            }
            Ok(())
        }
        async fn teardown(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl ThroughputTest for ScriptedTest {
        async fn probe(
            &mut self,
            _pkt_size: u32,
            _duration: Duration,
            speed: f64,
        ) -> Result<ProbeOutcome> {
            if let Some(token) = &self.cancel_on_probe {
                token.cancel();
                tokio::time::sleep(Duration::from_secs(600)).await;
            }
            if self.fail_probe {
                return Err(BenchError::Protocol("scripted probe failure".to_string()));
            }
            Ok(ProbeOutcome {
                success: speed <= self.breakpoint,
                mpps: speed / 10.0,
            })
        }

        fn update_kpi(&mut self, record: &ThroughputRecord) {
            if record.pkt_size != 64 {
                return;
            }
            self.kpi = Some(format!("{:.2} Mpps", record.mpps));
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.general.pkt_sizes = vec![64, 128];
        config.general.duration_secs = 0;
        config
    }

    fn catalog_of(entries: Vec<(&str, TestFactoryFn)>) -> TestCatalog {
        let mut catalog = TestCatalog::new();
        for (name, factory) in entries {
            catalog.register(name, "scripted", factory);
        }
        catalog
    }

    type TestFactoryFn = Box<dyn Fn(&Config) -> TestHandle + Send + Sync>;

    fn ok_test() -> TestFactoryFn {
        Box::new(|_| ScriptedTest::handle(40.0))
    }

    #[tokio::test]
    async fn test_all_tests_complete() {
        let catalog = catalog_of(vec![("a", ok_test()), ("b", ok_test())]);
        let orch = Orchestrator::new(catalog, CancellationToken::new());
        let summary = orch.run(&test_config(), &[], SutInfo::default()).await;

        assert_eq!(summary.outcomes.len(), 2);
        assert!(summary.outcomes.iter().all(|o| !o.is_failure()));
        assert_eq!(summary.outcomes[0].kpi.as_deref(), Some("4.00 Mpps"));
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_test() {
        let failing: TestFactoryFn = Box::new(|_| {
            TestHandle::Throughput(Box::new(ScriptedTest {
                breakpoint: 40.0,
                fail_setup: false,
                fail_probe: true,
                cancel_on_probe: None,
                kpi: None,
            }))
        });
        let catalog = catalog_of(vec![("a", ok_test()), ("b", failing), ("c", ok_test())]);
        let orch = Orchestrator::new(catalog, CancellationToken::new());
        let summary = orch.run(&test_config(), &[], SutInfo::default()).await;

        assert_eq!(summary.outcomes.len(), 3);
        assert!(!summary.outcomes[0].is_failure());
        assert!(matches!(
            summary.outcomes[1].status,
            TestStatus::Failed { .. }
        ));
        assert!(!summary.outcomes[2].is_failure());
    }

    #[tokio::test]
    async fn test_setup_failure_marks_test_failed() {
        let failing: TestFactoryFn = Box::new(|_| {
            TestHandle::Throughput(Box::new(ScriptedTest {
                breakpoint: 40.0,
                fail_setup: true,
                fail_probe: false,
                cancel_on_probe: None,
                kpi: None,
            }))
        });
        let catalog = catalog_of(vec![("a", failing)]);
        let orch = Orchestrator::new(catalog, CancellationToken::new());
        let summary = orch.run(&test_config(), &[], SutInfo::default()).await;

        assert_eq!(summary.outcomes.len(), 1);
        assert!(matches!(
            &summary.outcomes[0].status,
            TestStatus::Failed { error } if error.contains("setup refused")
        ));
    }

    #[tokio::test]
    async fn test_unknown_test_is_skipped_not_fatal() {
        let catalog = catalog_of(vec![("a", ok_test()), ("b", ok_test())]);
        let orch = Orchestrator::new(catalog, CancellationToken::new());
        let requested = vec![
            "a".to_string(),
            "no_such_test".to_string(),
            "b".to_string(),
        ];
        let summary = orch.run(&test_config(), &requested, SutInfo::default()).await;

        assert_eq!(summary.outcomes.len(), 2);
        assert_eq!(summary.outcomes[0].name, "a");
        assert_eq!(summary.outcomes[1].name, "b");
    }

    #[tokio::test]
    async fn test_interrupt_truncates_the_run() {
        let token = CancellationToken::new();
        let probe_token = token.clone();
        let interrupting: TestFactoryFn = Box::new(move |_| {
            TestHandle::Throughput(Box::new(ScriptedTest {
                breakpoint: 40.0,
                fail_setup: false,
                fail_probe: false,
                cancel_on_probe: Some(probe_token.clone()),
                kpi: None,
            }))
        });
        let catalog = catalog_of(vec![
            ("a", ok_test()),
            ("b", interrupting),
            ("c", ok_test()),
        ]);
        let orch = Orchestrator::new(catalog, token);
        let summary = orch.run(&test_config(), &[], SutInfo::default()).await;

        // Tests before the interrupt are fully recorded, the in-flight test
        // becomes the interrupt marker, later tests never run.
        assert_eq!(summary.outcomes.len(), 2);
        assert!(!summary.outcomes[0].is_failure());
        assert_eq!(summary.outcomes[1].status, TestStatus::Interrupted);
    }

    #[tokio::test]
    async fn test_already_cancelled_token_stops_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let catalog = catalog_of(vec![("a", ok_test()), ("b", ok_test())]);
        let orch = Orchestrator::new(catalog, token);
        let summary = orch.run(&test_config(), &[], SutInfo::default()).await;

        assert_eq!(summary.outcomes.len(), 1);
        assert_eq!(summary.outcomes[0].status, TestStatus::Interrupted);
    }

    #[test]
    fn test_resolution_order() {
        let catalog = catalog_of(vec![("b", ok_test()), ("a", ok_test())]);
        let orch = Orchestrator::new(catalog, CancellationToken::new());

        let mut config = test_config();

        // Command line wins, even for names not in the catalog.
        let cli = vec!["x".to_string()];
        assert_eq!(orch.resolve_tests(&cli, &config), vec!["x".to_string()]);

        // Then the configured list.
        config.general.tests = Some(vec!["b".to_string()]);
        assert_eq!(orch.resolve_tests(&[], &config), vec!["b".to_string()]);

        // An explicitly empty configured list counts as absent.
        config.general.tests = Some(vec![]);
        assert_eq!(
            orch.resolve_tests(&[], &config),
            vec!["a".to_string(), "b".to_string()]
        );

        // Defaults to the whole catalog, sorted.
        config.general.tests = None;
        assert_eq!(
            orch.resolve_tests(&[], &config),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_fold_output_single_line() {
        let rows = fold_output("Kernel", "6.5.0 x86_64");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label, "Kernel");
        assert_eq!(rows[0].value, "6.5.0 x86_64");
    }

    #[test]
    fn test_fold_output_counts_repeated_lines() {
        let rows = fold_output("DPDK ports", "0000:01:00.0\n0000:01:00.0\n0000:03:00.1");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, "2x 0000:01:00.0");
        assert_eq!(rows[1].value, "1x 0000:03:00.1");
    }
}
