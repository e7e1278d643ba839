//! Packet-size sweep: runs the search (or the single latency probe) once
//! per configured packet size and assembles the per-size records.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::result::{LatencyRecord, SweepResults, ThroughputRecord};
use crate::search::SearchEngine;
use crate::testcase::{LatencyTest, TestHandle, ThroughputTest};

/// Sizes below the test's minimum are bumped upward by the distance of that
/// minimum from the 64 B floor.
pub fn effective_pkt_size(requested: u32, min_pkt_size: u32) -> u32 {
    if requested < min_pkt_size {
        (requested as i64 + min_pkt_size as i64 - 64) as u32
    } else {
        requested
    }
}

/// Run the sweep appropriate for the test variant.
pub async fn run(test: &mut TestHandle, config: &Config) -> Result<SweepResults> {
    match test {
        TestHandle::Throughput(t) => Ok(SweepResults::Throughput(
            throughput_sweep(t.as_mut(), config).await?,
        )),
        TestHandle::Latency(t) => Ok(SweepResults::Latency(
            latency_sweep(t.as_mut(), config).await?,
        )),
    }
}

/// Bisection per packet size. A probe error fails the whole test case; no
/// per-size partial success.
pub async fn throughput_sweep(
    test: &mut dyn ThroughputTest,
    config: &Config,
) -> Result<Vec<ThroughputRecord>> {
    let duration = Duration::from_secs(config.general.duration_secs);
    let mut records = Vec::with_capacity(config.general.pkt_sizes.len());

    for &requested in &config.general.pkt_sizes {
        let pkt_size = effective_pkt_size(requested, test.min_pkt_size());
        info!(pkt_size, "testing packet size");

        let started = Instant::now();
        let mut search = SearchEngine::new(
            test.lower_bound(pkt_size),
            test.upper_bound(pkt_size),
            config.general.precision,
        );
        while let Some(speed) = search.next_value() {
            let (lower, upper) = search.interval();
            debug!(lower, upper, speed, "probing");
            let outcome = test.probe(pkt_size, duration, speed).await?;
            search.record(outcome);
        }
        let found = search.finish();

        let record = ThroughputRecord {
            pkt_size,
            lower_bound: found.lower_bound,
            upper_bound: found.upper_bound,
            mpps: found.measurement,
            duration_secs: started.elapsed().as_secs_f64(),
        };
        info!(
            pkt_size,
            mpps = record.mpps,
            probes = found.probes,
            "converged"
        );
        test.update_kpi(&record);
        records.push(record);
    }

    Ok(records)
}

/// One probe per packet size at the declared upper bound.
pub async fn latency_sweep(
    test: &mut dyn LatencyTest,
    config: &Config,
) -> Result<Vec<LatencyRecord>> {
    let duration = Duration::from_secs(config.general.duration_secs);
    let mut records = Vec::with_capacity(config.general.pkt_sizes.len());

    for &requested in &config.general.pkt_sizes {
        let pkt_size = effective_pkt_size(requested, test.min_pkt_size());
        info!(pkt_size, "testing packet size");

        let stats = test.probe(pkt_size, duration).await?;
        records.push(LatencyRecord {
            pkt_size,
            lower_bound: test.lower_bound(pkt_size),
            upper_bound: test.upper_bound(pkt_size),
            min_ns: stats.min_ns,
            max_ns: stats.max_ns,
            avg_ns: stats.avg_ns,
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BenchError;
    use crate::result::{LatencyStats, ProbeOutcome};
    use crate::testcase::TestCase;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct MockThroughput {
        min_pkt_size: u32,
        /// Highest passing speed as a function of packet size.
        breakpoint: fn(u32) -> f64,
        /// Packet size whose probes fail with a transport error, if any.
        poison: Option<u32>,
        probed_sizes: Vec<u32>,
        kpi: Option<String>,
    }

    impl MockThroughput {
        fn new(breakpoint: fn(u32) -> f64) -> Self {
            Self {
                min_pkt_size: 64,
                breakpoint,
                poison: None,
                probed_sizes: Vec::new(),
                kpi: None,
            }
        }
    }

    #[async_trait]
    impl TestCase for MockThroughput {
        fn short_descr(&self) -> &'static str {
            "mock"
        }
        fn long_descr(&self) -> &'static str {
            "mock"
        }
        fn lower_bound(&self, _pkt_size: u32) -> f64 {
            0.0
        }
        fn upper_bound(&self, _pkt_size: u32) -> f64 {
            100.0
        }
        fn min_pkt_size(&self) -> u32 {
            self.min_pkt_size
        }
        fn kpi(&self) -> Option<String> {
            self.kpi.clone()
        }
        async fn setup(&mut self, _cancel: &CancellationToken) -> crate::error::Result<()> {
            Ok(())
        }
        async fn teardown(&mut self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl ThroughputTest for MockThroughput {
        async fn probe(
            &mut self,
            pkt_size: u32,
            _duration: Duration,
            speed: f64,
        ) -> crate::error::Result<ProbeOutcome> {
            if self.poison == Some(pkt_size) {
                return Err(BenchError::Transport {
                    peer: "tester".to_string(),
                    detail: "mock failure".to_string(),
                });
            }
            self.probed_sizes.push(pkt_size);
            let limit = (self.breakpoint)(pkt_size);
            Ok(ProbeOutcome {
                success: speed <= limit,
                mpps: speed / 10.0,
            })
        }

        fn update_kpi(&mut self, record: &ThroughputRecord) {
            if record.pkt_size > 128 {
                return;
            }
            self.kpi = Some(format!("{:.2} Mpps", record.mpps));
        }
    }

    fn test_config(pkt_sizes: &[u32]) -> Config {
        let mut config = Config::default();
        config.general.pkt_sizes = pkt_sizes.to_vec();
        config.general.duration_secs = 0;
        config
    }

    #[test]
    fn test_effective_pkt_size_law() {
        // Below the minimum: bumped by (min - 64).
        assert_eq!(effective_pkt_size(64, 128), 128);
        assert_eq!(effective_pkt_size(100, 128), 164);
        // At or above: unchanged.
        assert_eq!(effective_pkt_size(128, 128), 128);
        assert_eq!(effective_pkt_size(1518, 64), 1518);
        assert_eq!(effective_pkt_size(64, 64), 64);
    }

    #[tokio::test]
    async fn test_records_follow_input_order() {
        let mut test = MockThroughput::new(|pkt| if pkt == 64 { 37.0 } else { 80.0 });
        let config = test_config(&[1518, 64, 256]);
        let records = throughput_sweep(&mut test, &config).await.unwrap();

        let sizes: Vec<u32> = records.iter().map(|r| r.pkt_size).collect();
        assert_eq!(sizes, vec![1518, 64, 256]);
        assert_eq!(records[0].mpps, 8.0);
        assert_eq!(records[1].mpps, 3.7);
        for record in &records {
            assert_eq!(record.lower_bound, 0.0);
            assert_eq!(record.upper_bound, 100.0);
        }
    }

    #[tokio::test]
    async fn test_small_sizes_adjusted_upward() {
        let mut test = MockThroughput::new(|_| 50.0);
        test.min_pkt_size = 128;
        let config = test_config(&[64, 128, 256]);
        let records = throughput_sweep(&mut test, &config).await.unwrap();

        assert_eq!(records[0].pkt_size, 128);
        assert_eq!(records[1].pkt_size, 128);
        assert_eq!(records[2].pkt_size, 256);
        assert!(test.probed_sizes.iter().all(|&s| s >= 128));
    }

    #[tokio::test]
    async fn test_kpi_last_match_wins() {
        // Predicate matches 64 and 128; the 128-record is produced later
        // and overwrites the 64 B figure.
        let mut test =
            MockThroughput::new(|pkt| if pkt == 64 { 37.0 } else { 60.0 });
        let config = test_config(&[64, 128, 1518]);
        throughput_sweep(&mut test, &config).await.unwrap();
        assert_eq!(test.kpi.as_deref(), Some("6.00 Mpps"));
    }

    #[tokio::test]
    async fn test_probe_error_fails_whole_sweep() {
        let mut test = MockThroughput::new(|_| 50.0);
        test.poison = Some(256);
        let config = test_config(&[64, 256, 1518]);
        let err = throughput_sweep(&mut test, &config).await.unwrap_err();
        assert!(matches!(err, BenchError::Transport { .. }));
        // The 1518 B size was never reached.
        assert!(!test.probed_sizes.contains(&1518));
    }

    struct MockLatency {
        probed: Vec<u32>,
    }

    #[async_trait]
    impl TestCase for MockLatency {
        fn short_descr(&self) -> &'static str {
            "mock-lat"
        }
        fn long_descr(&self) -> &'static str {
            "mock-lat"
        }
        fn lower_bound(&self, _pkt_size: u32) -> f64 {
            0.0
        }
        fn upper_bound(&self, _pkt_size: u32) -> f64 {
            100.0
        }
        async fn setup(&mut self, _cancel: &CancellationToken) -> crate::error::Result<()> {
            Ok(())
        }
        async fn teardown(&mut self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl LatencyTest for MockLatency {
        async fn probe(
            &mut self,
            pkt_size: u32,
            _duration: Duration,
        ) -> crate::error::Result<LatencyStats> {
            self.probed.push(pkt_size);
            Ok(LatencyStats {
                min_ns: 100.0,
                max_ns: 900.0,
                avg_ns: 250.0,
            })
        }
    }

    #[tokio::test]
    async fn test_latency_sweep_probes_each_size_once() {
        let mut test = MockLatency { probed: Vec::new() };
        let config = test_config(&[64, 128]);
        let records = latency_sweep(&mut test, &config).await.unwrap();

        assert_eq!(test.probed, vec![64, 128]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].pkt_size, 64);
        assert_eq!(records[0].avg_ns, 250.0);
        assert_eq!(records[0].lower_bound, 0.0);
        assert_eq!(records[0].upper_bound, 100.0);
    }
}
