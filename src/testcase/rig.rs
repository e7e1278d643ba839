//! Shared probe machinery: the generator sessions a test owns between setup
//! and teardown, and the measurement recipes the concrete tests delegate to.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::error::{BenchError, Result};
use crate::remote::generator::GeneratorHandle;
use crate::remote::RemoteSystem;
use crate::result::{LatencyStats, ProbeOutcome};

/// Traffic settles after a speed change before counters are meaningful.
const WARMUP: Duration = Duration::from_secs(2);

/// The rig a test holds between setup and teardown.
pub fn active(rig: &mut Option<TrafficRig>) -> Result<&mut TrafficRig> {
    rig.as_mut()
        .ok_or_else(|| BenchError::Config("test probed before setup".to_string()))
}

/// Static description of what a test needs started on the peers.
pub struct RigSpec {
    pub tester_profile: &'static str,
    pub tester_args: &'static str,
    /// `None` for tests that only need the tester side.
    pub sut_profile: Option<&'static str>,
    pub sut_args: &'static str,
    /// Extra files shipped to the SUT before its generator starts.
    pub sut_extra_files: &'static [&'static str],
    /// Generator cores driven by the probes.
    pub gen_cores: &'static [u32],
    /// Ports the loss criterion is evaluated over.
    pub ports: &'static [u32],
}

/// The two peer sessions of one test case.
///
/// Exclusively owned by the test instance between setup and teardown.
/// Dropping the rig aborts the generator launches.
pub struct TrafficRig {
    tester: GeneratorHandle,
    sut: Option<GeneratorHandle>,
    tolerated_loss: f64,
    gen_cores: Vec<u32>,
    ports: Vec<u32>,
}

impl TrafficRig {
    pub async fn start(config: &Config, spec: &RigSpec, cancel: &CancellationToken) -> Result<Self> {
        let profiles_dir = &config.general.profiles_dir;

        let tester_sys = RemoteSystem::new("tester", &config.tester);
        let tester = tester_sys
            .start_generator(profiles_dir, spec.tester_profile, spec.tester_args, cancel)
            .await?;

        let sut = match spec.sut_profile {
            Some(profile) => {
                let sut_sys = RemoteSystem::new("sut", &config.sut);
                for file in spec.sut_extra_files {
                    sut_sys.upload_profile(profiles_dir, file).await?;
                }
                Some(
                    sut_sys
                        .start_generator(profiles_dir, profile, spec.sut_args, cancel)
                        .await?,
                )
            }
            None => None,
        };

        Ok(Self {
            tester,
            sut,
            tolerated_loss: config.general.tolerated_loss,
            gen_cores: spec.gen_cores.to_vec(),
            ports: spec.ports.to_vec(),
        })
    }

    /// One throughput measurement: drive traffic at `speed` percent of line
    /// rate for `duration`, pass iff the observed loss stays within the
    /// tolerated fraction of transmitted packets.
    pub async fn throughput_probe(
        &mut self,
        pkt_size: u32,
        duration: Duration,
        speed: f64,
    ) -> Result<ProbeOutcome> {
        let tester = &mut self.tester;
        tester.stop_all().await?;
        tester.reset_stats().await?;
        tester.set_pkt_size(&self.gen_cores, pkt_size).await?;
        tester.set_speed(&self.gen_cores, speed).await?;
        tester.start_all().await?;

        let hz = tester.hz().await?;
        tokio::time::sleep(WARMUP).await;
        let start = tester.total_stats().await?;
        tokio::time::sleep(duration).await;
        // Snapshot before stopping the cores; stopping takes a while and
        // would skew the rate otherwise.
        let stop = tester.total_stats().await?;
        tester.stop_all().await?;

        let ports = tester.port_stats(&self.ports).await?;
        let tolerated = (ports.tx as f64 * self.tolerated_loss / 100.0) as u64;
        let lost = ports.tx.saturating_sub(ports.rx);
        debug!(
            rx = ports.rx,
            tx = ports.tx,
            lost,
            tolerated,
            "loss criterion"
        );

        let tx = stop.tx.saturating_sub(start.tx) as f64;
        let tsc = stop.tsc.saturating_sub(start.tsc) as f64;
        let mpps = if tsc > 0.0 && hz > 0 {
            tx / (tsc / hz as f64) / 1_000_000.0
        } else {
            0.0
        };
        debug!(speed, mpps, "effective throughput");

        Ok(ProbeOutcome {
            success: lost <= tolerated,
            mpps,
        })
    }

    /// One latency measurement: transmit from `tx_core` at `speed` percent
    /// of line rate for `duration`, then read the distribution accumulated
    /// by `lat_core`.
    pub async fn latency_probe(
        &mut self,
        pkt_size: u32,
        duration: Duration,
        speed: f64,
        tx_core: u32,
        lat_core: u32,
    ) -> Result<LatencyStats> {
        let tester = &mut self.tester;
        tester.stop_all().await?;
        tester.reset_stats().await?;
        tester.set_pkt_size(&[tx_core], pkt_size).await?;
        tester.set_speed(&[tx_core], speed).await?;
        tester.start_all().await?;

        tokio::time::sleep(duration).await;
        let stats = tester.lat_stats(&[lat_core]).await?;
        tester.stop_all().await?;

        stats
            .into_iter()
            .next()
            .ok_or_else(|| BenchError::Protocol("no latency stats returned".to_string()))
    }

    /// Quiesce both generators. Sessions close when the rig is dropped.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.tester.stop_all().await?;
        if let Some(sut) = &mut self.sut {
            sut.stop_all().await?;
        }
        Ok(())
    }
}
