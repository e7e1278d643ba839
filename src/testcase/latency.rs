//! Latency distribution at full configured load.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::result::LatencyStats;
use crate::testcase::rig::{self, RigSpec, TrafficRig};
use crate::testcase::{LatencyTest, TestCase, TestHandle};

const RIG: RigSpec = RigSpec {
    tester_profile: "lat-gen.cfg",
    tester_args: "-e -t",
    sut_profile: None,
    sut_args: "",
    sut_extra_files: &[],
    gen_cores: &[1],
    ports: &[],
};

const TX_CORE: u32 = 1;
const LAT_CORE: u32 = 2;

/// Round-trip latency measured by a dedicated latency core while a transmit
/// core drives traffic at the declared upper bound.
pub struct LatencyUnderLoad {
    config: Config,
    rig: Option<TrafficRig>,
}

impl LatencyUnderLoad {
    pub fn create(config: &Config) -> TestHandle {
        TestHandle::Latency(Box::new(Self {
            config: config.clone(),
            rig: None,
        }))
    }
}

#[async_trait]
impl TestCase for LatencyUnderLoad {
    fn short_descr(&self) -> &'static str {
        "Latency under load"
    }

    fn long_descr(&self) -> &'static str {
        "Measures the latency distribution observed by a dedicated latency \
         core while traffic is generated at the configured maximum speed, \
         for each packet size."
    }

    fn lower_bound(&self, _pkt_size: u32) -> f64 {
        0.0
    }

    fn upper_bound(&self, _pkt_size: u32) -> f64 {
        100.0
    }

    async fn setup(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.rig = Some(TrafficRig::start(&self.config, &RIG, cancel).await?);
        Ok(())
    }

    async fn teardown(&mut self) -> Result<()> {
        if let Some(rig) = &mut self.rig {
            rig.shutdown().await?;
        }
        self.rig = None;
        Ok(())
    }
}

#[async_trait]
impl LatencyTest for LatencyUnderLoad {
    async fn probe(&mut self, pkt_size: u32, duration: Duration) -> Result<LatencyStats> {
        let speed = self.upper_bound(pkt_size);
        rig::active(&mut self.rig)?
            .latency_probe(pkt_size, duration, speed, TX_CORE, LAT_CORE)
            .await
    }
}
