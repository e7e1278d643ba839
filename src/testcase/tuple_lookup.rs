//! 5-tuple based lookup and decision.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::result::{ProbeOutcome, ThroughputRecord};
use crate::testcase::rig::{self, RigSpec, TrafficRig};
use crate::testcase::{TestCase, TestHandle, ThroughputTest};

const RIG: RigSpec = RigSpec {
    tester_profile: "gen_5tuplookup-4.cfg",
    tester_args: "-e -t",
    sut_profile: Some("handle_5tuplookup-4.cfg"),
    sut_args: "-t",
    sut_extra_files: &[],
    gen_cores: &[1, 2, 3, 4],
    ports: &[0, 1, 2, 3],
};

/// Load distribution by a hash-table lookup on the conventional 5-tuple.
pub struct FiveTupleLookup {
    config: Config,
    rig: Option<TrafficRig>,
    kpi: Option<String>,
}

impl FiveTupleLookup {
    pub fn create(config: &Config) -> TestHandle {
        TestHandle::Throughput(Box::new(Self {
            config: config.clone(),
            rig: None,
            kpi: None,
        }))
    }
}

#[async_trait]
impl TestCase for FiveTupleLookup {
    fn short_descr(&self) -> &'static str {
        "5-tuple based lookup and decision"
    }

    fn long_descr(&self) -> &'static str {
        "This use-case encompasses building blocks of more complex \
         applications: load distribution, routing, policing. A general and \
         resource demanding way to formulate these is a lookup based on a \
         sufficiently long key extracted from the packet; the conventional \
         5-tuple requires some extraction steps and allows defining enough \
         distinct values to find the performance limits.\n\nThe load is \
         balanced uniformly towards the output ports using a hash table of \
         8M entries. Packets can be reordered.\n\nThe KPI is the number of \
         packets per second for 64 byte packets with an accepted minimal \
         packet loss."
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
impl ThroughputTest for FiveTupleLookup {
    async fn probe(
        &mut self,
        pkt_size: u32,
        duration: Duration,
        speed: f64,
    ) -> Result<ProbeOutcome> {
        rig::active(&mut self.rig)?
            .throughput_probe(pkt_size, duration, speed)
            .await
    }

    fn update_kpi(&mut self, record: &ThroughputRecord) {
        if record.pkt_size != 64 {
            return;
        }
        self.kpi = Some(format!("{:.2} Mpps", record.mpps));
    }
}
