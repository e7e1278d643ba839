//! Access control list matching.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::result::{ProbeOutcome, ThroughputRecord};
use crate::testcase::rig::{self, RigSpec, TrafficRig};
use crate::testcase::{TestCase, TestHandle, ThroughputTest};

const RIG: RigSpec = RigSpec {
    tester_profile: "gen_acl-4.cfg",
    tester_args: "-e -t",
    sut_profile: Some("handle_acl-4.cfg"),
    sut_args: "-t",
    // Rule set referenced by the SUT profile.
    sut_extra_files: &["acl_rules-2.lua"],
    gen_cores: &[1, 2, 3, 4],
    ports: &[0, 1, 2, 3],
};

/// ACL matching on a 7-tuple: the regular 5-tuple plus two VLAN tags.
pub struct AccessControlList {
    config: Config,
    rig: Option<TrafficRig>,
    kpi: Option<String>,
}

impl AccessControlList {
    pub fn create(config: &Config) -> TestHandle {
        TestHandle::Throughput(Box::new(Self {
            config: config.clone(),
            rig: None,
            kpi: None,
        }))
    }
}

#[async_trait]
impl TestCase for AccessControlList {
    fn short_descr(&self) -> &'static str {
        "ACL (access control list)"
    }

    fn long_descr(&self) -> &'static str {
        "Measures how well the system under test can exploit structure in a \
         list of ACL rules. Rules are matched against a 7-tuple of the input \
         packet: the regular 5-tuple and two VLAN tags. The rules allow the \
         packet to be forwarded and the set contains a default match-all \
         rule.\n\nThe KPI is measured with a rule set of moderate size, \
         moderate similarity between rules and a moderate fraction of rules \
         in use: the number of packets per second for 64 byte packets with \
         an accepted minimal packet loss."
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
impl ThroughputTest for AccessControlList {
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
