//! The capability contract every concrete test implements, and the registry
//! the orchestrator discovers tests from.
//!
//! Tests come in two variants: throughput tests drive a bisection search
//! over a pass/fail probe, latency tests probe each packet size once at the
//! declared upper bound. The orchestrator depends only on these traits.

pub mod rig;

mod acl;
mod forward;
mod latency;
mod tuple_lookup;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::result::{LatencyStats, ProbeOutcome, ThroughputRecord};

/// Capabilities common to both test variants.
#[async_trait]
pub trait TestCase: Send {
    fn short_descr(&self) -> &'static str;

    fn long_descr(&self) -> &'static str;

    /// Lower bound of the search interval for this packet size. Assumed to
    /// always pass. Pure: repeated calls return the same value.
    fn lower_bound(&self, pkt_size: u32) -> f64;

    /// Upper bound of the search interval for this packet size. Probed
    /// first; not assumed to fail.
    fn upper_bound(&self, pkt_size: u32) -> f64;

    /// Minimum packet size the test can generate. Swept sizes below this
    /// are bumped upward by the sweep driver.
    fn min_pkt_size(&self) -> u32 {
        64
    }

    /// Headline figure for the summary row, set during the sweep.
    fn kpi(&self) -> Option<String> {
        None
    }

    /// Acquire the remote peer sessions. Called once, before the sweep.
    async fn setup(&mut self, cancel: &CancellationToken) -> Result<()>;

    /// Release the remote peer sessions. Skipped when the sweep errors; the
    /// next test's generator launch kills what was left behind.
    async fn teardown(&mut self) -> Result<()>;
}

/// Bisection variant: the probe reports pass/fail against the loss
/// criterion plus the achieved throughput.
#[async_trait]
pub trait ThroughputTest: TestCase {
    /// One measurement at a fixed packet size and transmit speed. The only
    /// operation allowed to talk to the peers inside the search loop; safe
    /// to call repeatedly at decreasing interval widths.
    async fn probe(&mut self, pkt_size: u32, duration: Duration, speed: f64)
        -> Result<ProbeOutcome>;

    /// Offered each record as the sweep produces it; the last call matching
    /// the test's predicate wins.
    fn update_kpi(&mut self, record: &ThroughputRecord) {
        let _ = record;
    }
}

/// Direct-sweep variant: one probe per packet size, no pass/fail concept.
#[async_trait]
pub trait LatencyTest: TestCase {
    async fn probe(&mut self, pkt_size: u32, duration: Duration) -> Result<LatencyStats>;
}

/// A concrete test behind one of the two variant traits.
pub enum TestHandle {
    Throughput(Box<dyn ThroughputTest>),
    Latency(Box<dyn LatencyTest>),
}

impl TestHandle {
    pub fn short_descr(&self) -> &'static str {
        match self {
            TestHandle::Throughput(t) => t.short_descr(),
            TestHandle::Latency(t) => t.short_descr(),
        }
    }

    pub fn long_descr(&self) -> &'static str {
        match self {
            TestHandle::Throughput(t) => t.long_descr(),
            TestHandle::Latency(t) => t.long_descr(),
        }
    }

    pub fn kpi(&self) -> Option<String> {
        match self {
            TestHandle::Throughput(t) => t.kpi(),
            TestHandle::Latency(t) => t.kpi(),
        }
    }

    pub async fn setup(&mut self, cancel: &CancellationToken) -> Result<()> {
        match self {
            TestHandle::Throughput(t) => t.setup(cancel).await,
            TestHandle::Latency(t) => t.setup(cancel).await,
        }
    }

    pub async fn teardown(&mut self) -> Result<()> {
        match self {
            TestHandle::Throughput(t) => t.teardown().await,
            TestHandle::Latency(t) => t.teardown().await,
        }
    }
}

pub type TestFactory = Box<dyn Fn(&Config) -> TestHandle + Send + Sync>;

pub struct TestEntry {
    pub summary: &'static str,
    pub factory: TestFactory,
}

/// Name -> test definition mapping, built once per run and immutable after.
#[derive(Default)]
pub struct TestCatalog {
    entries: BTreeMap<String, TestEntry>,
}

impl TestCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named factory. A duplicate name replaces the earlier
    /// entry; the last registration wins.
    pub fn register<F>(&mut self, name: &str, summary: &'static str, factory: F)
    where
        F: Fn(&Config) -> TestHandle + Send + Sync + 'static,
    {
        self.entries.insert(
            name.to_string(),
            TestEntry {
                summary,
                factory: Box::new(factory),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&TestEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TestEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The tests shipped with the harness.
pub fn builtin() -> TestCatalog {
    let mut catalog = TestCatalog::new();
    catalog.register(
        "pkt_touch",
        "Port forwarding with MAC rewrite",
        forward::PacketTouch::create,
    );
    catalog.register(
        "5tuple_lookup",
        "5-tuple based lookup and load balancing",
        tuple_lookup::FiveTupleLookup::create,
    );
    catalog.register(
        "acl",
        "Access control list matching",
        acl::AccessControlList::create,
    );
    catalog.register(
        "latency",
        "Latency distribution under full load",
        latency::LatencyUnderLoad::create,
    );
    catalog
}
