//! Run configuration: TOML file + command-line overrides.
//!
//! The configuration is loaded once at startup and passed by reference into
//! the orchestrator and test factories; nothing mutates it after load.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub general: General,
    pub tester: PeerConfig,
    pub sut: PeerConfig,
}

/// `[general]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct General {
    /// Packet sizes to sweep, in the order they will be probed.
    pub pkt_sizes: Vec<u32>,
    /// Test names to run when none are given on the command line.
    pub tests: Option<Vec<String>>,
    /// Packet loss tolerated by the throughput pass/fail criterion, percent.
    pub tolerated_loss: f64,
    /// Observation window of a single probe, seconds.
    pub duration_secs: u64,
    /// Convergence precision of the throughput search, percent of line rate.
    pub precision: f64,
    /// Directory holding the generator profiles shipped to the peers.
    pub profiles_dir: PathBuf,
}

impl Default for General {
    fn default() -> Self {
        Self {
            pkt_sizes: vec![64, 128, 256, 512, 1024, 1280, 1518],
            tests: None,
            tolerated_loss: 0.0,
            duration_secs: 5,
            precision: 1.0,
            profiles_dir: PathBuf::from("profiles"),
        }
    }
}

/// One remote peer (`[tester]` or `[sut]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub host: String,
    pub user: String,
    /// Directory on the peer containing the traffic generator build.
    pub generator_dir: String,
    /// Generator binary, relative to `generator_dir`.
    pub generator_bin: String,
    /// TCP port of the generator's control endpoint.
    pub control_port: u16,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: "root".to_string(),
            generator_dir: "/root/prox".to_string(),
            generator_bin: "./build/prox".to_string(),
            control_port: 8474,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("could not parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Reject configurations that cannot drive a run.
    pub fn validate(&self) -> Result<()> {
        if self.tester.host.is_empty() {
            return Err(BenchError::Config("tester.host is not set".to_string()));
        }
        if self.sut.host.is_empty() {
            return Err(BenchError::Config("sut.host is not set".to_string()));
        }
        if self.general.pkt_sizes.is_empty() {
            return Err(BenchError::Config("general.pkt_sizes is empty".to_string()));
        }
        if self.general.precision <= 0.0 {
            return Err(BenchError::Config(format!(
                "general.precision must be positive, got {}",
                self.general.precision
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(
            config.general.pkt_sizes,
            vec![64, 128, 256, 512, 1024, 1280, 1518]
        );
        assert_eq!(config.general.tolerated_loss, 0.0);
        assert_eq!(config.general.duration_secs, 5);
        assert_eq!(config.general.precision, 1.0);
        assert_eq!(config.tester.user, "root");
        assert_eq!(config.tester.control_port, 8474);
        assert!(config.general.tests.is_none());
    }

    #[test]
    fn test_parse_full_file() {
        let raw = r#"
            [general]
            pkt_sizes = [64, 128]
            tests = ["pkt_touch", "acl"]
            tolerated_loss = 0.001
            duration_secs = 10
            precision = 0.5

            [tester]
            host = "10.0.0.1"
            user = "perf"

            [sut]
            host = "10.0.0.2"
            control_port = 9000
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.general.pkt_sizes, vec![64, 128]);
        assert_eq!(
            config.general.tests,
            Some(vec!["pkt_touch".to_string(), "acl".to_string()])
        );
        assert_eq!(config.general.tolerated_loss, 0.001);
        assert_eq!(config.tester.host, "10.0.0.1");
        assert_eq!(config.tester.user, "perf");
        // Unset keys fall back to section defaults.
        assert_eq!(config.sut.user, "root");
        assert_eq!(config.sut.control_port, 9000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_hosts() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tester.host"));
    }

    #[test]
    fn test_validate_rejects_bad_precision() {
        let mut config = Config::default();
        config.tester.host = "a".to_string();
        config.sut.host = "b".to_string();
        config.general.precision = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("precision"));
    }

    #[test]
    fn test_pkt_sizes_preserve_order() {
        let raw = r#"
            [general]
            pkt_sizes = [1518, 64, 256]
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.general.pkt_sizes, vec![1518, 64, 256]);
    }
}
