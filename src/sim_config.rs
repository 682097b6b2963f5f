use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::sim_error::{SimError, SimResult};
use crate::sim_interface::SimTime;

/// What the identifier allocator does once every id in `[0, max_node)` has
/// been handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdExhaustion {
    /// Refuse further allocations.
    #[default]
    Fail,
    /// Ids of removed peers go back to the pool.
    Recycle,
}

/// Run configuration. Built once, owned by the engine, and handed by
/// reference to whatever needs it. Every field has a default so a YAML file
/// only needs to list what it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    // ===== Run =====
    /// Horizon: events scheduled after this time end the run (default: 10000)
    pub sim_time: SimTime,

    /// Scenario file, resolved relative to the config file (default: none)
    pub scenario_file: Option<PathBuf>,

    /// Master seed every random stream is derived from (default: 12345)
    pub seed: u64,

    /// Call every peer's sync hook before each step (default: false)
    pub sync_update: bool,

    // ===== Identifier space =====
    /// Size of the id space; ids and addresses are drawn from [0, max_node) (default: 10000)
    pub max_node: u64,

    /// Skew id allocation into clusters (default: false)
    pub skewed: bool,

    /// Number of clusters when skewed (default: 1)
    pub num_of_cluster: u32,

    /// Probability of landing in a cluster's dense band when skewed (default: 0.8)
    pub prob_of_cluster: f64,

    pub id_exhaustion: IdExhaustion,

    // ===== Latency =====
    /// Mean core-network latency between two peers (default: 10)
    pub network_latency: u64,

    /// Upper bound of the uniform drift added to the core latency (default: 5)
    pub network_latency_drift: u64,

    /// Upper bound of the uniform per-peer link latency (default: 5)
    pub link_latency: u64,

    /// Base failure detection delay L; notifications land in [L, 2L) (default: 50)
    pub failure_detector_latency: u64,

    /// Delay used when sending to a peer that is no longer registered (default: 1000)
    pub failure_detector_max_time: u64,

    // ===== Bandwidth =====
    /// Rate of one stripe (default: 50)
    pub stripe_rate: u64,

    /// Stripes a peer can download at once (default: 4)
    pub num_of_stripes: u64,

    // ===== Monitoring and output =====
    /// Enable monitor update/snapshot calls (default: false)
    pub monitor: bool,

    /// Distinct clock values between monitor snapshots; 0 disables (default: 100)
    pub snapshot_period: u64,

    /// Where SAVE_OVERLAY writes and LOAD_OVERLAY reads; in-memory when unset
    pub checkpoint_file: Option<PathBuf>,

    /// Network-size trace output; not written when unset
    pub net_size_file: Option<PathBuf>,

    /// Log level for the runner binaries (default: "info")
    pub log_level: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            sim_time: 10_000,
            scenario_file: None,
            seed: 12345,
            sync_update: false,

            max_node: 10_000,
            skewed: false,
            num_of_cluster: 1,
            prob_of_cluster: 0.8,
            id_exhaustion: IdExhaustion::Fail,

            network_latency: 10,
            network_latency_drift: 5,
            link_latency: 5,
            failure_detector_latency: 50,
            failure_detector_max_time: 1000,

            stripe_rate: 50,
            num_of_stripes: 4,

            monitor: false,
            snapshot_period: 100,
            checkpoint_file: None,
            net_size_file: None,
            log_level: "info".to_string(),
        }
    }
}

impl SimConfig {
    pub fn from_yaml_str(text: &str) -> SimResult<Self> {
        let config: SimConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file. Relative paths inside the config are resolved
    /// against the file's directory.
    pub fn from_file(path: &Path) -> SimResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&text)?;
        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, dir: &Path) {
        for p in [
            &mut self.scenario_file,
            &mut self.checkpoint_file,
            &mut self.net_size_file,
        ]
        .into_iter()
        .flatten()
        {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        }
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.max_node == 0 {
            return Err(SimError::InvalidConfig("max_node must be positive".into()));
        }
        if self.max_node > i64::MAX as u64 {
            return Err(SimError::InvalidConfig("max_node does not fit a node id".into()));
        }
        if self.skewed {
            if self.num_of_cluster == 0 {
                return Err(SimError::InvalidConfig(
                    "num_of_cluster must be positive when skewed".into(),
                ));
            }
            if u64::from(self.num_of_cluster) * 2 > self.max_node {
                return Err(SimError::InvalidConfig(format!(
                    "{} clusters need at least {} ids, max_node is {}",
                    self.num_of_cluster,
                    u64::from(self.num_of_cluster) * 2,
                    self.max_node
                )));
            }
            if !(0.0..=1.0).contains(&self.prob_of_cluster) {
                return Err(SimError::InvalidConfig(
                    "prob_of_cluster must be within [0, 1]".into(),
                ));
            }
        }
        if self.log_level.parse::<log::LevelFilter>().is_err() {
            return Err(SimError::InvalidConfig(format!(
                "unknown log level `{}`",
                self.log_level
            )));
        }
        Ok(())
    }

    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let c = SimConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.failure_detector_max_time, 1000);
        assert_eq!(c.id_exhaustion, IdExhaustion::Fail);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let c = SimConfig::from_yaml_str(
            "sim_time: 500\nseed: 7\nid_exhaustion: recycle\nlog_level: debug\n",
        )
        .unwrap();
        assert_eq!(c.sim_time, 500);
        assert_eq!(c.seed, 7);
        assert_eq!(c.id_exhaustion, IdExhaustion::Recycle);
        assert_eq!(c.stripe_rate, 50);
        assert_eq!(c.level_filter(), log::LevelFilter::Debug);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(SimConfig::from_yaml_str("max_node: 0\n").is_err());
        assert!(SimConfig::from_yaml_str("log_level: chatty\n").is_err());
        assert!(SimConfig::from_yaml_str(
            "skewed: true\nnum_of_cluster: 10\nmax_node: 8\n"
        )
        .is_err());
        assert!(SimConfig::from_yaml_str("sim_time: soon\n").is_err());
    }

    #[test]
    fn test_from_file_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        std::fs::write(
            &path,
            "scenario_file: scenarios/hello.yaml\ncheckpoint_file: /tmp/abs.yaml\n",
        )
        .unwrap();

        let c = SimConfig::from_file(&path).unwrap();
        assert_eq!(
            c.scenario_file.unwrap(),
            dir.path().join("scenarios/hello.yaml")
        );
        assert_eq!(c.checkpoint_file.unwrap(), PathBuf::from("/tmp/abs.yaml"));
    }
}
