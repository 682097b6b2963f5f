//! Checkpoints.
//!
//! A [`Snapshot`] holds every state manager's record. On disk it is wrapped
//! in an envelope carrying a format version and a blake3 checksum of the
//! encoded body, so a truncated or hand-edited file is rejected on load.

use std::path::PathBuf;

use log::info;
use serde::{Deserialize, Serialize};

use crate::sim_bandwidth::LedgerEntry;
use crate::sim_error::{SimError, SimResult};
use crate::sim_failure_detector::Registration;
use crate::sim_interface::{FutureEvent, NodeId, SimTime};
use crate::sim_network::PeerRecord;

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub clock: SimTime,
    pub events: Vec<FutureEvent>,
    pub ledger: Vec<LedgerEntry>,
    pub registrations: Vec<Registration>,
    pub overlay: Vec<NodeId>,
    pub peers: Vec<PeerRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format_version: u32,
    checksum: String,
    body: String,
}

impl Snapshot {
    pub fn encode(&self) -> SimResult<String> {
        let body = serde_yaml::to_string(self)?;
        let envelope = Envelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            checksum: blake3::hash(body.as_bytes()).to_hex().to_string(),
            body,
        };
        Ok(serde_yaml::to_string(&envelope)?)
    }

    pub fn decode(text: &str) -> SimResult<Self> {
        let envelope: Envelope = serde_yaml::from_str(text)?;
        if envelope.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(SimError::CheckpointVersion {
                found: envelope.format_version,
                expected: SNAPSHOT_FORMAT_VERSION,
            });
        }
        let actual = blake3::hash(envelope.body.as_bytes()).to_hex().to_string();
        if actual != envelope.checksum {
            return Err(SimError::CheckpointCorrupted {
                expected: envelope.checksum,
                actual,
            });
        }
        Ok(serde_yaml::from_str(&envelope.body)?)
    }
}

/// Where SAVE_OVERLAY puts snapshots and LOAD_OVERLAY finds them. With a
/// file configured the file wins, so a later run can resume an earlier
/// one; otherwise the last snapshot is kept in memory.
#[derive(Debug, Default)]
pub struct CheckpointStore {
    path: Option<PathBuf>,
    latest: Option<String>,
}

impl CheckpointStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path, latest: None }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn store(&mut self, snapshot: &Snapshot) -> SimResult<()> {
        let encoded = snapshot.encode()?;
        if let Some(path) = &self.path {
            std::fs::write(path, &encoded)?;
            info!("checkpoint written to {}", path.display());
        }
        self.latest = Some(encoded);
        Ok(())
    }

    pub fn fetch(&self) -> SimResult<Snapshot> {
        if let Some(path) = &self.path {
            if path.exists() {
                let text = std::fs::read_to_string(path)?;
                return Snapshot::decode(&text);
            }
        }
        match &self.latest {
            Some(text) => Snapshot::decode(text),
            None => Err(SimError::NoCheckpoint),
        }
    }
}
