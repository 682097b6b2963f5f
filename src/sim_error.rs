//! Error type shared by every simulator component.
//!
//! Fatal problems (a malformed config or scenario, an unreadable checkpoint)
//! surface as `Err` from loaders and constructors. Problems raised inside a
//! plugin hook are returned to the dispatcher, which logs them and carries on.

use thiserror::Error;

use crate::sim_interface::NodeId;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("unknown event type `{0}`")]
    UnknownEventKind(String),

    #[error("malformed node id `{0}` (expected `id@address`)")]
    InvalidNodeId(String),

    #[error("no peer implementation registered as `{0}`")]
    UnknownPeerType(String),

    #[error("no link implementation registered as `{0}`")]
    UnknownLinkType(String),

    #[error("no monitor implementation registered as `{0}`")]
    UnknownMonitorType(String),

    #[error("identifier space exhausted: all {size} ids are in use")]
    IdSpaceExhausted { size: u64 },

    #[error("no checkpoint has been saved")]
    NoCheckpoint,

    #[error("checkpoint format version {found} is not supported (expected {expected})")]
    CheckpointVersion { found: u32, expected: u32 },

    #[error("checkpoint checksum mismatch: expected {expected}, got {actual}")]
    CheckpointCorrupted { expected: String, actual: String },

    #[error("peer {peer}: cannot restore local state: {reason}")]
    PeerState { peer: NodeId, reason: String },

    #[error("peer {peer}: {reason}")]
    Plugin { peer: NodeId, reason: String },
}

pub type SimResult<T> = Result<T, SimError>;
