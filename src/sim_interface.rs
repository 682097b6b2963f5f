use std::any::Any;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::sim_bandwidth::BandwidthLedger;
use crate::sim_context::SimContext;
use crate::sim_error::{SimError, SimResult};
use crate::sim_network::Network;
use crate::sim_overlay::OverlayNetwork;

// simulated time in ticks
pub type SimTime = u64;

// ============================================================================
// Node identity
// ============================================================================

/// A peer's identity: an integer id plus an integer address. Two NodeIds are
/// equal only when both parts match. The canonical text form is `id@address`,
/// which is also how ids appear in checkpoints and message bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct NodeId {
    pub id: i64,
    pub address: i64,
}

impl NodeId {
    /// Pseudo-address of the dispatcher itself. Never allocated to a peer.
    pub const ENGINE: NodeId = NodeId { id: -7, address: -7 };

    pub const fn new(id: i64, address: i64) -> Self {
        Self { id, address }
    }

    pub fn is_engine(&self) -> bool {
        *self == Self::ENGINE
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

impl FromStr for NodeId {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, address) = s
            .trim()
            .split_once('@')
            .ok_or_else(|| SimError::InvalidNodeId(s.to_string()))?;
        let id = id
            .parse()
            .map_err(|_| SimError::InvalidNodeId(s.to_string()))?;
        let address = address
            .parse()
            .map_err(|_| SimError::InvalidNodeId(s.to_string()))?;
        Ok(NodeId { id, address })
    }
}

impl From<NodeId> for String {
    fn from(n: NodeId) -> String {
        n.to_string()
    }
}

impl TryFrom<String> for NodeId {
    type Error = SimError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ============================================================================
// Events and messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Join,
    Leave,
    Failure,
    Msg,
    SimMsg,
    FailureDetection,
    Periodic,
    Delay,
    SaveOverlay,
    LoadOverlay,
    MonitorOverlay,
    Signal,
}

impl EventKind {
    pub const ALL: [EventKind; 12] = [
        EventKind::Join,
        EventKind::Leave,
        EventKind::Failure,
        EventKind::Msg,
        EventKind::SimMsg,
        EventKind::FailureDetection,
        EventKind::Periodic,
        EventKind::Delay,
        EventKind::SaveOverlay,
        EventKind::LoadOverlay,
        EventKind::MonitorOverlay,
        EventKind::Signal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Join => "JOIN",
            EventKind::Leave => "LEAVE",
            EventKind::Failure => "FAILURE",
            EventKind::Msg => "MSG",
            EventKind::SimMsg => "SIM_MSG",
            EventKind::FailureDetection => "FAILURE_DETECTION",
            EventKind::Periodic => "PERIODIC",
            EventKind::Delay => "DELAY",
            EventKind::SaveOverlay => "SAVE_OVERLAY",
            EventKind::LoadOverlay => "LOAD_OVERLAY",
            EventKind::MonitorOverlay => "MONITOR_OVERLAY",
            EventKind::Signal => "SIGNAL",
        }
    }

    /// Kinds that originate from the scenario. Consuming one of these makes
    /// the scheduler pull the next scenario event.
    pub fn is_scenario_driven(&self) -> bool {
        matches!(
            self,
            EventKind::Join
                | EventKind::Leave
                | EventKind::Failure
                | EventKind::Delay
                | EventKind::SaveOverlay
                | EventKind::LoadOverlay
                | EventKind::MonitorOverlay
                | EventKind::Signal
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        EventKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| SimError::UnknownEventKind(s.to_string()))
    }
}

// control subtypes understood by the dispatcher
pub const START_RECV_DATA: &str = "START_RECV_DATA";
pub const STOP_RECV_DATA: &str = "STOP_RECV_DATA";
pub const LEAVE_GRANTED: &str = "LEAVE_GRANTED";
pub const FAILURE_NOTICE: &str = "NULL";

/// Payload carried by MSG, SIM_MSG and FAILURE_DETECTION events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl Message {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            body: None,
        }
    }

    pub fn with_body(kind: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            body: Some(body.into()),
        }
    }

    // subtypes compare case-insensitively
    pub fn is(&self, kind: &str) -> bool {
        self.kind.eq_ignore_ascii_case(kind)
    }
}

/// One entry of the future event list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FutureEvent {
    pub time: SimTime,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_type: Option<String>,
}

impl FutureEvent {
    /// An event with no payload at all.
    pub fn bare(time: SimTime, kind: EventKind) -> Self {
        Self {
            time,
            kind,
            src: None,
            dest: None,
            message: None,
            signal: None,
            peer_type: None,
            link_type: None,
            monitor_type: None,
        }
    }

    pub fn message(
        time: SimTime,
        kind: EventKind,
        src: NodeId,
        dest: NodeId,
        message: Message,
    ) -> Self {
        Self {
            src: Some(src),
            dest: Some(dest),
            message: Some(message),
            ..Self::bare(time, kind)
        }
    }
}

/// Upload/download rate pair kept per (base, peer) in the bandwidth ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRate {
    pub upload: u64,
    pub download: u64,
}

impl LinkRate {
    pub fn is_idle(&self) -> bool {
        self.upload == 0 && self.download == 0
    }
}

// ============================================================================
// Scenario source
// ============================================================================

/// Logical events produced by a scenario. The scheduler turns them into
/// future events relative to its clock.
#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioEvent {
    Churn {
        kind: EventKind,
        interval: SimTime,
        peer_type: String,
        link_type: String,
    },
    Delay {
        delay: SimTime,
    },
    SaveOverlay {
        delay: SimTime,
    },
    LoadOverlay {
        delay: SimTime,
    },
    Signal {
        interval: SimTime,
        signal: i32,
    },
    Monitor {
        monitor_type: String,
    },
}

pub trait ScenarioSource {
    fn has_next(&mut self) -> bool;
    fn next_event(&mut self) -> Option<ScenarioEvent>;
    /// Roll back the most recent `next_event`, so it will be produced again.
    fn undo(&mut self);
}

// ============================================================================
// Plugin contracts
// ============================================================================

/// User-defined peer behavior. A peer is built by its factory from an id and
/// a link, and is then driven exclusively through these hooks.
pub trait Peer {
    fn id(&self) -> NodeId;
    fn link(&self) -> &dyn Link;

    /// Called instead of `join` for the very first peer of an empty network.
    fn genesis(&mut self, ctx: &mut SimContext<'_>, time: SimTime) -> SimResult<()>;
    fn join(&mut self, ctx: &mut SimContext<'_>, time: SimTime) -> SimResult<()>;
    fn leave(&mut self, ctx: &mut SimContext<'_>, time: SimTime) -> SimResult<()>;
    fn failure(&mut self, ctx: &mut SimContext<'_>, failed: NodeId, time: SimTime)
        -> SimResult<()>;
    fn receive(
        &mut self,
        ctx: &mut SimContext<'_>,
        src: NodeId,
        msg: &Message,
        time: SimTime,
    ) -> SimResult<()>;
    fn signal(&mut self, ctx: &mut SimContext<'_>, signal: i32, time: SimTime) -> SimResult<()>;

    /// Invoked before every step when sync mode is on.
    fn sync_tick(&mut self, _ctx: &mut SimContext<'_>, _time: SimTime) -> SimResult<()> {
        Ok(())
    }

    fn save_local_state(&self) -> SimResult<String>;
    fn restore_local_state(&mut self, state: &str) -> SimResult<()>;

    fn as_any(&self) -> &dyn Any;
}

/// How a peer reaches other peers. Implementations compute the delivery
/// delay and enqueue the message through the context.
pub trait Link {
    fn id(&self) -> NodeId;
    fn latency(&self) -> SimTime;
    fn send(&self, ctx: &mut SimContext<'_>, dest: NodeId, msg: Message);

    fn loopback(&self, ctx: &mut SimContext<'_>, msg: Message, delay: SimTime) {
        ctx.add_event(delay, self.id(), self.id(), EventKind::Msg, msg);
    }

    fn send_to_engine(&self, ctx: &mut SimContext<'_>, msg: Message) {
        ctx.add_event(0, self.id(), NodeId::ENGINE, EventKind::SimMsg, msg);
    }
}

/// Read-only view handed to monitors.
pub struct MonitorView<'a> {
    pub network: &'a Network,
    pub overlay: &'a OverlayNetwork,
    pub ledger: &'a BandwidthLedger,
}

impl<'a> MonitorView<'a> {
    pub fn new(
        network: &'a Network,
        overlay: &'a OverlayNetwork,
        ledger: &'a BandwidthLedger,
    ) -> Self {
        Self {
            network,
            overlay,
            ledger,
        }
    }
}

pub trait Monitor {
    fn init(&mut self, _view: &MonitorView<'_>, _time: SimTime) {}
    fn update(&mut self, view: &MonitorView<'_>, time: SimTime);
    fn snapshot(&mut self, view: &MonitorView<'_>, time: SimTime);
    fn verify(&mut self, view: &MonitorView<'_>, time: SimTime);
    fn as_any(&self) -> &dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_text_form() {
        let n = NodeId::new(42, 1007);
        assert_eq!(n.to_string(), "42@1007");
        assert_eq!("42@1007".parse::<NodeId>().unwrap(), n);
        assert_eq!(" -7@-7 ".parse::<NodeId>().unwrap(), NodeId::ENGINE);
    }

    #[test]
    fn test_node_id_rejects_garbage() {
        assert!("42".parse::<NodeId>().is_err());
        assert!("a@1".parse::<NodeId>().is_err());
        assert!("1@".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_node_id_equality_needs_both_parts() {
        assert_ne!(NodeId::new(1, 2), NodeId::new(1, 3));
        assert_ne!(NodeId::new(1, 2), NodeId::new(2, 2));
    }

    #[test]
    fn test_event_kind_parse_is_case_insensitive() {
        assert_eq!("join".parse::<EventKind>().unwrap(), EventKind::Join);
        assert_eq!(
            "Failure_Detection".parse::<EventKind>().unwrap(),
            EventKind::FailureDetection
        );
        assert!("REBOOT".parse::<EventKind>().is_err());
        for k in EventKind::ALL {
            assert_eq!(k.as_str().parse::<EventKind>().unwrap(), k);
        }
    }

    #[test]
    fn test_scenario_driven_kinds() {
        assert!(EventKind::Join.is_scenario_driven());
        assert!(EventKind::Signal.is_scenario_driven());
        assert!(!EventKind::Msg.is_scenario_driven());
        assert!(!EventKind::SimMsg.is_scenario_driven());
        assert!(!EventKind::FailureDetection.is_scenario_driven());
        assert!(!EventKind::Periodic.is_scenario_driven());
    }

    #[test]
    fn test_message_subtype_match() {
        let m = Message::new("start_recv_data");
        assert!(m.is(START_RECV_DATA));
        assert!(!m.is(STOP_RECV_DATA));
    }

    #[test]
    fn test_future_event_yaml_uses_canonical_ids() {
        let ev = FutureEvent::message(
            5,
            EventKind::Msg,
            NodeId::new(1, 2),
            NodeId::new(3, 4),
            Message::with_body("HELLO", "hi"),
        );
        let text = serde_yaml::to_string(&ev).unwrap();
        assert!(text.contains("1@2"));
        assert!(text.contains("MSG"));
        let back: FutureEvent = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, ev);
    }
}
