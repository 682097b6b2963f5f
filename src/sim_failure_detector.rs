use indexmap::{IndexMap, IndexSet};
use log::debug;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::sim_fel::Fel;
use crate::sim_interface::{EventKind, FutureEvent, Message, NodeId, SimTime, FAILURE_NOTICE};
use crate::sim_network::Network;
use crate::sim_random::{dist, RngService, RngStream};

/// Who watches `watched`, as checkpointed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub watched: NodeId,
    pub watchers: Vec<NodeId>,
}

/// Watch registrations and delayed failure notifications.
///
/// A notification for a failure at time `T` lands in `[T + L, T + 2L)`.
pub struct FailureDetector {
    watchers: IndexMap<NodeId, IndexSet<NodeId>>,
    latency: u64,
    rng: StdRng,
}

impl FailureDetector {
    pub fn new(latency: u64, rngs: &RngService) -> Self {
        Self {
            watchers: IndexMap::new(),
            latency,
            rng: rngs.stream(RngStream::FailureDetection),
        }
    }

    pub fn latency(&self) -> u64 {
        self.latency
    }

    /// `watcher` wants to hear about `watched` failing. If `watched` is
    /// already gone the notification is scheduled right away.
    pub fn register(
        &mut self,
        watched: NodeId,
        watcher: NodeId,
        network: &Network,
        fel: &mut Fel,
        now: SimTime,
    ) {
        if !network.contains(watched) {
            debug!("fd: {} watches absent {}, notifying now", watcher, watched);
            let delay = self.detection_delay();
            fel.push(notice(now + delay, watched, watcher));
            return;
        }
        self.watchers.entry(watched).or_default().insert(watcher);
    }

    pub fn unregister(&mut self, watched: NodeId, watcher: NodeId) {
        if let Some(set) = self.watchers.get_mut(&watched) {
            set.shift_remove(&watcher);
            if set.is_empty() {
                self.watchers.shift_remove(&watched);
            }
        }
    }

    pub fn watchers_of(&self, watched: NodeId) -> Vec<NodeId> {
        self.watchers
            .get(&watched)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_watched(&self, node: NodeId) -> bool {
        self.watchers.contains_key(&node)
    }

    /// Schedule one notification per watcher of `failed`. Returns how many
    /// were scheduled.
    pub fn notify_failure(&mut self, failed: NodeId, fel: &mut Fel, now: SimTime) -> usize {
        let watchers = self.watchers_of(failed);
        for w in &watchers {
            let delay = self.detection_delay();
            fel.push(notice(now + delay, failed, *w));
        }
        watchers.len()
    }

    /// Drop `node` both as a watched node and as a watcher.
    pub fn forget(&mut self, node: NodeId) {
        self.watchers.shift_remove(&node);
        self.watchers.retain(|_, set| {
            set.shift_remove(&node);
            !set.is_empty()
        });
    }

    fn detection_delay(&mut self) -> u64 {
        self.latency + dist::uniform(&mut self.rng, self.latency)
    }

    pub fn clear(&mut self) {
        self.watchers.clear();
    }

    pub fn save(&self) -> Vec<Registration> {
        self.watchers
            .iter()
            .map(|(watched, set)| Registration {
                watched: *watched,
                watchers: set.iter().copied().collect(),
            })
            .collect()
    }

    pub fn load(&mut self, registrations: &[Registration]) {
        self.watchers.clear();
        for r in registrations.iter().filter(|r| !r.watchers.is_empty()) {
            self.watchers
                .insert(r.watched, r.watchers.iter().copied().collect());
        }
    }
}

fn notice(time: SimTime, failed: NodeId, watcher: NodeId) -> FutureEvent {
    FutureEvent {
        src: Some(failed),
        dest: Some(watcher),
        message: Some(Message::with_body(FAILURE_NOTICE, failed.to_string())),
        ..FutureEvent::bare(time, EventKind::FailureDetection)
    }
}
