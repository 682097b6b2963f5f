use indexmap::IndexMap;
use log::debug;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::sim_config::SimConfig;
use crate::sim_error::SimResult;
use crate::sim_id_alloc::IdAllocator;
use crate::sim_interface::{NodeId, Peer, SimTime};
use crate::sim_random::{pick_index, RngService, RngStream};

/// A registered peer and what is needed to rebuild it from a checkpoint.
///
/// `peer` is `None` only while one of the peer's own hooks is running: the
/// dispatcher takes the peer out so the hook can mutate the rest of the
/// simulation, and puts it back afterwards.
pub struct PeerSlot {
    peer: Option<Box<dyn Peer>>,
    pub peer_type: String,
    pub link_type: String,
    pub link_latency: SimTime,
}

/// Persisted form of one registered peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub id: NodeId,
    pub peer_type: String,
    pub link_type: String,
    pub link_latency: SimTime,
    pub state: String,
}

/// Registry of every instantiated peer, in insertion order.
pub struct Network {
    peers: IndexMap<NodeId, PeerSlot>,
    ids: IdAllocator,
    rng: StdRng,
}

impl Network {
    pub fn new(config: &SimConfig, rngs: &RngService) -> Self {
        Self {
            peers: IndexMap::new(),
            ids: IdAllocator::new(config, rngs),
            rng: rngs.stream(RngStream::Network),
        }
    }

    // ===== Identifiers =====

    /// A fresh id whose numeric part is not used by any registered peer.
    pub fn generate_unique_node_id(&mut self) -> SimResult<NodeId> {
        loop {
            let id = self.ids.allocate()?;
            if !self.contains_id(id.id) {
                return Ok(id);
            }
            // taken by a restored peer; it stays consumed
            debug!("network: id {} already registered, redrawing", id.id);
        }
    }

    /// Give back the id from the last `generate_unique_node_id`, when the
    /// join it was drawn for did not go through.
    pub fn undo_last_allocation(&mut self) {
        self.ids.undo_last();
    }

    pub fn id_allocator(&self) -> &IdAllocator {
        &self.ids
    }

    fn contains_id(&self, id: i64) -> bool {
        self.peers.keys().any(|n| n.id == id)
    }

    // ===== Membership =====

    pub fn add(
        &mut self,
        id: NodeId,
        peer: Box<dyn Peer>,
        peer_type: &str,
        link_type: &str,
        link_latency: SimTime,
    ) {
        self.ids.reserve(id.id);
        self.peers.insert(
            id,
            PeerSlot {
                peer: Some(peer),
                peer_type: peer_type.to_string(),
                link_type: link_type.to_string(),
                link_latency,
            },
        );
    }

    /// Unregister `id`. Its numeric id goes back to the allocator when the
    /// recycle policy is in effect.
    pub fn remove(&mut self, id: NodeId) -> Option<Box<dyn Peer>> {
        let slot = self.peers.shift_remove(&id)?;
        self.ids.release(id.id);
        slot.peer
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&dyn Peer> {
        self.peers.get(&id).and_then(|s| s.peer.as_deref())
    }

    pub fn slot(&self, id: NodeId) -> Option<&PeerSlot> {
        self.peers.get(&id)
    }

    pub fn link_latency(&self, id: NodeId) -> Option<SimTime> {
        self.peers.get(&id).map(|s| s.link_latency)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.peers.keys().copied().collect()
    }

    pub fn peers(&self) -> impl Iterator<Item = (NodeId, &dyn Peer)> + '_ {
        self.peers
            .iter()
            .filter_map(|(id, s)| s.peer.as_deref().map(|p| (*id, p)))
    }

    /// Uniformly random registered peer.
    pub fn random_node_id(&mut self) -> Option<NodeId> {
        let i = pick_index(&mut self.rng, self.peers.len())?;
        self.peers.get_index(i).map(|(id, _)| *id)
    }

    // ===== Hook plumbing =====

    pub(crate) fn take_peer(&mut self, id: NodeId) -> Option<Box<dyn Peer>> {
        self.peers.get_mut(&id).and_then(|s| s.peer.take())
    }

    pub(crate) fn return_peer(&mut self, id: NodeId, peer: Box<dyn Peer>) {
        if let Some(slot) = self.peers.get_mut(&id) {
            slot.peer = Some(peer);
        }
    }

    // ===== Checkpoint =====

    pub fn save(&self) -> SimResult<Vec<PeerRecord>> {
        let mut out = Vec::with_capacity(self.peers.len());
        for (id, slot) in &self.peers {
            let state = match &slot.peer {
                Some(p) => p.save_local_state()?,
                None => String::new(),
            };
            out.push(PeerRecord {
                id: *id,
                peer_type: slot.peer_type.clone(),
                link_type: slot.link_type.clone(),
                link_latency: slot.link_latency,
                state,
            });
        }
        Ok(out)
    }

    /// Replace every registered peer with `restored`. Ids of dropped peers
    /// are released per policy and restored ids are marked taken.
    pub fn load(&mut self, restored: Vec<(PeerRecord, Box<dyn Peer>)>) {
        for id in self.node_ids() {
            self.remove(id);
        }
        for (rec, peer) in restored {
            self.add(rec.id, peer, &rec.peer_type, &rec.link_type, rec.link_latency);
        }
    }

    #[cfg(test)]
    pub(crate) fn insert_placeholder(&mut self, id: NodeId) {
        self.ids.reserve(id.id);
        self.peers.insert(
            id,
            PeerSlot {
                peer: None,
                peer_type: "placeholder".into(),
                link_type: "none".into(),
                link_latency: 0,
            },
        );
    }
}
