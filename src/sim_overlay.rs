use indexmap::IndexSet;
use log::debug;
use rand::rngs::StdRng;

use crate::sim_interface::NodeId;
use crate::sim_network::Network;
use crate::sim_random::{pick_index, RngService, RngStream};

/// Peers that consider themselves part of the overlay under test.
///
/// Membership is maintained by the peers. Members that have left the
/// registry are dropped lazily, the next time a random member is requested,
/// so a returned member is always registered.
pub struct OverlayNetwork {
    members: IndexSet<NodeId>,
    rng: StdRng,
}

impl OverlayNetwork {
    pub fn new(rngs: &RngService) -> Self {
        Self {
            members: IndexSet::new(),
            rng: rngs.stream(RngStream::Overlay),
        }
    }

    pub fn add(&mut self, id: NodeId) -> bool {
        self.members.insert(id)
    }

    pub fn remove(&mut self, id: NodeId) -> bool {
        self.members.shift_remove(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.members.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.members.iter().copied()
    }

    /// Drop members the registry no longer knows. Returns how many went.
    pub fn prune(&mut self, network: &Network) -> usize {
        let stale: Vec<NodeId> = self
            .members
            .iter()
            .filter(|id| !network.contains(**id))
            .copied()
            .collect();
        for id in &stale {
            debug!("overlay: pruning stale member {}", id);
            self.members.shift_remove(id);
        }
        stale.len()
    }

    pub fn random_member(&mut self, network: &Network) -> Option<NodeId> {
        self.prune(network);
        let i = pick_index(&mut self.rng, self.members.len())?;
        self.members.get_index(i).copied()
    }

    /// Like `random_member`, but never returns `exclude`. `None` when no
    /// other member remains.
    pub fn random_member_except(&mut self, network: &Network, exclude: NodeId) -> Option<NodeId> {
        self.prune(network);
        let candidates: Vec<NodeId> = self
            .members
            .iter()
            .filter(|id| **id != exclude)
            .copied()
            .collect();
        let i = pick_index(&mut self.rng, candidates.len())?;
        Some(candidates[i])
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    pub fn save(&self) -> Vec<NodeId> {
        self.members.iter().copied().collect()
    }

    pub fn load(&mut self, members: &[NodeId]) {
        self.members = members.iter().copied().collect();
    }
}
