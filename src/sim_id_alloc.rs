use hashbrown::HashMap;
use log::debug;
use rand::rngs::StdRng;
use rand::Rng;

use crate::sim_config::{IdExhaustion, SimConfig};
use crate::sim_error::{SimError, SimResult};
use crate::sim_interface::NodeId;
use crate::sim_random::{dist, RngService, RngStream};

// ============================================================================
// RandomSet
// ============================================================================

/// Draws integers from `[begin, end)` without replacement.
///
/// Conceptually the values live in one array; the prefix `[0, taken)` holds
/// drawn values and the suffix the free ones. Drawing swaps a random free
/// slot to the boundary, so draw, release and reserve are all O(1). Only
/// slots whose value has moved are stored, so memory grows with the number
/// of draws and not with the size of the range.
#[derive(Debug, Clone)]
pub struct RandomSet {
    begin: i64,
    len: usize,
    // position -> value, for positions not holding `begin + position`
    moved_values: HashMap<usize, i64>,
    // value -> position, the inverse of `moved_values`
    moved_slots: HashMap<i64, usize>,
    taken: usize,
    last_draw: Option<usize>,
}

impl RandomSet {
    pub fn new(begin: i64, end: i64) -> Self {
        Self {
            begin,
            len: end.saturating_sub(begin).max(0) as usize,
            moved_values: HashMap::new(),
            moved_slots: HashMap::new(),
            taken: 0,
            last_draw: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.len
    }

    pub fn remaining(&self) -> usize {
        self.len - self.taken
    }

    pub fn covers(&self, v: i64) -> bool {
        v >= self.begin && ((v - self.begin) as u64) < self.len as u64
    }

    pub fn is_taken(&self, v: i64) -> bool {
        self.covers(v) && self.slot_of(v) < self.taken
    }

    /// Draw a free value at random; `None` when every value is taken.
    pub fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<i64> {
        if self.remaining() == 0 {
            return None;
        }
        let pick = rng.gen_range(self.taken..self.len);
        self.swap_slots(pick, self.taken);
        let v = self.value_at(self.taken);
        self.last_draw = Some(self.taken);
        self.taken += 1;
        Some(v)
    }

    /// Put back the value returned by the most recent `draw`.
    pub fn undo_last_draw(&mut self) -> Option<i64> {
        let pos = self.last_draw.take()?;
        if pos + 1 != self.taken {
            // something else moved the boundary since the draw
            return None;
        }
        self.taken -= 1;
        Some(self.value_at(pos))
    }

    /// Mark `v` as taken. Returns false if it was already taken or is out
    /// of range.
    pub fn reserve(&mut self, v: i64) -> bool {
        if !self.covers(v) || self.is_taken(v) {
            return false;
        }
        let pos = self.slot_of(v);
        self.swap_slots(pos, self.taken);
        self.taken += 1;
        self.last_draw = None;
        true
    }

    /// Return `v` to the free pool. Returns false if it was not taken.
    pub fn release(&mut self, v: i64) -> bool {
        if !self.is_taken(v) {
            return false;
        }
        let pos = self.slot_of(v);
        self.swap_slots(pos, self.taken - 1);
        self.taken -= 1;
        self.last_draw = None;
        true
    }

    fn value_at(&self, pos: usize) -> i64 {
        self.moved_values
            .get(&pos)
            .copied()
            .unwrap_or(self.begin + pos as i64)
    }

    fn slot_of(&self, v: i64) -> usize {
        self.moved_slots
            .get(&v)
            .copied()
            .unwrap_or((v - self.begin) as usize)
    }

    fn place(&mut self, pos: usize, v: i64) {
        if v == self.begin + pos as i64 {
            self.moved_values.remove(&pos);
            self.moved_slots.remove(&v);
        } else {
            self.moved_values.insert(pos, v);
            self.moved_slots.insert(v, pos);
        }
    }

    fn swap_slots(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let va = self.value_at(a);
        let vb = self.value_at(b);
        self.place(a, vb);
        self.place(b, va);
    }
}

// ============================================================================
// IdAllocator
// ============================================================================

/// Hands out unique node ids from `[0, max_node)`.
///
/// In skewed mode the space is split into `2 * num_of_cluster` contiguous
/// bands and each allocation first picks a band with the cluster
/// distribution. Addresses are uniform over the same range and may repeat.
pub struct IdAllocator {
    bands: Vec<RandomSet>,
    clusters: Option<(u32, f64)>,
    policy: IdExhaustion,
    size: u64,
    id_rng: StdRng,
    cluster_rng: StdRng,
    address_rng: StdRng,
    last: Option<usize>,
}

impl IdAllocator {
    pub fn new(config: &SimConfig, rngs: &RngService) -> Self {
        let size = config.max_node;
        let (bands, clusters) = if config.skewed && config.num_of_cluster > 0 {
            let count = u64::from(config.num_of_cluster) * 2;
            let width = size / count;
            let bands = (0..count)
                .map(|b| {
                    let begin = (b * width) as i64;
                    let end = if b + 1 == count { size } else { (b + 1) * width };
                    RandomSet::new(begin, end as i64)
                })
                .collect();
            (bands, Some((config.num_of_cluster, config.prob_of_cluster)))
        } else {
            (vec![RandomSet::new(0, size as i64)], None)
        };

        Self {
            bands,
            clusters,
            policy: config.id_exhaustion,
            size,
            id_rng: rngs.stream(RngStream::IdSpace),
            cluster_rng: rngs.stream(RngStream::Cluster),
            address_rng: rngs.stream(RngStream::Address),
            last: None,
        }
    }

    pub fn policy(&self) -> IdExhaustion {
        self.policy
    }

    pub fn remaining(&self) -> usize {
        self.bands.iter().map(RandomSet::remaining).sum()
    }

    pub fn is_taken(&self, id: i64) -> bool {
        self.band_of(id)
            .map(|b| self.bands[b].is_taken(id))
            .unwrap_or(false)
    }

    /// Allocate a fresh id with a random address.
    pub fn allocate(&mut self) -> SimResult<NodeId> {
        let preferred = match self.clusters {
            Some((m, d)) => dist::cluster(&mut self.cluster_rng, m, d),
            None => 0,
        };
        // a full band spills over into the next one with room
        let n = self.bands.len();
        let band = (0..n)
            .map(|i| (preferred + i) % n)
            .find(|&b| self.bands[b].remaining() > 0)
            .ok_or(SimError::IdSpaceExhausted { size: self.size })?;

        let id = self.bands[band]
            .draw(&mut self.id_rng)
            .ok_or(SimError::IdSpaceExhausted { size: self.size })?;
        self.last = Some(band);
        let address = dist::uniform(&mut self.address_rng, self.size) as i64;
        Ok(NodeId::new(id, address))
    }

    /// Return the most recently allocated id to the pool.
    pub fn undo_last(&mut self) -> Option<i64> {
        let band = self.last.take()?;
        self.bands[band].undo_last_draw()
    }

    /// Mark an id as taken without drawing it (used when restoring peers).
    pub fn reserve(&mut self, id: i64) -> bool {
        self.last = None;
        match self.band_of(id) {
            Some(b) => self.bands[b].reserve(id),
            None => false,
        }
    }

    /// Called when a peer goes away. Only returns the id to the pool under
    /// the recycle policy.
    pub fn release(&mut self, id: i64) -> bool {
        if self.policy != IdExhaustion::Recycle {
            return false;
        }
        self.last = None;
        match self.band_of(id) {
            Some(b) => {
                let released = self.bands[b].release(id);
                if released {
                    debug!("id {} returned to the pool", id);
                }
                released
            }
            None => false,
        }
    }

    fn band_of(&self, id: i64) -> Option<usize> {
        self.bands.iter().position(|b| b.covers(id))
    }
}
