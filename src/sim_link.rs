use rand::rngs::StdRng;

use crate::sim_config::SimConfig;
use crate::sim_context::SimContext;
use crate::sim_interface::{EventKind, Link, Message, NodeId, SimTime};
use crate::sim_random::{dist, RngService, RngStream};

// spread of the per-pair core latency
const CORE_LATENCY_STD_DEV: f64 = 0.5;

/// Latency model of the network core between two access links.
///
/// The base latency of a pair is fixed for the whole run (it is drawn from
/// a generator seeded by the pair), and each message adds a uniform drift.
pub struct CoreNet {
    mean: u64,
    drift: u64,
    rng: StdRng,
}

impl CoreNet {
    pub fn new(config: &SimConfig, rngs: &RngService) -> Self {
        Self {
            mean: config.network_latency,
            drift: config.network_latency_drift,
            rng: rngs.stream(RngStream::Latency),
        }
    }

    pub fn latency(&mut self, src: NodeId, dest: NodeId) -> SimTime {
        let pair_seed = src.id.wrapping_add(dest.id) as u64;
        let base = dist::normal_seeded(self.mean as f64, CORE_LATENCY_STD_DEV, pair_seed);
        base + dist::uniform(&mut self.rng, self.drift) + 1
    }

    /// Access-link latency for a newly joined peer.
    pub fn sample_link_latency(&mut self, max: u64) -> SimTime {
        dist::uniform(&mut self.rng, max)
    }
}

/// Link that always delivers. A message takes the sender's link latency,
/// the core latency and the receiver's link latency; a message to a peer
/// that is gone takes the failure detector's maximum time.
pub struct ReliableLink {
    id: NodeId,
    latency: SimTime,
}

impl ReliableLink {
    pub fn new(id: NodeId, latency: SimTime) -> Self {
        Self { id, latency }
    }
}

impl Link for ReliableLink {
    fn id(&self) -> NodeId {
        self.id
    }

    fn latency(&self) -> SimTime {
        self.latency
    }

    fn send(&self, ctx: &mut SimContext<'_>, dest: NodeId, msg: Message) {
        let delay = match ctx.network().link_latency(dest) {
            Some(dest_latency) => {
                self.latency + dest_latency + ctx.core_net_latency(self.id, dest)
            }
            None => ctx.config().failure_detector_max_time,
        };
        ctx.add_event(delay, self.id, dest, EventKind::Msg, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_context::testing::Harness;

    const A: NodeId = NodeId::new(1, 1);
    const B: NodeId = NodeId::new(2, 2);

    fn config() -> SimConfig {
        SimConfig {
            network_latency: 10,
            network_latency_drift: 0,
            ..SimConfig::default()
        }
    }

    #[test]
    fn test_core_latency_is_stable_per_pair() {
        let mut core = CoreNet::new(&config(), &RngService::new(1));
        let first = core.latency(A, B);
        assert_eq!(core.latency(A, B), first);
        assert_eq!(core.latency(B, A), first);
        // normal(10, 0.5) rounded, plus one
        assert!((9..=13).contains(&first), "latency {}", first);
    }

    #[test]
    fn test_drift_bounded() {
        let c = SimConfig {
            network_latency_drift: 4,
            ..config()
        };
        let mut core = CoreNet::new(&c, &RngService::new(2));
        let base = CoreNet::new(&config(), &RngService::new(2)).latency(A, B);
        for _ in 0..50 {
            let l = core.latency(A, B);
            assert!(l >= base && l < base + 4);
        }
    }

    #[test]
    fn test_send_adds_both_link_latencies() {
        let mut h = Harness::new(config());
        h.network.insert_placeholder(B);
        let expected_core = CoreNet::new(&config(), &RngService::new(0)).latency(A, B);

        let link = ReliableLink::new(A, 3);
        let mut ctx = h.ctx();
        link.send(&mut ctx, B, Message::new("HELLO"));
        drop(ctx);

        let e = h.fel.pop_min().unwrap();
        assert_eq!(e.kind, EventKind::Msg);
        assert_eq!(e.src, Some(A));
        // placeholder B has link latency 0
        assert_eq!(e.time, 3 + expected_core);
    }

    #[test]
    fn test_send_to_missing_peer_uses_max_time() {
        let mut h = Harness::new(config());
        let link = ReliableLink::new(A, 3);
        let mut ctx = h.ctx();
        link.send(&mut ctx, B, Message::new("HELLO"));
        drop(ctx);
        assert_eq!(h.fel.pop_min().unwrap().time, 1000);
    }

    #[test]
    fn test_loopback_and_engine_channel() {
        let mut h = Harness::new(config());
        h.now = 20;
        let link = ReliableLink::new(A, 3);
        let mut ctx = h.ctx();
        link.loopback(&mut ctx, Message::new("PERIODIC"), 100);
        link.send_to_engine(&mut ctx, Message::new("LEAVE_GRANTED"));
        drop(ctx);

        let e = h.fel.pop_min().unwrap();
        assert_eq!((e.kind, e.time, e.dest), (EventKind::SimMsg, 20, Some(NodeId::ENGINE)));
        let e = h.fel.pop_min().unwrap();
        assert_eq!((e.kind, e.time, e.dest), (EventKind::Msg, 120, Some(A)));
    }
}
