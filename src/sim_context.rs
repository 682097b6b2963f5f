use crate::sim_bandwidth::BandwidthLedger;
use crate::sim_config::SimConfig;
use crate::sim_failure_detector::FailureDetector;
use crate::sim_fel::Fel;
use crate::sim_interface::{
    EventKind, FutureEvent, Link, Message, Monitor, NodeId, SimTime, START_RECV_DATA,
    STOP_RECV_DATA,
};
use crate::sim_link::CoreNet;
use crate::sim_network::Network;
use crate::sim_overlay::OverlayNetwork;

/// Everything a peer or link hook may touch, borrowed from the engine for
/// the duration of one hook call.
pub struct SimContext<'a> {
    pub(crate) now: SimTime,
    pub(crate) config: &'a SimConfig,
    pub(crate) fel: &'a mut Fel,
    pub(crate) network: &'a Network,
    pub(crate) overlay: &'a mut OverlayNetwork,
    pub(crate) ledger: &'a mut BandwidthLedger,
    pub(crate) failure_detector: &'a mut FailureDetector,
    pub(crate) core_net: &'a mut CoreNet,
    pub(crate) monitor: Option<&'a mut (dyn Monitor + 'static)>,
}

impl<'a> SimContext<'a> {
    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn config(&self) -> &SimConfig {
        self.config
    }

    /// Enqueue an event `delay` ticks from now. A START/STOP_RECV_DATA
    /// message between two peers books or releases the sender's upload at
    /// send time; the receiver's download is handled at delivery.
    pub fn add_event(
        &mut self,
        delay: SimTime,
        src: NodeId,
        dest: NodeId,
        kind: EventKind,
        msg: Message,
    ) -> u64 {
        if !src.is_engine() && !dest.is_engine() {
            let rate = self.config.stripe_rate;
            if msg.is(START_RECV_DATA) {
                self.ledger.use_upload(src, dest, rate);
            } else if msg.is(STOP_RECV_DATA) {
                self.ledger.release_upload(src, dest, rate);
            }
        }
        self.fel
            .push(FutureEvent::message(self.now + delay, kind, src, dest, msg))
    }

    /// Send `msg` to every other overlay member through `link`.
    pub fn broadcast(&mut self, link: &dyn Link, msg: &Message) -> usize {
        let me = link.id();
        let targets: Vec<NodeId> = self.overlay.members().filter(|m| *m != me).collect();
        for dest in &targets {
            link.send(self, *dest, msg.clone());
        }
        targets.len()
    }

    // ===== Registry and overlay =====

    pub fn network(&self) -> &Network {
        self.network
    }

    pub fn is_alive(&self, id: NodeId) -> bool {
        self.network.contains(id)
    }

    pub fn overlay(&self) -> &OverlayNetwork {
        self.overlay
    }

    pub fn join_overlay(&mut self, id: NodeId) -> bool {
        self.overlay.add(id)
    }

    pub fn leave_overlay(&mut self, id: NodeId) -> bool {
        self.overlay.remove(id)
    }

    pub fn random_overlay_member(&mut self) -> Option<NodeId> {
        self.overlay.random_member(self.network)
    }

    pub fn random_overlay_member_except(&mut self, exclude: NodeId) -> Option<NodeId> {
        self.overlay.random_member_except(self.network, exclude)
    }

    // ===== Failure detector =====

    pub fn watch(&mut self, watched: NodeId, watcher: NodeId) {
        self.failure_detector
            .register(watched, watcher, self.network, self.fel, self.now);
    }

    pub fn unwatch(&mut self, watched: NodeId, watcher: NodeId) {
        self.failure_detector.unregister(watched, watcher);
    }

    // ===== Bandwidth =====

    pub fn ledger(&self) -> &BandwidthLedger {
        self.ledger
    }

    pub fn total_upload(&self, id: NodeId) -> u64 {
        self.ledger.total_upload(id)
    }

    pub fn total_download(&self, id: NodeId) -> u64 {
        self.ledger.total_download(id)
    }

    // ===== Latency =====

    pub fn core_net_latency(&mut self, src: NodeId, dest: NodeId) -> SimTime {
        self.core_net.latency(src, dest)
    }

    pub fn monitor(&mut self) -> Option<&mut (dyn Monitor + 'static)> {
        self.monitor.as_deref_mut()
    }
}
