//! Sample plugins: a gossiping "hello" peer and a monitor that checks its
//! friend lists. Registered under `hello` and `hello_monitor`.

use std::any::Any;

use indexmap::IndexSet;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::sim_context::SimContext;
use crate::sim_error::{SimError, SimResult};
use crate::sim_interface::{
    Link, Message, Monitor, MonitorView, NodeId, Peer, SimTime, LEAVE_GRANTED,
};
use crate::sim_plugins::PluginRegistry;

pub const HELLO: &str = "HELLO";
pub const LEAVE: &str = "LEAVE";
pub const SIGNAL: &str = "SIGNAL";
pub const PERIODIC: &str = "PERIODIC";

// ticks between two greetings
pub const PERIOD: SimTime = 100;

pub fn register(plugins: &mut PluginRegistry) {
    plugins.register_peer("hello", |id, link| Ok(HelloPeer::boxed(id, link)));
    plugins.register_monitor("hello_monitor", || Box::new(HelloMonitor::default()));
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct HelloState {
    friends: IndexSet<NodeId>,
    failed: Vec<NodeId>,
}

/// Greets a random overlay member every [`PERIOD`] ticks and befriends
/// whoever greets it. Friends are watched through the failure detector.
pub struct HelloPeer {
    id: NodeId,
    link: Box<dyn Link>,
    state: HelloState,
}

impl HelloPeer {
    pub fn boxed(id: NodeId, link: Box<dyn Link>) -> Box<dyn Peer> {
        Box::new(Self {
            id,
            link,
            state: HelloState::default(),
        })
    }

    pub fn friends(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.state.friends.iter().copied()
    }

    pub fn failed(&self) -> &[NodeId] {
        &self.state.failed
    }

    fn befriend(&mut self, ctx: &mut SimContext<'_>, other: NodeId) {
        if other != self.id && self.state.friends.insert(other) {
            ctx.watch(other, self.id);
        }
    }

    fn greet_someone(&mut self, ctx: &mut SimContext<'_>) {
        if let Some(other) = ctx.random_overlay_member_except(self.id) {
            self.link.send(ctx, other, Message::new(HELLO));
        }
    }
}

impl Peer for HelloPeer {
    fn id(&self) -> NodeId {
        self.id
    }

    fn link(&self) -> &dyn Link {
        self.link.as_ref()
    }

    fn genesis(&mut self, ctx: &mut SimContext<'_>, time: SimTime) -> SimResult<()> {
        debug!("{} starts the overlay at {}", self.id, time);
        ctx.join_overlay(self.id);
        self.link.loopback(ctx, Message::new(PERIODIC), PERIOD);
        Ok(())
    }

    fn join(&mut self, ctx: &mut SimContext<'_>, _time: SimTime) -> SimResult<()> {
        if let Some(contact) = ctx.random_overlay_member_except(self.id) {
            self.befriend(ctx, contact);
            self.link.send(ctx, contact, Message::new(HELLO));
        }
        ctx.join_overlay(self.id);
        self.link.loopback(ctx, Message::new(PERIODIC), PERIOD);
        Ok(())
    }

    fn leave(&mut self, ctx: &mut SimContext<'_>, _time: SimTime) -> SimResult<()> {
        ctx.broadcast(self.link.as_ref(), &Message::new(LEAVE));
        ctx.leave_overlay(self.id);
        self.link.send_to_engine(ctx, Message::new(LEAVE_GRANTED));
        Ok(())
    }

    fn failure(&mut self, _ctx: &mut SimContext<'_>, failed: NodeId, time: SimTime) -> SimResult<()> {
        if self.state.friends.shift_remove(&failed) {
            debug!("{} lost friend {} at {}", self.id, failed, time);
        }
        self.state.failed.push(failed);
        Ok(())
    }

    fn receive(
        &mut self,
        ctx: &mut SimContext<'_>,
        src: NodeId,
        msg: &Message,
        time: SimTime,
    ) -> SimResult<()> {
        match msg.kind.to_ascii_uppercase().as_str() {
            PERIODIC => {
                self.greet_someone(ctx);
                self.link.loopback(ctx, Message::new(PERIODIC), PERIOD);
            }
            HELLO => self.befriend(ctx, src),
            LEAVE => {
                self.state.friends.shift_remove(&src);
                ctx.unwatch(src, self.id);
            }
            SIGNAL => info!(
                "{} got signal {} from {} at {}",
                self.id,
                msg.body.as_deref().unwrap_or("?"),
                src,
                time
            ),
            other => debug!("{} ignores {} from {}", self.id, other, src),
        }
        Ok(())
    }

    fn signal(&mut self, ctx: &mut SimContext<'_>, signal: i32, _time: SimTime) -> SimResult<()> {
        match signal {
            1 | 2 => {
                let friends: Vec<NodeId> = self.state.friends.iter().copied().collect();
                for f in friends {
                    self.link
                        .send(ctx, f, Message::with_body(SIGNAL, signal.to_string()));
                }
            }
            other => debug!("{} has no use for signal {}", self.id, other),
        }
        Ok(())
    }

    fn save_local_state(&self) -> SimResult<String> {
        Ok(serde_yaml::to_string(&self.state)?)
    }

    fn restore_local_state(&mut self, state: &str) -> SimResult<()> {
        self.state = serde_yaml::from_str(state).map_err(|e| SimError::PeerState {
            peer: self.id,
            reason: e.to_string(),
        })?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Monitor
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayReport {
    pub time: SimTime,
    pub peers: usize,
    pub overlay: usize,
    pub friendships: usize,
    pub stale_friends: usize,
}

/// Samples the friend graph and flags friends that have left the registry
/// without their peer noticing.
#[derive(Debug, Default)]
pub struct HelloMonitor {
    pub updates: u64,
    pub reports: Vec<OverlayReport>,
    pub verified: Option<OverlayReport>,
}

impl HelloMonitor {
    fn report(view: &MonitorView<'_>, time: SimTime) -> OverlayReport {
        let mut friendships = 0;
        let mut stale_friends = 0;
        for (_, peer) in view.network.peers() {
            if let Some(hello) = peer.as_any().downcast_ref::<HelloPeer>() {
                for f in hello.friends() {
                    friendships += 1;
                    if !view.network.contains(f) {
                        stale_friends += 1;
                    }
                }
            }
        }
        OverlayReport {
            time,
            peers: view.network.len(),
            overlay: view.overlay.len(),
            friendships,
            stale_friends,
        }
    }
}

impl Monitor for HelloMonitor {
    fn update(&mut self, _view: &MonitorView<'_>, _time: SimTime) {
        self.updates += 1;
    }

    fn snapshot(&mut self, view: &MonitorView<'_>, time: SimTime) {
        let r = Self::report(view, time);
        info!(
            "t={} peers={} overlay={} friendships={}",
            r.time, r.peers, r.overlay, r.friendships
        );
        self.reports.push(r);
    }

    fn verify(&mut self, view: &MonitorView<'_>, time: SimTime) {
        let r = Self::report(view, time);
        if r.stale_friends > 0 {
            warn!(
                "{} friend entries point at departed peers (of {})",
                r.stale_friends, r.friendships
            );
        } else {
            info!("friend lists consistent: {} friendships", r.friendships);
        }
        self.verified = Some(r);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_config::SimConfig;
    use crate::sim_context::testing::Harness;
    use crate::sim_engine::Engine;
    use crate::sim_interface::EventKind;
    use crate::sim_link::ReliableLink;
    use crate::sim_random::RngService;
    use crate::sim_scenario::{Scenario, ScenarioStep};

    const A: NodeId = NodeId::new(1, 1);
    const B: NodeId = NodeId::new(2, 2);

    fn hello(id: NodeId) -> HelloPeer {
        HelloPeer {
            id,
            link: Box::new(ReliableLink::new(id, 1)),
            state: HelloState::default(),
        }
    }

    #[test]
    fn test_join_befriends_and_greets_contact() {
        let mut h = Harness::new(SimConfig::default());
        h.network.insert_placeholder(A);
        h.overlay.add(A);

        let mut p = hello(B);
        let mut ctx = h.ctx();
        p.join(&mut ctx, 0).unwrap();
        drop(ctx);

        assert_eq!(p.friends().collect::<Vec<_>>(), vec![A]);
        assert!(h.overlay.contains(B));
        assert_eq!(h.failure_detector.watchers_of(A), vec![B]);
        let kinds: Vec<String> = h
            .fel
            .snapshot()
            .into_iter()
            .filter_map(|e| e.message.map(|m| m.kind))
            .collect();
        assert!(kinds.contains(&HELLO.to_string()));
        assert!(kinds.contains(&PERIODIC.to_string()));
    }

    #[test]
    fn test_leave_broadcasts_and_asks_engine() {
        let mut h = Harness::new(SimConfig::default());
        for id in [A, B] {
            h.network.insert_placeholder(id);
            h.overlay.add(id);
        }
        let mut p = hello(A);
        let mut ctx = h.ctx();
        p.leave(&mut ctx, 0).unwrap();
        drop(ctx);

        assert!(!h.overlay.contains(A));
        let events = h.fel.snapshot();
        assert!(events
            .iter()
            .any(|e| e.kind == EventKind::SimMsg && e.message.as_ref().unwrap().is(LEAVE_GRANTED)));
        assert!(events.iter().any(|e| e.dest == Some(B)
            && e.message.as_ref().unwrap().is(LEAVE)));
    }

    #[test]
    fn test_failure_moves_friend_to_failed() {
        let mut h = Harness::new(SimConfig::default());
        let mut p = hello(A);
        p.state.friends.insert(B);
        let mut ctx = h.ctx();
        p.failure(&mut ctx, B, 10).unwrap();
        drop(ctx);
        assert_eq!(p.friends().count(), 0);
        assert_eq!(p.failed(), &[B]);
    }

    #[test]
    fn test_state_round_trip_and_bad_state() {
        let mut p = hello(A);
        p.state.friends.insert(B);
        p.state.failed.push(NodeId::new(7, 7));
        let saved = p.save_local_state().unwrap();

        let mut q = hello(A);
        q.restore_local_state(&saved).unwrap();
        assert_eq!(q.state, p.state);
        assert!(matches!(
            q.restore_local_state("friends: [not-an-id]"),
            Err(SimError::PeerState { .. })
        ));
    }

    #[test]
    fn test_hello_run_keeps_friend_lists_consistent() {
        let config = SimConfig {
            sim_time: 3000,
            monitor: true,
            snapshot_period: 10,
            failure_detector_latency: 20,
            ..SimConfig::default()
        };
        let steps = vec![
            ScenarioStep::Monitor {
                monitor: "hello_monitor".into(),
            },
            ScenarioStep::Lottery {
                count: 30,
                interval: 20,
                join: 8,
                leave: 1,
                failure: 1,
                peer: "hello".into(),
                link: "reliable".into(),
            },
            ScenarioStep::Signal {
                count: 3,
                interval: 50,
                signal: 1,
            },
            ScenarioStep::Delay { delay: 1500 },
        ];
        let mut plugins = PluginRegistry::new();
        register(&mut plugins);
        let scenario = Scenario::new("hello", steps, &RngService::new(config.seed)).unwrap();
        scenario.validate(&plugins).unwrap();

        let mut engine = Engine::new(config, plugins, Box::new(scenario)).unwrap();
        let summary = engine.run();
        assert!(summary.peers > 0);

        let monitor = engine
            .monitor()
            .and_then(|m| m.as_any().downcast_ref::<HelloMonitor>())
            .unwrap();
        assert!(monitor.updates > 0);
        assert!(!monitor.reports.is_empty());
        let verified = monitor.verified.as_ref().unwrap();
        assert_eq!(verified.peers, summary.peers);
        // failures are detected well within the quiet period at the end
        assert_eq!(verified.stale_friends, 0);
    }
}
