use std::fs::OpenOptions;
use std::io::Write;

use log::{debug, info, warn};

use crate::sim_bandwidth::BandwidthLedger;
use crate::sim_checkpoint::{CheckpointStore, Snapshot};
use crate::sim_config::SimConfig;
use crate::sim_context::SimContext;
use crate::sim_error::{SimError, SimResult};
use crate::sim_failure_detector::FailureDetector;
use crate::sim_fel::Fel;
use crate::sim_interface::{
    EventKind, FutureEvent, Message, Monitor, MonitorView, NodeId, Peer, ScenarioSource,
    SimTime, LEAVE_GRANTED, START_RECV_DATA, STOP_RECV_DATA,
};
use crate::sim_link::CoreNet;
use crate::sim_network::Network;
use crate::sim_overlay::OverlayNetwork;
use crate::sim_plugins::PluginRegistry;
use crate::sim_random::RngService;
use crate::sim_scenario::Scenario;
use crate::sim_scheduler::Scheduler;

/// Counters kept over a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub joins: u64,
    pub join_failures: u64,
    pub leaves: u64,
    pub failures: u64,
    pub signals: u64,
    pub messages_delivered: u64,
    pub messages_dropped: u64,
    pub hook_errors: u64,
    pub checkpoints_saved: u64,
    pub checkpoints_loaded: u64,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub seed: u64,
    pub final_clock: SimTime,
    pub events_dispatched: u64,
    pub peers: usize,
    pub overlay_members: usize,
    pub pending_events: usize,
    pub stats: EngineStats,
}

impl RunSummary {
    pub fn print_summary(&self) {
        println!("\n╔════════════════════════════════════════════════════════╗");
        println!("║    SICSIM RUN RESULTS                                  ║");
        println!("╚════════════════════════════════════════════════════════╝\n");

        println!("Seed: {}", self.seed);
        println!("Final clock: {}", self.final_clock);
        println!("Events dispatched: {}", self.events_dispatched);
        println!("Pending events: {}", self.pending_events);
        println!();

        println!("═══ Final State ═══");
        println!("  Peers: {} registered, {} in overlay", self.peers, self.overlay_members);
        println!();

        let s = &self.stats;
        println!("═══ Churn ═══");
        println!("  Joins: {} ({} dropped)", s.joins, s.join_failures);
        println!("  Leaves: {}", s.leaves);
        println!("  Failures: {}", s.failures);
        println!("  Signals: {}", s.signals);
        println!();

        println!("═══ Messages ═══");
        println!("  Delivered: {}", s.messages_delivered);
        println!("  Dropped: {}", s.messages_dropped);
        println!("  Hook errors: {}", s.hook_errors);
        if s.checkpoints_saved + s.checkpoints_loaded > 0 {
            println!(
                "  Checkpoints: {} saved, {} loaded",
                s.checkpoints_saved, s.checkpoints_loaded
            );
        }
    }
}

/// The dispatcher. Owns every state manager and drives the peers through
/// their hooks, one event at a time.
pub struct Engine {
    config: SimConfig,
    plugins: PluginRegistry,
    scheduler: Scheduler,
    network: Network,
    overlay: OverlayNetwork,
    ledger: BandwidthLedger,
    failure_detector: FailureDetector,
    core_net: CoreNet,
    monitor: Option<Box<dyn Monitor>>,
    checkpoints: CheckpointStore,

    events_dispatched: u64,
    stats: EngineStats,
    last_monitor_update: Option<SimTime>,
    last_clock: Option<SimTime>,
    ticks_since_snapshot: u64,
    last_net_size: usize,
    net_size_trace: Vec<(SimTime, usize)>,
}

impl Engine {
    pub fn new(
        config: SimConfig,
        plugins: PluginRegistry,
        source: Box<dyn ScenarioSource>,
    ) -> SimResult<Self> {
        config.validate()?;
        let rngs = RngService::new(config.seed);
        Ok(Self {
            scheduler: Scheduler::new(source, config.sim_time),
            network: Network::new(&config, &rngs),
            overlay: OverlayNetwork::new(&rngs),
            ledger: BandwidthLedger::new(),
            failure_detector: FailureDetector::new(config.failure_detector_latency, &rngs),
            core_net: CoreNet::new(&config, &rngs),
            monitor: None,
            checkpoints: CheckpointStore::new(config.checkpoint_file.clone()),
            events_dispatched: 0,
            stats: EngineStats::default(),
            last_monitor_update: None,
            last_clock: None,
            ticks_since_snapshot: 0,
            last_net_size: 0,
            net_size_trace: Vec::new(),
            plugins,
            config,
        })
    }

    /// Build an engine for the scenario file named in `config`, checking
    /// every plugin name it uses against `plugins`.
    pub fn from_config(config: SimConfig, plugins: PluginRegistry) -> SimResult<Self> {
        let path = config
            .scenario_file
            .clone()
            .ok_or_else(|| SimError::InvalidConfig("scenario_file is not set".into()))?;
        let scenario = Scenario::from_file(&path, &RngService::new(config.seed))?;
        scenario.validate(&plugins)?;
        info!(
            "loaded scenario {} ({} events)",
            scenario.name(),
            scenario.remaining()
        );
        Self::new(config, plugins, Box::new(scenario))
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn clock(&self) -> SimTime {
        self.scheduler.clock()
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn overlay(&self) -> &OverlayNetwork {
        &self.overlay
    }

    pub fn ledger(&self) -> &BandwidthLedger {
        &self.ledger
    }

    pub fn failure_detector(&self) -> &FailureDetector {
        &self.failure_detector
    }

    pub fn fel(&self) -> &Fel {
        self.scheduler.fel()
    }

    pub fn monitor(&self) -> Option<&dyn Monitor> {
        self.monitor.as_deref()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn events_dispatched(&self) -> u64 {
        self.events_dispatched
    }

    /// `(clock, registry size)` every time the size changed.
    pub fn net_size_trace(&self) -> &[(SimTime, usize)] {
        &self.net_size_trace
    }

    /// Enqueue an event from outside any hook, e.g. to inject traffic.
    pub fn add_event(
        &mut self,
        delay: SimTime,
        src: NodeId,
        dest: NodeId,
        kind: EventKind,
        msg: Message,
    ) -> u64 {
        self.context().add_event(delay, src, dest, kind, msg)
    }

    pub fn install_monitor(&mut self, mut monitor: Box<dyn Monitor>) {
        let now = self.clock();
        let view = MonitorView::new(&self.network, &self.overlay, &self.ledger);
        monitor.init(&view, now);
        self.monitor = Some(monitor);
    }

    // ========================================================================
    // Step loop
    // ========================================================================

    /// Run until the horizon in the config.
    pub fn run(&mut self) -> RunSummary {
        self.run_till(self.config.sim_time)
    }

    /// Step while the clock is below `till`, then let the monitor verify.
    pub fn run_till(&mut self, till: SimTime) -> RunSummary {
        info!(
            "run starts at {} (seed {}, horizon {})",
            self.clock(),
            self.config.seed,
            self.scheduler.horizon()
        );
        while self.clock() < till {
            if self.step().is_none() {
                break;
            }
        }

        let now = self.clock();
        if let Some(monitor) = self.monitor.as_mut() {
            let view = MonitorView::new(&self.network, &self.overlay, &self.ledger);
            monitor.verify(&view, now);
        }

        let summary = self.summary();
        info!(
            "run ends at {}: {} events, {} peers",
            summary.final_clock, summary.events_dispatched, summary.peers
        );
        summary
    }

    /// Dispatch one event. `None` when the run is over: nothing is pending
    /// or the next event lies beyond the horizon.
    pub fn step(&mut self) -> Option<EventKind> {
        if self.config.sync_update {
            self.sync_peers();
        }
        if self.config.monitor {
            self.update_monitor();
        }

        let event = self.scheduler.next_step()?;
        let kind = event.kind;
        debug!("t={} dispatch {}", event.time, kind);
        self.dispatch(event);
        self.events_dispatched += 1;
        self.after_step();
        Some(kind)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            seed: self.config.seed,
            final_clock: self.clock(),
            events_dispatched: self.events_dispatched,
            peers: self.network.len(),
            overlay_members: self.overlay.len(),
            pending_events: self.scheduler.fel().len(),
            stats: self.stats.clone(),
        }
    }

    fn dispatch(&mut self, event: FutureEvent) {
        match event.kind {
            EventKind::Join => self.handle_join(&event),
            EventKind::Leave => self.handle_leave(),
            EventKind::Failure => self.handle_failure(),
            EventKind::Msg => self.handle_msg(event),
            EventKind::SimMsg => self.handle_sim_msg(&event),
            EventKind::FailureDetection => self.handle_failure_detection(&event),
            EventKind::SaveOverlay => self.handle_save(),
            EventKind::LoadOverlay => self.handle_load(),
            EventKind::MonitorOverlay => self.handle_monitor(&event),
            EventKind::Signal => self.handle_signal(&event),
            EventKind::Delay | EventKind::Periodic => {}
        }
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    fn handle_join(&mut self, event: &FutureEvent) {
        let (Some(peer_type), Some(link_type)) =
            (event.peer_type.as_deref(), event.link_type.as_deref())
        else {
            warn!("JOIN at {} names no peer or link type, dropped", event.time);
            self.stats.join_failures += 1;
            return;
        };

        let id = match self.network.generate_unique_node_id() {
            Ok(id) => id,
            Err(e) => {
                warn!("JOIN at {} dropped: {}", event.time, e);
                self.stats.join_failures += 1;
                return;
            }
        };
        let latency = self.core_net.sample_link_latency(self.config.link_latency);
        let mut peer = match self.plugins.instantiate(peer_type, link_type, id, latency) {
            Ok(peer) => peer,
            Err(e) => {
                self.network.undo_last_allocation();
                warn!("JOIN at {} dropped: {}", event.time, e);
                self.stats.join_failures += 1;
                return;
            }
        };

        let now = self.clock();
        let genesis = self.network.is_empty();
        let result = {
            let mut ctx = self.context();
            if genesis {
                peer.genesis(&mut ctx, now)
            } else {
                peer.join(&mut ctx, now)
            }
        };
        if let Err(e) = result {
            warn!("join hook of {} failed: {}", id, e);
            self.stats.hook_errors += 1;
        }

        self.network.add(id, peer, peer_type, link_type, latency);
        self.stats.joins += 1;
        info!(
            "t={} {} {} joined as {} ({} peers)",
            now,
            if genesis { "genesis" } else { "peer" },
            peer_type,
            id,
            self.network.len()
        );
    }

    fn handle_leave(&mut self) {
        let now = self.clock();
        let Some(id) = self.network.random_node_id() else {
            warn!("t={} LEAVE with no peers, ignored", now);
            return;
        };
        info!("t={} {} is leaving", now, id);
        self.with_peer(id, "leave", |peer, ctx| peer.leave(ctx, now));
    }

    fn handle_failure(&mut self) {
        let Some(id) = self.network.random_node_id() else {
            warn!("t={} FAILURE with no peers, ignored", self.clock());
            return;
        };
        self.fail_peer(id);
    }

    /// Crash `id` on the spot: no hook runs, its watchers are told later.
    fn fail_peer(&mut self, id: NodeId) {
        let now = self.clock();
        let notified = self
            .failure_detector
            .notify_failure(id, self.scheduler.fel_mut(), now);
        self.remove_peer(id);
        self.stats.failures += 1;
        info!(
            "t={} {} failed, {} watcher(s) will be told ({} peers)",
            now,
            id,
            notified,
            self.network.len()
        );
    }

    fn handle_msg(&mut self, event: FutureEvent) {
        let (Some(src), Some(dest), Some(msg)) = (event.src, event.dest, event.message) else {
            warn!("MSG at {} without endpoints or payload, dropped", event.time);
            self.stats.messages_dropped += 1;
            return;
        };
        if !self.network.contains(dest) {
            debug!("t={} {} -> {} dropped: {} is gone", event.time, src, dest, dest);
            self.stats.messages_dropped += 1;
            return;
        }

        if self.network.contains(src) {
            let rate = self.config.stripe_rate;
            if msg.is(START_RECV_DATA) {
                self.ledger.use_download(src, dest, rate);
            } else if msg.is(STOP_RECV_DATA) {
                self.ledger.release_download(src, dest, rate);
            }
        }

        let now = self.clock();
        if self.with_peer(dest, "receive", |peer, ctx| peer.receive(ctx, src, &msg, now)) {
            self.stats.messages_delivered += 1;
        }
    }

    fn handle_sim_msg(&mut self, event: &FutureEvent) {
        let (Some(src), Some(msg)) = (event.src, event.message.as_ref()) else {
            warn!("SIM_MSG at {} without sender or payload, ignored", event.time);
            return;
        };
        if !msg.is(LEAVE_GRANTED) {
            debug!("SIM_MSG {} from {} ignored", msg.kind, src);
            return;
        }
        if !self.network.contains(src) {
            debug!("{} asked to leave but is already gone", src);
            return;
        }
        self.remove_peer(src);
        self.stats.leaves += 1;
        info!("t={} {} left ({} peers)", event.time, src, self.network.len());
    }

    fn handle_failure_detection(&mut self, event: &FutureEvent) {
        let Some(dest) = event.dest else {
            warn!("FAILURE_DETECTION at {} without destination, ignored", event.time);
            return;
        };
        if !self.network.contains(dest) {
            debug!("failure notice for departed {} dropped", dest);
            return;
        }
        let failed = event
            .message
            .as_ref()
            .and_then(|m| m.body.as_deref())
            .and_then(|b| b.parse::<NodeId>().ok())
            .or(event.src);
        let Some(failed) = failed else {
            warn!("FAILURE_DETECTION at {} names no failed node, ignored", event.time);
            return;
        };
        let now = self.clock();
        self.with_peer(dest, "failure", |peer, ctx| peer.failure(ctx, failed, now));
    }

    fn handle_save(&mut self) {
        let saved = self
            .save_checkpoint()
            .and_then(|snapshot| self.checkpoints.store(&snapshot));
        match saved {
            Ok(()) => {
                self.stats.checkpoints_saved += 1;
                info!("t={} checkpoint saved", self.clock());
            }
            Err(e) => warn!("t={} checkpoint save failed: {}", self.clock(), e),
        }
    }

    fn handle_load(&mut self) {
        let loaded = self
            .checkpoints
            .fetch()
            .and_then(|snapshot| self.load_checkpoint(snapshot));
        match loaded {
            Ok(()) => {
                self.stats.checkpoints_loaded += 1;
                info!(
                    "checkpoint loaded: clock {} with {} peers",
                    self.clock(),
                    self.network.len()
                );
            }
            Err(e) => warn!("t={} checkpoint load failed: {}", self.clock(), e),
        }
    }

    fn handle_monitor(&mut self, event: &FutureEvent) {
        let Some(name) = event.monitor_type.as_deref() else {
            warn!("MONITOR_OVERLAY at {} names no monitor, ignored", event.time);
            return;
        };
        match self.plugins.monitor(name) {
            Ok(monitor) => {
                info!("t={} monitor {} installed", event.time, name);
                self.install_monitor(monitor);
            }
            Err(e) => warn!("t={} {}", event.time, e),
        }
    }

    fn handle_signal(&mut self, event: &FutureEvent) {
        let now = self.clock();
        let Some(signal) = event.signal else {
            warn!("SIGNAL at {} carries no number, ignored", now);
            return;
        };
        let Some(id) = self.network.random_node_id() else {
            warn!("t={} SIGNAL {} with no peers, ignored", now, signal);
            return;
        };
        info!("t={} signal {} to {}", now, signal, id);
        self.stats.signals += 1;
        self.with_peer(id, "signal", |peer, ctx| peer.signal(ctx, signal, now));
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn context(&mut self) -> SimContext<'_> {
        let now = self.scheduler.clock();
        SimContext {
            now,
            config: &self.config,
            fel: self.scheduler.fel_mut(),
            network: &self.network,
            overlay: &mut self.overlay,
            ledger: &mut self.ledger,
            failure_detector: &mut self.failure_detector,
            core_net: &mut self.core_net,
            monitor: self.monitor.as_deref_mut(),
        }
    }

    /// Run one hook of a registered peer. The peer is lifted out of the
    /// registry for the call, so the hook sees the registry (itself
    /// included, as a member) but cannot alias its own slot. Returns false
    /// when there was no such peer.
    fn with_peer<F>(&mut self, id: NodeId, hook: &str, f: F) -> bool
    where
        F: FnOnce(&mut Box<dyn Peer>, &mut SimContext<'_>) -> SimResult<()>,
    {
        let Some(mut peer) = self.network.take_peer(id) else {
            debug!("{} hook skipped: {} not registered", hook, id);
            return false;
        };
        let result = {
            let mut ctx = self.context();
            f(&mut peer, &mut ctx)
        };
        self.network.return_peer(id, peer);
        if let Err(e) = result {
            warn!("{} hook of {} failed: {}", hook, id, e);
            self.stats.hook_errors += 1;
        }
        true
    }

    fn remove_peer(&mut self, id: NodeId) {
        self.network.remove(id);
        self.overlay.remove(id);
        self.ledger.remove(id);
        self.failure_detector.forget(id);
    }

    fn sync_peers(&mut self) {
        let now = self.clock();
        for id in self.network.node_ids() {
            self.with_peer(id, "sync", |peer, ctx| peer.sync_tick(ctx, now));
        }
    }

    fn update_monitor(&mut self) {
        let now = self.clock();
        if self.last_monitor_update == Some(now) {
            return;
        }
        if let Some(monitor) = self.monitor.as_mut() {
            let view = MonitorView::new(&self.network, &self.overlay, &self.ledger);
            monitor.update(&view, now);
            self.last_monitor_update = Some(now);
        }
    }

    /// Bookkeeping once per distinct clock value: periodic monitor
    /// snapshots and the network-size trace.
    fn after_step(&mut self) {
        let now = self.clock();
        if self.last_clock == Some(now) {
            return;
        }
        self.last_clock = Some(now);

        if self.config.monitor && self.config.snapshot_period > 0 {
            self.ticks_since_snapshot += 1;
            if self.ticks_since_snapshot >= self.config.snapshot_period {
                self.ticks_since_snapshot = 0;
                if let Some(monitor) = self.monitor.as_mut() {
                    let view = MonitorView::new(&self.network, &self.overlay, &self.ledger);
                    monitor.snapshot(&view, now);
                }
            }
        }

        let size = self.network.len();
        if size != self.last_net_size {
            self.last_net_size = size;
            self.record_net_size(now, size);
        }
    }

    fn record_net_size(&mut self, now: SimTime, size: usize) {
        self.net_size_trace.push((now, size));
        debug!("t={} network size {}", now, size);
        let Some(path) = &self.config.net_size_file else {
            return;
        };
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "({}) {}", now / 100, size));
        if let Err(e) = written {
            warn!("cannot append to {}: {}", path.display(), e);
        }
    }

    // ========================================================================
    // Checkpoint
    // ========================================================================

    /// Capture clock, pending events, ledger, registrations, overlay and
    /// every peer's local state.
    pub fn save_checkpoint(&self) -> SimResult<Snapshot> {
        Ok(Snapshot {
            clock: self.scheduler.save(),
            events: self.scheduler.fel().snapshot(),
            ledger: self.ledger.save(),
            registrations: self.failure_detector.save(),
            overlay: self.overlay.save(),
            peers: self.network.save()?,
        })
    }

    /// Restore a snapshot. Every peer is rebuilt first; if any fails the
    /// engine is left untouched. Scenario events currently pending stay
    /// pending, since the scenario itself is not rewound; all other pending
    /// events come from the snapshot.
    pub fn load_checkpoint(&mut self, snapshot: Snapshot) -> SimResult<()> {
        let Snapshot {
            clock,
            events,
            ledger,
            registrations,
            overlay,
            peers,
        } = snapshot;

        let mut restored = Vec::with_capacity(peers.len());
        for rec in peers {
            let mut peer = self.plugins.instantiate(
                &rec.peer_type,
                &rec.link_type,
                rec.id,
                rec.link_latency,
            )?;
            peer.restore_local_state(&rec.state)?;
            restored.push((rec, peer));
        }

        let mut pending: Vec<FutureEvent> = events
            .into_iter()
            .filter(|e| !e.kind.is_scenario_driven())
            .collect();
        pending.extend(
            self.scheduler
                .fel()
                .snapshot()
                .into_iter()
                .filter(|e| e.kind.is_scenario_driven())
                .map(|mut e| {
                    e.time = e.time.max(clock);
                    e
                }),
        );
        pending.sort_by_key(|e| e.time);

        self.scheduler.load(clock);
        self.scheduler.fel_mut().restore(pending);
        self.ledger.load(&ledger);
        self.failure_detector.load(&registrations);
        self.overlay.load(&overlay);
        self.network.load(restored);
        self.last_clock = Some(clock);
        self.last_net_size = self.network.len();
        Ok(())
    }
}
