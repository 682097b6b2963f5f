use log::{debug, info};

use crate::sim_fel::Fel;
use crate::sim_interface::{
    EventKind, FutureEvent, ScenarioEvent, ScenarioSource, SimTime,
};

/// Feeds scenario events into the future event list and advances the clock.
///
/// At most one scenario-derived event is pending at a time: the next one is
/// pulled only when the previous one is dispatched.
pub struct Scheduler {
    source: Box<dyn ScenarioSource>,
    fel: Fel,
    clock: SimTime,
    horizon: SimTime,
    started: bool,
    last_pull: Option<u64>,
}

impl Scheduler {
    pub fn new(source: Box<dyn ScenarioSource>, horizon: SimTime) -> Self {
        Self {
            source,
            fel: Fel::new(),
            clock: 0,
            horizon,
            started: false,
            last_pull: None,
        }
    }

    pub fn clock(&self) -> SimTime {
        self.clock
    }

    pub fn horizon(&self) -> SimTime {
        self.horizon
    }

    pub fn fel(&self) -> &Fel {
        &self.fel
    }

    pub fn fel_mut(&mut self) -> &mut Fel {
        &mut self.fel
    }

    /// Pop the next due event and move the clock to it. `None` once the
    /// list is empty or the next event lies beyond the horizon.
    pub fn next_step(&mut self) -> Option<FutureEvent> {
        if !self.started {
            self.started = true;
            self.pull();
        }

        let next = self.fel.peek_time()?;
        if next > self.horizon {
            info!(
                "next event at {} is past the horizon {}, stopping",
                next, self.horizon
            );
            return None;
        }
        let event = self.fel.pop_min()?;

        self.clock = event.time;
        if event.kind.is_scenario_driven() {
            self.pull();
        }
        Some(event)
    }

    /// Pull one scenario event and enqueue it. Returns false when the
    /// scenario is finished.
    pub fn pull(&mut self) -> bool {
        if !self.source.has_next() {
            self.last_pull = None;
            return false;
        }
        let Some(logical) = self.source.next_event() else {
            self.last_pull = None;
            return false;
        };
        let event = self.convert(logical);
        debug!("scheduled {} at {}", event.kind, event.time);
        self.last_pull = Some(self.fel.push(event));
        true
    }

    /// Take back the event enqueued by the last pull and roll the scenario
    /// back by one event.
    pub fn undo_last_pull(&mut self) -> bool {
        let Some(seq) = self.last_pull.take() else {
            return false;
        };
        self.fel.retract(seq);
        self.source.undo();
        true
    }

    fn convert(&self, logical: ScenarioEvent) -> FutureEvent {
        let now = self.clock;
        match logical {
            ScenarioEvent::Churn {
                kind,
                interval,
                peer_type,
                link_type,
            } => FutureEvent {
                peer_type: Some(peer_type),
                link_type: Some(link_type),
                ..FutureEvent::bare(now + interval, kind)
            },
            ScenarioEvent::Delay { delay } => FutureEvent::bare(now + delay, EventKind::Delay),
            ScenarioEvent::SaveOverlay { delay } => {
                FutureEvent::bare(now + delay, EventKind::SaveOverlay)
            }
            ScenarioEvent::LoadOverlay { delay } => {
                FutureEvent::bare(now + delay, EventKind::LoadOverlay)
            }
            ScenarioEvent::Signal { interval, signal } => FutureEvent {
                signal: Some(signal),
                ..FutureEvent::bare(now + interval, EventKind::Signal)
            },
            ScenarioEvent::Monitor { monitor_type } => FutureEvent {
                monitor_type: Some(monitor_type),
                ..FutureEvent::bare(now, EventKind::MonitorOverlay)
            },
        }
    }

    // ===== Checkpoint =====

    pub fn save(&self) -> SimTime {
        self.clock
    }

    /// Restore the clock. The scenario position is not part of a
    /// checkpoint; the run continues from wherever the scenario is.
    pub fn load(&mut self, clock: SimTime) {
        self.clock = clock;
        self.last_pull = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_interface::{Message, NodeId};

    /// Plays back a fixed list.
    struct Scripted {
        events: Vec<ScenarioEvent>,
        pos: usize,
    }

    impl Scripted {
        fn boxed(events: Vec<ScenarioEvent>) -> Box<dyn ScenarioSource> {
            Box::new(Scripted { events, pos: 0 })
        }
    }

    impl ScenarioSource for Scripted {
        fn has_next(&mut self) -> bool {
            self.pos < self.events.len()
        }
        fn next_event(&mut self) -> Option<ScenarioEvent> {
            let e = self.events.get(self.pos).cloned();
            if e.is_some() {
                self.pos += 1;
            }
            e
        }
        fn undo(&mut self) {
            self.pos = self.pos.saturating_sub(1);
        }
    }

    fn join(interval: SimTime) -> ScenarioEvent {
        ScenarioEvent::Churn {
            kind: EventKind::Join,
            interval,
            peer_type: "p".into(),
            link_type: "reliable".into(),
        }
    }

    fn scenario_events(fel: &Fel) -> usize {
        fel.snapshot()
            .iter()
            .filter(|e| e.kind.is_scenario_driven())
            .count()
    }

    #[test]
    fn test_lazy_first_pull_and_rearm() {
        let mut s = Scheduler::new(
            Scripted::boxed(vec![join(5), ScenarioEvent::Delay { delay: 10 }, join(1)]),
            1000,
        );
        assert!(s.fel().is_empty());

        let e = s.next_step().unwrap();
        assert_eq!((e.kind, e.time), (EventKind::Join, 5));
        assert_eq!(e.peer_type.as_deref(), Some("p"));
        assert_eq!(s.clock(), 5);
        assert_eq!(scenario_events(s.fel()), 1);

        let e = s.next_step().unwrap();
        assert_eq!((e.kind, e.time), (EventKind::Delay, 15));
        let e = s.next_step().unwrap();
        assert_eq!((e.kind, e.time), (EventKind::Join, 16));
        assert!(s.next_step().is_none());
    }

    #[test]
    fn test_messages_do_not_rearm() {
        let mut s = Scheduler::new(
            Scripted::boxed(vec![join(50), join(50)]),
            1000,
        );
        s.fel_mut().push(FutureEvent::message(
            3,
            EventKind::Msg,
            NodeId::new(1, 1),
            NodeId::new(2, 2),
            Message::new("HI"),
        ));
        let e = s.next_step().unwrap();
        assert_eq!(e.kind, EventKind::Msg);
        // only the lazily pulled first event is pending
        assert_eq!(s.fel().len(), 1);
        assert_eq!(scenario_events(s.fel()), 1);
    }

    #[test]
    fn test_each_rearming_kind_keeps_one_in_flight() {
        let mut events = vec![
            ScenarioEvent::Delay { delay: 1 },
            ScenarioEvent::SaveOverlay { delay: 1 },
            ScenarioEvent::LoadOverlay { delay: 1 },
            ScenarioEvent::Signal {
                interval: 1,
                signal: 2,
            },
            ScenarioEvent::Monitor {
                monitor_type: "m".into(),
            },
            join(1),
        ];
        events.push(ScenarioEvent::Delay { delay: 1 });
        let n = events.len();
        let mut s = Scheduler::new(Scripted::boxed(events), 1000);
        for i in 0..n - 1 {
            let e = s.next_step().unwrap();
            assert!(e.kind.is_scenario_driven());
            assert_eq!(scenario_events(s.fel()), 1, "after event {}", i);
        }
        s.next_step().unwrap();
        assert_eq!(scenario_events(s.fel()), 0);
    }

    #[test]
    fn test_monitor_is_immediate() {
        let mut s = Scheduler::new(
            Scripted::boxed(vec![
                ScenarioEvent::Delay { delay: 40 },
                ScenarioEvent::Monitor {
                    monitor_type: "m".into(),
                },
            ]),
            1000,
        );
        s.next_step().unwrap();
        let e = s.next_step().unwrap();
        assert_eq!(e.kind, EventKind::MonitorOverlay);
        assert_eq!(e.time, 40);
        assert_eq!(e.monitor_type.as_deref(), Some("m"));
    }

    #[test]
    fn test_horizon_stops_and_keeps_event() {
        let mut s = Scheduler::new(Scripted::boxed(vec![join(500)]), 100);
        assert!(s.next_step().is_none());
        assert_eq!(s.clock(), 0);
        assert_eq!(s.fel().len(), 1);
    }

    #[test]
    fn test_horizon_keeps_tie_order() {
        let mut s = Scheduler::new(Scripted::boxed(vec![]), 100);
        let (a, b) = (NodeId::new(1, 1), NodeId::new(2, 2));
        let first = s
            .fel_mut()
            .push(FutureEvent::message(500, EventKind::Msg, a, b, Message::new("FIRST")));
        s.fel_mut()
            .push(FutureEvent::message(500, EventKind::Msg, b, a, Message::new("SECOND")));
        assert!(s.next_step().is_none());
        assert!(s.next_step().is_none());

        let kinds: Vec<String> = s
            .fel()
            .snapshot()
            .into_iter()
            .filter_map(|e| e.message.map(|m| m.kind))
            .collect();
        assert_eq!(kinds, vec!["FIRST", "SECOND"]);
        // still queued under its original sequence number
        assert!(s.fel_mut().retract(first).is_some());
    }

    #[test]
    fn test_undo_last_pull() {
        let mut s = Scheduler::new(
            Scripted::boxed(vec![join(5), ScenarioEvent::Delay { delay: 2 }]),
            1000,
        );
        assert!(s.pull());
        assert_eq!(s.fel().len(), 1);
        assert!(s.undo_last_pull());
        assert!(s.fel().is_empty());
        assert!(!s.undo_last_pull());
        // the same logical event comes back
        assert!(s.pull());
        assert_eq!(s.fel().snapshot()[0].kind, EventKind::Join);
    }

    #[test]
    fn test_load_sets_clock() {
        let mut s = Scheduler::new(Scripted::boxed(vec![join(5)]), 1000);
        s.load(70);
        assert_eq!(s.save(), 70);
        // the first pull is still lazy and relative to the loaded clock
        assert_eq!(s.next_step().unwrap().time, 75);
    }
}
