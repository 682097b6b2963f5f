//! Scenario files.
//!
//! A scenario is an ordered list of steps. Each step expands into one or
//! more logical events, handed out one at a time to the scheduler:
//!
//! ```yaml
//! meta:
//!   name: hello
//! steps:
//!   - type: lottery
//!     count: 50
//!     interval: 20
//!     join: 8
//!     leave: 1
//!     failure: 1
//!     peer: hello
//!   - type: delay
//!     delay: 500
//!   - type: save
//! ```

use std::path::Path;

use log::debug;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::sim_error::{SimError, SimResult};
use crate::sim_interface::{EventKind, ScenarioEvent, ScenarioSource, SimTime};
use crate::sim_plugins::PluginRegistry;
use crate::sim_random::{dist, RngService, RngStream};

fn default_link() -> String {
    "reliable".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScenarioStep {
    /// `count` churn events; each picks JOIN/LEAVE/FAILURE with the given
    /// weights and waits `exp(interval)` ticks.
    Lottery {
        count: u64,
        interval: u64,
        #[serde(default)]
        join: u32,
        #[serde(default)]
        leave: u32,
        #[serde(default)]
        failure: u32,
        peer: String,
        #[serde(default = "default_link")]
        link: String,
    },
    Delay {
        delay: SimTime,
    },
    /// `count` signals, each `exp(interval)` ticks after the previous one.
    Signal {
        count: u64,
        interval: u64,
        signal: i32,
    },
    Monitor {
        monitor: String,
    },
    Save {
        #[serde(default)]
        delay: SimTime,
    },
    Load {
        #[serde(default)]
        delay: SimTime,
    },
}

impl ScenarioStep {
    fn event_count(&self) -> u64 {
        match self {
            ScenarioStep::Lottery { count, .. } | ScenarioStep::Signal { count, .. } => *count,
            _ => 1,
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct ScenarioMeta {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioFile {
    #[serde(default)]
    pub meta: ScenarioMeta,
    pub steps: Vec<ScenarioStep>,
}

// weights are summed wide so large YAML values cannot overflow
fn lottery_total(join: u32, leave: u32, failure: u32) -> u64 {
    u64::from(join) + u64::from(leave) + u64::from(failure)
}

#[derive(Debug, Clone)]
struct Cursor {
    step: ScenarioStep,
    emitted: u64,
}

impl Cursor {
    fn exhausted(&self) -> bool {
        self.emitted >= self.step.event_count()
    }
}

/// The stock [`ScenarioSource`]: walks the steps in order.
pub struct Scenario {
    name: String,
    steps: Vec<Cursor>,
    current: usize,
    last: Option<usize>,
    churn_rng: StdRng,
    interval_rng: StdRng,
}

impl Scenario {
    pub fn new(name: &str, steps: Vec<ScenarioStep>, rngs: &RngService) -> SimResult<Self> {
        for (i, step) in steps.iter().enumerate() {
            if let ScenarioStep::Lottery {
                join,
                leave,
                failure,
                ..
            } = step
            {
                if lottery_total(*join, *leave, *failure) == 0 {
                    return Err(SimError::InvalidScenario(format!(
                        "step {}: lottery needs a positive join, leave or failure weight",
                        i + 1
                    )));
                }
            }
        }
        Ok(Self {
            name: name.to_string(),
            steps: steps
                .into_iter()
                .map(|step| Cursor { step, emitted: 0 })
                .collect(),
            current: 0,
            last: None,
            churn_rng: rngs.stream(RngStream::Churn),
            interval_rng: rngs.stream(RngStream::Interval),
        })
    }

    pub fn from_yaml_str(text: &str, rngs: &RngService) -> SimResult<Self> {
        let file: ScenarioFile = serde_yaml::from_str(text)?;
        let name = file.meta.name.unwrap_or_else(|| "unnamed".to_string());
        Self::new(&name, file.steps, rngs)
    }

    pub fn from_file(path: &Path, rngs: &RngService) -> SimResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut scenario = Self::from_yaml_str(&text, rngs)?;
        if scenario.name == "unnamed" {
            if let Some(stem) = path.file_stem() {
                scenario.name = stem.to_string_lossy().into_owned();
            }
        }
        Ok(scenario)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Events still to be produced.
    pub fn remaining(&self) -> u64 {
        self.steps
            .iter()
            .map(|c| c.step.event_count().saturating_sub(c.emitted))
            .sum()
    }

    /// Check every plugin name against the registry, so a typo fails the
    /// load instead of surfacing as dropped events mid-run.
    pub fn validate(&self, plugins: &PluginRegistry) -> SimResult<()> {
        for cursor in &self.steps {
            match &cursor.step {
                ScenarioStep::Lottery { peer, link, .. } => {
                    if !plugins.has_peer(peer) {
                        return Err(SimError::UnknownPeerType(peer.clone()));
                    }
                    if !plugins.has_link(link) {
                        return Err(SimError::UnknownLinkType(link.clone()));
                    }
                }
                ScenarioStep::Monitor { monitor } => {
                    if !plugins.has_monitor(monitor) {
                        return Err(SimError::UnknownMonitorType(monitor.clone()));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn produce(&mut self, index: usize) -> ScenarioEvent {
        match &self.steps[index].step {
            ScenarioStep::Lottery {
                interval,
                join,
                leave,
                failure,
                peer,
                link,
                ..
            } => {
                let total = lottery_total(*join, *leave, *failure);
                let draw = self.churn_rng.gen_range(0..total);
                let kind = if draw < u64::from(*join) {
                    EventKind::Join
                } else if draw < u64::from(*join) + u64::from(*leave) {
                    EventKind::Leave
                } else {
                    EventKind::Failure
                };
                ScenarioEvent::Churn {
                    kind,
                    interval: dist::exp(&mut self.interval_rng, *interval as f64),
                    peer_type: peer.clone(),
                    link_type: link.clone(),
                }
            }
            ScenarioStep::Delay { delay } => ScenarioEvent::Delay { delay: *delay },
            ScenarioStep::Signal {
                interval, signal, ..
            } => ScenarioEvent::Signal {
                interval: dist::exp(&mut self.interval_rng, *interval as f64),
                signal: *signal,
            },
            ScenarioStep::Monitor { monitor } => ScenarioEvent::Monitor {
                monitor_type: monitor.clone(),
            },
            ScenarioStep::Save { delay } => ScenarioEvent::SaveOverlay { delay: *delay },
            ScenarioStep::Load { delay } => ScenarioEvent::LoadOverlay { delay: *delay },
        }
    }
}

impl ScenarioSource for Scenario {
    fn has_next(&mut self) -> bool {
        while self.current < self.steps.len() && self.steps[self.current].exhausted() {
            self.current += 1;
        }
        self.current < self.steps.len()
    }

    fn next_event(&mut self) -> Option<ScenarioEvent> {
        if !self.has_next() {
            return None;
        }
        let index = self.current;
        let event = self.produce(index);
        self.steps[index].emitted += 1;
        self.last = Some(index);
        Some(event)
    }

    fn undo(&mut self) {
        if let Some(index) = self.last.take() {
            let cursor = &mut self.steps[index];
            cursor.emitted = cursor.emitted.saturating_sub(1);
            self.current = self.current.min(index);
            debug!("scenario {}: undid one event of step {}", self.name, index + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = r#"
meta:
  name: hello
steps:
  - type: lottery
    count: 3
    interval: 10
    join: 1
    peer: hello
  - type: delay
    delay: 100
  - type: signal
    count: 2
    interval: 5
    signal: 1
  - type: monitor
    monitor: overlay
  - type: save
  - type: load
    delay: 7
"#;

    fn drain(s: &mut Scenario) -> Vec<ScenarioEvent> {
        std::iter::from_fn(|| s.next_event()).collect()
    }

    #[test]
    fn test_parses_and_expands_steps() {
        let mut s = Scenario::from_yaml_str(HELLO, &RngService::new(1)).unwrap();
        assert_eq!(s.name(), "hello");
        assert_eq!(s.remaining(), 9);
        let events = drain(&mut s);
        assert_eq!(events.len(), 9);
        for e in &events[..3] {
            match e {
                ScenarioEvent::Churn {
                    kind, link_type, ..
                } => {
                    assert_eq!(*kind, EventKind::Join);
                    assert_eq!(link_type, "reliable");
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(events[3], ScenarioEvent::Delay { delay: 100 });
        assert!(matches!(events[4], ScenarioEvent::Signal { signal: 1, .. }));
        assert_eq!(
            events[6],
            ScenarioEvent::Monitor {
                monitor_type: "overlay".into()
            }
        );
        assert_eq!(events[7], ScenarioEvent::SaveOverlay { delay: 0 });
        assert_eq!(events[8], ScenarioEvent::LoadOverlay { delay: 7 });
        assert!(!s.has_next());
    }

    #[test]
    fn test_huge_lottery_weights_do_not_wrap() {
        let steps = vec![ScenarioStep::Lottery {
            count: 400,
            interval: 1,
            join: u32::MAX,
            leave: u32::MAX,
            failure: 2,
            peer: "p".into(),
            link: "reliable".into(),
        }];
        let mut s = Scenario::new("big", steps, &RngService::new(3)).unwrap();
        let kinds: Vec<EventKind> = drain(&mut s)
            .into_iter()
            .map(|e| match e {
                ScenarioEvent::Churn { kind, .. } => kind,
                _ => unreachable!(),
            })
            .collect();
        assert!(kinds.contains(&EventKind::Join));
        assert!(kinds.contains(&EventKind::Leave));
        assert_eq!(lottery_total(u32::MAX, 2, 0), u64::from(u32::MAX) + 2);
    }

    #[test]
    fn test_lottery_draws_by_weight() {
        let steps = vec![ScenarioStep::Lottery {
            count: 300,
            interval: 1,
            join: 1,
            leave: 0,
            failure: 1,
            peer: "p".into(),
            link: "reliable".into(),
        }];
        let mut s = Scenario::new("w", steps, &RngService::new(2)).unwrap();
        let kinds: Vec<EventKind> = drain(&mut s)
            .into_iter()
            .map(|e| match e {
                ScenarioEvent::Churn { kind, .. } => kind,
                _ => unreachable!(),
            })
            .collect();
        assert!(!kinds.contains(&EventKind::Leave));
        assert!(kinds.contains(&EventKind::Join));
        assert!(kinds.contains(&EventKind::Failure));
    }

    #[test]
    fn test_undo_replays_one_event() {
        let steps = vec![
            ScenarioStep::Delay { delay: 1 },
            ScenarioStep::Delay { delay: 2 },
        ];
        let mut s = Scenario::new("u", steps, &RngService::new(3)).unwrap();
        assert_eq!(s.next_event(), Some(ScenarioEvent::Delay { delay: 1 }));
        assert_eq!(s.next_event(), Some(ScenarioEvent::Delay { delay: 2 }));
        s.undo();
        assert!(s.has_next());
        assert_eq!(s.next_event(), Some(ScenarioEvent::Delay { delay: 2 }));
        assert_eq!(s.next_event(), None);
        // a second undo without a pull in between does nothing
        s.undo();
        s.undo();
        assert_eq!(s.next_event(), Some(ScenarioEvent::Delay { delay: 2 }));
    }

    #[test]
    fn test_rejects_weightless_lottery() {
        let text = "steps:\n  - type: lottery\n    count: 1\n    interval: 1\n    peer: p\n";
        assert!(matches!(
            Scenario::from_yaml_str(text, &RngService::new(1)),
            Err(SimError::InvalidScenario(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_step_type() {
        let text = "steps:\n  - type: teleport\n";
        assert!(matches!(
            Scenario::from_yaml_str(text, &RngService::new(1)),
            Err(SimError::Yaml(_))
        ));
    }

    #[test]
    fn test_validate_against_registry() {
        let s = Scenario::from_yaml_str(HELLO, &RngService::new(1)).unwrap();
        let mut plugins = PluginRegistry::new();
        assert!(matches!(
            s.validate(&plugins),
            Err(SimError::UnknownPeerType(_))
        ));
        crate::sim_hello::register(&mut plugins);
        assert!(matches!(
            s.validate(&plugins),
            Err(SimError::UnknownMonitorType(_))
        ));
    }
}
