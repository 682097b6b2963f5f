//! # sicsim - discrete-event simulator for peer-to-peer overlays
//!
//! Drives a virtual clock, injects churn (join, leave, failure), delivers
//! messages between peers with modeled core and access-link latency, keeps
//! per-peer upload/download bandwidth accounts and lets pluggable peer, link
//! and monitor implementations build and maintain an overlay under test.
//!
//! ## Core Components
//!
//! - **Engine**: owns every state manager and dispatches one event at a time
//! - **Scheduler / Fel**: turns a scenario into timed events, earliest first
//! - **Network / OverlayNetwork**: the peer registry and the overlay membership
//! - **BandwidthLedger**: directed upload/download rates between peers
//! - **FailureDetector**: who watches whom, and delayed failure notices
//! - **Snapshot / CheckpointStore**: save and restore a run mid-flight
//!
//! ## Writing a peer
//!
//! Implement [`Peer`] for the behavior under test, register a factory under a
//! name in a [`PluginRegistry`] and refer to that name from the scenario:
//!
//! ```no_run
//! use sicsim::{Engine, PluginRegistry, Scenario, SimConfig, RngService};
//!
//! let config = SimConfig::default();
//! let mut plugins = PluginRegistry::new();
//! sicsim::sim_hello::register(&mut plugins);
//!
//! let scenario = Scenario::from_yaml_str(
//!     "steps:\n  - type: lottery\n    count: 10\n    interval: 20\n    join: 1\n    peer: hello\n",
//!     &RngService::new(config.seed),
//! ).unwrap();
//! let mut engine = Engine::new(config, plugins, Box::new(scenario)).unwrap();
//! engine.run().print_summary();
//! ```
//!
//! Runs are reproducible: every random draw comes from a stream derived from
//! `SimConfig::seed`.

// Shared types and plugin contracts
pub mod sim_config;
pub mod sim_error;
pub mod sim_interface;
pub mod sim_random;

// State managers
pub mod sim_bandwidth;
pub mod sim_failure_detector;
pub mod sim_id_alloc;
pub mod sim_network;
pub mod sim_overlay;

// Event machinery
pub mod sim_checkpoint;
pub mod sim_context;
pub mod sim_engine;
pub mod sim_fel;
pub mod sim_scenario;
pub mod sim_scheduler;

// Plugins
pub mod sim_bandwidth_peer;
pub mod sim_hello;
pub mod sim_link;
pub mod sim_plugins;

// Re-export commonly used types
pub use sim_config::{IdExhaustion, SimConfig};
pub use sim_context::SimContext;
pub use sim_engine::{Engine, EngineStats, RunSummary};
pub use sim_error::{SimError, SimResult};
pub use sim_interface::{
    EventKind, FutureEvent, Link, Message, Monitor, MonitorView, NodeId, Peer, ScenarioEvent,
    ScenarioSource, SimTime,
};
pub use sim_plugins::PluginRegistry;
pub use sim_random::{RngService, RngStream};
pub use sim_scenario::{Scenario, ScenarioStep};
