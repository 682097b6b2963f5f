//! Hello-world run, configured in code
//!
//! Run with: cargo run --bin hello_world

use log::info;
use simple_logger::SimpleLogger;

use sicsim::sim_hello::{self, HelloMonitor};
use sicsim::{Engine, PluginRegistry, RngService, Scenario, ScenarioStep, SimConfig};

fn main() {
    let config = SimConfig {
        sim_time: 5_000,
        max_node: 1_000,
        monitor: true,
        snapshot_period: 50,
        failure_detector_latency: 30,
        seed: 2024,
        ..Default::default()
    };

    if let Err(e) = SimpleLogger::new().with_level(config.level_filter()).init() {
        eprintln!("logger setup failed: {}", e);
    }

    println!("╔════════════════════════════════════════════════════════╗");
    println!("║        Hello-world overlay                             ║");
    println!("╚════════════════════════════════════════════════════════╝\n");

    let steps = vec![
        ScenarioStep::Monitor {
            monitor: "hello_monitor".into(),
        },
        // grow the overlay
        ScenarioStep::Lottery {
            count: 60,
            interval: 15,
            join: 1,
            leave: 0,
            failure: 0,
            peer: "hello".into(),
            link: "reliable".into(),
        },
        // then churn it
        ScenarioStep::Lottery {
            count: 80,
            interval: 20,
            join: 4,
            leave: 2,
            failure: 2,
            peer: "hello".into(),
            link: "reliable".into(),
        },
        ScenarioStep::Signal {
            count: 5,
            interval: 40,
            signal: 1,
        },
        ScenarioStep::Save { delay: 10 },
        ScenarioStep::Delay { delay: 500 },
    ];

    let mut plugins = PluginRegistry::new();
    sim_hello::register(&mut plugins);

    let scenario = match Scenario::new("hello-world", steps, &RngService::new(config.seed))
        .and_then(|s| s.validate(&plugins).map(|_| s))
    {
        Ok(s) => s,
        Err(e) => {
            eprintln!("bad scenario: {}", e);
            std::process::exit(1);
        }
    };

    let mut engine = match Engine::new(config, plugins, Box::new(scenario)) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("bad config: {}", e);
            std::process::exit(1);
        }
    };

    let summary = engine.run();
    summary.print_summary();

    if let Some(monitor) = engine
        .monitor()
        .and_then(|m| m.as_any().downcast_ref::<HelloMonitor>())
    {
        println!("\n═══ Overlay Samples ═══");
        for r in monitor.reports.iter().rev().take(5).rev() {
            println!(
                "  t={:>5}  peers={:>3}  overlay={:>3}  friendships={:>4}",
                r.time, r.peers, r.overlay, r.friendships
            );
        }
        if let Some(v) = &monitor.verified {
            info!("{} stale friend entries at the end", v.stale_friends);
        }
    }

    println!("\n═══ Network Size ═══");
    for (clock, size) in engine.net_size_trace().iter().rev().take(10).rev() {
        println!("  ({}) {}", clock / 100, size);
    }
}
