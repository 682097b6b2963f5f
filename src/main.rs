// sicsim runner - load a config (and the scenario it names) and run it
//
// Usage:
//   cargo run --bin sicsim sicsim.yaml
//   cargo run --bin sicsim sicsim.yaml --seed 42

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use log::{error, info};
use simple_logger::SimpleLogger;

use sicsim::{sim_hello, Engine, PluginRegistry, SimConfig, SimResult};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let Some(config_path) = args.get(1).map(PathBuf::from) else {
        eprintln!("usage: {} <config.yaml> [--seed N]", args[0]);
        return ExitCode::from(2);
    };

    let mut config = match SimConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("cannot load {}: {}", config_path.display(), e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(pos) = args.iter().position(|a| a == "--seed") {
        match args.get(pos + 1).and_then(|s| s.parse().ok()) {
            Some(seed) => config.seed = seed,
            None => {
                eprintln!("--seed needs an unsigned integer");
                return ExitCode::from(2);
            }
        }
    }

    if let Err(e) = SimpleLogger::new().with_level(config.level_filter()).init() {
        eprintln!("logger setup failed: {}", e);
    }

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: SimConfig) -> SimResult<()> {
    println!("╔════════════════════════════════════════════════════════╗");
    println!("║        sicsim                                          ║");
    println!("╚════════════════════════════════════════════════════════╝\n");

    let mut plugins = PluginRegistry::new();
    sim_hello::register(&mut plugins);

    info!(
        "horizon {}, seed {}, scenario {}",
        config.sim_time,
        config.seed,
        config
            .scenario_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".into())
    );

    let mut engine = Engine::from_config(config, plugins)?;
    engine.run().print_summary();
    Ok(())
}
