//! Capacity planner entry point: CLI wiring and a simulated household run.

use std::path::Path;
use std::process;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use capacity_planner::config::ControllerConfig;
use capacity_planner::io::export::export_csv;
use capacity_planner::sim::Simulation;
use capacity_planner::store::JsonFileStore;

/// Parsed CLI arguments.
struct CliArgs {
    config_path: Option<String>,
    preset: Option<String>,
    seed_override: Option<u64>,
    steps_override: Option<usize>,
    steps_out: Option<String>,
    state_dir: Option<String>,
    quiet: bool,
}

fn print_help() {
    eprintln!("capacity-planner - household capacity guard and restore planner");
    eprintln!();
    eprintln!("Usage: capacity-planner [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>      Load configuration from a TOML file");
    eprintln!(
        "  --preset <name>      Use a built-in preset ({})",
        ControllerConfig::PRESETS.join(", ")
    );
    eprintln!("  --seed <u64>         Override random seed");
    eprintln!("  --steps <usize>      Override number of simulation steps");
    eprintln!("  --steps-out <path>   Export step records to CSV");
    eprintln!("  --state-dir <path>   Persist planner and tracker state as JSON here");
    eprintln!("  --quiet              Print only the run report");
    eprintln!("  --help               Show this help message");
    eprintln!();
    eprintln!("If no --config or --preset is given, the baseline preset is used.");
    eprintln!("Log verbosity follows RUST_LOG (default: info).");
}

/// Returns the value following a flag, or exits with an error.
fn flag_value(args: &[String], i: usize, flag: &str, what: &str) -> String {
    match args.get(i) {
        Some(v) => v.clone(),
        None => {
            eprintln!("error: {flag} requires {what}");
            process::exit(1);
        }
    }
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        config_path: None,
        preset: None,
        seed_override: None,
        steps_override: None,
        steps_out: None,
        state_dir: None,
        quiet: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--config" => {
                i += 1;
                cli.config_path = Some(flag_value(&args, i, "--config", "a path argument"));
            }
            "--preset" => {
                i += 1;
                cli.preset = Some(flag_value(&args, i, "--preset", "a name argument"));
            }
            "--seed" => {
                i += 1;
                let raw = flag_value(&args, i, "--seed", "a u64 argument");
                if let Ok(s) = raw.parse::<u64>() {
                    cli.seed_override = Some(s);
                } else {
                    eprintln!("error: --seed value \"{raw}\" is not a valid u64");
                    process::exit(1);
                }
            }
            "--steps" => {
                i += 1;
                let raw = flag_value(&args, i, "--steps", "a count argument");
                if let Ok(n) = raw.parse::<usize>() {
                    cli.steps_override = Some(n);
                } else {
                    eprintln!("error: --steps value \"{raw}\" is not a valid count");
                    process::exit(1);
                }
            }
            "--steps-out" => {
                i += 1;
                cli.steps_out = Some(flag_value(&args, i, "--steps-out", "a path argument"));
            }
            "--state-dir" => {
                i += 1;
                cli.state_dir = Some(flag_value(&args, i, "--state-dir", "a path argument"));
            }
            "--quiet" | "-q" => {
                cli.quiet = true;
            }
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

fn load_config(cli: &CliArgs) -> ControllerConfig {
    // --config takes priority, then --preset, then baseline
    let loaded = if let Some(ref path) = cli.config_path {
        ControllerConfig::from_toml_file(Path::new(path))
    } else if let Some(ref name) = cli.preset {
        ControllerConfig::from_preset(name)
    } else {
        Ok(ControllerConfig::baseline())
    };
    let mut cfg = loaded.unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });

    if let Some(seed) = cli.seed_override {
        cfg.simulation.seed = seed;
    }
    if let Some(steps) = cli.steps_override {
        cfg.simulation.steps = steps;
    }

    let errors = cfg.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }
    cfg
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = parse_args();
    let cfg = load_config(&cli);

    let mut sim = Simulation::from_config(&cfg);
    if let Some(ref dir) = cli.state_dir {
        match JsonFileStore::open(dir) {
            Ok(store) => sim = sim.with_store(Arc::new(store)),
            Err(e) => {
                eprintln!("error: cannot open state directory \"{dir}\": {e}");
                process::exit(1);
            }
        }
    }

    let (records, report) = match sim.run().await {
        Ok(out) => out,
        Err(e) => {
            eprintln!("error: simulation failed: {e}");
            process::exit(1);
        }
    };

    if !cli.quiet {
        for r in &records {
            println!("{r}");
        }
        println!();
    }
    println!("{report}");

    if let Some(ref path) = cli.steps_out {
        if let Err(e) = export_csv(&records, Path::new(path)) {
            eprintln!("error: failed to write CSV: {e}");
            process::exit(1);
        }
        eprintln!("Step records written to {path}");
    }
}
