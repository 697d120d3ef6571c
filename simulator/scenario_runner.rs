// Scenario Runner - Load and execute scenario YAML files
//
// Usage:
//   cargo run --bin scenario_runner scenarios/constant_bsc.yaml
//   cargo run --bin scenario_runner scenarios/  (runs all .yaml files in directory)
//   cargo run --bin scenario_runner scenarios/markov_bsc.yaml --seed-list 1,2,3,4,5
//   cargo run --bin scenario_runner scenarios/ --csv results/

use mc_link::{CsvResultsSink, ScenarioFile, Seed, Simulation, TerminationPolicy};
use simple_logger::SimpleLogger;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Command line options shared by every scenario of a run
#[derive(Debug, Default)]
struct RunOptions {
    /// Replaces the scenario's seed list (FIXED_SEEDS runs one drop per seed)
    seed_list: Option<Vec<Seed>>,

    /// Directory receiving one `<scenario>.csv` per scenario
    csv_dir: Option<PathBuf>,
}

fn main() {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap_or_else(|e| eprintln!("Logger already initialized: {}", e));

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!(
            "Usage: {} <scenario.yaml | directory/> [--seed-list S1,S2,...] [--csv DIR]",
            args[0]
        );
        eprintln!("\nExamples:");
        eprintln!("  {} scenarios/constant_bsc.yaml", args[0]);
        eprintln!("  {} scenarios/", args[0]);
        eprintln!("  {} scenarios/markov_bsc.yaml --seed-list 1,2,3,4,5", args[0]);
        std::process::exit(1);
    }

    let path = Path::new(&args[1]);
    let options = parse_options(&args[2..]);

    if let Some(ref dir) = options.csv_dir {
        fs::create_dir_all(dir).unwrap_or_else(|e| {
            eprintln!("Failed to create {}: {}", dir.display(), e);
            std::process::exit(1);
        });
    }

    if path.is_file() {
        run_scenario_file(path, &options);
    } else if path.is_dir() {
        run_scenario_directory(path, &options);
    } else {
        eprintln!("Error: Path does not exist: {}", path.display());
        std::process::exit(1);
    }
}

fn parse_options(args: &[String]) -> RunOptions {
    let mut options = RunOptions::default();
    let mut iter = args.iter();

    while let Some(flag) = iter.next() {
        let value = iter.next().unwrap_or_else(|| {
            eprintln!("Missing value for {}", flag);
            std::process::exit(1);
        });
        match flag.as_str() {
            "--seed-list" => options.seed_list = Some(parse_seed_list(value)),
            "--csv" => options.csv_dir = Some(PathBuf::from(value)),
            other => {
                eprintln!("Unknown option: {}", other);
                std::process::exit(1);
            }
        }
    }
    options
}

fn parse_seed_list(list: &str) -> Vec<Seed> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.trim().parse::<Seed>().unwrap_or_else(|e| {
                eprintln!("Invalid seed '{}': {}", s, e);
                std::process::exit(1);
            })
        })
        .collect()
}

fn run_scenario_directory(dir: &Path, options: &RunOptions) {
    let mut scenarios = Vec::new();

    // Find all .yaml files
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|s| s.to_str());
            if ext == Some("yaml") || ext == Some("yml") {
                scenarios.push(path);
            }
        }
    }

    scenarios.sort();

    if scenarios.is_empty() {
        eprintln!("No .yaml files found in {}", dir.display());
        std::process::exit(1);
    }

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  SCENARIO RUNNER - Multiple Scenarios                 ║");
    println!("╚════════════════════════════════════════════════════════╝\n");
    println!("Found {} scenario(s) to run\n", scenarios.len());

    for (i, scenario_path) in scenarios.iter().enumerate() {
        println!("\n{}/{} Running: {}\n", i + 1, scenarios.len(), scenario_path.display());
        run_scenario_file(scenario_path, options);
    }

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║  All scenarios complete!                               ║");
    println!("╚════════════════════════════════════════════════════════╝\n");
}

fn run_scenario_file(path: &Path, options: &RunOptions) {
    println!("Loading scenario from: {}", path.display());

    let scenario = ScenarioFile::load(path).unwrap_or_else(|e| {
        eprintln!("Failed to load {}: {}", path.display(), e);
        std::process::exit(1);
    });

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("scenario")
        .to_string();

    // Print scenario header
    println!("\n╔════════════════════════════════════════════════════════╗");
    if let Some(ref name) = scenario.meta.name {
        println!("║  {}  {}", name, " ".repeat(54_usize.saturating_sub(name.len())));
    } else {
        println!("║  Scenario: {}  ", stem);
    }
    println!("╚════════════════════════════════════════════════════════╝\n");

    if let Some(ref desc) = scenario.meta.description {
        println!("{}\n", desc);
    }

    if let Some(ref hypothesis) = scenario.meta.hypothesis {
        println!("Hypothesis:");
        println!("  {}\n", hypothesis);
    }

    let mut config = scenario.build_config().unwrap_or_else(|e| {
        eprintln!("Invalid scenario {}: {}", path.display(), e);
        std::process::exit(1);
    });

    if let Some(ref seeds) = options.seed_list {
        config.seeds = seeds.clone();
        if config.policy == TerminationPolicy::FixedSeeds {
            config.max_drops = seeds.len();
        }
    }

    println!("Configuration:");
    println!("  Policy: {}", config.policy);
    println!("  Channel: {} (p = {:e})", config.channel.kind, config.channel.p);
    println!("  Link: {}", config.link.kind);
    println!("  Sweep: {} over {} point(s)", config.sweep.axis, config.n_snr());
    println!("  Packets per drop: {} ({} warm-up)", config.n_pcks, config.n_warm_up_pcks);
    println!("  Bits per packet: {}", config.n_bits);
    println!("  Max drops: {}", config.max_drops);
    println!("\nStarting simulation...\n");

    let mut sim = Simulation::new(config).unwrap_or_else(|e| {
        eprintln!("Invalid scenario {}: {}", path.display(), e);
        std::process::exit(1);
    });

    if let Some(ref dir) = options.csv_dir {
        let csv_path = dir.join(format!("{}.csv", stem));
        let sink = CsvResultsSink::new(&csv_path).unwrap_or_else(|e| {
            eprintln!("Failed to create {}: {}", csv_path.display(), e);
            std::process::exit(1);
        });
        println!("Writing results to {}\n", csv_path.display());
        sim = sim.with_sink(Box::new(sink));
    }

    let report = sim.run().unwrap_or_else(|e| {
        eprintln!("Simulation failed: {}", e);
        std::process::exit(1);
    });

    report.print_summary();

    println!("\n✓ Scenario complete!\n");
}
