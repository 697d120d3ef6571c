//! Link Simulation Example
//!
//! BPSK over AWGN behind a Markov channel, swept over Eb/N0 until every point
//! reaches 5% relative precision.
//!
//! Run with: cargo run --example link_sim

use log::info;
use mc_link::{
    ChannelKind, LinkKind, SimConfig, Simulation, SweepAxis, SweepConfig,
    TerminationPolicy, TransitionMatrix,
};
use mc_link::mc_config::linspace;
use simple_logger::SimpleLogger;

fn main() {
    SimpleLogger::new().init().unwrap();

    println!("╔════════════════════════════════════════════════════════╗");
    println!("║        Monte-Carlo Link Simulator                      ║");
    println!("╚════════════════════════════════════════════════════════╝\n");

    info!("Setting up link simulation...");

    let mut config = SimConfig {
        policy: TerminationPolicy::FixedConf,
        max_drops: 40,
        conf_range: 0.05,
        n_pcks: 500,
        n_warm_up_pcks: 20,
        n_bits: 256,
        tx_rate: 10.0,
        sweep: SweepConfig {
            axis: SweepAxis::EbN0Db,
            points: linspace(0.0, 6.0, 4),
        },
        ..Default::default()
    };
    config.channel.kind = ChannelKind::Markov;
    config.channel.p = 1e-3;
    config.channel.transition =
        TransitionMatrix::new([[0.95, 0.04, 0.01], [0.5, 0.45, 0.05], [0.5, 0.1, 0.4]]).unwrap();
    config.link.kind = LinkKind::AwgnBpsk;

    info!("Configuration:");
    info!("  Policy: {}", config.policy);
    info!("  Channel: {} (UGLY p = {})", config.channel.kind, config.channel.p);
    info!("  Link: {}", config.link.kind);
    info!("  Eb/N0 points: {:?}", config.sweep.points);
    info!("  Relative precision: {}", config.conf_range);
    info!("");

    info!("Starting simulation...");

    let mut sim = Simulation::new(config).unwrap();
    let report = sim.run().unwrap();

    // Display results
    report.print_summary();

    for idx in 0..report.points.len() {
        let Some(ratios) = sim.statistics().ratios(idx) else {
            continue;
        };
        info!(
            "  point {}: relative widths ber {:.3} per {:.3} throughput {:.3}",
            idx, ratios.ber, ratios.per, ratios.throughput
        );
    }

    info!("✓ Simulation complete!");
}
