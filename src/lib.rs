//! # mc-link - Adaptive Monte-Carlo Link Simulator
//!
//! Estimates the bit error rate, packet error rate and throughput of a
//! digital link over a sweep of SNR points, and keeps simulating each point
//! only until its confidence interval is tight enough.
//!
//! ## Core Components
//!
//! - **Channel**: bit-corrupting propagation models (ideal, constant BSC,
//!   3-state Markov BSC)
//! - **Statistics**: per-SNR accumulators with Student-t confidence intervals
//!   and per-index convergence
//! - **Simulation**: trial / drop / outer loops, seed rotation and the
//!   FIXED_SEEDS and FIXED_CONF termination policies
//! - **Theoretical**: closed-form reference curves for validation
//!
//! ## Usage
//!
//! ```no_run
//! use mc_link::{ChannelKind, SimConfig, Simulation, TerminationPolicy};
//!
//! let mut config = SimConfig::default();
//! config.policy = TerminationPolicy::FixedConf;
//! config.channel.kind = ChannelKind::Markov;
//! config.sweep.points = vec![1e-4, 1e-3, 1e-2];
//!
//! let mut sim = Simulation::new(config).expect("valid configuration");
//! let report = sim.run().expect("simulation runs");
//! report.print_summary();
//! ```
//!
//! Scenario files (YAML) can be run with the `scenario_runner` binary in
//! `simulator/`.

// Shared types and traits
pub mod mc_interface;
pub mod mc_special;

// Collaborators
pub mod mc_channel;
pub mod mc_link;
pub mod mc_source;

// Core
pub mod mc_config;
pub mod mc_results;
pub mod mc_simulation;
pub mod mc_statistics;
pub mod mc_theoretical;

// Re-export commonly used types
pub use mc_channel::{build_channel, Channel, ChannelConfig, ChannelKind, MarkovReseed, MarkovState, TransitionMatrix};
pub use mc_config::{ScenarioFile, SimConfig, SweepAxis, SweepConfig, TerminationPolicy};
pub use mc_interface::{
    Bit, ControlMessage, LinkChain, NoOpSink, Packet, PacketSource, ResultsSink, Seed, SimError,
    SnrIndex, Stochastic,
};
pub use mc_link::{LinkConfig, LinkKind};
pub use mc_results::{CsvResultsSink, MemorySink, SimulationReport};
pub use mc_simulation::Simulation;
pub use mc_statistics::{ConvergenceGate, Interval, SnrSummary, Statistics};
pub use mc_theoretical::{Theoretical, TheoreticalCurves};
