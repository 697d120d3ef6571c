//! Simulation Orchestrator
//!
//! Drives three nested loops:
//!
//! - **trial**: one ground-truth packet, carried over every unconverged SNR
//!   lane (channel then link) and compared against the transmitted packet
//! - **drop**: `n_pcks` trials under one seed; the first `n_warm_up_pcks` are
//!   transmitted but not recorded; closed with `finalize_iteration`
//! - **outer**: drops until the termination policy says stop
//!
//! Before every drop a single `ControlMessage::ResetSeed` is broadcast to the
//! source and every lane, so all random streams restart together.

use log::{debug, info};

use crate::mc_channel::{build_channel, Channel};
use crate::mc_config::{SimConfig, TerminationPolicy};
use crate::mc_interface::{
    ControlMessage, LinkChain, NoOpSink, PacketSource, ResultsSink, Seed, SimError,
};
use crate::mc_link::build_link;
use crate::mc_results::SimulationReport;
use crate::mc_source::BitSource;
use crate::mc_statistics::{IterationResult, SnrSummary, Statistics};
use crate::mc_theoretical::Theoretical;

/// Channel and link of one SNR index
struct SnrLane {
    channel: Box<dyn Channel>,
    link: Box<dyn LinkChain>,
}

impl SnrLane {
    fn handle_control(&mut self, msg: &ControlMessage) {
        self.channel.handle_control(msg);
        self.link.handle_control(msg);
    }
}

/// Random stream of the channel of lane `idx` (stream 0 belongs to the source)
fn channel_stream(idx: usize) -> u64 {
    2 * idx as u64 + 1
}

fn link_stream(idx: usize) -> u64 {
    2 * idx as u64 + 2
}

/// Adaptive Monte-Carlo link simulation
pub struct Simulation {
    config: SimConfig,
    source: Box<dyn PacketSource>,
    lanes: Vec<SnrLane>,
    stats: Statistics,
    sink: Box<dyn ResultsSink>,

    // Run state
    drops_completed: usize,
    seeds_used: Vec<Seed>,
    forced: usize,
}

impl Simulation {
    /// Validate `config` and build the source and one lane per SNR index
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;

        let seed = seed_for_drop(&config, 0).unwrap_or_default();
        let lanes = (0..config.n_snr())
            .map(|idx| -> Result<SnrLane, SimError> {
                Ok(SnrLane {
                    channel: build_channel(
                        &config.channel,
                        config.lane_p(idx),
                        seed,
                        channel_stream(idx),
                    )?,
                    link: build_link(
                        &config.link,
                        config.lane_ebn0_db(idx),
                        seed,
                        link_stream(idx),
                    )?,
                })
            })
            .collect::<Result<Vec<_>, SimError>>()?;

        let stats = Statistics::new(config.n_snr(), config.n_bits, config.tx_rate, config.confidence)
            .with_gate(config.gate);

        Ok(Self {
            source: Box::new(BitSource::new(config.n_bits, seed)),
            lanes,
            stats,
            sink: Box::new(NoOpSink),
            drops_completed: 0,
            seeds_used: Vec::new(),
            forced: 0,
            config,
        })
    }

    /// Send the final report to `sink` instead of discarding it
    pub fn with_sink(mut self, sink: Box<dyn ResultsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replace the default uniform bit source
    pub fn with_source(mut self, source: Box<dyn PacketSource>) -> Self {
        self.source = source;
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    pub fn drops_completed(&self) -> usize {
        self.drops_completed
    }

    pub fn seeds_used(&self) -> &[Seed] {
        &self.seeds_used
    }

    /// Seed broadcast before drop `drop`
    pub fn seed_for_drop(&self, drop: usize) -> Option<Seed> {
        seed_for_drop(&self.config, drop)
    }

    /// Deliver a control message to the source and every lane
    pub fn broadcast(&mut self, msg: &ControlMessage) {
        self.source.handle_control(msg);
        for lane in &mut self.lanes {
            lane.handle_control(msg);
        }
    }

    /// One trial: a new packet over every unconverged lane.
    ///
    /// Returns `(bit_errors, packet_error)` per SNR index, `None` for
    /// converged indices. Outcomes are recorded only when `record` is set.
    pub fn send_packet(&mut self, record: bool) -> Vec<Option<(usize, bool)>> {
        let packet = self.source.generate_packet();

        let mut outcomes = Vec::with_capacity(self.lanes.len());
        for (idx, lane) in self.lanes.iter_mut().enumerate() {
            if self.stats.is_converged(idx) {
                outcomes.push(None);
                continue;
            }
            let corrupted = lane.channel.propagate(&packet);
            let received = lane.link.transmit(&corrupted);
            outcomes.push(Some(self.source.compare(&received)));
        }

        if record {
            let bit_errors: Vec<usize> = outcomes
                .iter()
                .map(|o| o.map_or(0, |(bits, _)| bits))
                .collect();
            let packet_errors: Vec<bool> = outcomes
                .iter()
                .map(|o| o.map_or(false, |(_, lost)| lost))
                .collect();
            self.stats.record_trial(&bit_errors, &packet_errors);
        }
        outcomes
    }

    /// Reseed, run `n_pcks` trials and close the iteration
    pub fn run_drop(&mut self) -> Result<Vec<Option<IterationResult>>, SimError> {
        let drop_index = self.drops_completed;
        let seed = self.seed_for_drop(drop_index).ok_or_else(|| {
            SimError::InvalidConfiguration(format!("no seed for drop {}", drop_index))
        })?;

        info!("Running drop number {} (seed {})", drop_index, seed);
        self.broadcast(&ControlMessage::ResetSeed(seed));

        for pck in 0..self.config.n_pcks {
            self.send_packet(pck >= self.config.n_warm_up_pcks);
        }

        let results = self.stats.finalize_iteration();
        self.drops_completed += 1;
        self.seeds_used.push(seed);
        Ok(results)
    }

    /// Run the outer loop until the termination policy stops it, then
    /// validate against theory and hand the report to the sink.
    ///
    /// Single-shot: fails once any drop has run on this simulation.
    pub fn run(&mut self) -> Result<SimulationReport, SimError> {
        if self.drops_completed > 0 {
            return Err(SimError::InvalidConfiguration(format!(
                "simulation already ran {} drop(s); build a new one to run again",
                self.drops_completed
            )));
        }

        info!(
            "Starting {} simulation: {} SNR points, {} drops max",
            self.config.policy,
            self.config.n_snr(),
            self.config.max_drops
        );

        let summaries = match self.config.policy {
            TerminationPolicy::FixedSeeds => self.run_fixed_seeds()?,
            TerminationPolicy::FixedConf => self.run_fixed_conf()?,
        };

        let report = SimulationReport {
            policy: self.config.policy,
            axis: self.config.sweep.axis,
            points: self.config.sweep.points.clone(),
            summaries,
            theoretical: Theoretical::new(&self.config).validate(),
            drops_completed: self.drops_completed,
            seeds_used: self.seeds_used.clone(),
            forced: self.forced,
        };

        self.sink.store(&report)?;
        info!("Simulation finished after {} drops", self.drops_completed);
        Ok(report)
    }

    fn run_fixed_seeds(&mut self) -> Result<Vec<SnrSummary>, SimError> {
        while self.drops_completed < self.config.max_drops {
            self.run_drop()?;
        }
        Ok(self.stats.wrap_up())
    }

    fn run_fixed_conf(&mut self) -> Result<Vec<SnrSummary>, SimError> {
        loop {
            self.run_drop()?;

            // A confidence interval needs two samples per index
            if self.stats.min_iterations() >= 2 {
                let summaries = self.stats.summarize()?;
                let newly = self
                    .stats
                    .check_convergence(&summaries, self.config.conf_range);
                if newly > 0 {
                    debug!(
                        "{} SNR index(es) converged after drop {}",
                        newly, self.drops_completed
                    );
                }
            }

            if self.stats.all_converged() {
                break;
            }
            if self.drops_completed >= self.config.max_drops {
                self.forced = self.stats.force_accept_all();
                break;
            }
        }

        self.stats
            .results()
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| SimError::NumericDegenerate("unconverged SNR index after stop".into()))
    }
}

fn seed_for_drop(config: &SimConfig, drop: usize) -> Option<Seed> {
    match config.policy {
        TerminationPolicy::FixedSeeds => config.seeds.get(drop).copied(),
        TerminationPolicy::FixedConf => Some(drop as Seed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mc_channel::ChannelKind;
    use crate::mc_config::{SweepAxis, SweepConfig};
    use crate::mc_interface::{Bit, Packet, Stochastic};
    use crate::mc_statistics::ConvergenceGate;
    use crate::mc_link::LinkKind;
    use crate::mc_results::CsvResultsSink;
    use crate::mc_theoretical::awgn_bpsk_ber;

    fn small_config(kind: ChannelKind, points: Vec<f64>) -> SimConfig {
        let mut config = SimConfig::default();
        config.channel.kind = kind;
        config.sweep = SweepConfig {
            axis: SweepAxis::ErrorProbability,
            points,
        };
        config.n_pcks = 20;
        config.n_warm_up_pcks = 2;
        config.n_bits = 1000;
        config
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = SimConfig::default();
        config.n_warm_up_pcks = config.n_pcks;
        assert!(matches!(
            Simulation::new(config),
            Err(SimError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_seed_rotation() {
        let mut config = small_config(ChannelKind::Constant, vec![0.01]);
        config.policy = TerminationPolicy::FixedSeeds;
        config.seeds = vec![11, 22, 33];
        config.max_drops = 3;
        let sim = Simulation::new(config.clone()).unwrap();
        assert_eq!(sim.seed_for_drop(1), Some(22));
        assert_eq!(sim.seed_for_drop(3), None);

        config.policy = TerminationPolicy::FixedConf;
        let sim = Simulation::new(config).unwrap();
        assert_eq!(sim.seed_for_drop(0), Some(0));
        assert_eq!(sim.seed_for_drop(7), Some(7));
    }

    #[test]
    fn test_ideal_channel_is_error_free() {
        let mut config = small_config(ChannelKind::Ideal, vec![1e-3, 1e-2]);
        config.policy = TerminationPolicy::FixedSeeds;
        config.seeds = vec![1, 2, 3];
        config.max_drops = 3;

        let report = Simulation::new(config).unwrap().run().unwrap();
        assert_eq!(report.drops_completed, 3);
        for summary in &report.summaries {
            assert_eq!(summary.ber.mean, 0.0);
            assert_eq!(summary.ber.half_width, 0.0);
            assert_eq!(summary.per.mean, 0.0);
            assert_eq!(summary.throughput.mean, 50.0);
        }
        assert_eq!(report.theoretical.ber, vec![0.0, 0.0]);
    }

    #[test]
    fn test_ideal_channel_converges_after_two_drops() {
        let config = small_config(ChannelKind::Ideal, vec![1e-3]);
        let mut sim = Simulation::new(config).unwrap();
        let report = sim.run().unwrap();

        assert_eq!(report.drops_completed, 2);
        assert_eq!(report.forced, 0);
        assert_eq!(report.summaries[0].throughput.mean, 50.0);
        assert_eq!(report.summaries[0].throughput.half_width, 0.0);
        assert!(sim.statistics().all_converged());
    }

    #[test]
    fn test_half_flip_channel_error_count() {
        let config = small_config(ChannelKind::Constant, vec![0.5]);
        let mut sim = Simulation::new(config).unwrap();
        sim.broadcast(&ControlMessage::ResetSeed(9));

        let mut total = 0;
        for _ in 0..20 {
            let (errors, lost) = sim.send_packet(false)[0].expect("lane is running");
            assert!((400..=600).contains(&errors), "errors {}", errors);
            assert!(lost);
            total += errors;
        }
        let average = total as f64 / 20.0;
        assert!((average - 500.0).abs() <= 50.0, "average {}", average);
        assert_eq!(sim.statistics().trials(0), 0, "unrecorded trials");
    }

    #[test]
    fn test_fixed_seeds_history_and_wrap_up() {
        let mut config = small_config(ChannelKind::Constant, vec![0.01]);
        config.policy = TerminationPolicy::FixedSeeds;
        config.seeds = vec![1, 2, 3, 4, 5];
        config.max_drops = 5;
        config.n_pcks = 10;
        config.n_warm_up_pcks = 0;

        let mut sim = Simulation::new(config.clone()).unwrap();
        for _ in 0..5 {
            sim.run_drop().unwrap();
        }
        assert_eq!(sim.statistics().iterations(0), 5);
        assert_eq!(sim.seeds_used(), &[1, 2, 3, 4, 5]);

        let mut sim = Simulation::new(config).unwrap();
        let report = sim.run().unwrap();
        assert_eq!(report.drops_completed, 5);
        assert_eq!(report.seeds_used, vec![1, 2, 3, 4, 5]);
        assert_eq!(sim.statistics().iterations(0), 0, "wrap_up clears history");
    }

    #[test]
    fn test_warm_up_packets_are_not_recorded() {
        let mut config = small_config(ChannelKind::Constant, vec![0.5]);
        config.n_pcks = 12;
        config.n_warm_up_pcks = 5;
        let mut sim = Simulation::new(config).unwrap();

        // Stop before finalize_iteration to inspect the in-flight counters
        sim.broadcast(&ControlMessage::ResetSeed(0));
        for pck in 0..12 {
            sim.send_packet(pck >= 5);
        }
        assert_eq!(sim.statistics().trials(0), 7);

        sim.run_drop().unwrap();
        assert_eq!(sim.statistics().trials(0), 0);
        assert_eq!(sim.statistics().iterations(0), 1);
    }

    #[test]
    fn test_fixed_conf_forced_termination() {
        let mut config = small_config(ChannelKind::Constant, vec![0.5]);
        config.conf_range = 0.0;
        config.max_drops = 3;
        config.n_bits = 100;

        let mut sim = Simulation::new(config).unwrap();
        let report = sim.run().unwrap();

        assert_eq!(report.drops_completed, 3);
        assert_eq!(report.forced, 1);
        assert!(report.summaries[0].ber.half_width > 0.0);
        assert!(sim.statistics().all_converged());
    }

    #[test]
    fn test_converged_lanes_are_skipped() {
        let mut config = small_config(ChannelKind::Constant, vec![0.0, 0.5]);
        config.max_drops = 3;
        config.n_bits = 100;

        let mut sim = Simulation::new(config).unwrap();
        sim.run_drop().unwrap();
        sim.run_drop().unwrap();
        let summaries = sim.stats.summarize().unwrap();
        sim.stats.check_convergence(&summaries, 0.01);
        assert!(sim.statistics().is_converged(0));

        let outcomes = sim.send_packet(true);
        assert!(outcomes[0].is_none());
        assert!(outcomes[1].is_some());
    }

    #[test]
    fn test_noisy_index_converges_before_cap() {
        let mut config = small_config(ChannelKind::Constant, vec![0.0, 0.05]);
        config.conf_range = 0.05;
        config.max_drops = 40;

        let mut sim = Simulation::new(config).unwrap();
        let report = sim.run().unwrap();

        assert_eq!(report.forced, 0);
        assert!(report.drops_completed >= 2 && report.drops_completed < 40);

        let stats = sim.statistics();
        assert_eq!(stats.iterations(0), 2, "zero-BER index freezes after two drops");
        assert_eq!(stats.iterations(1), report.drops_completed);

        let noisy = report.summaries[1].ber;
        assert!(noisy.relative_width() <= 0.05);
        assert!((noisy.mean - 0.05).abs() < 0.005, "mean {}", noisy.mean);
        assert_eq!(report.summaries[0].ber.half_width, 0.0);
    }

    #[test]
    fn test_gate_reaches_statistics() {
        let mut config = small_config(ChannelKind::Constant, vec![0.01]);
        config.gate = ConvergenceGate::AllMetrics;
        let sim = Simulation::new(config).unwrap();
        assert_eq!(sim.statistics().gate(), ConvergenceGate::AllMetrics);
        assert_eq!(sim.config().gate, ConvergenceGate::AllMetrics);
    }

    #[test]
    fn test_run_is_single_shot() {
        let mut config = small_config(ChannelKind::Constant, vec![0.01]);
        config.policy = TerminationPolicy::FixedSeeds;
        config.seeds = vec![1, 2];
        config.max_drops = 2;

        let mut sim = Simulation::new(config).unwrap();
        sim.run().unwrap();
        assert!(matches!(sim.run(), Err(SimError::InvalidConfiguration(_))));
        assert_eq!(sim.drops_completed(), 2);
    }

    /// Source that always sends the same packet and reports one bit error
    struct OneErrorSource {
        packet: Packet,
    }

    impl Stochastic for OneErrorSource {
        fn handle_control(&mut self, _msg: &ControlMessage) {}
    }

    impl PacketSource for OneErrorSource {
        fn generate_packet(&mut self) -> Packet {
            self.packet.clone()
        }

        fn last_packet(&self) -> &[Bit] {
            &self.packet
        }

        fn compare(&self, _received: &[Bit]) -> (usize, bool) {
            (1, true)
        }
    }

    #[test]
    fn test_custom_packet_source() {
        let mut config = small_config(ChannelKind::Ideal, vec![1e-3]);
        config.policy = TerminationPolicy::FixedSeeds;
        config.seeds = vec![1, 2];
        config.max_drops = 2;

        let source = OneErrorSource {
            packet: vec![1; 1000],
        };
        let report = Simulation::new(config)
            .unwrap()
            .with_source(Box::new(source))
            .run()
            .unwrap();

        let summary = report.summaries[0];
        assert!((summary.ber.mean - 1e-3).abs() < 1e-15);
        assert_eq!(summary.per.mean, 1.0);
        assert_eq!(summary.throughput.mean, 0.0);
    }

    #[test]
    fn test_same_seeds_reproduce_results() {
        let mut config = small_config(ChannelKind::Markov, vec![0.01, 0.1]);
        config.policy = TerminationPolicy::FixedSeeds;
        config.seeds = vec![3, 1, 4, 1, 5];
        config.max_drops = 5;

        let first = Simulation::new(config.clone()).unwrap().run().unwrap();
        let second = Simulation::new(config.clone()).unwrap().run().unwrap();
        assert_eq!(first.summaries, second.summaries);

        config.seeds = vec![2, 7, 1, 8, 2];
        let other = Simulation::new(config).unwrap().run().unwrap();
        assert_ne!(first.summaries, other.summaries);
    }

    #[test]
    fn test_awgn_sweep_matches_theory() {
        let mut config = small_config(ChannelKind::Ideal, vec![0.0, 4.0]);
        config.sweep.axis = SweepAxis::EbN0Db;
        config.link.kind = LinkKind::AwgnBpsk;
        config.policy = TerminationPolicy::FixedSeeds;
        config.seeds = vec![1, 2, 3, 4];
        config.max_drops = 4;
        config.n_pcks = 210;
        config.n_warm_up_pcks = 10;

        let report = Simulation::new(config).unwrap().run().unwrap();
        for (idx, ebn0_db) in [0.0, 4.0].into_iter().enumerate() {
            let expected = awgn_bpsk_ber(ebn0_db);
            let observed = report.summaries[idx].ber.mean;
            assert!(
                (observed - expected).abs() < 0.1 * expected,
                "Eb/N0 {} dB: observed {} expected {}",
                ebn0_db,
                observed,
                expected
            );
            assert_eq!(report.theoretical.ber[idx], expected);
        }
    }

    #[test]
    fn test_report_is_stored_in_sink() {
        let path = std::env::temp_dir().join(format!("mc_link_sim_{}.csv", std::process::id()));
        let mut config = small_config(ChannelKind::Ideal, vec![1e-3, 1e-2, 1e-1]);
        config.max_drops = 4;

        let sink = CsvResultsSink::new(&path).unwrap();
        let mut sim = Simulation::new(config).unwrap().with_sink(Box::new(sink));
        sim.run().unwrap();
        drop(sim);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 4);
        let _ = std::fs::remove_file(&path);
    }
}
