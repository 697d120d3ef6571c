//! Simulation Configuration
//!
//! `SimConfig` is the immutable description of one experiment. It is built in
//! code (starting from `SimConfig::default()`) or from a YAML scenario file,
//! validated once, and handed by value to the orchestrator.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::mc_channel::{ChannelConfig, ChannelKind, MarkovReseed, TransitionMatrix};
use crate::mc_interface::{invalid, Seed, SimError, SnrIndex};
use crate::mc_link::{LinkConfig, LinkKind};
use crate::mc_statistics::ConvergenceGate;

// ============================================================================
// Enumerations
// ============================================================================

/// How the outer loop decides to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationPolicy {
    /// Run exactly `max_drops` drops with seeds from the seed list
    FixedSeeds,

    /// Run until every SNR index reaches the relative precision
    /// (`max_drops` caps the run)
    FixedConf,
}

impl FromStr for TerminationPolicy {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed_seeds" => Ok(TerminationPolicy::FixedSeeds),
            "fixed_conf" => Ok(TerminationPolicy::FixedConf),
            other => invalid(format!("unknown simulation type '{}'", other)),
        }
    }
}

impl fmt::Display for TerminationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationPolicy::FixedSeeds => f.write_str("fixed_seeds"),
            TerminationPolicy::FixedConf => f.write_str("fixed_conf"),
        }
    }
}

/// Quantity swept across SNR indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAxis {
    /// Eb/N0 of the AWGN link in dB
    EbN0Db,

    /// Flip probability `p` of the channel
    ErrorProbability,
}

impl FromStr for SweepAxis {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ebn0" | "ebn0_db" => Ok(SweepAxis::EbN0Db),
            "p" | "ber" | "error_probability" => Ok(SweepAxis::ErrorProbability),
            other => invalid(format!("unknown sweep axis '{}'", other)),
        }
    }
}

impl fmt::Display for SweepAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepAxis::EbN0Db => f.write_str("ebn0_db"),
            SweepAxis::ErrorProbability => f.write_str("error_probability"),
        }
    }
}

/// Points of the swept parameter
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub axis: SweepAxis,
    pub points: Vec<f64>,
}

/// `num` points evenly spaced in log10 between `10^start` and `10^stop`
pub fn logspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![10f64.powf(start)],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num)
                .map(|i| 10f64.powf(start + step * i as f64))
                .collect()
        }
    }
}

/// `num` points evenly spaced between `start` and `stop`
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num).map(|i| start + step * i as f64).collect()
        }
    }
}

// ============================================================================
// Main Configuration
// ============================================================================

/// Complete configuration of one experiment
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Termination policy
    pub policy: TerminationPolicy,

    /// Seed list (one per drop) for FIXED_SEEDS
    pub seeds: Vec<Seed>,

    /// Number of drops (FIXED_SEEDS) or drop cap (FIXED_CONF)
    pub max_drops: usize,

    /// Target relative half-width: interval = (mean - h, mean + h), h <= conf_range * mean
    pub conf_range: f64,

    /// Confidence level of the intervals
    pub confidence: f64,

    /// Metrics gating convergence
    pub gate: ConvergenceGate,

    /// Packets transmitted per drop
    pub n_pcks: usize,

    /// Packets discarded at the beginning of each drop
    pub n_warm_up_pcks: usize,

    /// Bits per packet
    pub n_bits: usize,

    /// Transmission rate (throughput unit, e.g. Mbps)
    pub tx_rate: f64,

    /// Swept parameter
    pub sweep: SweepConfig,

    /// Channel model
    pub channel: ChannelConfig,

    /// Link chain
    pub link: LinkConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            policy: TerminationPolicy::FixedConf,
            seeds: (1..=10).collect(),
            max_drops: 50,
            conf_range: 0.01,
            confidence: 0.95,
            gate: ConvergenceGate::Ber,
            n_pcks: 1000,
            n_warm_up_pcks: 10,
            n_bits: 1000,
            tx_rate: 50.0,
            sweep: SweepConfig {
                axis: SweepAxis::ErrorProbability,
                points: logspace(-4.0, -2.0, 5),
            },
            channel: ChannelConfig::default(),
            link: LinkConfig::default(),
        }
    }
}

impl SimConfig {
    /// Number of SNR indices
    pub fn n_snr(&self) -> usize {
        self.sweep.points.len()
    }

    /// Channel flip probability of an SNR index
    pub fn lane_p(&self, idx: SnrIndex) -> f64 {
        match self.sweep.axis {
            SweepAxis::ErrorProbability => self.sweep.points[idx],
            SweepAxis::EbN0Db => self.channel.p,
        }
    }

    /// Link Eb/N0 (dB) of an SNR index
    pub fn lane_ebn0_db(&self, idx: SnrIndex) -> f64 {
        match self.sweep.axis {
            SweepAxis::EbN0Db => self.sweep.points[idx],
            SweepAxis::ErrorProbability => self.link.ebn0_db,
        }
    }

    /// Check every constraint the simulation relies on
    pub fn validate(&self) -> Result<(), SimError> {
        if self.sweep.points.is_empty() {
            return invalid("sweep has no points");
        }
        match self.sweep.axis {
            SweepAxis::ErrorProbability => {
                if let Some(p) = self.sweep.points.iter().find(|p| !(0.0..=1.0).contains(*p)) {
                    return invalid(format!("swept error probability {} outside [0, 1]", p));
                }
            }
            SweepAxis::EbN0Db => {
                if self.link.kind != LinkKind::AwgnBpsk {
                    return invalid("an Eb/N0 sweep needs the awgn_bpsk link");
                }
                if self.sweep.points.iter().any(|p| !p.is_finite()) {
                    return invalid("swept Eb/N0 values must be finite");
                }
            }
        }
        if !(0.0..=1.0).contains(&self.channel.p) {
            return invalid(format!("channel p {} outside [0, 1]", self.channel.p));
        }
        if !self.link.ebn0_db.is_finite() {
            return invalid("link Eb/N0 must be finite");
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return invalid(format!("confidence {} outside (0, 1)", self.confidence));
        }
        if !(self.conf_range >= 0.0) {
            return invalid(format!("conf_range {} must be >= 0", self.conf_range));
        }
        if self.n_bits == 0 {
            return invalid("packets need at least one bit");
        }
        if self.n_pcks <= self.n_warm_up_pcks {
            return invalid(format!(
                "n_pcks ({}) must exceed n_warm_up_pcks ({})",
                self.n_pcks, self.n_warm_up_pcks
            ));
        }
        if !(self.tx_rate > 0.0) {
            return invalid(format!("tx_rate {} must be positive", self.tx_rate));
        }
        if self.max_drops < 2 {
            return invalid("max_drops must be at least 2 to form a confidence interval");
        }
        if self.policy == TerminationPolicy::FixedSeeds && self.seeds.len() < self.max_drops {
            return invalid(format!(
                "fixed_seeds needs {} seeds, got {}",
                self.max_drops,
                self.seeds.len()
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Scenario Files
// ============================================================================

/// YAML scenario file
#[derive(Debug, Deserialize)]
pub struct ScenarioFile {
    /// Scenario metadata
    #[serde(default)]
    pub meta: ScenarioMeta,

    /// Configuration overrides on top of `SimConfig::default()`
    #[serde(default)]
    pub config: ScenarioConfig,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ScenarioMeta {
    pub name: Option<String>,
    pub description: Option<String>,
    pub hypothesis: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScenarioConfig {
    simulation_type: Option<String>,
    seeds: Option<Vec<Seed>>,
    max_drops: Option<usize>,
    conf_range: Option<f64>,
    confidence: Option<f64>,
    convergence_gate: Option<String>,
    n_pcks: Option<usize>,
    n_warm_up_pcks: Option<usize>,
    n_bits: Option<usize>,
    tx_rate: Option<f64>,

    #[serde(default)]
    sweep: Option<SweepOverrides>,

    #[serde(default)]
    channel: Option<ChannelOverrides>,

    #[serde(default)]
    link: Option<LinkOverrides>,
}

#[derive(Debug, Default, Deserialize)]
struct SweepOverrides {
    axis: Option<String>,
    points: Option<Vec<f64>>,
    logspace: Option<RangeSpec>,
    linspace: Option<RangeSpec>,
}

#[derive(Debug, Deserialize)]
struct RangeSpec {
    start: f64,
    stop: f64,
    num: usize,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelOverrides {
    model: Option<String>,
    p: Option<f64>,
    transition_matrix: Option<Vec<Vec<f64>>>,
    markov_reseed: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LinkOverrides {
    kind: Option<String>,
    ebn0_db: Option<f64>,
}

impl ScenarioFile {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SimError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SimError> {
        let yaml = fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Apply the overrides to the default configuration and validate
    pub fn build_config(&self) -> Result<SimConfig, SimError> {
        let mut config = SimConfig::default();
        let overrides = &self.config;

        if let Some(ref v) = overrides.simulation_type {
            config.policy = v.parse()?;
        }
        if let Some(ref v) = overrides.seeds {
            config.seeds = v.clone();
        }
        if let Some(v) = overrides.max_drops {
            config.max_drops = v;
        }
        if let Some(v) = overrides.conf_range {
            config.conf_range = v;
        }
        if let Some(v) = overrides.confidence {
            config.confidence = v;
        }
        if let Some(ref v) = overrides.convergence_gate {
            config.gate = v.parse()?;
        }
        if let Some(v) = overrides.n_pcks {
            config.n_pcks = v;
        }
        if let Some(v) = overrides.n_warm_up_pcks {
            config.n_warm_up_pcks = v;
        }
        if let Some(v) = overrides.n_bits {
            config.n_bits = v;
        }
        if let Some(v) = overrides.tx_rate {
            config.tx_rate = v;
        }

        if let Some(ref sweep) = overrides.sweep {
            if let Some(ref v) = sweep.axis {
                config.sweep.axis = v.parse()?;
            }
            let explicit = [
                sweep.points.is_some(),
                sweep.logspace.is_some(),
                sweep.linspace.is_some(),
            ];
            if explicit.iter().filter(|&&set| set).count() > 1 {
                return invalid("sweep takes only one of points, logspace, linspace");
            }
            if let Some(ref v) = sweep.points {
                config.sweep.points = v.clone();
            }
            if let Some(ref r) = sweep.logspace {
                config.sweep.points = logspace(r.start, r.stop, r.num);
            }
            if let Some(ref r) = sweep.linspace {
                config.sweep.points = linspace(r.start, r.stop, r.num);
            }
        }

        if let Some(ref channel) = overrides.channel {
            if let Some(ref v) = channel.model {
                config.channel.kind = v.parse::<ChannelKind>()?;
            }
            if let Some(v) = channel.p {
                config.channel.p = v;
            }
            if let Some(ref rows) = channel.transition_matrix {
                config.channel.transition = TransitionMatrix::from_rows(rows)?;
            }
            if let Some(ref v) = channel.markov_reseed {
                config.channel.markov_reseed = v.parse::<MarkovReseed>()?;
            }
        }

        if let Some(ref link) = overrides.link {
            if let Some(ref v) = link.kind {
                config.link.kind = v.parse::<LinkKind>()?;
            }
            if let Some(v) = link.ebn0_db {
                config.link.ebn0_db = v;
            }
        }

        config.validate()?;
        Ok(config)
    }
}
