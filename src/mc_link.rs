//! Link Chains
//!
//! The part of the transmission between the channel and the receiver's
//! decision: modulation, additive noise and hard-decision demodulation.
//!
//! - `PassThroughLink`: no noise, the channel output is delivered as is
//! - `AwgnBpskLink`: BPSK mapping (0 -> -1, 1 -> +1), real AWGN at a given
//!   Eb/N0, hard decision `x > 0`
//!
//! With unit bit energy the noise variance per real dimension is
//! `N0 / 2 = 1 / (2 Eb/N0)`, so the raw BER is `0.5 erfc(sqrt(Eb/N0))`.

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::mc_interface::{
    derive_seed, invalid, Bit, ControlMessage, LinkChain, Packet, Seed, SimError, Stochastic,
};

/// Link chain selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Deliver the channel output unchanged
    PassThrough,

    /// BPSK over AWGN with hard decision
    AwgnBpsk,
}

impl FromStr for LinkKind {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "pass_through" | "passthrough" => Ok(LinkKind::PassThrough),
            "awgn" | "awgn_bpsk" | "bpsk" => Ok(LinkKind::AwgnBpsk),
            other => invalid(format!("unknown link chain '{}'", other)),
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::PassThrough => f.write_str("pass_through"),
            LinkKind::AwgnBpsk => f.write_str("awgn_bpsk"),
        }
    }
}

/// Link configuration shared by all SNR lanes
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub kind: LinkKind,

    /// Eb/N0 in dB used when the sweep is not over Eb/N0
    pub ebn0_db: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            kind: LinkKind::PassThrough,
            ebn0_db: 10.0,
        }
    }
}

/// Build the link chain of one lane
pub fn build_link(
    config: &LinkConfig,
    ebn0_db: f64,
    seed: Seed,
    stream: u64,
) -> Result<Box<dyn LinkChain>, SimError> {
    match config.kind {
        LinkKind::PassThrough => Ok(Box::new(PassThroughLink)),
        LinkKind::AwgnBpsk => Ok(Box::new(AwgnBpskLink::new(ebn0_db, seed, stream)?)),
    }
}

/// Convert dB to a linear ratio
pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

// ============================================================================
// Pass-through
// ============================================================================

/// Noiseless link
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughLink;

impl Stochastic for PassThroughLink {
    fn handle_control(&mut self, _msg: &ControlMessage) {}
}

impl LinkChain for PassThroughLink {
    fn transmit(&mut self, bits: &[Bit]) -> Packet {
        bits.to_vec()
    }
}

// ============================================================================
// BPSK over AWGN
// ============================================================================

/// BPSK modulator, AWGN and hard-decision demodulator
#[derive(Debug, Clone)]
pub struct AwgnBpskLink {
    ebn0_db: f64,
    noise: Normal<f64>,
    stream: u64,
    rng: StdRng,
}

impl AwgnBpskLink {
    pub fn new(ebn0_db: f64, seed: Seed, stream: u64) -> Result<Self, SimError> {
        Ok(Self {
            ebn0_db,
            noise: Self::noise_for(ebn0_db)?,
            stream,
            rng: StdRng::seed_from_u64(derive_seed(seed, stream)),
        })
    }

    fn noise_for(ebn0_db: f64) -> Result<Normal<f64>, SimError> {
        let std_dev = (1.0 / (2.0 * db_to_linear(ebn0_db))).sqrt();
        Normal::new(0.0, std_dev).map_err(|e| {
            SimError::InvalidConfiguration(format!("Eb/N0 of {} dB is unusable: {}", ebn0_db, e))
        })
    }

    pub fn ebn0_db(&self) -> f64 {
        self.ebn0_db
    }

    pub fn set_ebn0_db(&mut self, ebn0_db: f64) -> Result<(), SimError> {
        self.noise = Self::noise_for(ebn0_db)?;
        self.ebn0_db = ebn0_db;
        Ok(())
    }

    /// Noise standard deviation per real dimension
    pub fn noise_std(&self) -> f64 {
        self.noise.std_dev()
    }
}

impl Stochastic for AwgnBpskLink {
    fn handle_control(&mut self, msg: &ControlMessage) {
        match *msg {
            ControlMessage::ResetSeed(seed) => {
                self.rng = StdRng::seed_from_u64(derive_seed(seed, self.stream))
            }
        }
    }
}

impl LinkChain for AwgnBpskLink {
    fn transmit(&mut self, bits: &[Bit]) -> Packet {
        bits.iter()
            .map(|&bit| {
                let symbol = 2.0 * bit as f64 - 1.0;
                let received = symbol + self.noise.sample(&mut self.rng);
                (received > 0.0) as Bit
            })
            .collect()
    }
}
