//! Channel Models
//!
//! Stochastic bit-corruption processes applied to every packet before the
//! link chain:
//!
//! - **Ideal**: returns the packet untouched, draws no random numbers
//! - **ConstantBsc**: binary symmetric channel with a fixed flip probability
//! - **MarkovBsc**: binary symmetric channel modulated by a 3-state Markov chain
//!
//! The Markov channel picks the flip probability of the whole packet from its
//! current state (GOOD = 0, BAD = 0.5, UGLY = `p`) and moves to the next state
//! after every packet:
//!
//! ```text
//!         | P00 P01 P02 |
//!     T = | P10 P11 P12 |     rows sum to 1
//!         | P20 P21 P22 |
//! ```
//!
//! Channels are built once with `build_channel` and reseeded between drops.

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::mc_interface::{
    derive_seed, invalid, Bit, ControlMessage, Packet, Seed, SimError, Stochastic,
};

/// Tolerance for transition matrix row sums
const ROW_SUM_TOLERANCE: f64 = 1e-9;

// ============================================================================
// Configuration
// ============================================================================

/// Channel model selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Ideal,
    Constant,
    Markov,
}

impl FromStr for ChannelKind {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ideal" => Ok(ChannelKind::Ideal),
            "constant" | "bsc" => Ok(ChannelKind::Constant),
            "markov" => Ok(ChannelKind::Markov),
            other => invalid(format!("unknown channel model '{}'", other)),
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelKind::Ideal => "ideal",
            ChannelKind::Constant => "constant",
            ChannelKind::Markov => "markov",
        };
        f.write_str(name)
    }
}

/// What a reseed does to the Markov chain state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkovReseed {
    /// Keep the current state across drops (only the random stream restarts)
    #[default]
    Persist,

    /// Restart from GOOD on every reseed
    ResetToGood,
}

impl FromStr for MarkovReseed {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "persist" => Ok(MarkovReseed::Persist),
            "reset_to_good" | "reset" => Ok(MarkovReseed::ResetToGood),
            other => invalid(format!("unknown markov reseed policy '{}'", other)),
        }
    }
}

/// States of the Markov channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkovState {
    Good = 0,
    Bad = 1,
    Ugly = 2,
}

impl MarkovState {
    pub const ALL: [MarkovState; 3] = [MarkovState::Good, MarkovState::Bad, MarkovState::Ugly];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Bit error probability while in this state
    pub fn ber(self, p: f64) -> f64 {
        match self {
            MarkovState::Good => 0.0,
            MarkovState::Bad => 0.5,
            MarkovState::Ugly => p,
        }
    }
}

/// Row-stochastic 3x3 transition matrix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionMatrix {
    rows: [[f64; 3]; 3],
}

impl TransitionMatrix {
    /// Validate and wrap a matrix
    pub fn new(rows: [[f64; 3]; 3]) -> Result<Self, SimError> {
        for (i, row) in rows.iter().enumerate() {
            if row.iter().any(|&p| !(0.0..=1.0).contains(&p)) {
                return invalid(format!(
                    "transition matrix row {} has an entry outside [0, 1]: {:?}",
                    i, row
                ));
            }
            let sum: f64 = row.iter().sum();
            if (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
                return invalid(format!(
                    "transition matrix row {} sums to {} instead of 1",
                    i, sum
                ));
            }
        }
        Ok(Self { rows })
    }

    /// Build from a nested vector (scenario files)
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, SimError> {
        if rows.len() != 3 || rows.iter().any(|r| r.len() != 3) {
            return invalid("transition matrix must be 3x3");
        }
        let mut m = [[0.0; 3]; 3];
        for (i, row) in rows.iter().enumerate() {
            m[i].copy_from_slice(row);
        }
        Self::new(m)
    }

    pub fn row(&self, state: MarkovState) -> &[f64; 3] {
        &self.rows[state.index()]
    }

    pub fn rows(&self) -> &[[f64; 3]; 3] {
        &self.rows
    }
}

impl Default for TransitionMatrix {
    fn default() -> Self {
        // Every state returns to GOOD with 0.8, BAD 0.1, UGLY 0.1
        Self {
            rows: [[0.8, 0.1, 0.1], [0.8, 0.1, 0.1], [0.8, 0.1, 0.1]],
        }
    }
}

/// Channel configuration shared by all SNR lanes
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Channel model
    pub kind: ChannelKind,

    /// Flip probability of the constant channel and of the Markov UGLY state
    pub p: f64,

    /// Markov transition matrix (ignored by the other models)
    pub transition: TransitionMatrix,

    /// Markov state handling on reseed
    pub markov_reseed: MarkovReseed,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            kind: ChannelKind::Constant,
            p: 1e-4,
            transition: TransitionMatrix::default(),
            markov_reseed: MarkovReseed::Persist,
        }
    }
}

// ============================================================================
// Channel Trait
// ============================================================================

/// A bit-corrupting propagation model
pub trait Channel: Stochastic {
    /// Corrupt a packet; advances the random stream (and the Markov state)
    fn propagate(&mut self, bits: &[Bit]) -> Packet;

    fn kind(&self) -> ChannelKind;

    /// Seed currently driving the random stream
    fn seed(&self) -> Seed;

    /// Restart the random stream from `seed`
    fn set_seed(&mut self, seed: Seed);
}

/// Build the channel variant selected by `config`.
///
/// `p` overrides `config.p` (sweeps over the error probability give every
/// lane its own value). `stream` selects the lane's random stream.
pub fn build_channel(
    config: &ChannelConfig,
    p: f64,
    seed: Seed,
    stream: u64,
) -> Result<Box<dyn Channel>, SimError> {
    if !(0.0..=1.0).contains(&p) {
        return invalid(format!("channel error probability {} outside [0, 1]", p));
    }
    let channel: Box<dyn Channel> = match config.kind {
        ChannelKind::Ideal => Box::new(IdealChannel::new(seed, stream)),
        ChannelKind::Constant => Box::new(ConstantBsc::new(p, seed, stream)),
        ChannelKind::Markov => Box::new(MarkovBsc::new(
            p,
            config.transition,
            config.markov_reseed,
            seed,
            stream,
        )),
    };
    Ok(channel)
}

/// Flip every bit independently with probability `p`
fn flip_bits(rng: &mut StdRng, bits: &[Bit], p: f64) -> Packet {
    bits.iter()
        .map(|&bit| if rng.gen::<f64>() < p { bit ^ 1 } else { bit })
        .collect()
}

// ============================================================================
// Ideal Channel
// ============================================================================

/// Noiseless channel
#[derive(Debug, Clone)]
pub struct IdealChannel {
    seed: Seed,
    stream: u64,
}

impl IdealChannel {
    pub fn new(seed: Seed, stream: u64) -> Self {
        Self {
            seed: derive_seed(seed, stream),
            stream,
        }
    }
}

impl Stochastic for IdealChannel {
    fn handle_control(&mut self, msg: &ControlMessage) {
        match *msg {
            ControlMessage::ResetSeed(seed) => self.set_seed(derive_seed(seed, self.stream)),
        }
    }
}

impl Channel for IdealChannel {
    fn propagate(&mut self, bits: &[Bit]) -> Packet {
        bits.to_vec()
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Ideal
    }

    fn seed(&self) -> Seed {
        self.seed
    }

    fn set_seed(&mut self, seed: Seed) {
        self.seed = seed;
    }
}

// ============================================================================
// Constant BSC
// ============================================================================

/// Binary symmetric channel with a fixed flip probability
#[derive(Debug, Clone)]
pub struct ConstantBsc {
    p: f64,
    seed: Seed,
    stream: u64,
    rng: StdRng,
}

impl ConstantBsc {
    pub fn new(p: f64, seed: Seed, stream: u64) -> Self {
        let seed = derive_seed(seed, stream);
        Self {
            p,
            seed,
            stream,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn p(&self) -> f64 {
        self.p
    }

    pub fn set_p(&mut self, p: f64) {
        self.p = p;
    }
}

impl Stochastic for ConstantBsc {
    fn handle_control(&mut self, msg: &ControlMessage) {
        match *msg {
            ControlMessage::ResetSeed(seed) => self.set_seed(derive_seed(seed, self.stream)),
        }
    }
}

impl Channel for ConstantBsc {
    fn propagate(&mut self, bits: &[Bit]) -> Packet {
        flip_bits(&mut self.rng, bits, self.p)
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Constant
    }

    fn seed(&self) -> Seed {
        self.seed
    }

    fn set_seed(&mut self, seed: Seed) {
        self.seed = seed;
        self.rng = StdRng::seed_from_u64(seed);
    }
}

// ============================================================================
// Markov-modulated BSC
// ============================================================================

/// Binary symmetric channel driven by a GOOD / BAD / UGLY Markov chain
#[derive(Debug, Clone)]
pub struct MarkovBsc {
    p: f64,
    transition: TransitionMatrix,
    reseed: MarkovReseed,
    state: MarkovState,
    seed: Seed,
    stream: u64,
    rng: StdRng,
}

impl MarkovBsc {
    pub fn new(
        p: f64,
        transition: TransitionMatrix,
        reseed: MarkovReseed,
        seed: Seed,
        stream: u64,
    ) -> Self {
        let seed = derive_seed(seed, stream);
        Self {
            p,
            transition,
            reseed,
            state: MarkovState::Good,
            seed,
            stream,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// State used for the next packet
    pub fn state(&self) -> MarkovState {
        self.state
    }

    pub fn transition(&self) -> &TransitionMatrix {
        &self.transition
    }

    /// Draw the next state from the current row's cumulative distribution.
    ///
    /// The new state is the smallest index whose cumulative probability is
    /// strictly greater than the uniform draw.
    fn next_state(&mut self) -> MarkovState {
        let u: f64 = self.rng.gen();
        let row = self.transition.row(self.state);

        let mut cumulative = 0.0;
        let mut last_reachable = self.state;
        for (state, &prob) in MarkovState::ALL.iter().zip(row.iter()) {
            cumulative += prob;
            if prob > 0.0 {
                last_reachable = *state;
            }
            if cumulative > u {
                return *state;
            }
        }
        // Row sum rounded just below u
        last_reachable
    }
}

impl Stochastic for MarkovBsc {
    fn handle_control(&mut self, msg: &ControlMessage) {
        match *msg {
            ControlMessage::ResetSeed(seed) => self.set_seed(derive_seed(seed, self.stream)),
        }
    }
}

impl Channel for MarkovBsc {
    fn propagate(&mut self, bits: &[Bit]) -> Packet {
        let ber = self.state.ber(self.p);
        let received = flip_bits(&mut self.rng, bits, ber);
        self.state = self.next_state();
        received
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Markov
    }

    fn seed(&self) -> Seed {
        self.seed
    }

    fn set_seed(&mut self, seed: Seed) {
        self.seed = seed;
        self.rng = StdRng::seed_from_u64(seed);
        if self.reseed == MarkovReseed::ResetToGood {
            self.state = MarkovState::Good;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mc_theoretical::stationary_distribution;

    fn zeros(n: usize) -> Packet {
        vec![0; n]
    }

    fn count_ones(bits: &[Bit]) -> usize {
        bits.iter().filter(|&&b| b == 1).count()
    }

    #[test]
    fn test_channel_kind_parsing() {
        assert_eq!("ideal".parse::<ChannelKind>().unwrap(), ChannelKind::Ideal);
        assert_eq!("Constant".parse::<ChannelKind>().unwrap(), ChannelKind::Constant);
        assert_eq!("markov".parse::<ChannelKind>().unwrap(), ChannelKind::Markov);

        let err = "rayleigh".parse::<ChannelKind>().unwrap_err();
        assert!(matches!(err, SimError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_ideal_channel_is_identity() {
        let bits: Packet = (0..1000).map(|i| (i % 3 == 0) as Bit).collect();
        for seed in [0, 1, 42, u64::MAX] {
            let mut channel = IdealChannel::new(seed, 0);
            assert_eq!(channel.propagate(&bits), bits);
            // No random draws: repeating after a reseed is still the identity
            channel.handle_control(&ControlMessage::ResetSeed(seed));
            assert_eq!(channel.propagate(&bits), bits);
        }
    }

    #[test]
    fn test_constant_channel_extremes() {
        let bits = zeros(1000);

        let mut never = ConstantBsc::new(0.0, 10, 0);
        for _ in 0..10 {
            assert_eq!(count_ones(&never.propagate(&bits)), 0);
        }

        let mut always = ConstantBsc::new(1.0, 10, 0);
        for _ in 0..10 {
            assert_eq!(count_ones(&always.propagate(&bits)), 1000);
        }
    }

    #[test]
    fn test_constant_channel_half_flips_about_half() {
        let mut channel = ConstantBsc::new(0.5, 10, 0);
        let bits = zeros(1000);
        for _ in 0..20 {
            let errors = count_ones(&channel.propagate(&bits)) as f64;
            assert!(
                (errors - 500.0).abs() <= 50.0,
                "expected ~500 flips, got {}",
                errors
            );
        }
    }

    #[test]
    fn test_reseed_replays_stream() {
        let bits = zeros(256);
        let mut channel = ConstantBsc::new(0.3, 7, 0);
        let first = channel.propagate(&bits);
        let second = channel.propagate(&bits);
        assert_ne!(first, second);

        channel.set_seed(7);
        assert_eq!(channel.propagate(&bits), first);
        assert_eq!(channel.seed(), 7);
    }

    #[test]
    fn test_markov_first_packet_uses_good_state() {
        let matrix = TransitionMatrix::new([[0.0, 1.0, 0.0]; 3]).unwrap();
        let mut channel = MarkovBsc::new(0.1, matrix, MarkovReseed::Persist, 3, 0);
        assert_eq!(channel.state(), MarkovState::Good);

        let received = channel.propagate(&zeros(500));
        assert_eq!(count_ones(&received), 0, "GOOD state must not flip bits");
        assert_eq!(channel.state(), MarkovState::Bad);
    }

    #[test]
    fn test_markov_state_indices() {
        for (i, state) in MarkovState::ALL.iter().enumerate() {
            assert_eq!(MarkovState::from_index(i), Some(*state));
            assert_eq!(state.index(), i);
        }
        assert_eq!(MarkovState::from_index(3), None);
        assert_eq!(MarkovState::Ugly.ber(0.02), 0.02);
    }

    #[test]
    fn test_constant_channel_set_p() {
        let bits = zeros(200);
        let mut channel = ConstantBsc::new(0.0, 4, 0);
        assert_eq!(channel.p(), 0.0);
        assert_eq!(count_ones(&channel.propagate(&bits)), 0);

        channel.set_p(1.0);
        assert_eq!(channel.p(), 1.0);
        assert_eq!(count_ones(&channel.propagate(&bits)), 200);
    }

    #[test]
    fn test_markov_states_stay_in_range() {
        let mut channel = MarkovBsc::new(
            0.01,
            TransitionMatrix::default(),
            MarkovReseed::Persist,
            99,
            0,
        );
        let bits = zeros(8);
        for _ in 0..1000 {
            channel.propagate(&bits);
            assert!(channel.state().index() <= 2);
        }
    }

    #[test]
    fn test_markov_occupancy_matches_stationary_distribution() {
        let matrix =
            TransitionMatrix::new([[0.9, 0.05, 0.05], [0.3, 0.6, 0.1], [0.2, 0.2, 0.6]]).unwrap();
        let mut channel = MarkovBsc::new(0.01, matrix, MarkovReseed::Persist, 2024, 0);
        assert_eq!(*channel.transition(), matrix);
        let expected = stationary_distribution(channel.transition());

        let steps = 200_000;
        let mut visits = [0usize; 3];
        let bits = zeros(1);
        for _ in 0..steps {
            visits[channel.state().index()] += 1;
            channel.propagate(&bits);
        }

        for state in 0..3 {
            let observed = visits[state] as f64 / steps as f64;
            assert!(
                (observed - expected[state]).abs() < 0.01,
                "state {}: observed {} expected {}",
                state,
                observed,
                expected[state]
            );
        }
    }

    #[test]
    fn test_markov_reseed_policies() {
        let matrix = TransitionMatrix::new([[0.0, 0.0, 1.0]; 3]).unwrap();
        let bits = zeros(4);

        let mut persist = MarkovBsc::new(0.2, matrix, MarkovReseed::Persist, 1, 0);
        persist.propagate(&bits);
        assert_eq!(persist.state(), MarkovState::Ugly);
        persist.handle_control(&ControlMessage::ResetSeed(5));
        assert_eq!(persist.state(), MarkovState::Ugly);

        let mut reset = MarkovBsc::new(0.2, matrix, MarkovReseed::ResetToGood, 1, 0);
        reset.propagate(&bits);
        assert_eq!(reset.state(), MarkovState::Ugly);
        reset.handle_control(&ControlMessage::ResetSeed(5));
        assert_eq!(reset.state(), MarkovState::Good);
    }

    #[test]
    fn test_transition_matrix_validation() {
        assert!(TransitionMatrix::new([[0.5, 0.5, 0.0]; 3]).is_ok());

        let bad_sum = TransitionMatrix::new([[0.5, 0.4, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        assert!(matches!(bad_sum, Err(SimError::InvalidConfiguration(_))));

        let negative = TransitionMatrix::new([[1.2, -0.2, 0.0]; 3]);
        assert!(matches!(negative, Err(SimError::InvalidConfiguration(_))));

        let ragged = TransitionMatrix::from_rows(&[vec![1.0, 0.0], vec![1.0, 0.0, 0.0]]);
        assert!(matches!(ragged, Err(SimError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_build_channel_selects_variant() {
        let mut config = ChannelConfig::default();
        for kind in [ChannelKind::Ideal, ChannelKind::Constant, ChannelKind::Markov] {
            config.kind = kind;
            let channel = build_channel(&config, 0.1, 1, 0).unwrap();
            assert_eq!(channel.kind(), kind);
        }

        let err = build_channel(&config, 1.5, 1, 0);
        assert!(matches!(err, Err(SimError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_streams_are_independent() {
        let bits = zeros(512);
        let mut a = ConstantBsc::new(0.5, 11, 1);
        let mut b = ConstantBsc::new(0.5, 11, 2);
        assert_ne!(a.propagate(&bits), b.propagate(&bits));
    }
}
