//! Packet source: generates ground-truth packets and counts errors

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::mc_interface::{Bit, ControlMessage, Packet, PacketSource, Seed, Stochastic};

/// Uniform random bit source
#[derive(Debug, Clone)]
pub struct BitSource {
    n_bits: usize,
    seed: Seed,
    rng: StdRng,
    last_packet: Packet,
}

impl BitSource {
    pub fn new(n_bits: usize, seed: Seed) -> Self {
        Self {
            n_bits,
            seed,
            rng: StdRng::seed_from_u64(seed),
            last_packet: vec![0; n_bits],
        }
    }

    pub fn n_bits(&self) -> usize {
        self.n_bits
    }

    pub fn seed(&self) -> Seed {
        self.seed
    }

    pub fn set_seed(&mut self, seed: Seed) {
        self.seed = seed;
        self.rng = StdRng::seed_from_u64(seed);
    }
}

impl Stochastic for BitSource {
    fn handle_control(&mut self, msg: &ControlMessage) {
        match *msg {
            ControlMessage::ResetSeed(seed) => self.set_seed(seed),
        }
    }
}

impl PacketSource for BitSource {
    fn generate_packet(&mut self) -> Packet {
        let packet: Packet = (0..self.n_bits)
            .map(|_| self.rng.gen_range(0..=1) as Bit)
            .collect();
        self.last_packet.clone_from(&packet);
        packet
    }

    fn last_packet(&self) -> &[Bit] {
        &self.last_packet
    }

    fn compare(&self, received: &[Bit]) -> (usize, bool) {
        let mut errors = self
            .last_packet
            .iter()
            .zip(received.iter())
            .filter(|(tx, rx)| tx != rx)
            .count();
        // Truncated or padded packets count the missing/extra bits as errors
        errors += self.last_packet.len().abs_diff(received.len());
        (errors, errors != 0)
    }
}
