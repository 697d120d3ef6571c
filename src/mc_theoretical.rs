//! Closed-form reference curves
//!
//! Expected BER, PER and throughput for every SNR index of a configuration,
//! used to validate the Monte-Carlo estimates.
//!
//! The channel and the link are two independent binary symmetric stages, so a
//! channel flip probability `b` followed by a link flip probability `q` give
//! an end-to-end flip probability of `b + q - 2bq`. The Markov channel is
//! averaged over the stationary distribution of its chain.

use log::debug;

use crate::mc_channel::{ChannelConfig, ChannelKind, MarkovState, TransitionMatrix};
use crate::mc_config::SimConfig;
use crate::mc_link::{db_to_linear, LinkKind};
use crate::mc_special::erfc;

/// Theoretical curves, one value per SNR index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TheoreticalCurves {
    pub ber: Vec<f64>,
    pub per: Vec<f64>,
    pub throughput: Vec<f64>,
}

/// Raw BER of hard-decision BPSK over AWGN
pub fn awgn_bpsk_ber(ebn0_db: f64) -> f64 {
    0.5 * erfc(db_to_linear(ebn0_db).sqrt())
}

/// Probability that a packet of `n_bits` has at least one error
pub fn packet_error_rate(ber: f64, n_bits: usize) -> f64 {
    -(n_bits as f64 * (-ber).ln_1p()).exp_m1()
}

/// Flip probability of two independent binary symmetric stages in series
pub fn cascade(b: f64, q: f64) -> f64 {
    b + q - 2.0 * b * q
}

/// Stationary distribution of a 3-state chain.
///
/// Solves `pi P = pi`, `sum(pi) = 1`. Chains with several closed classes have
/// no unique answer; they fall back to the long-run average of a chain
/// started in GOOD.
pub fn stationary_distribution(matrix: &TransitionMatrix) -> [f64; 3] {
    let p = matrix.rows();

    // (P^T - I) with the last equation replaced by the normalization
    let mut a = [[0.0; 4]; 3];
    for i in 0..3 {
        for j in 0..3 {
            a[i][j] = p[j][i] - if i == j { 1.0 } else { 0.0 };
        }
    }
    a[2] = [1.0, 1.0, 1.0, 1.0];

    match solve3(a) {
        Some(pi) => pi,
        None => {
            debug!("transition matrix has no unique stationary distribution; averaging from GOOD");
            long_run_average(matrix, MarkovState::Good, 10_000)
        }
    }
}

/// Gaussian elimination with partial pivoting on an augmented 3x4 system
fn solve3(mut a: [[f64; 4]; 3]) -> Option<[f64; 3]> {
    const SINGULAR: f64 = 1e-12;

    for col in 0..3 {
        let pivot = (col..3).max_by(|&x, &y| a[x][col].abs().total_cmp(&a[y][col].abs()))?;
        if a[pivot][col].abs() < SINGULAR {
            return None;
        }
        a.swap(col, pivot);

        for row in 0..3 {
            if row == col {
                continue;
            }
            let factor = a[row][col] / a[col][col];
            for k in col..4 {
                a[row][k] -= factor * a[col][k];
            }
        }
    }

    Some([a[0][3] / a[0][0], a[1][3] / a[1][1], a[2][3] / a[2][2]])
}

/// Cesaro average of the state distribution over `steps` transitions
fn long_run_average(matrix: &TransitionMatrix, start: MarkovState, steps: usize) -> [f64; 3] {
    let p = matrix.rows();
    let mut dist = [0.0; 3];
    dist[start.index()] = 1.0;
    let mut sum = [0.0; 3];

    for _ in 0..steps {
        for (s, total) in sum.iter_mut().enumerate() {
            *total += dist[s];
        }
        let mut next = [0.0; 3];
        for (i, &mass) in dist.iter().enumerate() {
            for (j, n) in next.iter_mut().enumerate() {
                *n += mass * p[i][j];
            }
        }
        dist = next;
    }
    sum.map(|s| s / steps as f64)
}

/// Closed-form validator for one configuration
#[derive(Debug, Clone)]
pub struct Theoretical {
    n_bits: usize,
    tx_rate: f64,
    channel: ChannelConfig,
    link: LinkKind,
    /// (channel p, link Eb/N0 dB) per SNR index
    lanes: Vec<(f64, f64)>,
    stationary: Option<[f64; 3]>,
}

impl Theoretical {
    pub fn new(config: &SimConfig) -> Self {
        let stationary = match config.channel.kind {
            ChannelKind::Markov => Some(stationary_distribution(&config.channel.transition)),
            _ => None,
        };
        Self {
            n_bits: config.n_bits,
            tx_rate: config.tx_rate,
            channel: config.channel.clone(),
            link: config.link.kind,
            lanes: (0..config.n_snr())
                .map(|idx| (config.lane_p(idx), config.lane_ebn0_db(idx)))
                .collect(),
            stationary,
        }
    }

    /// Stationary state probabilities (Markov channel only)
    pub fn stationary(&self) -> Option<[f64; 3]> {
        self.stationary
    }

    fn link_ber(&self, ebn0_db: f64) -> f64 {
        match self.link {
            LinkKind::PassThrough => 0.0,
            LinkKind::AwgnBpsk => awgn_bpsk_ber(ebn0_db),
        }
    }

    /// Expected (ber, per) of one SNR index
    fn lane(&self, p: f64, ebn0_db: f64) -> (f64, f64) {
        let q = self.link_ber(ebn0_db);
        match (self.channel.kind, self.stationary) {
            (ChannelKind::Markov, Some(pi)) => {
                MarkovState::ALL
                    .iter()
                    .fold((0.0, 0.0), |(ber, per), &state| {
                        let b = cascade(state.ber(p), q);
                        let weight = pi[state.index()];
                        (
                            ber + weight * b,
                            per + weight * packet_error_rate(b, self.n_bits),
                        )
                    })
            }
            (ChannelKind::Constant, _) | (ChannelKind::Markov, None) => {
                let b = cascade(p, q);
                (b, packet_error_rate(b, self.n_bits))
            }
            (ChannelKind::Ideal, _) => (q, packet_error_rate(q, self.n_bits)),
        }
    }

    /// Reference curves for every SNR index
    pub fn validate(&self) -> TheoreticalCurves {
        let mut curves = TheoreticalCurves::default();
        for &(p, ebn0_db) in &self.lanes {
            let (ber, per) = self.lane(p, ebn0_db);
            curves.ber.push(ber);
            curves.per.push(per);
            curves.throughput.push(self.tx_rate * (1.0 - per));
        }
        curves
    }
}
