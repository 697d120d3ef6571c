//! Statistics Accumulator
//!
//! Collects per-trial error counts for every SNR index, turns them into
//! per-iteration BER / PER / throughput samples, and decides per index when
//! the confidence interval of those samples is tight enough.
//!
//! ## Lifecycle of one SNR index
//!
//! 1. `record_trial` appends to the in-flight accumulators (skipped once the
//!    index has converged)
//! 2. `finalize_iteration` turns the in-flight data into one historical sample
//!    per metric and resets the in-flight data
//! 3. `check_convergence` freezes the index's summary when the relative
//!    half-width passes the gate; `force_accept_all` freezes whatever is left
//! 4. `wrap_up` summarizes and clears the historical samples

use std::fmt;
use std::str::FromStr;

use log::{debug, warn};

use crate::mc_interface::{invalid, SimError, SnrIndex};
use crate::mc_special::student_t_quantile;

// ============================================================================
// Result Types
// ============================================================================

/// Mean and confidence half-width of a metric
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub mean: f64,
    pub half_width: f64,
}

impl Interval {
    pub fn lower(&self) -> f64 {
        self.mean - self.half_width
    }

    pub fn upper(&self) -> f64 {
        self.mean + self.half_width
    }

    /// `half_width / |mean|`; a zero mean counts as perfectly precise
    pub fn relative_width(&self) -> f64 {
        if self.mean == 0.0 {
            0.0
        } else {
            self.half_width / self.mean.abs()
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4e} ± {:.2e}", self.mean, self.half_width)
    }
}

/// Confidence intervals of all three metrics of one SNR index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnrSummary {
    pub ber: Interval,
    pub per: Interval,
    pub throughput: Interval,
}

/// Metrics of one finalized iteration (one drop)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationResult {
    pub ber: f64,
    pub per: f64,
    pub throughput: f64,
}

/// Relative half-widths of the three metrics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceRatios {
    pub ber: f64,
    pub per: f64,
    pub throughput: f64,
}

impl ConvergenceRatios {
    fn from_summary(summary: &SnrSummary) -> Self {
        Self {
            ber: summary.ber.relative_width(),
            per: summary.per.relative_width(),
            throughput: summary.throughput.relative_width(),
        }
    }
}

/// Which relative half-widths decide convergence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvergenceGate {
    /// BER alone
    #[default]
    Ber,

    /// The most precise of BER, PER and throughput
    AnyMetric,

    /// The least precise of BER, PER and throughput
    AllMetrics,
}

impl ConvergenceGate {
    fn ratio(self, ratios: &ConvergenceRatios) -> f64 {
        match self {
            ConvergenceGate::Ber => ratios.ber,
            ConvergenceGate::AnyMetric => ratios.ber.min(ratios.per).min(ratios.throughput),
            ConvergenceGate::AllMetrics => ratios.ber.max(ratios.per).max(ratios.throughput),
        }
    }
}

impl FromStr for ConvergenceGate {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ber" => Ok(ConvergenceGate::Ber),
            "any" | "any_metric" | "min" => Ok(ConvergenceGate::AnyMetric),
            "all" | "all_metrics" | "max" => Ok(ConvergenceGate::AllMetrics),
            other => invalid(format!("unknown convergence gate '{}'", other)),
        }
    }
}

// ============================================================================
// Confidence Interval
// ============================================================================

/// Student-t confidence interval of the mean of `samples`.
///
/// Needs at least two samples. Identical samples give a zero half-width.
pub fn confidence_interval(samples: &[f64], confidence: f64) -> Result<Interval, SimError> {
    let n = samples.len();
    if n < 2 {
        return Err(SimError::NumericDegenerate(format!(
            "confidence interval needs at least 2 samples, got {}",
            n
        )));
    }

    let mean = samples.iter().sum::<f64>() / n as f64;
    if samples.iter().all(|&s| s == samples[0]) {
        return Ok(Interval {
            mean: samples[0],
            half_width: 0.0,
        });
    }

    let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let sem = variance.sqrt() / (n as f64).sqrt();
    let t = student_t_quantile((1.0 + confidence) / 2.0, (n - 1) as f64);

    Ok(Interval {
        mean,
        half_width: sem * t,
    })
}

/// Interval used when there are too few samples for a real one
fn degenerate_interval(samples: &[f64]) -> Interval {
    let mean = if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    };
    Interval {
        mean,
        half_width: f64::INFINITY,
    }
}

// ============================================================================
// Per-SNR State
// ============================================================================

#[derive(Debug, Clone, Default)]
struct SnrAccumulator {
    // In-flight (current iteration)
    trials: usize,
    bit_errors: Vec<usize>,
    packet_errors: usize,

    // Historical (one entry per finalized iteration)
    ber_history: Vec<f64>,
    per_history: Vec<f64>,
    throughput_history: Vec<f64>,

    converged: bool,
    result: Option<SnrSummary>,
    ratios: Option<ConvergenceRatios>,
}

impl SnrAccumulator {
    fn reset_in_flight(&mut self) {
        self.trials = 0;
        self.packet_errors = 0;
        self.bit_errors.clear();
    }

    fn clear_history(&mut self) {
        self.ber_history.clear();
        self.per_history.clear();
        self.throughput_history.clear();
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Running statistics for every point of an SNR sweep
#[derive(Debug, Clone)]
pub struct Statistics {
    n_bits: usize,
    tx_rate: f64,
    confidence: f64,
    gate: ConvergenceGate,
    snr: Vec<SnrAccumulator>,
}

impl Statistics {
    /// Create statistics for `n_snr` sweep points
    pub fn new(n_snr: usize, n_bits: usize, tx_rate: f64, confidence: f64) -> Self {
        Self {
            n_bits,
            tx_rate,
            confidence,
            gate: ConvergenceGate::default(),
            snr: vec![SnrAccumulator::default(); n_snr],
        }
    }

    pub fn with_gate(mut self, gate: ConvergenceGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn n_snr(&self) -> usize {
        self.snr.len()
    }

    pub fn n_bits(&self) -> usize {
        self.n_bits
    }

    pub fn tx_rate(&self) -> f64 {
        self.tx_rate
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn gate(&self) -> ConvergenceGate {
        self.gate
    }

    /// Record one trial for every SNR index.
    ///
    /// Converged indices are skipped; their entries are ignored.
    pub fn record_trial(&mut self, bit_errors: &[usize], packet_errors: &[bool]) {
        debug_assert_eq!(bit_errors.len(), self.snr.len());
        debug_assert_eq!(packet_errors.len(), self.snr.len());

        for ((acc, &bits), &packet) in self
            .snr
            .iter_mut()
            .zip(bit_errors.iter())
            .zip(packet_errors.iter())
        {
            if acc.converged {
                continue;
            }
            acc.trials += 1;
            acc.bit_errors.push(bits);
            if packet {
                acc.packet_errors += 1;
            }
        }
    }

    /// Close the current iteration.
    ///
    /// Every index with in-flight trials gets one new historical sample; the
    /// in-flight data of every index is reset.
    pub fn finalize_iteration(&mut self) -> Vec<Option<IterationResult>> {
        let n_bits = self.n_bits as f64;
        let tx_rate = self.tx_rate;

        self.snr
            .iter_mut()
            .enumerate()
            .map(|(idx, acc)| {
                let result = if acc.trials == 0 {
                    if !acc.converged {
                        warn!("SNR index {} finished an iteration without trials", idx);
                    }
                    None
                } else {
                    let trials = acc.trials as f64;
                    let total_bit_errors: usize = acc.bit_errors.iter().sum();
                    let ber = total_bit_errors as f64 / (trials * n_bits);
                    let per = acc.packet_errors as f64 / trials;
                    let throughput = tx_rate * (1.0 - per);

                    acc.ber_history.push(ber);
                    acc.per_history.push(per);
                    acc.throughput_history.push(throughput);

                    Some(IterationResult {
                        ber,
                        per,
                        throughput,
                    })
                };
                acc.reset_in_flight();
                result
            })
            .collect()
    }

    /// Confidence interval at the configured confidence level
    pub fn confidence_interval(&self, samples: &[f64]) -> Result<Interval, SimError> {
        confidence_interval(samples, self.confidence)
    }

    fn summarize_index(&self, idx: SnrIndex) -> Result<SnrSummary, SimError> {
        let acc = &self.snr[idx];
        Ok(SnrSummary {
            ber: self.confidence_interval(&acc.ber_history)?,
            per: self.confidence_interval(&acc.per_history)?,
            throughput: self.confidence_interval(&acc.throughput_history)?,
        })
    }

    /// Summary of an index, falling back to infinite half-widths when there
    /// are fewer than two samples
    fn summarize_index_or_degenerate(&self, idx: SnrIndex) -> SnrSummary {
        self.summarize_index(idx).unwrap_or_else(|e| {
            warn!("SNR index {}: {}; accepting without precision", idx, e);
            let acc = &self.snr[idx];
            SnrSummary {
                ber: degenerate_interval(&acc.ber_history),
                per: degenerate_interval(&acc.per_history),
                throughput: degenerate_interval(&acc.throughput_history),
            }
        })
    }

    /// Confidence intervals of every index from its historical samples.
    ///
    /// Fails with `NumericDegenerate` while any index has fewer than two.
    pub fn summarize(&self) -> Result<Vec<SnrSummary>, SimError> {
        (0..self.snr.len())
            .map(|idx| self.summarize_index(idx))
            .collect()
    }

    /// Summarize every index, then clear historical and in-flight data
    pub fn wrap_up(&mut self) -> Vec<SnrSummary> {
        let summaries = (0..self.snr.len())
            .map(|idx| self.summarize_index_or_degenerate(idx))
            .collect();

        for acc in &mut self.snr {
            acc.clear_history();
            acc.reset_in_flight();
        }
        summaries
    }

    /// Mark indices whose gated relative half-width is at most
    /// `relative_threshold` as converged and freeze their summary.
    ///
    /// Already converged indices are left untouched. Returns how many indices
    /// converged in this call.
    pub fn check_convergence(&mut self, summaries: &[SnrSummary], relative_threshold: f64) -> usize {
        let gate = self.gate;
        let mut newly_converged = 0;

        for (idx, (acc, summary)) in self.snr.iter_mut().zip(summaries.iter()).enumerate() {
            if acc.converged {
                continue;
            }

            let ratios = ConvergenceRatios::from_summary(summary);
            acc.ratios = Some(ratios);

            let ratio = gate.ratio(&ratios);
            if ratio <= relative_threshold {
                acc.converged = true;
                acc.result = Some(freeze(summary));
                newly_converged += 1;
                debug!(
                    "SNR index {} converged: ber {} (relative {:.3e})",
                    idx, summary.ber, ratio
                );
            }
        }
        newly_converged
    }

    /// Accept every unconverged index with its current statistics.
    ///
    /// Returns how many indices were forced.
    pub fn force_accept_all(&mut self) -> usize {
        let mut forced = 0;
        for idx in 0..self.snr.len() {
            if self.snr[idx].converged {
                continue;
            }
            let summary = self.summarize_index_or_degenerate(idx);
            let acc = &mut self.snr[idx];
            acc.ratios = Some(ConvergenceRatios::from_summary(&summary));
            acc.result = Some(summary);
            acc.converged = true;
            forced += 1;
        }
        if forced > 0 {
            warn!("forced acceptance of {} unconverged SNR index(es)", forced);
        }
        forced
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn converged(&self) -> Vec<bool> {
        self.snr.iter().map(|acc| acc.converged).collect()
    }

    pub fn is_converged(&self, idx: SnrIndex) -> bool {
        self.snr[idx].converged
    }

    pub fn all_converged(&self) -> bool {
        self.snr.iter().all(|acc| acc.converged)
    }

    /// Frozen summaries (None while an index is still running)
    pub fn results(&self) -> Vec<Option<SnrSummary>> {
        self.snr.iter().map(|acc| acc.result).collect()
    }

    pub fn result(&self, idx: SnrIndex) -> Option<&SnrSummary> {
        self.snr[idx].result.as_ref()
    }

    /// Ratios from the most recent convergence check of an index
    pub fn ratios(&self, idx: SnrIndex) -> Option<ConvergenceRatios> {
        self.snr[idx].ratios
    }

    pub fn trials(&self, idx: SnrIndex) -> usize {
        self.snr[idx].trials
    }

    pub fn in_flight_bit_errors(&self, idx: SnrIndex) -> &[usize] {
        &self.snr[idx].bit_errors
    }

    pub fn packet_errors(&self, idx: SnrIndex) -> usize {
        self.snr[idx].packet_errors
    }

    /// Number of historical samples of an index
    pub fn iterations(&self, idx: SnrIndex) -> usize {
        self.snr[idx].ber_history.len()
    }

    /// Smallest number of historical samples over all indices
    pub fn min_iterations(&self) -> usize {
        self.snr
            .iter()
            .map(|acc| acc.ber_history.len())
            .min()
            .unwrap_or(0)
    }

    pub fn ber_history(&self, idx: SnrIndex) -> &[f64] {
        &self.snr[idx].ber_history
    }

    pub fn per_history(&self, idx: SnrIndex) -> &[f64] {
        &self.snr[idx].per_history
    }

    pub fn throughput_history(&self, idx: SnrIndex) -> &[f64] {
        &self.snr[idx].throughput_history
    }
}

/// Copy of a summary with zero-mean metrics pinned to a zero half-width
fn freeze(summary: &SnrSummary) -> SnrSummary {
    let pin = |interval: Interval| {
        if interval.mean == 0.0 {
            Interval {
                mean: 0.0,
                half_width: 0.0,
            }
        } else {
            interval
        }
    };
    SnrSummary {
        ber: pin(summary.ber),
        per: pin(summary.per),
        throughput: pin(summary.throughput),
    }
}
