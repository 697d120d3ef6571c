//! Simulation results and sinks

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::mc_config::{SweepAxis, TerminationPolicy};
use crate::mc_interface::{ResultsSink, Seed};
use crate::mc_statistics::{Interval, SnrSummary};
use crate::mc_theoretical::TheoreticalCurves;

// ============================================================================
// Simulation Report
// ============================================================================

/// Final outcome of one experiment
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Termination policy that ran
    pub policy: TerminationPolicy,

    /// Swept quantity
    pub axis: SweepAxis,

    /// Swept values, one per SNR index
    pub points: Vec<f64>,

    /// Simulated confidence intervals, one per SNR index
    pub summaries: Vec<SnrSummary>,

    /// Closed-form reference curves
    pub theoretical: TheoreticalCurves,

    /// Number of drops run
    pub drops_completed: usize,

    /// Seed broadcast before each drop
    pub seeds_used: Vec<Seed>,

    /// SNR indices accepted by the drop cap rather than by precision
    pub forced: usize,
}

impl SimulationReport {
    pub fn ber_series(&self) -> Vec<Interval> {
        self.summaries.iter().map(|s| s.ber).collect()
    }

    pub fn per_series(&self) -> Vec<Interval> {
        self.summaries.iter().map(|s| s.per).collect()
    }

    pub fn throughput_series(&self) -> Vec<Interval> {
        self.summaries.iter().map(|s| s.throughput).collect()
    }

    /// Print a summary of the simulation results
    pub fn print_summary(&self) {
        println!("\n╔════════════════════════════════════════════════════════╗");
        println!("║        Monte-Carlo Link Simulation Results             ║");
        println!("╚════════════════════════════════════════════════════════╝\n");

        println!("Configuration:");
        println!("  Policy: {}", self.policy);
        println!("  Sweep: {} ({} points)", self.axis, self.points.len());
        println!("  Drops: {}", self.drops_completed);
        if self.forced > 0 {
            println!("  Forced acceptance: {} point(s)", self.forced);
        }
        println!();

        println!(
            "  {:>10}  {:>22}  {:>10}  {:>22}  {:>10}  {:>22}  {:>10}",
            "point", "BER", "theory", "PER", "theory", "throughput", "theory"
        );
        for (idx, summary) in self.summaries.iter().enumerate() {
            let theory = |curve: &[f64]| curve.get(idx).copied().unwrap_or(f64::NAN);
            println!(
                "  {:>10.3e}  {:>22}  {:>10.3e}  {:>22}  {:>10.3e}  {:>22}  {:>10.3}",
                self.points[idx],
                summary.ber.to_string(),
                theory(&self.theoretical.ber),
                summary.per.to_string(),
                theory(&self.theoretical.per),
                summary.throughput.to_string(),
                theory(&self.theoretical.throughput),
            );
        }
        println!();
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Keeps every stored report in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub reports: Vec<SimulationReport>,
}

impl ResultsSink for MemorySink {
    fn store(&mut self, report: &SimulationReport) -> io::Result<()> {
        self.reports.push(report.clone());
        Ok(())
    }
}

/// CSV sink: one row per SNR point, simulated and theoretical values side by side
pub struct CsvResultsSink {
    writer: BufWriter<File>,
}

impl CsvResultsSink {
    pub fn new<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        // Write CSV header
        writeln!(
            writer,
            "point,ber_mean,ber_half_width,ber_theory,per_mean,per_half_width,per_theory,throughput_mean,throughput_half_width,throughput_theory"
        )?;

        Ok(Self { writer })
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl ResultsSink for CsvResultsSink {
    fn store(&mut self, report: &SimulationReport) -> io::Result<()> {
        let theory = |curve: &[f64], idx: usize| curve.get(idx).copied().unwrap_or(f64::NAN);

        for (idx, summary) in report.summaries.iter().enumerate() {
            writeln!(
                self.writer,
                "{},{},{},{},{},{},{},{},{},{}",
                report.points[idx],
                summary.ber.mean,
                summary.ber.half_width,
                theory(&report.theoretical.ber, idx),
                summary.per.mean,
                summary.per.half_width,
                theory(&report.theoretical.per, idx),
                summary.throughput.mean,
                summary.throughput.half_width,
                theory(&report.theoretical.throughput, idx),
            )?;
        }
        self.flush()
    }
}

impl Drop for CsvResultsSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}
