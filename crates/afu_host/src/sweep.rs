use crate::run::Outcome;
use crate::stats::LatencyStats;
use afu_common::AfuId;
use afu_core::clock::{CancelToken, SystemClock};
use afu_core::device::{AcceleratorProvider, Target};
use afu_core::handshake::PollConfig;
use afu_core::session::{CopyReport, CopyTest, SessionConfig, Verdict};
use afu_core::verify::OutputUnit;
use afu_core::{AfuError, Result as AfuResult};
use afu_sim::SimProvider;
use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use std::time::{Duration, Instant};

/// Per-session completion bound for sweeps.
const SWEEP_TIMEOUT: Duration = Duration::from_secs(30);

fn sweep_config(input_lines: usize, poll_us: u64) -> SessionConfig {
    SessionConfig {
        input_lines,
        output_unit: OutputUnit::Lines,
        poll: PollConfig::for_target(Target::Simulated)
            .with_interval(Duration::from_micros(poll_us))
            .with_timeout(Some(SWEEP_TIMEOUT)),
    }
}

/// Runs one copy test per capacity in `1..=max_lines`, each against its own
/// simulated device.
pub fn run_sweep(max_lines: usize, poll_us: u64) -> Result<Outcome> {
    if max_lines == 0 {
        bail!("--max-lines must be at least 1");
    }
    // Reject a bad interval before spawning any device.
    CopyTest::new(sweep_config(1, poll_us)).context("Invalid sweep configuration")?;

    println!("Sweeping capacities 1..={max_lines} (parallel, rayon)...");
    let start = Instant::now();

    let capacities: Vec<usize> = (1..=max_lines).collect();
    let results: Vec<(usize, AfuResult<CopyReport>)> = capacities
        .par_iter()
        .map(|&lines| {
            let result = SimProvider::default()
                .open(&AfuId::LINE_COPY)
                .and_then(|device| {
                    CopyTest::new(sweep_config(lines, poll_us))?.run(
                        &device,
                        &mut SystemClock::new(),
                        &CancelToken::new(),
                    )
                });
            (lines, result)
        })
        .collect();

    let elapsed = start.elapsed();
    let mut latency = LatencyStats::new();
    let mut outcome = Outcome::Finished(Verdict::Pass);
    let mut passed = 0;

    println!("\n lines | values | errors | verdict");
    for (lines, result) in &results {
        let this = match result {
            Ok(report) => {
                latency.update(report.poll.waited);
                let verdict = report.verdict();
                println!(
                    "{lines:6} | {:6} | {:6} | {verdict:?}",
                    report.verification.checked, report.verification.errors
                );
                Outcome::Finished(verdict)
            }
            Err(e @ (AfuError::Timeout { .. } | AfuError::Cancelled { .. })) => {
                println!("{lines:6} |      - |      - | {e}");
                Outcome::Aborted
            }
            Err(e) => bail!("Copy test with {lines} lines failed: {e}"),
        };
        if this == Outcome::Finished(Verdict::Pass) {
            passed += 1;
        }
        if this.code() > outcome.code() {
            outcome = this;
        }
    }

    println!("\nResults");
    println!("Time: {:.4} s", elapsed.as_secs_f64());
    println!("Passed: {passed}/{}", results.len());
    latency.print_report();

    Ok(outcome)
}
