use crate::stats;
use afu_common::AfuId;
use afu_core::clock::{CancelToken, SystemClock};
use afu_core::device::{Accelerator, AcceleratorProvider, Target};
use afu_core::line::expected_value;
use afu_core::session::{CopyReport, CopyTest, SessionConfig, Verdict};
use afu_core::verify::OutputUnit;
use afu_core::AfuError;
use afu_io::{Profile, loader};
use afu_sim::{SimAccelerator, SimConfig, SimProvider};
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Deployment profile; flags below override its entries
    #[arg(long)]
    pub profile: Option<PathBuf>,
    /// Input capacity in lines
    #[arg(long)]
    pub lines: Option<usize>,
    /// Poll interval in microseconds
    #[arg(long)]
    pub poll_us: Option<u64>,
    /// Number of poll intervals to wait after completion
    #[arg(long)]
    pub drain: Option<u32>,
    /// Give up waiting after this many milliseconds (0 waits forever)
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Unit of the output counter register (lines or bytes)
    #[arg(long)]
    pub unit: Option<OutputUnit>,
    /// Print the output buffer after verification
    #[arg(long)]
    pub dump: bool,
}

/// How a test run ended, as seen by the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Finished(Verdict),
    /// Timed out or cancelled before completion.
    Aborted,
}

impl Outcome {
    /// Process exit status: 0 pass, 1 mismatch, 2 no output, 3 aborted.
    pub fn code(self) -> u8 {
        match self {
            Self::Finished(Verdict::Pass) => 0,
            Self::Finished(Verdict::Mismatch) => 1,
            Self::Finished(Verdict::NoOutput) => 2,
            Self::Aborted => 3,
        }
    }

    pub fn exit_code(self) -> ExitCode {
        ExitCode::from(self.code())
    }
}

/// Defaults for the target, then the profile, then command-line flags.
fn session_config(target: Target, profile: &Profile, args: &RunArgs) -> SessionConfig {
    let mut config = profile.apply(SessionConfig::reference(target));
    if let Some(lines) = args.lines {
        config.input_lines = lines;
    }
    if let Some(us) = args.poll_us {
        config.poll.interval = Duration::from_micros(us);
    }
    if let Some(drain) = args.drain {
        config.poll.drain_delays = drain;
    }
    if let Some(ms) = args.timeout_ms {
        config.poll.timeout = (ms > 0).then(|| Duration::from_millis(ms));
    }
    if let Some(unit) = args.unit {
        config.output_unit = unit;
    }
    config
}

/// Opens the accelerator for `target`. Only the simulation is available.
pub fn open_device(target: Target, afu_id: &AfuId) -> Result<SimAccelerator> {
    let device = match target {
        Target::Simulated => SimProvider::new(SimConfig::default()).open(afu_id),
        Target::Physical => Err(AfuError::connection(
            afu_id,
            "no hardware backend is available in this build",
        )),
    };
    device.with_context(|| format!("Failed to open accelerator {afu_id}"))
}

/// Runs one copy test and reports it on stdout.
pub fn run_copy_test(args: &RunArgs) -> Result<Outcome> {
    let profile = match &args.profile {
        Some(path) => {
            let profile = loader::load_profile(path)?;
            tracing::info!("Loaded profile {}", path.display());
            profile
        }
        None => Profile::default(),
    };
    let target = profile.target.unwrap_or(Target::Simulated);
    let afu_id = profile.afu_id.unwrap_or(AfuId::LINE_COPY);
    let config = session_config(target, &profile, args);
    let test = CopyTest::new(config).context("Invalid session configuration")?;

    let device = open_device(target, &afu_id)?;
    println!(
        "Copy test on {target} accelerator {afu_id}: {} input lines, {} output lines",
        config.input_lines,
        config.output_lines()
    );

    let start = Instant::now();
    let report = match test.run(&device, &mut SystemClock::new(), &CancelToken::new()) {
        Ok(report) => report,
        Err(e @ (AfuError::Timeout { .. } | AfuError::Cancelled { .. })) => {
            println!("Aborted: {e}");
            return Ok(Outcome::Aborted);
        }
        Err(e) => return Err(e).context("Copy test failed"),
    };
    let elapsed = start.elapsed();

    print_report(&report, elapsed);
    if args.dump {
        dump_output(&report);
    }
    if let Some(vtp) = device.translation_stats() {
        stats::print_translation_report(&vtp);
    }

    Ok(Outcome::Finished(report.verdict()))
}

fn print_report(report: &CopyReport, elapsed: Duration) {
    let verification = &report.verification;
    println!("\nResults");
    println!("input_buf:  {:#x}", report.input_iova);
    println!("output_buf: {:#x}", report.output_iova);
    println!(
        "Completion after {} polls ({:?} waited, {:?} drained)",
        report.poll.attempts, report.poll.waited, report.drained
    );
    println!(
        "Output counter: {} ({} values)",
        report.produced_raw, report.produced_elements
    );
    println!(
        "Checked: {}  Errors: {}",
        verification.checked, verification.errors
    );
    if verification.overflowed() {
        println!(
            "Counter exceeds output capacity: {} values reported, {} fit",
            verification.requested, verification.checked
        );
    }
    if let Some(position) = verification.first_mismatch() {
        println!(
            "First mismatch at value {position}: expected {}, found {}",
            expected_value(position),
            report.output.load(position)
        );
    }
    println!("Time: {:.4} s", elapsed.as_secs_f64());

    match report.verdict() {
        Verdict::Pass => println!("PASS"),
        Verdict::Mismatch => println!("FAIL: output differs from input"),
        Verdict::NoOutput => println!("FAIL: accelerator reported no output"),
    }
}

fn dump_output(report: &CopyReport) {
    println!("\nOutput buffer");
    for index in 0..report.output.len_lines() {
        let line = report.output.line(index);
        println!("[{index:3}] {:?}", line.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_verdict() {
        assert_eq!(Outcome::Finished(Verdict::Pass).code(), 0);
        assert_eq!(Outcome::Finished(Verdict::Mismatch).code(), 1);
        assert_eq!(Outcome::Finished(Verdict::NoOutput).code(), 2);
        assert_eq!(Outcome::Aborted.code(), 3);
    }

    #[test]
    fn flags_override_profile_and_defaults() {
        let profile = Profile {
            input_lines: Some(8),
            drain_delays: Some(5),
            ..Profile::default()
        };
        let args = RunArgs {
            lines: Some(3),
            poll_us: Some(100),
            timeout_ms: Some(0),
            ..RunArgs::default()
        };
        let config = session_config(Target::Simulated, &profile, &args);
        assert_eq!(config.input_lines, 3);
        assert_eq!(config.poll.drain_delays, 5);
        assert_eq!(config.poll.interval, Duration::from_micros(100));
        assert_eq!(config.poll.timeout, None);
        assert_eq!(config.output_unit, OutputUnit::Lines);
    }

    #[test]
    fn no_flags_is_the_reference_test() {
        let config = session_config(Target::Simulated, &Profile::default(), &RunArgs::default());
        assert_eq!(config, SessionConfig::reference(Target::Simulated));
    }

    #[test]
    fn physical_target_has_no_backend() {
        assert!(open_device(Target::Physical, &AfuId::LINE_COPY).is_err());
    }
}
