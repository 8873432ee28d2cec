use crate::clock::{CancelToken, Clock};
use crate::device::{Accelerator, Target};
use crate::dma::DmaBuffer;
use crate::handshake::{Handshake, PollConfig, PollOutcome};
use crate::line::generate;
use crate::verify::{OutputUnit, VerificationReport, verify_report};
use crate::{AfuError, Result};
use afu_common::line::{LINE_BYTES, LINE_WORDS, OUTPUT_EXPANSION, REFERENCE_INPUT_LINES};
use std::time::Duration;

/// Parameters of one copy test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Input capacity in lines.
    pub input_lines: usize,
    /// Unit of the output counter register.
    pub output_unit: OutputUnit,
    pub poll: PollConfig,
}

impl SessionConfig {
    /// The reference copy test for `target`: five input lines, output
    /// counted in lines, reference poll interval.
    pub fn reference(target: Target) -> Self {
        Self {
            input_lines: REFERENCE_INPUT_LINES,
            output_unit: OutputUnit::Lines,
            poll: PollConfig::for_target(target),
        }
    }

    /// Output capacity in lines. Saturates for capacities that fail
    /// [`SessionConfig::validate`].
    pub fn output_lines(&self) -> usize {
        self.input_lines.saturating_mul(OUTPUT_EXPANSION)
    }

    /// Output capacity in bytes, or `None` if it does not fit in `usize`.
    pub fn output_bytes(&self) -> Option<usize> {
        self.input_lines
            .checked_mul(OUTPUT_EXPANSION)?
            .checked_mul(LINE_BYTES)
    }

    /// Checks the configuration before anything is allocated.
    ///
    /// # Errors
    ///
    /// Returns [`AfuError::InvalidConfig`] for a zero input capacity, an
    /// output capacity that overflows `usize`, or an invalid poll
    /// configuration.
    pub fn validate(&self) -> Result<()> {
        if self.input_lines == 0 {
            return Err(AfuError::invalid_config("input capacity must be at least one line"));
        }
        if self.output_bytes().is_none() {
            return Err(AfuError::invalid_config("output capacity overflows the address space"));
        }
        self.poll.validate()
    }
}

/// Overall result of a copy test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Every produced value matched.
    Pass,
    /// At least one value differed, or the device reported more output than
    /// the buffer holds.
    Mismatch,
    /// The device reported no output, so nothing was checked.
    NoOutput,
}

/// Everything observed during one copy test.
#[derive(Debug)]
pub struct CopyReport {
    pub input_lines: usize,
    pub input_iova: u64,
    pub output_iova: u64,
    /// Raw value of the output counter register.
    pub produced_raw: u64,
    /// `produced_raw` converted to elements.
    pub produced_elements: usize,
    pub poll: PollOutcome,
    /// Time spent in the post-completion drain.
    pub drained: Duration,
    pub verification: VerificationReport,
    /// The output buffer, kept alive for inspection.
    pub output: DmaBuffer,
}

impl CopyReport {
    /// Classifies the run. An empty output is never a pass.
    pub fn verdict(&self) -> Verdict {
        if self.produced_elements == 0 {
            Verdict::NoOutput
        } else if self.verification.passed() {
            Verdict::Pass
        } else {
            Verdict::Mismatch
        }
    }

    /// Turns any verdict other than [`Verdict::Pass`] into an error.
    ///
    /// # Errors
    ///
    /// Returns [`AfuError::VerificationMismatch`]. An empty output counts as
    /// zero of zero values checked; an overflowing report counts the values
    /// past the end of the buffer as mismatches.
    pub fn ensure_pass(&self) -> Result<()> {
        match self.verdict() {
            Verdict::Pass => Ok(()),
            Verdict::NoOutput => Err(AfuError::VerificationMismatch {
                errors: 0,
                checked: 0,
            }),
            Verdict::Mismatch => self.verification.ensure_pass(),
        }
    }
}

/// Runs the line-copy test against an accelerator.
#[derive(Debug, Clone, Copy)]
pub struct CopyTest {
    config: SessionConfig,
}

impl CopyTest {
    /// Validates `config` and prepares a test with it.
    ///
    /// # Errors
    ///
    /// Returns [`AfuError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The validated configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Fills input memory, runs the handshake, drains and verifies.
    ///
    /// Output memory is read only after completion has been observed and
    /// the drain delay has elapsed. Both buffers stay alive until the
    /// handshake has finished; on timeout or cancellation they are released
    /// before the error is returned and nothing is read.
    ///
    /// # Errors
    ///
    /// Propagates allocation, transport, timeout and cancellation errors. A
    /// failed verification is not an error here; inspect
    /// [`CopyReport::verdict`].
    pub fn run<A, C>(&self, device: &A, clock: &mut C, cancel: &CancelToken) -> Result<CopyReport>
    where
        A: Accelerator + ?Sized,
        C: Clock,
    {
        let config = &self.config;
        tracing::info!(
            "Copy test on {} accelerator {}: {} input lines",
            device.target(),
            device.id(),
            config.input_lines
        );

        let input = generate(device, config.input_lines)?;
        let output_bytes = config
            .output_bytes()
            .ok_or_else(|| AfuError::invalid_config("output capacity overflows the address space"))?;
        let output = device.allocate(output_bytes)?;

        let mut handshake = Handshake::new(device, config.poll)?;
        handshake.arm(&input, &output)?;
        handshake.start()?;
        let poll = handshake.wait_done(clock, cancel)?;
        let drained = handshake.drain(clock)?;

        let produced_raw = handshake.produced()?;
        let produced_elements = config.output_unit.elements(produced_raw);
        tracing::info!("output_ints={produced_elements}");
        if produced_elements == 0 {
            tracing::warn!("Device reported no output; nothing will be verified");
        } else if produced_elements < config.input_lines * LINE_WORDS {
            tracing::warn!(
                "Device produced {produced_elements} values for {} input values",
                config.input_lines * LINE_WORDS
            );
        }

        let verification = verify_report(&output, produced_elements);
        tracing::info!(
            "Verified {} values, {} errors",
            verification.checked,
            verification.errors
        );

        Ok(CopyReport {
            input_lines: config.input_lines,
            input_iova: input.iova(),
            output_iova: output.iova(),
            produced_raw,
            produced_elements,
            poll,
            drained,
            verification,
            output,
        })
    }
}
