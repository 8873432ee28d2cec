use crate::dma::DmaBuffer;
use crate::line::expected_value;
use crate::{AfuError, Result};
use afu_common::line::{LINE_WORDS, WORD_BYTES};
use bitvec::prelude::*;
use std::fmt;
use std::str::FromStr;

/// Unit of the value the device writes into the output counter register.
///
/// Accelerator revisions disagree on whether the counter holds lines or
/// bytes, so the host must be told which one it is talking to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputUnit {
    /// Counter holds whole lines produced.
    #[default]
    Lines,
    /// Counter holds bytes produced.
    Bytes,
}

impl OutputUnit {
    /// Converts a raw counter value into a number of 32-bit elements.
    pub fn elements(self, raw: u64) -> usize {
        let raw = usize::try_from(raw).unwrap_or(usize::MAX);
        match self {
            Self::Lines => raw.saturating_mul(LINE_WORDS),
            Self::Bytes => raw / WORD_BYTES,
        }
    }
}

impl fmt::Display for OutputUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lines => write!(f, "lines"),
            Self::Bytes => write!(f, "bytes"),
        }
    }
}

impl FromStr for OutputUnit {
    type Err = AfuError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lines" => Ok(Self::Lines),
            "bytes" => Ok(Self::Bytes),
            other => Err(AfuError::invalid_config(format!(
                "unknown output unit '{other}' (expected lines or bytes)"
            ))),
        }
    }
}

/// Outcome of one verification pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    /// Element count the device asked us to check.
    pub requested: usize,
    /// Elements actually compared. Smaller than `requested` only when the
    /// request ran past the end of the output buffer.
    pub checked: usize,
    /// Number of positions that differ from the expected sequence.
    pub errors: usize,
    /// One bit per checked element, set where the value was wrong.
    pub mismatches: BitVec<usize, Lsb0>,
}

impl VerificationReport {
    /// True when every requested value was checked and matched.
    pub fn passed(&self) -> bool {
        self.errors == 0 && !self.overflowed()
    }

    /// Whether the device reported more output than the buffer can hold.
    pub fn overflowed(&self) -> bool {
        self.requested > self.checked
    }

    /// Lowest mismatching position, if any.
    pub fn first_mismatch(&self) -> Option<usize> {
        self.mismatches.first_one()
    }

    /// Positions of all mismatching elements in ascending order.
    pub fn mismatch_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.mismatches.iter_ones()
    }

    /// Turns a failed report into [`AfuError::VerificationMismatch`].
    ///
    /// # Errors
    ///
    /// Returns the mismatch error if any element differed. Values reported
    /// past the end of the buffer count as mismatches.
    pub fn ensure_pass(&self) -> Result<()> {
        if self.passed() {
            Ok(())
        } else {
            Err(AfuError::VerificationMismatch {
                errors: self.errors + (self.requested - self.checked),
                checked: self.requested,
            })
        }
    }
}

/// Counts elements of `output` that differ from the ascending sequence.
///
/// Examines exactly `produced_elements` elements from the start of the
/// buffer (fewer only if that would run past its end) and never stops at
/// the first mismatch. Zero is the only passing result.
pub fn verify(output: &DmaBuffer, produced_elements: usize) -> usize {
    verify_report(output, produced_elements).errors
}

/// Like [`verify`], but also records where each mismatch occurred.
pub fn verify_report(output: &DmaBuffer, produced_elements: usize) -> VerificationReport {
    let checked = produced_elements.min(output.len_words());
    if checked < produced_elements {
        tracing::warn!(
            "Device reported {produced_elements} values but the output buffer holds {}",
            output.len_words()
        );
    }

    let mut mismatches = bitvec![usize, Lsb0; 0; checked];
    let mut errors = 0;
    for position in 0..checked {
        let value = output.load(position);
        let expected = expected_value(position);
        if value != expected {
            tracing::trace!("output[{position}] = {value}, expected {expected}");
            mismatches.set(position, true);
            errors += 1;
        }
    }

    VerificationReport {
        requested: produced_elements,
        checked,
        errors,
        mismatches,
    }
}
