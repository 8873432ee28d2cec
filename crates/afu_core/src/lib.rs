//! Host side of the line-copy accelerator handshake.
//!
//! This crate implements everything the host does between "buffers exist"
//! and "the output has been checked": filling input memory with the test
//! pattern, publishing buffer descriptors through the control/status
//! registers, polling for completion, waiting out the drain delay, and
//! verifying the produced output. The accelerator itself, its register
//! transport and its memory allocator are reached through the traits in
//! [`device`] and [`csr`].

use thiserror::Error;

pub use afu_common::{AfuId, csr::Csr, line::Line};

/// Time source and cancellation used by the polling loop.
///
/// The handshake never calls `std::thread::sleep` directly. It sleeps and
/// reads elapsed time through the [`clock::Clock`] trait so that tests can
/// run the protocol against a virtual clock.
pub mod clock;

/// Register transport abstraction.
///
/// Defines how a 64-bit value reaches a numbered control/status register
/// and how status is read back.
pub mod csr;

/// Accelerator-visible shared memory.
///
/// Buffers are owned exclusively by the host. The device only ever sees
/// their published address and resolves it through a region table.
pub mod dma;

/// Accelerator connection and capability traits.
pub mod device;

/// CSR handshake state machine, polling loop and drain delay.
pub mod handshake;

/// Line buffer model and deterministic input pattern.
pub mod line;

/// End-to-end copy test: fill, handshake, drain, verify.
pub mod session;

/// Output verification against the expected ascending sequence.
pub mod verify;

pub use handshake::HandshakeState;

/// Result type used throughout the driver.
pub type Result<T> = std::result::Result<T, AfuError>;

/// Errors raised by the host driver.
///
/// Connection and allocation failures are unrecoverable preconditions.
/// Verification mismatches are reported as data first; the
/// [`AfuError::VerificationMismatch`] variant exists so a caller can turn a
/// failed report into a failed outcome.
#[derive(Debug, Error)]
pub enum AfuError {
    /// The requested accelerator was not found or its handle is invalid.
    #[error("accelerator {id} unavailable: {reason}")]
    Connection {
        /// Identifier that was requested
        id: String,
        /// Why the connection failed
        reason: String,
    },

    /// A shared buffer could not be allocated.
    #[error("failed to allocate {bytes} byte shared buffer: {reason}")]
    Allocation {
        /// Requested size in bytes
        bytes: usize,
        /// Why the allocation failed
        reason: String,
    },

    /// The accelerator did not raise completion within the configured bound.
    #[error("accelerator did not complete after {attempts} polls ({waited_ms} ms)")]
    Timeout {
        /// Number of status reads performed
        attempts: u64,
        /// Time spent waiting in milliseconds
        waited_ms: u64,
    },

    /// The poll loop observed an external cancellation request.
    #[error("wait for completion cancelled after {attempts} polls")]
    Cancelled {
        /// Number of status reads performed
        attempts: u64,
    },

    /// A handshake step was requested out of order.
    #[error("cannot {operation} while handshake is {state}")]
    InvalidState {
        /// The rejected operation
        operation: &'static str,
        /// State the handshake was in
        state: HandshakeState,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong
        reason: String,
    },

    /// The register transport failed to deliver a read or write.
    #[error("register transport failed: {reason}")]
    Transport {
        /// Transport-specific failure description
        reason: String,
    },

    /// Output differed from the expected sequence.
    #[error("{errors} of {checked} output values differ from the expected sequence")]
    VerificationMismatch {
        /// Number of mismatching values
        errors: usize,
        /// Number of values compared
        checked: usize,
    },
}

impl AfuError {
    /// Create a connection error
    pub fn connection(id: &AfuId, reason: impl Into<String>) -> Self {
        Self::Connection {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an allocation error
    pub fn allocation(bytes: usize, reason: impl Into<String>) -> Self {
        Self::Allocation {
            bytes,
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }
}
