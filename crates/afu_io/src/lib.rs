//! Loading deployment profiles for the accelerator host driver.
//!
//! A profile pins down everything that differs between deployment targets:
//! which accelerator function to open, whether it is simulated, how often
//! to poll, how long to drain, when to give up, and which unit the device
//! uses for its output counter.

/// File loading for deployment profiles.
///
/// Reads a profile from disk and hands the text to the parser, attaching
/// the path to any error.
pub mod loader;

/// Parser for the `key = value` profile format and accelerator ids.
pub mod parser;

use afu_common::AfuId;
use afu_core::device::Target;
use afu_core::session::SessionConfig;
use afu_core::verify::OutputUnit;
use std::time::Duration;

/// Settings read from a profile file. Unset keys keep their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub afu_id: Option<AfuId>,
    pub target: Option<Target>,
    pub input_lines: Option<usize>,
    pub poll_interval: Option<Duration>,
    pub drain_delays: Option<u32>,
    /// `Some(None)` means the profile explicitly asked for an unbounded wait.
    pub timeout: Option<Option<Duration>>,
    pub output_unit: Option<OutputUnit>,
}

impl Profile {
    /// Overlays the profile on `base`, leaving unset keys untouched.
    pub fn apply(&self, base: SessionConfig) -> SessionConfig {
        let mut config = base;
        if let Some(lines) = self.input_lines {
            config.input_lines = lines;
        }
        if let Some(unit) = self.output_unit {
            config.output_unit = unit;
        }
        if let Some(interval) = self.poll_interval {
            config.poll.interval = interval;
        }
        if let Some(drain) = self.drain_delays {
            config.poll.drain_delays = drain;
        }
        if let Some(timeout) = self.timeout {
            config.poll.timeout = timeout;
        }
        config
    }
}
