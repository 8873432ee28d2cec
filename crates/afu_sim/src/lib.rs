//! Behavioural simulation of the line-copy accelerator.
//!
//! Stands in for the accelerator function so the host handshake can be
//! exercised without hardware. The simulated device runs on its own thread,
//! watches for the start trigger, and copies input lines to output memory
//! the way the RTL pass-through does. It reaches host memory only through
//! the addresses published in its registers, translated by a small page
//! table with hit/miss accounting.
//!
//! Faults can be injected to reproduce the failure modes the host has to
//! cope with: corrupted output, an under-reported output counter, a device
//! that never completes, and a final output line that lands after the
//! completion flag.

use afu_common::AfuId;
use afu_core::device::AcceleratorProvider;
use afu_core::verify::OutputUnit;
use afu_core::{AfuError, Result};
use std::time::Duration;

/// Simulated accelerator device and its worker thread.
pub mod device;

/// Address translation with TLB statistics.
pub mod vtp;

pub use device::SimAccelerator;

/// Misbehaviour injected into a simulated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// XOR one output element with 1 before completing.
    Corrupt { position: usize },
    /// Report `value` in the output counter regardless of what was copied.
    MisreportOutput { value: u64 },
    /// Copy the data but never raise completion.
    Stall,
    /// Raise completion, then write the final output line `lag` later.
    LateFinalLine { lag: Duration },
}

/// Configuration of a simulated accelerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// Function identifier the simulation answers to.
    pub afu_id: AfuId,
    /// Cap on live shared memory. `None` is unlimited.
    pub memory_limit: Option<usize>,
    /// Time the engine spends per copied line.
    pub line_latency: Duration,
    /// Unit in which the engine reports output size.
    pub counter_unit: OutputUnit,
    pub fault: Option<Fault>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            afu_id: AfuId::LINE_COPY,
            memory_limit: None,
            line_latency: Duration::from_micros(50),
            counter_unit: OutputUnit::Lines,
            fault: None,
        }
    }
}

impl SimConfig {
    /// Same configuration with `fault` injected into every job.
    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }
}

/// Hands out simulated accelerators.
#[derive(Debug, Clone, Default)]
pub struct SimProvider {
    config: SimConfig,
}

impl SimProvider {
    /// Provider whose devices all use `config`.
    pub fn new(config: SimConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }
}

impl AcceleratorProvider for SimProvider {
    type Device = SimAccelerator;

    fn open(&self, id: &AfuId) -> Result<SimAccelerator> {
        if *id != self.config.afu_id {
            return Err(AfuError::connection(
                id,
                format!("simulation only provides {}", self.config.afu_id),
            ));
        }
        SimAccelerator::spawn(self.config.clone())
    }
}
