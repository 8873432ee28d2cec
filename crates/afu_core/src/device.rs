use crate::Result;
use crate::csr::CsrTransport;
use crate::dma::DmaAllocator;
use afu_common::AfuId;
use std::fmt;
use std::str::FromStr;

/// Kind of device behind a connection.
///
/// Simulated targets run orders of magnitude slower than hardware, which is
/// why the default poll interval depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// RTL or behavioural simulation of the accelerator
    Simulated,
    /// Real accelerator hardware
    Physical,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulated => write!(f, "simulated"),
            Self::Physical => write!(f, "physical"),
        }
    }
}

impl FromStr for Target {
    type Err = crate::AfuError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "simulated" | "sim" => Ok(Self::Simulated),
            "physical" | "hw" => Ok(Self::Physical),
            other => Err(crate::AfuError::invalid_config(format!(
                "unknown target '{other}' (expected simulated or physical)"
            ))),
        }
    }
}

/// Address translation counters reported by the device.
///
/// Diagnostics only. Nothing in the handshake consults these values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslationStats {
    /// Translations that found no live buffer.
    pub failed_translations: u64,
    /// Address of the most recent failed translation.
    pub last_failed_va: u64,
    /// Cycles spent walking the page table.
    pub walk_busy_cycles: u64,
    pub tlb_hits_4k: u64,
    pub tlb_misses_4k: u64,
    pub tlb_hits_2m: u64,
    pub tlb_misses_2m: u64,
}

/// An open connection to an accelerator function.
///
/// Combines register access with accelerator-reachable allocation. Buffers
/// returned by [`DmaAllocator::allocate`] are addressable by this device
/// under [`crate::dma::DmaBuffer::iova`].
pub trait Accelerator: CsrTransport + DmaAllocator {
    /// Identifier of the function this handle is connected to.
    fn id(&self) -> AfuId;

    /// Whether the device is simulated or physical.
    fn target(&self) -> Target;

    /// Translation statistics, if the device exposes them.
    fn translation_stats(&self) -> Option<TranslationStats> {
        None
    }
}

/// Locates and connects to accelerators.
pub trait AcceleratorProvider {
    type Device: Accelerator;

    /// Opens the accelerator function identified by `id`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AfuError::Connection`] if no matching function is
    /// present or it cannot be claimed.
    fn open(&self, id: &AfuId) -> Result<Self::Device>;
}
