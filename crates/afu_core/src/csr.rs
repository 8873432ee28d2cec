use crate::Result;
use afu_common::csr::Csr;
use std::sync::Arc;

/// Access to the accelerator's control/status registers.
///
/// Writes are assumed to reach the device in program order. A read of
/// [`Csr::StartDone`] that returns nonzero is the host's acquire point:
/// implementations backed by shared memory must load it with at least
/// acquire ordering.
///
/// Both methods take `&self`, matching memory-mapped register access where
/// the register block is shared between whoever holds a handle to it.
pub trait CsrTransport {
    /// Writes a 64-bit value to a register.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AfuError::Transport`] if the write cannot be delivered.
    fn write_csr(&self, reg: Csr, value: u64) -> Result<()>;

    /// Reads a 64-bit value from a register.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AfuError::Transport`] if the read cannot be delivered.
    fn read_csr(&self, reg: Csr) -> Result<u64>;
}

impl<T: CsrTransport + ?Sized> CsrTransport for &T {
    fn write_csr(&self, reg: Csr, value: u64) -> Result<()> {
        (**self).write_csr(reg, value)
    }

    fn read_csr(&self, reg: Csr) -> Result<u64> {
        (**self).read_csr(reg)
    }
}

impl<T: CsrTransport + ?Sized> CsrTransport for Box<T> {
    fn write_csr(&self, reg: Csr, value: u64) -> Result<()> {
        (**self).write_csr(reg, value)
    }

    fn read_csr(&self, reg: Csr) -> Result<u64> {
        (**self).read_csr(reg)
    }
}

impl<T: CsrTransport + ?Sized> CsrTransport for Arc<T> {
    fn write_csr(&self, reg: Csr, value: u64) -> Result<()> {
        (**self).write_csr(reg, value)
    }

    fn read_csr(&self, reg: Csr) -> Result<u64> {
        (**self).read_csr(reg)
    }
}
