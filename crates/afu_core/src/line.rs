//! Input pattern for the line-copy test.
//!
//! Input memory is filled with the sequence 1, 2, 3, ... in line-major,
//! field-minor order. The verifier recomputes the same sequence, so any
//! transformation the accelerator applies can be checked without keeping
//! a copy of the input.

use crate::dma::{DmaAllocator, DmaBuffer};
use crate::{AfuError, Result};
use afu_common::line::{LINE_BYTES, LINE_WORDS};
use std::sync::atomic::{Ordering, fence};

/// Value expected at element `position` of the sequence.
#[inline]
pub fn expected_value(position: usize) -> i32 {
    (position as i32).wrapping_add(1)
}

/// Fills every element of `buffer` with the ascending pattern.
///
/// Does not fence. Callers that are about to publish the buffer must use
/// [`generate`] or call [`publish_fence`] themselves.
pub fn fill_pattern(buffer: &DmaBuffer) {
    for position in 0..buffer.len_words() {
        buffer.store(position, expected_value(position));
    }
}

/// Orders all prior buffer writes before any later register write.
///
/// Sequentially consistent, so the device can never observe a published
/// address before the data behind it.
#[inline]
pub fn publish_fence() {
    fence(Ordering::SeqCst);
}

/// Allocates a buffer of `capacity_in_lines` lines and fills it with the
/// pattern, ready to be published.
///
/// # Errors
///
/// Returns [`AfuError::InvalidConfig`] for a zero capacity and propagates
/// allocation failures.
pub fn generate<A: DmaAllocator + ?Sized>(
    allocator: &A,
    capacity_in_lines: usize,
) -> Result<DmaBuffer> {
    if capacity_in_lines == 0 {
        return Err(AfuError::invalid_config("input capacity must be at least one line"));
    }
    let bytes = capacity_in_lines
        .checked_mul(LINE_BYTES)
        .ok_or_else(|| AfuError::invalid_config("input capacity overflows the address space"))?;

    let buffer = allocator.allocate(bytes)?;
    fill_pattern(&buffer);
    publish_fence();

    tracing::debug!(
        "Filled {} lines ({} values) at iova={:#x}",
        capacity_in_lines,
        capacity_in_lines * LINE_WORDS,
        buffer.iova()
    );
    Ok(buffer)
}
