use crate::{AfuError, Result};
use afu_common::line::{LINE_BYTES, LINE_WORDS, Line, WORD_BYTES};
use std::collections::{BTreeMap, TryReserveError};
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Backing storage of one shared buffer.
///
/// Every element is an independent atomic word. Element accesses are
/// relaxed; ordering between host and device is established by the fences
/// around the handshake, never by the buffer itself.
pub struct DmaRegion {
    words: Box<[AtomicI32]>,
}

impl DmaRegion {
    /// Allocates a zero-filled region of `lines` lines.
    ///
    /// Aborts if the host is out of memory; allocators use
    /// [`DmaRegion::try_zeroed`].
    pub fn zeroed(lines: usize) -> Self {
        let words = (0..lines * LINE_WORDS).map(|_| AtomicI32::new(0)).collect();
        Self { words }
    }

    /// Allocates a zero-filled region of `lines` lines, reporting an
    /// unsatisfiable request instead of aborting.
    ///
    /// # Errors
    ///
    /// Returns the reservation error when the host cannot provide the
    /// memory.
    pub fn try_zeroed(lines: usize) -> std::result::Result<Self, TryReserveError> {
        let len = lines.saturating_mul(LINE_WORDS);
        let mut words = Vec::new();
        words.try_reserve_exact(len)?;
        words.extend((0..len).map(|_| AtomicI32::new(0)));
        Ok(Self {
            words: words.into_boxed_slice(),
        })
    }

    /// Address under which the region is published to the device.
    pub fn iova(&self) -> u64 {
        self.words.as_ptr() as u64
    }

    /// Size in 32-bit elements.
    pub fn len_words(&self) -> usize {
        self.words.len()
    }

    /// Size in whole lines.
    pub fn len_lines(&self) -> usize {
        self.words.len() / LINE_WORDS
    }

    pub fn len_bytes(&self) -> usize {
        self.words.len() * WORD_BYTES
    }

    /// Loads element `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn load(&self, index: usize) -> i32 {
        self.words[index].load(Ordering::Relaxed)
    }

    /// Stores element `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn store(&self, index: usize, value: i32) {
        self.words[index].store(value, Ordering::Relaxed);
    }

    /// Reads line `index` as a whole record.
    pub fn line(&self, index: usize) -> Line {
        let mut line = Line::ZERO;
        let base = index * LINE_WORDS;
        for (field, slot) in line.data.iter_mut().enumerate() {
            *slot = self.load(base + field);
        }
        line
    }

    /// Writes line `index` as a whole record.
    pub fn store_line(&self, index: usize, line: &Line) {
        let base = index * LINE_WORDS;
        for (field, value) in line.data.iter().enumerate() {
            self.store(base + field, *value);
        }
    }
}

impl fmt::Debug for DmaRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaRegion")
            .field("iova", &format_args!("{:#x}", self.iova()))
            .field("lines", &self.len_lines())
            .finish()
    }
}

/// Host handle to a shared buffer.
///
/// The handle is the only strong owner of the region. Devices hold weak
/// references obtained from their allocator's region table, so dropping
/// the handle releases the memory and makes later device accesses to its
/// address fail translation instead of touching freed memory.
#[derive(Debug)]
pub struct DmaBuffer {
    region: Arc<DmaRegion>,
}

impl DmaBuffer {
    /// Wraps a freshly allocated region.
    pub fn new(region: Arc<DmaRegion>) -> Self {
        Self { region }
    }

    /// Allocates an unregistered zero-filled buffer of `lines` lines.
    ///
    /// The buffer is not reachable by any device; useful for host-only
    /// processing and tests.
    pub fn zeroed(lines: usize) -> Self {
        Self::new(Arc::new(DmaRegion::zeroed(lines)))
    }

    /// Address the device uses to reach this buffer. Written into the
    /// address registers when the handshake is armed.
    pub fn iova(&self) -> u64 {
        self.region.iova()
    }

    /// Capacity in whole lines.
    pub fn len_lines(&self) -> usize {
        self.region.len_lines()
    }

    /// Capacity in 32-bit elements.
    pub fn len_words(&self) -> usize {
        self.region.len_words()
    }

    /// Capacity in bytes.
    pub fn len_bytes(&self) -> usize {
        self.region.len_bytes()
    }

    /// Loads element `index` with relaxed ordering.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn load(&self, index: usize) -> i32 {
        self.region.load(index)
    }

    /// Stores element `index` with relaxed ordering.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn store(&self, index: usize, value: i32) {
        self.region.store(index, value);
    }

    /// Reads line `index` as a whole record.
    pub fn line(&self, index: usize) -> Line {
        self.region.line(index)
    }

    /// Writes line `index` as a whole record.
    pub fn store_line(&self, index: usize, line: &Line) {
        self.region.store_line(index, line);
    }

    /// Weak device-side reference to the backing region.
    pub fn downgrade(&self) -> Weak<DmaRegion> {
        Arc::downgrade(&self.region)
    }
}

/// Source of accelerator-reachable memory.
pub trait DmaAllocator {
    /// Allocates a zero-filled shared buffer of `bytes` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AfuError::Allocation`] if `bytes` is zero, is not a whole
    /// number of lines, or exceeds the memory available to the device.
    fn allocate(&self, bytes: usize) -> Result<DmaBuffer>;
}

/// Validates an allocation request and returns its size in lines.
///
/// # Errors
///
/// Returns [`AfuError::Allocation`] for zero-sized or partial-line requests.
pub fn lines_for(bytes: usize) -> Result<usize> {
    if bytes == 0 {
        return Err(AfuError::allocation(bytes, "zero-sized buffer"));
    }
    if bytes % LINE_BYTES != 0 {
        return Err(AfuError::allocation(
            bytes,
            format!("size is not a multiple of the {LINE_BYTES} byte line"),
        ));
    }
    Ok(bytes / LINE_BYTES)
}

/// Ordinary host memory with a region table for address resolution.
///
/// Every allocation is registered under its published address so that a
/// device model can turn an address read from a register back into the
/// buffer it names.
#[derive(Debug, Default)]
pub struct HostMemory {
    regions: Mutex<BTreeMap<u64, Weak<DmaRegion>>>,
    limit: Option<usize>,
}

impl HostMemory {
    /// Host memory without an allocation cap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Host memory that refuses allocations once `bytes` are live.
    pub fn with_limit(bytes: usize) -> Self {
        Self {
            regions: Mutex::default(),
            limit: Some(bytes),
        }
    }

    /// Bytes held by buffers that are still alive.
    pub fn live_bytes(&self) -> usize {
        let regions = self.regions.lock().unwrap_or_else(PoisonError::into_inner);
        regions
            .values()
            .filter_map(Weak::upgrade)
            .map(|region| region.len_bytes())
            .sum()
    }

    /// Resolves a device address to a live region and a word offset in it.
    ///
    /// Returns `None` when no live buffer covers `addr` or when `addr` is
    /// not word aligned within the buffer.
    pub fn resolve(&self, addr: u64) -> Option<(Arc<DmaRegion>, usize)> {
        let regions = self.regions.lock().unwrap_or_else(PoisonError::into_inner);
        let (&base, weak) = regions.range(..=addr).next_back()?;
        let region = weak.upgrade()?;
        let offset = usize::try_from(addr - base).ok()?;
        if offset >= region.len_bytes() || offset % WORD_BYTES != 0 {
            return None;
        }
        Some((region, offset / WORD_BYTES))
    }
}

impl DmaAllocator for HostMemory {
    fn allocate(&self, bytes: usize) -> Result<DmaBuffer> {
        let lines = lines_for(bytes)?;
        let mut regions = self.regions.lock().unwrap_or_else(PoisonError::into_inner);
        regions.retain(|_, weak| weak.strong_count() > 0);

        if let Some(limit) = self.limit {
            let live: usize = regions
                .values()
                .filter_map(Weak::upgrade)
                .map(|region| region.len_bytes())
                .sum();
            if live.saturating_add(bytes) > limit {
                return Err(AfuError::allocation(
                    bytes,
                    format!("{live} of {limit} bytes already in use"),
                ));
            }
        }

        let region = DmaRegion::try_zeroed(lines)
            .map_err(|e| AfuError::allocation(bytes, e.to_string()))?;
        let region = Arc::new(region);
        regions.insert(region.iova(), Arc::downgrade(&region));
        tracing::debug!("Allocated shared buffer: iova={:#x}, lines={lines}", region.iova());
        Ok(DmaBuffer::new(region))
    }
}
