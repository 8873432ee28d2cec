use afu_core::device::TranslationStats;
use afu_core::dma::{DmaRegion, HostMemory};
use std::collections::HashSet;
use std::sync::Arc;

const PAGE_SHIFT_4K: u32 = 12;
const PAGE_SHIFT_2M: u32 = 21;

/// Buffers at least this large are mapped with 2 MB pages.
const HUGE_PAGE_THRESHOLD: usize = 1 << PAGE_SHIFT_2M;

/// Cycles charged for one page table walk.
const WALK_CYCLES: u64 = 34;

/// Device-side virtual-to-physical translation.
///
/// Resolves published addresses through the host memory's region table and
/// keeps a TLB of pages already translated. Counters follow the usual VTP
/// report: failed translations, walk cycles, and hits/misses split by page
/// size.
#[derive(Debug, Default)]
pub struct Translator {
    tlb: HashSet<(u32, u64)>,
    stats: TranslationStats,
}

impl Translator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> TranslationStats {
        self.stats
    }

    /// Resolves the buffer starting at `addr`.
    ///
    /// Returns `None` and counts a failed translation when no live buffer
    /// starts there.
    pub fn resolve(&mut self, memory: &HostMemory, addr: u64) -> Option<Arc<DmaRegion>> {
        match memory.resolve(addr) {
            Some((region, 0)) => Some(region),
            _ => {
                self.stats.failed_translations += 1;
                self.stats.last_failed_va = addr;
                tracing::warn!("VTP failed translating VA {addr:#x}");
                None
            }
        }
    }

    /// Accounts one access to `addr` inside `region`.
    pub fn touch(&mut self, region: &DmaRegion, addr: u64) {
        let huge = region.len_bytes() >= HUGE_PAGE_THRESHOLD;
        let shift = if huge { PAGE_SHIFT_2M } else { PAGE_SHIFT_4K };
        let hit = !self.tlb.insert((shift, addr >> shift));

        match (huge, hit) {
            (false, true) => self.stats.tlb_hits_4k += 1,
            (false, false) => self.stats.tlb_misses_4k += 1,
            (true, true) => self.stats.tlb_hits_2m += 1,
            (true, false) => self.stats.tlb_misses_2m += 1,
        }
        if !hit {
            self.stats.walk_busy_cycles += WALK_CYCLES;
        }
    }
}
