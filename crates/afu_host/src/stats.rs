//! Completion latency statistics and translation reports.
//!
//! Collects the time each copy test spent waiting for the completion flag
//! and prints it as a summary with a coarse histogram. Translation counters
//! reported by the device are printed in the usual VTP layout.

use afu_core::device::TranslationStats;
use std::time::Duration;

const BUCKETS: usize = 20;

/// Histogram bucket width.
const BUCKET_NS: u64 = 1_000_000;

/// Tracks completion latency across copy tests.
#[derive(Debug, Clone)]
pub struct LatencyStats {
    pub min: u64,
    pub max: u64,
    pub sum: u64,
    pub count: u64,
    pub buckets: [u64; BUCKETS],
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyStats {
    pub fn new() -> Self {
        Self {
            min: u64::MAX,
            max: 0,
            sum: 0,
            count: 0,
            buckets: [0; BUCKETS],
        }
    }

    /// Records one wait.
    pub fn update(&mut self, waited: Duration) {
        let nanos = u64::try_from(waited.as_nanos()).unwrap_or(u64::MAX);
        self.min = self.min.min(nanos);
        self.max = self.max.max(nanos);
        self.sum = self.sum.saturating_add(nanos);
        self.count += 1;

        let idx = (nanos / BUCKET_NS).min(BUCKETS as u64 - 1) as usize;
        self.buckets[idx] += 1;
    }

    /// Average in nanoseconds, 0.0 when empty.
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }

    /// Prints count, min/avg/max and the non-empty histogram buckets.
    pub fn print_report(&self) {
        println!("\nCompletion Latency (poll wait)");
        println!("Count: {}", self.count);
        if self.count == 0 {
            return;
        }

        println!("Min:   {:.3} ms", self.min as f64 / 1e6);
        println!("Avg:   {:.3} ms", self.avg() / 1e6);
        println!("Max:   {:.3} ms", self.max as f64 / 1e6);

        println!("Distribution (1ms buckets):");
        for (i, &count) in self.buckets.iter().enumerate() {
            if count > 0 {
                let open_end = if i == BUCKETS - 1 { ">" } else { "" };
                println!("[{:3}-{:3}{} ms]: {}", i, i + 1, open_end, count);
            }
        }
    }
}

/// Prints translation counters in the VTP report layout.
pub fn print_translation_report(stats: &TranslationStats) {
    println!("\nVTP Statistics");
    println!("Failed translations: {}", stats.failed_translations);
    if stats.failed_translations > 0 {
        println!("Last failed VA:      {:#x}", stats.last_failed_va);
    }
    println!("PT walk busy cycles: {}", stats.walk_busy_cycles);
    println!(
        "4KB pages: {} hits, {} misses",
        stats.tlb_hits_4k, stats.tlb_misses_4k
    );
    println!(
        "2MB pages: {} hits, {} misses",
        stats.tlb_hits_2m, stats.tlb_misses_2m
    );
}
