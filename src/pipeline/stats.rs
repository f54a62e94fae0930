//! In-memory processing statistics.
//!
//! A synchronized aggregator replaces the reference design's global
//! stats dict: workers call explicit increment operations, readers get
//! point-in-time snapshots. Counters are process-lifetime scoped and
//! are not a source of truth — durable aggregates can be derived from
//! the `sensor_data` table by an external reporting consumer.

use crate::types::{LineCounters, ProductionLine};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Why an event was dropped before completing the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Decode,
    UnknownCategory,
    Inference,
    Persistence,
    QueueFull,
}

/// Cumulative drop counters. Drops are never silent: every one is
/// counted here and logged where it happens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DropCounts {
    pub decode: u64,
    pub unknown_category: u64,
    pub inference: u64,
    pub persistence: u64,
    pub queue_full: u64,
}

impl DropCounts {
    pub fn total(&self) -> u64 {
        self.decode + self.unknown_category + self.inference + self.persistence + self.queue_full
    }
}

/// Point-in-time view of the aggregator.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_processed: u64,
    pub defects_detected: u64,
    pub by_line: HashMap<ProductionLine, LineCounters>,
    pub dropped: DropCounts,
}

/// Thread-safe counters shared by all workers and the API.
pub struct StatsAggregator {
    by_line: Mutex<HashMap<ProductionLine, LineCounters>>,
    decode_drops: AtomicU64,
    unknown_category_drops: AtomicU64,
    inference_drops: AtomicU64,
    persistence_drops: AtomicU64,
    queue_full_drops: AtomicU64,
}

impl StatsAggregator {
    pub fn new() -> Self {
        let mut by_line = HashMap::new();
        for line in ProductionLine::ALL {
            by_line.insert(line, LineCounters::default());
        }
        Self {
            by_line: Mutex::new(by_line),
            decode_drops: AtomicU64::new(0),
            unknown_category_drops: AtomicU64::new(0),
            inference_drops: AtomicU64::new(0),
            persistence_drops: AtomicU64::new(0),
            queue_full_drops: AtomicU64::new(0),
        }
    }

    /// Record one fully successful pipeline run (decode through persist).
    pub fn record_processed(&self, line: ProductionLine, defect: bool) {
        let mut by_line = self.by_line.lock().expect("stats lock poisoned");
        let counters = by_line.entry(line).or_default();
        counters.total_processed += 1;
        if defect {
            counters.total_defects += 1;
        }
    }

    pub fn record_drop(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Decode => &self.decode_drops,
            DropReason::UnknownCategory => &self.unknown_category_drops,
            DropReason::Inference => &self.inference_drops,
            DropReason::Persistence => &self.persistence_drops,
            DropReason::QueueFull => &self.queue_full_drops,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let by_line = self.by_line.lock().expect("stats lock poisoned").clone();
        let total_processed = by_line.values().map(|c| c.total_processed).sum();
        let defects_detected = by_line.values().map(|c| c.total_defects).sum();
        StatsSnapshot {
            total_processed,
            defects_detected,
            by_line,
            dropped: DropCounts {
                decode: self.decode_drops.load(Ordering::Relaxed),
                unknown_category: self.unknown_category_drops.load(Ordering::Relaxed),
                inference: self.inference_drops.load(Ordering::Relaxed),
                persistence: self.persistence_drops.load(Ordering::Relaxed),
                queue_full: self.queue_full_drops.load(Ordering::Relaxed),
            },
        }
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let stats = StatsAggregator::new();
        stats.record_processed(ProductionLine::Etching, false);
        stats.record_processed(ProductionLine::Etching, true);
        stats.record_processed(ProductionLine::Deposition, false);
        stats.record_drop(DropReason::Decode);
        stats.record_drop(DropReason::QueueFull);

        let snap = stats.snapshot();
        assert_eq!(snap.total_processed, 3);
        assert_eq!(snap.defects_detected, 1);
        assert_eq!(snap.by_line[&ProductionLine::Etching].total_processed, 2);
        assert_eq!(snap.by_line[&ProductionLine::Etching].total_defects, 1);
        assert_eq!(snap.by_line[&ProductionLine::Lithography].total_processed, 0);
        assert_eq!(snap.dropped.decode, 1);
        assert_eq!(snap.dropped.queue_full, 1);
        assert_eq!(snap.dropped.total(), 2);
    }

    #[test]
    fn lost_update_free_under_concurrent_increments() {
        let stats = std::sync::Arc::new(StatsAggregator::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let stats = stats.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    stats.record_processed(ProductionLine::Lithography, true);
                    stats.record_drop(DropReason::Persistence);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.total_processed, 8000);
        assert_eq!(snap.defects_detected, 8000);
        assert_eq!(snap.dropped.persistence, 8000);
    }
}
