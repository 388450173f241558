//! Flush statistics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Outcome of one successful flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries executed from the chunk
    pub entries: u64,
    /// Rows reported by the server across all executions
    pub rows_affected: u64,
    /// Wall time of the flush, connection setup included
    pub duration: Duration,
}

/// Point-in-time view of the sink counters
#[derive(Debug, Clone, Default)]
pub struct FlushStats {
    /// Chunks fully applied
    pub chunks_written: u64,
    /// Chunks whose flush raised an error
    pub chunks_failed: u64,
    /// Entries applied by successful flushes
    pub entries_written: u64,
    /// Entries left applied by failed autocommit flushes
    pub entries_partially_applied: u64,
    /// Rows reported by the server
    pub rows_affected: u64,
    /// Total time spent in successful flushes (milliseconds)
    pub total_write_time_ms: u64,
    /// Average entries per second over successful flushes
    pub entries_per_second: f64,
}

/// Atomic flush counters, shared by concurrent flushes
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct AtomicFlushStats {
    pub chunks_written: AtomicU64,
    pub chunks_failed: AtomicU64,
    pub entries_written: AtomicU64,
    pub entries_partially_applied: AtomicU64,
    pub rows_affected: AtomicU64,
    pub total_write_time_ms: AtomicU64,
}

impl AtomicFlushStats {
    /// Record a successful flush
    pub fn record_flush(&self, report: &FlushReport) {
        self.chunks_written.fetch_add(1, Ordering::Relaxed);
        self.entries_written
            .fetch_add(report.entries, Ordering::Relaxed);
        self.rows_affected
            .fetch_add(report.rows_affected, Ordering::Relaxed);
        self.total_write_time_ms
            .fetch_add(report.duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a failed flush that left `applied` entries behind
    pub fn record_failure(&self, applied: u64) {
        self.chunks_failed.fetch_add(1, Ordering::Relaxed);
        self.entries_partially_applied
            .fetch_add(applied, Ordering::Relaxed);
    }

    /// Get a snapshot
    pub fn snapshot(&self) -> FlushStats {
        let entries = self.entries_written.load(Ordering::Relaxed);
        let time_ms = self.total_write_time_ms.load(Ordering::Relaxed);
        let eps = if time_ms > 0 {
            (entries as f64 * 1000.0) / time_ms as f64
        } else {
            0.0
        };

        FlushStats {
            chunks_written: self.chunks_written.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            entries_written: entries,
            entries_partially_applied: self.entries_partially_applied.load(Ordering::Relaxed),
            rows_affected: self.rows_affected.load(Ordering::Relaxed),
            total_write_time_ms: time_ms,
            entries_per_second: eps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_accumulates() {
        let stats = AtomicFlushStats::default();
        stats.record_flush(&FlushReport {
            entries: 3,
            rows_affected: 3,
            duration: Duration::from_millis(100),
        });
        stats.record_flush(&FlushReport {
            entries: 1,
            rows_affected: 0,
            duration: Duration::from_millis(100),
        });
        stats.record_failure(2);

        let snap = stats.snapshot();
        assert_eq!(snap.chunks_written, 2);
        assert_eq!(snap.chunks_failed, 1);
        assert_eq!(snap.entries_written, 4);
        assert_eq!(snap.entries_partially_applied, 2);
        assert_eq!(snap.rows_affected, 3);
        assert_eq!(snap.total_write_time_ms, 200);
        assert!((snap.entries_per_second - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = AtomicFlushStats::default().snapshot();
        assert_eq!(snap.chunks_written, 0);
        assert_eq!(snap.entries_per_second, 0.0);
    }
}
