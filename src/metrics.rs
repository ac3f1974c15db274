//! Connection counters updated at component boundaries.

use crate::reactor::io::ReadReport;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A plain copy of the counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Connections accepted since start.
    pub accepted: u64,
    /// Connection handlers currently alive, whether or not still registered.
    pub active: u64,
    /// Connections torn down after the peer closed cleanly.
    pub closed_clean: u64,
    /// Connections torn down after a terminal socket error.
    pub closed_error: u64,
    /// Failed `accept` calls that were not "would block".
    pub accept_errors: u64,
    /// Lines completed by a delimiter.
    pub lines: u64,
    /// Lines flushed because the high watermark was reached.
    pub forced_flushes: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    active: AtomicU64,
    closed_clean: AtomicU64,
    closed_error: AtomicU64,
    accept_errors: AtomicU64,
    lines: AtomicU64,
    forced_flushes: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

/// Shared, lock-free server counters.
///
/// Cloning is cheap and every clone observes the same counters, so a handle
/// can be kept on another thread while the server runs.
#[derive(Debug, Clone, Default)]
pub struct ServerMetrics {
    counters: Arc<Counters>,
}

impl ServerMetrics {
    /// Creates a fresh set of counters, all zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every counter. Counters are read one at a time, so a snapshot
    /// taken while the server runs may mix two moments.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        MetricsSnapshot {
            accepted: c.accepted.load(Ordering::Relaxed),
            active: c.active.load(Ordering::Relaxed),
            closed_clean: c.closed_clean.load(Ordering::Relaxed),
            closed_error: c.closed_error.load(Ordering::Relaxed),
            accept_errors: c.accept_errors.load(Ordering::Relaxed),
            lines: c.lines.load(Ordering::Relaxed),
            forced_flushes: c.forced_flushes.load(Ordering::Relaxed),
            bytes_in: c.bytes_in.load(Ordering::Relaxed),
            bytes_out: c.bytes_out.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_accept(&self) {
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Paired with [`record_release`](Self::record_release) over the lifetime
    /// of one connection handler.
    pub(crate) fn record_open(&self) {
        self.counters.active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_release(&self) {
        self.counters.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_accept_error(&self) {
        self.counters.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_close(&self, clean: bool) {
        if clean {
            self.counters.closed_clean.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.closed_error.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_read(&self, report: ReadReport) {
        let c = &self.counters;
        c.bytes_in.fetch_add(report.bytes as u64, Ordering::Relaxed);
        c.lines.fetch_add(report.lines as u64, Ordering::Relaxed);
        c.forced_flushes.fetch_add(report.forced_flushes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self, bytes: usize) {
        self.counters.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = ServerMetrics::new();
        let observer = metrics.clone();

        metrics.record_accept();
        metrics.record_open();
        metrics.record_accept();
        metrics.record_open();
        metrics.record_read(ReadReport {
            bytes: 10,
            lines: 2,
            forced_flushes: 1,
        });
        metrics.record_close(true);
        metrics.record_release();

        let snapshot = observer.snapshot();
        assert_eq!(snapshot.accepted, 2);
        assert_eq!(snapshot.active, 1);
        assert_eq!(snapshot.closed_clean, 1);
        assert_eq!(snapshot.lines, 2);
        assert_eq!(snapshot.forced_flushes, 1);
        assert_eq!(snapshot.bytes_in, 10);
    }
}
