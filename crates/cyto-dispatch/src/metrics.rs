//! Dispatcher execution metrics.
//!
//! Atomic counters with a plain snapshot DTO. Fallbacks count separately
//! from successes so a healthy-looking execution count can't hide a
//! degraded accelerator.

use cyto_catalog::Backend;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DispatchMetrics {
    accel_executions: AtomicU64,
    worker_executions: AtomicU64,
    inline_executions: AtomicU64,
    accel_fallbacks: AtomicU64,
    worker_fallbacks: AtomicU64,
    pool_restarts: AtomicU64,
    total_elapsed_ns: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchMetricsSnapshot {
    pub accel_executions: u64,
    pub worker_executions: u64,
    pub inline_executions: u64,
    pub accel_fallbacks: u64,
    pub worker_fallbacks: u64,
    pub pool_restarts: u64,
    pub total_elapsed_ns: u64,
}

impl DispatchMetrics {
    pub fn record_execution(&self, backend: Backend, elapsed_ns: u64) {
        match backend {
            Backend::Accelerator => self.accel_executions.fetch_add(1, Ordering::Relaxed),
            Backend::Worker => self.worker_executions.fetch_add(1, Ordering::Relaxed),
            Backend::Inline => self.inline_executions.fetch_add(1, Ordering::Relaxed),
        };
        self.total_elapsed_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
    }

    /// A fallback away from `from` (accelerator → worker, worker →
    /// inline).
    pub fn record_fallback(&self, from: Backend) {
        match from {
            Backend::Accelerator => self.accel_fallbacks.fetch_add(1, Ordering::Relaxed),
            Backend::Worker => self.worker_fallbacks.fetch_add(1, Ordering::Relaxed),
            Backend::Inline => 0,
        };
    }

    pub fn record_pool_restart(&self) {
        self.pool_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchMetricsSnapshot {
        DispatchMetricsSnapshot {
            accel_executions: self.accel_executions.load(Ordering::Relaxed),
            worker_executions: self.worker_executions.load(Ordering::Relaxed),
            inline_executions: self.inline_executions.load(Ordering::Relaxed),
            accel_fallbacks: self.accel_fallbacks.load(Ordering::Relaxed),
            worker_fallbacks: self.worker_fallbacks.load(Ordering::Relaxed),
            pool_restarts: self.pool_restarts.load(Ordering::Relaxed),
            total_elapsed_ns: self.total_elapsed_ns.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.accel_executions.store(0, Ordering::Relaxed);
        self.worker_executions.store(0, Ordering::Relaxed);
        self.inline_executions.store(0, Ordering::Relaxed);
        self.accel_fallbacks.store(0, Ordering::Relaxed);
        self.worker_fallbacks.store(0, Ordering::Relaxed);
        self.pool_restarts.store(0, Ordering::Relaxed);
        self.total_elapsed_ns.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_resets() {
        let m = DispatchMetrics::default();
        m.record_execution(Backend::Worker, 1_000);
        m.record_execution(Backend::Inline, 500);
        m.record_fallback(Backend::Accelerator);
        let snap = m.snapshot();
        assert_eq!(snap.worker_executions, 1);
        assert_eq!(snap.inline_executions, 1);
        assert_eq!(snap.accel_fallbacks, 1);
        assert_eq!(snap.total_elapsed_ns, 1_500);

        m.reset();
        assert_eq!(m.snapshot(), DispatchMetricsSnapshot::default());
    }
}
