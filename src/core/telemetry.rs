//! Lightweight runtime gauges for the core pipeline, grounded on
//! `modules::metrics::MetricsCollector`'s counter/latency style but scoped to
//! the handful of numbers spec.md §3 calls out: firehose packet rate, decode
//! latency, event-router queue depth, bandit arm pulls, guardian restarts.
//! Kept dependency-free (plain atomics behind one struct) rather than wiring
//! in a registry crate, since the teacher's own `MetricsCollector` takes the
//! same homegrown-struct approach instead of an external metrics exporter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed-weight exponential moving average over millisecond samples,
/// stored as a scaled integer so it can live behind a plain `AtomicU64`
/// rather than a lock.
struct AtomicEwmaMs {
    scaled: AtomicU64,
}

const EWMA_SCALE: f64 = 1000.0;
const EWMA_ALPHA: f64 = 0.2;

impl AtomicEwmaMs {
    fn new() -> Self {
        Self { scaled: AtomicU64::new(0) }
    }

    fn observe(&self, sample_ms: f64) {
        loop {
            let prev_raw = self.scaled.load(Ordering::Relaxed);
            let prev = prev_raw as f64 / EWMA_SCALE;
            let next = if prev_raw == 0 {
                sample_ms
            } else {
                EWMA_ALPHA * sample_ms + (1.0 - EWMA_ALPHA) * prev
            };
            let next_raw = (next * EWMA_SCALE) as u64;
            if self
                .scaled
                .compare_exchange(prev_raw, next_raw, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    fn get(&self) -> f64 {
        self.scaled.load(Ordering::Relaxed) as f64 / EWMA_SCALE
    }
}

/// Process-wide counters for the core decision/execution pipeline. Cheap
/// enough to update on every packet; a composition root holds one instance
/// behind an `Arc` and threads it into the firehose, event router, bandit
/// and guardian as they're wired up.
pub struct CoreTelemetry {
    packets_total: AtomicU64,
    decode_errors_total: AtomicU64,
    decode_latency_ms: AtomicEwmaMs,
    queue_depth: AtomicU64,
    bandit_pulls_total: AtomicU64,
    guardian_restarts_total: AtomicU64,
}

impl CoreTelemetry {
    pub fn new() -> Self {
        Self {
            packets_total: AtomicU64::new(0),
            decode_errors_total: AtomicU64::new(0),
            decode_latency_ms: AtomicEwmaMs::new(),
            queue_depth: AtomicU64::new(0),
            bandit_pulls_total: AtomicU64::new(0),
            guardian_restarts_total: AtomicU64::new(0),
        }
    }

    pub fn record_packet(&self, decode_latency_ms: f64, decode_failed: bool) {
        self.packets_total.fetch_add(1, Ordering::Relaxed);
        if decode_failed {
            self.decode_errors_total.fetch_add(1, Ordering::Relaxed);
        }
        self.decode_latency_ms.observe(decode_latency_ms);
    }

    pub fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn record_bandit_pull(&self) {
        self.bandit_pulls_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_guardian_restart(&self) {
        self.guardian_restarts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            packets_total: self.packets_total.load(Ordering::Relaxed),
            decode_errors_total: self.decode_errors_total.load(Ordering::Relaxed),
            decode_latency_ms_ewma: self.decode_latency_ms.get(),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            bandit_pulls_total: self.bandit_pulls_total.load(Ordering::Relaxed),
            guardian_restarts_total: self.guardian_restarts_total.load(Ordering::Relaxed),
        }
    }
}

impl Default for CoreTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub packets_total: u64,
    pub decode_errors_total: u64,
    pub decode_latency_ms_ewma: f64,
    pub queue_depth: u64,
    pub bandit_pulls_total: u64,
    pub guardian_restarts_total: u64,
}
