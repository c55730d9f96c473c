//! Core decision/execution pipeline: firehose ingestion, librarian indexing,
//! feature store, scoring, bandit-assisted sizing, execution, auto-sell,
//! scheduling and crash supervision. Deliberately decoupled from the
//! AI/persona layers elsewhere in this crate (spec.md §1 Non-goals).

pub mod auto_sell;
pub mod bandit;
pub mod error;
pub mod event_router;
pub mod executor;
pub mod feature_store;
pub mod firehose;
pub mod guardian;
pub mod insights;
pub mod librarian;
pub mod models;
pub mod notifier;
pub mod rpc;
pub mod scheduler;
pub mod scoring;
pub mod telemetry;
pub mod wallet;

/// Seconds since the Unix epoch, as an `f64`. Every timestamp field in this
/// module tree is stamped through here so tests can inject a fixed clock by
/// constructing values directly instead of calling this function.
pub fn now_epoch() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
