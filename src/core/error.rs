//! Error types for the core decision/execution pipeline.
//!
//! Mirrors `modules::error_handling::OvermindError` in spirit: infra errors
//! are retryable and cross task boundaries as `anyhow::Error`, while decision
//! and gate failures are data (see `GateFailure`), never exceptions.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("firehose stream error: {0}")]
    Firehose(String),

    #[error("malformed packet dropped: {0}")]
    MalformedPacket(String),

    #[error("librarian error: {0}")]
    Librarian(String),

    #[error("feature store error: {0}")]
    FeatureStore(String),

    #[error("scoring error: {0}")]
    Scoring(String),

    #[error("executor error: {0}")]
    Executor(String),

    #[error("invalid base58 identifier: {0}")]
    InvalidAddress(String),

    #[error("state corruption, falling back to defaults: {0}")]
    StateCorruption(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Reason a hard gate rejected a candidate. Never propagated as an
/// exception — always returned as part of a `Verdict`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GateFailure {
    pub gate: String,
    pub reason: String,
}

impl GateFailure {
    pub fn new(gate: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            gate: gate.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for GateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.gate, self.reason)
    }
}
