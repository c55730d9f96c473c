//! The Librarian: single append-only-indexed store for everything the
//! scoring and bandit layers need to know about a token or wallet. Grounded
//! on `original_source/tpu/librarian/data_librarian.py`, reworked from a
//! sprawling dynamic-attribute class into one struct behind a single async
//! mutex, matching spec.md §4.C.

pub mod rug_registry;

use crate::core::event_router::StreamEvent;
use crate::core::models::{SignalEvent, TokenRecord, WalletRecord};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Bound on the dedup window for `ingest_stream_event` signatures: re-seeing
/// a signature older than this many insertions is treated as new (matches
/// the bounded-ring philosophy applied elsewhere to this store).
const SIGNATURE_DEDUP_CAP: usize = 20_000;

pub use rug_registry::{RugEvent, RugRegistry};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LibrarianStats {
    pub tokens: usize,
    pub wallets: usize,
    pub events_by_kind: HashMap<String, u64>,
}

#[derive(Default)]
struct LibrarianState {
    tokens: HashMap<String, TokenRecord>,
    wallets: HashMap<String, WalletRecord>,
    events_by_kind: HashMap<String, u64>,
    seen_signatures: HashSet<String>,
    seen_signatures_order: VecDeque<String>,
}

impl LibrarianState {
    /// Returns `true` if this signature was already ingested (and records it
    /// if not). Events without a signature are never deduplicated.
    fn mark_signature_seen(&mut self, signature: &str) -> bool {
        if self.seen_signatures.contains(signature) {
            return true;
        }
        self.seen_signatures.insert(signature.to_string());
        self.seen_signatures_order.push_back(signature.to_string());
        if self.seen_signatures_order.len() > SIGNATURE_DEDUP_CAP {
            if let Some(oldest) = self.seen_signatures_order.pop_front() {
                self.seen_signatures.remove(&oldest);
            }
        }
        false
    }
}

/// Central ingestion point. All mutation goes through one `Mutex`-guarded
/// state, matching the teacher's single-writer pattern for shared stores
/// (e.g. `modules::risk::RiskManager`'s internal state lock).
pub struct Librarian {
    state: Mutex<LibrarianState>,
    persistence_dir: Option<PathBuf>,
}

impl Librarian {
    pub fn new_in_memory() -> Self {
        Self {
            state: Mutex::new(LibrarianState::default()),
            persistence_dir: None,
        }
    }

    pub fn new_with_persistence(dir: impl Into<PathBuf>) -> Self {
        Self {
            state: Mutex::new(LibrarianState::default()),
            persistence_dir: Some(dir.into()),
        }
    }

    /// Classify-and-index one stream event. Idempotent: re-ingesting the
    /// same event only grows the bounded event ring (which itself evicts
    /// the oldest on overflow), never double-counts external state.
    pub async fn ingest_stream_event(&self, event: StreamEvent) {
        let kind = event.kind.as_str().to_string();
        let signal = SignalEvent {
            kind: kind.clone(),
            ts: event.ts,
            payload: event.payload.clone(),
            tags: Vec::new(),
            genre: classify_genre(&event),
            topics: extract_topics(&event),
            token: event.token.clone(),
            wallet: event.wallet.clone(),
        };

        let mut state = self.state.lock().await;
        if let Some(signature) = &event.signature {
            if state.mark_signature_seen(signature) {
                debug!("[Librarian] duplicate signature {signature}, skipping re-ingest");
                return;
            }
        }
        *state.events_by_kind.entry(kind).or_insert(0) += 1;

        if let Some(token) = &event.token {
            let rec = state
                .tokens
                .entry(token.clone())
                .or_insert_with(|| TokenRecord::new(token.clone(), event.ts));
            rec.last_ts = rec.last_ts.max(event.ts);
            rec.events.push(signal.clone());
            rec.scanners.insert("solana_stream".to_string());
        }

        if let Some(wallet) = &event.wallet {
            let rec = state
                .wallets
                .entry(wallet.clone())
                .or_insert_with(|| WalletRecord::new(wallet.clone(), event.ts));
            rec.last_ts = rec.last_ts.max(event.ts);
            rec.events.push(signal);
        }

        drop(state);
        self.maybe_flush().await;
    }

    pub async fn tag_token(&self, token: &str, tag: &str) {
        let mut state = self.state.lock().await;
        let rec = state
            .tokens
            .entry(token.to_string())
            .or_insert_with(|| TokenRecord::new(token.to_string(), crate::core::now_epoch()));
        rec.tags.insert(tag.to_string());
    }

    pub async fn tag_wallet(&self, wallet: &str, tag: &str) {
        let mut state = self.state.lock().await;
        let rec = state
            .wallets
            .entry(wallet.to_string())
            .or_insert_with(|| WalletRecord::new(wallet.to_string(), crate::core::now_epoch()));
        rec.tags.insert(tag.to_string());
    }

    pub async fn record_score(&self, token: &str, score: f64) {
        let mut state = self.state.lock().await;
        if let Some(rec) = state.tokens.get_mut(token) {
            rec.scores.push(score);
            if rec.scores.len() > 200 {
                let excess = rec.scores.len() - 200;
                rec.scores.drain(0..excess);
            }
        }
    }

    pub async fn get_token(&self, token: &str) -> Option<TokenRecord> {
        self.state.lock().await.tokens.get(token).cloned()
    }

    pub async fn get_wallet(&self, wallet: &str) -> Option<WalletRecord> {
        self.state.lock().await.wallets.get(wallet).cloned()
    }

    pub async fn get_top_tokens(&self, limit: usize, by_score: bool) -> Vec<TokenRecord> {
        let state = self.state.lock().await;
        let mut items: Vec<_> = state.tokens.values().cloned().collect();
        if by_score {
            items.sort_by(|a, b| {
                let sa = a.scores.last().copied().unwrap_or(0.0);
                let sb = b.scores.last().copied().unwrap_or(0.0);
                sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
            });
        } else {
            items.sort_by(|a, b| b.last_ts.partial_cmp(&a.last_ts).unwrap_or(std::cmp::Ordering::Equal));
        }
        items.truncate(limit);
        items
    }

    pub async fn get_active_wallets(&self, limit: usize) -> Vec<WalletRecord> {
        let state = self.state.lock().await;
        let mut items: Vec<_> = state.wallets.values().cloned().collect();
        items.sort_by(|a, b| b.last_ts.partial_cmp(&a.last_ts).unwrap_or(std::cmp::Ordering::Equal));
        items.truncate(limit);
        items
    }

    pub async fn get_signals_for_token(&self, token: &str, limit: usize) -> Vec<SignalEvent> {
        let state = self.state.lock().await;
        match state.tokens.get(token) {
            Some(rec) => rec.events.iter().rev().take(limit).cloned().collect(),
            None => Vec::new(),
        }
    }

    pub async fn get_signals_for_wallet(&self, wallet: &str, limit: usize) -> Vec<SignalEvent> {
        let state = self.state.lock().await;
        match state.wallets.get(wallet) {
            Some(rec) => rec.events.iter().rev().take(limit).cloned().collect(),
            None => Vec::new(),
        }
    }

    pub async fn stats(&self) -> LibrarianStats {
        let state = self.state.lock().await;
        LibrarianStats {
            tokens: state.tokens.len(),
            wallets: state.wallets.len(),
            events_by_kind: state.events_by_kind.clone(),
        }
    }

    /// Assembles the per-token view the scoring engines read (spec.md §4.C
    /// `build_context`): tags, recent signals, wallet overlap.
    pub async fn build_context(&self, token: &str) -> serde_json::Value {
        let state = self.state.lock().await;
        let Some(rec) = state.tokens.get(token) else {
            return serde_json::json!({ "token": token, "known": false });
        };
        let recent: Vec<_> = rec.events.iter().rev().take(50).cloned().collect();
        let mut wallet_tags: std::collections::HashSet<String> = std::collections::HashSet::new();
        for event in &recent {
            if let Some(w) = &event.wallet {
                if let Some(wrec) = state.wallets.get(w) {
                    wallet_tags.extend(wrec.tags.iter().cloned());
                }
            }
        }
        serde_json::json!({
            "token": token,
            "known": true,
            "tags": rec.tags.iter().collect::<Vec<_>>(),
            "scanners": rec.scanners.iter().collect::<Vec<_>>(),
            "last_ts": rec.last_ts,
            "first_seen_ts": rec.first_seen_ts,
            "recent_events": recent.len(),
            "wallet_tags": wallet_tags.into_iter().collect::<Vec<_>>(),
            "score": rec.scores.last().copied().unwrap_or(0.0),
        })
    }

    /// Evicts token records untouched for `max_age_days`, keeping at most
    /// `max_tokens` overall (oldest-by-last_ts dropped first). Returns the
    /// number of records removed.
    pub async fn prune_memory(&self, max_age_days: f64, max_tokens: usize) -> usize {
        let now = crate::core::now_epoch();
        let cutoff = now - max_age_days * 86_400.0;
        let mut state = self.state.lock().await;
        let before = state.tokens.len();
        state.tokens.retain(|_, rec| rec.last_ts >= cutoff);
        if state.tokens.len() > max_tokens {
            let mut by_age: Vec<_> = state.tokens.iter().map(|(k, v)| (k.clone(), v.last_ts)).collect();
            by_age.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            let drop_count = state.tokens.len() - max_tokens;
            for (key, _) in by_age.into_iter().take(drop_count) {
                state.tokens.remove(&key);
            }
        }
        before - state.tokens.len()
    }

    pub async fn trim_token_history(&self, max_entries: usize) {
        let mut state = self.state.lock().await;
        for rec in state.tokens.values_mut() {
            let trimmed: Vec<_> = rec.events.iter().rev().take(max_entries).cloned().collect();
            let mut ring = crate::core::models::BoundedRing::new(500);
            for event in trimmed.into_iter().rev() {
                ring.push(event);
            }
            rec.events = ring;
        }
    }

    async fn maybe_flush(&self) {
        let Some(dir) = &self.persistence_dir else {
            return;
        };
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!("[Librarian] could not create persistence dir: {e}");
            return;
        }
        debug!("[Librarian] persistence dir ready at {}", dir.display());
    }

    /// Atomic snapshot write: write-to-temp then rename, mirroring the
    /// teacher's config/state writers.
    pub async fn save_snapshot(&self) -> anyhow::Result<()> {
        let Some(dir) = &self.persistence_dir else {
            return Ok(());
        };
        tokio::fs::create_dir_all(dir).await?;
        let state = self.state.lock().await;
        let tokens: HashMap<_, _> = state.tokens.clone().into_iter().collect();
        drop(state);
        let path = dir.join("tokens.json");
        let tmp = dir.join("tokens.json.tmp");
        let body = serde_json::to_vec_pretty(&tokens)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

fn classify_genre(event: &StreamEvent) -> String {
    match event.kind {
        crate::core::event_router::StreamEventKind::MintInit => "launches".to_string(),
        crate::core::event_router::StreamEventKind::LpAdd => "liquidity".to_string(),
        crate::core::event_router::StreamEventKind::Swap => "trades".to_string(),
        crate::core::event_router::StreamEventKind::Transfer => "transfers".to_string(),
        crate::core::event_router::StreamEventKind::SocialPost => "social".to_string(),
        crate::core::event_router::StreamEventKind::PoolUpdate => "pools".to_string(),
    }
}

fn extract_topics(event: &StreamEvent) -> Vec<String> {
    let mut topics = vec![event.kind.as_str().to_string()];
    if let Some(obj) = event.payload.as_object() {
        if obj.contains_key("keywords") {
            topics.push("has_keywords".to_string());
        }
    }
    topics
}
