//! Classifies raw stream events and dispatches each to the librarian and,
//! for mint/LP events, onward to the snipe scoring path. Grounded on
//! `original_source/tpu/librarian/data_librarian.py::ingest_stream_event`
//! and its genre classifier, reworked here as a typed enum instead of
//! string-sniffed dict keys.

use crate::core::librarian::Librarian;
use crate::core::models::TradeEvent;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StreamEventKind {
    MintInit,
    LpAdd,
    Swap,
    Transfer,
    SocialPost,
    PoolUpdate,
}

impl StreamEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamEventKind::MintInit => "mint_init",
            StreamEventKind::LpAdd => "lp_add",
            StreamEventKind::Swap => "swap",
            StreamEventKind::Transfer => "transfer",
            StreamEventKind::SocialPost => "social_post",
            StreamEventKind::PoolUpdate => "pool_update",
        }
    }

    fn is_fast_snipe_trigger(&self) -> bool {
        matches!(self, StreamEventKind::MintInit | StreamEventKind::LpAdd)
    }
}

/// A classified stream event ready for librarian ingestion.
///
/// `signature` is the transaction signature the event was derived from,
/// when one exists (stream events synthesized from social posts or
/// already-deduplicated sources may leave it `None`). The librarian uses
/// it to make re-ingestion of the same on-chain event a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub kind: StreamEventKind,
    pub token: Option<String>,
    pub wallet: Option<String>,
    pub ts: f64,
    pub payload: serde_json::Value,
    pub signature: Option<String>,
}

/// Dispatches classified events to the librarian and flags fast-snipe
/// candidates for the scoring router. Owns no state of its own beyond a
/// handle to the librarian, so it is cheap to clone and share across the
/// firehose listener and any websocket/webhook ingestion paths.
pub struct EventRouter {
    librarian: Arc<Librarian>,
    fast_snipe: tokio::sync::mpsc::Sender<StreamEvent>,
    fast_snipe_rx: tokio::sync::Mutex<Option<tokio::sync::mpsc::Receiver<StreamEvent>>>,
}

impl EventRouter {
    pub fn new(librarian: Arc<Librarian>) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel(1024);
        Self {
            librarian,
            fast_snipe: tx,
            fast_snipe_rx: tokio::sync::Mutex::new(Some(rx)),
        }
    }

    /// Takes ownership of the fast-snipe receiver. Call once, from whichever
    /// task drives the snipe scoring engine.
    pub async fn take_fast_snipe_receiver(
        &self,
    ) -> Option<tokio::sync::mpsc::Receiver<StreamEvent>> {
        self.fast_snipe_rx.lock().await.take()
    }

    /// Entry point used by the firehose listener for raw trade ticks.
    pub async fn dispatch_trade(&self, trade: TradeEvent) {
        let event = StreamEvent {
            kind: StreamEventKind::Swap,
            token: Some(trade.token_mint.clone()),
            wallet: None,
            ts: trade.ts,
            payload: serde_json::json!({
                "price": trade.price,
                "amount": trade.amount,
            }),
            signature: None,
        };
        self.route(event).await;
    }

    /// Entry point for any already-classified stream event (mint init, LP
    /// add, transfer, social post, pool update).
    pub async fn route(&self, event: StreamEvent) {
        if event.token.is_none() && event.wallet.is_none() {
            debug!("[EventRouter] dropping event with no contract or wallet");
            return;
        }
        if let Some(token) = &event.token {
            if !crate::core::models::is_valid_base58_address(token) {
                debug!("[EventRouter] dropping event with invalid token address {token}");
                return;
            }
        }
        if let Some(wallet) = &event.wallet {
            if !crate::core::models::is_valid_base58_address(wallet) {
                debug!("[EventRouter] dropping event with invalid wallet address {wallet}");
                return;
            }
        }
        if event.kind.is_fast_snipe_trigger() {
            if let Err(e) = self.fast_snipe.try_send(event.clone()) {
                debug!("[EventRouter] fast snipe channel full/closed: {e}");
            }
        }
        self.librarian.ingest_stream_event(event).await;
    }
}
