//! Firehose Stream Listener (spec.md §4.A).
//!
//! Maintains a websocket to a local decoder endpoint, decodes length-prefixed
//! frames into trade events, feeds the rolling OHLCV builder, and fans events
//! out to the Event Router. Never terminates on its own — restartable by the
//! Crash Guardian.

pub mod decoder;
pub mod ohlcv;

use crate::core::event_router::EventRouter;
use crate::core::models::{Bar, TradeEvent};
use crate::core::telemetry::CoreTelemetry;
use decoder::Decoder;
use futures_util::StreamExt;
use ohlcv::OhlcvBuilder;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const STALL_TIMEOUT_S: u64 = 5;
const TRADE_RING_CAPACITY: usize = 10_000;
const RETRY_DELAY_CONNECTION_ERROR: Duration = Duration::from_secs(2);
const RETRY_DELAY_UNEXPECTED_ERROR: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Clone, Copy)]
pub struct FirehoseMetrics {
    pub packets_total: u64,
    pub malformed_total: u64,
    pub decode_latency_ms_last: f64,
}

/// Listens to the local firehose decoder endpoint. Cloneable handle; the
/// actual state lives behind `Arc`s so `recent_trades`/`is_live` can be
/// called from any task while `start()` runs in the background.
#[derive(Clone)]
pub struct FirehoseListener {
    ws_url: String,
    trades: Arc<Mutex<crate::core::models::BoundedRing<TradeEvent>>>,
    ohlcv: Arc<Mutex<OhlcvBuilder>>,
    router: Arc<EventRouter>,
    last_packet_at: Arc<RwLock<Instant>>,
    live: Arc<AtomicBool>,
    packets_total: Arc<AtomicU64>,
    malformed_total: Arc<AtomicU64>,
    tps_window: Arc<Mutex<Vec<f64>>>,
    telemetry: Option<Arc<CoreTelemetry>>,
}

impl FirehoseListener {
    pub fn new(ws_url: impl Into<String>, router: Arc<EventRouter>) -> Self {
        Self {
            ws_url: ws_url.into(),
            trades: Arc::new(Mutex::new(crate::core::models::BoundedRing::new(
                TRADE_RING_CAPACITY,
            ))),
            ohlcv: Arc::new(Mutex::new(OhlcvBuilder::new())),
            router,
            last_packet_at: Arc::new(RwLock::new(Instant::now())),
            live: Arc::new(AtomicBool::new(false)),
            packets_total: Arc::new(AtomicU64::new(0)),
            malformed_total: Arc::new(AtomicU64::new(0)),
            tps_window: Arc::new(Mutex::new(Vec::new())),
            telemetry: None,
        }
    }

    /// Attaches process-wide telemetry counters (spec.md §3 "records metrics
    /// (packets/sec, decode latency)"). Optional: a listener without one
    /// still functions, it just doesn't publish gauges anywhere.
    pub fn with_telemetry(mut self, telemetry: Arc<CoreTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Reconnect loop. Intended to run as an independent task supervised by
    /// the Crash Guardian; it only returns on an unrecoverable setup error.
    pub async fn start(&self, mut beat: impl FnMut() + Send + 'static) -> anyhow::Result<()> {
        loop {
            match self.run_once(&mut beat).await {
                Ok(()) => {
                    // clean disconnect (server closed), reconnect promptly
                    self.live.store(false, Ordering::SeqCst);
                    tokio::time::sleep(RETRY_DELAY_CONNECTION_ERROR).await;
                }
                Err(e) => {
                    self.live.store(false, Ordering::SeqCst);
                    warn!("[FirehoseListener] connection error: {e}");
                    tokio::time::sleep(RETRY_DELAY_CONNECTION_ERROR).await;
                }
            }
        }
    }

    async fn run_once(&self, beat: &mut impl FnMut()) -> anyhow::Result<()> {
        info!("[FirehoseListener] connecting to {}", self.ws_url);
        let (ws_stream, _) = connect_async(&self.ws_url).await?;
        self.live.store(true, Ordering::SeqCst);
        *self.last_packet_at.write().await = Instant::now();
        let (_, mut read) = ws_stream.split();
        let mut decoder = Decoder::new();

        loop {
            let recv = tokio::time::timeout(
                Duration::from_secs(STALL_TIMEOUT_S),
                read.next(),
            )
            .await;

            beat();

            let msg = match recv {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(e))) => {
                    return Err(anyhow::anyhow!("websocket read error: {e}"));
                }
                Ok(None) => return Ok(()), // stream closed cleanly
                Err(_elapsed) => {
                    warn!(
                        "[FirehoseListener] stall detected (no packet in {}s), reconnecting",
                        STALL_TIMEOUT_S
                    );
                    return Err(anyhow::anyhow!("stall timeout"));
                }
            };

            let Message::Binary(frame) = msg else {
                continue;
            };

            let start = Instant::now();
            *self.last_packet_at.write().await = Instant::now();
            self.packets_total.fetch_add(1, Ordering::Relaxed);

            let Some(packet) = decoder.decode_frame(&frame) else {
                self.malformed_total.store(decoder.malformed_count, Ordering::Relaxed);
                if let Some(t) = &self.telemetry {
                    t.record_packet(start.elapsed().as_secs_f64() * 1000.0, true);
                }
                continue;
            };

            let events = match decoder.to_trade_events(&packet) {
                Ok(events) => events,
                Err(e) => {
                    debug!("[FirehoseListener] dropping packet: {e}");
                    if let Some(t) = &self.telemetry {
                        t.record_packet(start.elapsed().as_secs_f64() * 1000.0, true);
                    }
                    continue;
                }
            };

            for event in events {
                {
                    let mut trades = self.trades.lock().await;
                    trades.push(event.clone());
                }
                {
                    let mut ohlcv = self.ohlcv.lock().await;
                    ohlcv.push_trade(&event, 60);
                }
                self.router.dispatch_trade(event).await;
            }

            self.record_tick().await;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            if let Some(t) = &self.telemetry {
                t.record_packet(elapsed_ms, false);
            }
            debug!("[FirehoseListener] decode latency {elapsed_ms:.2}ms");
        }
    }

    async fn record_tick(&self) {
        let mut window = self.tps_window.lock().await;
        let now = crate::core::now_epoch();
        window.push(now);
        let cutoff = now - 1.0;
        window.retain(|t| *t >= cutoff);
    }

    pub async fn recent_trades(&self, limit: usize) -> Vec<TradeEvent> {
        let trades = self.trades.lock().await;
        trades.iter().rev().take(limit).cloned().collect()
    }

    pub async fn recent_ohlcv(&self, token: &str, window_s: i64, granularity_s: i64) -> Vec<Bar> {
        let ohlcv = self.ohlcv.lock().await;
        ohlcv.recent_ohlcv(token, window_s, granularity_s)
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub async fn current_tps(&self) -> f64 {
        self.tps_window.lock().await.len() as f64
    }

    pub fn metrics(&self) -> FirehoseMetrics {
        FirehoseMetrics {
            packets_total: self.packets_total.load(Ordering::Relaxed),
            malformed_total: self.malformed_total.load(Ordering::Relaxed),
            decode_latency_ms_last: 0.0,
        }
    }
}

/// Channel-based fan-out alternative to the router callback, used when a
/// caller wants to observe the trade stream without owning an `EventRouter`.
pub fn trade_channel(capacity: usize) -> (mpsc::Sender<TradeEvent>, mpsc::Receiver<TradeEvent>) {
    mpsc::channel(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::librarian::Librarian;

    #[tokio::test]
    async fn fresh_listener_is_not_live_until_connected() {
        let librarian = Arc::new(Librarian::new_in_memory());
        let router = Arc::new(EventRouter::new(librarian));
        let listener = FirehoseListener::new("ws://127.0.0.1:1", router);
        assert!(!listener.is_live());
        assert_eq!(listener.recent_trades(10).await.len(), 0);
    }
}
