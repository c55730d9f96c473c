//! Narrow RPC interface the core depends on. Web3 RPC session bootstrapping
//! (load balancing, auth, endpoint discovery) is out of scope; callers hand
//! the core anything implementing `RpcEndpointProvider`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub out_amount: u64,
    pub price_impact_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureStatus {
    pub signature: String,
    pub confirmed: bool,
    pub err: Option<String>,
}

/// JSON-RPC surface used by the executor, auto-sell monitor and guardian
/// (spec.md §6). A mock implementation backs every unit test in this crate;
/// a `solana-client`-backed implementation is wired at composition time.
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn get_latest_blockhash(&self) -> anyhow::Result<String>;
    async fn get_balance(&self, owner: &str) -> anyhow::Result<u64>;
    async fn get_token_accounts_by_owner(&self, owner: &str) -> anyhow::Result<Vec<String>>;
    async fn get_account_info(&self, address: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn send_raw_transaction(&self, raw: &[u8]) -> anyhow::Result<String>;
    async fn simulate_transaction(&self, raw: &[u8]) -> anyhow::Result<bool>;
    async fn get_signature_statuses(
        &self,
        signatures: &[String],
    ) -> anyhow::Result<Vec<SignatureStatus>>;
}

/// Quote/swap surface for an aggregator-style HTTP service (spec.md §6).
#[async_trait]
pub trait AggregatorClient: Send + Sync {
    async fn quote(&self, input_mint: &str, output_mint: &str, amount: u64) -> anyhow::Result<Quote>;
    async fn build_swap(&self, input_mint: &str, output_mint: &str, amount: u64, min_out: u64)
        -> anyhow::Result<Vec<u8>>;
}

/// Dynamic websocket subscription surface (spec.md §6): `request_*`/`stop_*`.
#[async_trait]
pub trait StreamSubscriptions: Send + Sync {
    async fn request_account(&self, address: &str) -> anyhow::Result<()>;
    async fn stop_account(&self, address: &str) -> anyhow::Result<()>;
    async fn request_logs(&self, mentions: &str) -> anyhow::Result<()>;
    async fn stop_logs(&self, mentions: &str) -> anyhow::Result<()>;
}

/// Live price lookup used by the auto-sell monitor's tick loop (spec.md
/// §4.I). Kept separate from `AggregatorClient` since reading a price should
/// never need to build a swap instruction.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn current_price(&self, token: &str) -> anyhow::Result<f64>;
}

/// A deterministic in-memory RPC double used by tests across this crate.
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    pub struct MockRpc {
        pub balance: AtomicU64,
    }

    impl MockRpc {
        pub fn new(balance: u64) -> Self {
            Self {
                balance: AtomicU64::new(balance),
            }
        }
    }

    #[async_trait]
    impl RpcClient for MockRpc {
        async fn get_latest_blockhash(&self) -> anyhow::Result<String> {
            Ok("11111111111111111111111111111111".to_string())
        }

        async fn get_balance(&self, _owner: &str) -> anyhow::Result<u64> {
            Ok(self.balance.load(Ordering::SeqCst))
        }

        async fn get_token_accounts_by_owner(&self, _owner: &str) -> anyhow::Result<Vec<String>> {
            Ok(vec![])
        }

        async fn get_account_info(&self, _address: &str) -> anyhow::Result<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn send_raw_transaction(&self, _raw: &[u8]) -> anyhow::Result<String> {
            Ok("mock_signature".to_string())
        }

        async fn simulate_transaction(&self, _raw: &[u8]) -> anyhow::Result<bool> {
            Ok(true)
        }

        async fn get_signature_statuses(
            &self,
            signatures: &[String],
        ) -> anyhow::Result<Vec<SignatureStatus>> {
            Ok(signatures
                .iter()
                .map(|s| SignatureStatus {
                    signature: s.clone(),
                    confirmed: true,
                    err: None,
                })
                .collect())
        }
    }

    /// Cycles through a fixed price sequence, repeating the last value once
    /// exhausted; returns an error while `fail_next` is armed, so tests can
    /// simulate a honeypot (no quotable liquidity) for N ticks.
    pub struct MockPriceSource {
        prices: Vec<f64>,
        cursor: AtomicU64,
        fail_always: bool,
    }

    impl MockPriceSource {
        pub fn new(prices: Vec<f64>) -> Self {
            Self {
                prices,
                cursor: AtomicU64::new(0),
                fail_always: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                prices: vec![],
                cursor: AtomicU64::new(0),
                fail_always: true,
            }
        }
    }

    #[async_trait]
    impl PriceSource for MockPriceSource {
        async fn current_price(&self, _token: &str) -> anyhow::Result<f64> {
            if self.fail_always {
                anyhow::bail!("no route found");
            }
            let idx = self.cursor.fetch_add(1, Ordering::SeqCst) as usize;
            Ok(*self.prices.get(idx.min(self.prices.len() - 1)).unwrap())
        }
    }
}
