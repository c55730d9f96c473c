//! Narrow wallet-signing interface. Key-file loading and multi-wallet
//! rotation policy live outside the core (spec.md §1 Out of scope); the
//! executor only needs something that can sign and report a balance.

use async_trait::async_trait;

#[async_trait]
pub trait WalletSigner: Send + Sync {
    fn address(&self) -> &str;
    async fn sign(&self, unsigned_tx: &[u8]) -> anyhow::Result<Vec<u8>>;
    async fn sol_balance(&self) -> anyhow::Result<u64>;
}

/// Picks a wallet for a trade, used by the executor's `buy_token`
/// (spec.md §4.H "chooses a wallet by strategy via rotator"). The rotation
/// policy itself (round-robin, risk-weighted, ...) is external.
#[async_trait]
pub trait WalletRotator: Send + Sync {
    async fn select_wallet(&self, strategy_id: &str) -> anyhow::Result<std::sync::Arc<dyn WalletSigner>>;
}

#[cfg(test)]
pub mod mock {
    use super::*;

    pub struct MockWallet {
        pub address: String,
        pub balance_lamports: u64,
    }

    #[async_trait]
    impl WalletSigner for MockWallet {
        fn address(&self) -> &str {
            &self.address
        }

        async fn sign(&self, unsigned_tx: &[u8]) -> anyhow::Result<Vec<u8>> {
            Ok(unsigned_tx.to_vec())
        }

        async fn sol_balance(&self) -> anyhow::Result<u64> {
            Ok(self.balance_lamports)
        }
    }
}
