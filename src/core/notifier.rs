//! Narrow message-sending interface. The Telegram UI/bot-command layer is
//! out of scope (spec.md §1); the guardian and executor only need something
//! that can deliver a line of text.

use async_trait::async_trait;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> anyhow::Result<()>;
}

/// Falls back to a tracing log line when no notifier is wired up — mirrors
/// the teacher's `log_event` fallback in `crash_guardian.notify`.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        tracing::info!(target: "notifier", "{text}");
        Ok(())
    }
}
