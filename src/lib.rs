//! Core decision/execution pipeline for an autonomous on-chain trading
//! agent: streaming ingestion, a feature librarian, a profile-driven
//! scoring router, a contextual bandit, a trade executor with a trailing
//! auto-sell monitor, and a priority scheduler / crash guardian supervising
//! all of it. See `SPEC_FULL.md` and `DESIGN.md` for the full design.
//!
//! Telegram UIs, wallet key-file loading, LLM persona/chat layers, social
//! posting, NFT helpers and Web3 RPC session bootstrapping are external
//! collaborators reached through the narrow traits in `core::rpc`,
//! `core::wallet` and `core::notifier`.

pub mod config;
pub mod core;

pub use config::AppConfig;
