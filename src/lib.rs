//! Hourglass Relayer — cross-chain atomic swap coordination core
//!
//! Coordinates hashlock/timelock escrow swaps between two independently
//! operated chains without a trusted intermediary holding funds. Either both
//! parties receive their expected asset, or both are made whole by refund.
//!
//! The crate never speaks to a chain directly: each integration implements
//! [`adapter::EscrowAdapter`], and the coordination layer only observes
//! finalized state and issues escrow operations through it. Resolver
//! selection runs as a decaying-rate auction in [`auction`], the swap
//! lifecycle lives in [`coordination`], and the durable source of truth is
//! the per-swap-locked [`ledger::SwapLedger`].

pub mod adapter;
pub mod auction;
pub mod config;
pub mod coordination;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod secret;
pub mod types;
