//! Chain escrow adapters
//!
//! The coordination core never speaks RPC. Each chain integration implements
//! [`EscrowAdapter`] and owns its keys, transaction building, and
//! confirmation handling; the core only observes finalized state and issues
//! the four escrow operations. All operations must be idempotent under
//! retry: the orchestrators run at-least-once and will re-issue a call after
//! a crash.

pub mod retry;
pub mod sim;

pub use retry::{with_retries, RetryPolicy};
pub use sim::SimulatedChain;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AdapterError, CoordinatorError, CoordinatorResult};
use crate::secret::{Hashlock, Secret};
use crate::types::{AssetId, ChainHead, EscrowRef, EscrowState, Receipt};

/// Everything a chain integration needs to lock funds for one swap leg
#[derive(Debug, Clone)]
pub struct EscrowParams {
    pub swap_id: Uuid,
    pub depositor: String,
    pub beneficiary: String,
    pub asset: AssetId,
    pub amount: u128,
    pub hashlock: Hashlock,
    pub timelock: DateTime<Utc>,
}

/// Capability interface implemented once per chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EscrowAdapter: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Finalized chain head. Timelock comparisons use this clock, not the
    /// coordinator's wall clock.
    async fn head(&self) -> Result<ChainHead, AdapterError>;

    /// Lock funds under a hashlock and timelock. Finalizes or fails
    /// atomically from the caller's perspective; a repeat call for the same
    /// `swap_id` returns the existing escrow.
    async fn create_escrow(&self, params: EscrowParams) -> Result<EscrowRef, AdapterError>;

    /// Release escrowed funds to the beneficiary by presenting the preimage.
    /// Rejected if the hashlock does not match or the timelock has expired.
    /// The receipt carries the preimage as recorded in the finalized
    /// transaction.
    async fn release(&self, escrow: &EscrowRef, secret: &Secret) -> Result<Receipt, AdapterError>;

    /// Return escrowed funds to the depositor after timelock expiry.
    async fn refund(&self, escrow: &EscrowRef) -> Result<Receipt, AdapterError>;

    /// Finalized escrow state (never merely-broadcast state).
    async fn get_state(&self, escrow: &EscrowRef) -> Result<EscrowState, AdapterError>;
}

/// Adapters indexed by chain ID
pub struct ChainRegistry {
    adapters: DashMap<u64, Arc<dyn EscrowAdapter>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self {
            adapters: DashMap::new(),
        }
    }

    pub fn register(&self, adapter: Arc<dyn EscrowAdapter>) {
        self.adapters.insert(adapter.chain_id(), adapter);
    }

    pub fn get(&self, chain_id: u64) -> CoordinatorResult<Arc<dyn EscrowAdapter>> {
        self.adapters
            .get(&chain_id)
            .map(|a| a.clone())
            .ok_or(CoordinatorError::ChainNotFound { chain_id })
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        self.adapters.iter().map(|e| *e.key()).collect()
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::new()
    }
}
