//! Authoritative swap ledger
//!
//! Single ownership-clear record arena plus a per-`swap_id` lock index. The
//! escrow manager, reveal coordinator, and refund watcher all mutate swap
//! records only while holding that swap's guard, which is the one hard
//! exclusivity rule in the system: a refund can never race a reveal on the
//! same swap. Every transition is persisted before the caller issues its
//! next chain call, so a restart resumes from the last durable phase.

mod store;

pub use store::{MemoryStore, SqliteStore, SwapStore};

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::types::{SwapPhase, SwapRecord};

pub struct SwapLedger {
    store: Arc<dyn SwapStore>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl SwapLedger {
    pub fn new(store: Arc<dyn SwapStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    /// Acquire the single-writer guard for a swap. Held across every
    /// read-modify-write sequence on that swap's record.
    pub async fn lock(&self, swap_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(swap_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        lock.lock_owned().await
    }

    pub async fn insert(&self, record: &SwapRecord) -> CoordinatorResult<()> {
        self.store.put_swap(record).await
    }

    pub async fn get(&self, swap_id: Uuid) -> CoordinatorResult<SwapRecord> {
        self.store
            .get_swap(swap_id)
            .await?
            .ok_or(CoordinatorError::SwapNotFound(swap_id))
    }

    /// Apply and persist a phase transition. Illegal transitions are refused
    /// without touching the record.
    pub async fn transition(
        &self,
        record: &mut SwapRecord,
        to: SwapPhase,
    ) -> CoordinatorResult<()> {
        if !record.phase.can_transition(to) {
            return Err(CoordinatorError::InvalidTransition {
                from: record.phase.label(),
                to: to.label(),
            });
        }
        debug!(
            swap_id = %record.swap_id,
            from = record.phase.label(),
            to = to.label(),
            "swap transition"
        );
        record.phase = to;
        record.updated_at = Utc::now();
        self.store.put_swap(record).await?;
        crate::metrics::record_swap_phase(to.label());
        Ok(())
    }

    /// Persist non-phase field updates (escrow refs, observed states, the
    /// revealed secret)
    pub async fn persist(&self, record: &mut SwapRecord) -> CoordinatorResult<()> {
        record.updated_at = Utc::now();
        self.store.put_swap(record).await
    }

    pub async fn active(&self) -> CoordinatorResult<Vec<SwapRecord>> {
        self.store.active_swaps().await
    }
}
