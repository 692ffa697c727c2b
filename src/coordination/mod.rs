//! Cross-chain swap orchestration
//!
//! The engine wires the funding state machine and the reveal sequencer
//! together for one source/dest adapter pair:
//! 1. A winning bid becomes a swap record with a fresh hashlock
//! 2. The escrow manager funds source-then-destination
//! 3. The reveal coordinator claims both legs
//! 4. The refund watcher unwinds anything that misses its timelock

pub mod escrow_manager;
pub mod refund;
pub mod reveal;

pub use escrow_manager::EscrowManager;
pub use refund::RefundWatcher;
pub use reveal::RevealCoordinator;

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapter::{EscrowAdapter, RetryPolicy};
use crate::config::{CoordinatorConfig, TimelockConfig};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::ledger::SwapLedger;
use crate::secret::{Secret, SecretHashlockPair};
use crate::types::{Bid, SwapIntent, SwapPhase, SwapRecord};

pub struct SwapEngine {
    ledger: Arc<SwapLedger>,
    manager: EscrowManager,
    reveal: RevealCoordinator,
    /// Preimages of in-flight fills, keyed by swap. Lost on restart by
    /// design: a swap whose secret is gone can only run out its timelock
    /// and refund.
    secrets: DashMap<Uuid, Secret>,
}

impl SwapEngine {
    pub fn new(
        ledger: Arc<SwapLedger>,
        source: Arc<dyn EscrowAdapter>,
        dest: Arc<dyn EscrowAdapter>,
        config: &CoordinatorConfig,
        timelocks: TimelockConfig,
    ) -> Self {
        let manager = EscrowManager::new(
            ledger.clone(),
            source.clone(),
            dest.clone(),
            config,
            timelocks,
        );
        let reveal = RevealCoordinator::new(
            ledger.clone(),
            source,
            dest,
            RetryPolicy::from_config(config),
        );
        Self {
            ledger,
            manager,
            reveal,
            secrets: DashMap::new(),
        }
    }

    /// Execute one winning bid end to end: generate the commitment, fund
    /// both escrows, then reveal and claim. Returns the completed record.
    pub async fn execute_fill(
        &self,
        intent: &SwapIntent,
        bid: &Bid,
    ) -> CoordinatorResult<SwapRecord> {
        let pair = SecretHashlockPair::generate();
        let record = self.manager.open_swap(intent, bid, pair.hashlock).await?;
        let swap_id = record.swap_id;
        self.secrets.insert(swap_id, pair.secret);

        let result = self.drive(swap_id).await;
        if self
            .ledger
            .get(swap_id)
            .await
            .map(|r| r.phase.is_terminal())
            .unwrap_or(false)
        {
            self.secrets.remove(&swap_id);
        }
        result
    }

    /// Push a swap as far forward as its current phase allows
    pub async fn drive(&self, swap_id: Uuid) -> CoordinatorResult<SwapRecord> {
        let record = self.ledger.get(swap_id).await?;
        let record = match record.phase {
            SwapPhase::Created
            | SwapPhase::SourceEscrowPending
            | SwapPhase::SourceEscrowFunded
            | SwapPhase::DestEscrowPending => self.manager.fund_swap(swap_id).await?,
            _ => record,
        };

        match record.phase {
            SwapPhase::DestEscrowFunded | SwapPhase::Revealing => {
                let secret = self
                    .secrets
                    .get(&swap_id)
                    .map(|s| *s)
                    .or(record.secret)
                    .ok_or_else(|| CoordinatorError::Protocol {
                        swap_id,
                        reason: "preimage unavailable; swap can only await refund".into(),
                    })?;
                self.reveal.complete_swap(swap_id, secret).await
            }
            // Refunding swaps belong to the watcher; everything else is done
            _ => Ok(record),
        }
    }

    /// Resume in-flight swaps after a restart. Swaps whose preimage
    /// survived (persisted by a completed reveal leg) are driven onward;
    /// swaps that lost their preimage are routed to the refund path rather
    /// than having more funds locked against an uncompletable hashlock.
    pub async fn recover(&self) -> CoordinatorResult<usize> {
        let records = self.ledger.active().await?;
        let mut resumed = 0;

        for record in records {
            let swap_id = record.swap_id;
            match record.phase {
                SwapPhase::Refunding => continue,
                phase if phase.is_terminal() => continue,
                _ => {}
            }

            let secret_known =
                self.secrets.contains_key(&swap_id) || record.secret.is_some();
            if !secret_known {
                self.abandon(swap_id).await?;
                continue;
            }

            info!(%swap_id, phase = record.phase.label(), "resuming swap");
            if let Err(e) = self.drive(swap_id).await {
                warn!(%swap_id, "resume failed: {}", e);
            }
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Route a swap that can no longer complete to the refund path (or
    /// straight to `Failed` if nothing ever reached a chain)
    async fn abandon(&self, swap_id: Uuid) -> CoordinatorResult<()> {
        let _guard = self.ledger.lock(swap_id).await;
        let mut record = self.ledger.get(swap_id).await?;
        if record.phase.is_terminal() || record.phase == SwapPhase::Refunding {
            return Ok(());
        }
        let target = if record.funds_at_stake()
            || record.source.escrow_ref.is_some()
            || record.dest.escrow_ref.is_some()
        {
            SwapPhase::Refunding
        } else {
            SwapPhase::Failed
        };
        warn!(%swap_id, to = target.label(), "abandoning unrecoverable swap");
        self.ledger.transition(&mut record, target).await
    }
}
