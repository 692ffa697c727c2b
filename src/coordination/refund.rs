//! Background refund watcher
//!
//! Scans the ledger on a fixed interval for swaps whose escrows outlived
//! their timelocks without completing, and unwinds them. Refund ordering is
//! unconstrained (no secret has been disclosed on the refund path), so both
//! legs are refunded concurrently. Scans are idempotent: an
//! already-refunded escrow is a no-op, and records in `Revealing` are left
//! alone because their secret is already public.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::adapter::{with_retries, ChainRegistry, EscrowAdapter, RetryPolicy};
use crate::error::{AdapterError, CoordinatorResult};
use crate::ledger::SwapLedger;
use crate::types::{EscrowSlot, EscrowState, SwapPhase, SwapRecord};

pub struct RefundWatcher {
    ledger: Arc<SwapLedger>,
    chains: Arc<ChainRegistry>,
    retry: RetryPolicy,
    scan_interval: Duration,
    shutdown: Arc<RwLock<bool>>,
}

impl RefundWatcher {
    pub fn new(
        ledger: Arc<SwapLedger>,
        chains: Arc<ChainRegistry>,
        retry: RetryPolicy,
        scan_interval: Duration,
    ) -> Self {
        Self {
            ledger,
            chains,
            retry,
            scan_interval,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Main watcher loop
    pub async fn run(&self) -> CoordinatorResult<()> {
        let mut ticker = interval(self.scan_interval);
        info!(interval_secs = self.scan_interval.as_secs(), "refund watcher started");

        loop {
            ticker.tick().await;
            if *self.shutdown.read().await {
                break;
            }
            if let Err(e) = self.scan_once().await {
                error!("refund scan failed: {}", e);
            }
        }

        info!("refund watcher stopped");
        Ok(())
    }

    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }

    /// One pass over all non-terminal swaps. Returns how many reached
    /// `Refunded` during this pass.
    pub async fn scan_once(&self) -> CoordinatorResult<usize> {
        crate::metrics::record_refund_scan();
        let candidates = self.ledger.active().await?;
        let mut refunded = 0;

        for stale in candidates {
            // a reveal in flight owns its swap; the secret is public and
            // refunding now could strand the counterparty
            if stale.phase == SwapPhase::Revealing || stale.phase.is_terminal() {
                continue;
            }

            let _guard = self.ledger.lock(stale.swap_id).await;
            // re-read under the lock: the record may have moved on while we
            // waited
            let mut record = self.ledger.get(stale.swap_id).await?;
            if record.phase == SwapPhase::Revealing || record.phase.is_terminal() {
                continue;
            }

            match self.process(&mut record).await {
                Ok(true) => refunded += 1,
                Ok(false) => {}
                Err(e) => warn!(swap_id = %record.swap_id, "refund attempt failed: {}", e),
            }
        }

        Ok(refunded)
    }

    async fn process(&self, record: &mut SwapRecord) -> CoordinatorResult<bool> {
        if record.source.state == EscrowState::Resolved
            || record.dest.state == EscrowState::Resolved
        {
            // never refund across a resolved leg; the reveal path owns this
            warn!(swap_id = %record.swap_id, "skipping refund of partially resolved swap");
            return Ok(false);
        }

        if record.phase != SwapPhase::Refunding {
            if !self.timelock_elapsed(record).await {
                return Ok(false);
            }
            if record.source.escrow_ref.is_none() && record.dest.escrow_ref.is_none() {
                // expired before anything reached a chain
                self.ledger.transition(record, SwapPhase::Failed).await?;
                return Ok(false);
            }
            info!(swap_id = %record.swap_id, phase = record.phase.label(),
                  "timelock elapsed, unwinding swap");
            self.ledger.transition(record, SwapPhase::Refunding).await?;
        }

        // both legs concurrently; each is independently idempotent
        let (source_state, dest_state) = futures::join!(
            self.refund_leg(record.swap_id, &record.source),
            self.refund_leg(record.swap_id, &record.dest),
        );
        if let Some(state) = source_state {
            record.source.state = state;
        }
        if let Some(state) = dest_state {
            record.dest.state = state;
        }
        self.ledger.persist(record).await?;

        if leg_settled(&record.source) && leg_settled(&record.dest) {
            self.ledger.transition(record, SwapPhase::Refunded).await?;
            crate::metrics::record_swap_refunded();
            info!(swap_id = %record.swap_id, "swap refunded");
            return Ok(true);
        }
        Ok(false)
    }

    /// True once any unsettled leg of this swap is past its own chain's
    /// clock. Head read failures defer to the next scan.
    async fn timelock_elapsed(&self, record: &SwapRecord) -> bool {
        for slot in [&record.source, &record.dest] {
            if slot.state.is_final() {
                continue;
            }
            let adapter = match self.chains.get(slot.chain_id) {
                Ok(adapter) => adapter,
                Err(e) => {
                    warn!(chain_id = slot.chain_id, "no adapter for refund check: {}", e);
                    continue;
                }
            };
            match adapter.head().await {
                Ok(head) => {
                    crate::metrics::record_chain_head(slot.chain_id, head.height);
                    if head.timestamp >= slot.timelock {
                        return true;
                    }
                }
                Err(e) => {
                    debug!(chain_id = slot.chain_id, "head unavailable: {}", e);
                }
            }
        }
        false
    }

    /// Refund a single leg. Returns the new observed escrow state, if any.
    async fn refund_leg(&self, swap_id: uuid::Uuid, slot: &EscrowSlot) -> Option<EscrowState> {
        let escrow_ref = slot.escrow_ref.clone()?;
        if slot.state.is_final() {
            return None;
        }

        let adapter = match self.chains.get(slot.chain_id) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(chain_id = slot.chain_id, "no adapter for refund: {}", e);
                return None;
            }
        };

        let result = with_retries("refund", slot.chain_id, &self.retry, || {
            let adapter = adapter.clone();
            let escrow_ref = escrow_ref.clone();
            async move { adapter.refund(&escrow_ref).await }
        })
        .await;

        match result {
            Ok(receipt) => {
                info!(%swap_id, chain_id = slot.chain_id, tx = %receipt.tx_ref,
                      "escrow refunded");
                Some(EscrowState::Refunded)
            }
            Err(AdapterError::AlreadyFinalized { .. }) => {
                // repeated scan against a settled escrow; read what it became
                match adapter.get_state(&escrow_ref).await {
                    Ok(state @ (EscrowState::Refunded | EscrowState::Resolved)) => Some(state),
                    _ => None,
                }
            }
            Err(AdapterError::TimelockNotExpired { .. }) => {
                debug!(%swap_id, chain_id = slot.chain_id, "leg not yet refundable");
                None
            }
            Err(e) => {
                warn!(%swap_id, chain_id = slot.chain_id, "refund failed: {}", e);
                None
            }
        }
    }
}

/// A leg is settled once it either never reached a chain or has been
/// returned to its depositor.
fn leg_settled(slot: &EscrowSlot) -> bool {
    slot.escrow_ref.is_none() || slot.state == EscrowState::Refunded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::sim::{SimChainConfig, SimulatedChain};
    use crate::adapter::{EscrowAdapter, EscrowParams};
    use crate::ledger::MemoryStore;
    use crate::secret::SecretHashlockPair;
    use crate::types::AssetId;
    use chrono::Utc;
    use uuid::Uuid;

    fn asset(chain_id: u64, symbol: &str) -> AssetId {
        AssetId {
            chain_id,
            symbol: symbol.into(),
            token: None,
        }
    }

    struct Fixture {
        ledger: Arc<SwapLedger>,
        source: Arc<SimulatedChain>,
        watcher: RefundWatcher,
        record: SwapRecord,
    }

    /// A swap whose source escrow funded but whose destination never
    /// appeared, with a short source timelock.
    async fn half_funded_fixture(timelock_secs: i64) -> Fixture {
        let ledger = Arc::new(SwapLedger::new(Arc::new(MemoryStore::new())));
        let source = Arc::new(SimulatedChain::new(SimChainConfig::new(
            1,
            2,
            Duration::from_secs(1),
        )));
        source.credit("maker", "AAA", 1_000);

        let pair = SecretHashlockPair::generate();
        let swap_id = Uuid::new_v4();
        let timelock = source.head().await.unwrap().timestamp
            + chrono::Duration::seconds(timelock_secs);

        let src_ref = source
            .create_escrow(EscrowParams {
                swap_id,
                depositor: "maker".into(),
                beneficiary: "resolver-1".into(),
                asset: asset(1, "AAA"),
                amount: 100,
                hashlock: pair.hashlock,
                timelock,
            })
            .await
            .unwrap();
        source.advance(2);

        let now = Utc::now();
        let record = SwapRecord {
            swap_id,
            intent_id: Uuid::new_v4(),
            resolver_id: "resolver-1".into(),
            phase: SwapPhase::DestEscrowPending,
            hashlock: pair.hashlock,
            secret: None,
            source: EscrowSlot {
                chain_id: 1,
                asset: asset(1, "AAA"),
                amount: 100,
                depositor: "maker".into(),
                beneficiary: "resolver-1".into(),
                timelock,
                escrow_ref: Some(src_ref),
                state: EscrowState::Funded,
            },
            dest: EscrowSlot {
                chain_id: 2,
                asset: asset(2, "BBB"),
                amount: 100,
                depositor: "resolver-1".into(),
                beneficiary: "counterparty".into(),
                timelock: now + chrono::Duration::seconds(1),
                escrow_ref: None,
                state: EscrowState::Pending,
            },
            created_at: now,
            updated_at: now,
        };
        ledger.insert(&record).await.unwrap();

        let chains = Arc::new(ChainRegistry::new());
        chains.register(source.clone());

        let watcher = RefundWatcher::new(
            ledger.clone(),
            chains,
            RetryPolicy {
                attempt_timeout: Duration::from_millis(100),
                max_retries: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter_ms: 0,
            },
            Duration::from_millis(10),
        );

        Fixture {
            ledger,
            source,
            watcher,
            record,
        }
    }

    #[tokio::test]
    async fn refunds_expired_funded_escrow() {
        let fx = half_funded_fixture(5).await;

        // timelock not reached: nothing happens
        assert_eq!(fx.watcher.scan_once().await.unwrap(), 0);
        let stored = fx.ledger.get(fx.record.swap_id).await.unwrap();
        assert_eq!(stored.phase, SwapPhase::DestEscrowPending);

        // pass the 5s (logical) timelock and scan again
        fx.source.advance(5);
        assert_eq!(fx.watcher.scan_once().await.unwrap(), 1);

        let stored = fx.ledger.get(fx.record.swap_id).await.unwrap();
        assert_eq!(stored.phase, SwapPhase::Refunded);
        assert_eq!(stored.source.state, EscrowState::Refunded);
        assert_eq!(fx.source.balance("maker", "AAA"), 1_000);
    }

    #[tokio::test]
    async fn repeated_scans_are_idempotent() {
        let fx = half_funded_fixture(5).await;
        fx.source.advance(10);

        assert_eq!(fx.watcher.scan_once().await.unwrap(), 1);
        assert_eq!(fx.watcher.scan_once().await.unwrap(), 0);
        assert_eq!(fx.watcher.scan_once().await.unwrap(), 0);
        assert_eq!(fx.source.balance("maker", "AAA"), 1_000);
    }

    #[tokio::test]
    async fn never_refunds_a_resolved_escrow() {
        let fx = half_funded_fixture(5).await;

        // the resolver claims the source escrow before expiry
        let mut record = fx.ledger.get(fx.record.swap_id).await.unwrap();
        record.source.state = EscrowState::Resolved;
        record.phase = SwapPhase::Revealing;
        fx.ledger.insert(&record).await.unwrap();

        fx.source.advance(10);
        assert_eq!(fx.watcher.scan_once().await.unwrap(), 0);

        let stored = fx.ledger.get(fx.record.swap_id).await.unwrap();
        assert_eq!(stored.source.state, EscrowState::Resolved);
        assert_eq!(stored.phase, SwapPhase::Revealing);
    }

    #[tokio::test]
    async fn expired_record_with_no_escrows_fails_cleanly() {
        let fx = half_funded_fixture(5).await;

        let mut record = fx.ledger.get(fx.record.swap_id).await.unwrap();
        record.source.escrow_ref = None;
        record.source.state = EscrowState::Pending;
        record.phase = SwapPhase::SourceEscrowPending;
        fx.ledger.insert(&record).await.unwrap();

        fx.source.advance(10);
        fx.watcher.scan_once().await.unwrap();

        let stored = fx.ledger.get(fx.record.swap_id).await.unwrap();
        assert_eq!(stored.phase, SwapPhase::Failed);
    }
}
