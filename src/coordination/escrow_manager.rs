//! Escrow creation and funding state machine
//!
//! Drives a swap from `Created` through both escrow fundings. The ordering
//! rule is absolute: the destination escrow is never created until the
//! source escrow is observed `Funded` by its chain, so a counterparty can
//! never lock destination funds against a source escrow that may not
//! finalize. Each transition is persisted before the next chain call, and
//! adapters tolerate repeated calls, so a crashed run resumes from its last
//! durable phase.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapter::{with_retries, EscrowAdapter, EscrowParams, RetryPolicy};
use crate::config::{CoordinatorConfig, TimelockConfig};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::ledger::SwapLedger;
use crate::secret::Hashlock;
use crate::types::{
    Bid, EscrowSlot, EscrowState, SwapIntent, SwapPhase, SwapRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leg {
    Source,
    Dest,
}

impl Leg {
    fn label(&self) -> &'static str {
        match self {
            Leg::Source => "source",
            Leg::Dest => "dest",
        }
    }
}

pub struct EscrowManager {
    ledger: Arc<SwapLedger>,
    source: Arc<dyn EscrowAdapter>,
    dest: Arc<dyn EscrowAdapter>,
    retry: RetryPolicy,
    confirm_poll_base: Duration,
    confirm_poll_max: Duration,
    funding_ceiling: Duration,
    timelocks: TimelockConfig,
}

impl EscrowManager {
    pub fn new(
        ledger: Arc<SwapLedger>,
        source: Arc<dyn EscrowAdapter>,
        dest: Arc<dyn EscrowAdapter>,
        config: &CoordinatorConfig,
        timelocks: TimelockConfig,
    ) -> Self {
        Self {
            ledger,
            source,
            dest,
            retry: RetryPolicy::from_config(config),
            confirm_poll_base: config.confirm_poll_base(),
            confirm_poll_max: config.confirm_poll_max(),
            funding_ceiling: config.funding_ceiling(),
            timelocks,
        }
    }

    fn adapter(&self, leg: Leg) -> Arc<dyn EscrowAdapter> {
        match leg {
            Leg::Source => self.source.clone(),
            Leg::Dest => self.dest.clone(),
        }
    }

    fn slot_mut<'a>(&self, record: &'a mut SwapRecord, leg: Leg) -> &'a mut EscrowSlot {
        match leg {
            Leg::Source => &mut record.source,
            Leg::Dest => &mut record.dest,
        }
    }

    /// Create the ledger record for one winning bid. Timelocks are anchored
    /// at open; the destination window must close strictly before the
    /// source window so the party revealing second always has time to
    /// claim. Expiry is later judged against each chain's own finalized
    /// clock, never this process's.
    pub async fn open_swap(
        &self,
        intent: &SwapIntent,
        bid: &Bid,
        hashlock: Hashlock,
    ) -> CoordinatorResult<SwapRecord> {
        if bid.input_amount == 0 || bid.output_amount == 0 {
            return Err(CoordinatorError::Validation(
                "zero-amount fill".into(),
            ));
        }
        if bid.input_amount > intent.maker_amount {
            return Err(CoordinatorError::Validation(format!(
                "fill {} exceeds intent size {}",
                bid.input_amount, intent.maker_amount
            )));
        }

        let now = Utc::now();
        let source_timelock =
            now + chrono::Duration::seconds(self.timelocks.source_offset_secs as i64);
        let dest_timelock =
            now + chrono::Duration::seconds(self.timelocks.dest_offset_secs as i64);
        if dest_timelock >= source_timelock {
            return Err(CoordinatorError::Validation(format!(
                "destination timelock {dest_timelock} not strictly before source {source_timelock}"
            )));
        }
        let record = SwapRecord {
            swap_id: Uuid::new_v4(),
            intent_id: intent.intent_id,
            resolver_id: bid.resolver_id.clone(),
            phase: SwapPhase::Created,
            hashlock,
            secret: None,
            source: EscrowSlot {
                chain_id: self.source.chain_id(),
                asset: intent.maker_asset.clone(),
                amount: bid.input_amount,
                depositor: intent.maker_address.clone(),
                beneficiary: bid.resolver_id.clone(),
                timelock: source_timelock,
                escrow_ref: None,
                state: EscrowState::Pending,
            },
            dest: EscrowSlot {
                chain_id: self.dest.chain_id(),
                asset: intent.taker_asset.clone(),
                amount: bid.output_amount,
                depositor: bid.resolver_id.clone(),
                beneficiary: intent.counterparty_address.clone(),
                timelock: dest_timelock,
                escrow_ref: None,
                state: EscrowState::Pending,
            },
            created_at: now,
            updated_at: now,
        };

        self.ledger.insert(&record).await?;
        crate::metrics::record_swap_opened();
        info!(swap_id = %record.swap_id, intent_id = %intent.intent_id,
              resolver = %bid.resolver_id, "swap record opened");
        Ok(record)
    }

    /// Drive a swap through both escrow fundings, ending at
    /// `DestEscrowFunded`. On failure the swap is routed to `Refunding` if
    /// any escrow exists on-chain, `Failed` otherwise.
    pub async fn fund_swap(&self, swap_id: Uuid) -> CoordinatorResult<SwapRecord> {
        let _guard = self.ledger.lock(swap_id).await;
        let mut record = self.ledger.get(swap_id).await?;

        match self.drive_funding(&mut record).await {
            Ok(()) => Ok(record),
            Err(err) => {
                self.escalate(&mut record, &err).await;
                Err(err)
            }
        }
    }

    async fn drive_funding(&self, record: &mut SwapRecord) -> CoordinatorResult<()> {
        if record.phase == SwapPhase::Created {
            self.ledger
                .transition(record, SwapPhase::SourceEscrowPending)
                .await?;
        }
        if record.phase == SwapPhase::SourceEscrowPending {
            self.ensure_escrow(record, Leg::Source).await?;
            self.await_funded(record, Leg::Source).await?;
            self.ledger
                .transition(record, SwapPhase::SourceEscrowFunded)
                .await?;
        }
        if record.phase == SwapPhase::SourceEscrowFunded {
            self.ledger
                .transition(record, SwapPhase::DestEscrowPending)
                .await?;
        }
        if record.phase == SwapPhase::DestEscrowPending {
            self.ensure_escrow(record, Leg::Dest).await?;
            self.await_funded(record, Leg::Dest).await?;
            self.ledger
                .transition(record, SwapPhase::DestEscrowFunded)
                .await?;
        }
        Ok(())
    }

    /// Create the leg's escrow if this run has not already done so. The
    /// adapter returns the existing escrow when called twice for one swap.
    async fn ensure_escrow(&self, record: &mut SwapRecord, leg: Leg) -> CoordinatorResult<()> {
        if self.slot_mut(record, leg).escrow_ref.is_some() {
            return Ok(());
        }

        let adapter = self.adapter(leg);
        let chain_id = adapter.chain_id();
        let swap_id = record.swap_id;
        let hashlock = record.hashlock;
        let slot = self.slot_mut(record, leg);
        let params = EscrowParams {
            swap_id,
            depositor: slot.depositor.clone(),
            beneficiary: slot.beneficiary.clone(),
            asset: slot.asset.clone(),
            amount: slot.amount,
            hashlock,
            timelock: slot.timelock,
        };

        let escrow_ref = with_retries("create_escrow", chain_id, &self.retry, || {
            let adapter = adapter.clone();
            let params = params.clone();
            async move { adapter.create_escrow(params).await }
        })
        .await?;

        info!(swap_id = %record.swap_id, chain_id, leg = leg.label(),
              escrow_id = %escrow_ref.escrow_id, "escrow created");
        self.slot_mut(record, leg).escrow_ref = Some(escrow_ref);
        self.ledger.persist(record).await?;
        crate::metrics::record_escrow_created(chain_id);
        Ok(())
    }

    /// Poll the leg's escrow until the chain reports it `Funded`, with
    /// bounded exponential backoff. Non-finalization past the ceiling is an
    /// error, not a silent retry forever.
    async fn await_funded(&self, record: &mut SwapRecord, leg: Leg) -> CoordinatorResult<()> {
        let adapter = self.adapter(leg);
        let chain_id = adapter.chain_id();
        let escrow_ref = self
            .slot_mut(record, leg)
            .escrow_ref
            .clone()
            .ok_or_else(|| CoordinatorError::Internal("await_funded before creation".into()))?;

        let started = tokio::time::Instant::now();
        let mut delay = self.confirm_poll_base;

        loop {
            let state = with_retries("get_state", chain_id, &self.retry, || {
                let adapter = adapter.clone();
                let escrow_ref = escrow_ref.clone();
                async move { adapter.get_state(&escrow_ref).await }
            })
            .await?;

            match state {
                EscrowState::Funded => {
                    self.slot_mut(record, leg).state = EscrowState::Funded;
                    self.ledger.persist(record).await?;
                    crate::metrics::record_escrow_funded(chain_id);
                    info!(swap_id = %record.swap_id, chain_id, leg = leg.label(),
                          "escrow funded");
                    return Ok(());
                }
                EscrowState::Pending => {}
                state @ (EscrowState::Resolved | EscrowState::Refunded) => {
                    return Err(CoordinatorError::Protocol {
                        swap_id: record.swap_id,
                        reason: format!(
                            "escrow on chain {chain_id} reached {state:?} before funding was confirmed"
                        ),
                    });
                }
            }

            if started.elapsed() >= self.funding_ceiling {
                return Err(CoordinatorError::Timeout {
                    operation: format!("funding confirmation on chain {chain_id}"),
                });
            }
            sleep(delay).await;
            delay = std::cmp::min(delay * 2, self.confirm_poll_max);
        }
    }

    /// Route a failed swap. Anything already on-chain makes `Failed`
    /// unacceptable: the record goes to `Refunding` and the watcher takes
    /// over.
    async fn escalate(&self, record: &mut SwapRecord, err: &CoordinatorError) {
        let funds_exposed = record.funds_at_stake()
            || record.source.escrow_ref.is_some()
            || record.dest.escrow_ref.is_some();
        let target = if funds_exposed {
            SwapPhase::Refunding
        } else {
            SwapPhase::Failed
        };
        warn!(swap_id = %record.swap_id, error = %err, to = target.label(),
              "funding aborted");
        if let Err(transition_err) = self.ledger.transition(record, target).await {
            warn!(swap_id = %record.swap_id, error = %transition_err,
                  "could not route failed swap");
        }
    }
}
