//! Reveal-then-claim sequencing
//!
//! The only component allowed to disclose a preimage. The destination escrow
//! is released first; that transaction publishes the secret on the
//! destination chain, and the source release consumes the secret as read
//! back from the finalized receipt rather than the in-memory copy. A crash
//! between the two legs therefore loses nothing: the second release can be
//! re-derived entirely from chain state.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapter::{with_retries, EscrowAdapter, RetryPolicy};
use crate::error::{AdapterError, CoordinatorError, CoordinatorResult};
use crate::ledger::SwapLedger;
use crate::secret::{self, Secret};
use crate::types::{EscrowRef, EscrowState, SwapPhase, SwapRecord};

pub struct RevealCoordinator {
    ledger: Arc<SwapLedger>,
    source: Arc<dyn EscrowAdapter>,
    dest: Arc<dyn EscrowAdapter>,
    retry: RetryPolicy,
}

impl RevealCoordinator {
    pub fn new(
        ledger: Arc<SwapLedger>,
        source: Arc<dyn EscrowAdapter>,
        dest: Arc<dyn EscrowAdapter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            source,
            dest,
            retry,
        }
    }

    /// Complete a swap whose escrows are both funded. Returns the record in
    /// `Completed`, or routes it to `Refunding`/`Failed` and propagates the
    /// error.
    pub async fn complete_swap(
        &self,
        swap_id: Uuid,
        secret: Secret,
    ) -> CoordinatorResult<SwapRecord> {
        let _guard = self.ledger.lock(swap_id).await;
        let mut record = self.ledger.get(swap_id).await?;

        match self.drive_reveal(&mut record, secret).await {
            Ok(()) => Ok(record),
            Err(err) => {
                self.escalate(&mut record, &err).await;
                Err(err)
            }
        }
    }

    async fn drive_reveal(&self, record: &mut SwapRecord, secret: Secret) -> CoordinatorResult<()> {
        match record.phase {
            SwapPhase::DestEscrowFunded | SwapPhase::Revealing => {}
            other => {
                return Err(CoordinatorError::InvalidTransition {
                    from: other.label(),
                    to: SwapPhase::Revealing.label(),
                })
            }
        }

        if !secret::verify(&secret, &record.hashlock)
            .map_err(|e| CoordinatorError::Validation(e.to_string()))?
        {
            return Err(CoordinatorError::Protocol {
                swap_id: record.swap_id,
                reason: "preimage does not match the swap hashlock".into(),
            });
        }

        self.check_preconditions(record)?;

        if record.phase == SwapPhase::DestEscrowFunded {
            self.ledger.transition(record, SwapPhase::Revealing).await?;
        }

        // Leg 1: release the destination escrow. This is the first on-chain
        // disclosure of the secret.
        let onchain_secret = if record.dest.state == EscrowState::Resolved {
            // resumed after a crash that already claimed the destination;
            // the persisted secret came from the finalized receipt
            record.secret.ok_or_else(|| CoordinatorError::Protocol {
                swap_id: record.swap_id,
                reason: "destination resolved but no recorded preimage".into(),
            })?
        } else {
            let escrow_ref = required_ref(record, &record.dest.escrow_ref)?;
            let receipt = with_retries("release", self.dest.chain_id(), &self.retry, || {
                let adapter = self.dest.clone();
                let escrow_ref = escrow_ref.clone();
                async move { adapter.release(&escrow_ref, &secret).await }
            })
            .await?;
            info!(swap_id = %record.swap_id, tx = %receipt.tx_ref,
                  "destination escrow released, secret disclosed");
            receipt.revealed_secret.unwrap_or(secret)
        };

        record.secret = Some(onchain_secret);
        record.dest.state = EscrowState::Resolved;
        self.ledger.persist(record).await?;

        // Leg 2: claim the source escrow with the recovered secret. The
        // destination side already got its asset, so this leg may not be
        // abandoned: keep trying until the source claim window closes.
        self.claim_source(record, &onchain_secret).await?;

        self.ledger.transition(record, SwapPhase::Completed).await?;
        crate::metrics::record_swap_completed(record.created_at);
        info!(swap_id = %record.swap_id, "swap completed");
        Ok(())
    }

    /// Both escrows must have been observed funded, and that observation
    /// persisted, before anything is disclosed. The ledger record is the
    /// authoritative funding observation; a divergent chain surfaces as a
    /// release error instead.
    fn check_preconditions(&self, record: &SwapRecord) -> CoordinatorResult<()> {
        for (chain_id, slot) in [
            (self.source.chain_id(), &record.source),
            (self.dest.chain_id(), &record.dest),
        ] {
            if !matches!(slot.state, EscrowState::Funded | EscrowState::Resolved) {
                return Err(CoordinatorError::Protocol {
                    swap_id: record.swap_id,
                    reason: format!(
                        "cannot reveal: escrow on chain {chain_id} is {:?}, not funded",
                        slot.state
                    ),
                });
            }
            required_ref(record, &slot.escrow_ref)?;
        }
        Ok(())
    }

    async fn claim_source(&self, record: &mut SwapRecord, secret: &Secret) -> CoordinatorResult<()> {
        if record.source.state == EscrowState::Resolved {
            return Ok(());
        }
        let escrow_ref = required_ref(record, &record.source.escrow_ref)?;
        let chain_id = self.source.chain_id();
        let mut attempt: u32 = 0;

        loop {
            match self.source.release(&escrow_ref, secret).await {
                Ok(receipt) => {
                    info!(swap_id = %record.swap_id, tx = %receipt.tx_ref,
                          "source escrow claimed");
                    record.source.state = EscrowState::Resolved;
                    self.ledger.persist(record).await?;
                    return Ok(());
                }
                Err(AdapterError::AlreadyFinalized { .. }) => {
                    let state = self.source.get_state(&escrow_ref).await?;
                    match state {
                        EscrowState::Resolved => {
                            record.source.state = EscrowState::Resolved;
                            self.ledger.persist(record).await?;
                            return Ok(());
                        }
                        EscrowState::Refunded => {
                            return Err(CoordinatorError::Protocol {
                                swap_id: record.swap_id,
                                reason:
                                    "source escrow was refunded after the secret was disclosed"
                                        .into(),
                            });
                        }
                        _ => {}
                    }
                }
                // Retryable or not, the claim is re-attempted: a late
                // completion is acceptable, a half-claimed swap is not.
                Err(err) => {
                    warn!(swap_id = %record.swap_id, chain_id, error = %err,
                          "source claim attempt failed");
                    crate::metrics::record_adapter_retry(chain_id, "release");
                }
            }

            if self.claim_window_closed(record).await {
                return Err(CoordinatorError::Protocol {
                    swap_id: record.swap_id,
                    reason: "source claim window elapsed before release finalized".into(),
                });
            }

            tokio::time::sleep(self.retry.backoff(attempt)).await;
            attempt = std::cmp::min(attempt + 1, 8);
        }
    }

    /// The claim deadline is the source escrow's own timelock, judged by the
    /// source chain's clock.
    async fn claim_window_closed(&self, record: &SwapRecord) -> bool {
        match self.source.head().await {
            Ok(head) => head.timestamp >= record.source.timelock,
            Err(err) => {
                warn!(swap_id = %record.swap_id, error = %err,
                      "source head unavailable during claim");
                false
            }
        }
    }

    async fn escalate(&self, record: &mut SwapRecord, err: &CoordinatorError) {
        let target = if record.dest.state == EscrowState::Resolved
            && record.source.state != EscrowState::Resolved
        {
            // The secret is public and the destination leg is claimed.
            // Refunding the source now would end the swap half-and-half, so
            // the record is parked for operator intervention instead.
            error!(swap_id = %record.swap_id, error = %err,
                   "reveal stranded after destination claim; operator attention required");
            SwapPhase::Failed
        } else if record.funds_at_stake() {
            SwapPhase::Refunding
        } else {
            SwapPhase::Failed
        };
        if let Err(transition_err) = self.ledger.transition(record, target).await {
            warn!(swap_id = %record.swap_id, error = %transition_err,
                  "could not route stranded reveal");
        }
    }
}

fn required_ref(record: &SwapRecord, slot: &Option<EscrowRef>) -> CoordinatorResult<EscrowRef> {
    slot.clone().ok_or_else(|| CoordinatorError::Protocol {
        swap_id: record.swap_id,
        reason: "escrow reference missing for a funded leg".into(),
    })
}
