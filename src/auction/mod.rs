//! Resolver bidding engine
//!
//! Competing resolvers bid to execute an intent. The acceptable exchange
//! rate opens at a premium over the intent's implied rate and decays
//! linearly to that floor over a configured window, so eligibility widens
//! with time; a bid is judged against the floor as decayed at evaluation
//! time, never the rate at submission time. Winning bids are ranked by
//! output to the maker net of execution cost.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AuctionConfig;
use crate::error::{BidRejectReason, CoordinatorError, CoordinatorResult};
use crate::ledger::SwapStore;
use crate::types::{Bid, IntentRecord, IntentStatus, SwapIntent};

/// Outcome of an accepted bid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidAck {
    /// An earlier active bid from the same resolver was superseded
    pub replaced: bool,
    /// The decayed floor the bid was judged against
    pub current_floor: u128,
}

pub struct BiddingEngine {
    store: Arc<dyn SwapStore>,
    entries: DashMap<Uuid, Arc<Mutex<IntentRecord>>>,
    config: AuctionConfig,
}

impl BiddingEngine {
    pub fn new(store: Arc<dyn SwapStore>, config: AuctionConfig) -> Self {
        Self {
            store,
            entries: DashMap::new(),
            config,
        }
    }

    /// Reload open intents from the store after a restart
    pub async fn load_open(&self) -> CoordinatorResult<usize> {
        let records = self.store.open_intents().await?;
        let count = records.len();
        for record in records {
            self.entries
                .insert(record.intent.intent_id, Arc::new(Mutex::new(record)));
        }
        Ok(count)
    }

    /// Register a new intent and open its auction
    pub async fn open_intent(&self, intent: SwapIntent) -> CoordinatorResult<()> {
        if intent.maker_amount == 0 || intent.taker_amount == 0 {
            return Err(CoordinatorError::Validation(
                "intent amounts must be non-zero".into(),
            ));
        }
        if intent.deadline <= Utc::now() {
            return Err(CoordinatorError::Validation(
                "intent deadline already passed".into(),
            ));
        }
        if let Some(min) = intent.min_fill_amount {
            if !intent.allow_partial_fill {
                return Err(CoordinatorError::Validation(
                    "min_fill_amount requires allow_partial_fill".into(),
                ));
            }
            if min == 0 || min > intent.maker_amount {
                return Err(CoordinatorError::Validation(
                    "min_fill_amount out of range".into(),
                ));
            }
        }
        if self.entries.contains_key(&intent.intent_id) {
            return Err(CoordinatorError::Validation(format!(
                "intent {} already open",
                intent.intent_id
            )));
        }

        let record = IntentRecord::new(intent);
        self.store.put_intent(&record).await?;
        info!(intent_id = %record.intent.intent_id,
              maker_amount = record.intent.maker_amount,
              partial = record.intent.allow_partial_fill,
              "intent opened");
        self.entries
            .insert(record.intent.intent_id, Arc::new(Mutex::new(record)));
        Ok(())
    }

    /// The acceptable rate at `at`: linear decay from the opening premium to
    /// the intent's implied floor across the configured window.
    pub fn decayed_floor(&self, intent: &SwapIntent, at: DateTime<Utc>) -> u128 {
        let floor = intent.floor_rate();
        let start = floor.saturating_mul(self.config.initial_premium_bps as u128) / 10_000;
        let window_ms = (self.config.decay_window_secs as u128).saturating_mul(1_000);
        if window_ms == 0 {
            return floor;
        }
        let elapsed_ms = (at - intent.created_at).num_milliseconds().max(0) as u128;
        if elapsed_ms >= window_ms {
            return floor;
        }
        start - (start - floor) * elapsed_ms / window_ms
    }

    /// Submit (or replace) a resolver's bid on an intent
    pub async fn submit_bid(&self, intent_id: Uuid, bid: Bid) -> CoordinatorResult<BidAck> {
        let entry = self.entry(intent_id)?;
        let mut record = entry.lock().await;
        let now = Utc::now();

        if !record.status.accepts_bids() {
            return Err(reject(BidRejectReason::IntentClosed));
        }
        if now >= record.intent.deadline {
            record.status = IntentStatus::Expired;
            record.updated_at = now;
            self.store.put_intent(&record).await?;
            return Err(reject(BidRejectReason::IntentExpired));
        }
        if bid.input_amount == 0 || bid.output_amount == 0 {
            return Err(reject(BidRejectReason::ZeroAmount));
        }

        if record.intent.allow_partial_fill {
            if bid.input_amount > record.remaining_amount {
                return Err(reject(BidRejectReason::FillTooLarge {
                    remaining: record.remaining_amount,
                    offered: bid.input_amount,
                }));
            }
            let min = record.intent.min_fill_amount.unwrap_or(1);
            // closing out the final sliver is always allowed
            if bid.input_amount < min && bid.input_amount != record.remaining_amount {
                return Err(reject(BidRejectReason::FillTooSmall {
                    minimum: min,
                    offered: bid.input_amount,
                }));
            }
        } else if bid.input_amount != record.remaining_amount {
            return Err(reject(if bid.input_amount < record.remaining_amount {
                BidRejectReason::FillTooSmall {
                    minimum: record.remaining_amount,
                    offered: bid.input_amount,
                }
            } else {
                BidRejectReason::FillTooLarge {
                    remaining: record.remaining_amount,
                    offered: bid.input_amount,
                }
            }));
        }

        let floor = self.decayed_floor(&record.intent, now);
        if bid.rate() < floor {
            return Err(reject(BidRejectReason::BelowFloor {
                floor,
                offered: bid.rate(),
            }));
        }

        let resolver = bid.resolver_id.clone();
        let replaced = record.bids.insert(resolver.clone(), bid).is_some();
        record.updated_at = now;
        self.store.put_intent(&record).await?;

        debug!(%intent_id, %resolver, replaced, "bid accepted");
        crate::metrics::record_bid_submitted();
        Ok(BidAck {
            replaced,
            current_floor: floor,
        })
    }

    /// Pick the winning bid(s) for an intent. For partial-fill intents this
    /// may accept several non-overlapping bids whose inputs sum to at most
    /// the unfilled remainder; each winner is executed as an independent
    /// swap. An empty result means no bid met the current floor.
    pub async fn select_winners(&self, intent_id: Uuid) -> CoordinatorResult<Vec<Bid>> {
        let entry = self.entry(intent_id)?;
        let mut record = entry.lock().await;
        let now = Utc::now();

        if !record.status.accepts_bids() {
            return Err(CoordinatorError::Validation(format!(
                "intent {intent_id} is not open for selection"
            )));
        }
        if now >= record.intent.deadline {
            record.status = IntentStatus::Expired;
            record.updated_at = now;
            self.store.put_intent(&record).await?;
            return Ok(Vec::new());
        }

        let floor = self.decayed_floor(&record.intent, now);
        let mut eligible: Vec<Bid> = record
            .bids
            .values()
            .filter(|bid| bid.rate() >= floor)
            .cloned()
            .collect();
        eligible.sort_by(|a, b| {
            b.net_output()
                .cmp(&a.net_output())
                .then(a.submitted_at.cmp(&b.submitted_at))
                .then(a.resolver_id.cmp(&b.resolver_id))
        });

        let mut winners = Vec::new();
        let mut remaining = record.remaining_amount;
        if record.intent.allow_partial_fill {
            let min = record.intent.min_fill_amount.unwrap_or(1);
            for bid in eligible {
                if bid.input_amount <= remaining
                    && (bid.input_amount >= min || bid.input_amount == remaining)
                {
                    remaining -= bid.input_amount;
                    winners.push(bid);
                }
            }
        } else if let Some(best) = eligible.into_iter().find(|b| b.input_amount == remaining) {
            remaining = 0;
            winners.push(best);
        }

        if winners.is_empty() {
            return Ok(winners);
        }

        // every non-winning bid becomes inactive once a selection lands
        record.bids.clear();
        record.remaining_amount = remaining;
        record.status = if remaining == 0 {
            IntentStatus::Filled
        } else {
            IntentStatus::PartiallyFilled
        };
        record.updated_at = now;
        self.store.put_intent(&record).await?;

        info!(%intent_id, winners = winners.len(), remaining,
              "auction settled");
        crate::metrics::record_auction_winners(winners.len());
        Ok(winners)
    }

    /// Withdraw the unfilled remainder of an intent. Fills already selected
    /// have their own swap records and run to completion; cancellation only
    /// stops future fills.
    pub async fn cancel_intent(&self, intent_id: Uuid) -> CoordinatorResult<()> {
        let entry = self.entry(intent_id)?;
        let mut record = entry.lock().await;
        if !record.status.accepts_bids() {
            return Err(CoordinatorError::Validation(format!(
                "intent {intent_id} can no longer be cancelled"
            )));
        }
        record.status = IntentStatus::Cancelled;
        record.bids.clear();
        record.updated_at = Utc::now();
        self.store.put_intent(&record).await?;
        info!(%intent_id, "intent cancelled");
        Ok(())
    }

    /// Withdraw a resolver's active bid. Returns whether a bid was present.
    pub async fn cancel_bid(&self, intent_id: Uuid, resolver_id: &str) -> CoordinatorResult<bool> {
        let entry = self.entry(intent_id)?;
        let mut record = entry.lock().await;
        let removed = record.bids.remove(resolver_id).is_some();
        if removed {
            record.updated_at = Utc::now();
            self.store.put_intent(&record).await?;
        }
        Ok(removed)
    }

    /// Snapshot of an intent's auction state
    pub async fn intent(&self, intent_id: Uuid) -> CoordinatorResult<IntentRecord> {
        let entry = self.entry(intent_id)?;
        let record = entry.lock().await;
        Ok(record.clone())
    }

    /// Number of intents currently tracked in memory
    pub fn open_count(&self) -> usize {
        self.entries.len()
    }

    fn entry(&self, intent_id: Uuid) -> CoordinatorResult<Arc<Mutex<IntentRecord>>> {
        self.entries
            .get(&intent_id)
            .map(|e| e.value().clone())
            .ok_or(CoordinatorError::IntentNotFound(intent_id))
    }
}

fn reject(reason: BidRejectReason) -> CoordinatorError {
    crate::metrics::record_bid_rejected(&reason);
    CoordinatorError::BidRejected(reason)
}
