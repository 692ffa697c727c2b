//! Core data model: intents, bids, escrows, and swap records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::secret::{Hashlock, Secret};

/// Fixed-point scale for exchange rates (`output * RATE_SCALE / input`)
pub const RATE_SCALE: u128 = 1_000_000_000_000_000_000;

/// An asset on a specific chain. `token` is `None` for the chain's native
/// asset; addresses and denoms stay opaque strings because the two legs use
/// incompatible address formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetId {
    pub chain_id: u64,
    pub symbol: String,
    pub token: Option<String>,
}

/// A maker's signed request to exchange `maker_amount` of `maker_asset` for
/// `taker_amount` of `taker_asset`, fillable by competing resolvers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapIntent {
    pub intent_id: Uuid,
    pub maker_address: String,
    /// Destination-chain address that receives the taker asset
    pub counterparty_address: String,
    pub maker_asset: AssetId,
    pub taker_asset: AssetId,
    pub maker_amount: u128,
    pub taker_amount: u128,
    pub deadline: DateTime<Utc>,
    pub allow_partial_fill: bool,
    pub min_fill_amount: Option<u128>,
    pub created_at: DateTime<Utc>,
}

impl SwapIntent {
    /// The maker's minimum acceptable rate, before any auction premium.
    pub fn floor_rate(&self) -> u128 {
        rate(self.taker_amount, self.maker_amount)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Expired,
}

impl IntentStatus {
    pub fn accepts_bids(&self) -> bool {
        matches!(self, IntentStatus::Open | IntentStatus::PartiallyFilled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            IntentStatus::Open => "open",
            IntentStatus::PartiallyFilled => "partially_filled",
            IntentStatus::Filled => "filled",
            IntentStatus::Cancelled => "cancelled",
            IntentStatus::Expired => "expired",
        }
    }
}

/// A resolver's offer to fill (part of) an intent: take `input_amount` of the
/// maker asset, deliver `output_amount` of the taker asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub resolver_id: String,
    pub input_amount: u128,
    pub output_amount: u128,
    /// Execution cost, already denominated in taker-asset smallest units by
    /// the external fee service
    pub gas_estimate: u128,
    pub submitted_at: DateTime<Utc>,
}

impl Bid {
    pub fn rate(&self) -> u128 {
        rate(self.output_amount, self.input_amount)
    }

    /// Output to the maker net of execution cost; the ranking criterion.
    pub fn net_output(&self) -> u128 {
        self.output_amount.saturating_sub(self.gas_estimate)
    }
}

/// Compute `output / input` at `RATE_SCALE` precision.
pub fn rate(output: u128, input: u128) -> u128 {
    if input == 0 {
        return 0;
    }
    output.saturating_mul(RATE_SCALE) / input
}

/// An intent plus its auction state, as held by the bidding engine and
/// persisted to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRecord {
    pub intent: SwapIntent,
    pub status: IntentStatus,
    /// Maker-asset amount not yet claimed by a winning bid
    pub remaining_amount: u128,
    /// Active bids keyed by resolver; resubmission replaces
    pub bids: std::collections::HashMap<String, Bid>,
    pub updated_at: DateTime<Utc>,
}

impl IntentRecord {
    pub fn new(intent: SwapIntent) -> Self {
        let remaining_amount = intent.maker_amount;
        let updated_at = intent.created_at;
        Self {
            intent,
            status: IntentStatus::Open,
            remaining_amount,
            bids: std::collections::HashMap::new(),
            updated_at,
        }
    }

    pub fn filled_amount(&self) -> u128 {
        self.intent.maker_amount - self.remaining_amount
    }
}

/// On-chain escrow lifecycle as reported by an adapter. `Pending` covers
/// broadcast-but-not-finalized; only `Funded` escrows are spendable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowState {
    Pending,
    Funded,
    Resolved,
    Refunded,
}

impl EscrowState {
    pub fn is_final(&self) -> bool {
        matches!(self, EscrowState::Resolved | EscrowState::Refunded)
    }
}

/// Opaque handle to an escrow owned by a chain integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRef {
    pub chain_id: u64,
    pub escrow_id: String,
}

/// Finalized outcome of a release or refund call. `revealed_secret` is the
/// preimage as read back from the finalized transaction, so a restart between
/// the two release legs can recover it from chain state alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_ref: String,
    pub revealed_secret: Option<Secret>,
}

/// Finalized chain head as reported by an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainHead {
    pub height: u64,
    pub timestamp: DateTime<Utc>,
}

/// One leg of a swap: the escrow the coordinator expects on a chain, and the
/// last state observed for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowSlot {
    pub chain_id: u64,
    pub asset: AssetId,
    pub amount: u128,
    pub depositor: String,
    pub beneficiary: String,
    pub timelock: DateTime<Utc>,
    pub escrow_ref: Option<EscrowRef>,
    pub state: EscrowState,
}

/// Swap lifecycle. `Refunding`/`Refunded` are reachable from any pending or
/// funded phase; `Failed` is terminal and only legal while no escrow holds
/// funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapPhase {
    Created,
    SourceEscrowPending,
    SourceEscrowFunded,
    DestEscrowPending,
    DestEscrowFunded,
    Revealing,
    Completed,
    Refunding,
    Refunded,
    Failed,
}

impl SwapPhase {
    pub fn label(&self) -> &'static str {
        match self {
            SwapPhase::Created => "created",
            SwapPhase::SourceEscrowPending => "source_escrow_pending",
            SwapPhase::SourceEscrowFunded => "source_escrow_funded",
            SwapPhase::DestEscrowPending => "dest_escrow_pending",
            SwapPhase::DestEscrowFunded => "dest_escrow_funded",
            SwapPhase::Revealing => "revealing",
            SwapPhase::Completed => "completed",
            SwapPhase::Refunding => "refunding",
            SwapPhase::Refunded => "refunded",
            SwapPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapPhase::Completed | SwapPhase::Refunded | SwapPhase::Failed
        )
    }

    /// Whether a transition to `to` is legal
    pub fn can_transition(&self, to: SwapPhase) -> bool {
        use SwapPhase::*;
        if self.is_terminal() {
            return false;
        }
        match (*self, to) {
            (Created, SourceEscrowPending) => true,
            (SourceEscrowPending, SourceEscrowFunded) => true,
            (SourceEscrowFunded, DestEscrowPending) => true,
            (DestEscrowPending, DestEscrowFunded) => true,
            (DestEscrowFunded, Revealing) => true,
            (Revealing, Completed) => true,
            // Refund path: any pending/funded phase may abort, and a reveal
            // that can no longer finish falls back to it as well
            (
                SourceEscrowPending | SourceEscrowFunded | DestEscrowPending
                | DestEscrowFunded | Revealing,
                Refunding,
            ) => true,
            (Refunding, Refunded) => true,
            // Failure is only a legal endpoint while no funds are at stake;
            // callers route funded swaps through Refunding instead
            (_, Failed) => true,
            _ => false,
        }
    }
}

/// The authoritative record for one executed bid: exactly one per fill,
/// mutated only under the ledger's per-swap lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRecord {
    pub swap_id: Uuid,
    pub intent_id: Uuid,
    pub resolver_id: String,
    pub phase: SwapPhase,
    pub hashlock: Hashlock,
    /// Populated only once the reveal has published the preimage on-chain
    pub secret: Option<Secret>,
    pub source: EscrowSlot,
    pub dest: EscrowSlot,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SwapRecord {
    /// True if any leg holds confirmed funds that are not yet finally
    /// resolved or refunded
    pub fn funds_at_stake(&self) -> bool {
        [&self.source, &self.dest]
            .iter()
            .any(|slot| slot.state == EscrowState::Funded)
    }
}
