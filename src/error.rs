//! Error types for the Hourglass Relayer

use thiserror::Error;

/// Errors surfaced by chain escrow adapters.
///
/// Every adapter call resolves to exactly one of these; `NetworkUnavailable`
/// is the only variant the orchestration layer retries.
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    #[error("insufficient funds on chain {chain_id}: have {have}, need {need}")]
    InsufficientFunds { chain_id: u64, have: u128, need: u128 },

    #[error("escrow {escrow_id} already finalized")]
    AlreadyFinalized { escrow_id: String },

    #[error("timelock not yet expired for escrow {escrow_id}")]
    TimelockNotExpired { escrow_id: String },

    #[error("timelock expired for escrow {escrow_id}")]
    TimelockExpired { escrow_id: String },

    #[error("chain {chain_id} unavailable: {message}")]
    NetworkUnavailable { chain_id: u64, message: String },

    #[error("rejected by chain {chain_id}: {reason}")]
    Rejected { chain_id: u64, reason: String },

    #[error("escrow {escrow_id} not found on chain {chain_id}")]
    UnknownEscrow { chain_id: u64, escrow_id: String },
}

impl AdapterError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::NetworkUnavailable { .. })
    }
}

/// Reasons a bid is turned away synchronously, before any state is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BidRejectReason {
    IntentExpired,
    IntentClosed,
    BelowFloor { floor: u128, offered: u128 },
    FillTooSmall { minimum: u128, offered: u128 },
    FillTooLarge { remaining: u128, offered: u128 },
    ZeroAmount,
}

impl std::fmt::Display for BidRejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BidRejectReason::IntentExpired => write!(f, "intent deadline has passed"),
            BidRejectReason::IntentClosed => write!(f, "intent is no longer open"),
            BidRejectReason::BelowFloor { floor, offered } => {
                write!(f, "bid rate {offered} below current floor {floor}")
            }
            BidRejectReason::FillTooSmall { minimum, offered } => {
                write!(f, "fill {offered} below minimum {minimum}")
            }
            BidRejectReason::FillTooLarge { remaining, offered } => {
                write!(f, "fill {offered} exceeds remaining {remaining}")
            }
            BidRejectReason::ZeroAmount => write!(f, "zero input or output amount"),
        }
    }
}

/// Main error type for the coordinator
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Chain(#[from] AdapterError),

    #[error("protocol violation on swap {swap_id}: {reason}")]
    Protocol { swap_id: uuid::Uuid, reason: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("bid rejected: {0}")]
    BidRejected(BidRejectReason),

    #[error("intent {0} not found")]
    IntentNotFound(uuid::Uuid),

    #[error("swap {0} not found")]
    SwapNotFound(uuid::Uuid),

    #[error("chain {chain_id} not registered")]
    ChainNotFound { chain_id: u64 },

    #[error("invalid swap transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("timed out waiting for {operation}")]
    Timeout { operation: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            CoordinatorError::Chain(e) => e.is_retryable(),
            CoordinatorError::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Protocol { .. }
                | CoordinatorError::Chain(AdapterError::InsufficientFunds { .. })
        )
    }
}

/// Result type for coordinator operations
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
