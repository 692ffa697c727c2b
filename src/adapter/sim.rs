//! Deterministic simulated chain backend
//!
//! Stands in for a real chain integration in tests and local deployments.
//! Finality is driven purely by block height: an escrow created at height H
//! reports `Funded` once the head reaches H + confirmation_depth, and the
//! chain clock is derived from height, so tests control time by mining.
//! No sleeps, no randomness.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::adapter::{EscrowAdapter, EscrowParams};
use crate::error::AdapterError;
use crate::secret::{self, Secret};
use crate::types::{ChainHead, EscrowRef, EscrowState, Receipt};

#[derive(Debug, Clone)]
pub struct SimChainConfig {
    pub chain_id: u64,
    pub confirmation_depth: u64,
    /// Logical seconds that elapse per mined block
    pub block_interval: Duration,
    pub genesis: DateTime<Utc>,
}

impl SimChainConfig {
    pub fn new(chain_id: u64, confirmation_depth: u64, block_interval: Duration) -> Self {
        Self {
            chain_id,
            confirmation_depth,
            block_interval,
            genesis: Utc::now(),
        }
    }
}

/// Operations recorded by the simulator, for invariant assertions in tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimOp {
    CreateEscrow,
    Release,
    Refund,
}

#[derive(Debug, Clone)]
pub struct SimCall {
    pub op: SimOp,
    pub swap_id: Uuid,
    pub height: u64,
}

#[derive(Debug, Clone)]
struct SimEscrow {
    escrow_id: String,
    swap_id: Uuid,
    depositor: String,
    beneficiary: String,
    asset_symbol: String,
    amount: u128,
    hashlock: [u8; 32],
    timelock: DateTime<Utc>,
    created_height: u64,
    release_receipt: Option<Receipt>,
    refund_receipt: Option<Receipt>,
}

#[derive(Default)]
struct SimState {
    height: u64,
    balances: HashMap<(String, String), u128>,
    escrows: HashMap<String, SimEscrow>,
    by_swap: HashMap<Uuid, String>,
    calls: Vec<SimCall>,
    offline: bool,
    next_seq: u64,
}

pub struct SimulatedChain {
    config: SimChainConfig,
    state: Mutex<SimState>,
}

impl SimulatedChain {
    pub fn new(config: SimChainConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SimState::default()),
        }
    }

    fn chain_time(&self, height: u64) -> DateTime<Utc> {
        let elapsed_ms = self.config.block_interval.as_millis() as i64 * height as i64;
        self.config.genesis + chrono::Duration::milliseconds(elapsed_ms)
    }

    fn escrow_state(&self, escrow: &SimEscrow, height: u64) -> EscrowState {
        if escrow.release_receipt.is_some() {
            EscrowState::Resolved
        } else if escrow.refund_receipt.is_some() {
            EscrowState::Refunded
        } else if height >= escrow.created_height + self.config.confirmation_depth {
            EscrowState::Funded
        } else {
            EscrowState::Pending
        }
    }

    /// Mine `n` blocks
    pub fn advance(&self, n: u64) {
        let mut state = self.state.lock().unwrap();
        state.height += n;
    }

    /// Mine one block every `real_interval` of wall time until aborted
    pub fn spawn_miner(self: &Arc<Self>, real_interval: Duration) -> JoinHandle<()> {
        let chain = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(real_interval);
            loop {
                ticker.tick().await;
                chain.advance(1);
            }
        })
    }

    /// Toggle total unavailability; every adapter call fails retryably while
    /// offline
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn credit(&self, address: &str, asset_symbol: &str, amount: u128) {
        let mut state = self.state.lock().unwrap();
        *state
            .balances
            .entry((address.to_string(), asset_symbol.to_string()))
            .or_insert(0) += amount;
    }

    pub fn balance(&self, address: &str, asset_symbol: &str) -> u128 {
        let state = self.state.lock().unwrap();
        state
            .balances
            .get(&(address.to_string(), asset_symbol.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn height(&self) -> u64 {
        self.state.lock().unwrap().height
    }

    fn check_online(&self, state: &SimState) -> Result<(), AdapterError> {
        if state.offline {
            Err(AdapterError::NetworkUnavailable {
                chain_id: self.config.chain_id,
                message: "simulated outage".into(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EscrowAdapter for SimulatedChain {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    async fn head(&self) -> Result<ChainHead, AdapterError> {
        let state = self.state.lock().unwrap();
        self.check_online(&state)?;
        Ok(ChainHead {
            height: state.height,
            timestamp: self.chain_time(state.height),
        })
    }

    async fn create_escrow(&self, params: EscrowParams) -> Result<EscrowRef, AdapterError> {
        let mut state = self.state.lock().unwrap();
        self.check_online(&state)?;

        // Repeat call for the same swap returns the existing escrow
        if let Some(escrow_id) = state.by_swap.get(&params.swap_id) {
            return Ok(EscrowRef {
                chain_id: self.config.chain_id,
                escrow_id: escrow_id.clone(),
            });
        }

        let key = (params.depositor.clone(), params.asset.symbol.clone());
        let balance = state.balances.get(&key).copied().unwrap_or(0);
        if balance < params.amount {
            return Err(AdapterError::InsufficientFunds {
                chain_id: self.config.chain_id,
                have: balance,
                need: params.amount,
            });
        }
        *state.balances.get_mut(&key).unwrap() = balance - params.amount;

        state.next_seq += 1;
        let escrow_id = format!("htlc-{}-{}", self.config.chain_id, state.next_seq);
        let height = state.height;
        state.escrows.insert(
            escrow_id.clone(),
            SimEscrow {
                escrow_id: escrow_id.clone(),
                swap_id: params.swap_id,
                depositor: params.depositor,
                beneficiary: params.beneficiary,
                asset_symbol: params.asset.symbol,
                amount: params.amount,
                hashlock: params.hashlock,
                timelock: params.timelock,
                created_height: height,
                release_receipt: None,
                refund_receipt: None,
            },
        );
        state.by_swap.insert(params.swap_id, escrow_id.clone());
        state.calls.push(SimCall {
            op: SimOp::CreateEscrow,
            swap_id: params.swap_id,
            height,
        });

        Ok(EscrowRef {
            chain_id: self.config.chain_id,
            escrow_id,
        })
    }

    async fn release(&self, escrow: &EscrowRef, secret: &Secret) -> Result<Receipt, AdapterError> {
        let mut state = self.state.lock().unwrap();
        self.check_online(&state)?;
        let height = state.height;
        let now = self.chain_time(height);

        let entry = state.escrows.get(&escrow.escrow_id).cloned().ok_or_else(|| {
            AdapterError::UnknownEscrow {
                chain_id: self.config.chain_id,
                escrow_id: escrow.escrow_id.clone(),
            }
        })?;

        // Idempotent repeat of a completed release
        if let Some(receipt) = &entry.release_receipt {
            return Ok(receipt.clone());
        }
        if entry.refund_receipt.is_some() {
            return Err(AdapterError::AlreadyFinalized {
                escrow_id: entry.escrow_id.clone(),
            });
        }
        if self.escrow_state(&entry, height) != EscrowState::Funded {
            return Err(AdapterError::Rejected {
                chain_id: self.config.chain_id,
                reason: "escrow not finalized".into(),
            });
        }
        if now >= entry.timelock {
            return Err(AdapterError::TimelockExpired {
                escrow_id: entry.escrow_id.clone(),
            });
        }
        let valid = secret::verify(secret, &entry.hashlock).unwrap_or(false);
        if !valid {
            return Err(AdapterError::Rejected {
                chain_id: self.config.chain_id,
                reason: "invalid preimage".into(),
            });
        }

        state.next_seq += 1;
        let receipt = Receipt {
            tx_ref: format!("sim-{}-{}", self.config.chain_id, state.next_seq),
            revealed_secret: Some(*secret),
        };
        let key = (entry.beneficiary.clone(), entry.asset_symbol.clone());
        *state.balances.entry(key).or_insert(0) += entry.amount;
        state
            .escrows
            .get_mut(&escrow.escrow_id)
            .unwrap()
            .release_receipt = Some(receipt.clone());
        state.calls.push(SimCall {
            op: SimOp::Release,
            swap_id: entry.swap_id,
            height,
        });

        Ok(receipt)
    }

    async fn refund(&self, escrow: &EscrowRef) -> Result<Receipt, AdapterError> {
        let mut state = self.state.lock().unwrap();
        self.check_online(&state)?;
        let height = state.height;
        let now = self.chain_time(height);

        let entry = state.escrows.get(&escrow.escrow_id).cloned().ok_or_else(|| {
            AdapterError::UnknownEscrow {
                chain_id: self.config.chain_id,
                escrow_id: escrow.escrow_id.clone(),
            }
        })?;

        if let Some(receipt) = &entry.refund_receipt {
            return Ok(receipt.clone());
        }
        if entry.release_receipt.is_some() {
            return Err(AdapterError::AlreadyFinalized {
                escrow_id: entry.escrow_id.clone(),
            });
        }
        if now < entry.timelock {
            return Err(AdapterError::TimelockNotExpired {
                escrow_id: entry.escrow_id.clone(),
            });
        }

        state.next_seq += 1;
        let receipt = Receipt {
            tx_ref: format!("sim-{}-{}", self.config.chain_id, state.next_seq),
            revealed_secret: None,
        };
        let key = (entry.depositor.clone(), entry.asset_symbol.clone());
        *state.balances.entry(key).or_insert(0) += entry.amount;
        state
            .escrows
            .get_mut(&escrow.escrow_id)
            .unwrap()
            .refund_receipt = Some(receipt.clone());
        state.calls.push(SimCall {
            op: SimOp::Refund,
            swap_id: entry.swap_id,
            height,
        });

        Ok(receipt)
    }

    async fn get_state(&self, escrow: &EscrowRef) -> Result<EscrowState, AdapterError> {
        let state = self.state.lock().unwrap();
        self.check_online(&state)?;
        let entry = state.escrows.get(&escrow.escrow_id).ok_or_else(|| {
            AdapterError::UnknownEscrow {
                chain_id: self.config.chain_id,
                escrow_id: escrow.escrow_id.clone(),
            }
        })?;
        Ok(self.escrow_state(entry, state.height))
    }
}
