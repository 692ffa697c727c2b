//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Swap lifecycle progress
//! - Escrow creation and funding per chain
//! - Auction activity
//! - Adapter retry pressure

use crate::error::{BidRejectReason, CoordinatorResult};

use axum::{routing::get, Router};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram, Counter,
    CounterVec, Encoder, GaugeVec, Histogram, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Swap metrics
    pub static ref SWAPS_OPENED: Counter = register_counter!(
        "hourglass_swaps_opened_total",
        "Total swap records opened"
    ).unwrap();

    pub static ref SWAP_PHASES: CounterVec = register_counter_vec!(
        "hourglass_swap_phase_transitions_total",
        "Swap phase transitions by target phase",
        &["phase"]
    ).unwrap();

    pub static ref SWAPS_REFUNDED: Counter = register_counter!(
        "hourglass_swaps_refunded_total",
        "Total swaps fully refunded"
    ).unwrap();

    pub static ref SWAP_COMPLETION_SECONDS: Histogram = register_histogram!(
        "hourglass_swap_completion_seconds",
        "Time from swap open to completed reveal",
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 1800.0, 3600.0]
    ).unwrap();

    // Escrow metrics
    pub static ref ESCROWS_CREATED: CounterVec = register_counter_vec!(
        "hourglass_escrows_created_total",
        "Escrows created per chain",
        &["chain_id"]
    ).unwrap();

    pub static ref ESCROWS_FUNDED: CounterVec = register_counter_vec!(
        "hourglass_escrows_funded_total",
        "Escrows confirmed funded per chain",
        &["chain_id"]
    ).unwrap();

    // Chain metrics
    pub static ref CHAIN_HEAD: GaugeVec = register_gauge_vec!(
        "hourglass_chain_head_height",
        "Last observed finalized head per chain",
        &["chain_id"]
    ).unwrap();

    pub static ref ADAPTER_RETRIES: CounterVec = register_counter_vec!(
        "hourglass_adapter_retries_total",
        "Adapter call retries by chain and operation",
        &["chain_id", "op"]
    ).unwrap();

    // Auction metrics
    pub static ref BIDS_SUBMITTED: Counter = register_counter!(
        "hourglass_bids_submitted_total",
        "Total bids accepted"
    ).unwrap();

    pub static ref BIDS_REJECTED: CounterVec = register_counter_vec!(
        "hourglass_bids_rejected_total",
        "Bids rejected by reason",
        &["reason"]
    ).unwrap();

    pub static ref AUCTION_WINNERS: Counter = register_counter!(
        "hourglass_auction_winners_total",
        "Winning bids selected"
    ).unwrap();

    // Watcher metrics
    pub static ref REFUND_SCANS: Counter = register_counter!(
        "hourglass_refund_scans_total",
        "Refund watcher scan passes"
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECKS: Counter = register_counter!(
        "hourglass_health_checks_total",
        "Health check passes"
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> CoordinatorResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
        axum::serve(listener, app).await.unwrap();

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

// Helper functions to record metrics

pub fn record_swap_opened() {
    SWAPS_OPENED.inc();
}

pub fn record_swap_phase(phase: &str) {
    SWAP_PHASES.with_label_values(&[phase]).inc();
}

pub fn record_swap_completed(opened_at: DateTime<Utc>) {
    let elapsed = (Utc::now() - opened_at).num_milliseconds().max(0) as f64 / 1000.0;
    SWAP_COMPLETION_SECONDS.observe(elapsed);
}

pub fn record_swap_refunded() {
    SWAPS_REFUNDED.inc();
}

pub fn record_escrow_created(chain_id: u64) {
    ESCROWS_CREATED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_escrow_funded(chain_id: u64) {
    ESCROWS_FUNDED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_chain_head(chain_id: u64, height: u64) {
    CHAIN_HEAD
        .with_label_values(&[&chain_id.to_string()])
        .set(height as f64);
}

pub fn record_adapter_retry(chain_id: u64, op: &str) {
    ADAPTER_RETRIES
        .with_label_values(&[&chain_id.to_string(), op])
        .inc();
}

pub fn record_bid_submitted() {
    BIDS_SUBMITTED.inc();
}

pub fn record_bid_rejected(reason: &BidRejectReason) {
    let label = match reason {
        BidRejectReason::IntentExpired => "intent_expired",
        BidRejectReason::IntentClosed => "intent_closed",
        BidRejectReason::BelowFloor { .. } => "below_floor",
        BidRejectReason::FillTooSmall { .. } => "fill_too_small",
        BidRejectReason::FillTooLarge { .. } => "fill_too_large",
        BidRejectReason::ZeroAmount => "zero_amount",
    };
    BIDS_REJECTED.with_label_values(&[label]).inc();
}

pub fn record_auction_winners(count: usize) {
    AUCTION_WINNERS.inc_by(count as f64);
}

pub fn record_refund_scan() {
    REFUND_SCANS.inc();
}

pub fn record_health_check() {
    HEALTH_CHECKS.inc();
}
