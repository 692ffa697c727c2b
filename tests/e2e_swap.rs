//! End-to-end swap scenarios over the deterministic simulated chains
//!
//! Two simulated chains play the source (EVM-style) and destination
//! (action-style) legs. Chain time advances only by mining, so every
//! timelock interaction here is driven, not slept for.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use hourglass_relayer::adapter::sim::{SimChainConfig, SimOp, SimulatedChain};
use hourglass_relayer::adapter::{ChainRegistry, RetryPolicy};
use hourglass_relayer::auction::BiddingEngine;
use hourglass_relayer::config::{AuctionConfig, CoordinatorConfig, TimelockConfig};
use hourglass_relayer::coordination::{RefundWatcher, SwapEngine};
use hourglass_relayer::ledger::{MemoryStore, SwapLedger};
use hourglass_relayer::types::{AssetId, Bid, EscrowState, SwapIntent, SwapPhase};

const MINE_EVERY: Duration = Duration::from_millis(10);

fn coordinator_config() -> CoordinatorConfig {
    CoordinatorConfig {
        instance_id: "e2e".into(),
        refund_scan_interval_secs: 1,
        max_retries: 2,
        retry_base_delay_ms: 2,
        retry_max_delay_ms: 10,
        confirm_poll_base_ms: 5,
        confirm_poll_max_ms: 20,
        funding_ceiling_secs: 2,
        health_check_interval_secs: 30,
    }
}

fn auction_config() -> AuctionConfig {
    AuctionConfig {
        initial_premium_bps: 10_500,
        decay_window_secs: 60,
    }
}

fn asset(chain_id: u64, symbol: &str) -> AssetId {
    AssetId {
        chain_id,
        symbol: symbol.into(),
        token: None,
    }
}

fn intent(maker_amount: u128, taker_amount: u128, partial: bool) -> SwapIntent {
    SwapIntent {
        intent_id: Uuid::new_v4(),
        maker_address: "maker".into(),
        counterparty_address: "maker-dest".into(),
        maker_asset: asset(1, "AAA"),
        taker_asset: asset(2, "BBB"),
        maker_amount,
        taker_amount,
        deadline: Utc::now() + chrono::Duration::hours(1),
        allow_partial_fill: partial,
        min_fill_amount: if partial { Some(10) } else { None },
        created_at: Utc::now(),
    }
}

fn bid(resolver: &str, input: u128, output: u128) -> Bid {
    Bid {
        resolver_id: resolver.into(),
        input_amount: input,
        output_amount: output,
        gas_estimate: 1,
        submitted_at: Utc::now(),
    }
}

struct Harness {
    ledger: Arc<SwapLedger>,
    source: Arc<SimulatedChain>,
    dest: Arc<SimulatedChain>,
    engine: SwapEngine,
    auction: BiddingEngine,
    chains: Arc<ChainRegistry>,
}

/// Build a full stack with the given timelock offsets (in logical chain
/// seconds; one block = one second on both chains).
fn harness(timelocks: TimelockConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(SwapLedger::new(store.clone()));
    let source = Arc::new(SimulatedChain::new(SimChainConfig::new(
        1,
        2,
        Duration::from_secs(1),
    )));
    let dest = Arc::new(SimulatedChain::new(SimChainConfig::new(
        2,
        2,
        Duration::from_secs(1),
    )));
    source.credit("maker", "AAA", 1_000);
    dest.credit("resolver-1", "BBB", 1_000);
    dest.credit("resolver-2", "BBB", 1_000);

    let chains = Arc::new(ChainRegistry::new());
    chains.register(source.clone());
    chains.register(dest.clone());

    let engine = SwapEngine::new(
        ledger.clone(),
        source.clone(),
        dest.clone(),
        &coordinator_config(),
        timelocks,
    );
    let auction = BiddingEngine::new(store, auction_config());

    Harness {
        ledger,
        source,
        dest,
        engine,
        auction,
        chains,
    }
}

fn watcher(harness: &Harness) -> RefundWatcher {
    RefundWatcher::new(
        harness.ledger.clone(),
        harness.chains.clone(),
        RetryPolicy {
            attempt_timeout: Duration::from_millis(100),
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter_ms: 0,
        },
        Duration::from_millis(20),
    )
}

#[tokio::test]
async fn full_swap_completes_and_resolves_both_escrows() {
    let hx = harness(TimelockConfig {
        dest_offset_secs: 3600,
        source_offset_secs: 7200,
    });
    let _m1 = hx.source.spawn_miner(MINE_EVERY);
    let _m2 = hx.dest.spawn_miner(MINE_EVERY);

    let intent = intent(100, 100, false);
    hx.auction.open_intent(intent.clone()).await.unwrap();
    hx.auction
        .submit_bid(intent.intent_id, bid("resolver-1", 100, 110))
        .await
        .unwrap();
    let winners = hx.auction.select_winners(intent.intent_id).await.unwrap();
    assert_eq!(winners.len(), 1);

    let record = hx.engine.execute_fill(&intent, &winners[0]).await.unwrap();

    assert_eq!(record.phase, SwapPhase::Completed);
    assert_eq!(record.source.state, EscrowState::Resolved);
    assert_eq!(record.dest.state, EscrowState::Resolved);
    assert!(record.source.timelock > record.dest.timelock);

    // asset movement: maker paid 100 AAA, counterparty received the bid's
    // 110 BBB, resolver collected the maker's 100 AAA
    assert_eq!(hx.source.balance("maker", "AAA"), 900);
    assert_eq!(hx.source.balance("resolver-1", "AAA"), 100);
    assert_eq!(hx.dest.balance("maker-dest", "BBB"), 110);
    assert_eq!(hx.dest.balance("resolver-1", "BBB"), 890);
}

#[tokio::test]
async fn dest_escrow_is_never_created_before_source_funds() {
    let hx = harness(TimelockConfig {
        dest_offset_secs: 3600,
        source_offset_secs: 7200,
    });
    // the source chain never mines, so its escrow never confirms
    let _m2 = hx.dest.spawn_miner(MINE_EVERY);

    let intent = intent(100, 100, false);
    let err = hx
        .engine
        .execute_fill(&intent, &bid("resolver-1", 100, 110))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        hourglass_relayer::error::CoordinatorError::Timeout { .. }
    ));

    // the invariant: not a single destination-chain escrow call happened
    assert!(hx
        .dest
        .calls()
        .iter()
        .all(|c| c.op != SimOp::CreateEscrow));

    // the source escrow exists but never confirmed, so the swap is routed
    // to the refund path rather than plain failure
    let records = hx.ledger.active().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].phase, SwapPhase::Refunding);
}

#[tokio::test]
async fn unreachable_destination_ends_in_source_refund() {
    let hx = harness(TimelockConfig {
        dest_offset_secs: 30,
        source_offset_secs: 60,
    });
    let _m1 = hx.source.spawn_miner(MINE_EVERY);
    let _m2 = hx.dest.spawn_miner(MINE_EVERY);
    hx.dest.set_offline(true);

    let intent = intent(100, 100, false);
    let err = hx
        .engine
        .execute_fill(&intent, &bid("resolver-1", 100, 110))
        .await
        .unwrap_err();
    assert!(err.is_retryable(), "exhausted network retries: {err}");

    let records = hx.ledger.active().await.unwrap();
    let record = &records[0];
    assert_eq!(record.phase, SwapPhase::Refunding);
    assert_eq!(record.source.state, EscrowState::Funded);
    assert_eq!(hx.source.balance("maker", "AAA"), 900);

    // the source refund only clears once its timelock (60 logical seconds)
    // elapses; the watcher keeps scanning until then
    let watcher = watcher(&hx);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if watcher.scan_once().await.unwrap() == 1 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "source refund never cleared"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let stored = hx.ledger.get(record.swap_id).await.unwrap();
    assert_eq!(stored.phase, SwapPhase::Refunded);
    assert_eq!(stored.source.state, EscrowState::Refunded);
    assert_eq!(hx.source.balance("maker", "AAA"), 1_000);
    // no swap ends half-resolved
    assert_ne!(stored.dest.state, EscrowState::Resolved);
}

#[tokio::test]
async fn partial_fills_complete_as_independent_swaps() {
    let hx = harness(TimelockConfig {
        dest_offset_secs: 3600,
        source_offset_secs: 7200,
    });
    let _m1 = hx.source.spawn_miner(MINE_EVERY);
    let _m2 = hx.dest.spawn_miner(MINE_EVERY);

    let intent = intent(100, 100, true);
    hx.auction.open_intent(intent.clone()).await.unwrap();
    hx.auction
        .submit_bid(intent.intent_id, bid("resolver-1", 40, 46))
        .await
        .unwrap();
    hx.auction
        .submit_bid(intent.intent_id, bid("resolver-2", 60, 68))
        .await
        .unwrap();

    let winners = hx.auction.select_winners(intent.intent_id).await.unwrap();
    assert_eq!(winners.len(), 2);
    assert_eq!(winners.iter().map(|w| w.input_amount).sum::<u128>(), 100);

    let (first, second) = tokio::join!(
        hx.engine.execute_fill(&intent, &winners[0]),
        hx.engine.execute_fill(&intent, &winners[1]),
    );
    let first = first.unwrap();
    let second = second.unwrap();

    assert_eq!(first.phase, SwapPhase::Completed);
    assert_eq!(second.phase, SwapPhase::Completed);
    assert_ne!(first.swap_id, second.swap_id);

    // summed fills equal the full intent size
    assert_eq!(hx.source.balance("maker", "AAA"), 900);
    assert_eq!(hx.dest.balance("maker-dest", "BBB"), 46 + 68);

    let record = hx.auction.intent(intent.intent_id).await.unwrap();
    assert_eq!(record.remaining_amount, 0);
}

#[tokio::test]
async fn recovery_finds_nothing_after_clean_completion() {
    let hx = harness(TimelockConfig {
        dest_offset_secs: 3600,
        source_offset_secs: 7200,
    });
    let _m1 = hx.source.spawn_miner(MINE_EVERY);
    let _m2 = hx.dest.spawn_miner(MINE_EVERY);

    let intent = intent(100, 100, false);
    let record = hx
        .engine
        .execute_fill(&intent, &bid("resolver-1", 100, 110))
        .await
        .unwrap();
    assert_eq!(record.phase, SwapPhase::Completed);

    // a fresh engine over the same ledger finds nothing left to resume
    let rebooted = SwapEngine::new(
        hx.ledger.clone(),
        hx.source.clone(),
        hx.dest.clone(),
        &coordinator_config(),
        TimelockConfig {
            dest_offset_secs: 3600,
            source_offset_secs: 7200,
        },
    );
    assert_eq!(rebooted.recover().await.unwrap(), 0);
}

#[tokio::test]
async fn restart_without_preimage_routes_swap_to_refund() {
    let hx = harness(TimelockConfig {
        dest_offset_secs: 30,
        source_offset_secs: 60,
    });
    let _m1 = hx.source.spawn_miner(MINE_EVERY);
    // destination stalls so the fill parks mid-funding with the source leg
    // locked
    hx.dest.set_offline(true);

    let intent = intent(100, 100, false);
    let _ = hx
        .engine
        .execute_fill(&intent, &bid("resolver-1", 100, 110))
        .await
        .unwrap_err();

    // force the record back to a funding phase, as if the process had died
    // before escalating
    let swap_id = hx.ledger.active().await.unwrap()[0].swap_id;
    {
        let mut record = hx.ledger.get(swap_id).await.unwrap();
        record.phase = SwapPhase::DestEscrowPending;
        hx.ledger.insert(&record).await.unwrap();
    }

    // the restarted engine has no preimage for this swap: continuing to
    // fund would lock more money against an uncompletable hashlock
    let rebooted = SwapEngine::new(
        hx.ledger.clone(),
        hx.source.clone(),
        hx.dest.clone(),
        &coordinator_config(),
        TimelockConfig {
            dest_offset_secs: 30,
            source_offset_secs: 60,
        },
    );
    rebooted.recover().await.unwrap();

    let stored = hx.ledger.get(swap_id).await.unwrap();
    assert_eq!(stored.phase, SwapPhase::Refunding);
}
