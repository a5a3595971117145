//! End-to-end scheduler scenarios against the in-memory gateway.

use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use tradr::config::{RiskConfig, ScanConfig, SignalMode};
use tradr::engine::scheduler::ScanScheduler;
use tradr::risk::ledger::ChallengeLedger;
use tradr::types::{ChallengePhase, ConfluenceFlags, Direction, Pillar};

use crate::mock_gateway::{base_price, MockGateway, ScriptedSignalEngine};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    gateway: Arc<MockGateway>,
    engine: Arc<ScriptedSignalEngine>,
    token: CancellationToken,
}

impl Harness {
    fn new() -> Self {
        Self {
            gateway: Arc::new(MockGateway::new()),
            engine: Arc::new(ScriptedSignalEngine::new(ConfluenceFlags::all())),
            token: CancellationToken::new(),
        }
    }

    fn scheduler(&self, symbols: &[&str], max_open_positions: usize) -> ScanScheduler {
        self.scheduler_with(Self::config(symbols), max_open_positions)
    }

    fn config(symbols: &[&str]) -> ScanConfig {
        ScanConfig {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            scan_interval: Duration::from_secs(3600),
            signal_mode: SignalMode::Standard,
            min_confluence: 4,
            pacing: Duration::from_millis(1),
            idle_tick: Duration::from_millis(5),
            reconnect_backoff: Duration::from_millis(5),
            strategy_params: serde_json::Value::Null,
            order_comment: "TRADR-TEST".to_string(),
        }
    }

    fn scheduler_with(&self, config: ScanConfig, max_open_positions: usize) -> ScanScheduler {
        let ledger = ChallengeLedger::in_memory(RiskConfig {
            state_file: "unused.json".to_string(),
            phase: ChallengePhase::Phase1,
            account_size: dec!(100000),
            risk_per_trade_pct: 1.0,
            max_daily_loss_pct: 5.0,
            max_drawdown_pct: 10.0,
            profit_target_pct: 10.0,
            min_profitable_days: 4,
            max_open_positions,
            lot_step: 0.01,
            min_lot: 0.01,
            default_contract_size: 100_000.0,
            contract_sizes: HashMap::new(),
        });
        ScanScheduler::new(
            config,
            self.gateway.clone(),
            self.gateway.clone(),
            self.engine.clone(),
            Box::new(ledger),
            self.token.clone(),
        )
    }

    /// Cancel the token after `after`.
    fn cancel_after(&self, after: Duration) {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            token.cancel();
        });
    }
}

// ---------------------------------------------------------------------------
// Full loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_run_executes_and_stops_on_cancel() {
    let h = Harness::new();
    h.gateway.set_slippage(0.0005);
    let mut scheduler = h.scheduler(&["EURUSD", "GBPUSD"], 5);

    h.cancel_after(Duration::from_millis(100));
    scheduler.run().await.unwrap();

    assert_eq!(h.gateway.orders().len(), 2);
    let open = scheduler.risk().open_positions();
    assert_eq!(open.len(), 2);
    let eur = open.iter().find(|p| p.symbol == "EURUSD").unwrap();
    // Fill price, not the computed entry
    assert!((eur.entry_price - (base_price("EURUSD") + 0.0005)).abs() < 1e-9);
    assert!(!eur.adopted);

    let state = scheduler.loop_state();
    assert_eq!(state.scan_count, 1);
    assert!(!state.running);
    assert!(!state.connected);
    assert_eq!(h.gateway.connect_calls(), 1);
    assert_eq!(h.gateway.disconnect_calls(), 1);
}

#[tokio::test]
async fn test_startup_connect_failure_aborts() {
    let h = Harness::new();
    h.gateway.set_allow_connect(false);
    let mut scheduler = h.scheduler(&["EURUSD"], 5);

    assert!(scheduler.run().await.is_err());
    assert_eq!(h.engine.confluence_calls(), 0);
    assert!(h.gateway.orders().is_empty());
    assert_eq!(scheduler.loop_state().scan_count, 0);
}

#[tokio::test]
async fn test_external_close_reconciled() {
    let h = Harness::new();
    let mut scheduler = h.scheduler(&["EURUSD", "GBPUSD"], 5);

    let gateway = h.gateway.clone();
    let token = h.token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        if let Some(p) = gateway.positions().iter().find(|p| p.symbol == "EURUSD") {
            gateway.close_position(p.ticket);
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        token.cancel();
    });
    scheduler.run().await.unwrap();

    let open = scheduler.risk().open_positions();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].symbol, "GBPUSD");
    // Not due again within the hour, so no re-entry.
    assert_eq!(h.gateway.orders().len(), 2);
}

#[tokio::test]
async fn test_orphan_position_adopted() {
    let h = Harness::new();
    let ticket = h.gateway.inject_position("AUDUSD");
    let mut scheduler = h.scheduler(&["EURUSD"], 5);

    h.cancel_after(Duration::from_millis(60));
    scheduler.run().await.unwrap();

    let open = scheduler.risk().open_positions();
    let orphan = open.iter().find(|p| p.order_id == ticket).unwrap();
    assert!(orphan.adopted);
    assert_eq!(orphan.symbol, "AUDUSD");
    assert_eq!(open.len(), 2);
}

#[tokio::test]
async fn test_reconnects_after_drop() {
    let h = Harness::new();
    let mut scheduler = h.scheduler(&["EURUSD"], 5);

    let gateway = h.gateway.clone();
    let token = h.token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        gateway.drop_connection();
        tokio::time::sleep(Duration::from_millis(60)).await;
        token.cancel();
    });
    scheduler.run().await.unwrap();

    assert!(h.gateway.connect_calls() >= 2);
    assert_eq!(h.gateway.disconnect_calls(), 1);
}

#[tokio::test]
async fn test_failed_reconnect_keeps_retrying() {
    let h = Harness::new();
    let mut scheduler = h.scheduler(&["EURUSD"], 5);

    let gateway = h.gateway.clone();
    let token = h.token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        gateway.set_allow_connect(false);
        gateway.drop_connection();
        tokio::time::sleep(Duration::from_millis(80)).await;
        token.cancel();
    });
    scheduler.run().await.unwrap();

    // Startup plus several failed attempts, and the loop only ended on cancel.
    assert!(h.gateway.connect_calls() >= 3);
    assert!(!scheduler.loop_state().running);
    assert_eq!(scheduler.loop_state().scan_count, 1);
}

#[tokio::test]
async fn test_cancel_during_backoff_stops_promptly() {
    let h = Harness::new();
    let mut config = Harness::config(&["EURUSD"]);
    config.reconnect_backoff = Duration::from_secs(3600);
    let mut scheduler = h.scheduler_with(config, 5);

    let gateway = h.gateway.clone();
    let token = h.token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        gateway.set_allow_connect(false);
        gateway.drop_connection();
        tokio::time::sleep(Duration::from_millis(40)).await;
        token.cancel();
    });
    tokio::time::timeout(Duration::from_secs(2), scheduler.run())
        .await
        .expect("run did not stop during backoff")
        .unwrap();

    // One failed attempt, then parked in the backoff until cancelled.
    assert_eq!(h.gateway.connect_calls(), 2);
}

#[tokio::test]
async fn test_balance_drop_while_connected_reaches_ledger() {
    let h = Harness::new();
    let mut scheduler = h.scheduler(&["EURUSD"], 5);

    let gateway = h.gateway.clone();
    let token = h.token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        gateway.set_balance(dec!(94000));
        tokio::time::sleep(Duration::from_millis(40)).await;
        token.cancel();
    });
    scheduler.run().await.unwrap();

    // No reconnect happened, so the idle tick refresh is what synced it.
    assert_eq!(h.gateway.connect_calls(), 1);
    let status = scheduler.risk().status();
    assert_eq!(status.balance, dec!(94000));
    assert!(status.daily_loss_pct >= 5.99);
    assert_eq!(status.phase, ChallengePhase::Failed);
    let decision = scheduler
        .risk()
        .check_trade("GBPUSD", Direction::Long, 1.27, 1.265);
    assert!(!decision.allowed);
}

// ---------------------------------------------------------------------------
// Single pass
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_failing_instrument_does_not_abort_pass() {
    let h = Harness::new();
    h.gateway.break_symbol("XAUUSD");
    let mut scheduler = h.scheduler(&["XAUUSD", "EURUSD"], 5);

    let report = scheduler.scan_pass().await;
    assert_eq!(report.scanned, 2);
    assert_eq!(report.errors, 1);
    assert_eq!(report.executed, 1);
    assert_eq!(h.gateway.orders()[0].symbol, "EURUSD");
}

#[tokio::test]
async fn test_unavailable_symbol_skipped() {
    let h = Harness::new();
    h.gateway.mark_unavailable("GBPUSD");
    let mut scheduler = h.scheduler(&["GBPUSD", "EURUSD"], 5);

    let report = scheduler.scan_pass().await;
    assert_eq!(report.unavailable, 1);
    assert_eq!(report.executed, 1);
    assert_eq!(h.engine.confluence_calls(), 1);
}

#[tokio::test]
async fn test_insufficient_data_never_calls_engine() {
    let h = Harness::new();
    h.gateway.set_daily_bars(20);
    let mut scheduler = h.scheduler(&["EURUSD", "GBPUSD"], 5);

    let report = scheduler.scan_pass().await;
    assert_eq!(report.skipped, 2);
    assert_eq!(h.engine.confluence_calls(), 0);
    assert!(h.gateway.orders().is_empty());
}

#[tokio::test]
async fn test_watching_signal_not_traded() {
    let h = Harness::new();
    h.engine
        .set_flags(ConfluenceFlags::all().with(Pillar::Rr, false));
    let mut scheduler = h.scheduler(&["EURUSD"], 5);

    let report = scheduler.scan_pass().await;
    assert_eq!(report.active_signals, 0);
    assert_eq!(report.skipped, 1);
    assert!(h.gateway.orders().is_empty());
}

#[tokio::test]
async fn test_risk_denial_places_no_order() {
    let h = Harness::new();
    let mut scheduler = h.scheduler(&["EURUSD", "GBPUSD"], 1);

    let report = scheduler.scan_pass().await;
    assert_eq!(report.active_signals, 2);
    assert_eq!(report.executed, 1);
    assert_eq!(report.denied, 1);
    assert_eq!(h.gateway.orders().len(), 1);
    assert_eq!(scheduler.risk().open_positions().len(), 1);
}

#[tokio::test]
async fn test_rejected_order_not_recorded() {
    let h = Harness::new();
    h.gateway.set_reject_orders(true);
    let mut scheduler = h.scheduler(&["EURUSD"], 5);

    let report = scheduler.scan_pass().await;
    assert_eq!(report.failed, 1);
    assert_eq!(h.gateway.orders().len(), 1);
    assert!(scheduler.risk().open_positions().is_empty());
}

#[tokio::test]
async fn test_existing_position_blocks_entry() {
    let h = Harness::new();
    h.gateway.inject_position("EURUSD");
    let mut scheduler = h.scheduler(&["EURUSD"], 5);

    let report = scheduler.scan_pass().await;
    assert_eq!(report.skipped, 1);
    assert_eq!(h.engine.confluence_calls(), 0);
    assert!(h.gateway.orders().is_empty());
}

#[tokio::test]
async fn test_cancelled_pass_stops_between_instruments() {
    let h = Harness::new();
    h.token.cancel();
    let mut scheduler = h.scheduler(&["EURUSD", "GBPUSD"], 5);

    let report = scheduler.scan_pass().await;
    assert!(report.interrupted);
    assert_eq!(report.scanned, 0);
    assert!(h.gateway.orders().is_empty());
}
