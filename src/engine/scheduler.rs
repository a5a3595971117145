//! Scan scheduler, the top-level loop.
//!
//! `starting → scanning → idle-wait → scanning → … → stopping → stopped`.
//! One immediate pass at startup, then an idle tick that checks the
//! connection, reconciles positions, refreshes the account snapshot and
//! starts the next pass once the scan interval has elapsed. A failed
//! reconnect waits the backoff interval before the next attempt. Everything runs on one task; shutdown is a
//! `CancellationToken` checked at the tick and between instruments.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::evaluator::{Evaluation, SignalEvaluator, SkipReason};
use super::executor::{ExecutionOutcome, TradeExecutor};
use super::reconciler::PositionReconciler;
use super::supervisor::ConnectionSupervisor;
use crate::config::ScanConfig;
use crate::gateway::{ExecutionPort, MarketDataPort};
use crate::risk::RiskGate;
use crate::signal::SignalEngine;
use crate::types::ChallengeStatus;

// ---------------------------------------------------------------------------
// Loop state
// ---------------------------------------------------------------------------

/// Process-local loop bookkeeping. Only the scheduler writes it.
#[derive(Debug, Clone, Default)]
pub struct LoopState {
    pub running: bool,
    pub last_scan: Option<DateTime<Utc>>,
    pub scan_count: u64,
    pub connected: bool,
}

impl LoopState {
    /// True once `interval` has passed since the last completed scan.
    pub fn scan_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        match self.last_scan {
            None => true,
            Some(last) => (now - last)
                .to_std()
                .map(|elapsed| elapsed >= interval)
                .unwrap_or(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes & reporting
// ---------------------------------------------------------------------------

/// Categorized result of scanning one instrument.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentOutcome {
    /// The broker does not offer the symbol or trading is disabled.
    Unavailable,
    Skipped(SkipReason),
    Executed { order_id: u64, fill_price: f64, size: f64 },
    Denied(String),
    Failed(String),
}

impl InstrumentOutcome {
    /// An `active` setup reached the executor.
    pub fn is_signal(&self) -> bool {
        matches!(
            self,
            InstrumentOutcome::Executed { .. }
                | InstrumentOutcome::Denied(_)
                | InstrumentOutcome::Failed(_)
        )
    }
}

impl From<ExecutionOutcome> for InstrumentOutcome {
    fn from(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Opened {
                order_id,
                fill_price,
                size,
            } => InstrumentOutcome::Executed {
                order_id,
                fill_price,
                size,
            },
            ExecutionOutcome::Denied { reason } => InstrumentOutcome::Denied(reason),
            ExecutionOutcome::Failed { reason } => InstrumentOutcome::Failed(reason),
        }
    }
}

/// Aggregate of one scan pass.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub scan_number: u64,
    pub scanned: usize,
    pub unavailable: usize,
    pub skipped: usize,
    pub active_signals: usize,
    pub executed: usize,
    pub denied: usize,
    pub failed: usize,
    /// Instruments whose evaluation returned an error.
    pub errors: usize,
    pub open_positions: usize,
    /// Set when the pass ended early on shutdown.
    pub interrupted: bool,
    pub status: Option<ChallengeStatus>,
}

impl ScanReport {
    fn new(scan_number: u64) -> Self {
        Self {
            scan_number,
            ..Default::default()
        }
    }

    fn record(&mut self, outcome: &Result<InstrumentOutcome>) {
        self.scanned += 1;
        let outcome = match outcome {
            Ok(o) => o,
            Err(_) => {
                self.errors += 1;
                return;
            }
        };
        if outcome.is_signal() {
            self.active_signals += 1;
        }
        match outcome {
            InstrumentOutcome::Unavailable => self.unavailable += 1,
            InstrumentOutcome::Skipped(_) => self.skipped += 1,
            InstrumentOutcome::Executed { .. } => self.executed += 1,
            InstrumentOutcome::Denied(_) => self.denied += 1,
            InstrumentOutcome::Failed(_) => self.failed += 1,
        }
    }
}

fn log_scan_report(report: &ScanReport) {
    info!(
        scan = report.scan_number,
        scanned = report.scanned,
        signals = report.active_signals,
        executed = report.executed,
        denied = report.denied,
        failed = report.failed,
        errors = report.errors,
        unavailable = report.unavailable,
        open_positions = report.open_positions,
        interrupted = report.interrupted,
        "Scan complete"
    );
    if let Some(s) = &report.status {
        info!(
            phase = %s.phase,
            balance = format!("${:.2}", s.balance),
            profit = format!("{:+.2}% (target {}%)", s.profit_pct, s.target_pct),
            daily_dd = format!("{:.2}%/{}%", s.daily_loss_pct, s.daily_loss_limit_pct),
            max_dd = format!("{:.2}%/{}%", s.drawdown_pct, s.max_drawdown_limit_pct),
            profitable_days = format!("{}/{}", s.profitable_days, s.min_profitable_days),
            "Challenge status"
        );
    }
}

/// Sleep for `duration` unless `token` is cancelled first.
/// Returns false when interrupted.
pub async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct ScanScheduler {
    config: ScanConfig,
    market: Arc<dyn MarketDataPort>,
    broker: Arc<dyn ExecutionPort>,
    evaluator: SignalEvaluator,
    executor: TradeExecutor,
    reconciler: PositionReconciler,
    supervisor: ConnectionSupervisor,
    risk: Box<dyn RiskGate>,
    shutdown: CancellationToken,
    state: LoopState,
}

impl ScanScheduler {
    pub fn new(
        config: ScanConfig,
        market: Arc<dyn MarketDataPort>,
        broker: Arc<dyn ExecutionPort>,
        engine: Arc<dyn SignalEngine>,
        risk: Box<dyn RiskGate>,
        shutdown: CancellationToken,
    ) -> Self {
        let evaluator = SignalEvaluator::new(
            market.clone(),
            engine,
            config.min_confluence,
            config.strategy_params.clone(),
        );
        Self {
            executor: TradeExecutor::new(config.order_comment.clone()),
            reconciler: PositionReconciler::new(market.clone()),
            supervisor: ConnectionSupervisor::new(broker.clone(), market.clone()),
            evaluator,
            config,
            market,
            broker,
            risk,
            shutdown,
            state: LoopState::default(),
        }
    }

    pub fn loop_state(&self) -> &LoopState {
        &self.state
    }

    pub fn risk(&self) -> &dyn RiskGate {
        self.risk.as_ref()
    }

    /// Run until the shutdown token is cancelled. Only a failed startup
    /// connection is returned as an error.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            symbols = self.config.symbols.len(),
            interval_hours = self.config.scan_interval.as_secs() / 3600,
            mode = %self.config.signal_mode,
            min_confluence = format!("{}/7", self.config.min_confluence),
            "Starting trading loop"
        );
        self.state.running = true;

        if let Err(e) = self.supervisor.connect_initial(self.risk.as_mut()).await {
            self.state.running = false;
            return Err(e).context("Startup connection failed");
        }
        self.state.connected = true;

        self.scan_pass().await;

        let mut wait = self.config.idle_tick;
        while !self.shutdown.is_cancelled() {
            if !sleep_or_cancel(&self.shutdown, wait).await {
                break;
            }
            wait = if self.idle_tick().await {
                self.config.idle_tick
            } else {
                self.config.reconnect_backoff
            };
        }

        info!("Shutting down");
        self.supervisor.disconnect().await;
        self.state.connected = false;
        self.state.running = false;
        info!(scans = self.state.scan_count, "Trading loop stopped");
        Ok(())
    }

    /// One idle-wait tick: connectivity, reconciliation, account refresh,
    /// scan if due. Returns false when the gateway could not be reached, in
    /// which case the next tick waits the reconnect backoff instead.
    async fn idle_tick(&mut self) -> bool {
        if !self.supervisor.ensure_connected(self.risk.as_mut()).await {
            self.state.connected = false;
            warn!(
                backoff_secs = self.config.reconnect_backoff.as_secs(),
                "Reconnect failed, backing off"
            );
            return false;
        }
        self.state.connected = true;

        if let Err(e) = self.reconciler.reconcile(self.risk.as_mut()).await {
            error!(error = %e, "Reconciliation failed");
        }
        if let Err(e) = self.supervisor.refresh_account(self.risk.as_mut()).await {
            warn!(error = format!("{e:#}"), "Account refresh failed");
        }

        if self.state.scan_due(Utc::now(), self.config.scan_interval) {
            self.scan_pass().await;
        }
        true
    }

    /// One pass over every instrument.
    pub async fn scan_pass(&mut self) -> ScanReport {
        self.state.scan_count += 1;
        let mut report = ScanReport::new(self.state.scan_count);
        info!(
            scan = self.state.scan_count,
            instruments = self.config.symbols.len(),
            "Starting scan"
        );

        let symbols = self.config.symbols.clone();
        for (i, symbol) in symbols.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                report.interrupted = true;
                break;
            }
            if i > 0 && !sleep_or_cancel(&self.shutdown, self.config.pacing).await {
                report.interrupted = true;
                break;
            }

            let outcome = self.scan_instrument(symbol).await;
            match &outcome {
                Ok(InstrumentOutcome::Skipped(reason)) => {
                    info!(symbol = %symbol, reason = %reason, "No trade")
                }
                Ok(_) => {}
                Err(e) => error!(symbol = %symbol, error = format!("{e:#}"), "Instrument scan failed"),
            }
            report.record(&outcome);
        }

        report.open_positions = match self.market.get_positions().await {
            Ok(positions) => positions.len(),
            Err(_) => self.risk.open_positions().len(),
        };
        report.status = Some(self.risk.status());
        log_scan_report(&report);

        self.state.last_scan = Some(Utc::now());
        report
    }

    async fn scan_instrument(&mut self, symbol: &str) -> Result<InstrumentOutcome> {
        match self.market.get_symbol_info(symbol).await? {
            Some(info) if info.trade_allowed => {}
            Some(_) => {
                warn!(symbol, "Trading disabled for symbol");
                return Ok(InstrumentOutcome::Unavailable);
            }
            None => {
                warn!(symbol, "Symbol not available on this broker");
                return Ok(InstrumentOutcome::Unavailable);
            }
        }

        match self.evaluator.evaluate(symbol).await? {
            Evaluation::Skipped(reason) => Ok(InstrumentOutcome::Skipped(reason)),
            Evaluation::Setup(setup) => {
                info!(setup = %setup, "Active signal");
                let outcome = self
                    .executor
                    .execute(&setup, self.risk.as_mut(), self.broker.as_ref())
                    .await?;
                Ok(outcome.into())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
