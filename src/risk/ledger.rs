//! Challenge ledger: file-backed risk gate.
//!
//! Tracks balance, daily start balance, profitable days and the positions
//! the bot believes are open, and answers pre-trade checks by simulating
//! the worst case: every open position plus the new one hits its stop.
//! A trade that would breach the daily-loss or max-drawdown limit is shrunk
//! to the remaining headroom, or blocked if nothing fits.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::RiskGate;
use crate::config::RiskConfig;
use crate::storage;
use crate::types::{
    AccountInfo, ChallengePhase, ChallengeStatus, Direction, OpenPosition, RiskDecision,
};

/// Float slack for limit comparisons.
const EPS: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Persisted state
// ---------------------------------------------------------------------------

/// A position removed from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub order_id: u64,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    /// `None` when the close was only inferred from the gateway.
    pub exit_price: Option<f64>,
    /// `None` when the close was only inferred from the gateway.
    pub pnl: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

/// Everything the ledger persists between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeState {
    pub phase: ChallengePhase,
    /// Account size the challenge started with; drawdown reference.
    pub starting_balance: Decimal,
    pub balance: Decimal,
    pub equity: Decimal,
    pub day: NaiveDate,
    pub day_start_balance: Decimal,
    pub profitable_days: u32,
    pub open_positions: Vec<OpenPosition>,
    pub closed_trades: Vec<ClosedTrade>,
    pub updated_at: DateTime<Utc>,
}

impl ChallengeState {
    pub fn new(account_size: Decimal, phase: ChallengePhase, now: DateTime<Utc>) -> Self {
        Self {
            phase,
            starting_balance: account_size,
            balance: account_size,
            equity: account_size,
            day: now.date_naive(),
            day_start_balance: account_size,
            profitable_days: 0,
            open_positions: Vec::new(),
            closed_trades: Vec::new(),
            updated_at: now,
        }
    }

    fn is_open(&self, order_id: u64) -> bool {
        self.open_positions.iter().any(|p| p.order_id == order_id)
    }
}

fn to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

pub struct ChallengeLedger {
    config: RiskConfig,
    state: ChallengeState,
    /// `None` keeps the ledger in memory only.
    path: Option<String>,
}

impl ChallengeLedger {
    /// Open the ledger at `config.state_file`, resuming saved state if present.
    pub fn open(config: RiskConfig) -> Result<Self> {
        let path = config.state_file.clone();
        let state = match storage::load_state(Some(&path))? {
            Some(s) => {
                info!(
                    phase = %s.phase,
                    balance = %s.balance,
                    open_positions = s.open_positions.len(),
                    "Resumed challenge state"
                );
                s
            }
            None => ChallengeState::new(config.account_size, config.phase, Utc::now()),
        };
        Ok(Self {
            config,
            state,
            path: Some(path),
        })
    }

    /// Ledger that never touches disk.
    pub fn in_memory(config: RiskConfig) -> Self {
        let state = ChallengeState::new(config.account_size, config.phase, Utc::now());
        Self {
            config,
            state,
            path: None,
        }
    }

    pub fn state(&self) -> &ChallengeState {
        &self.state
    }

    fn persist(&mut self) -> Result<()> {
        self.state.updated_at = Utc::now();
        match &self.path {
            Some(path) => storage::save_state(&self.state, Some(path)),
            None => Ok(()),
        }
    }

    fn contract_size(&self, symbol: &str) -> f64 {
        self.config
            .contract_sizes
            .get(symbol)
            .copied()
            .unwrap_or(self.config.default_contract_size)
    }

    fn round_lot(&self, lots: f64) -> f64 {
        let step = self.config.lot_step;
        if lots <= 0.0 || !lots.is_finite() {
            return 0.0;
        }
        let steps = (lots / step + EPS).floor();
        (steps * step * 1e8).round() / 1e8
    }

    /// Loss in account currency if `position` hits its stop. Positions
    /// without a stop count as one full per-trade risk unit.
    fn worst_case_loss(&self, position: &OpenPosition) -> f64 {
        if position.stop_loss > 0.0 {
            position.size * (position.entry_price - position.stop_loss).abs()
                * self.contract_size(&position.symbol)
        } else {
            to_f64(self.state.balance) * self.config.risk_per_trade_pct / 100.0
        }
    }

    fn open_risk(&self) -> f64 {
        self.state
            .open_positions
            .iter()
            .map(|p| self.worst_case_loss(p))
            .sum()
    }

    /// Start a new trading day if `today` differs from the ledger's day.
    pub(crate) fn roll_day(&mut self, today: NaiveDate) {
        if today == self.state.day {
            return;
        }
        if self.state.balance > self.state.day_start_balance {
            self.state.profitable_days += 1;
            info!(
                day = %self.state.day,
                profitable_days = self.state.profitable_days,
                "Profitable day recorded"
            );
        }
        self.state.day = today;
        self.state.day_start_balance = self.state.balance;
    }

    fn daily_loss_pct(&self) -> f64 {
        let low = self.state.balance.min(self.state.equity);
        let loss = (self.state.day_start_balance - low).max(Decimal::ZERO);
        to_f64(loss) / to_f64(self.state.starting_balance) * 100.0
    }

    fn drawdown_pct(&self) -> f64 {
        let low = self.state.balance.min(self.state.equity);
        let loss = (self.state.starting_balance - low).max(Decimal::ZERO);
        to_f64(loss) / to_f64(self.state.starting_balance) * 100.0
    }
}

impl RiskGate for ChallengeLedger {
    fn check_trade(
        &self,
        symbol: &str,
        direction: Direction,
        entry_price: f64,
        stop_loss: f64,
    ) -> RiskDecision {
        if self.state.phase == ChallengePhase::Failed {
            return RiskDecision::denied("challenge failed, trading halted");
        }
        if self.state.open_positions.len() >= self.config.max_open_positions {
            return RiskDecision::denied(format!(
                "max open positions ({}) reached",
                self.config.max_open_positions
            ));
        }
        if self.state.open_positions.iter().any(|p| p.symbol == symbol) {
            return RiskDecision::denied(format!("position already open on {symbol}"));
        }
        let stop_distance = (entry_price - stop_loss).abs();
        if !stop_distance.is_finite() || stop_distance <= 0.0 {
            return RiskDecision::denied("invalid stop distance");
        }

        let account_size = to_f64(self.state.starting_balance);
        let balance = to_f64(self.state.balance);
        let day_start = to_f64(self.state.day_start_balance);
        let loss_per_lot = stop_distance * self.contract_size(symbol);

        let risk_budget = balance * self.config.risk_per_trade_pct / 100.0;
        let original_size = self.round_lot(risk_budget / loss_per_lot).max(self.config.min_lot);

        // Balance left if every open position is stopped out.
        let floor_balance = balance - self.open_risk();
        let daily_limit = account_size * self.config.max_daily_loss_pct / 100.0;
        let max_limit = account_size * self.config.max_drawdown_pct / 100.0;
        let daily_headroom = daily_limit - (day_start - floor_balance);
        let max_headroom = max_limit - (account_size - floor_balance);

        let projected = |size: f64| -> (f64, f64) {
            let after = floor_balance - size * loss_per_lot;
            (
                (day_start - after).max(0.0) / account_size * 100.0,
                (account_size - after).max(0.0) / account_size * 100.0,
            )
        };

        let new_risk = original_size * loss_per_lot;
        if new_risk <= daily_headroom + EPS && new_risk <= max_headroom + EPS {
            let (daily_after, max_after) = projected(original_size);
            debug!(
                symbol,
                direction = %direction,
                size = original_size,
                daily_after = format!("{daily_after:.2}%"),
                max_after = format!("{max_after:.2}%"),
                "Trade within limits"
            );
            return RiskDecision {
                allowed: true,
                reason: "within limits".to_string(),
                original_size,
                adjusted_size: original_size,
                daily_loss_after_pct: daily_after,
                max_drawdown_after_pct: max_after,
            };
        }

        let (binding, headroom) = if daily_headroom <= max_headroom {
            ("daily DD", daily_headroom)
        } else {
            ("max DD", max_headroom)
        };
        let adjusted_size = self.round_lot(headroom / loss_per_lot);

        if adjusted_size < self.config.min_lot - EPS {
            let (daily_after, max_after) = projected(original_size);
            return RiskDecision {
                allowed: false,
                reason: format!("{binding} breach"),
                original_size,
                adjusted_size: 0.0,
                daily_loss_after_pct: daily_after,
                max_drawdown_after_pct: max_after,
            };
        }

        let (daily_after, max_after) = projected(adjusted_size);
        RiskDecision {
            allowed: true,
            reason: format!("size reduced to fit {binding} headroom"),
            original_size,
            adjusted_size,
            daily_loss_after_pct: daily_after,
            max_drawdown_after_pct: max_after,
        }
    }

    fn record_open(&mut self, position: OpenPosition) -> Result<()> {
        if self.state.is_open(position.order_id) {
            debug!(order_id = position.order_id, "Position already tracked");
            return Ok(());
        }
        self.roll_day(Utc::now().date_naive());
        info!(
            order_id = position.order_id,
            symbol = %position.symbol,
            direction = %position.direction,
            entry = position.entry_price,
            size = position.size,
            adopted = position.adopted,
            "Position recorded"
        );
        self.state.open_positions.push(position);
        self.persist()
    }

    fn record_close(
        &mut self,
        order_id: u64,
        exit_price: Option<f64>,
        pnl: Option<Decimal>,
    ) -> Result<bool> {
        let Some(idx) = self
            .state
            .open_positions
            .iter()
            .position(|p| p.order_id == order_id)
        else {
            return Ok(false);
        };

        self.roll_day(Utc::now().date_naive());
        let position = self.state.open_positions.remove(idx);
        if let Some(pnl) = pnl {
            self.state.balance += pnl;
        }
        info!(
            order_id,
            symbol = %position.symbol,
            exit = ?exit_price,
            pnl = ?pnl,
            "Position closed"
        );
        self.state.closed_trades.push(ClosedTrade {
            order_id,
            symbol: position.symbol,
            direction: position.direction,
            entry_price: position.entry_price,
            exit_price,
            pnl,
            opened_at: position.opened_at,
            closed_at: Utc::now(),
        });
        self.persist()?;
        Ok(true)
    }

    fn open_positions(&self) -> Vec<OpenPosition> {
        self.state.open_positions.clone()
    }

    fn status(&self) -> ChallengeStatus {
        let starting = to_f64(self.state.starting_balance);
        let profit_pct = (to_f64(self.state.balance) - starting) / starting * 100.0;
        ChallengeStatus {
            phase: self.state.phase,
            balance: self.state.balance,
            profit_pct,
            target_pct: self.config.profit_target_pct,
            daily_loss_pct: self.daily_loss_pct(),
            daily_loss_limit_pct: self.config.max_daily_loss_pct,
            drawdown_pct: self.drawdown_pct(),
            max_drawdown_limit_pct: self.config.max_drawdown_pct,
            profitable_days: self.state.profitable_days,
            min_profitable_days: self.config.min_profitable_days,
        }
    }

    fn sync_account(&mut self, account: &AccountInfo) -> Result<()> {
        self.roll_day(Utc::now().date_naive());
        self.state.balance = account.balance;
        self.state.equity = account.equity;

        if self.state.phase != ChallengePhase::Failed {
            let daily = self.daily_loss_pct();
            let drawdown = self.drawdown_pct();
            if daily >= self.config.max_daily_loss_pct || drawdown >= self.config.max_drawdown_pct {
                warn!(
                    daily_loss = format!("{daily:.2}%"),
                    drawdown = format!("{drawdown:.2}%"),
                    "Drawdown limit breached, challenge failed"
                );
                self.state.phase = ChallengePhase::Failed;
            }
        }
        self.persist()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
