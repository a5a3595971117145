//! Trade executor.
//!
//! Runs risk gate → place order → record for one accepted setup. The two
//! external writes are not atomic: if recording fails after a fill, the
//! reconciler adopts the position from the gateway on its next pass.

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::gateway::ExecutionPort;
use crate::risk::RiskGate;
use crate::types::{ExecutionResult, OpenPosition, OrderRequest, TradeSetup};

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

/// What happened to one setup.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Opened {
        order_id: u64,
        fill_price: f64,
        size: f64,
    },
    /// The risk gate blocked the trade; nothing was sent.
    Denied { reason: String },
    /// The gateway rejected the order; nothing was recorded.
    Failed { reason: String },
}

impl ExecutionOutcome {
    pub fn is_opened(&self) -> bool {
        matches!(self, ExecutionOutcome::Opened { .. })
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct TradeExecutor {
    comment: String,
}

impl TradeExecutor {
    /// `comment` is attached to every order (the agent name).
    pub fn new(comment: impl Into<String>) -> Self {
        Self {
            comment: comment.into(),
        }
    }

    /// Execute one setup. `Err` only for transport failures at the gateway.
    pub async fn execute(
        &self,
        setup: &TradeSetup,
        risk: &mut dyn RiskGate,
        broker: &dyn ExecutionPort,
    ) -> Result<ExecutionOutcome> {
        let decision =
            risk.check_trade(&setup.symbol, setup.direction, setup.entry, setup.stop_loss);
        if !decision.allowed {
            warn!(
                symbol = %setup.symbol,
                direction = %setup.direction,
                reason = %decision.reason,
                "Trade blocked by risk gate"
            );
            return Ok(ExecutionOutcome::Denied {
                reason: decision.reason,
            });
        }
        if decision.was_resized() {
            info!(
                symbol = %setup.symbol,
                from = decision.original_size,
                to = decision.adjusted_size,
                reason = %decision.reason,
                "Position size reduced"
            );
        }

        let request = OrderRequest {
            symbol: setup.symbol.clone(),
            direction: setup.direction,
            volume: decision.adjusted_size,
            stop_loss: setup.stop_loss,
            take_profit: setup.take_profit,
            comment: self.comment.clone(),
        };
        info!(
            symbol = %request.symbol,
            direction = %request.direction,
            volume = request.volume,
            sl = request.stop_loss,
            tp = request.take_profit,
            daily_after = format!("{:.2}%", decision.daily_loss_after_pct),
            max_after = format!("{:.2}%", decision.max_drawdown_after_pct),
            "Placing order"
        );

        let mut fill = match broker.place_order(&request).await? {
            ExecutionResult::Filled(fill) => fill,
            ExecutionResult::Rejected(rejection) => {
                error!(
                    symbol = %setup.symbol,
                    code = ?rejection.code,
                    error = %rejection.message,
                    "Order rejected"
                );
                return Ok(ExecutionOutcome::Failed {
                    reason: rejection.to_string(),
                });
            }
        };

        if !fill.is_priced() {
            warn!(
                symbol = %setup.symbol,
                order_id = fill.order_id,
                price = fill.price,
                volume = fill.volume,
                "Order accepted without fill details, recording requested entry and size"
            );
            if fill.price <= 0.0 {
                fill.price = setup.entry;
            }
            if fill.volume <= 0.0 {
                fill.volume = decision.adjusted_size;
            }
        }

        let slippage = fill.price - setup.entry;
        info!(
            symbol = %setup.symbol,
            order_id = fill.order_id,
            deal_id = fill.deal_id,
            fill = fill.price,
            volume = fill.volume,
            slippage = format!("{slippage:+.5}"),
            "Order filled"
        );

        // Fill price, not the computed entry, so slippage shows up in later
        // risk simulations.
        let position = OpenPosition {
            order_id: fill.order_id,
            symbol: setup.symbol.clone(),
            direction: setup.direction,
            entry_price: fill.price,
            stop_loss: setup.stop_loss,
            size: fill.volume,
            opened_at: Utc::now(),
            adopted: false,
        };
        if let Err(e) = risk.record_open(position) {
            error!(
                order_id = fill.order_id,
                error = %e,
                "Filled but failed to record position; reconciliation will adopt it"
            );
        }

        Ok(ExecutionOutcome::Opened {
            order_id: fill.order_id,
            fill_price: fill.price,
            size: fill.volume,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
