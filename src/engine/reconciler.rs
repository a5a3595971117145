//! Position reconciliation.
//!
//! Aligns the risk ledger's open positions with the gateway's live list:
//! positions the gateway no longer reports are closed locally (outcome
//! unknown), and gateway tickets the ledger never saw are adopted.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::gateway::MarketDataPort;
use crate::risk::RiskGate;
use crate::types::OpenPosition;

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationReport {
    /// Order ids closed in the ledger.
    pub closed: Vec<u64>,
    /// Gateway tickets added to the ledger.
    pub adopted: Vec<u64>,
}

impl ReconciliationReport {
    pub fn is_noop(&self) -> bool {
        self.closed.is_empty() && self.adopted.is_empty()
    }
}

pub struct PositionReconciler {
    market: Arc<dyn MarketDataPort>,
}

impl PositionReconciler {
    pub fn new(market: Arc<dyn MarketDataPort>) -> Self {
        Self { market }
    }

    /// Run one pass. A gateway error returns before the ledger is touched;
    /// a ledger write failure is logged and the pass continues.
    pub async fn reconcile(&self, risk: &mut dyn RiskGate) -> Result<ReconciliationReport> {
        let live = self
            .market
            .get_positions()
            .await
            .context("Failed to fetch gateway positions for reconciliation")?;
        let live_tickets: HashSet<u64> = live.iter().map(|p| p.ticket).collect();
        let local = risk.open_positions();
        let local_ids: HashSet<u64> = local.iter().map(|p| p.order_id).collect();

        let mut report = ReconciliationReport::default();

        for position in local.iter().filter(|p| !live_tickets.contains(&p.order_id)) {
            // Exit price and P&L are not recoverable from the open-ticket diff.
            match risk.record_close(position.order_id, None, None) {
                Ok(true) => {
                    info!(
                        order_id = position.order_id,
                        symbol = %position.symbol,
                        "Position closed on gateway, removed from ledger"
                    );
                    report.closed.push(position.order_id);
                }
                Ok(false) => {}
                Err(e) => error!(
                    order_id = position.order_id,
                    error = format!("{e:#}"),
                    "Failed to record close"
                ),
            }
        }

        for gp in live.iter().filter(|p| !local_ids.contains(&p.ticket)) {
            warn!(position = %gp, "Untracked gateway position, adopting");
            let adopted = risk.record_open(OpenPosition {
                order_id: gp.ticket,
                symbol: gp.symbol.clone(),
                direction: gp.direction,
                entry_price: gp.open_price,
                stop_loss: gp.stop_loss,
                size: gp.volume,
                opened_at: Utc::now(),
                adopted: true,
            });
            match adopted {
                Ok(()) => report.adopted.push(gp.ticket),
                Err(e) => error!(
                    ticket = gp.ticket,
                    error = format!("{e:#}"),
                    "Failed to adopt position"
                ),
            }
        }

        if report.is_noop() {
            debug!(open = live.len(), "Positions in sync");
        } else {
            info!(
                closed = report.closed.len(),
                adopted = report.adopted.len(),
                "Reconciliation applied"
            );
        }
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
