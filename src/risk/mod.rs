//! Risk gate.
//!
//! Defines the `RiskGate` trait the executor and reconciler talk to, and
//! provides the file-backed challenge ledger implementation.

pub mod ledger;

use anyhow::Result;
use rust_decimal::Decimal;

use crate::types::{AccountInfo, ChallengeStatus, Direction, OpenPosition, RiskDecision};

/// Pre-trade risk check plus the ledger of positions it believes are open.
///
/// Only the scan loop's task mutates a gate, so `&mut self` is enough.
#[cfg_attr(test, mockall::automock)]
pub trait RiskGate: Send {
    /// Decide whether a trade may be opened and at what size.
    fn check_trade(
        &self,
        symbol: &str,
        direction: Direction,
        entry_price: f64,
        stop_loss: f64,
    ) -> RiskDecision;

    /// Record a newly opened position.
    fn record_open(&mut self, position: OpenPosition) -> Result<()>;

    /// Record a close. `None` exit/pnl means the outcome is unknown.
    /// Returns false if the order was not tracked.
    fn record_close(
        &mut self,
        order_id: u64,
        exit_price: Option<f64>,
        pnl: Option<Decimal>,
    ) -> Result<bool>;

    /// Positions the ledger believes are open.
    fn open_positions(&self) -> Vec<OpenPosition>;

    fn status(&self) -> ChallengeStatus;

    /// Refresh balances from the gateway's account snapshot.
    fn sync_account(&mut self, account: &AccountInfo) -> Result<()>;
}
