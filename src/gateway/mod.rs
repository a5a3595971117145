//! Gateway integrations.
//!
//! Defines the `MarketDataPort` and `ExecutionPort` traits and provides an
//! HTTP implementation of both against an MT5 bridge service:
//! - bridge: terminal connection, rates, positions, account, order placement

pub mod bridge;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{
    AccountInfo, Candle, ExecutionResult, GatewayPosition, OrderRequest, SymbolInfo, Timeframe,
};

/// Read side of the trading gateway.
///
/// Implementors must return an error (never an empty list) when the
/// gateway cannot be reached, so callers can tell "no positions" from
/// "unknown".
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataPort: Send + Sync {
    /// Fetch up to `count` bars, oldest first. May return fewer or none.
    async fn get_ohlcv(&self, symbol: &str, timeframe: Timeframe, count: usize)
        -> Result<Vec<Candle>>;

    /// Positions opened by this bot that are currently open.
    async fn get_positions(&self) -> Result<Vec<GatewayPosition>>;

    /// Current account snapshot.
    async fn get_account_info(&self) -> Result<AccountInfo>;

    /// Symbol details, or `None` when the broker does not offer the symbol.
    async fn get_symbol_info(&self, symbol: &str) -> Result<Option<SymbolInfo>>;
}

/// Write side of the trading gateway, plus connection lifecycle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionPort: Send + Sync {
    /// Place a market order with protective stop and take-profit.
    /// Broker rejections come back as `ExecutionResult::Rejected`; `Err` is
    /// reserved for transport failures.
    async fn place_order(&self, request: &OrderRequest) -> Result<ExecutionResult>;

    /// Connect (or reconnect) to the terminal. Returns true on success.
    async fn connect(&self) -> bool;

    async fn disconnect(&self);

    /// Last known liveness.
    fn is_connected(&self) -> bool;
}
