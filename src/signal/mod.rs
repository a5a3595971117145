//! Signal engine integration.
//!
//! Defines the `SignalEngine` trait: trend classification, bias resolution
//! and confluence computation. The evaluator only consumes its outputs.

pub mod remote;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Candle, CandleSet, Confluence, Direction, Trend};

/// Abstraction over the indicator/confluence engine.
///
/// Implementations validate the pillar map at this boundary so callers
/// always receive a complete `ConfluenceFlags`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalEngine: Send + Sync {
    /// Classify the trend of one candle series.
    async fn trend(&self, candles: &[Candle]) -> Result<Trend>;

    /// Resolve monthly/weekly/daily trends into a trade direction.
    async fn bias_direction(
        &self,
        monthly: Trend,
        weekly: Trend,
        daily: Trend,
    ) -> Result<Direction>;

    /// Compute confluence flags, notes and candidate levels for `direction`.
    async fn confluence(
        &self,
        candles: &CandleSet,
        direction: Direction,
        params: &serde_json::Value,
    ) -> Result<Confluence>;
}
