//! Signal evaluator.
//!
//! Fetches multi-timeframe candles for one instrument, resolves the HTF bias,
//! asks the signal engine for confluence and turns the flags into a trade
//! status. Only `active` setups with usable levels come out as a
//! `TradeSetup`; everything else is a categorized skip.

use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::gateway::MarketDataPort;
use crate::signal::SignalEngine;
use crate::types::{
    Candle, CandleSet, Confluence, ConfluenceFlags, Pillar, Timeframe, TradeSetup, TradeStatus,
    Trend,
};

/// Minimum daily bars needed to evaluate an instrument.
pub const MIN_DAILY_CANDLES: usize = 30;
/// Minimum weekly bars needed to evaluate an instrument.
pub const MIN_WEEKLY_CANDLES: usize = 8;
/// Daily bars used in place of an empty H4 series.
const H4_FALLBACK_DAILY: usize = 20;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Why an instrument produced no setup this pass.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The gateway already holds a position on the instrument.
    InPosition,
    InsufficientData {
        timeframe: Timeframe,
        have: usize,
        need: usize,
    },
    /// Confluence did not reach `active`.
    Status {
        status: TradeStatus,
        score: u8,
        quality: u8,
    },
    /// Active signal with missing or degenerate levels.
    Malformed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InPosition => write!(f, "position already open"),
            SkipReason::InsufficientData { timeframe, have, need } => {
                write!(f, "insufficient {timeframe} data ({have} < {need})")
            }
            SkipReason::Status { status, score, quality } => {
                write!(f, "{status} (conf={score}/7, quality={quality})")
            }
            SkipReason::Malformed(msg) => write!(f, "malformed signal: {msg}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Evaluation {
    Setup(TradeSetup),
    Skipped(SkipReason),
}

// ---------------------------------------------------------------------------
// Status policy
// ---------------------------------------------------------------------------

/// Score, quality count and status for a set of flags.
///
/// `active` requires rr, score ≥ `min_confluence` and at least one quality
/// factor; `watching` only the score; everything else is `scan_only`.
pub fn classify(flags: &ConfluenceFlags, min_confluence: u8) -> (u8, u8, TradeStatus) {
    let score = flags.score();
    let quality = flags.quality_factors();
    let status = if flags.get(Pillar::Rr) && score >= min_confluence && quality >= 1 {
        TradeStatus::Active
    } else if score >= min_confluence {
        TradeStatus::Watching
    } else {
        TradeStatus::ScanOnly
    };
    (score, quality, status)
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

pub struct SignalEvaluator {
    market: Arc<dyn MarketDataPort>,
    engine: Arc<dyn SignalEngine>,
    min_confluence: u8,
    params: serde_json::Value,
}

impl SignalEvaluator {
    pub fn new(
        market: Arc<dyn MarketDataPort>,
        engine: Arc<dyn SignalEngine>,
        min_confluence: u8,
        params: serde_json::Value,
    ) -> Self {
        Self {
            market,
            engine,
            min_confluence,
            params,
        }
    }

    /// Evaluate one instrument.
    pub async fn evaluate(&self, symbol: &str) -> Result<Evaluation> {
        // Gateway list, not the ledger.
        let positions = self
            .market
            .get_positions()
            .await
            .context("Failed to fetch open positions")?;
        if positions.iter().any(|p| p.symbol == symbol) {
            info!(symbol, "Position already open, skipping");
            return Ok(Evaluation::Skipped(SkipReason::InPosition));
        }

        let mut candles = self.fetch_candles(symbol).await?;

        for (timeframe, have, need) in [
            (Timeframe::Daily, candles.daily.len(), MIN_DAILY_CANDLES),
            (Timeframe::Weekly, candles.weekly.len(), MIN_WEEKLY_CANDLES),
        ] {
            if have < need {
                info!(symbol, timeframe = %timeframe, have, need, "Insufficient data");
                return Ok(Evaluation::Skipped(SkipReason::InsufficientData {
                    timeframe,
                    have,
                    need,
                }));
            }
        }

        if candles.h4.is_empty() {
            let start = candles.daily.len().saturating_sub(H4_FALLBACK_DAILY);
            candles.h4 = candles.daily[start..].to_vec();
            debug!(symbol, bars = candles.h4.len(), "No H4 data, using recent daily bars");
        }

        let monthly = self.trend_or_mixed(&candles.monthly).await?;
        let weekly = self.trend_or_mixed(&candles.weekly).await?;
        let daily = self.trend_or_mixed(&candles.daily).await?;
        let direction = self
            .engine
            .bias_direction(monthly, weekly, daily)
            .await
            .context("Bias resolution failed")?;
        debug!(
            symbol,
            monthly = %monthly,
            weekly = %weekly,
            daily = %daily,
            direction = %direction,
            "HTF bias"
        );

        let confluence = self
            .engine
            .confluence(&candles, direction, &self.params)
            .await
            .with_context(|| format!("Confluence computation failed for {symbol}"))?;

        let (score, quality, status) = classify(&confluence.flags, self.min_confluence);
        log_scorecard(symbol, &confluence);
        info!(
            symbol,
            direction = %direction,
            score,
            quality,
            status = %status,
            "Confluence evaluated"
        );

        if status != TradeStatus::Active {
            return Ok(Evaluation::Skipped(SkipReason::Status {
                status,
                score,
                quality,
            }));
        }

        let Confluence { flags, notes, levels } = confluence;
        let (entry, stop_loss, take_profit) =
            match (levels.entry, levels.stop_loss, levels.targets[0]) {
                (Some(e), Some(s), Some(t)) => (e, s, t),
                _ => {
                    let msg = "missing entry, stop or first target".to_string();
                    warn!(symbol, ?levels, reason = %msg, "Discarding active signal");
                    return Ok(Evaluation::Skipped(SkipReason::Malformed(msg)));
                }
            };
        if (entry - stop_loss).abs() <= 0.0 {
            let msg = "zero risk distance".to_string();
            warn!(symbol, entry, stop_loss, reason = %msg, "Discarding active signal");
            return Ok(Evaluation::Skipped(SkipReason::Malformed(msg)));
        }

        Ok(Evaluation::Setup(TradeSetup {
            symbol: symbol.to_string(),
            direction,
            confluence_score: score,
            quality_factors: quality,
            entry,
            stop_loss,
            take_profit,
            later_targets: levels.targets[1..].iter().flatten().copied().collect(),
            flags,
            notes,
        }))
    }

    async fn fetch_candles(&self, symbol: &str) -> Result<CandleSet> {
        let mut set = CandleSet::default();
        for timeframe in Timeframe::ALL {
            let bars = self
                .market
                .get_ohlcv(symbol, timeframe, timeframe.default_count())
                .await
                .with_context(|| format!("Failed to fetch {timeframe} candles for {symbol}"))?;
            match timeframe {
                Timeframe::Monthly => set.monthly = bars,
                Timeframe::Weekly => set.weekly = bars,
                Timeframe::Daily => set.daily = bars,
                Timeframe::H4 => set.h4 = bars,
            }
        }
        Ok(set)
    }

    async fn trend_or_mixed(&self, candles: &[Candle]) -> Result<Trend> {
        if candles.is_empty() {
            return Ok(Trend::Mixed);
        }
        self.engine
            .trend(candles)
            .await
            .context("Trend classification failed")
    }
}

fn log_scorecard(symbol: &str, confluence: &Confluence) {
    for (pillar, value) in confluence.flags.iter() {
        debug!(
            symbol,
            pillar = %pillar,
            value,
            note = confluence.notes.get(pillar),
            "Pillar"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
