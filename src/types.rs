//! Shared types for the TRADR agent.
//!
//! These types form the data model used across all modules.
//! Gateway, signal, risk and engine modules depend on them without
//! depending on each other.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Direction & trend
// ---------------------------------------------------------------------------

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Higher-timeframe trend classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Mixed,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Bullish => write!(f, "bullish"),
            Trend::Bearish => write!(f, "bearish"),
            Trend::Mixed => write!(f, "mixed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Candles
// ---------------------------------------------------------------------------

/// Candle timeframes used by the multi-timeframe scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    Monthly,
    Weekly,
    Daily,
    H4,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [
        Timeframe::Monthly,
        Timeframe::Weekly,
        Timeframe::Daily,
        Timeframe::H4,
    ];

    /// Terminal code for this timeframe.
    pub fn code(&self) -> &'static str {
        match self {
            Timeframe::Monthly => "MN1",
            Timeframe::Weekly => "W1",
            Timeframe::Daily => "D1",
            Timeframe::H4 => "H4",
        }
    }

    /// Number of bars requested per scan (same depths the backtests use).
    pub fn default_count(&self) -> usize {
        match self {
            Timeframe::Monthly => 24,
            Timeframe::Weekly => 104,
            Timeframe::Daily => 500,
            Timeframe::H4 => 500,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One OHLC bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

/// Multi-timeframe candle bundle for one instrument.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandleSet {
    pub monthly: Vec<Candle>,
    pub weekly: Vec<Candle>,
    pub daily: Vec<Candle>,
    pub h4: Vec<Candle>,
}

// ---------------------------------------------------------------------------
// Confluence
// ---------------------------------------------------------------------------

/// The seven confluence pillars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pillar {
    Confirmation,
    Rr,
    Location,
    Fib,
    Liquidity,
    Structure,
    HtfBias,
}

impl Pillar {
    pub const ALL: [Pillar; 7] = [
        Pillar::Confirmation,
        Pillar::Rr,
        Pillar::Location,
        Pillar::Fib,
        Pillar::Liquidity,
        Pillar::Structure,
        Pillar::HtfBias,
    ];

    /// Pillars counted as quality factors. `confirmation` and `rr` are excluded.
    pub const QUALITY: [Pillar; 5] = [
        Pillar::Location,
        Pillar::Fib,
        Pillar::Liquidity,
        Pillar::Structure,
        Pillar::HtfBias,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Pillar::Confirmation => "confirmation",
            Pillar::Rr => "rr",
            Pillar::Location => "location",
            Pillar::Fib => "fib",
            Pillar::Liquidity => "liquidity",
            Pillar::Structure => "structure",
            Pillar::HtfBias => "htf_bias",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Pillar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Pillar {
    type Err = TradrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pillar::ALL
            .iter()
            .copied()
            .find(|p| p.name() == s)
            .ok_or_else(|| TradrError::InvalidConfluence(format!("unknown pillar: {s}")))
    }
}

/// Confluence flags with exactly one slot per pillar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfluenceFlags([bool; 7]);

impl ConfluenceFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// All seven pillars set.
    pub fn all() -> Self {
        Self([true; 7])
    }

    /// Build from the engine's name → bool map. Every pillar must be present
    /// and no unknown name may appear.
    pub fn from_map(map: &HashMap<String, bool>) -> Result<Self, TradrError> {
        let mut flags = [false; 7];
        let mut seen = [false; 7];
        for (name, &value) in map {
            let pillar: Pillar = name.parse()?;
            flags[pillar.index()] = value;
            seen[pillar.index()] = true;
        }
        let missing: Vec<&str> = Pillar::ALL
            .iter()
            .filter(|p| !seen[p.index()])
            .map(|p| p.name())
            .collect();
        if !missing.is_empty() {
            return Err(TradrError::InvalidConfluence(format!(
                "missing pillars: {}",
                missing.join(", ")
            )));
        }
        Ok(Self(flags))
    }

    pub fn with(mut self, pillar: Pillar, value: bool) -> Self {
        self.set(pillar, value);
        self
    }

    pub fn set(&mut self, pillar: Pillar, value: bool) {
        self.0[pillar.index()] = value;
    }

    pub fn get(&self, pillar: Pillar) -> bool {
        self.0[pillar.index()]
    }

    /// Number of true pillars (0–7).
    pub fn score(&self) -> u8 {
        self.0.iter().filter(|&&v| v).count() as u8
    }

    /// Number of true quality pillars (0–5).
    pub fn quality_factors(&self) -> u8 {
        Pillar::QUALITY.iter().filter(|p| self.get(**p)).count() as u8
    }

    pub fn iter(&self) -> impl Iterator<Item = (Pillar, bool)> + '_ {
        Pillar::ALL.iter().map(move |p| (*p, self.get(*p)))
    }
}

/// Human-readable note per pillar.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfluenceNotes([String; 7]);

impl ConfluenceNotes {
    /// Unknown names are ignored, missing notes stay empty.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let mut notes = Self::default();
        for (name, note) in map {
            if let Ok(pillar) = name.parse::<Pillar>() {
                notes.0[pillar.index()] = note.clone();
            }
        }
        notes
    }

    pub fn get(&self, pillar: Pillar) -> &str {
        &self.0[pillar.index()]
    }
}

/// Candidate levels computed by the signal engine.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TradeLevels {
    pub entry: Option<f64>,
    pub stop_loss: Option<f64>,
    pub targets: [Option<f64>; 5],
}

/// Everything the signal engine returns for one confluence computation.
#[derive(Debug, Clone, Default)]
pub struct Confluence {
    pub flags: ConfluenceFlags,
    pub notes: ConfluenceNotes,
    pub levels: TradeLevels,
}

/// Three-way status derived from the confluence flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Active,
    Watching,
    ScanOnly,
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeStatus::Active => write!(f, "active"),
            TradeStatus::Watching => write!(f, "watching"),
            TradeStatus::ScanOnly => write!(f, "scan_only"),
        }
    }
}

// ---------------------------------------------------------------------------
// Trade setup
// ---------------------------------------------------------------------------

/// An accepted, validated setup ready for the executor.
#[derive(Debug, Clone)]
pub struct TradeSetup {
    pub symbol: String,
    pub direction: Direction,
    pub confluence_score: u8,
    pub quality_factors: u8,
    pub entry: f64,
    pub stop_loss: f64,
    /// First target, used as the initial take-profit.
    pub take_profit: f64,
    /// TP2..TP5 that the engine provided, in order.
    pub later_targets: Vec<f64>,
    pub flags: ConfluenceFlags,
    pub notes: ConfluenceNotes,
}

impl fmt::Display for TradeSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} conf={}/7 quality={} entry={:.5} sl={:.5} tp1={:.5}",
            self.symbol,
            self.direction,
            self.confluence_score,
            self.quality_factors,
            self.entry,
            self.stop_loss,
            self.take_profit,
        )
    }
}

// ---------------------------------------------------------------------------
// Risk & execution
// ---------------------------------------------------------------------------

/// Outcome of the pre-trade risk check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub allowed: bool,
    pub reason: String,
    pub original_size: f64,
    pub adjusted_size: f64,
    /// Projected daily loss (% of account size) if every position hits its stop.
    pub daily_loss_after_pct: f64,
    /// Projected max drawdown (% of account size) if every position hits its stop.
    pub max_drawdown_after_pct: f64,
}

impl RiskDecision {
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            original_size: 0.0,
            adjusted_size: 0.0,
            daily_loss_after_pct: 0.0,
            max_drawdown_after_pct: 0.0,
        }
    }

    pub fn was_resized(&self) -> bool {
        (self.original_size - self.adjusted_size).abs() > f64::EPSILON
    }
}

/// Market order submitted to the execution port.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub comment: String,
}

/// Details of a filled order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub order_id: u64,
    pub deal_id: u64,
    pub price: f64,
    pub volume: f64,
}

/// Structured rejection from the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRejection {
    pub code: Option<i64>,
    pub message: String,
}

impl fmt::Display for OrderRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Result of an order placement.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    Filled(OrderFill),
    Rejected(OrderRejection),
}

impl OrderFill {
    /// False when the gateway accepted the order without reporting a price
    /// or volume (e.g. "placed" but not yet filled).
    pub fn is_priced(&self) -> bool {
        self.price > 0.0 && self.volume > 0.0
    }
}

// ---------------------------------------------------------------------------
// Positions & account
// ---------------------------------------------------------------------------

/// A position the risk ledger believes is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub order_id: u64,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub size: f64,
    pub opened_at: DateTime<Utc>,
    /// Discovered on the gateway by reconciliation rather than recorded by
    /// the executor.
    #[serde(default)]
    pub adopted: bool,
}

/// A position as the gateway reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPosition {
    pub ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    pub volume: f64,
    pub open_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl fmt::Display for GatewayPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} {:.2} @ {:.5}",
            self.ticket, self.symbol, self.direction, self.volume, self.open_price
        )
    }
}

/// Trading account snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub login: u64,
    pub server: String,
    pub balance: Decimal,
    pub equity: Decimal,
    pub leverage: u32,
}

/// Tradability information for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    pub digits: u32,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    #[serde(default = "default_true")]
    pub trade_allowed: bool,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Challenge status
// ---------------------------------------------------------------------------

/// Prop-firm challenge phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengePhase {
    Phase1,
    Phase2,
    Funded,
    Failed,
}

impl fmt::Display for ChallengePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengePhase::Phase1 => write!(f, "Phase 1"),
            ChallengePhase::Phase2 => write!(f, "Phase 2"),
            ChallengePhase::Funded => write!(f, "Funded"),
            ChallengePhase::Failed => write!(f, "FAILED"),
        }
    }
}

/// Snapshot of the risk ledger for scan summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeStatus {
    pub phase: ChallengePhase,
    pub balance: Decimal,
    pub profit_pct: f64,
    pub target_pct: f64,
    pub daily_loss_pct: f64,
    pub daily_loss_limit_pct: f64,
    pub drawdown_pct: f64,
    pub max_drawdown_limit_pct: f64,
    pub profitable_days: u32,
    pub min_profitable_days: u32,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for TRADR.
#[derive(Debug, thiserror::Error)]
pub enum TradrError {
    #[error("Gateway error ({operation}): {message}")]
    Gateway { operation: String, message: String },

    #[error("Gateway not connected")]
    Disconnected,

    #[error("Signal engine error: {0}")]
    SignalEngine(String),

    #[error("Invalid confluence: {0}")]
    InvalidConfluence(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
