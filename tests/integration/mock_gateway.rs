//! Mock gateway and signal engine for integration testing.
//!
//! Provides deterministic `MarketDataPort` + `ExecutionPort` and
//! `SignalEngine` implementations: candles, positions and orders are all
//! in-memory and controllable from test code.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use tradr::gateway::{ExecutionPort, MarketDataPort};
use tradr::signal::SignalEngine;
use tradr::types::*;

/// Entry-to-stop distance used by the scripted engine.
pub const STOP_DISTANCE: f64 = 0.005;
/// Entry-to-TP1 distance used by the scripted engine.
pub const TARGET_DISTANCE: f64 = 0.010;

/// Reference price for a symbol; every bar closes here.
pub fn base_price(symbol: &str) -> f64 {
    match symbol {
        "EURUSD" => 1.10000,
        "GBPUSD" => 1.27000,
        "AUDUSD" => 0.66000,
        _ => 1.00000,
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// In-memory trading gateway.
pub struct MockGateway {
    connected: AtomicBool,
    allow_connect: AtomicBool,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    next_ticket: AtomicU64,
    /// Added to the base price on every fill.
    slippage: Mutex<f64>,
    daily_bars: AtomicUsize,
    unavailable: Mutex<HashSet<String>>,
    /// Symbols whose candle requests fail.
    broken: Mutex<HashSet<String>>,
    reject_orders: AtomicBool,
    /// Reported as both balance and equity.
    balance: Mutex<Decimal>,
    positions: Mutex<Vec<GatewayPosition>>,
    orders: Mutex<Vec<OrderRequest>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            allow_connect: AtomicBool::new(true),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            next_ticket: AtomicU64::new(1000),
            slippage: Mutex::new(0.0),
            daily_bars: AtomicUsize::new(60),
            unavailable: Mutex::new(HashSet::new()),
            broken: Mutex::new(HashSet::new()),
            reject_orders: AtomicBool::new(false),
            balance: Mutex::new(dec!(100000)),
            positions: Mutex::new(Vec::new()),
            orders: Mutex::new(Vec::new()),
        }
    }

    pub fn set_allow_connect(&self, allow: bool) {
        self.allow_connect.store(allow, Ordering::SeqCst);
    }

    /// Simulate the terminal dropping the link.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn set_slippage(&self, slippage: f64) {
        *self.slippage.lock().unwrap() = slippage;
    }

    pub fn set_daily_bars(&self, n: usize) {
        self.daily_bars.store(n, Ordering::SeqCst);
    }

    pub fn mark_unavailable(&self, symbol: &str) {
        self.unavailable.lock().unwrap().insert(symbol.to_string());
    }

    pub fn break_symbol(&self, symbol: &str) {
        self.broken.lock().unwrap().insert(symbol.to_string());
    }

    pub fn set_reject_orders(&self, reject: bool) {
        self.reject_orders.store(reject, Ordering::SeqCst);
    }

    /// Move the account balance, e.g. after a losing close.
    pub fn set_balance(&self, balance: Decimal) {
        *self.balance.lock().unwrap() = balance;
    }

    /// Close a position as if its stop or target was hit.
    pub fn close_position(&self, ticket: u64) {
        self.positions.lock().unwrap().retain(|p| p.ticket != ticket);
    }

    /// Open a position the bot never placed.
    pub fn inject_position(&self, symbol: &str) -> u64 {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let price = base_price(symbol);
        self.positions.lock().unwrap().push(GatewayPosition {
            ticket,
            symbol: symbol.to_string(),
            direction: Direction::Long,
            volume: 0.10,
            open_price: price,
            stop_loss: price - STOP_DISTANCE,
            take_profit: price + TARGET_DISTANCE,
        });
        ticket
    }

    pub fn positions(&self) -> Vec<GatewayPosition> {
        self.positions.lock().unwrap().clone()
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    fn bars(&self, symbol: &str, timeframe: Timeframe) -> Vec<Candle> {
        let (n, step) = match timeframe {
            Timeframe::Monthly => (12, Duration::days(30)),
            Timeframe::Weekly => (20, Duration::weeks(1)),
            Timeframe::Daily => (self.daily_bars.load(Ordering::SeqCst), Duration::days(1)),
            Timeframe::H4 => (100, Duration::hours(4)),
        };
        let price = base_price(symbol);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| Candle {
                time: start + step * i as i32,
                open: price,
                high: price + 0.001,
                low: price - 0.001,
                close: price,
                volume: 100.0,
            })
            .collect()
    }
}

#[async_trait]
impl MarketDataPort for MockGateway {
    async fn get_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>> {
        if self.broken.lock().unwrap().contains(symbol) {
            return Err(anyhow!("rates unavailable for {symbol}"));
        }
        let mut bars = self.bars(symbol, timeframe);
        bars.truncate(count);
        Ok(bars)
    }

    async fn get_positions(&self) -> Result<Vec<GatewayPosition>> {
        Ok(self.positions())
    }

    async fn get_account_info(&self) -> Result<AccountInfo> {
        let balance = *self.balance.lock().unwrap();
        Ok(AccountInfo {
            login: 5012345,
            server: "Mock-Demo".to_string(),
            balance,
            equity: balance,
            leverage: 100,
        })
    }

    async fn get_symbol_info(&self, symbol: &str) -> Result<Option<SymbolInfo>> {
        if self.unavailable.lock().unwrap().contains(symbol) {
            return Ok(None);
        }
        Ok(Some(SymbolInfo {
            name: symbol.to_string(),
            digits: 5,
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
            trade_allowed: true,
        }))
    }
}

#[async_trait]
impl ExecutionPort for MockGateway {
    async fn place_order(&self, request: &OrderRequest) -> Result<ExecutionResult> {
        self.orders.lock().unwrap().push(request.clone());
        if self.reject_orders.load(Ordering::SeqCst) {
            return Ok(ExecutionResult::Rejected(OrderRejection {
                code: Some(10019),
                message: "No money".to_string(),
            }));
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let price = base_price(&request.symbol) + *self.slippage.lock().unwrap();
        self.positions.lock().unwrap().push(GatewayPosition {
            ticket,
            symbol: request.symbol.clone(),
            direction: request.direction,
            volume: request.volume,
            open_price: price,
            stop_loss: request.stop_loss,
            take_profit: request.take_profit,
        });
        Ok(ExecutionResult::Filled(OrderFill {
            order_id: ticket,
            deal_id: ticket + 50_000,
            price,
            volume: request.volume,
        }))
    }

    async fn connect(&self) -> bool {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let ok = self.allow_connect.load(Ordering::SeqCst);
        self.connected.store(ok, Ordering::SeqCst);
        ok
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Signal engine
// ---------------------------------------------------------------------------

/// Signal engine that returns fixed flags and levels anchored on the last
/// daily close.
pub struct ScriptedSignalEngine {
    flags: Mutex<ConfluenceFlags>,
    confluence_calls: AtomicUsize,
}

impl ScriptedSignalEngine {
    pub fn new(flags: ConfluenceFlags) -> Self {
        Self {
            flags: Mutex::new(flags),
            confluence_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_flags(&self, flags: ConfluenceFlags) {
        *self.flags.lock().unwrap() = flags;
    }

    pub fn confluence_calls(&self) -> usize {
        self.confluence_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalEngine for ScriptedSignalEngine {
    async fn trend(&self, _candles: &[Candle]) -> Result<Trend> {
        Ok(Trend::Bullish)
    }

    async fn bias_direction(
        &self,
        _monthly: Trend,
        _weekly: Trend,
        _daily: Trend,
    ) -> Result<Direction> {
        Ok(Direction::Long)
    }

    async fn confluence(
        &self,
        candles: &CandleSet,
        _direction: Direction,
        _params: &serde_json::Value,
    ) -> Result<Confluence> {
        self.confluence_calls.fetch_add(1, Ordering::SeqCst);
        let entry = candles
            .daily
            .last()
            .map(|c| c.close)
            .ok_or_else(|| anyhow!("no daily candles"))?;
        Ok(Confluence {
            flags: *self.flags.lock().unwrap(),
            notes: ConfluenceNotes::default(),
            levels: TradeLevels {
                entry: Some(entry),
                stop_loss: Some(entry - STOP_DISTANCE),
                targets: [Some(entry + TARGET_DISTANCE), None, None, None, None],
            },
        })
    }
}
