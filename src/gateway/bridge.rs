//! MT5 bridge integration.
//!
//! Talks to a small HTTP service running next to the MetaTrader 5 terminal
//! and exposing its Python API over JSON.
//!
//! Endpoints used:
//! - `POST /connect`, `POST /disconnect`
//! - `GET  /account`
//! - `GET  /symbols/{symbol}` (404 when the broker does not list it)
//! - `GET  /rates/{symbol}?timeframe=D1&count=500`
//! - `GET  /positions?magic={magic}`
//! - `POST /orders`
//!
//! Any transport failure flips the liveness flag so the connection
//! supervisor notices the loss on its next tick.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ExecutionPort, MarketDataPort};
use crate::config::GatewayCredentials;
use crate::types::{
    AccountInfo, Candle, Direction, ExecutionResult, GatewayPosition, OrderFill, OrderRejection,
    OrderRequest, SymbolInfo, Timeframe, TradrError,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Request completed.
const RETCODE_DONE: i64 = 10009;
/// Order placed (pending fill confirmation).
const RETCODE_PLACED: i64 = 10008;

// ---------------------------------------------------------------------------
// API types (bridge JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ConnectRequest<'a> {
    login: u64,
    password: &'a str,
    server: &'a str,
}

#[derive(Debug, Deserialize)]
struct ConnectResponse {
    connected: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BridgeAccount {
    login: u64,
    server: String,
    balance: f64,
    equity: f64,
    leverage: u32,
}

#[derive(Debug, Deserialize)]
struct BridgeSymbol {
    name: String,
    digits: u32,
    volume_min: f64,
    volume_max: f64,
    volume_step: f64,
    /// MT5 `trade_mode`; 0 means trading disabled.
    #[serde(default = "default_trade_mode")]
    trade_mode: u32,
}

fn default_trade_mode() -> u32 {
    4
}

#[derive(Debug, Deserialize)]
struct BridgeRate {
    /// Bar open time, seconds since epoch.
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    tick_volume: f64,
}

#[derive(Debug, Deserialize)]
struct BridgePosition {
    ticket: u64,
    symbol: String,
    /// MT5 position type: 0 = buy, 1 = sell.
    #[serde(rename = "type")]
    kind: u8,
    volume: f64,
    price_open: f64,
    #[serde(default)]
    sl: f64,
    #[serde(default)]
    tp: f64,
}

#[derive(Debug, Serialize)]
struct BridgeOrder<'a> {
    symbol: &'a str,
    side: &'a str,
    volume: f64,
    sl: f64,
    tp: f64,
    magic: u64,
    deviation: u32,
    comment: &'a str,
}

#[derive(Debug, Deserialize)]
struct BridgeOrderResult {
    retcode: i64,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    order: u64,
    #[serde(default)]
    deal: u64,
    #[serde(default)]
    price: f64,
    #[serde(default)]
    volume: f64,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

fn to_decimal(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or(Decimal::ZERO)
}

impl From<BridgeAccount> for AccountInfo {
    fn from(a: BridgeAccount) -> Self {
        AccountInfo {
            login: a.login,
            server: a.server,
            balance: to_decimal(a.balance),
            equity: to_decimal(a.equity),
            leverage: a.leverage,
        }
    }
}

impl From<BridgeSymbol> for SymbolInfo {
    fn from(s: BridgeSymbol) -> Self {
        SymbolInfo {
            name: s.name,
            digits: s.digits,
            volume_min: s.volume_min,
            volume_max: s.volume_max,
            volume_step: s.volume_step,
            trade_allowed: s.trade_mode != 0,
        }
    }
}

impl BridgeRate {
    fn into_candle(self) -> Option<Candle> {
        let time = Utc.timestamp_opt(self.time, 0).single()?;
        Some(Candle {
            time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.tick_volume,
        })
    }
}

impl BridgePosition {
    fn into_position(self) -> Option<GatewayPosition> {
        let direction = match self.kind {
            0 => Direction::Long,
            1 => Direction::Short,
            other => {
                warn!(ticket = self.ticket, kind = other, "Unknown position type, skipping");
                return None;
            }
        };
        Some(GatewayPosition {
            ticket: self.ticket,
            symbol: self.symbol,
            direction,
            volume: self.volume,
            open_price: self.price_open,
            stop_loss: self.sl,
            take_profit: self.tp,
        })
    }
}

impl BridgeOrderResult {
    fn into_result(self) -> ExecutionResult {
        if self.retcode == RETCODE_DONE || self.retcode == RETCODE_PLACED {
            ExecutionResult::Filled(OrderFill {
                order_id: self.order,
                deal_id: self.deal,
                price: self.price,
                volume: self.volume,
            })
        } else {
            ExecutionResult::Rejected(OrderRejection {
                code: Some(self.retcode),
                message: if self.comment.is_empty() {
                    "order rejected".to_string()
                } else {
                    self.comment
                },
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// MT5 bridge client implementing both gateway ports.
pub struct BridgeClient {
    http: Client,
    base_url: String,
    server: String,
    login: u64,
    password: SecretString,
    magic: u64,
    deviation: u32,
    connected: AtomicBool,
}

impl BridgeClient {
    pub fn new(
        base_url: &str,
        credentials: GatewayCredentials,
        magic: u64,
        deviation: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("tradr/0.1")
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            server: credentials.server,
            login: credentials.login,
            password: credentials.password,
            magic,
            deviation,
            connected: AtomicBool::new(false),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Mark the link as lost when the bridge is unreachable.
    fn note_transport_error(&self, operation: &str, err: &reqwest::Error) {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            if self.connected.swap(false, Ordering::SeqCst) {
                warn!(operation, error = %err, "Bridge unreachable, marking disconnected");
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, operation: &str, path: &str) -> Result<T> {
        self.ensure_link()?;
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .inspect_err(|e| self.note_transport_error(operation, e))
            .with_context(|| format!("Bridge {operation} request failed"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TradrError::Gateway {
                operation: operation.to_string(),
                message: format!("HTTP {status}: {body}"),
            }
            .into());
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("Failed to parse bridge {operation} response"))
    }

    fn ensure_link(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TradrError::Disconnected.into())
        }
    }
}

#[async_trait]
impl MarketDataPort for BridgeClient {
    async fn get_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>> {
        let path = format!(
            "/rates/{}?timeframe={}&count={count}",
            urlencoding::encode(symbol),
            timeframe.code()
        );
        let rates: Vec<BridgeRate> = self.get_json("rates", &path).await?;
        let candles: Vec<Candle> = rates.into_iter().filter_map(BridgeRate::into_candle).collect();
        debug!(symbol, timeframe = %timeframe, count = candles.len(), "Rates fetched");
        Ok(candles)
    }

    async fn get_positions(&self) -> Result<Vec<GatewayPosition>> {
        let path = format!("/positions?magic={}", self.magic);
        let positions: Vec<BridgePosition> = self.get_json("positions", &path).await?;
        Ok(positions.into_iter().filter_map(BridgePosition::into_position).collect())
    }

    async fn get_account_info(&self) -> Result<AccountInfo> {
        let account: BridgeAccount = self.get_json("account", "/account").await?;
        Ok(account.into())
    }

    async fn get_symbol_info(&self, symbol: &str) -> Result<Option<SymbolInfo>> {
        self.ensure_link()?;
        let resp = self
            .http
            .get(self.url(&format!("/symbols/{}", urlencoding::encode(symbol))))
            .send()
            .await
            .inspect_err(|e| self.note_transport_error("symbol_info", e))
            .context("Bridge symbol_info request failed")?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(TradrError::Gateway {
                operation: "symbol_info".into(),
                message: format!("HTTP {}", resp.status()),
            }
            .into());
        }
        let info: BridgeSymbol = resp
            .json()
            .await
            .context("Failed to parse bridge symbol_info response")?;
        Ok(Some(info.into()))
    }
}

#[async_trait]
impl ExecutionPort for BridgeClient {
    async fn place_order(&self, request: &OrderRequest) -> Result<ExecutionResult> {
        self.ensure_link()?;
        let side = match request.direction {
            Direction::Long => "buy",
            Direction::Short => "sell",
        };
        let body = BridgeOrder {
            symbol: &request.symbol,
            side,
            volume: request.volume,
            sl: request.stop_loss,
            tp: request.take_profit,
            magic: self.magic,
            deviation: self.deviation,
            comment: &request.comment,
        };

        let resp = self
            .http
            .post(self.url("/orders"))
            .json(&body)
            .send()
            .await
            .inspect_err(|e| self.note_transport_error("place_order", e))
            .context("Bridge place_order request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Ok(ExecutionResult::Rejected(OrderRejection {
                code: None,
                message: format!("HTTP {status}: {text}"),
            }));
        }

        let result: BridgeOrderResult = resp
            .json()
            .await
            .context("Failed to parse bridge order response")?;
        Ok(result.into_result())
    }

    async fn connect(&self) -> bool {
        let body = ConnectRequest {
            login: self.login,
            password: self.password.expose_secret(),
            server: &self.server,
        };
        let outcome = match self.http.post(self.url("/connect")).json(&body).send().await {
            Ok(resp) => resp.json::<ConnectResponse>().await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(ConnectResponse { connected: true, .. }) => {
                info!(login = self.login, server = %self.server, "Bridge connected");
                self.connected.store(true, Ordering::SeqCst);
                true
            }
            Ok(ConnectResponse { error, .. }) => {
                warn!(
                    login = self.login,
                    error = error.as_deref().unwrap_or("unknown"),
                    "Terminal refused connection"
                );
                self.connected.store(false, Ordering::SeqCst);
                false
            }
            Err(e) => {
                warn!(error = %e, "Bridge connect request failed");
                self.connected.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    async fn disconnect(&self) {
        if let Err(e) = self.http.post(self.url("/disconnect")).send().await {
            debug!(error = %e, "Bridge disconnect request failed");
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
