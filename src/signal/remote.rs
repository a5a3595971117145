//! HTTP client for the strategy service.
//!
//! The strategy service hosts the same indicator code the backtests run,
//! so live signals stay in parity with backtested ones. This client only
//! ships candles over and validates what comes back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::SignalEngine;
use crate::types::{
    Candle, CandleSet, Confluence, ConfluenceFlags, ConfluenceNotes, Direction, TradeLevels,
    TradrError, Trend,
};

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct TrendRequest<'a> {
    candles: &'a [Candle],
}

#[derive(Debug, Deserialize)]
struct TrendResponse {
    trend: Trend,
}

#[derive(Debug, Serialize)]
struct BiasRequest {
    monthly: Trend,
    weekly: Trend,
    daily: Trend,
}

#[derive(Debug, Deserialize)]
struct BiasResponse {
    direction: Direction,
}

#[derive(Debug, Serialize)]
struct ConfluenceRequest<'a> {
    monthly: &'a [Candle],
    weekly: &'a [Candle],
    daily: &'a [Candle],
    h4: &'a [Candle],
    direction: Direction,
    params: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ConfluenceResponse {
    flags: HashMap<String, bool>,
    #[serde(default)]
    notes: HashMap<String, String>,
    levels: LevelsPayload,
}

#[derive(Debug, Default, Deserialize)]
struct LevelsPayload {
    entry: Option<f64>,
    sl: Option<f64>,
    tp1: Option<f64>,
    tp2: Option<f64>,
    tp3: Option<f64>,
    tp4: Option<f64>,
    tp5: Option<f64>,
}

impl ConfluenceResponse {
    fn into_confluence(self) -> Result<Confluence, TradrError> {
        let flags = ConfluenceFlags::from_map(&self.flags)?;
        let notes = ConfluenceNotes::from_map(&self.notes);
        let l = self.levels;
        Ok(Confluence {
            flags,
            notes,
            levels: TradeLevels {
                entry: l.entry,
                stop_loss: l.sl,
                targets: [l.tp1, l.tp2, l.tp3, l.tp4, l.tp5],
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct RemoteSignalEngine {
    http: Client,
    base_url: String,
}

impl RemoteSignalEngine {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize + ?Sized, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Signal engine request {path} failed"))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(TradrError::SignalEngine(format!("{path} returned {status}: {text}")).into());
        }
        resp.json::<T>()
            .await
            .with_context(|| format!("Failed to parse signal engine {path} response"))
    }
}

#[async_trait]
impl SignalEngine for RemoteSignalEngine {
    async fn trend(&self, candles: &[Candle]) -> Result<Trend> {
        let resp: TrendResponse = self.post("/trend", &TrendRequest { candles }).await?;
        Ok(resp.trend)
    }

    async fn bias_direction(
        &self,
        monthly: Trend,
        weekly: Trend,
        daily: Trend,
    ) -> Result<Direction> {
        let resp: BiasResponse = self
            .post("/bias", &BiasRequest { monthly, weekly, daily })
            .await?;
        Ok(resp.direction)
    }

    async fn confluence(
        &self,
        candles: &CandleSet,
        direction: Direction,
        params: &serde_json::Value,
    ) -> Result<Confluence> {
        let request = ConfluenceRequest {
            monthly: &candles.monthly,
            weekly: &candles.weekly,
            daily: &candles.daily,
            h4: &candles.h4,
            direction,
            params,
        };
        let resp: ConfluenceResponse = self.post("/confluence", &request).await?;
        let confluence = resp.into_confluence()?;
        debug!(
            direction = %direction,
            score = confluence.flags.score(),
            "Confluence received"
        );
        Ok(confluence)
    }
}
