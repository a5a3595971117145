//! Connection supervisor.
//!
//! Owns the gateway connection lifecycle:
//! `disconnected → connecting → connected → (lost) → disconnected`.
//! The scheduler polls `ensure_connected` once per idle tick and handles the
//! backoff sleep itself, so a failed attempt here returns immediately.
//! `refresh_account` keeps the ledger's balances current while connected.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::gateway::{ExecutionPort, MarketDataPort};
use crate::risk::RiskGate;
use crate::types::{AccountInfo, TradrError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

pub struct ConnectionSupervisor {
    broker: Arc<dyn ExecutionPort>,
    market: Arc<dyn MarketDataPort>,
    state: ConnectionState,
    reconnects: u32,
}

impl ConnectionSupervisor {
    pub fn new(broker: Arc<dyn ExecutionPort>, market: Arc<dyn MarketDataPort>) -> Self {
        Self {
            broker,
            market,
            state: ConnectionState::Disconnected,
            reconnects: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Successful reconnects since startup.
    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    /// Startup connection. Failure is fatal to the run.
    pub async fn connect_initial(&mut self, risk: &mut dyn RiskGate) -> Result<()> {
        if !self.attempt(risk).await {
            bail!(TradrError::Disconnected);
        }
        Ok(())
    }

    /// Liveness check with one immediate reconnect attempt on loss.
    pub async fn ensure_connected(&mut self, risk: &mut dyn RiskGate) -> bool {
        if self.state == ConnectionState::Connected && self.broker.is_connected() {
            return true;
        }
        if self.state == ConnectionState::Connected {
            warn!("Gateway connection lost");
            self.state = ConnectionState::Disconnected;
        }
        if self.attempt(risk).await {
            self.reconnects += 1;
            info!(reconnects = self.reconnects, "Reconnected to gateway");
            true
        } else {
            false
        }
    }

    /// Push the gateway's current balance and equity into the ledger.
    pub async fn refresh_account(&self, risk: &mut dyn RiskGate) -> Result<()> {
        let account = self
            .market
            .get_account_info()
            .await
            .context("Failed to fetch account info")?;
        debug!(
            balance = %account.balance,
            equity = %account.equity,
            "Account refreshed"
        );
        risk.sync_account(&account)
    }

    pub async fn disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.broker.disconnect().await;
            self.state = ConnectionState::Disconnected;
            info!("Disconnected from gateway");
        }
    }

    async fn attempt(&mut self, risk: &mut dyn RiskGate) -> bool {
        self.state = ConnectionState::Connecting;
        if !self.broker.connect().await {
            error!("Gateway connection failed");
            self.state = ConnectionState::Disconnected;
            return false;
        }
        self.state = ConnectionState::Connected;
        if let Some(account) = self.fetch_account().await {
            if let Err(e) = risk.sync_account(&account) {
                warn!(error = %e, "Failed to sync risk ledger with account");
            }
        }
        true
    }

    async fn fetch_account(&self) -> Option<AccountInfo> {
        match self.market.get_account_info().await {
            Ok(account) => {
                info!(
                    login = account.login,
                    server = %account.server,
                    balance = %account.balance,
                    equity = %account.equity,
                    leverage = account.leverage,
                    "Connected to gateway"
                );
                Some(account)
            }
            Err(e) => {
                warn!(error = %e, "Connected but account info unavailable");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
