//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Credentials are referenced by env-var name in the config and resolved
//! at startup via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use crate::types::{ChallengePhase, TradrError};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub strategy: StrategyConfig,
    pub gateway: GatewayConfig,
    pub risk: RiskConfig,
    /// Tradable universe, in the broker's symbol naming.
    pub symbols: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub scan_interval_hours: u64,
    #[serde(default = "default_idle_tick_secs")]
    pub idle_tick_secs: u64,
    #[serde(default = "default_reconnect_backoff_secs")]
    pub reconnect_backoff_secs: u64,
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

/// Confluence threshold mode.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignalMode {
    Standard,
    Aggressive,
}

impl std::fmt::Display for SignalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalMode::Standard => write!(f, "standard"),
            SignalMode::Aggressive => write!(f, "aggressive"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    pub signal_mode: SignalMode,
    #[serde(default = "default_min_confluence_standard")]
    pub min_confluence_standard: u8,
    #[serde(default = "default_min_confluence_aggressive")]
    pub min_confluence_aggressive: u8,
    /// Base URL of the signal engine service.
    pub engine_url: String,
    /// Opaque parameters forwarded to the signal engine.
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Base URL of the MT5 bridge service.
    pub bridge_url: String,
    pub server_env: String,
    pub login_env: String,
    pub password_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Magic number tagging this bot's orders on the terminal.
    pub magic_number: u64,
    #[serde(default = "default_deviation_points")]
    pub deviation_points: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    pub state_file: String,
    #[serde(default = "default_phase")]
    pub phase: ChallengePhase,
    pub account_size: Decimal,
    pub risk_per_trade_pct: f64,
    pub max_daily_loss_pct: f64,
    pub max_drawdown_pct: f64,
    pub profit_target_pct: f64,
    pub min_profitable_days: u32,
    pub max_open_positions: usize,
    #[serde(default = "default_lot_step")]
    pub lot_step: f64,
    #[serde(default = "default_min_lot")]
    pub min_lot: f64,
    #[serde(default = "default_contract_size")]
    pub default_contract_size: f64,
    /// Per-symbol contract sizes overriding the default.
    #[serde(default)]
    pub contract_sizes: HashMap<String, f64>,
}

fn default_phase() -> ChallengePhase { ChallengePhase::Phase1 }
fn default_idle_tick_secs() -> u64 { 60 }
fn default_reconnect_backoff_secs() -> u64 { 60 }
fn default_pacing_ms() -> u64 { 500 }
fn default_min_confluence_standard() -> u8 { 4 }
fn default_min_confluence_aggressive() -> u8 { 2 }
fn default_timeout_secs() -> u64 { 30 }
fn default_deviation_points() -> u32 { 20 }
fn default_lot_step() -> f64 { 0.01 }
fn default_min_lot() -> f64 { 0.01 }
fn default_contract_size() -> f64 { 100_000.0 }

/// Everything the scan loop consumes, assembled once at bootstrap.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub symbols: Vec<String>,
    pub scan_interval: Duration,
    pub signal_mode: SignalMode,
    pub min_confluence: u8,
    pub pacing: Duration,
    pub idle_tick: Duration,
    pub reconnect_backoff: Duration,
    pub strategy_params: serde_json::Value,
    /// Attached to every order.
    pub order_comment: String,
}

/// Resolved gateway credentials.
#[derive(Debug)]
pub struct GatewayCredentials {
    pub server: String,
    pub login: u64,
    pub password: SecretString,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), TradrError> {
        if self.symbols.is_empty() {
            return Err(TradrError::Config("symbols list is empty".into()));
        }
        if self.agent.scan_interval_hours == 0 {
            return Err(TradrError::Config("scan_interval_hours must be at least 1".into()));
        }
        for (name, value) in [
            ("min_confluence_standard", self.strategy.min_confluence_standard),
            ("min_confluence_aggressive", self.strategy.min_confluence_aggressive),
        ] {
            if !(1..=7).contains(&value) {
                return Err(TradrError::Config(format!("{name} must be in 1..=7, got {value}")));
            }
        }
        if self.risk.max_daily_loss_pct <= 0.0 || self.risk.max_drawdown_pct <= 0.0 {
            return Err(TradrError::Config("drawdown limits must be positive".into()));
        }
        if self.risk.account_size <= Decimal::ZERO || self.risk.lot_step <= 0.0 {
            return Err(TradrError::Config("account_size and lot_step must be positive".into()));
        }
        Ok(())
    }

    /// Minimum confluence score for the configured signal mode.
    pub fn min_confluence(&self) -> u8 {
        match self.strategy.signal_mode {
            SignalMode::Standard => self.strategy.min_confluence_standard,
            SignalMode::Aggressive => self.strategy.min_confluence_aggressive,
        }
    }

    /// Assemble the scan loop's configuration.
    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            symbols: self.symbols.clone(),
            scan_interval: Duration::from_secs(self.agent.scan_interval_hours * 3600),
            signal_mode: self.strategy.signal_mode,
            min_confluence: self.min_confluence(),
            pacing: Duration::from_millis(self.agent.pacing_ms),
            idle_tick: Duration::from_secs(self.agent.idle_tick_secs),
            reconnect_backoff: Duration::from_secs(self.agent.reconnect_backoff_secs),
            strategy_params: self.strategy.params.clone(),
            order_comment: self.agent.name.clone(),
        }
    }

    /// Resolve gateway credentials from the environment.
    pub fn gateway_credentials(&self) -> Result<GatewayCredentials> {
        let server = Self::resolve_env(&self.gateway.server_env)?;
        let login = Self::resolve_env(&self.gateway.login_env)?
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{} is not a numeric login", self.gateway.login_env))?;
        let password = Self::resolve_env(&self.gateway.password_env)?;
        if login == 0 || password.is_empty() {
            anyhow::bail!("Gateway credentials not configured");
        }
        Ok(GatewayCredentials {
            server,
            login,
            password: SecretString::new(password),
        })
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
symbols = ["EURUSD", "GBPUSD", "XAUUSD"]

[agent]
name = "TRADR-TEST"
scan_interval_hours = 4

[strategy]
signal_mode = "standard"
engine_url = "http://127.0.0.1:8700"

[strategy.params]
min_rr = 2.0

[gateway]
bridge_url = "http://127.0.0.1:8600"
server_env = "MT5_SERVER"
login_env = "MT5_LOGIN"
password_env = "MT5_PASSWORD"
magic_number = 20240

[risk]
state_file = "challenge_state.json"
account_size = 200000
risk_per_trade_pct = 0.5
max_daily_loss_pct = 5.0
max_drawdown_pct = 10.0
profit_target_pct = 10.0
min_profitable_days = 4
max_open_positions = 5

[risk.contract_sizes]
XAUUSD = 100.0
"#;

    #[test]
    fn test_parse_sample() {
        let cfg = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(cfg.agent.name, "TRADR-TEST");
        assert_eq!(cfg.symbols.len(), 3);
        assert_eq!(cfg.agent.idle_tick_secs, 60);
        assert_eq!(cfg.agent.pacing_ms, 500);
        assert_eq!(cfg.risk.contract_sizes.get("XAUUSD"), Some(&100.0));
        assert_eq!(cfg.strategy.params["min_rr"], serde_json::json!(2.0));
    }

    #[test]
    fn test_min_confluence_by_mode() {
        let mut cfg = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(cfg.min_confluence(), 4);
        cfg.strategy.signal_mode = SignalMode::Aggressive;
        assert_eq!(cfg.min_confluence(), 2);
    }

    #[test]
    fn test_scan_config() {
        let cfg = AppConfig::from_toml(SAMPLE).unwrap();
        let scan = cfg.scan_config();
        assert_eq!(scan.scan_interval, Duration::from_secs(4 * 3600));
        assert_eq!(scan.pacing, Duration::from_millis(500));
        assert_eq!(scan.min_confluence, 4);
        assert_eq!(scan.symbols, vec!["EURUSD", "GBPUSD", "XAUUSD"]);
    }

    #[test]
    fn test_empty_symbols_rejected() {
        let text = SAMPLE.replace(r#"["EURUSD", "GBPUSD", "XAUUSD"]"#, "[]");
        assert!(AppConfig::from_toml(&text).is_err());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let text = SAMPLE.replace(
            r#"signal_mode = "standard""#,
            "signal_mode = \"standard\"\nmin_confluence_standard = 9",
        );
        assert!(AppConfig::from_toml(&text).is_err());
    }

    #[test]
    fn test_load_config_file() {
        // Requires config.toml in the working directory; skipped otherwise.
        if let Ok(cfg) = AppConfig::load("config.toml") {
            assert!(!cfg.symbols.is_empty());
            assert!(cfg.agent.scan_interval_hours >= 1);
        }
    }
}
