//! TRADR: supervised live trading loop.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the gateway bridge, strategy service and challenge ledger into the
//! scan scheduler, and runs it until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tradr::config;
use tradr::engine::scheduler::ScanScheduler;
use tradr::gateway::bridge::BridgeClient;
use tradr::gateway::{ExecutionPort, MarketDataPort};
use tradr::risk::ledger::ChallengeLedger;
use tradr::risk::RiskGate;
use tradr::signal::remote::RemoteSignalEngine;
use tradr::signal::SignalEngine;

const BANNER: &str = r#"
 _____ ____      _    ____  ____
|_   _|  _ \    / \  |  _ \|  _ \
  | | | |_) |  / _ \ | | | | |_) |
  | | |  _ <  / ___ \| |_| |  _ <
  |_| |_| \_\/_/   \_\____/|_| \_\

  Scan → Decide → Execute → Reconcile
  v0.1.0 / Live Trading Loop
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        scan_interval_hours = cfg.agent.scan_interval_hours,
        mode = %cfg.strategy.signal_mode,
        min_confluence = cfg.min_confluence(),
        symbols = cfg.symbols.len(),
        "TRADR starting up"
    );

    // -- Initialise components -------------------------------------------

    let credentials = cfg.gateway_credentials()?;
    info!(server = %credentials.server, login = credentials.login, "Gateway account");

    let timeout = Duration::from_secs(cfg.gateway.timeout_secs);
    let bridge = Arc::new(BridgeClient::new(
        &cfg.gateway.bridge_url,
        credentials,
        cfg.gateway.magic_number,
        cfg.gateway.deviation_points,
        timeout,
    )?);
    let market: Arc<dyn MarketDataPort> = bridge.clone();
    let broker: Arc<dyn ExecutionPort> = bridge;

    let engine: Arc<dyn SignalEngine> =
        Arc::new(RemoteSignalEngine::new(&cfg.strategy.engine_url, timeout)?);

    let ledger = ChallengeLedger::open(cfg.risk.clone())
        .context("Failed to open challenge ledger")?;
    let status = ledger.status();
    info!(
        phase = %status.phase,
        balance = %status.balance,
        profitable_days = status.profitable_days,
        "Challenge ledger ready"
    );

    // -- Main loop -------------------------------------------------------

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let mut scheduler = ScanScheduler::new(
        cfg.scan_config(),
        market,
        broker,
        engine,
        Box::new(ledger),
        shutdown,
    );

    if let Err(e) = scheduler.run().await {
        error!(error = format!("{e:#}"), "TRADR stopped with a fatal error");
        return Err(e);
    }

    let status = scheduler.risk().status();
    info!(
        scans = scheduler.loop_state().scan_count,
        phase = %status.phase,
        balance = %status.balance,
        profit = format!("{:+.2}%", status.profit_pct),
        "TRADR shut down cleanly."
    );

    Ok(())
}

/// Cancel `token` on every SIGINT/SIGTERM. Cancelling twice is a no-op.
fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        while wait_for_signal().await {
            info!("Shutdown signal received.");
            token.cancel();
        }
    });
}

/// Returns false when no signal handler could be installed.
#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                r = tokio::signal::ctrl_c() => r.is_ok(),
                _ = term.recv() => true,
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
            tokio::signal::ctrl_c().await.is_ok()
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}

/// Initialise tracing with env-filter support.
///
/// Set `TRADR_LOG_JSON=1` for JSON output (production).
/// Set `RUST_LOG=tradr=debug` for verbose output.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tradr=info"));

    let json_logging = std::env::var("TRADR_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
