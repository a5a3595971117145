//! Persistence layer.
//!
//! Saves and loads the risk ledger's challenge state to/from a JSON file.
//! Writes go through a temporary file and a rename so a crash mid-write
//! never leaves a truncated state file behind.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::risk::ledger::ChallengeState;

/// Default state file path.
pub const DEFAULT_STATE_FILE: &str = "challenge_state.json";

/// Save challenge state to a JSON file.
pub fn save_state(state: &ChallengeState, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(state)
        .context("Failed to serialise challenge state")?;

    let tmp = format!("{path}.tmp");
    std::fs::write(&tmp, &json)
        .with_context(|| format!("Failed to write state to {tmp}"))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move state into {path}"))?;

    debug!(
        path,
        balance = %state.balance,
        open_positions = state.open_positions.len(),
        "State saved"
    );
    Ok(())
}

/// Load challenge state from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_state(path: Option<&str>) -> Result<Option<ChallengeState>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved state found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state from {path}"))?;

    let state: ChallengeState = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse state from {path}"))?;

    info!(
        path,
        balance = %state.balance,
        open_positions = state.open_positions.len(),
        closed_trades = state.closed_trades.len(),
        "State loaded from disk"
    );

    Ok(Some(state))
}

/// Delete the state file (for testing or reset).
pub fn delete_state(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
