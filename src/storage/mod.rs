//! Persistence layer.
//!
//! Saves and loads the chain (ledger, escrow and oracle state) to/from a
//! JSON file. Writes go to a sibling temp file first and are renamed into
//! place, so a crash mid-write leaves the previous state intact.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

use crate::escrow::Chain;
use crate::oracle::PriceOracle;

/// Default state file path.
pub const DEFAULT_STATE_FILE: &str = "wagerchat_state.json";

/// Save chain state to a JSON file.
pub fn save_state<O>(chain: &Chain<O>, path: Option<&str>) -> Result<()>
where
    O: PriceOracle + Serialize,
{
    write_state(&encode_state(chain)?, path)?;
    debug!(
        bets = chain.bet_counter(),
        block_time = chain.block_time(),
        "State saved"
    );
    Ok(())
}

/// Serialise chain state. Cheap enough to run under the chain lock.
pub fn encode_state<O>(chain: &Chain<O>) -> Result<String>
where
    O: PriceOracle + Serialize,
{
    serde_json::to_string_pretty(chain).context("Failed to serialise chain state")
}

/// Write already-serialised state via a sibling temp file.
pub fn write_state(json: &str, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let tmp = format!("{path}.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("Failed to write state to {tmp}"))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to move state into {path}"))?;
    debug!(path, bytes = json.len(), "State written");
    Ok(())
}

/// `write_state` on the blocking pool, for callers on the async runtime.
pub async fn write_state_async(json: String, path: String) -> Result<()> {
    tokio::task::spawn_blocking(move || write_state(&json, Some(&path)))
        .await
        .context("State writer task failed")?
}

/// Load chain state from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_state<O>(path: Option<&str>) -> Result<Option<Chain<O>>>
where
    O: PriceOracle + DeserializeOwned,
{
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved state found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path).with_context(|| format!("Failed to read state from {path}"))?;

    let chain: Chain<O> =
        serde_json::from_str(&json).with_context(|| format!("Failed to parse state from {path}"))?;

    info!(
        path,
        bets = chain.bet_counter(),
        contract_balance = %chain.contract_balance(),
        block_time = chain.block_time(),
        "State loaded from disk"
    );

    Ok(Some(chain))
}

/// Delete the state file (for testing or reset).
pub fn delete_state(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path).with_context(|| format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
