//! Centralized home-based storage paths for all medplan-agent persistence.
//!
//! Everything lives under `~/.medplan-agent/`:
//! - `plans/` - workflow checkpoint files, one per plan id
//! - `logs/` - structured JSONL event log

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

const AGENT_DIR: &str = ".medplan-agent";

/// Returns the home-based agent directory: `~/.medplan-agent/`
///
/// Creates the directory if it doesn't exist.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined or the
/// directory cannot be created.
pub fn agent_home_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory for plan storage")?;
    let agent_dir = home.join(AGENT_DIR);
    fs::create_dir_all(&agent_dir)
        .with_context(|| format!("Failed to create agent directory: {}", agent_dir.display()))?;
    Ok(agent_dir)
}

/// Returns the checkpoint directory: `~/.medplan-agent/plans/`
pub fn plans_dir() -> Result<PathBuf> {
    let dir = agent_home_dir()?.join("plans");
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create plans directory: {}", dir.display()))?;
    Ok(dir)
}

/// Returns the logs directory: `~/.medplan-agent/logs/`
pub fn logs_dir() -> Result<PathBuf> {
    let dir = agent_home_dir()?.join("logs");
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create logs directory: {}", dir.display()))?;
    Ok(dir)
}
