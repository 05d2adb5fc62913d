//! Status command handler

use std::path::Path;

use anyhow::{Context, Result};

use zotmd_core::{Config, SyncStateStore};

use crate::output::Output;

/// Show configuration summary and sync state
pub fn show(config_path: &Path, output: &Output) -> Result<()> {
    let config = Config::load_from_path(config_path).context("Failed to load configuration")?;

    let db_path = config.db_path();
    let stats = if db_path.exists() {
        let store = SyncStateStore::open(&db_path)
            .with_context(|| format!("Failed to open state database {}", db_path.display()))?;
        Some(store.stats().context("Failed to read sync state")?)
    } else {
        None
    };

    output.print_status(&config, config_path, stats.as_ref());
    Ok(())
}
