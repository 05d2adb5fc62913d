//! Sync command handler

use std::path::Path;

use anyhow::{anyhow, Context, Result};

use zotmd_core::{
    CancelFlag, Config, EngineOptions, MarkdownRenderer, SyncEngine, SyncError, SyncMode,
    SyncSummary,
};

use crate::output::Output;
use crate::zotero::ZoteroClient;

/// Run one sync; returns whether it fully succeeded
pub async fn sync(config_path: &Path, full: bool, output: &Output) -> Result<bool> {
    let config = Config::load_from_path(config_path).context("Failed to load configuration")?;
    config.validate()?;
    let options = EngineOptions::from_config(&config)?;

    output.message(&format!(
        "Syncing {} library {} into {}...",
        config.library_type,
        config.library_id,
        options.output_dir.display()
    ));

    let cancel = CancelFlag::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, stopping after the current item");
                cancel.cancel();
            }
        })
    };

    let mode = if full {
        SyncMode::Full
    } else {
        SyncMode::Incremental
    };

    // The HTTP client and SQLite store block, so the run gets its own thread
    let result = tokio::task::spawn_blocking(move || -> Result<SyncSummary> {
        let client = ZoteroClient::from_config(&config)?;
        let renderer = MarkdownRenderer::new();
        let mut engine = SyncEngine::new(options, &client, &renderer).with_cancel_flag(cancel);
        engine.run(mode).map_err(with_hint)
    })
    .await
    .context("Sync task failed")?;

    interrupt.abort();

    let summary = result?;
    output.print_summary(&summary);
    Ok(summary.is_success())
}

fn with_hint(err: SyncError) -> anyhow::Error {
    match err.recovery_suggestion() {
        Some(hint) => anyhow!("{}\n\n{}", err, hint),
        None => anyhow!(err),
    }
}
