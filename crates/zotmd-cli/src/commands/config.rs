//! Config command handlers

use std::path::Path;

use anyhow::{Context, Result};

use zotmd_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: &Path, output: &Output) -> Result<()> {
    let config = Config::load_from_path(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "library_id": config.library_id,
                    "library_type": config.library_type,
                    "api_key": config.mask_api_key(),
                    "output_dir": config.output_dir,
                    "deletion_behavior": config.deletion_behavior,
                    "data_dir": config.data_dir,
                    "db_path": config.db_path(),
                    "quarantine_dir": config.quarantine_dir,
                    "retry_attempts": config.retry_attempts,
                    "full_sync_threshold": config.full_sync_threshold,
                    "requests_per_minute": config.requests_per_minute
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config_path.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  library_id:          {}", config.library_id);
            println!("  library_type:        {}", config.library_type);
            println!("  api_key:             {}", config.mask_api_key());
            println!(
                "  output_dir:          {}",
                config
                    .output_dir
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!("  deletion_behavior:   {}", config.deletion_behavior);
            println!("  data_dir:            {}", config.data_dir.display());
            println!("  db_path:             {}", config.db_path().display());
            println!("  quarantine_dir:      {}", config.quarantine_dir);
            println!("  retry_attempts:      {}", config.retry_attempts);
            println!("  full_sync_threshold: {}", config.full_sync_threshold);
            println!("  requests_per_minute: {}", config.requests_per_minute);
            println!();
            println!("Config file: {}", config_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, config_path: &Path, output: &Output) -> Result<()> {
    let mut config = Config::load_from_path(config_path).context("Failed to load configuration")?;

    config.set(&key, &value)?;
    config
        .save_to_path(config_path)
        .context("Failed to save configuration")?;

    let shown = if key == "api_key" {
        config.mask_api_key()
    } else {
        value
    };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}
