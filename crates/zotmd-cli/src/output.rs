//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use std::path::Path;

use serde::Serialize;

use zotmd_core::{Config, StoreStats, SyncSummary};

/// How many item errors the human summary lists
const MAX_LISTED_ERRORS: usize = 5;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print the result of a sync run
    pub fn print_summary(&self, summary: &SyncSummary) {
        match self.format {
            OutputFormat::Human => {
                for line in summary_lines(summary) {
                    println!("{}", line);
                }
            }
            OutputFormat::Json => print_json(summary),
            OutputFormat::Quiet => {
                // Failures still reach stderr
                for error in &summary.errors {
                    eprintln!("{}", error);
                }
            }
        }
    }

    /// Print configuration and store statistics
    pub fn print_status(&self, config: &Config, config_path: &Path, stats: Option<&StoreStats>) {
        match self.format {
            OutputFormat::Json => print_json(&serde_json::json!({
                "config_file": config_path,
                "library_id": config.library_id,
                "library_type": config.library_type,
                "api_key": config.mask_api_key(),
                "output_dir": config.output_dir,
                "deletion_behavior": config.deletion_behavior,
                "db_path": config.db_path(),
                "store": stats,
            })),
            OutputFormat::Quiet => {
                let cursor = stats.and_then(|s| s.library_version);
                println!("{}", cursor.map_or_else(|| "none".to_string(), |c| c.to_string()));
            }
            OutputFormat::Human => {
                println!("zotmd Status");
                println!("============");
                println!();
                println!("Library:");
                println!(
                    "  ID:      {} ({})",
                    or_not_set(&config.library_id),
                    config.library_type
                );
                println!("  API key: {}", config.mask_api_key());
                println!();
                println!("Output:");
                println!(
                    "  Directory: {}",
                    config
                        .output_dir
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "(not set)".to_string())
                );
                println!("  Deletion:  {}", config.deletion_behavior);
                println!();
                println!("State:");
                println!("  Database: {}", config.db_path().display());
                match stats {
                    None => println!("  Never synced"),
                    Some(stats) => {
                        println!(
                            "  Cursor:   {}",
                            stats
                                .library_version
                                .map_or_else(|| "(none)".to_string(), |v| v.to_string())
                        );
                        println!(
                            "  Last full sync: {}",
                            stats
                                .last_full_sync
                                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                                .unwrap_or_else(|| "(never)".to_string())
                        );
                        println!();
                        println!("Contents:");
                        println!("  Items:       {}", stats.active_items);
                        println!("  Removed:     {}", stats.removed_items);
                        println!("  Annotations: {}", stats.total_annotations);
                    }
                }
                println!();
                println!("Config file: {}", config_path.display());
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Report a fatal error
    pub fn error(&self, err: &anyhow::Error) {
        match self.format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "error", "message": format!("{:#}", err)})
                );
            }
            _ => eprintln!("Error: {:#}", err),
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

fn or_not_set(value: &str) -> &str {
    if value.trim().is_empty() {
        "(not set)"
    } else {
        value
    }
}

/// Human-readable lines for a run summary
fn summary_lines(summary: &SyncSummary) -> Vec<String> {
    let mut lines = Vec::new();

    let version = summary
        .library_version
        .map_or_else(|| "unknown".to_string(), |v| v.to_string());
    let headline = if summary.cancelled {
        format!("Sync cancelled ({} sync, library version {})", summary.mode, version)
    } else if summary.errors.is_empty() {
        format!("✓ Sync complete ({} sync, library version {})", summary.mode, version)
    } else {
        format!(
            "Sync finished with {} error(s) ({} sync, library version {})",
            summary.errors.len(),
            summary.mode,
            version
        )
    };
    lines.push(headline);

    if summary.processed == 0 && !summary.cancelled {
        lines.push("  Already up to date".to_string());
    } else {
        lines.push(format!(
            "  Created: {}, Updated: {}, Unchanged: {}, Removed: {}, Skipped: {}",
            summary.created, summary.updated, summary.unchanged, summary.removed, summary.skipped
        ));
        if summary.ineligible > 0 {
            lines.push(format!("  Without citation key: {}", summary.ineligible));
        }
        let a = &summary.annotations;
        if a.total + a.removed > 0 {
            lines.push(format!(
                "  Annotations: {} ({} new, {} changed, {} removed)",
                a.total, a.added, a.updated, a.removed
            ));
        }
    }
    lines.push(format!("  Took {:.1}s", summary.elapsed.as_secs_f64()));

    for warning in &summary.warnings {
        lines.push(format!("⚠ {}", warning));
    }

    if !summary.errors.is_empty() {
        lines.push(String::new());
        lines.push("Errors:".to_string());
        for error in summary.errors.iter().take(MAX_LISTED_ERRORS) {
            lines.push(format!("  {}", truncate(&error.to_string(), 200)));
        }
        let hidden = summary.errors.len().saturating_sub(MAX_LISTED_ERRORS);
        if hidden > 0 {
            lines.push(format!("  ... and {} more (use --json for all)", hidden));
        }
    }

    lines
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
