//! Credential and access check: `promoter check`.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::ExitCode;

use promoter::config::Config;

pub async fn cmd_check(project_dir: &Path) -> Result<ExitCode> {
    let config = Config::load(project_dir)?;
    let tracker = config.build_tracker()?;

    println!();
    println!(
        "Checking {} access to {}...",
        config.provider(),
        config.target().unwrap_or("(not configured)")
    );

    let login = tracker
        .whoami()
        .await
        .context("Tracker rejected the configured credentials")?;
    println!("  {} authenticated as {}", console::style("✓").green(), login);

    let marker = &config.toml.queue.marker_label;
    let items = tracker
        .list_managed_items(marker)
        .await
        .with_context(|| format!("Cannot list items labelled '{}'", marker))?;
    println!(
        "  {} {} item(s) labelled '{}'",
        console::style("✓").green(),
        items.len(),
        marker
    );

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!();
        println!("Configuration warnings:");
        for warning in warnings {
            println!("  - {}", warning);
        }
    }
    println!();
    Ok(ExitCode::SUCCESS)
}
