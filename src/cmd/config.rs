//! Configuration view and validation commands: `promoter config`.

use anyhow::Result;
use std::path::Path;
use std::process::ExitCode;

use promoter::config::{CONFIG_FILE, Config, PROMOTER_DIR, PromoterToml};

use super::super::ConfigCommands;

fn print_effective(config: &Config) {
    let toml = &config.toml;

    println!("[tracker]");
    println!("  provider = \"{}\"", config.provider());
    println!("  api_url = \"{}\"", config.api_url());
    match config.target() {
        Some(target) => println!("  target = \"{}\"", target),
        None => println!("  target = (not configured)"),
    }
    println!("  timeout_secs = {}", toml.tracker.timeout_secs);
    println!(
        "  token = {}",
        if config.token().is_some() { "(set)" } else { "(not set)" }
    );
    println!();

    println!("[queue]");
    println!("  issues_dir = \"{}\"", config.issues_dir().display());
    println!("  marker_label = \"{}\"", toml.queue.marker_label);
    println!("  assignees = {:?}", config.assignees());
    println!();

    println!("[correlation]");
    println!(
        "  automation_authors = {:?}",
        toml.correlation.automation_authors
    );
    println!(
        "  in_progress_markers = {:?}",
        toml.correlation.in_progress_markers
    );
    println!(
        "  temporal_window_hours = {}",
        toml.correlation.temporal_window_hours
    );
    println!();

    println!("[completion]");
    println!("  manual_close = \"{}\"", toml.completion.manual_close);
    println!();

    println!("[poll]");
    println!("  interval_secs = {}", toml.poll.interval_secs);
    println!();

    println!("[retry]");
    println!("  max_attempts = {}", toml.retry.max_attempts);
    println!("  base_delay_ms = {}", toml.retry.base_delay_ms);
    println!("  max_delay_ms = {}", toml.retry.max_delay_ms);
    println!();
}

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<ExitCode> {
    let promoter_dir = project_dir.join(PROMOTER_DIR);
    let config_path = promoter_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Promoter Configuration");
            println!("======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No promoter.toml found at {}", config_path.display());
                println!("Using defaults. Run 'promoter config init' to create one.");
            }
            println!();

            println!("Effective values (with env overrides):");
            let config = Config::load(project_dir)?;
            print_effective(&config);
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let config = Config::load(project_dir)?;
            let warnings = config.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("promoter.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(ExitCode::SUCCESS);
            }

            std::fs::create_dir_all(&promoter_dir)?;
            PromoterToml::default().save(&config_path)?;

            println!("Created promoter.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [tracker] provider, repository or project_id");
            println!("  - [queue] issues_dir, marker_label, assignees");
            println!("  - [completion] manual_close (trust or review)");
            println!();
            println!("Tokens are read from GITHUB_TOKEN or GITLAB_TOKEN, never from the file.");
            println!();
        }
    }

    Ok(ExitCode::SUCCESS)
}
