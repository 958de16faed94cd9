//! Ledger and queue views: `promoter sync`, `promoter status`, `promoter list`.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::ExitCode;

use promoter::config::Config;
use promoter::ledger::store::{LEDGER_FILE, read_ledger};
use promoter::ledger::{Ledger, LedgerRecord, RecordStatus};
use promoter::sequence::SequenceStore;

use super::run::build_controller;

fn load_ledger(config: &Config) -> Result<Option<Ledger>> {
    let path = config.state_dir().join(LEDGER_FILE);
    read_ledger(&path).with_context(|| format!("Failed to read ledger at {}", path.display()))
}

fn status_label(record: &LedgerRecord) -> String {
    match record.status {
        RecordStatus::Completed => console::style("completed").green().to_string(),
        RecordStatus::Created => console::style("in flight").yellow().to_string(),
    }
}

fn print_records(ledger: &Ledger) {
    println!("{:<7} {:<10} {:<20} Status", "File", "Item", "Created");
    println!("{:<7} {:<10} {:<20} ------", "-----", "--------", "------------------");
    for record in ledger.records() {
        let mut line = format!(
            "{:<7} {:<10} {:<20} {}",
            format!("{:03}", record.file_index),
            record.remote_item_id.to_string(),
            record.created_at.format("%Y-%m-%d %H:%M"),
            status_label(record)
        );
        if !record.duplicates.is_empty() {
            let ids: Vec<String> = record.duplicates.iter().map(|d| d.to_string()).collect();
            line.push_str(&format!(
                " {}",
                console::style(format!("(duplicates: {})", ids.join(", "))).dim()
            ));
        }
        println!("{}", line);
    }
}

pub async fn cmd_sync(project_dir: &Path) -> Result<ExitCode> {
    let config = Config::load(project_dir)?;
    let mut controller = build_controller(&config, false)?;
    let (ledger, report) = controller
        .sync()
        .await
        .context("Reconciliation failed")?;

    println!();
    if ledger.is_empty() {
        println!("No managed items found on the tracker.");
    } else {
        print_records(&ledger);
    }
    println!();

    if !report.imported.is_empty() {
        let imported: Vec<String> = report.imported.iter().map(|i| format!("{:03}", i)).collect();
        println!("Imported from tracker: {}", imported.join(", "));
    }
    for anomaly in &report.anomalies {
        println!("  {} {}", console::style("!").yellow(), anomaly);
    }
    println!(
        "Ledger {}.",
        if report.changed { "updated" } else { "unchanged" }
    );
    println!();
    Ok(ExitCode::SUCCESS)
}

pub fn cmd_status(project_dir: &Path) -> Result<ExitCode> {
    let config = Config::load(project_dir)?;
    let store = SequenceStore::open(&config.issues_dir())?;

    println!();
    println!(
        "Tracker: {} {}",
        config.provider(),
        config.target().unwrap_or("(not configured)")
    );
    println!("Marker label: {}", config.toml.queue.marker_label);
    println!(
        "Queue: {} file(s) in {}",
        store.list_indices().len(),
        store.dir().display()
    );
    println!();

    let Some(ledger) = load_ledger(&config)?.filter(|l| !l.is_empty()) else {
        println!("No ledger yet. Run 'promoter run' to promote the first file.");
        println!();
        return Ok(ExitCode::SUCCESS);
    };

    print_records(&ledger);
    println!();

    match ledger.last_completed_index() {
        Some(index) => println!("Completed through: {:03}", index),
        None => println!("Completed through: (none)"),
    }
    if let Some(record) = ledger.in_flight() {
        println!(
            "In flight: {:03} as {}",
            record.file_index, record.remote_item_id
        );
    } else {
        let next = match ledger.last_index() {
            Some(last) => store.next_index_after(last),
            None => store.first_index(),
        };
        match next {
            Some(index) => println!("Next to promote: {:03}", index),
            None => println!("Next to promote: (queue exhausted)"),
        }
    }
    println!();
    Ok(ExitCode::SUCCESS)
}

pub fn cmd_list(project_dir: &Path) -> Result<ExitCode> {
    let config = Config::load(project_dir)?;
    let store = SequenceStore::open(&config.issues_dir())?;

    if store.is_empty() {
        println!();
        println!(
            "No numbered work-item files found in {}",
            store.dir().display()
        );
        println!();
        return Ok(ExitCode::SUCCESS);
    }

    let ledger = load_ledger(&config)?.unwrap_or_default();

    println!();
    println!("{:<7} {:<30} Status", "File", "Name");
    println!("{:<7} {:<30} ------", "-----", "----------------------------");
    for index in store.list_indices() {
        let name = store
            .path_for(index)
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let status = match ledger.record(index) {
            Some(record) => format!("{} {}", status_label(record), record.remote_item_id),
            None if ledger.last_index().is_some_and(|last| index < last) => {
                console::style("skipped").dim().to_string()
            }
            None => console::style("pending").dim().to_string(),
        };
        println!("{:<7} {:<30} {}", format!("{:03}", index), name, status);
    }
    println!();
    Ok(ExitCode::SUCCESS)
}
