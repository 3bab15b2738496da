use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use ratchet::artifact::Revision;
use ratchet::config::Config;
use ratchet::controller::{Stores, collect_garbage};
use ratchet::domain::{Run, RunStatus};
use ratchet::events::JsonlEventLog;
use ratchet::ledger::EntryStatus;

mod cli;

use cli::Cli;
use cli::commands::Commands;

fn setup_logging(default_filter: &str) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ratchet")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("ratchet.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the configured level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{} {}", "Storage root:".yellow(), config.storage.root.display());
    }

    match &cli.command {
        None => handle_runs_command(None, config),
        Some(Commands::Runs { status }) => handle_runs_command(status.as_deref(), config),
        Some(Commands::Ledger { run_id, step }) => handle_ledger_command(run_id, step.as_deref(), config),
        Some(Commands::Artifact {
            namespace,
            name,
            revision,
        }) => handle_artifact_command(namespace, name, *revision, config),
        Some(Commands::Artifacts { namespace }) => handle_artifacts_command(namespace, config),
        Some(Commands::Events { run }) => handle_events_command(run.as_deref(), config),
        Some(Commands::Gc { run_id }) => handle_gc_command(run_id, config),
        Some(Commands::Config) => handle_config_command(config),
    }
}

fn open_stores(config: &Config) -> Result<Stores> {
    config.storage.open()
}

fn status_label(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Active => status.as_str().cyan(),
        RunStatus::Completed => status.as_str().green(),
        RunStatus::Failed => status.as_str().red(),
        RunStatus::Escalated => status.as_str().yellow(),
        RunStatus::Exhausted => status.as_str().magenta(),
    }
}

fn print_run(run: &Run) {
    let failure = run.failure.as_ref().map(|f| format!("  ({})", f)).unwrap_or_default();
    println!(
        "{}  {:<10}  {}  iteration {}{}",
        run.id.bold(),
        status_label(run.status),
        run.work_unit_key,
        run.iteration,
        failure.dimmed()
    );
}

fn handle_runs_command(status: Option<&str>, config: &Config) -> Result<()> {
    info!("Listing runs - status: {:?}", status);
    let stores = open_stores(config)?;
    let runs = match status {
        Some(s) => {
            let status: RunStatus = s.parse()?;
            stores.runs.list_by_status(status)?
        }
        None => stores.runs.list()?,
    };

    if runs.is_empty() {
        println!("{}", "No runs".dimmed());
    }
    for run in &runs {
        print_run(run);
    }
    Ok(())
}

fn handle_ledger_command(run_id: &str, step: Option<&str>, config: &Config) -> Result<()> {
    info!("Showing ledger for run: {} (step: {:?})", run_id, step);
    let stores = open_stores(config)?;
    let run = stores.runs.get(run_id).context(format!("Unknown run {}", run_id))?;
    print_run(&run);

    let entries = match step {
        Some(step) => stores.ledger.step_history(run_id, step)?,
        None => stores.ledger.history(run_id)?,
    };
    for entry in &entries {
        let status = match entry.status {
            EntryStatus::Ok => entry.status.as_str().green(),
            EntryStatus::Error => entry.status.as_str().red(),
        };
        println!(
            "  [{}] {:<16} {:<5} {}  {}",
            entry.iteration,
            entry.step,
            status,
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            serde_json::to_string(&entry.payload)?.dimmed()
        );
    }
    Ok(())
}

fn handle_artifact_command(namespace: &str, name: &str, revision: Option<u64>, config: &Config) -> Result<()> {
    info!("Reading artifact {}/{} at {:?}", namespace, name, revision);
    let stores = open_stores(config)?;
    let artifact = stores.artifacts.get(namespace, name, Revision::from(revision))?;

    match artifact.text() {
        Some(text) => println!("{}", text),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&artifact.content).context("Failed to write artifact")?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn handle_artifacts_command(namespace: &str, config: &Config) -> Result<()> {
    info!("Listing artifacts in {}", namespace);
    let stores = open_stores(config)?;
    let mut artifacts = stores.artifacts.list(namespace)?;
    artifacts.sort_by(|a, b| a.name.cmp(&b.name));

    if artifacts.is_empty() {
        println!("{}", "No artifacts".dimmed());
    }
    for meta in &artifacts {
        println!(
            "{}@{}  {} bytes  {}",
            meta.name.bold(),
            meta.revision,
            meta.size,
            &meta.content_hash[..12.min(meta.content_hash.len())]
        );
    }
    Ok(())
}

fn handle_events_command(run: Option<&str>, config: &Config) -> Result<()> {
    info!("Showing events (run: {:?})", run);
    let path = config.storage.paths().events;
    if !path.exists() {
        println!("{}", "No events".dimmed());
        return Ok(());
    }
    for event in JsonlEventLog::read(&path, run)? {
        println!(
            "{}  {:<20} {}  {}",
            event.created_at,
            event.event_type.cyan(),
            event.run_id.as_deref().unwrap_or("-"),
            serde_json::to_string(&event.payload)?.dimmed()
        );
    }
    Ok(())
}

fn handle_gc_command(run_id: &str, config: &Config) -> Result<()> {
    info!("Collecting garbage for run: {}", run_id);
    let stores = open_stores(config)?;
    let removed = collect_garbage(&stores, run_id).context(format!("Failed to collect run {}", run_id))?;
    println!("{} {} artifact revisions of {}", "Purged".green(), removed, run_id);
    Ok(())
}

fn handle_config_command(config: &Config) -> Result<()> {
    print!("{}", serde_yaml::to_string(config).context("Failed to render config")?);
    Ok(())
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(config.log_filter()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}
