use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use warden::bus::{EventData, Topic};
use warden::config::Config;
use warden::discovery;
use warden::supervisor::Supervisor;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("warden")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("warden.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None => run_supervisor(None, cli.is_verbose(), config).await,
        Some(Commands::Run { base_dir }) => {
            run_supervisor(base_dir.clone(), cli.is_verbose(), config).await
        }
        Some(Commands::Discover { base_dir }) => handle_discover_command(base_dir.clone(), config).await,
    }
}

fn resolve_base_dir(flag: Option<PathBuf>, config: &Config) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    if let Some(dir) = &config.base_dir {
        return Ok(dir.clone());
    }
    std::env::current_dir().context("Failed to resolve current directory")
}

async fn run_supervisor(base_dir: Option<PathBuf>, verbose: bool, config: &Config) -> Result<()> {
    let base_dir = resolve_base_dir(base_dir, config)?;
    info!("Running supervisor with base dir: {}", base_dir.display());

    let discovery = discovery::discover(&base_dir).await;
    if verbose {
        for diagnostic in &discovery.diagnostics {
            println!("{} {}", "discovery:".yellow(), diagnostic);
        }
    }

    let supervisor = Supervisor::new(config, &discovery);
    let mut subscriptions = Vec::new();

    subscriptions.push(supervisor.bus().subscribe(Topic::Started, |event| {
        println!("{} {}", "started:".green(), event.key);
    }));
    subscriptions.push(supervisor.bus().subscribe(Topic::Failed, |event| {
        println!("{} {}", "failed:".red(), event.key);
    }));
    for key in supervisor.keys() {
        subscriptions.push(supervisor.bus().subscribe(Topic::Output(key.clone()), |event| {
            if let EventData::Output(chunk) = &event.data {
                print!("{} {}", format!("[{}]", event.key).cyan(), chunk);
            }
        }));
        subscriptions.push(supervisor.bus().subscribe(Topic::Stderr(key.clone()), |event| {
            if let EventData::Stderr(chunk) = &event.data {
                eprint!("{} {}", format!("[{}]", event.key).red(), chunk);
            }
        }));
        subscriptions.push(supervisor.bus().subscribe(Topic::Status(key), |event| {
            if let EventData::StatusChanged { from, to } = &event.data {
                info!("{}: {} -> {}", event.key, from, to);
            }
        }));
    }

    println!("{}", "Starting all instances...".cyan());
    supervisor.start_all().await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    println!("{}", "Shutting down...".cyan());
    supervisor.shutdown().await;
    for subscription in subscriptions {
        subscription.unsubscribe();
    }
    Ok(())
}

async fn handle_discover_command(base_dir: Option<PathBuf>, config: &Config) -> Result<()> {
    let base_dir = resolve_base_dir(base_dir, config)?;
    let discovery = discovery::discover(&base_dir).await;

    let report = serde_json::json!({
        "settings": discovery.settings,
        "working_dirs": discovery.working_dirs,
        "diagnostics": discovery.diagnostics,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging()?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref())?;

    run_application(&cli, &config).await
}
