mod api;
mod cli;
mod config;
mod dispatch;
mod store;

use crate::cli::{Cli, Commands, ConfigCommands};
use crate::config::Config;
use crate::dispatch::{CommandRequest, Dispatcher};
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => handle_serve().await,
        Commands::Status => handle_status(),
        Commands::Config { command } => handle_config_command(command),
        Commands::Export { out } => handle_export(&out),
        Commands::Import { file } => handle_import(&file),
    }
}

async fn handle_serve() -> Result<()> {
    let config = load_or_default_config()?;
    config.ensure_bootstrap_files()?;

    let dispatcher = Arc::new(Mutex::new(Dispatcher::open(&config)?));
    let shared_config = Arc::new(config);

    tokio::select! {
        server_result = api::run_server(Arc::clone(&shared_config), Arc::clone(&dispatcher)) => {
            server_result?;
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    match Arc::try_unwrap(dispatcher) {
        Ok(mutex) => mutex.into_inner().shutdown()?,
        Err(_) => warn!("dispatcher handle still shared at shutdown; stores not closed"),
    }

    Ok(())
}

fn handle_status() -> Result<()> {
    let config = load_or_default_config()?;
    config.ensure_bootstrap_files()?;

    println!("novastore status");
    println!("- config: {}", Config::config_path().display());
    for (label, path) in [
        ("history_db", &config.history_db_path),
        ("bookmarks_db", &config.bookmarks_db_path),
        ("preferences", &config.preferences_path),
    ] {
        let state = if path.exists() { "present" } else { "missing" };
        println!("- {label}: {} ({state})", path.display());
    }
    println!("- api_port: {}", config.api_port);

    let dispatcher = Dispatcher::open(&config)?;
    let stats = dispatcher.stats()?;
    println!("- visit_rows: {}", stats.visit_rows);
    println!("- bookmark_rows: {}", stats.bookmark_rows);
    println!("- folder_rows: {}", stats.folder_rows);
    dispatcher.shutdown()?;

    Ok(())
}

fn handle_config_command(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Set { key, value } => {
            let mut config = load_or_default_config()?;
            config.set_value(&key, &value)?;
            config.ensure_bootstrap_files()?;
            config.save()?;

            println!("Config saved: {key} = {value}");
            Ok(())
        }
        ConfigCommands::Get { key } => {
            let config = load_or_default_config()?;
            let value = config
                .get_value(&key)
                .with_context(|| format!("Unsupported config key: {key}"))?;

            println!("{value}");
            Ok(())
        }
    }
}

fn handle_export(out: &Path) -> Result<()> {
    let config = load_or_default_config()?;
    config.ensure_bootstrap_files()?;
    let mut dispatcher = Dispatcher::open(&config)?;

    let snapshot = run_command(&mut dispatcher, "bookmarks:export", vec![])?;
    let content =
        serde_json::to_string_pretty(&snapshot).context("Failed to serialize bookmark snapshot")?;
    fs::write(out, content)
        .with_context(|| format!("Failed to write snapshot file: {}", out.display()))?;

    dispatcher.shutdown()?;
    println!("Bookmark snapshot written: {}", out.display());
    Ok(())
}

fn handle_import(file: &Path) -> Result<()> {
    let config = load_or_default_config()?;
    config.ensure_bootstrap_files()?;

    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read snapshot file: {}", file.display()))?;
    let payload: serde_json::Value =
        serde_json::from_str(&content).context("Failed to parse snapshot file")?;

    let mut dispatcher = Dispatcher::open(&config)?;
    run_command(&mut dispatcher, "bookmarks:import", vec![payload])?;
    dispatcher.shutdown()?;

    println!("Bookmark snapshot imported: {}", file.display());
    Ok(())
}

fn run_command(
    dispatcher: &mut Dispatcher,
    command: &str,
    args: Vec<serde_json::Value>,
) -> Result<serde_json::Value> {
    let response = dispatcher.dispatch(&CommandRequest {
        command: command.to_string(),
        args,
    });

    if !response.ok {
        let detail = response
            .error
            .map(|failure| format!("{:?}: {}", failure.category, failure.message))
            .unwrap_or_else(|| "no failure detail".to_string());
        bail!("{command} failed ({detail})");
    }

    Ok(response.result.unwrap_or(serde_json::Value::Null))
}

fn load_or_default_config() -> Result<Config> {
    Config::load().or_else(|_| {
        let config = Config::default();
        config.ensure_bootstrap_files()?;
        config.save()?;
        Ok(config)
    })
}
