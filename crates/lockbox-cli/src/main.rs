mod cli;
mod config;
mod objects;
mod policy;
mod storage;

use std::{
    io,
    path::{Path, PathBuf},
};

use crate::cli::{Command, ConfigCommand};
use chrono::Utc;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use lockbox_core::store::ObjectStore;
use lockbox_vault::{ExpiryReaper, VaultService};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load(cli.config.as_deref())?;
    match cli.command {
        Command::Put {
            file,
            password,
            name,
        } => {
            let password = resolve_password(password)?;
            let vault = storage::vault_from_config(&config)?;
            let id = objects::put(&vault, &config.upload, &file, name, &password).await?;
            println!("{id}");
        }
        Command::Get {
            id,
            password,
            out,
            session,
            show,
        } => {
            let vault = storage::vault_from_config(&config)?;
            let request = objects::GetRequest {
                id,
                password,
                out,
                session,
                show,
            };
            objects::get(&vault, request, &mut io::stdin().lock(), &mut io::stdout().lock())
                .await?;
        }
        Command::Status { id, json } => {
            let vault = storage::vault_from_config(&config)?;
            objects::status(&vault, &id, json).await?;
        }
        Command::Sweep => run_sweep(&config).await?,
        Command::Reaper => run_reaper(&config).await?,
        Command::Health => run_health_check(&config).await?,
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(cli.config.as_deref(), &config)?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters; logs go to stderr so stdout stays scriptable.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("lockbox {}", env!("CARGO_PKG_VERSION"));
}

fn resolve_password(flag: Option<String>) -> Result<String> {
    match flag {
        Some(password) => Ok(password),
        None => objects::read_password(&mut io::stdin().lock(), "Password: ")?
            .ok_or_else(|| eyre!("no password provided")),
    }
}

async fn run_sweep(config: &config::Config) -> Result<()> {
    let store = storage::store_from_config(config)?;
    let report = ExpiryReaper::new(store, &config.vault)
        .sweep(Utc::now())
        .await?;
    println!(
        "Scanned {}, removed {}, failed {}",
        report.scanned, report.removed, report.failed
    );
    Ok(())
}

async fn run_reaper(config: &config::Config) -> Result<()> {
    let store = storage::store_from_config(config)?;
    let handle = ExpiryReaper::new(store, &config.vault).spawn();
    info!("expiry reaper running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    handle.shutdown().await;
    Ok(())
}

/// Runs a quick store/retrieve/delete cycle against the configured vault.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let vault = storage::vault_from_config(config)?;
    run_vault_health(&vault).await?;
    println!("Vault: ok");
    Ok(())
}

async fn run_vault_health<S: ObjectStore>(vault: &VaultService<S>) -> Result<()> {
    let payload = b"ok";
    let password = "health-check";
    let session = "health";
    let now = Utc::now();

    let id = vault.store(payload, password, "health.check", now).await?;
    let round_trip = vault.retrieve(&id.to_string(), password, session, now).await;
    vault.store_handle().delete(&id).await?;
    vault.end_session(session);

    if round_trip?.plaintext() != payload {
        color_eyre::eyre::bail!("vault round-trip failed");
    }
    Ok(())
}

fn init_config(path: Option<&Path>, config: &config::Config) -> Result<()> {
    let path: PathBuf = match path {
        Some(path) => path.to_path_buf(),
        None => config::default_path()?,
    };
    let path = config::write_default_if_missing(config, &path)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
