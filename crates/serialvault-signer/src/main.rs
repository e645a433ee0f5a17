//! `SerialVault` Signer
//!
//! Operator binary for the signing core: manages accounts, keys, models and
//! substores, issues nonces, signs serial assertions and reads the log.

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use serialvault_core::config::load_config;
use serialvault_core::tracing_init::init_tracing;
use serialvault_core::{Config, KeystoreKind};
use serialvault_keystore::{
    HardwareBackend, KeystoreBackend, SoftwareBackend, Tpm2ToolsModule, TpmCredentials, TpmSession,
};
use serialvault_signer::{Vault, VaultDatabase, VaultSettings};

#[derive(Parser, Debug)]
#[command(name = "serialvault-signer")]
#[command(version, about = "SerialVault signing service - keys, nonces and serial assertions")]
struct Args {
    /// Settings file layered over the global one.
    #[arg(long, env = "SERIALVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Path to SQLite database file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: commands::Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(path) = args.db_path {
        config.database.path = Some(path);
    }
    if args.log_json {
        config.logging.json = true;
    }
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        keystore = config.keystore.kind.as_str(),
        "Starting serialvault-signer"
    );

    let db_path = config
        .database_path()
        .context("Cannot determine database path")?;
    let db = VaultDatabase::open(&db_path).await?;

    let backends = open_keystores(&config).await?;
    let vault = Vault::new(&db, backends, VaultSettings::from(&config));

    commands::run(&vault, &config, args.command).await
}

/// Open the configured keystore. Hardware setup failures are fatal; there is
/// no retry.
async fn open_keystores(config: &Config) -> anyhow::Result<Vec<Arc<dyn KeystoreBackend>>> {
    let mut backends: Vec<Arc<dyn KeystoreBackend>> = Vec::new();

    if config.keystore.kind == KeystoreKind::Tpm2 {
        backends.push(open_tpm(config).await?);
    }

    // Software keys stay signable after a move to hardware as long as the
    // secret is still configured.
    if !config.keystore.secret.is_empty() {
        let dir = config
            .keystore_path()
            .context("Cannot determine keystore directory")?;
        let software = SoftwareBackend::new(dir, config.keystore.secret.expose().as_bytes())?;
        backends.push(Arc::new(software));
    }

    anyhow::ensure!(!backends.is_empty(), "No keystore configured");
    Ok(backends)
}

async fn open_tpm(config: &Config) -> anyhow::Result<Arc<dyn KeystoreBackend>> {
    let session = Arc::new(TpmSession::new(
        Arc::new(Tpm2ToolsModule::new()),
        TpmCredentials::new(
            config.keystore.tpm.tcti.clone(),
            config.keystore.tpm.owner_auth.expose(),
        ),
    ));

    let init = Arc::clone(&session);
    tokio::task::spawn_blocking(move || init.initialize())
        .await?
        .context("TPM 2.0 initialization failed")?;

    Ok(Arc::new(HardwareBackend::new(session)?))
}
