//! Operator subcommands.
//!
//! The operator acts as an account-level user of whichever authority a
//! command names. Results are printed as JSON on stdout.

use std::io::Write as _;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use serialvault_core::Config;
use serialvault_keystore::{BackendKind, KeyPurpose};
use serialvault_signer::{AuthenticatedUser, SignRequest, Vault};

const OPERATOR: &str = "operator";

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Create the database, run migrations and check the keystore.
    Init,

    /// Manage accounts.
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },

    /// Manage signing keys.
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Manage device models.
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },

    /// Manage substores.
    Substore {
        #[command(subcommand)]
        action: SubstoreAction,
    },

    /// Issue a device nonce.
    Nonce,

    /// Sign a serial assertion.
    Sign {
        #[arg(long)]
        authority_id: String,
        #[arg(long)]
        model: String,
        #[arg(long)]
        serial: String,
        /// Nonce previously issued with `nonce`.
        #[arg(long)]
        nonce: String,
    },

    /// Show signing log entries.
    Log {
        #[arg(long)]
        authority_id: String,
        /// Only entries for this serial number.
        #[arg(long, conflicts_with = "fingerprint")]
        serial: Option<String>,
        /// Only entries for this payload fingerprint.
        #[arg(long)]
        fingerprint: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Delete expired, unused nonces.
    Gc {
        /// Keep running, collecting every `nonce.gc_interval_secs`.
        #[arg(long)]
        watch: bool,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum AccountAction {
    /// Create an account.
    Create {
        #[arg(long)]
        authority_id: String,
        #[arg(long)]
        name: String,
    },
    /// List accounts.
    List,
}

#[derive(clap::Subcommand, Debug)]
pub enum KeyAction {
    /// Generate a key in the configured keystore.
    Generate {
        #[arg(long)]
        authority_id: String,
        /// `serial` or `system-user`.
        #[arg(long, default_value = "serial")]
        purpose: KeyPurpose,
    },
    /// Make a key the active one for its purpose.
    Activate {
        #[arg(long)]
        authority_id: String,
        #[arg(long)]
        key_id: String,
    },
    /// Disable a key. It can never be activated again.
    Disable {
        #[arg(long)]
        authority_id: String,
        #[arg(long)]
        key_id: String,
    },
    /// List an account's keys.
    List {
        #[arg(long)]
        authority_id: String,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ModelAction {
    /// Create a model.
    Create {
        #[arg(long)]
        authority_id: String,
        #[arg(long)]
        name: String,
        /// Keypair to assign.
        #[arg(long)]
        key_id: Option<String>,
    },
    /// List an account's models.
    List {
        #[arg(long)]
        authority_id: String,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum SubstoreAction {
    /// Bind a store identity to a model.
    Create {
        #[arg(long)]
        authority_id: String,
        #[arg(long)]
        model: String,
        #[arg(long)]
        store_id: String,
    },
    /// List an account's substores.
    List {
        #[arg(long)]
        authority_id: String,
    },
}

/// Execute a subcommand.
pub async fn run(vault: &Vault, config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Init => {
            let mut status = Vec::new();
            for kind in [BackendKind::Software, BackendKind::Hardware] {
                status.push(json!({
                    "backend": kind.as_str(),
                    "available": vault.registry.is_available(kind).await,
                }));
            }
            print_json(&json!({ "initialized": true, "keystores": status }))
        }
        Command::Account { action } => run_account(vault, action).await,
        Command::Key { action } => run_key(vault, action).await,
        Command::Model { action } => run_model(vault, action).await,
        Command::Substore { action } => run_substore(vault, action).await,
        Command::Nonce => print_json(&vault.nonces.issue().await?),
        Command::Sign {
            authority_id,
            model,
            serial,
            nonce,
        } => {
            let caller = operator(&authority_id);
            let request = SignRequest::new(model, serial, nonce);
            let signed = vault.engine.sign(&caller, &authority_id, request).await?;
            print_json(&json!({
                "payload": signed.payload,
                "signature": signed.signature.to_hex(),
                "fingerprint": signed.fingerprint,
                "key_id": signed.key_id,
                "log_id": signed.log_id,
            }))
        }
        Command::Log {
            authority_id,
            serial,
            fingerprint,
            limit,
            offset,
        } => {
            let caller = operator(&authority_id);
            let entries = match (serial, fingerprint) {
                (Some(serial), _) => {
                    vault
                        .audit
                        .list_by_serial(&caller, &authority_id, &serial)
                        .await?
                }
                (None, Some(fingerprint)) => {
                    vault
                        .audit
                        .list_by_fingerprint(&caller, &authority_id, &fingerprint)
                        .await?
                }
                (None, None) => {
                    vault
                        .audit
                        .list_for_account(&caller, &authority_id, limit, offset)
                        .await?
                }
            };
            print_json(&entries)
        }
        Command::Gc { watch } => {
            let removed = vault.nonces.collect_expired().await?;
            info!(removed, "Collected expired nonces");
            if watch {
                collect_forever(vault, Duration::from_secs(config.nonce.gc_interval_secs)).await;
            }
            print_json(&json!({ "removed": removed }))
        }
    }
}

async fn run_account(vault: &Vault, action: AccountAction) -> Result<()> {
    match action {
        AccountAction::Create { authority_id, name } => {
            print_json(&vault.accounts.create(&authority_id, &name).await?)
        }
        AccountAction::List => print_json(&vault.accounts.list().await?),
    }
}

async fn run_key(vault: &Vault, action: KeyAction) -> Result<()> {
    match action {
        KeyAction::Generate {
            authority_id,
            purpose,
        } => {
            let caller = operator(&authority_id);
            let keypair = vault
                .registry
                .generate(&caller, &authority_id, purpose)
                .await?;
            print_json(&keypair)
        }
        KeyAction::Activate {
            authority_id,
            key_id,
        } => {
            let caller = operator(&authority_id);
            let keypair = vault
                .registry
                .activate(&caller, &authority_id, &key_id)
                .await?;
            print_json(&keypair)
        }
        KeyAction::Disable {
            authority_id,
            key_id,
        } => {
            let caller = operator(&authority_id);
            vault
                .registry
                .disable(&caller, &authority_id, &key_id)
                .await?;
            print_json(&json!({ "key_id": key_id, "disabled": true }))
        }
        KeyAction::List { authority_id } => {
            let caller = operator(&authority_id);
            print_json(&vault.registry.list(&caller, &authority_id).await?)
        }
    }
}

async fn run_model(vault: &Vault, action: ModelAction) -> Result<()> {
    match action {
        ModelAction::Create {
            authority_id,
            name,
            key_id,
        } => {
            let caller = operator(&authority_id);
            let model = vault
                .models
                .create(&caller, &authority_id, &name, key_id.as_deref())
                .await?;
            print_json(&model)
        }
        ModelAction::List { authority_id } => {
            let caller = operator(&authority_id);
            print_json(&vault.models.list(&caller, &authority_id).await?)
        }
    }
}

async fn run_substore(vault: &Vault, action: SubstoreAction) -> Result<()> {
    match action {
        SubstoreAction::Create {
            authority_id,
            model,
            store_id,
        } => {
            let caller = operator(&authority_id);
            let substore = vault
                .substores
                .create(&caller, &authority_id, &model, &store_id)
                .await?;
            print_json(&substore)
        }
        SubstoreAction::List { authority_id } => {
            let caller = operator(&authority_id);
            print_json(&vault.substores.list(&caller, &authority_id).await?)
        }
    }
}

/// Collect expired nonces on an interval until the process is stopped.
async fn collect_forever(vault: &Vault, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await; // Skip first immediate tick
    loop {
        interval.tick().await;
        match vault.nonces.collect_expired().await {
            Ok(removed) if removed > 0 => {
                info!(removed, "Background nonce collection completed");
            }
            Err(e) => {
                warn!(error = %e, "Background nonce collection failed");
            }
            _ => {}
        }
    }
}

fn operator(authority_id: &str) -> AuthenticatedUser {
    AuthenticatedUser::account(OPERATOR, authority_id)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}
