//! One handle over every signer service, sharing a database and backends.

use std::sync::Arc;
use std::time::Duration;

use serialvault_core::Config;
use serialvault_keystore::KeystoreBackend;

use crate::accounts::AccountManager;
use crate::audit::AuditLog;
use crate::engine::SigningEngine;
use crate::models::ModelManager;
use crate::nonce::NonceLedger;
use crate::registry::KeyRegistry;
use crate::storage::VaultDatabase;
use crate::substore::SubstoreManager;

/// Tunables the services need from configuration.
#[derive(Debug, Clone, Copy)]
pub struct VaultSettings {
    pub nonce_ttl_secs: i64,
    pub backend_timeout: Duration,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            nonce_ttl_secs: 600,
            backend_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&Config> for VaultSettings {
    fn from(config: &Config) -> Self {
        Self {
            nonce_ttl_secs: config.nonce.ttl_secs,
            backend_timeout: Duration::from_secs(config.signing.backend_timeout_secs),
        }
    }
}

#[derive(Clone)]
pub struct Vault {
    pub accounts: AccountManager,
    pub registry: KeyRegistry,
    pub models: ModelManager,
    pub substores: SubstoreManager,
    pub nonces: NonceLedger,
    pub audit: AuditLog,
    pub engine: SigningEngine,
}

impl Vault {
    /// Wire the services together. The first backend receives new keys.
    pub fn new(
        db: &VaultDatabase,
        backends: Vec<Arc<dyn KeystoreBackend>>,
        settings: VaultSettings,
    ) -> Self {
        let registry = KeyRegistry::new(db.clone(), backends);
        let nonces = NonceLedger::new(db.clone(), settings.nonce_ttl_secs);
        let audit = AuditLog::new(db.clone());
        let engine = SigningEngine::new(
            db.clone(),
            registry.clone(),
            nonces.clone(),
            audit.clone(),
            settings.backend_timeout,
        );

        Self {
            accounts: AccountManager::new(db.clone()),
            models: ModelManager::new(db.clone()),
            substores: SubstoreManager::new(db.clone()),
            registry,
            nonces,
            audit,
            engine,
        }
    }
}
