//! Configuration resolution for `SerialVault`.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/serialvault/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Complete `SerialVault` configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub keystore: KeystoreConfig,
    #[serde(default)]
    pub nonce: NonceConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database location.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

/// Which keystore backend new keys are generated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum KeystoreKind {
    /// Keys sealed in files on local storage.
    #[default]
    #[serde(rename = "filesystem")]
    Filesystem,
    /// Keys held inside a TPM 2.0 module.
    #[serde(rename = "tpm2.0")]
    Tpm2,
}

impl KeystoreKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::Tpm2 => "tpm2.0",
        }
    }
}

/// Keystore configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct KeystoreConfig {
    pub kind: KeystoreKind,
    /// Directory holding sealed software key files.
    pub path: Option<PathBuf>,
    /// Master secret the software backend derives its sealing key from.
    pub secret: Secret,
    pub tpm: TpmConfig,
}

/// Credentials for the TPM 2.0 module.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TpmConfig {
    /// `TPM2TOOLS_TCTI` string, e.g. `device:/dev/tpmrm0` or `swtpm:port=2321`.
    pub tcti: String,
    /// Owner hierarchy authorization value.
    pub owner_auth: Secret,
}

/// Device nonce lifetime.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NonceConfig {
    pub ttl_secs: i64,
    pub gc_interval_secs: u64,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            gc_interval_secs: 3600,
        }
    }
}

/// Signing engine limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Upper bound on a single keystore `sign` call.
    pub backend_timeout_secs: u64,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            backend_timeout_secs: 30,
        }
    }
}

/// Logging output.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// A secret string that is wiped on drop and never printed.
#[derive(Clone, Default)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

impl Config {
    /// Reject settings the services cannot run with, before anything is opened.
    pub fn validate(&self) -> Result<()> {
        let missing = match self.keystore.kind {
            KeystoreKind::Filesystem if self.keystore.secret.is_empty() => Some("keystore.secret"),
            KeystoreKind::Tpm2 if self.keystore.tpm.tcti.is_empty() => Some("keystore.tpm.tcti"),
            _ => None,
        };
        if let Some(field) = missing {
            return Err(Error::Config(format!(
                "{field} is required for the {} keystore",
                self.keystore.kind.as_str()
            )));
        }

        if self.nonce.ttl_secs <= 0 {
            return Err(Error::Config("nonce.ttl_secs must be positive".into()));
        }
        if self.nonce.gc_interval_secs == 0 {
            return Err(Error::Config("nonce.gc_interval_secs must be positive".into()));
        }
        if self.signing.backend_timeout_secs == 0 {
            return Err(Error::Config("signing.backend_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    /// Database file, falling back to the per-user default.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database
            .path
            .clone()
            .or_else(|| data_dir().map(|d| d.join("vault.db")))
    }

    /// Software keystore directory, falling back to the per-user default.
    pub fn keystore_path(&self) -> Option<PathBuf> {
        self.keystore
            .path
            .clone()
            .or_else(|| data_dir().map(|d| d.join("keystore")))
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicitly named file must exist; the global file is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut merged = serde_json::Value::Object(serde_json::Map::new());

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            merge_json(&mut merged, load_config_file(&global_path)?);
        }
    }

    if let Some(path) = explicit {
        merge_json(&mut merged, load_config_file(path)?);
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    config_home().map(|p| p.join("serialvault").join("settings.json"))
}

fn data_dir() -> Option<PathBuf> {
    config_home().map(|p| p.join("serialvault"))
}

fn config_home() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
}

fn load_config_file(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Deep-merge `overlay` onto `base`; objects merge key by key, everything
/// else is replaced.
fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                merge_json(base.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("SERIALVAULT_DB_PATH") {
        config.database.path = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("SERIALVAULT_KEYSTORE_PATH") {
        config.keystore.path = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("SERIALVAULT_KEYSTORE_SECRET") {
        config.keystore.secret = Secret::new(val);
    }
    if let Ok(val) = std::env::var("SERIALVAULT_TPM_TCTI") {
        config.keystore.tpm.tcti = val;
    }
    if let Ok(val) = std::env::var("SERIALVAULT_TPM_OWNER_AUTH") {
        config.keystore.tpm.owner_auth = Secret::new(val);
    }
    if let Ok(val) = std::env::var("SERIALVAULT_NONCE_TTL_SECS") {
        if let Ok(n) = val.parse() {
            config.nonce.ttl_secs = n;
        }
    }
    if let Ok(val) = std::env::var("SERIALVAULT_LOG_LEVEL") {
        config.logging.level = val;
    }
}
