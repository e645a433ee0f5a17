//! Data models for `SerialVault` storage.

use serde::{Deserialize, Serialize};
use serialvault_keystore::{BackendKind, KeyHandle, KeystoreError};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub authority_id: String,
    pub display_name: String,
    pub enabled: i64,
    pub created_at: i64,
}

impl Account {
    pub const fn is_enabled(&self) -> bool {
        self.enabled != 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Keypair {
    pub key_id: String,
    pub authority_id: String,
    pub purpose: String,
    pub backend: String,
    pub handle_ref: String,
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    pub active: i64,
    pub disabled: i64,
    pub created_at: i64,
}

impl Keypair {
    pub const fn is_active(&self) -> bool {
        self.active != 0
    }

    pub const fn is_disabled(&self) -> bool {
        self.disabled != 0
    }

    /// Rebuild the backend handle this keypair was stored with.
    pub fn handle(&self) -> Result<KeyHandle, KeystoreError> {
        let backend: BackendKind = self.backend.parse()?;
        Ok(KeyHandle::new(self.key_id.clone(), backend, self.handle_ref.clone()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Model {
    pub id: i64,
    pub brand_id: String,
    pub name: String,
    pub key_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A substore joined with the model it is bound to.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Substore {
    pub id: i64,
    pub store_id: String,
    pub model_id: i64,
    pub model_name: String,
    pub brand_id: String,
    pub enabled: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Substore {
    pub const fn is_enabled(&self) -> bool {
        self.enabled != 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceNonce {
    pub nonce: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub consumed_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SigningLog {
    pub id: i64,
    pub make: String,
    pub model: String,
    pub serial_number: String,
    pub fingerprint: Option<String>,
    pub nonce: Option<String>,
    pub key_id: Option<String>,
    pub outcome: String,
    pub created_at: i64,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
