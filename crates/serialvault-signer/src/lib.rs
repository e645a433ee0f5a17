//! `SerialVault` Signer Library
//!
//! Key management and signing core for device serial assertions:
//! - `SQLite` storage for accounts, keypairs, models, substores, nonces and
//!   the signing log
//! - Authorization over account and substore scopes
//! - Key registry with one active key per authority and purpose
//! - Nonce ledger with atomic single-use consumption
//! - Signing engine writing one audit entry per attempt

pub mod accounts;
pub mod audit;
pub mod auth;
pub mod engine;
pub mod error;
pub mod models;
pub mod nonce;
pub mod registry;
pub mod storage;
pub mod substore;
pub mod vault;

pub use accounts::AccountManager;
pub use audit::{AuditEntry, AuditLog, SigningOutcome};
pub use auth::{AuthenticatedUser, Scope};
pub use engine::{SignRequest, SignedAssertion, SigningEngine};
pub use error::{ErrorKind, NonceError, Result, VaultError};
pub use models::ModelManager;
pub use nonce::NonceLedger;
pub use registry::KeyRegistry;
pub use storage::VaultDatabase;
pub use substore::{SubstoreManager, SubstoreUpdate};
pub use vault::{Vault, VaultSettings};
