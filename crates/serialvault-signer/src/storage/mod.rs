//! SQLite storage for the `SerialVault` signer.
//!
//! Persists accounts, keypairs, models, substores, device nonces and the
//! signing log.

mod db;
mod models;
mod queries;
mod queries_keys;
mod queries_signing;

#[cfg(test)]
mod tests;

pub use db::{DatabaseError, VaultDatabase};
pub use models::*;
pub use queries_keys::NewKeypair;
pub use queries_signing::NewSigningLog;
