//! `SQLite` database for the `SerialVault` signer.

pub use serialvault_core::db::DatabaseError;

serialvault_core::define_database!(VaultDatabase, "Vault database migrations complete");

impl std::fmt::Debug for VaultDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultDatabase").finish_non_exhaustive()
    }
}
