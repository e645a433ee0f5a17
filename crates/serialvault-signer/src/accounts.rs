//! Account bootstrap and administration.

use serialvault_core::validate_model_name;
use tracing::info;

use crate::error::{Result, VaultError};
use crate::storage::{Account, VaultDatabase};

/// Operator-level account management. Accounts are created before any user
/// can be scoped to them, so these calls take no caller.
#[derive(Clone)]
pub struct AccountManager {
    db: VaultDatabase,
}

impl AccountManager {
    pub const fn new(db: VaultDatabase) -> Self {
        Self { db }
    }

    /// Create an account. Authority ids follow the model naming rule.
    pub async fn create(&self, authority_id: &str, display_name: &str) -> Result<Account> {
        validate_model_name(authority_id)?;
        let account = self.db.create_account(authority_id, display_name).await?;
        info!(authority_id = %authority_id, "Created account");
        Ok(account)
    }

    pub async fn get(&self, authority_id: &str) -> Result<Account> {
        Ok(self.db.get_account(authority_id).await?)
    }

    pub async fn list(&self) -> Result<Vec<Account>> {
        Ok(self.db.list_accounts().await?)
    }

    /// Enable or disable an account. A disabled account cannot sign or
    /// manage keys.
    pub async fn set_enabled(&self, authority_id: &str, enabled: bool) -> Result<()> {
        if !self.db.set_account_enabled(authority_id, enabled).await? {
            return Err(VaultError::NotFound(format!("Account {authority_id}")));
        }
        info!(authority_id = %authority_id, enabled, "Updated account");
        Ok(())
    }
}
