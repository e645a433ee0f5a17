//! Scope checks against stored accounts, models and substores.

use tracing::warn;

use super::scope::{AuthenticatedUser, Scope};
use crate::error::{Result, VaultError};
use crate::storage::{Account, Model, Substore, VaultDatabase};

/// Resolves what a caller may touch.
#[derive(Clone)]
pub struct Authorizer {
    db: VaultDatabase,
}

impl Authorizer {
    pub const fn new(db: VaultDatabase) -> Self {
        Self { db }
    }

    /// Require an account-level caller of `authority_id` whose account is
    /// enabled. Substore-scoped callers never pass.
    pub async fn require_account(
        &self,
        caller: &AuthenticatedUser,
        authority_id: &str,
    ) -> Result<Account> {
        if !caller.is_account_of(authority_id) {
            warn!(
                user = %caller.username(),
                authority_id = %authority_id,
                "Refused account-level operation"
            );
            return Err(VaultError::unauthorized(format!(
                "account scope over {authority_id} required"
            )));
        }
        self.enabled_account(authority_id).await
    }

    /// Resolve `model_name` under `authority_id` for a caller about to act on
    /// it. Account callers reach every model of their account; substore
    /// callers only the model of their enabled substore.
    pub async fn authorize_model(
        &self,
        caller: &AuthenticatedUser,
        authority_id: &str,
        model_name: &str,
    ) -> Result<Model> {
        if caller.authority_id() != authority_id {
            return Err(refuse_model(caller, authority_id, model_name));
        }
        self.enabled_account(authority_id).await?;

        let model = match caller.scope() {
            Scope::Account { .. } => self.db.get_model_by_name(authority_id, model_name).await?,
            Scope::Substore { model_id, .. } => match self.granted_substore(caller).await? {
                Some(substore) if substore.model_name == model_name => {
                    Some(self.db.get_model(*model_id).await?)
                }
                _ => None,
            },
        };

        model.ok_or_else(|| refuse_model(caller, authority_id, model_name))
    }

    /// The enabled substore a substore-scoped caller was granted, if it still
    /// exists under the caller's account. `None` for account callers.
    pub async fn granted_substore(&self, caller: &AuthenticatedUser) -> Result<Option<Substore>> {
        let Scope::Substore { store_id, model_id } = caller.scope() else {
            return Ok(None);
        };

        let substore = self
            .db
            .find_substore(store_id, *model_id)
            .await?
            .filter(|s| s.is_enabled() && s.brand_id == caller.authority_id());
        Ok(substore)
    }

    async fn enabled_account(&self, authority_id: &str) -> Result<Account> {
        let account = self.db.get_account(authority_id).await?;
        if !account.is_enabled() {
            warn!(authority_id = %authority_id, "Refused operation on disabled account");
            return Err(VaultError::unauthorized(format!("account {authority_id} is disabled")));
        }
        Ok(account)
    }
}

fn refuse_model(caller: &AuthenticatedUser, authority_id: &str, model_name: &str) -> VaultError {
    warn!(
        user = %caller.username(),
        authority_id = %authority_id,
        model = %model_name,
        "Refused model outside caller scope"
    );
    VaultError::ModelNotAuthorized(model_name.to_string())
}
