//! Substores: store identities bound to a single model.
//!
//! Only account-level users create or change substores. A substore-scoped
//! user sees exactly its own substore and nothing else.

use serialvault_core::validate_model_name;
use tracing::info;

use crate::auth::{AuthenticatedUser, Authorizer};
use crate::error::{Result, VaultError};
use crate::storage::{Substore, VaultDatabase};

/// Changes to apply to a substore; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct SubstoreUpdate {
    pub store_id: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Clone)]
pub struct SubstoreManager {
    db: VaultDatabase,
    authorizer: Authorizer,
}

impl SubstoreManager {
    pub fn new(db: VaultDatabase) -> Self {
        Self {
            authorizer: Authorizer::new(db.clone()),
            db,
        }
    }

    /// Bind `store_id` to the account's model `model_name`.
    pub async fn create(
        &self,
        caller: &AuthenticatedUser,
        authority_id: &str,
        model_name: &str,
        store_id: &str,
    ) -> Result<Substore> {
        validate_model_name(store_id)?;
        self.authorizer
            .require_account(caller, authority_id)
            .await?;
        let model = self
            .db
            .get_model_by_name(authority_id, model_name)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("Model {model_name}")))?;

        let substore = self.db.create_substore(store_id, model.id).await?;
        info!(
            authority_id = %authority_id,
            store_id = %store_id,
            model = %model_name,
            id = substore.id,
            "Created substore"
        );
        Ok(substore)
    }

    /// Substores visible to the caller.
    pub async fn list(
        &self,
        caller: &AuthenticatedUser,
        authority_id: &str,
    ) -> Result<Vec<Substore>> {
        if caller.is_account_of(authority_id) {
            self.authorizer
                .require_account(caller, authority_id)
                .await?;
            return Ok(self.db.list_substores(authority_id).await?);
        }
        if caller.authority_id() != authority_id {
            return Err(VaultError::unauthorized(format!(
                "no access to substores of {authority_id}"
            )));
        }
        Ok(self
            .authorizer
            .granted_substore(caller)
            .await?
            .into_iter()
            .collect())
    }

    /// One substore, if the caller's scope covers it.
    pub async fn get(
        &self,
        caller: &AuthenticatedUser,
        authority_id: &str,
        id: i64,
    ) -> Result<Substore> {
        if caller.is_account_of(authority_id) {
            self.authorizer
                .require_account(caller, authority_id)
                .await?;
            let substore = self.db.get_substore(id).await?;
            if substore.brand_id != authority_id {
                return Err(VaultError::NotFound(format!("Substore {id}")));
            }
            return Ok(substore);
        }

        match self.authorizer.granted_substore(caller).await? {
            Some(substore) if substore.id == id && substore.brand_id == authority_id => {
                Ok(substore)
            }
            _ => Err(VaultError::unauthorized(format!("no access to substore {id}"))),
        }
    }

    /// Change a substore. Account scope only.
    pub async fn update(
        &self,
        caller: &AuthenticatedUser,
        authority_id: &str,
        id: i64,
        update: SubstoreUpdate,
    ) -> Result<Substore> {
        self.authorizer
            .require_account(caller, authority_id)
            .await?;
        let current = self.db.get_substore(id).await?;
        if current.brand_id != authority_id {
            return Err(VaultError::NotFound(format!("Substore {id}")));
        }

        let enabled = update.enabled.unwrap_or_else(|| current.is_enabled());
        let store_id = update.store_id.unwrap_or(current.store_id);
        validate_model_name(&store_id)?;

        let substore = self.db.update_substore(id, &store_id, enabled).await?;
        info!(
            authority_id = %authority_id,
            id,
            store_id = %store_id,
            enabled,
            "Updated substore"
        );
        Ok(substore)
    }
}
