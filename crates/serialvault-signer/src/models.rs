//! Device model management.

use serialvault_core::validate_model_name;
use tracing::info;

use crate::auth::{AuthenticatedUser, Authorizer};
use crate::error::{Result, VaultError};
use crate::storage::{DatabaseError, Model, VaultDatabase};

#[derive(Clone)]
pub struct ModelManager {
    db: VaultDatabase,
    authorizer: Authorizer,
}

impl ModelManager {
    pub fn new(db: VaultDatabase) -> Self {
        Self {
            authorizer: Authorizer::new(db.clone()),
            db,
        }
    }

    /// Create a model under `authority_id`, optionally assigned to one of the
    /// account's keypairs.
    pub async fn create(
        &self,
        caller: &AuthenticatedUser,
        authority_id: &str,
        name: &str,
        key_id: Option<&str>,
    ) -> Result<Model> {
        validate_model_name(name)?;
        self.authorizer
            .require_account(caller, authority_id)
            .await?;
        if let Some(key_id) = key_id {
            self.ensure_owned_keypair(authority_id, key_id).await?;
        }

        let model = self.db.create_model(authority_id, name, key_id).await?;
        info!(authority_id = %authority_id, model = %name, id = model.id, "Created model");
        Ok(model)
    }

    /// Models visible to the caller: all of the account's, or the single
    /// model of a substore grant.
    pub async fn list(&self, caller: &AuthenticatedUser, authority_id: &str) -> Result<Vec<Model>> {
        if caller.is_account_of(authority_id) {
            self.authorizer
                .require_account(caller, authority_id)
                .await?;
            return Ok(self.db.list_models(authority_id).await?);
        }
        if caller.authority_id() != authority_id {
            return Err(VaultError::unauthorized(format!("no access to models of {authority_id}")));
        }
        match self.authorizer.granted_substore(caller).await? {
            Some(substore) => Ok(vec![self.db.get_model(substore.model_id).await?]),
            None => Ok(Vec::new()),
        }
    }

    /// One model, if the caller's scope covers it.
    pub async fn get(
        &self,
        caller: &AuthenticatedUser,
        authority_id: &str,
        name: &str,
    ) -> Result<Model> {
        self.authorizer
            .authorize_model(caller, authority_id, name)
            .await
    }

    /// Point a model at another keypair of the same account.
    pub async fn assign_keypair(
        &self,
        caller: &AuthenticatedUser,
        authority_id: &str,
        name: &str,
        key_id: &str,
    ) -> Result<Model> {
        self.authorizer
            .require_account(caller, authority_id)
            .await?;
        let model = self
            .db
            .get_model_by_name(authority_id, name)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("Model {name}")))?;
        self.ensure_owned_keypair(authority_id, key_id).await?;

        self.db.assign_model_keypair(model.id, key_id).await?;
        info!(
            authority_id = %authority_id,
            model = %name,
            key_id = %key_id,
            "Assigned keypair to model"
        );
        Ok(self.db.get_model(model.id).await?)
    }

    async fn ensure_owned_keypair(&self, authority_id: &str, key_id: &str) -> Result<()> {
        match self.db.get_keypair(authority_id, key_id).await {
            Ok(_) => Ok(()),
            Err(DatabaseError::NotFound(_)) => Err(VaultError::unauthorized(format!(
                "keypair {key_id} does not belong to {authority_id}"
            ))),
            Err(e) => Err(e.into()),
        }
    }
}
