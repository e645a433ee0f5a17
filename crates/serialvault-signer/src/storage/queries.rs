//! Database queries for accounts, models and substores.

use serialvault_core::db::unix_timestamp;

use super::db::{DatabaseError, VaultDatabase};
use super::models::{Account, Model, Substore};

const SUBSTORE_SELECT: &str = "SELECT s.id, s.store_id, s.model_id, m.name AS model_name, \
     m.brand_id, s.enabled, s.created_at, s.updated_at \
     FROM substores s JOIN models m ON m.id = s.model_id";

impl VaultDatabase {
    // =========================================================================
    // Account queries
    // =========================================================================

    /// Create a new account.
    pub async fn create_account(
        &self,
        authority_id: &str,
        display_name: &str,
    ) -> Result<Account, DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO accounts (authority_id, display_name, enabled, created_at) VALUES (?, ?, 1, ?)",
        )
        .bind(authority_id)
        .bind(display_name)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_account(authority_id).await
    }

    /// Get an account by authority id.
    pub async fn get_account(&self, authority_id: &str) -> Result<Account, DatabaseError> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE authority_id = ?")
            .bind(authority_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Account {authority_id}")))
    }

    /// List all accounts.
    pub async fn list_accounts(&self) -> Result<Vec<Account>, DatabaseError> {
        let accounts =
            sqlx::query_as::<_, Account>("SELECT * FROM accounts ORDER BY authority_id")
                .fetch_all(self.pool())
                .await?;

        Ok(accounts)
    }

    /// Enable or disable an account.
    pub async fn set_account_enabled(
        &self,
        authority_id: &str,
        enabled: bool,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE accounts SET enabled = ? WHERE authority_id = ?")
            .bind(i64::from(enabled))
            .bind(authority_id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Model queries
    // =========================================================================

    /// Create a model, optionally assigned to a keypair of the same brand.
    pub async fn create_model(
        &self,
        brand_id: &str,
        name: &str,
        key_id: Option<&str>,
    ) -> Result<Model, DatabaseError> {
        let now = unix_timestamp();

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO models (brand_id, name, key_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(brand_id)
        .bind(name)
        .bind(key_id)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        self.get_model(id).await
    }

    /// Get a model by ID.
    pub async fn get_model(&self, id: i64) -> Result<Model, DatabaseError> {
        sqlx::query_as::<_, Model>("SELECT * FROM models WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Model {id}")))
    }

    /// Get a model by brand and name.
    pub async fn get_model_by_name(
        &self,
        brand_id: &str,
        name: &str,
    ) -> Result<Option<Model>, DatabaseError> {
        let model =
            sqlx::query_as::<_, Model>("SELECT * FROM models WHERE brand_id = ? AND name = ?")
                .bind(brand_id)
                .bind(name)
                .fetch_optional(self.pool())
                .await?;

        Ok(model)
    }

    /// List the models of a brand.
    pub async fn list_models(&self, brand_id: &str) -> Result<Vec<Model>, DatabaseError> {
        let models =
            sqlx::query_as::<_, Model>("SELECT * FROM models WHERE brand_id = ? ORDER BY name")
                .bind(brand_id)
                .fetch_all(self.pool())
                .await?;

        Ok(models)
    }

    /// Point a model at another keypair of its brand.
    pub async fn assign_model_keypair(
        &self,
        model_id: i64,
        key_id: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE models SET key_id = ?, updated_at = ? WHERE id = ?")
            .bind(key_id)
            .bind(unix_timestamp())
            .bind(model_id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Substore queries
    // =========================================================================

    /// Bind a model to a store identity.
    pub async fn create_substore(
        &self,
        store_id: &str,
        model_id: i64,
    ) -> Result<Substore, DatabaseError> {
        let now = unix_timestamp();

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO substores (store_id, model_id, enabled, created_at, updated_at) VALUES (?, ?, 1, ?, ?) RETURNING id",
        )
        .bind(store_id)
        .bind(model_id)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        self.get_substore(id).await
    }

    /// Get a substore by ID.
    pub async fn get_substore(&self, id: i64) -> Result<Substore, DatabaseError> {
        sqlx::query_as::<_, Substore>(&format!("{SUBSTORE_SELECT} WHERE s.id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Substore {id}")))
    }

    /// Find the substore binding `store_id` to `model_id`.
    pub async fn find_substore(
        &self,
        store_id: &str,
        model_id: i64,
    ) -> Result<Option<Substore>, DatabaseError> {
        let substore = sqlx::query_as::<_, Substore>(&format!(
            "{SUBSTORE_SELECT} WHERE s.store_id = ? AND s.model_id = ?"
        ))
        .bind(store_id)
        .bind(model_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(substore)
    }

    /// List the substores over every model of a brand.
    pub async fn list_substores(&self, brand_id: &str) -> Result<Vec<Substore>, DatabaseError> {
        let substores = sqlx::query_as::<_, Substore>(&format!(
            "{SUBSTORE_SELECT} WHERE m.brand_id = ? ORDER BY s.store_id, m.name"
        ))
        .bind(brand_id)
        .fetch_all(self.pool())
        .await?;

        Ok(substores)
    }

    /// Change a substore's store identity and enabled flag.
    pub async fn update_substore(
        &self,
        id: i64,
        store_id: &str,
        enabled: bool,
    ) -> Result<Substore, DatabaseError> {
        let result = sqlx::query(
            "UPDATE substores SET store_id = ?, enabled = ?, updated_at = ? WHERE id = ?",
        )
        .bind(store_id)
        .bind(i64::from(enabled))
        .bind(unix_timestamp())
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("Substore {id}")));
        }
        self.get_substore(id).await
    }
}
