//! Keypair queries, including the transactional activation swap.

use serialvault_core::db::unix_timestamp;

use super::db::{DatabaseError, VaultDatabase};
use super::models::Keypair;

/// Parameters for storing a freshly generated keypair.
pub struct NewKeypair<'a> {
    pub key_id: &'a str,
    pub authority_id: &'a str,
    pub purpose: &'a str,
    pub backend: &'a str,
    pub handle_ref: &'a str,
    pub public_key: &'a [u8],
}

impl VaultDatabase {
    /// Store a keypair. When `activate_if_vacant` is set and no key is active
    /// for the same authority and purpose, the new key is activated within the
    /// same transaction.
    pub async fn insert_keypair(
        &self,
        params: &NewKeypair<'_>,
        activate_if_vacant: bool,
    ) -> Result<Keypair, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            "INSERT INTO keypairs (key_id, authority_id, purpose, backend, handle_ref, public_key, active, disabled, created_at) VALUES (?, ?, ?, ?, ?, ?, 0, 0, ?)",
        )
        .bind(params.key_id)
        .bind(params.authority_id)
        .bind(params.purpose)
        .bind(params.backend)
        .bind(params.handle_ref)
        .bind(params.public_key)
        .bind(unix_timestamp())
        .execute(&mut *tx)
        .await?;

        if activate_if_vacant {
            sqlx::query(
                "UPDATE keypairs SET active = 1 WHERE authority_id = ? AND key_id = ? \
                 AND NOT EXISTS (SELECT 1 FROM keypairs WHERE authority_id = ? AND purpose = ? AND active = 1)",
            )
            .bind(params.authority_id)
            .bind(params.key_id)
            .bind(params.authority_id)
            .bind(params.purpose)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_keypair(params.authority_id, params.key_id).await
    }

    /// Get a keypair of an authority.
    pub async fn get_keypair(
        &self,
        authority_id: &str,
        key_id: &str,
    ) -> Result<Keypair, DatabaseError> {
        sqlx::query_as::<_, Keypair>("SELECT * FROM keypairs WHERE authority_id = ? AND key_id = ?")
            .bind(authority_id)
            .bind(key_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Keypair {key_id}")))
    }

    /// List an authority's keypairs, newest first.
    pub async fn list_keypairs(&self, authority_id: &str) -> Result<Vec<Keypair>, DatabaseError> {
        let keypairs = sqlx::query_as::<_, Keypair>(
            "SELECT * FROM keypairs WHERE authority_id = ? ORDER BY created_at DESC, key_id",
        )
        .bind(authority_id)
        .fetch_all(self.pool())
        .await?;

        Ok(keypairs)
    }

    /// The active keypair for an authority and purpose, if any.
    pub async fn active_keypair(
        &self,
        authority_id: &str,
        purpose: &str,
    ) -> Result<Option<Keypair>, DatabaseError> {
        let keypair = sqlx::query_as::<_, Keypair>(
            "SELECT * FROM keypairs WHERE authority_id = ? AND purpose = ? AND active = 1",
        )
        .bind(authority_id)
        .bind(purpose)
        .fetch_optional(self.pool())
        .await?;

        Ok(keypair)
    }

    /// Make `key_id` the active key for its purpose, deactivating the previous
    /// one in the same transaction. Returns the activated keypair and the id
    /// of the key it replaced.
    ///
    /// Fails with `NotFound` for an unknown key and `Conflict` for a disabled
    /// one; nothing changes in either case.
    pub async fn activate_keypair(
        &self,
        authority_id: &str,
        key_id: &str,
    ) -> Result<(Keypair, Option<String>), DatabaseError> {
        let mut tx = self.pool().begin().await?;

        // Write first so the transaction takes the write lock up front.
        let previous: Option<String> = sqlx::query_scalar(
            "UPDATE keypairs SET active = 0 \
             WHERE authority_id = ? AND active = 1 AND key_id != ? \
             AND purpose = (SELECT purpose FROM keypairs WHERE authority_id = ? AND key_id = ? AND disabled = 0) \
             RETURNING key_id",
        )
        .bind(authority_id)
        .bind(key_id)
        .bind(authority_id)
        .bind(key_id)
        .fetch_optional(&mut *tx)
        .await?;

        let activated = sqlx::query(
            "UPDATE keypairs SET active = 1 WHERE authority_id = ? AND key_id = ? AND disabled = 0",
        )
        .bind(authority_id)
        .bind(key_id)
        .execute(&mut *tx)
        .await?;

        if activated.rows_affected() == 0 {
            let disabled: Option<i64> = sqlx::query_scalar(
                "SELECT disabled FROM keypairs WHERE authority_id = ? AND key_id = ?",
            )
            .bind(authority_id)
            .bind(key_id)
            .fetch_optional(&mut *tx)
            .await?;
            tx.rollback().await?;

            return Err(match disabled {
                Some(_) => DatabaseError::Conflict(format!("Keypair {key_id} is disabled")),
                None => DatabaseError::NotFound(format!("Keypair {key_id}")),
            });
        }

        let keypair = sqlx::query_as::<_, Keypair>(
            "SELECT * FROM keypairs WHERE authority_id = ? AND key_id = ?",
        )
        .bind(authority_id)
        .bind(key_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((keypair, previous))
    }

    /// Disable a keypair. A disabled key is never active again.
    pub async fn disable_keypair(
        &self,
        authority_id: &str,
        key_id: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE keypairs SET disabled = 1, active = 0 WHERE authority_id = ? AND key_id = ?",
        )
        .bind(authority_id)
        .bind(key_id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
