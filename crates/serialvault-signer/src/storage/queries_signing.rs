//! Device nonce and signing log queries.

use serialvault_core::db::unix_timestamp;

use super::db::{DatabaseError, VaultDatabase};
use super::models::{DeviceNonce, SigningLog};

/// Parameters for appending a signing log entry.
pub struct NewSigningLog<'a> {
    pub make: &'a str,
    pub model: &'a str,
    pub serial_number: &'a str,
    pub fingerprint: Option<&'a str>,
    pub nonce: Option<&'a str>,
    pub key_id: Option<&'a str>,
    pub outcome: &'a str,
}

impl VaultDatabase {
    // =========================================================================
    // Device nonce queries
    // =========================================================================

    /// Store a newly issued nonce.
    pub async fn insert_nonce(
        &self,
        nonce: &str,
        issued_at: i64,
        expires_at: i64,
    ) -> Result<DeviceNonce, DatabaseError> {
        sqlx::query("INSERT INTO device_nonces (nonce, issued_at, expires_at) VALUES (?, ?, ?)")
            .bind(nonce)
            .bind(issued_at)
            .bind(expires_at)
            .execute(self.pool())
            .await?;

        Ok(DeviceNonce {
            nonce: nonce.to_string(),
            issued_at,
            expires_at,
            consumed_at: None,
        })
    }

    /// Get a nonce record.
    pub async fn get_nonce(&self, nonce: &str) -> Result<Option<DeviceNonce>, DatabaseError> {
        let record = sqlx::query_as::<_, DeviceNonce>("SELECT * FROM device_nonces WHERE nonce = ?")
            .bind(nonce)
            .fetch_optional(self.pool())
            .await?;

        Ok(record)
    }

    /// Mark a nonce consumed if it is still unconsumed and unexpired at `now`.
    ///
    /// A single conditional update: of any number of concurrent callers, at
    /// most one gets `true`.
    pub async fn consume_nonce(&self, nonce: &str, now: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE device_nonces SET consumed_at = ? \
             WHERE nonce = ? AND consumed_at IS NULL AND expires_at > ?",
        )
        .bind(now)
        .bind(nonce)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete unconsumed nonces that expired at or before `now`.
    pub async fn delete_expired_nonces(&self, now: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM device_nonces WHERE consumed_at IS NULL AND expires_at <= ?",
        )
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Signing log queries
    // =========================================================================

    /// Append a signing log entry and return its ID.
    pub async fn insert_signing_log(
        &self,
        entry: &NewSigningLog<'_>,
    ) -> Result<i64, DatabaseError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO signing_logs (make, model, serial_number, fingerprint, nonce, key_id, outcome, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(entry.make)
        .bind(entry.model)
        .bind(entry.serial_number)
        .bind(entry.fingerprint)
        .bind(entry.nonce)
        .bind(entry.key_id)
        .bind(entry.outcome)
        .bind(unix_timestamp())
        .fetch_one(self.pool())
        .await?;

        Ok(id)
    }

    /// Get a signing log entry by ID.
    pub async fn get_signing_log(&self, id: i64) -> Result<SigningLog, DatabaseError> {
        sqlx::query_as::<_, SigningLog>("SELECT * FROM signing_logs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Signing log {id}")))
    }

    /// Entries of one make for a serial number, oldest first.
    pub async fn list_signing_logs_by_serial(
        &self,
        make: &str,
        serial_number: &str,
    ) -> Result<Vec<SigningLog>, DatabaseError> {
        let logs = sqlx::query_as::<_, SigningLog>(
            "SELECT * FROM signing_logs WHERE make = ? AND serial_number = ? ORDER BY id",
        )
        .bind(make)
        .bind(serial_number)
        .fetch_all(self.pool())
        .await?;

        Ok(logs)
    }

    /// Entries of one make for a payload fingerprint, oldest first.
    pub async fn list_signing_logs_by_fingerprint(
        &self,
        make: &str,
        fingerprint: &str,
    ) -> Result<Vec<SigningLog>, DatabaseError> {
        let logs = sqlx::query_as::<_, SigningLog>(
            "SELECT * FROM signing_logs WHERE make = ? AND fingerprint = ? ORDER BY id",
        )
        .bind(make)
        .bind(fingerprint)
        .fetch_all(self.pool())
        .await?;

        Ok(logs)
    }

    /// A page of one make's entries, newest first.
    pub async fn list_signing_logs(
        &self,
        make: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SigningLog>, DatabaseError> {
        let logs = sqlx::query_as::<_, SigningLog>(
            "SELECT * FROM signing_logs WHERE make = ? ORDER BY id DESC LIMIT ? OFFSET ?",
        )
        .bind(make)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        Ok(logs)
    }

    /// Total number of entries.
    pub async fn count_signing_logs(&self) -> Result<i64, DatabaseError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM signing_logs")
            .fetch_one(self.pool())
            .await?;

        Ok(count)
    }
}
