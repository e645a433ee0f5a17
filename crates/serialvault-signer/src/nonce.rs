//! Nonce ledger: single-use tokens that stop replay of signing requests.

use rand::RngCore;
use rand::rngs::OsRng;
use serialvault_core::db::unix_timestamp;
use tracing::{debug, warn};

use crate::error::{NonceError, Result};
use crate::storage::{DeviceNonce, VaultDatabase};

/// Random bytes per nonce (hex encoded to twice as many characters).
const NONCE_BYTES: usize = 32;

/// Issues nonces and consumes each at most once.
#[derive(Debug, Clone)]
pub struct NonceLedger {
    db: VaultDatabase,
    ttl_secs: i64,
}

impl NonceLedger {
    pub const fn new(db: VaultDatabase, ttl_secs: i64) -> Self {
        Self { db, ttl_secs }
    }

    /// Issue a fresh nonce valid for the configured time-to-live.
    pub async fn issue(&self) -> Result<DeviceNonce> {
        let mut bytes = [0u8; NONCE_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let value = hex::encode(bytes);

        let now = unix_timestamp();
        let nonce = self
            .db
            .insert_nonce(&value, now, now.saturating_add(self.ttl_secs))
            .await?;
        debug!(expires_at = nonce.expires_at, "Issued device nonce");
        Ok(nonce)
    }

    /// Consume `nonce`. Of any number of concurrent calls with the same value
    /// exactly one succeeds; the rest see `AlreadyUsed`.
    pub async fn consume(&self, nonce: &str) -> Result<()> {
        let now = unix_timestamp();
        if self.db.consume_nonce(nonce, now).await? {
            return Ok(());
        }

        // The update matched nothing; classify why from the current row.
        let reason = match self.db.get_nonce(nonce).await? {
            None => NonceError::Unknown,
            Some(record) if record.consumed_at.is_some() => NonceError::AlreadyUsed,
            Some(_) => NonceError::Expired,
        };
        warn!(reason = %reason, "Rejected device nonce");
        Err(reason.into())
    }

    /// Delete expired nonces that were never consumed. Consumed nonces stay
    /// for audit linkage.
    pub async fn collect_expired(&self) -> Result<u64> {
        Ok(self.db.delete_expired_nonces(unix_timestamp()).await?)
    }
}
