//! Storage layer tests for the `SerialVault` signer.

#![allow(clippy::unwrap_used)]

use serialvault_core::db::unix_timestamp;

use super::db::{DatabaseError, VaultDatabase};
use super::queries_keys::NewKeypair;
use super::queries_signing::NewSigningLog;

async fn test_db() -> VaultDatabase {
    VaultDatabase::open_in_memory().await.unwrap()
}

async fn insert_key(db: &VaultDatabase, key_id: &str, purpose: &str, activate: bool) {
    db.insert_keypair(
        &NewKeypair {
            key_id,
            authority_id: "vendor1",
            purpose,
            backend: "software",
            handle_ref: &format!("{key_id}.key"),
            public_key: &[1, 2, 3],
        },
        activate,
    )
    .await
    .unwrap();
}

async fn active_count(db: &VaultDatabase, purpose: &str) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM keypairs WHERE authority_id = 'vendor1' AND purpose = ? AND active = 1",
    )
    .bind(purpose)
    .fetch_one(db.pool())
    .await
    .unwrap()
}

// === Account tests ===

#[tokio::test]
async fn create_and_get_account() {
    let db = test_db().await;
    let account = db.create_account("vendor1", "Vendor One").await.unwrap();

    assert_eq!(account.authority_id, "vendor1");
    assert_eq!(account.display_name, "Vendor One");
    assert!(account.is_enabled());
}

#[tokio::test]
async fn duplicate_account_is_conflict() {
    let db = test_db().await;
    db.create_account("vendor1", "Vendor One").await.unwrap();
    let err = db.create_account("vendor1", "Again").await.unwrap_err();
    assert!(matches!(err, DatabaseError::Conflict(_)));
}

#[tokio::test]
async fn disable_account() {
    let db = test_db().await;
    db.create_account("vendor1", "Vendor One").await.unwrap();
    assert!(db.set_account_enabled("vendor1", false).await.unwrap());
    assert!(!db.get_account("vendor1").await.unwrap().is_enabled());
    assert!(!db.set_account_enabled("nobody", false).await.unwrap());
}

// === Keypair tests ===

#[tokio::test]
async fn first_key_is_activated_when_vacant() {
    let db = test_db().await;
    db.create_account("vendor1", "Vendor One").await.unwrap();

    insert_key(&db, "aaaa", "serial", true).await;
    insert_key(&db, "bbbb", "serial", true).await;

    let first = db.get_keypair("vendor1", "aaaa").await.unwrap();
    let second = db.get_keypair("vendor1", "bbbb").await.unwrap();
    assert!(first.is_active());
    assert!(!second.is_active());
    assert_eq!(active_count(&db, "serial").await, 1);
}

#[tokio::test]
async fn purposes_have_separate_active_keys() {
    let db = test_db().await;
    db.create_account("vendor1", "Vendor One").await.unwrap();

    insert_key(&db, "aaaa", "serial", true).await;
    insert_key(&db, "bbbb", "system-user", true).await;

    assert_eq!(active_count(&db, "serial").await, 1);
    assert_eq!(active_count(&db, "system-user").await, 1);
}

#[tokio::test]
async fn activate_swaps_active_key() {
    let db = test_db().await;
    db.create_account("vendor1", "Vendor One").await.unwrap();
    insert_key(&db, "aaaa", "serial", true).await;
    insert_key(&db, "bbbb", "serial", false).await;

    let (keypair, previous) = db.activate_keypair("vendor1", "bbbb").await.unwrap();
    assert_eq!(keypair.key_id, "bbbb");
    assert!(keypair.is_active());
    assert_eq!(previous.as_deref(), Some("aaaa"));

    let active = db
        .active_keypair("vendor1", "serial")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.key_id, "bbbb");
    assert_eq!(active_count(&db, "serial").await, 1);
}

#[tokio::test]
async fn activating_active_key_is_a_no_op() {
    let db = test_db().await;
    db.create_account("vendor1", "Vendor One").await.unwrap();
    insert_key(&db, "aaaa", "serial", true).await;

    let (keypair, previous) = db.activate_keypair("vendor1", "aaaa").await.unwrap();
    assert!(keypair.is_active());
    assert!(previous.is_none());
}

#[tokio::test]
async fn activate_unknown_key_is_not_found() {
    let db = test_db().await;
    db.create_account("vendor1", "Vendor One").await.unwrap();
    insert_key(&db, "aaaa", "serial", true).await;

    let err = db.activate_keypair("vendor1", "ffff").await.unwrap_err();
    assert!(matches!(err, DatabaseError::NotFound(_)));
    let active = db.get_keypair("vendor1", "aaaa").await.unwrap();
    assert!(active.is_active());
}

#[tokio::test]
async fn disabled_key_cannot_be_activated() {
    let db = test_db().await;
    db.create_account("vendor1", "Vendor One").await.unwrap();
    insert_key(&db, "aaaa", "serial", true).await;
    insert_key(&db, "bbbb", "serial", false).await;
    assert!(db.disable_keypair("vendor1", "bbbb").await.unwrap());

    let err = db.activate_keypair("vendor1", "bbbb").await.unwrap_err();
    assert!(matches!(err, DatabaseError::Conflict(_)));
    // The previously active key is untouched.
    let active = db.get_keypair("vendor1", "aaaa").await.unwrap();
    assert!(active.is_active());
}

#[tokio::test]
async fn disabling_active_key_leaves_none_active() {
    let db = test_db().await;
    db.create_account("vendor1", "Vendor One").await.unwrap();
    insert_key(&db, "aaaa", "serial", true).await;

    db.disable_keypair("vendor1", "aaaa").await.unwrap();
    assert!(
        db.active_keypair("vendor1", "serial")
            .await
            .unwrap()
            .is_none()
    );
    let keypair = db.get_keypair("vendor1", "aaaa").await.unwrap();
    assert!(keypair.is_disabled());
    assert!(!keypair.is_active());
}

#[tokio::test]
async fn second_active_key_is_rejected_by_index() {
    let db = test_db().await;
    db.create_account("vendor1", "Vendor One").await.unwrap();
    insert_key(&db, "aaaa", "serial", true).await;
    insert_key(&db, "bbbb", "serial", false).await;

    let err: DatabaseError = sqlx::query("UPDATE keypairs SET active = 1 WHERE key_id = 'bbbb'")
        .execute(db.pool())
        .await
        .unwrap_err()
        .into();
    assert!(matches!(err, DatabaseError::Conflict(_)));
}

// === Model and substore tests ===

#[tokio::test]
async fn model_names_are_unique_per_brand() {
    let db = test_db().await;
    db.create_account("vendor1", "Vendor One").await.unwrap();
    db.create_account("vendor2", "Vendor Two").await.unwrap();

    db.create_model("vendor1", "router-3400", None)
        .await
        .unwrap();
    db.create_model("vendor2", "router-3400", None)
        .await
        .unwrap();
    let err = db
        .create_model("vendor1", "router-3400", None)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::Conflict(_)));

    assert_eq!(db.list_models("vendor1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn model_keypair_must_belong_to_brand() {
    let db = test_db().await;
    db.create_account("vendor1", "Vendor One").await.unwrap();
    db.create_account("vendor2", "Vendor Two").await.unwrap();
    insert_key(&db, "aaaa", "serial", true).await;

    let model = db
        .create_model("vendor1", "router-3400", Some("aaaa"))
        .await
        .unwrap();
    assert_eq!(model.key_id.as_deref(), Some("aaaa"));

    // vendor2 has no keypair "aaaa"; the composite foreign key refuses it.
    assert!(
        db.create_model("vendor2", "switch-10", Some("aaaa"))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn substore_round_trip() {
    let db = test_db().await;
    db.create_account("vendor1", "Vendor One").await.unwrap();
    let model = db
        .create_model("vendor1", "router-3400", None)
        .await
        .unwrap();

    let substore = db.create_substore("acme-store", model.id).await.unwrap();
    assert_eq!(substore.model_name, "router-3400");
    assert_eq!(substore.brand_id, "vendor1");
    assert!(substore.is_enabled());

    let found = db
        .find_substore("acme-store", model.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, substore.id);

    let updated = db
        .update_substore(substore.id, "acme-outlet", false)
        .await
        .unwrap();
    assert_eq!(updated.store_id, "acme-outlet");
    assert!(!updated.is_enabled());

    assert_eq!(db.list_substores("vendor1").await.unwrap().len(), 1);
    assert!(db.list_substores("vendor2").await.unwrap().is_empty());
}

#[tokio::test]
async fn update_missing_substore_is_not_found() {
    let db = test_db().await;
    let err = db.update_substore(42, "x", true).await.unwrap_err();
    assert!(matches!(err, DatabaseError::NotFound(_)));
}

// === Nonce tests ===

#[tokio::test]
async fn nonce_is_consumed_once() {
    let db = test_db().await;
    let now = unix_timestamp();
    db.insert_nonce("n1", now, now + 60).await.unwrap();

    assert!(db.consume_nonce("n1", now).await.unwrap());
    assert!(!db.consume_nonce("n1", now).await.unwrap());
    let nonce = db.get_nonce("n1").await.unwrap().unwrap();
    assert!(nonce.consumed_at.is_some());
}

#[tokio::test]
async fn expired_nonce_is_not_consumed() {
    let db = test_db().await;
    let now = unix_timestamp();
    db.insert_nonce("n1", now - 120, now - 60).await.unwrap();

    assert!(!db.consume_nonce("n1", now).await.unwrap());
    let nonce = db.get_nonce("n1").await.unwrap().unwrap();
    assert!(nonce.consumed_at.is_none());
}

#[tokio::test]
async fn expired_nonce_cleanup_spares_consumed() {
    let db = test_db().await;
    let now = unix_timestamp();
    db.insert_nonce("fresh", now, now + 60).await.unwrap();
    db.insert_nonce("stale", now - 120, now - 60)
        .await
        .unwrap();
    db.insert_nonce("used", now - 120, now - 60).await.unwrap();
    assert!(db.consume_nonce("used", now - 90).await.unwrap());

    assert_eq!(db.delete_expired_nonces(now).await.unwrap(), 1);
    assert!(db.get_nonce("stale").await.unwrap().is_none());
    assert!(db.get_nonce("fresh").await.unwrap().is_some());
    assert!(db.get_nonce("used").await.unwrap().is_some());
}

// === Signing log tests ===

fn log_entry<'a>(
    serial: &'a str,
    fingerprint: Option<&'a str>,
    outcome: &'a str,
) -> NewSigningLog<'a> {
    NewSigningLog {
        make: "vendor1",
        model: "router-3400",
        serial_number: serial,
        fingerprint,
        nonce: None,
        key_id: None,
        outcome,
    }
}

#[tokio::test]
async fn signing_logs_are_queryable() {
    let db = test_db().await;
    db.insert_signing_log(&log_entry("A1", Some("f1"), "success"))
        .await
        .unwrap();
    db.insert_signing_log(&log_entry("A1", None, "nonce-already-used"))
        .await
        .unwrap();
    db.insert_signing_log(&log_entry("B2", Some("f2"), "success"))
        .await
        .unwrap();

    let by_serial = db
        .list_signing_logs_by_serial("vendor1", "A1")
        .await
        .unwrap();
    assert_eq!(by_serial.len(), 2);
    assert_eq!(by_serial[0].outcome, "success");
    assert_eq!(by_serial[1].outcome, "nonce-already-used");

    let by_fp = db
        .list_signing_logs_by_fingerprint("vendor1", "f2")
        .await
        .unwrap();
    assert_eq!(by_fp.len(), 1);
    assert_eq!(by_fp[0].serial_number, "B2");

    let page = db.list_signing_logs("vendor1", 2, 0).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].serial_number, "B2");

    assert!(
        db.list_signing_logs("vendor2", 10, 0)
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(db.count_signing_logs().await.unwrap(), 3);
}

#[tokio::test]
async fn signing_logs_are_append_only() {
    let db = test_db().await;
    let id = db
        .insert_signing_log(&log_entry("A1", Some("f1"), "success"))
        .await
        .unwrap();

    assert!(
        sqlx::query("UPDATE signing_logs SET outcome = 'tampered' WHERE id = ?")
            .bind(id)
            .execute(db.pool())
            .await
            .is_err()
    );
    assert!(
        sqlx::query("DELETE FROM signing_logs WHERE id = ?")
            .bind(id)
            .execute(db.pool())
            .await
            .is_err()
    );
    assert_eq!(db.get_signing_log(id).await.unwrap().outcome, "success");
}

#[tokio::test]
async fn keypair_that_signed_cannot_be_deleted() {
    let db = test_db().await;
    db.create_account("vendor1", "Vendor One").await.unwrap();
    insert_key(&db, "aaaa", "serial", true).await;
    db.insert_signing_log(&NewSigningLog {
        key_id: Some("aaaa"),
        ..log_entry("A1", Some("f1"), "success")
    })
    .await
    .unwrap();

    assert!(
        sqlx::query("DELETE FROM keypairs WHERE key_id = 'aaaa'")
            .execute(db.pool())
            .await
            .is_err()
    );
}
