//! Unit tests for key and presignature resolution

use crate::common::*;
use async_trait::async_trait;
use rbac_wallet_core::ledger::{AccountSnapshot, LedgerReader, TableEntry, TableKey};
use rbac_wallet_core::resolver::{list_presign_ids, resolve_key, resolve_presignature};
use rbac_wallet_core::{CustodialKeyState, Curve, Error, PresignatureState};
use std::time::Duration;

// ============================================================================
// Custodial Keys
// ============================================================================

#[tokio::test]
async fn test_resolves_key_by_curve() {
    let fixture = Fixture::new();
    let ctx = fixture.context();

    let key = resolve_key(&ctx, &fixture.snapshot, Curve::Secp256k1)
        .await
        .unwrap();
    assert_eq!(key.key_id, "0xkey-k1");
    assert_eq!(hex::encode(&key.public_key), EVM_PUBLIC_KEY);

    let key = resolve_key(&ctx, &fixture.snapshot, Curve::Ed25519)
        .await
        .unwrap();
    assert_eq!(key.key_id, "0xkey-ed");
}

#[tokio::test]
async fn test_empty_key_table_is_not_found() {
    let fixture = Fixture::empty();
    let ctx = fixture.context();

    let err = resolve_key(&ctx, &fixture.snapshot, Curve::Secp256k1)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::KeyNotFound {
            curve: Curve::Secp256k1
        }
    ));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_resolution_is_deterministic() {
    let fixture = Fixture::new();
    // A second key under the same tag is shadowed by the first
    fixture
        .network
        .insert_secp256k1_key("0xkey-k1-late", &[3u8; 32])
        .unwrap();
    fixture
        .ledger
        .add_key(&fixture.snapshot, "secp256k1", "0xkey-k1-late");
    let ctx = fixture.context();

    for _ in 0..3 {
        let key = resolve_key(&ctx, &fixture.snapshot, Curve::Secp256k1)
            .await
            .unwrap();
        assert_eq!(key.key_id, "0xkey-k1");
    }
}

#[tokio::test]
async fn test_failed_key_is_state_error() {
    let fixture = Fixture::new();
    fixture.network.set_key_state(
        "0xkey-k1",
        CustodialKeyState::Failed {
            reason: "dkg aborted".into(),
        },
    );
    let ctx = fixture.context();

    let err = resolve_key(&ctx, &fixture.snapshot, Curve::Secp256k1)
        .await
        .unwrap_err();
    match err {
        Error::InvalidState { entity, id, state } => {
            assert_eq!(entity, "custodial key");
            assert_eq!(id, "0xkey-k1");
            assert_eq!(state, "Failed (dkg aborted)");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_pending_key_times_out() {
    let fixture = Fixture::new();
    fixture
        .network
        .set_key_state("0xkey-k1", CustodialKeyState::Pending);
    let mut ctx = fixture.context();
    ctx.config.key_state_timeout = Duration::from_secs(30);

    let err = resolve_key(&ctx, &fixture.snapshot, Curve::Secp256k1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(err.is_retryable());
}

// ============================================================================
// Presignatures
// ============================================================================

#[tokio::test]
async fn test_takes_first_presignature_in_bucket() {
    let fixture = Fixture::new();
    let ctx = fixture.context();

    let reserved = resolve_presignature(&ctx, &fixture.snapshot, 1)
        .await
        .unwrap();
    assert_eq!(reserved.presign_id(), "0xpre-k1-a");
    assert!(!reserved.presignature().material.is_empty());
}

#[tokio::test]
async fn test_reserved_presignatures_are_skipped() {
    let fixture = Fixture::new();
    let ctx = fixture.context();

    let first = resolve_presignature(&ctx, &fixture.snapshot, 2)
        .await
        .unwrap();
    let second = resolve_presignature(&ctx, &fixture.snapshot, 2)
        .await
        .unwrap();
    assert_eq!(first.presign_id(), "0xpre-ed-a");
    assert_eq!(second.presign_id(), "0xpre-ed-b");

    let exhausted = resolve_presignature(&ctx, &fixture.snapshot, 2).await;
    assert!(matches!(
        exhausted,
        Err(Error::PresignatureNotFound { pair_id: 2 })
    ));

    // Releasing one makes it selectable again
    drop(first);
    let again = resolve_presignature(&ctx, &fixture.snapshot, 2)
        .await
        .unwrap();
    assert_eq!(again.presign_id(), "0xpre-ed-a");
}

#[tokio::test]
async fn test_consumed_presignature_stays_reserved() {
    let fixture = Fixture::new();
    let ctx = fixture.context();

    let reserved = resolve_presignature(&ctx, &fixture.snapshot, 1)
        .await
        .unwrap();
    let consumed = reserved.consume();
    assert_eq!(consumed.presign_id, "0xpre-k1-a");
    assert!(ctx.reservations.is_reserved("0xpre-k1-a"));

    let next = resolve_presignature(&ctx, &fixture.snapshot, 1)
        .await
        .unwrap();
    assert_eq!(next.presign_id(), "0xpre-k1-b");
}

#[tokio::test]
async fn test_missing_bucket_is_not_found() {
    let fixture = Fixture::new();
    let ctx = fixture.context();

    let result = resolve_presignature(&ctx, &fixture.snapshot, 7).await;
    assert!(matches!(
        result,
        Err(Error::PresignatureNotFound { pair_id: 7 })
    ));
}

#[tokio::test]
async fn test_empty_bucket_is_not_found() {
    let fixture = Fixture::empty();
    fixture.add_presignatures(1, &[]);
    let ctx = fixture.context();

    let result = resolve_presignature(&ctx, &fixture.snapshot, 1).await;
    assert!(matches!(
        result,
        Err(Error::PresignatureNotFound { pair_id: 1 })
    ));
}

#[tokio::test]
async fn test_failed_presignature_releases_reservation() {
    let fixture = Fixture::new();
    fixture.network.set_presignature_state(
        "0xpre-k1-a",
        PresignatureState::Failed {
            reason: "network aborted".into(),
        },
    );
    let ctx = fixture.context();

    let err = resolve_presignature(&ctx, &fixture.snapshot, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
    assert!(!ctx.reservations.is_reserved("0xpre-k1-a"));
}

/// Ledger whose table reads always fail
struct UnreachableLedger;

#[async_trait]
impl LedgerReader for UnreachableLedger {
    async fn get_account(&self, wallet_id: &str) -> rbac_wallet_core::Result<AccountSnapshot> {
        Err(Error::Ledger(format!("{}: connection refused", wallet_id)))
    }

    async fn list_entries(&self, _table_id: &str) -> rbac_wallet_core::Result<Vec<TableEntry>> {
        Err(Error::Ledger("connection refused".into()))
    }

    async fn get_entry(
        &self,
        _table_id: &str,
        _key: &TableKey,
    ) -> rbac_wallet_core::Result<serde_json::Value> {
        Err(Error::Ledger("connection refused".into()))
    }
}

#[tokio::test]
async fn test_listing_without_bucket_is_empty() {
    let fixture = Fixture::empty();
    let ids = list_presign_ids(&fixture.ledger, &fixture.snapshot, 1)
        .await
        .unwrap();
    assert!(ids.is_empty());

    let fixture = Fixture::new();
    let ids = list_presign_ids(&fixture.ledger, &fixture.snapshot, 2)
        .await
        .unwrap();
    assert_eq!(ids, vec!["0xpre-ed-a".to_string(), "0xpre-ed-b".to_string()]);
}

#[tokio::test]
async fn test_listing_propagates_ledger_failure() {
    let fixture = Fixture::empty();
    let err = list_presign_ids(&UnreachableLedger, &fixture.snapshot, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Ledger(_)));
}
