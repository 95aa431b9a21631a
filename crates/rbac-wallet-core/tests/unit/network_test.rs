//! Unit tests for signing-session polling against the in-memory network

use crate::common::*;
use rbac_wallet_core::chain::TransferRequest;
use rbac_wallet_core::network::{KeyProvider, SignRequest, ThresholdSigner, ThresholdSignerExt};
use rbac_wallet_core::{
    Curve, CustodialKeyState, Error, HashScheme, PresignatureState, SignatureAlgorithm,
    SigningPipeline,
};
use std::sync::Arc;
use std::time::Duration;

const POLL: Duration = Duration::from_millis(10);

async fn submit_secp256k1(fixture: &Fixture) -> rbac_wallet_core::SessionId {
    let key = match fixture.network.key_state("0xkey-k1").await.unwrap() {
        CustodialKeyState::Active(key) => key,
        other => panic!("key not active: {}", other.name()),
    };
    let presignature = match fixture.network.presignature_state("0xpre-k1-a").await.unwrap() {
        PresignatureState::Completed(presignature) => presignature,
        other => panic!("presignature not completed: {}", other.name()),
    };

    fixture
        .network
        .submit(&SignRequest {
            payload: &hex::decode(EVM_PAYLOAD).unwrap(),
            key: &key,
            presignature: &presignature,
            hash_scheme: HashScheme::Keccak256,
            algorithm: SignatureAlgorithm::EcdsaSecp256k1,
            curve: Curve::Secp256k1,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_session_completes_after_processing() {
    let fixture = Fixture::new();
    let session_id = submit_secp256k1(&fixture).await;

    let signature = fixture
        .network
        .await_signature(
            &session_id,
            Curve::Secp256k1,
            SignatureAlgorithm::EcdsaSecp256k1,
            Duration::from_secs(2),
            POLL,
        )
        .await
        .unwrap();
    assert_eq!(signature.len(), 64);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_session_times_out() {
    let fixture = Fixture::new();
    fixture.network.stall_sessions(true);
    let session_id = submit_secp256k1(&fixture).await;

    let err = fixture
        .network
        .await_signature(
            &session_id,
            Curve::Secp256k1,
            SignatureAlgorithm::EcdsaSecp256k1,
            Duration::from_secs(60),
            POLL,
        )
        .await
        .unwrap_err();
    match &err {
        Error::Timeout(what) => assert!(what.contains(&session_id.to_string())),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(fixture.network.is_consumed("0xpre-k1-a"));
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_stops_at_signature_deadline() {
    let fixture = Fixture::new();
    fixture.network.stall_sessions(true);
    let node = evm_node();
    let pipeline = SigningPipeline::new(
        Arc::new(fixture.context()),
        Arc::new(evm_adapter(&node)),
    );

    let err = pipeline
        .execute(WALLET_ID, &TransferRequest::new(EVM_RECIPIENT, "0.001"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert_eq!(fixture.network.submission_count(), 1);
    assert!(node.accepted_transactions().is_empty());
}
