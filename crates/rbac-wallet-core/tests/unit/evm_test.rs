//! Unit tests for the EVM adapter
//!
//! Pins the Base Sepolia transfer byte-for-byte and covers the failure paths of
//! finalization and broadcast.

use crate::common::*;
use async_trait::async_trait;
use rbac_wallet_core::chain::evm::{
    recover_transaction_signer, Eip1559Transaction, EvmReceipt, EvmRpc, FeeEstimate,
    MemoryEvmNode,
};
use rbac_wallet_core::chain::{
    format_units, ChainAdapter, EvmAdapter, FinalizedTransaction, TransferRequest, UnsignedTx,
};
use rbac_wallet_core::error::RpcError;
use rbac_wallet_core::{BroadcastError, ChainSettings, Error, SessionId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn sepolia_signature() -> Vec<u8> {
    hex::decode(format!("{}{}", EVM_R, EVM_S)).unwrap()
}

async fn build_sepolia_transfer(adapter: &impl ChainAdapter) -> UnsignedTx {
    adapter
        .build_transaction(EVM_SENDER, &TransferRequest::new(EVM_RECIPIENT, "0.001"))
        .await
        .unwrap()
}

// ============================================================================
// Build
// ============================================================================

#[tokio::test]
async fn test_build_pins_signing_payload() {
    let node = evm_node();
    let adapter = evm_adapter(&node);

    let unsigned = build_sepolia_transfer(&adapter).await;

    assert_eq!(hex::encode(&unsigned.signing_payload), EVM_PAYLOAD);
    assert_eq!(unsigned.raw_tx, unsigned.signing_payload);
    assert_eq!(unsigned.summary.from, EVM_SENDER);
    assert_eq!(unsigned.summary.value, "0.001 ETH");
    assert_eq!(unsigned.summary.details.as_deref(), Some("nonce 5"));

    let tx = Eip1559Transaction::decode_unsigned(&unsigned.raw_tx).unwrap();
    assert_eq!(tx.nonce, 5);
    assert_eq!(tx.gas_limit, 21_000);
    assert_eq!(tx.chain_id, 84532);
}

#[tokio::test]
async fn test_build_caps_fee_summary_on_extreme_estimate() {
    let node = evm_node();
    node.set_fees(FeeEstimate {
        max_fee_per_gas: u128::MAX / 2,
        max_priority_fee_per_gas: 1,
    });
    let adapter = evm_adapter(&node);

    let unsigned = build_sepolia_transfer(&adapter).await;
    assert_eq!(
        unsigned.summary.estimated_fee,
        format!("{} ETH", format_units(u128::MAX, 18))
    );
    let tx = Eip1559Transaction::decode_unsigned(&unsigned.raw_tx).unwrap();
    assert_eq!(tx.max_fee_per_gas, u128::MAX / 2);
}

#[tokio::test]
async fn test_build_rejects_bad_recipient() {
    let adapter = evm_adapter(&evm_node());
    let result = adapter
        .build_transaction(EVM_SENDER, &TransferRequest::new("0x1234", "0.001"))
        .await;
    assert!(matches!(result, Err(Error::InvalidAddress(_))));
}

#[tokio::test]
async fn test_build_fails_when_node_unreachable() {
    let node = evm_node();
    node.set_offline(true);
    let adapter = evm_adapter(&node);

    let result = adapter
        .build_transaction(EVM_SENDER, &TransferRequest::new(EVM_RECIPIENT, "0.001"))
        .await;
    assert!(matches!(result, Err(Error::Build(_))));
}

// ============================================================================
// Finalize
// ============================================================================

#[tokio::test]
async fn test_finalize_selects_recovery_id_one() {
    let adapter = evm_adapter(&evm_node());
    let unsigned = build_sepolia_transfer(&adapter).await;

    let finalized = adapter
        .finalize_transaction(
            &unsigned,
            &sepolia_signature(),
            EVM_SENDER,
            &SessionId::new("0xsession"),
        )
        .unwrap();

    assert_eq!(finalized.recovery_id, Some(1));
    assert_eq!(hex::encode(&finalized.raw_tx), EVM_SIGNED);
    assert_eq!(finalized.tx_id, EVM_TX_HASH);
    assert_eq!(finalized.signer, EVM_SENDER);
    assert_eq!(recover_transaction_signer(&finalized.raw_tx).unwrap(), EVM_SENDER);
}

#[tokio::test]
async fn test_finalize_matches_checksummed_address() {
    let adapter = evm_adapter(&evm_node());
    let unsigned = build_sepolia_transfer(&adapter).await;

    let finalized = adapter
        .finalize_transaction(
            &unsigned,
            &sepolia_signature(),
            "0x2C7536E3605D9C16A7A3D7B1898E529396A65C23",
            &SessionId::new("0xsession"),
        )
        .unwrap();
    assert_eq!(finalized.recovery_id, Some(1));
}

#[tokio::test]
async fn test_corrupted_signature_is_reconstruction_error() {
    let node = evm_node();
    let adapter = evm_adapter(&node);
    let unsigned = build_sepolia_transfer(&adapter).await;

    let mut signature = sepolia_signature();
    signature[5] ^= 0x01;

    let result = adapter.finalize_transaction(
        &unsigned,
        &signature,
        EVM_SENDER,
        &SessionId::new("0xsession"),
    );
    match result {
        Err(err @ Error::SignatureReconstruction { .. }) => {
            assert!(err.is_fatal());
            assert!(err.to_string().contains("0xsession"));
        }
        other => panic!("expected reconstruction error, got {other:?}"),
    }
    assert!(node.accepted_transactions().is_empty());
}

#[tokio::test]
async fn test_finalize_against_wrong_wallet_fails() {
    let adapter = evm_adapter(&evm_node());
    let unsigned = build_sepolia_transfer(&adapter).await;

    let result = adapter.finalize_transaction(
        &unsigned,
        &sepolia_signature(),
        EVM_RECIPIENT,
        &SessionId::new("0xsession"),
    );
    assert!(matches!(result, Err(Error::SignatureReconstruction { .. })));
}

#[tokio::test]
async fn test_finalize_rejects_short_signature() {
    let adapter = evm_adapter(&evm_node());
    let unsigned = build_sepolia_transfer(&adapter).await;

    let result = adapter.finalize_transaction(
        &unsigned,
        &[0u8; 65],
        EVM_SENDER,
        &SessionId::new("0xsession"),
    );
    assert!(matches!(result, Err(Error::Crypto(_))));
}

// ============================================================================
// Broadcast
// ============================================================================

#[tokio::test]
async fn test_broadcast_waits_for_receipt() {
    let node = evm_node();
    let adapter = evm_adapter(&node);
    let unsigned = build_sepolia_transfer(&adapter).await;
    let finalized = adapter
        .finalize_transaction(
            &unsigned,
            &sepolia_signature(),
            EVM_SENDER,
            &SessionId::new("0xsession"),
        )
        .unwrap();

    let receipt = adapter
        .broadcast(&finalized, Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(receipt.tx_id, EVM_TX_HASH);
    assert_eq!(receipt.confirmed_in, 2);
    assert_eq!(
        receipt.explorer_url.as_deref(),
        Some(format!("https://sepolia.basescan.org/tx/{}", EVM_TX_HASH).as_str())
    );
    assert_eq!(node.nonce(EVM_SENDER), 6);
    assert_eq!(node.accepted_transactions().len(), 1);
}

#[tokio::test]
async fn test_node_rejection_is_verbatim() {
    let node = evm_node();
    let adapter = evm_adapter(&node);
    let unsigned = build_sepolia_transfer(&adapter).await;
    let finalized = adapter
        .finalize_transaction(
            &unsigned,
            &sepolia_signature(),
            EVM_SENDER,
            &SessionId::new("0xsession"),
        )
        .unwrap();

    let message = "insufficient funds for gas * price + value: balance 0, tx cost 1001050000000000";
    node.reject_next_with(message);

    match adapter.broadcast(&finalized, Duration::from_secs(2)).await {
        Err(err @ Error::Broadcast(BroadcastError::Rejected { .. })) => {
            assert!(!err.is_retryable());
            assert!(err.to_string().contains(message));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stale_nonce_rejected_by_node() {
    let node = evm_node();
    let adapter = evm_adapter(&node);
    let unsigned = build_sepolia_transfer(&adapter).await;
    let finalized = adapter
        .finalize_transaction(
            &unsigned,
            &sepolia_signature(),
            EVM_SENDER,
            &SessionId::new("0xsession"),
        )
        .unwrap();

    // Another transaction from the wallet landed after the build
    node.set_nonce(EVM_SENDER, 6);

    match adapter.broadcast(&finalized, Duration::from_secs(2)).await {
        Err(Error::Broadcast(BroadcastError::Rejected { message })) => {
            assert!(message.starts_with("nonce too low"));
        }
        other => panic!("expected nonce rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_connectivity_failure_is_retryable() {
    let node = evm_node();
    let adapter = evm_adapter(&node);
    let unsigned = build_sepolia_transfer(&adapter).await;
    let finalized = adapter
        .finalize_transaction(
            &unsigned,
            &sepolia_signature(),
            EVM_SENDER,
            &SessionId::new("0xsession"),
        )
        .unwrap();

    node.set_offline(true);
    let err = adapter
        .broadcast(&finalized, Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Broadcast(BroadcastError::Connectivity(_))
    ));
    assert!(err.is_retryable());
}

async fn finalized_transfer(adapter: &impl ChainAdapter) -> FinalizedTransaction {
    let unsigned = build_sepolia_transfer(adapter).await;
    adapter
        .finalize_transaction(
            &unsigned,
            &sepolia_signature(),
            EVM_SENDER,
            &SessionId::new("0xsession"),
        )
        .unwrap()
}

/// Node whose first receipt lookups fail at the transport level
struct DroppingReceipts {
    node: MemoryEvmNode,
    failures_left: AtomicUsize,
}

#[async_trait]
impl EvmRpc for DroppingReceipts {
    async fn transaction_count(&self, address: &str) -> Result<u64, RpcError> {
        self.node.transaction_count(address).await
    }

    async fn fees_per_gas(&self) -> Result<FeeEstimate, RpcError> {
        self.node.fees_per_gas().await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, RpcError> {
        self.node.send_raw_transaction(raw).await
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<EvmReceipt>, RpcError> {
        let dropped = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            return Err(RpcError::Transport("connection reset by peer".into()));
        }
        self.node.receipt(tx_hash).await
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        self.node.block_number().await
    }
}

#[tokio::test]
async fn test_receipt_poll_failure_keeps_waiting() {
    let node = evm_node();
    let rpc = DroppingReceipts {
        node: node.clone(),
        failures_left: AtomicUsize::new(2),
    };
    let adapter = EvmAdapter::with_rpc(ChainSettings::ethereum_base_sepolia(), Arc::new(rpc))
        .unwrap()
        .with_poll_interval(Duration::from_millis(5));
    let finalized = finalized_transfer(&adapter).await;

    let receipt = adapter
        .broadcast(&finalized, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(receipt.tx_id, EVM_TX_HASH);
    assert_eq!(node.accepted_transactions().len(), 1);
    assert_eq!(node.nonce(EVM_SENDER), 6);
}

#[tokio::test]
async fn test_reverted_transaction() {
    let node = evm_node();
    let adapter = evm_adapter(&node);
    let finalized = finalized_transfer(&adapter).await;

    node.revert_next();
    match adapter.broadcast(&finalized, Duration::from_secs(2)).await {
        Err(err @ Error::Broadcast(BroadcastError::Reverted { .. })) => {
            assert!(!err.is_retryable());
            assert!(err.to_string().contains(EVM_TX_HASH));
        }
        other => panic!("expected revert, got {other:?}"),
    }
    // The nonce is spent even though execution failed
    assert_eq!(node.nonce(EVM_SENDER), 6);
}

#[tokio::test(start_paused = true)]
async fn test_missing_receipt_after_send_is_unconfirmed() {
    let node = evm_node();
    let adapter = evm_adapter(&node);
    let finalized = finalized_transfer(&adapter).await;

    node.hold_receipts(true);
    let err = adapter
        .broadcast(&finalized, Duration::from_secs(30))
        .await
        .unwrap_err();
    match &err {
        Error::Broadcast(BroadcastError::Unconfirmed { tx_id, .. }) => {
            assert_eq!(tx_id, EVM_TX_HASH)
        }
        other => panic!("expected unconfirmed, got {other:?}"),
    }
    assert!(!err.is_retryable());
    assert_eq!(node.accepted_transactions().len(), 1);
}
