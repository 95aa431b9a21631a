//! # Algorand Chain Adapter
//!
//! Payment transactions signed by an ed25519 custodial key. The signing
//! payload is `"TX" || msgpack(txn)`; the threshold signature attaches
//! directly after it verifies against the sender, and broadcast waits a
//! bounded number of rounds for the transaction to be committed.

pub mod algod;
pub mod codec;
pub mod memory;

use super::{
    format_units, parse_units, BroadcastReceipt, ChainAdapter, FinalizedTransaction,
    TransferRequest, TxSummary, UnsignedTx,
};
use crate::config::{ChainKind, ChainSettings};
use crate::error::{BroadcastError, RpcError};
use crate::types::SessionId;
use crate::{Error, Result};
use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub use algod::{AlgodClient, AlgodRpc, PendingTransaction, SuggestedParams};
pub use codec::{decode_address, encode_address, PaymentTransaction, SignedTransaction};
pub use memory::MemoryAlgod;

/// Transaction type tag of payments
pub const PAYMENT_TYPE: &str = "pay";

/// Algorand chain adapter implementation
#[derive(Clone)]
pub struct AlgorandAdapter {
    settings: ChainSettings,
    algod: Arc<dyn AlgodRpc>,
    /// Back-off after a failed algod call while confirming
    poll_interval: Duration,
}

impl AlgorandAdapter {
    /// Create an adapter talking REST to the preset's first algod endpoint
    pub fn new(settings: ChainSettings) -> Result<Self> {
        let url = settings
            .rpc_urls
            .first()
            .cloned()
            .ok_or_else(|| Error::InvalidConfig(format!("{} has no algod URL", settings.name)))?;
        let mut client = AlgodClient::new(url)?;
        if let Some(token) = &settings.api_token {
            client = client.with_token(token.clone());
        }
        Self::with_algod(settings, Arc::new(client))
    }

    /// Create an adapter over any algod implementation
    pub fn with_algod(settings: ChainSettings, algod: Arc<dyn AlgodRpc>) -> Result<Self> {
        settings.validate()?;
        if settings.kind != ChainKind::Algorand {
            return Err(Error::InvalidConfig(format!(
                "{} is not an Algorand chain",
                settings.name
            )));
        }
        Ok(Self {
            settings,
            algod,
            poll_interval: Duration::from_secs(1),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Wait up to `confirmations` rounds for the transaction to be committed.
    ///
    /// Runs after a successful submission, so transport failures are logged
    /// and retried rather than surfaced as retryable errors.
    async fn wait_for_confirmation(&self, tx_id: &str) -> Result<BroadcastReceipt> {
        let rounds = self.settings.confirmations.max(1);
        let start = loop {
            match self.algod.status().await {
                Ok(round) => break round + 1,
                Err(e) => {
                    warn!(error = %e, "algod status failed while confirming");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        };
        let mut current = start;

        while current < start + rounds {
            match self.algod.pending_transaction(tx_id).await {
                Ok(pending) => {
                    if let Some(round) = pending.confirmed_round {
                        return Ok(BroadcastReceipt {
                            tx_id: tx_id.to_string(),
                            confirmed_in: round,
                            explorer_url: self.settings.explorer_tx_url(tx_id),
                        });
                    }
                    if !pending.pool_error.is_empty() {
                        return Err(Error::Broadcast(BroadcastError::Rejected {
                            message: pending.pool_error,
                        }));
                    }
                }
                // Another node behind the same endpoint may not know the txn yet
                Err(RpcError::Node { message, .. }) => {
                    debug!(%message, "pending lookup failed");
                }
                Err(e) => {
                    warn!(error = %e, "pending lookup failed while confirming");
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            }

            match self.algod.status_after_block(current).await {
                Ok(_) => current += 1,
                Err(e) => {
                    warn!(error = %e, round = current, "round wait failed while confirming");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        Err(Error::Broadcast(BroadcastError::Unconfirmed {
            tx_id: tx_id.to_string(),
            reason: format!("not confirmed after {} rounds", rounds),
        }))
    }
}

impl std::fmt::Debug for AlgorandAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorandAdapter")
            .field("chain", &self.settings.name)
            .finish()
    }
}

#[async_trait]
impl ChainAdapter for AlgorandAdapter {
    fn settings(&self) -> &ChainSettings {
        &self.settings
    }

    fn derive_address(&self, public_key: &[u8]) -> Result<String> {
        let public_key: [u8; 32] = public_key.try_into().map_err(|_| {
            Error::Crypto(format!(
                "Invalid ed25519 public key length: {}",
                public_key.len()
            ))
        })?;
        Ok(encode_address(&public_key))
    }

    fn is_valid_address(&self, address: &str) -> bool {
        decode_address(address).is_ok()
    }

    #[instrument(skip(self, request), fields(chain = %self.settings.name))]
    async fn build_transaction(
        &self,
        sender: &str,
        request: &TransferRequest,
    ) -> Result<UnsignedTx> {
        let receiver = decode_address(&request.recipient)?;
        let sender_key = decode_address(sender)?;
        let amount = parse_units(&request.amount, self.settings.decimals)?;
        let amount = u64::try_from(amount)
            .map_err(|_| Error::Build(format!("Amount too large: {}", request.amount)))?;

        let params = self
            .algod
            .suggested_params()
            .await
            .map_err(|e| Error::Build(format!("suggested params: {}", e)))?;

        let mut tx = PaymentTransaction {
            amount,
            fee: params.fee_per_byte,
            first_valid: params.first_valid,
            genesis_id: params.genesis_id.clone(),
            genesis_hash: params.genesis_hash,
            last_valid: params.last_valid,
            receiver,
            sender: sender_key,
            tx_type: PAYMENT_TYPE.to_string(),
        };
        tx.fee = params.fee_for(tx.estimate_signed_size()?);

        let raw_tx = tx.encode()?;
        let signing_payload = tx.bytes_to_sign()?;
        info!(
            fee = tx.fee,
            first_valid = tx.first_valid,
            last_valid = tx.last_valid,
            "built payment transaction"
        );

        Ok(UnsignedTx {
            chain: self.settings.name.clone(),
            signing_payload,
            raw_tx,
            summary: TxSummary {
                tx_type: "Payment".to_string(),
                from: sender.to_string(),
                to: request.recipient.clone(),
                value: format!("{} {}", request.amount, self.settings.symbol),
                estimated_fee: format!(
                    "{} {}",
                    format_units(tx.fee as u128, self.settings.decimals),
                    self.settings.symbol
                ),
                details: Some(format!("valid rounds {}-{}", tx.first_valid, tx.last_valid)),
            },
        })
    }

    fn finalize_transaction(
        &self,
        unsigned_tx: &UnsignedTx,
        signature: &[u8],
        expected_signer: &str,
        session_id: &SessionId,
    ) -> Result<FinalizedTransaction> {
        let signature: [u8; 64] = signature.try_into().map_err(|_| {
            Error::Crypto(format!(
                "Expected 64-byte ed25519 signature, got {} bytes",
                signature.len()
            ))
        })?;
        let tx = PaymentTransaction::decode(&unsigned_tx.raw_tx)?;
        let signer = encode_address(&tx.sender);

        let reconstruction_error = |details: String| Error::SignatureReconstruction {
            session_id: session_id.to_string(),
            details,
        };

        if signer != expected_signer {
            return Err(reconstruction_error(format!(
                "transaction sender {} is not {}",
                signer, expected_signer
            )));
        }

        let key = VerifyingKey::from_bytes(&tx.sender)
            .map_err(|e| Error::Crypto(format!("Invalid sender key: {}", e)))?;
        if let Err(e) = key.verify(&tx.bytes_to_sign()?, &Signature::from_bytes(&signature)) {
            warn!(%session_id, %signer, "ed25519 signature does not verify");
            return Err(reconstruction_error(format!(
                "signature does not verify for {}: {}",
                signer, e
            )));
        }

        let tx_id = tx.tx_id()?;
        let raw_tx = SignedTransaction {
            signature,
            transaction: tx,
        }
        .encode()?;
        info!(%session_id, %tx_id, "finalized Algorand transaction");

        Ok(FinalizedTransaction {
            chain: self.settings.name.clone(),
            raw_tx,
            tx_id,
            signer,
            recovery_id: None,
        })
    }

    #[instrument(skip(self, tx), fields(tx_id = %tx.tx_id))]
    async fn broadcast(
        &self,
        tx: &FinalizedTransaction,
        timeout: Duration,
    ) -> Result<BroadcastReceipt> {
        let tx_id = self
            .algod
            .send_raw_transaction(&tx.raw_tx)
            .await
            .map_err(|e| Error::Broadcast(e.into_broadcast()))?;

        if tx_id != tx.tx_id {
            warn!(node_tx_id = %tx_id, "node reported a different transaction id");
        }

        let receipt = tokio::time::timeout(timeout, self.wait_for_confirmation(&tx_id))
            .await
            .map_err(|_| {
                Error::Broadcast(BroadcastError::Unconfirmed {
                    tx_id: tx_id.clone(),
                    reason: format!("no confirmation within {:?}", timeout),
                })
            })??;

        info!(round = receipt.confirmed_in, "transaction confirmed");
        Ok(receipt)
    }
}
