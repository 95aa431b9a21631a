//! # EVM Chain Adapter
//!
//! EIP-1559 native transfers signed by a secp256k1 custodial key:
//! - Nonce and fee estimate fetched in parallel at build time
//! - Signing payload is the typed unsigned encoding `0x02 || rlp(tx)`
//! - Finalization searches the recovery id against the wallet address
//! - Broadcast waits for receipt confirmations
//!
//! ## Example
//!
//! ```rust,ignore
//! use rbac_wallet_core::chain::evm::EvmAdapter;
//! use rbac_wallet_core::ChainSettings;
//!
//! let adapter = EvmAdapter::new(ChainSettings::ethereum_base_sepolia())?;
//! let finalized = adapter.finalize_transaction(&unsigned, &rs, &address, &session)?;
//! ```

pub mod memory;
pub mod rpc;

use super::{
    format_units, parse_units, BroadcastReceipt, ChainAdapter, FinalizedTransaction,
    TransferRequest, TxSummary, UnsignedTx,
};
use crate::config::{ChainKind, ChainSettings};
use crate::error::BroadcastError;
use crate::finalize::{search_recovery_candidates, SECP256K1_RECOVERY_CANDIDATES};
use crate::types::{keccak256, SessionId};
use crate::{Error, Result};
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use async_trait::async_trait;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub use memory::MemoryEvmNode;
pub use rpc::{EvmReceipt, EvmRpc, FeeEstimate, JsonRpcEvm};

/// Gas limit of a plain value transfer
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// EIP-2718 type byte of EIP-1559 transactions
pub const EIP1559_TX_TYPE: u8 = 0x02;

// ============================================================================
// EIP-1559 Transaction Type
// ============================================================================

/// EIP-1559 transaction without signature fields
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct Eip1559Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: u128,
    pub max_fee_per_gas: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub access_list: Vec<AccessListItem>,
}

/// Access list item for EIP-2930
#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct AccessListItem {
    pub address: Address,
    pub storage_keys: Vec<B256>,
}

impl Eip1559Transaction {
    /// Typed encoding with signature fields absent; this is the signing payload
    pub fn encode_unsigned(&self) -> Vec<u8> {
        let mut encoded = vec![EIP1559_TX_TYPE];
        self.encode(&mut encoded);
        encoded
    }

    /// Decode the output of [`Eip1559Transaction::encode_unsigned`]
    pub fn decode_unsigned(raw: &[u8]) -> Result<Self> {
        let mut rlp = raw
            .strip_prefix(&[EIP1559_TX_TYPE])
            .ok_or_else(|| Error::Deserialization("not an EIP-1559 transaction".into()))?;
        let tx = Self::decode(&mut rlp)
            .map_err(|e| Error::Deserialization(format!("Failed to decode transaction: {}", e)))?;
        if !rlp.is_empty() {
            return Err(Error::Deserialization(format!(
                "{} trailing bytes after transaction",
                rlp.len()
            )));
        }
        Ok(tx)
    }

    /// Encode the transaction with signature
    pub fn encode_signed(&self, y_parity: u8, r: U256, s: U256) -> Vec<u8> {
        // 0x02 || rlp([chainId, nonce, maxPriorityFeePerGas, maxFeePerGas, gasLimit, to, value, data, accessList, yParity, r, s])
        let mut stream = alloy_rlp::BytesMut::new();

        alloy_rlp::Header {
            list: true,
            payload_length: self.rlp_payload_length() + y_parity.length() + r.length() + s.length(),
        }
        .encode(&mut stream);

        self.chain_id.encode(&mut stream);
        self.nonce.encode(&mut stream);
        self.max_priority_fee_per_gas.encode(&mut stream);
        self.max_fee_per_gas.encode(&mut stream);
        self.gas_limit.encode(&mut stream);
        self.to.encode(&mut stream);
        self.value.encode(&mut stream);
        self.data.encode(&mut stream);
        self.access_list.encode(&mut stream);
        y_parity.encode(&mut stream);
        r.encode(&mut stream);
        s.encode(&mut stream);

        let mut result = vec![EIP1559_TX_TYPE];
        result.extend_from_slice(&stream);
        result
    }

    fn rlp_payload_length(&self) -> usize {
        self.chain_id.length()
            + self.nonce.length()
            + self.max_priority_fee_per_gas.length()
            + self.max_fee_per_gas.length()
            + self.gas_limit.length()
            + self.to.length()
            + self.value.length()
            + self.data.length()
            + self.access_list.length()
    }
}

/// Signed EIP-1559 transaction split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEip1559 {
    pub tx: Eip1559Transaction,
    pub y_parity: u8,
    pub r: U256,
    pub s: U256,
}

/// Decode the output of [`Eip1559Transaction::encode_signed`]
pub fn decode_signed(raw: &[u8]) -> Result<SignedEip1559> {
    let decode_err = |e: alloy_rlp::Error| Error::Deserialization(format!("Invalid signed tx: {}", e));

    let mut buf = raw
        .strip_prefix(&[EIP1559_TX_TYPE])
        .ok_or_else(|| Error::Deserialization("not an EIP-1559 transaction".into()))?;
    let header = alloy_rlp::Header::decode(&mut buf).map_err(decode_err)?;
    if !header.list || header.payload_length != buf.len() {
        return Err(Error::Deserialization("malformed signed transaction list".into()));
    }

    let tx = Eip1559Transaction {
        chain_id: u64::decode(&mut buf).map_err(decode_err)?,
        nonce: u64::decode(&mut buf).map_err(decode_err)?,
        max_priority_fee_per_gas: u128::decode(&mut buf).map_err(decode_err)?,
        max_fee_per_gas: u128::decode(&mut buf).map_err(decode_err)?,
        gas_limit: u64::decode(&mut buf).map_err(decode_err)?,
        to: Address::decode(&mut buf).map_err(decode_err)?,
        value: U256::decode(&mut buf).map_err(decode_err)?,
        data: Bytes::decode(&mut buf).map_err(decode_err)?,
        access_list: Vec::<AccessListItem>::decode(&mut buf).map_err(decode_err)?,
    };
    let y_parity = u8::decode(&mut buf).map_err(decode_err)?;
    let r = U256::decode(&mut buf).map_err(decode_err)?;
    let s = U256::decode(&mut buf).map_err(decode_err)?;

    if !buf.is_empty() {
        return Err(Error::Deserialization("trailing bytes in signed transaction".into()));
    }

    Ok(SignedEip1559 { tx, y_parity, r, s })
}

/// Recover the sender address of a signed EIP-1559 transaction
pub fn recover_transaction_signer(raw: &[u8]) -> Result<String> {
    let signed = decode_signed(raw)?;
    let recovery_id = RecoveryId::from_byte(signed.y_parity)
        .ok_or_else(|| Error::Crypto(format!("Invalid y parity {}", signed.y_parity)))?;

    let r: [u8; 32] = signed.r.to_be_bytes();
    let s: [u8; 32] = signed.s.to_be_bytes();
    let signature = EcdsaSignature::from_scalars(
        *k256::FieldBytes::from_slice(&r),
        *k256::FieldBytes::from_slice(&s),
    )
    .map_err(|e| Error::Crypto(format!("Invalid signature scalars: {}", e)))?;

    let digest = keccak256(&signed.tx.encode_unsigned());
    let key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
        .map_err(|e| Error::Crypto(format!("Public key recovery failed: {}", e)))?;

    Ok(address_from_uncompressed(
        &key.to_encoded_point(false).as_bytes()[1..],
    ))
}

/// Keccak-256 of the 64-byte uncompressed key, last 20 bytes
fn address_from_uncompressed(pk_bytes: &[u8]) -> String {
    let hash = keccak256(pk_bytes);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Derive the address of a secp256k1 public key (33, 64 or 65 bytes)
pub fn derive_evm_address(public_key: &[u8]) -> Result<String> {
    let pk_bytes = match public_key.len() {
        33 => {
            let point = k256::EncodedPoint::from_bytes(public_key)
                .map_err(|e| Error::Crypto(format!("Invalid public key: {}", e)))?;
            let affine: k256::AffinePoint =
                Option::from(k256::AffinePoint::from_encoded_point(&point))
                    .ok_or_else(|| Error::Crypto("Failed to decompress public key".into()))?;
            affine.to_encoded_point(false).as_bytes()[1..].to_vec()
        }
        65 => public_key[1..].to_vec(),
        64 => public_key.to_vec(),
        len => {
            return Err(Error::Crypto(format!("Invalid public key length: {}", len)));
        }
    };

    Ok(address_from_uncompressed(&pk_bytes))
}

// ============================================================================
// EVM Adapter
// ============================================================================

/// EVM chain adapter implementation
#[derive(Clone)]
pub struct EvmAdapter {
    settings: ChainSettings,
    rpc: Arc<dyn EvmRpc>,
    poll_interval: Duration,
}

impl EvmAdapter {
    /// Create an adapter talking JSON-RPC to the preset's endpoints
    pub fn new(settings: ChainSettings) -> Result<Self> {
        let rpc = JsonRpcEvm::new(settings.rpc_urls.clone())?;
        Self::with_rpc(settings, Arc::new(rpc))
    }

    /// Create an adapter over any node implementation
    pub fn with_rpc(settings: ChainSettings, rpc: Arc<dyn EvmRpc>) -> Result<Self> {
        settings.validate()?;
        if settings.kind != ChainKind::Evm {
            return Err(Error::InvalidConfig(format!("{} is not an EVM chain", settings.name)));
        }
        Ok(Self {
            settings,
            rpc,
            poll_interval: Duration::from_secs(2),
        })
    }

    /// Set the receipt polling interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn chain_id(&self) -> Result<u64> {
        self.settings
            .chain_id
            .ok_or_else(|| Error::InvalidConfig(format!("{} has no chain id", self.settings.name)))
    }

    /// Poll until the receipt is `confirmations` deep.
    ///
    /// The transaction is already submitted, so RPC failures here are logged
    /// and polling continues; the caller's deadline bounds the wait.
    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<BroadcastReceipt> {
        loop {
            match self.rpc.receipt(tx_hash).await {
                Ok(Some(receipt)) if !receipt.success => {
                    return Err(Error::Broadcast(BroadcastError::Reverted {
                        tx_id: tx_hash.to_string(),
                    }));
                }
                Ok(Some(receipt)) => match self.rpc.block_number().await {
                    Ok(head) => {
                        let depth = (head + 1).saturating_sub(receipt.block_number);
                        if depth >= self.settings.confirmations {
                            return Ok(BroadcastReceipt {
                                tx_id: tx_hash.to_string(),
                                confirmed_in: receipt.block_number,
                                explorer_url: self.settings.explorer_tx_url(tx_hash),
                            });
                        }
                    }
                    Err(e) => warn!(error = %e, "eth_blockNumber failed while confirming"),
                },
                Ok(None) => {}
                Err(e) => warn!(error = %e, "eth_getTransactionReceipt failed while confirming"),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

impl std::fmt::Debug for EvmAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmAdapter")
            .field("chain", &self.settings.name)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn settings(&self) -> &ChainSettings {
        &self.settings
    }

    fn derive_address(&self, public_key: &[u8]) -> Result<String> {
        derive_evm_address(public_key)
    }

    fn is_valid_address(&self, address: &str) -> bool {
        address.len() == 42
            && address.starts_with("0x")
            && address[2..].chars().all(|c| c.is_ascii_hexdigit())
    }

    #[instrument(skip(self, request), fields(chain = %self.settings.name))]
    async fn build_transaction(
        &self,
        sender: &str,
        request: &TransferRequest,
    ) -> Result<UnsignedTx> {
        if !self.is_valid_address(&request.recipient) {
            return Err(Error::InvalidAddress(request.recipient.clone()));
        }
        let to = Address::from_str(&request.recipient)
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", request.recipient, e)))?;
        let value = parse_units(&request.amount, self.settings.decimals)?;
        let chain_id = self.chain_id()?;

        let (nonce, fees) = tokio::try_join!(
            async {
                self.rpc
                    .transaction_count(sender)
                    .await
                    .map_err(|e| Error::Build(format!("eth_getTransactionCount: {}", e)))
            },
            async {
                self.rpc
                    .fees_per_gas()
                    .await
                    .map_err(|e| Error::Build(format!("fee estimation: {}", e)))
            },
        )?;

        let tx = Eip1559Transaction {
            chain_id,
            nonce,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
            max_fee_per_gas: fees.max_fee_per_gas,
            gas_limit: TRANSFER_GAS_LIMIT,
            to,
            value: U256::from(value),
            data: Bytes::new(),
            access_list: vec![],
        };
        let raw_tx = tx.encode_unsigned();

        let max_fee = format_units(
            fees.max_fee_per_gas.saturating_mul(TRANSFER_GAS_LIMIT as u128),
            self.settings.decimals,
        );
        info!(nonce, max_fee_per_gas = fees.max_fee_per_gas, "built EIP-1559 transfer");

        Ok(UnsignedTx {
            chain: self.settings.name.clone(),
            signing_payload: raw_tx.clone(),
            raw_tx,
            summary: TxSummary {
                tx_type: "Transfer".to_string(),
                from: sender.to_string(),
                to: request.recipient.clone(),
                value: format!("{} {}", request.amount, self.settings.symbol),
                estimated_fee: format!("{} {}", max_fee, self.settings.symbol),
                details: Some(format!("nonce {}", nonce)),
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
        if signature.len() != 64 {
            return Err(Error::Crypto(format!(
                "Expected 64-byte (r, s) signature, got {} bytes",
                signature.len()
            )));
        }
        let tx = Eip1559Transaction::decode_unsigned(&unsigned_tx.raw_tx)?;
        let r = U256::from_be_slice(&signature[..32]);
        let s = U256::from_be_slice(&signature[32..]);

        let accepted = search_recovery_candidates(
            &SECP256K1_RECOVERY_CANDIDATES,
            expected_signer,
            session_id,
            |recovery_id| {
                let raw = tx.encode_signed(recovery_id, r, s);
                let signer = recover_transaction_signer(&raw)?;
                Ok((raw, signer))
            },
        )?;

        let raw_tx = accepted.value;
        let tx_id = format!("0x{}", hex::encode(keccak256(&raw_tx)));
        info!(%session_id, recovery_id = accepted.recovery_id, %tx_id, "finalized EVM transaction");

        Ok(FinalizedTransaction {
            chain: self.settings.name.clone(),
            raw_tx,
            tx_id,
            signer: accepted.signer,
            recovery_id: Some(accepted.recovery_id),
        })
    }

    #[instrument(skip(self, tx), fields(tx_id = %tx.tx_id))]
    async fn broadcast(
        &self,
        tx: &FinalizedTransaction,
        timeout: Duration,
    ) -> Result<BroadcastReceipt> {
        let hash = self
            .rpc
            .send_raw_transaction(&tx.raw_tx)
            .await
            .map_err(|e| Error::Broadcast(e.into_broadcast()))?;

        if !hash.eq_ignore_ascii_case(&tx.tx_id) {
            warn!(node_hash = %hash, "node reported a different transaction hash");
        }

        let receipt = tokio::time::timeout(timeout, self.wait_for_receipt(&hash))
            .await
            .map_err(|_| {
                Error::Broadcast(BroadcastError::Unconfirmed {
                    tx_id: hash.clone(),
                    reason: format!("no confirmation within {:?}", timeout),
                })
            })??;

        info!(block = receipt.confirmed_in, "transaction confirmed");
        Ok(receipt)
    }
}
