//! # Chain Adapters
//!
//! Chain-specific halves of the signing pipeline. Each adapter builds an
//! unsigned transaction and its exact signing payload from live network
//! parameters, turns a raw threshold signature into a chain-accepted signed
//! transaction, and broadcasts it with confirmation tracking.
//!
//! ## Supported Chains
//!
//! - **EVM** - EIP-1559 transfers signed with ECDSA over secp256k1; the
//!   recovery id is searched during finalization
//! - **Algorand** - payment transactions signed with EdDSA over ed25519
//!
//! ## Example
//!
//! ```rust,ignore
//! use rbac_wallet_core::chain::{ChainAdapter, EvmAdapter, TransferRequest};
//! use rbac_wallet_core::ChainSettings;
//!
//! let adapter = EvmAdapter::new(ChainSettings::ethereum_base_sepolia())?;
//! let sender = adapter.derive_address(&public_key)?;
//! let unsigned = adapter
//!     .build_transaction(&sender, &TransferRequest::new("0x742d...", "0.001"))
//!     .await?;
//! ```

#[cfg(feature = "evm")]
pub mod evm;

#[cfg(feature = "algorand")]
pub mod algorand;

use crate::config::{ChainKind, ChainSettings};
use crate::types::SessionId;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "evm")]
pub use evm::{EvmAdapter, EvmRpc, JsonRpcEvm, MemoryEvmNode};

#[cfg(feature = "algorand")]
pub use algorand::{AlgodClient, AlgodRpc, AlgorandAdapter, MemoryAlgod};

// ============================================================================
// Core Types
// ============================================================================

/// Native-asset transfer to build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Recipient address in the chain's native format
    pub recipient: String,
    /// Amount in whole native units, e.g. "0.001"
    pub amount: String,
}

impl TransferRequest {
    pub fn new(recipient: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            amount: amount.into(),
        }
    }
}

/// Unsigned transaction ready for signing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsignedTx {
    /// Name of the chain preset that built it
    pub chain: String,
    /// Exact bytes handed to the threshold network
    pub signing_payload: Vec<u8>,
    /// Serialized unsigned transaction (chain-specific format)
    pub raw_tx: Vec<u8>,
    /// Human-readable transaction summary
    pub summary: TxSummary,
}

/// Human-readable transaction summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxSummary {
    pub tx_type: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub estimated_fee: String,
    #[serde(default)]
    pub details: Option<String>,
}

/// Signed transaction that passed the signer self-check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizedTransaction {
    pub chain: String,
    /// Serialized signed transaction
    pub raw_tx: Vec<u8>,
    /// Transaction hash or id, computed locally
    pub tx_id: String,
    /// Address recovered or verified from the signature
    pub signer: String,
    /// Recovery id selected by the candidate search (ECDSA only)
    pub recovery_id: Option<u8>,
}

/// Confirmation of a broadcast transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastReceipt {
    pub tx_id: String,
    /// Block number or round of inclusion
    pub confirmed_in: u64,
    pub explorer_url: Option<String>,
}

// ============================================================================
// Chain Adapter Trait
// ============================================================================

/// Chain-specific build, finalize and broadcast operations
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Preset this adapter was created from
    fn settings(&self) -> &ChainSettings;

    /// Derive the chain address of a custodial public key
    fn derive_address(&self, public_key: &[u8]) -> Result<String>;

    /// Check if an address is valid for this chain
    fn is_valid_address(&self, address: &str) -> bool;

    /// Build an unsigned transfer from `sender` using parameters fetched now
    async fn build_transaction(&self, sender: &str, request: &TransferRequest)
        -> Result<UnsignedTx>;

    /// Attach a raw threshold signature and check it against `expected_signer`
    fn finalize_transaction(
        &self,
        unsigned_tx: &UnsignedTx,
        signature: &[u8],
        expected_signer: &str,
        session_id: &SessionId,
    ) -> Result<FinalizedTransaction>;

    /// Submit once and wait for the configured confirmation depth.
    ///
    /// Never retried here: a resubmission needs fresh parameters and a
    /// fresh signing session.
    async fn broadcast(
        &self,
        tx: &FinalizedTransaction,
        timeout: Duration,
    ) -> Result<BroadcastReceipt>;
}

/// Adapter for a preset, talking to its configured endpoints
pub fn adapter_for(settings: ChainSettings) -> Result<Arc<dyn ChainAdapter>> {
    match settings.kind {
        #[cfg(feature = "evm")]
        ChainKind::Evm => Ok(Arc::new(EvmAdapter::new(settings)?)),
        #[cfg(feature = "algorand")]
        ChainKind::Algorand => Ok(Arc::new(AlgorandAdapter::new(settings)?)),
        #[allow(unreachable_patterns)]
        kind => Err(Error::InvalidConfig(format!(
            "{} support is not compiled in",
            kind
        ))),
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert a decimal amount in whole units into base units
pub fn parse_units(value: &str, decimals: u8) -> Result<u128> {
    let value = value.trim();
    let (whole, fraction) = match value.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (value, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(Error::Build(format!("Invalid amount: {:?}", value)));
    }
    if fraction.len() > decimals as usize {
        return Err(Error::Build(format!("Too many decimal places: {}", value)));
    }

    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| Error::Build(format!("Invalid whole part: {}", whole)))?
    };

    let mut fraction = fraction.to_string();
    while fraction.len() < decimals as usize {
        fraction.push('0');
    }
    let fraction_value: u128 = if fraction.is_empty() {
        0
    } else {
        fraction
            .parse()
            .map_err(|_| Error::Build(format!("Invalid fraction part: {}", value)))?
    };

    whole
        .checked_mul(10u128.pow(decimals as u32))
        .and_then(|v| v.checked_add(fraction_value))
        .ok_or_else(|| Error::Build("Amount overflow".into()))
}

/// Format base units as a decimal amount in whole units
pub fn format_units(raw: u128, decimals: u8) -> String {
    if raw == 0 {
        return "0".to_string();
    }

    let divisor = 10u128.pow(decimals as u32);
    let whole = raw / divisor;
    let fraction = raw % divisor;

    if fraction == 0 {
        whole.to_string()
    } else {
        let fraction_str = format!("{:0>width$}", fraction, width = decimals as usize);
        format!("{}.{}", whole, fraction_str.trim_end_matches('0'))
    }
}
