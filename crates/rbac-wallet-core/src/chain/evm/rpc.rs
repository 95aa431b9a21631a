//! Account-based node interface and its JSON-RPC implementation

use crate::error::RpcError;
use crate::rpc::{parse_hex_u128, parse_hex_u64, RpcClient};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Max fee used when the node reports no base fee
pub const FALLBACK_MAX_FEE_PER_GAS: u128 = 50_000_000_000;
/// Tip used when the node cannot suggest one
pub const FALLBACK_PRIORITY_FEE_PER_GAS: u128 = 2_000_000_000;

/// EIP-1559 fee parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

impl FeeEstimate {
    pub fn fallback() -> Self {
        Self {
            max_fee_per_gas: FALLBACK_MAX_FEE_PER_GAS,
            max_priority_fee_per_gas: FALLBACK_PRIORITY_FEE_PER_GAS,
        }
    }

    /// Base fee padded by 20% plus the tip
    pub fn from_base_fee(base_fee: u128, priority_fee: u128) -> Self {
        Self {
            max_fee_per_gas: base_fee * 12 / 10 + priority_fee,
            max_priority_fee_per_gas: priority_fee,
        }
    }
}

/// Mined transaction receipt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmReceipt {
    pub block_number: u64,
    pub success: bool,
    pub gas_used: Option<u64>,
}

/// Operations the EVM adapter needs from a node
#[async_trait]
pub trait EvmRpc: Send + Sync {
    async fn transaction_count(&self, address: &str) -> std::result::Result<u64, RpcError>;

    async fn fees_per_gas(&self) -> std::result::Result<FeeEstimate, RpcError>;

    /// Submit signed bytes; returns the transaction hash
    async fn send_raw_transaction(&self, raw: &[u8]) -> std::result::Result<String, RpcError>;

    /// Receipt of a mined transaction, `None` while pending
    async fn receipt(&self, tx_hash: &str) -> std::result::Result<Option<EvmReceipt>, RpcError>;

    async fn block_number(&self) -> std::result::Result<u64, RpcError>;
}

/// [`EvmRpc`] over HTTP JSON-RPC
#[derive(Debug, Clone)]
pub struct JsonRpcEvm {
    rpc: RpcClient,
}

impl JsonRpcEvm {
    pub fn new(urls: Vec<String>) -> Result<Self> {
        Ok(Self {
            rpc: RpcClient::new(urls)?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockHeader {
    base_fee_per_gas: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    block_number: Option<String>,
    status: Option<String>,
    gas_used: Option<String>,
}

#[async_trait]
impl EvmRpc for JsonRpcEvm {
    async fn transaction_count(&self, address: &str) -> std::result::Result<u64, RpcError> {
        let result: String = self
            .rpc
            .request(
                "eth_getTransactionCount",
                serde_json::json!([address, "latest"]),
            )
            .await?;
        parse_hex_u64(&result)
    }

    async fn fees_per_gas(&self) -> std::result::Result<FeeEstimate, RpcError> {
        let block: Option<BlockHeader> = self
            .rpc
            .request("eth_getBlockByNumber", serde_json::json!(["latest", false]))
            .await?;

        let Some(base_fee) = block.and_then(|b| b.base_fee_per_gas) else {
            debug!("no base fee reported, using fallback fees");
            return Ok(FeeEstimate::fallback());
        };
        let base_fee = parse_hex_u128(&base_fee)?;

        let priority_fee = match self
            .rpc
            .request::<String>("eth_maxPriorityFeePerGas", serde_json::json!([]))
            .await
        {
            Ok(tip) => parse_hex_u128(&tip)?,
            Err(RpcError::Node { message, .. }) => {
                debug!(%message, "eth_maxPriorityFeePerGas unsupported, using fallback tip");
                FALLBACK_PRIORITY_FEE_PER_GAS
            }
            Err(e) => return Err(e),
        };

        Ok(FeeEstimate::from_base_fee(base_fee, priority_fee))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> std::result::Result<String, RpcError> {
        let raw_hex = format!("0x{}", hex::encode(raw));
        self.rpc
            .request_once("eth_sendRawTransaction", serde_json::json!([raw_hex]))
            .await
    }

    async fn receipt(&self, tx_hash: &str) -> std::result::Result<Option<EvmReceipt>, RpcError> {
        let result: Option<RawReceipt> = self
            .rpc
            .request("eth_getTransactionReceipt", serde_json::json!([tx_hash]))
            .await?;

        let Some(receipt) = result else {
            return Ok(None);
        };
        let Some(block_number) = receipt.block_number else {
            return Ok(None);
        };

        Ok(Some(EvmReceipt {
            block_number: parse_hex_u64(&block_number)?,
            success: receipt.status.as_deref() != Some("0x0"),
            gas_used: receipt
                .gas_used
                .as_deref()
                .and_then(|g| parse_hex_u64(g).ok()),
        }))
    }

    async fn block_number(&self) -> std::result::Result<u64, RpcError> {
        let result: String = self
            .rpc
            .request("eth_blockNumber", serde_json::json!([]))
            .await?;
        parse_hex_u64(&result)
    }
}
