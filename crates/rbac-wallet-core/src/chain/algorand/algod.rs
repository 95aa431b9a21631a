//! Algod REST interface and its HTTP implementation

use crate::error::RpcError;
use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Header carrying the algod API token
const API_TOKEN_HEADER: &str = "X-Algo-API-Token";

/// Validity window length in rounds
pub const VALIDITY_WINDOW: u64 = 1000;

/// Network parameters a payment is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestedParams {
    /// Fee per byte in microAlgos; zero on an uncongested network
    pub fee_per_byte: u64,
    pub min_fee: u64,
    pub first_valid: u64,
    pub last_valid: u64,
    pub genesis_id: String,
    pub genesis_hash: [u8; 32],
}

impl SuggestedParams {
    /// Fee for a transaction of `signed_size` bytes
    pub fn fee_for(&self, signed_size: usize) -> u64 {
        self.fee_per_byte
            .saturating_mul(signed_size as u64)
            .max(self.min_fee)
    }
}

/// Status of a transaction in the pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingTransaction {
    pub confirmed_round: Option<u64>,
    /// Non-empty when the pool evicted the transaction
    pub pool_error: String,
}

/// Operations the Algorand adapter needs from algod
#[async_trait]
pub trait AlgodRpc: Send + Sync {
    async fn suggested_params(&self) -> std::result::Result<SuggestedParams, RpcError>;

    /// Submit signed bytes; returns the transaction id
    async fn send_raw_transaction(&self, raw: &[u8]) -> std::result::Result<String, RpcError>;

    async fn pending_transaction(
        &self,
        tx_id: &str,
    ) -> std::result::Result<PendingTransaction, RpcError>;

    /// Last committed round
    async fn status(&self) -> std::result::Result<u64, RpcError>;

    /// Block until a round after `round` is committed; returns the last round
    async fn status_after_block(&self, round: u64) -> std::result::Result<u64, RpcError>;
}

/// [`AlgodRpc`] over the algod v2 REST API
#[derive(Debug, Clone)]
pub struct AlgodClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl AlgodClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::InvalidConfig("algod URL is empty".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    /// Send an API token with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(API_TOKEN_HEADER, token),
            None => request,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> std::result::Result<T, RpcError> {
        debug!(path, "algod GET");
        let response = self
            .authorize(self.client.get(self.url(path)))
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        read_response(response).await
    }
}

/// Map a non-2xx response to the node's own `message`
async fn read_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> std::result::Result<T, RpcError> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| RpcError::Transport(e.to_string()))?;

    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
        return Err(RpcError::Node {
            code: i64::from(status.as_u16()),
            message,
        });
    }

    serde_json::from_slice(&body).map_err(|e| RpcError::InvalidResponse(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ParamsResponse {
    #[serde(default)]
    fee: u64,
    genesis_hash: String,
    genesis_id: String,
    last_round: u64,
    min_fee: u64,
}

impl ParamsResponse {
    fn into_params(self) -> std::result::Result<SuggestedParams, RpcError> {
        let hash = base64::engine::general_purpose::STANDARD
            .decode(&self.genesis_hash)
            .map_err(|e| RpcError::InvalidResponse(format!("genesis-hash: {}", e)))?;
        let genesis_hash: [u8; 32] = hash
            .try_into()
            .map_err(|_| RpcError::InvalidResponse("genesis-hash is not 32 bytes".into()))?;

        Ok(SuggestedParams {
            fee_per_byte: self.fee,
            min_fee: self.min_fee,
            first_valid: self.last_round,
            last_valid: self.last_round + VALIDITY_WINDOW,
            genesis_id: self.genesis_id,
            genesis_hash,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(rename = "txId")]
    tx_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PendingResponse {
    confirmed_round: Option<u64>,
    #[serde(default)]
    pool_error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StatusResponse {
    last_round: u64,
}

#[async_trait]
impl AlgodRpc for AlgodClient {
    async fn suggested_params(&self) -> std::result::Result<SuggestedParams, RpcError> {
        let response: ParamsResponse = self.get("/v2/transactions/params").await?;
        response.into_params()
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> std::result::Result<String, RpcError> {
        let response = self
            .authorize(self.client.post(self.url("/v2/transactions")))
            .header(reqwest::header::CONTENT_TYPE, "application/x-binary")
            .body(raw.to_vec())
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        let sent: SendResponse = read_response(response).await?;
        Ok(sent.tx_id)
    }

    async fn pending_transaction(
        &self,
        tx_id: &str,
    ) -> std::result::Result<PendingTransaction, RpcError> {
        let response: PendingResponse = self
            .get(&format!("/v2/transactions/pending/{}", tx_id))
            .await?;
        Ok(PendingTransaction {
            confirmed_round: response.confirmed_round.filter(|r| *r > 0),
            pool_error: response.pool_error,
        })
    }

    async fn status(&self) -> std::result::Result<u64, RpcError> {
        let response: StatusResponse = self.get("/v2/status").await?;
        Ok(response.last_round)
    }

    async fn status_after_block(&self, round: u64) -> std::result::Result<u64, RpcError> {
        let response: StatusResponse = self
            .get(&format!("/v2/status/wait-for-block-after/{}", round))
            .await?;
        Ok(response.last_round)
    }
}
