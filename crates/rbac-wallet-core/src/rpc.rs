//! JSON-RPC client with endpoint failover
//!
//! Shared by the Sui ledger reader and the EVM node client. Reads rotate to
//! the next endpoint on transport failure; node errors are returned as-is
//! so their text reaches the caller untouched.

use crate::error::RpcError;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// HTTP JSON-RPC client with failover support
#[derive(Clone)]
pub struct RpcClient {
    urls: Vec<String>,
    client: reqwest::Client,
    current_index: Arc<AtomicUsize>,
}

impl RpcClient {
    /// Create a new RPC client with failover URLs
    pub fn new(urls: Vec<String>) -> Result<Self> {
        if urls.is_empty() {
            return Err(Error::InvalidConfig("At least one RPC URL required".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            urls,
            client,
            current_index: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn current_url(&self) -> &str {
        let idx = self.current_index.load(Ordering::Relaxed);
        &self.urls[idx % self.urls.len()]
    }

    fn rotate_url(&self) {
        self.current_index.fetch_add(1, Ordering::Relaxed);
    }

    /// Make a read request, moving to the next endpoint on transport failure
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> std::result::Result<T, RpcError> {
        let mut last_error = None;

        for _ in 0..self.urls.len() {
            let url = self.current_url();

            match self.make_request(url, method, params.clone()).await {
                Ok(result) => return Ok(result),
                Err(RpcError::Transport(e)) => {
                    tracing::warn!("RPC request {} failed on {}: {}", method, url, e);
                    last_error = Some(RpcError::Transport(e));
                    self.rotate_url();
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| RpcError::Transport("All RPC endpoints failed".into())))
    }

    /// Make a single request against the current endpoint.
    ///
    /// Used for submissions, where replaying against another node could
    /// deliver the same transaction twice.
    pub async fn request_once<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> std::result::Result<T, RpcError> {
        self.make_request(self.current_url(), method, params).await
    }

    async fn make_request<T: DeserializeOwned>(
        &self,
        url: &str,
        method: &str,
        params: serde_json::Value,
    ) -> std::result::Result<T, RpcError> {
        let request_body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .client
            .post(url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| RpcError::Transport(format!("RPC request failed: {}", e)))?;

        let response_body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RpcError::Transport(format!("Failed to parse RPC response: {}", e)))?;

        parse_response(response_body)
    }
}

/// Split a JSON-RPC envelope into its result or node error
pub(crate) fn parse_response<T: DeserializeOwned>(
    body: serde_json::Value,
) -> std::result::Result<T, RpcError> {
    if let Some(error) = body.get("error") {
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(RpcError::Node { code, message });
    }

    let result = body
        .get("result")
        .ok_or_else(|| RpcError::InvalidResponse("Missing result in RPC response".into()))?;

    serde_json::from_value(result.clone())
        .map_err(|e| RpcError::InvalidResponse(format!("Failed to deserialize result: {}", e)))
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("urls", &self.urls)
            .field("current_index", &self.current_index.load(Ordering::Relaxed))
            .finish()
    }
}

/// Parse a `0x`-prefixed quantity
pub(crate) fn parse_hex_u64(s: &str) -> std::result::Result<u64, RpcError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| RpcError::InvalidResponse(format!("Failed to parse hex {}: {}", s, e)))
}

pub(crate) fn parse_hex_u128(s: &str) -> std::result::Result<u128, RpcError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u128::from_str_radix(digits, 16)
        .map_err(|e| RpcError::InvalidResponse(format!("Failed to parse hex {}: {}", s, e)))
}
