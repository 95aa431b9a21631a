//! In-memory EVM node for testing and local simulation

use super::rpc::{EvmReceipt, EvmRpc, FeeEstimate};
use super::{decode_signed, recover_transaction_signer};
use crate::error::RpcError;
use crate::types::keccak256;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// JSON-RPC error code geth uses for rejected transactions
const REJECTED: i64 = -32000;

#[derive(Debug)]
struct NodeState {
    chain_id: u64,
    fees: FeeEstimate,
    /// lowercase address -> next nonce
    nonces: HashMap<String, u64>,
    head: u64,
    receipts: HashMap<String, EvmReceipt>,
    accepted: Vec<Vec<u8>>,
    reject_next: Option<String>,
    revert_next: bool,
    /// Accept transactions without ever mining them
    hold_receipts: bool,
    offline: bool,
}

/// Single-node chain that mines each accepted transaction into its own block
///
/// Accepts a transaction only if its chain id matches, its signer recovers,
/// and its nonce is the sender's next nonce. Rejections carry geth-style text.
#[derive(Debug, Clone)]
pub struct MemoryEvmNode {
    state: Arc<Mutex<NodeState>>,
}

impl MemoryEvmNode {
    pub fn new(chain_id: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(NodeState {
                chain_id,
                fees: FeeEstimate::fallback(),
                nonces: HashMap::new(),
                head: 1,
                receipts: HashMap::new(),
                accepted: Vec::new(),
                reject_next: None,
                revert_next: false,
                hold_receipts: false,
                offline: false,
            })),
        }
    }

    pub fn set_nonce(&self, address: &str, nonce: u64) {
        self.state
            .lock()
            .nonces
            .insert(address.to_ascii_lowercase(), nonce);
    }

    pub fn nonce(&self, address: &str) -> u64 {
        self.state
            .lock()
            .nonces
            .get(&address.to_ascii_lowercase())
            .copied()
            .unwrap_or(0)
    }

    pub fn set_fees(&self, fees: FeeEstimate) {
        self.state.lock().fees = fees;
    }

    /// Reject the next submission with this node message
    pub fn reject_next_with(&self, message: impl Into<String>) {
        self.state.lock().reject_next = Some(message.into());
    }

    /// Mine the next accepted transaction with a failed status
    pub fn revert_next(&self) {
        self.state.lock().revert_next = true;
    }

    /// Keep accepting transactions but stop producing receipts
    pub fn hold_receipts(&self, hold: bool) {
        self.state.lock().hold_receipts = hold;
    }

    /// Make every call fail at the transport level
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Raw bytes of every accepted transaction
    pub fn accepted_transactions(&self) -> Vec<Vec<u8>> {
        self.state.lock().accepted.clone()
    }

    fn check_online(state: &NodeState) -> Result<(), RpcError> {
        if state.offline {
            return Err(RpcError::Transport("connection refused".into()));
        }
        Ok(())
    }
}

fn rejected(message: impl Into<String>) -> RpcError {
    RpcError::Node {
        code: REJECTED,
        message: message.into(),
    }
}

#[async_trait]
impl EvmRpc for MemoryEvmNode {
    async fn transaction_count(&self, address: &str) -> Result<u64, RpcError> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        Ok(state
            .nonces
            .get(&address.to_ascii_lowercase())
            .copied()
            .unwrap_or(0))
    }

    async fn fees_per_gas(&self) -> Result<FeeEstimate, RpcError> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        Ok(state.fees)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, RpcError> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;

        if let Some(message) = state.reject_next.take() {
            return Err(rejected(message));
        }

        let signed = decode_signed(raw).map_err(|e| rejected(format!("rlp: {}", e)))?;
        if signed.tx.chain_id != state.chain_id {
            return Err(rejected(format!(
                "invalid chain id: have {} want {}",
                signed.tx.chain_id, state.chain_id
            )));
        }
        let sender = recover_transaction_signer(raw).map_err(|_| rejected("invalid sender"))?;

        let expected = state.nonces.get(&sender).copied().unwrap_or(0);
        if signed.tx.nonce < expected {
            return Err(rejected(format!(
                "nonce too low: address {}, tx: {} state: {}",
                sender, signed.tx.nonce, expected
            )));
        }
        if signed.tx.nonce > expected {
            return Err(rejected(format!(
                "nonce too high: address {}, tx: {} state: {}",
                sender, signed.tx.nonce, expected
            )));
        }

        let hash = format!("0x{}", hex::encode(keccak256(raw)));
        state.nonces.insert(sender, expected + 1);
        state.accepted.push(raw.to_vec());
        if state.hold_receipts {
            return Ok(hash);
        }

        state.head += 1;
        let block_number = state.head;
        let success = !std::mem::take(&mut state.revert_next);
        state.receipts.insert(
            hash.clone(),
            EvmReceipt {
                block_number,
                success,
                gas_used: Some(signed.tx.gas_limit),
            },
        );
        Ok(hash)
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<EvmReceipt>, RpcError> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        Ok(state.receipts.get(&tx_hash.to_ascii_lowercase()).cloned())
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        Ok(state.head)
    }
}
