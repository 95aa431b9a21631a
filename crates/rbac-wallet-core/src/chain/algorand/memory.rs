//! In-memory algod for testing and local simulation

use super::algod::{AlgodRpc, PendingTransaction, SuggestedParams, VALIDITY_WINDOW};
use super::codec::{encode_address, SignedTransaction};
use crate::error::RpcError;
use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const BAD_REQUEST: i64 = 400;
const NOT_FOUND: i64 = 404;

#[derive(Debug)]
struct AlgodState {
    genesis_id: String,
    genesis_hash: [u8; 32],
    last_round: u64,
    fee_per_byte: u64,
    min_fee: u64,
    /// tx id -> confirmed round
    confirmed: HashMap<String, u64>,
    /// Accepted but never committed while `hold` is set
    pooled: HashSet<String>,
    hold: bool,
    accepted: Vec<Vec<u8>>,
    reject_next: Option<String>,
    offline: bool,
}

/// Single-node network that commits each accepted payment in the next round
///
/// Checks signature, genesis, fee floor and validity window the way the
/// transaction pool does, answering with the pool's message on rejection.
#[derive(Debug, Clone)]
pub struct MemoryAlgod {
    state: Arc<Mutex<AlgodState>>,
}

impl MemoryAlgod {
    pub fn new(genesis_id: impl Into<String>, genesis_hash: [u8; 32], last_round: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(AlgodState {
                genesis_id: genesis_id.into(),
                genesis_hash,
                last_round,
                fee_per_byte: 0,
                min_fee: 1000,
                confirmed: HashMap::new(),
                pooled: HashSet::new(),
                hold: false,
                accepted: Vec::new(),
                reject_next: None,
                offline: false,
            })),
        }
    }

    pub fn set_fee_per_byte(&self, fee_per_byte: u64) {
        self.state.lock().fee_per_byte = fee_per_byte;
    }

    pub fn last_round(&self) -> u64 {
        self.state.lock().last_round
    }

    /// Reject the next submission with this pool message
    pub fn reject_next_with(&self, message: impl Into<String>) {
        self.state.lock().reject_next = Some(message.into());
    }

    /// Keep new transactions in the pool instead of committing them
    pub fn hold_transactions(&self, hold: bool) {
        self.state.lock().hold = hold;
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Raw bytes of every accepted transaction
    pub fn accepted_transactions(&self) -> Vec<Vec<u8>> {
        self.state.lock().accepted.clone()
    }

    fn check_online(state: &AlgodState) -> Result<(), RpcError> {
        if state.offline {
            return Err(RpcError::Transport("connection refused".into()));
        }
        Ok(())
    }
}

fn rejected(message: impl Into<String>) -> RpcError {
    RpcError::Node {
        code: BAD_REQUEST,
        message: message.into(),
    }
}

#[async_trait]
impl AlgodRpc for MemoryAlgod {
    async fn suggested_params(&self) -> Result<SuggestedParams, RpcError> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        Ok(SuggestedParams {
            fee_per_byte: state.fee_per_byte,
            min_fee: state.min_fee,
            first_valid: state.last_round,
            last_valid: state.last_round + VALIDITY_WINDOW,
            genesis_id: state.genesis_id.clone(),
            genesis_hash: state.genesis_hash,
        })
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, RpcError> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;

        if let Some(message) = state.reject_next.take() {
            return Err(rejected(message));
        }

        let signed = SignedTransaction::decode(raw)
            .map_err(|e| rejected(format!("msgpack decode error: {}", e)))?;
        let tx = &signed.transaction;
        let tx_id = tx.tx_id().map_err(|e| rejected(e.to_string()))?;

        if tx.genesis_hash != state.genesis_hash || tx.genesis_id != state.genesis_id {
            return Err(rejected(format!(
                "TransactionPool.Remember: transaction {}: genesis mismatch",
                tx_id
            )));
        }

        let key = VerifyingKey::from_bytes(&tx.sender)
            .map_err(|_| rejected(format!("invalid sender {}", encode_address(&tx.sender))))?;
        let message = tx.bytes_to_sign().map_err(|e| rejected(e.to_string()))?;
        key.verify(&message, &Signature::from_bytes(&signed.signature))
            .map_err(|_| {
                rejected(format!(
                    "TransactionPool.Remember: transaction {}: At least one signature didn't pass verification",
                    tx_id
                ))
            })?;

        if tx.fee < state.min_fee {
            return Err(rejected(format!(
                "TransactionPool.Remember: transaction {}: fee {} below threshold {}",
                tx_id, tx.fee, state.min_fee
            )));
        }

        let next_round = state.last_round + 1;
        if next_round < tx.first_valid || next_round > tx.last_valid {
            return Err(rejected(format!(
                "TransactionPool.Remember: txn dead: round {} outside of {}--{}",
                next_round, tx.first_valid, tx.last_valid
            )));
        }
        if state.confirmed.contains_key(&tx_id) || state.pooled.contains(&tx_id) {
            return Err(rejected(format!(
                "TransactionPool.Remember: transaction already in ledger: {}",
                tx_id
            )));
        }

        state.accepted.push(raw.to_vec());
        if state.hold {
            state.pooled.insert(tx_id.clone());
            return Ok(tx_id);
        }
        state.last_round = next_round;
        state.confirmed.insert(tx_id.clone(), next_round);
        Ok(tx_id)
    }

    async fn pending_transaction(&self, tx_id: &str) -> Result<PendingTransaction, RpcError> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        match state.confirmed.get(tx_id) {
            Some(round) => Ok(PendingTransaction {
                confirmed_round: Some(*round),
                pool_error: String::new(),
            }),
            None if state.pooled.contains(tx_id) => Ok(PendingTransaction {
                confirmed_round: None,
                pool_error: String::new(),
            }),
            None => Err(RpcError::Node {
                code: NOT_FOUND,
                message: "txn does not exist".into(),
            }),
        }
    }

    async fn status(&self) -> Result<u64, RpcError> {
        let state = self.state.lock();
        Self::check_online(&state)?;
        Ok(state.last_round)
    }

    async fn status_after_block(&self, round: u64) -> Result<u64, RpcError> {
        let mut state = self.state.lock();
        Self::check_online(&state)?;
        if state.last_round <= round {
            state.last_round = round + 1;
        }
        Ok(state.last_round)
    }
}
