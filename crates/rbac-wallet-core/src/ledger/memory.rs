//! In-memory ledger for testing and local simulation

use super::{
    AccountSnapshot, ContractCall, LedgerReader, LedgerWriter, SubmitOutcome, TableEntry,
    TableKey,
};
use crate::types::keccak256;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory wallet ledger
///
/// Tables keep insertion order, which stands in for ledger order. Writes are
/// recorded so tests can assert on what was submitted.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    accounts: Arc<RwLock<HashMap<String, AccountSnapshot>>>,
    tables: Arc<RwLock<HashMap<String, Vec<(TableEntry, Value)>>>>,
    submitted: Arc<RwLock<Vec<ContractCall>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a wallet with empty key and presignature tables
    pub fn create_wallet(&self, wallet_id: &str) -> AccountSnapshot {
        let snapshot = AccountSnapshot {
            wallet_id: wallet_id.to_string(),
            key_table: format!("{}/dWallets", wallet_id),
            presign_table: format!("{}/presignatures", wallet_id),
        };
        {
            let mut tables = self.tables.write();
            tables.entry(snapshot.key_table.clone()).or_default();
            tables.entry(snapshot.presign_table.clone()).or_default();
        }
        self.accounts
            .write()
            .insert(wallet_id.to_string(), snapshot.clone());
        snapshot
    }

    /// Append an entry to a table
    pub fn push_entry(&self, table_id: &str, key: TableKey, value: Value) {
        let object_ref = format!("{}/{}", table_id, key);
        self.tables
            .write()
            .entry(table_id.to_string())
            .or_default()
            .push((TableEntry { key, object_ref }, value));
    }

    /// Register a custodial key under its curve tag
    pub fn add_key(&self, snapshot: &AccountSnapshot, curve_tag: &str, key_id: &str) {
        self.push_entry(
            &snapshot.key_table,
            TableKey::text(curve_tag),
            serde_json::json!({ "dwallet_id": key_id }),
        );
    }

    /// Register a presignature bucket for a pair id
    pub fn add_presign_bucket(&self, snapshot: &AccountSnapshot, pair_id: u32, presign_ids: &[&str]) {
        let bucket: Vec<Value> = presign_ids
            .iter()
            .map(|id| serde_json::json!({ "presign_id": id }))
            .collect();
        self.push_entry(&snapshot.presign_table, TableKey::U32(pair_id), Value::Array(bucket));
    }

    /// Calls received through [`LedgerWriter`]
    pub fn submitted_calls(&self) -> Vec<ContractCall> {
        self.submitted.read().clone()
    }
}

#[async_trait]
impl LedgerReader for MemoryLedger {
    async fn get_account(&self, wallet_id: &str) -> Result<AccountSnapshot> {
        self.accounts
            .read()
            .get(wallet_id)
            .cloned()
            .ok_or_else(|| Error::Ledger(format!("wallet {} not found", wallet_id)))
    }

    async fn list_entries(&self, table_id: &str) -> Result<Vec<TableEntry>> {
        let tables = self.tables.read();
        let rows = tables
            .get(table_id)
            .ok_or_else(|| Error::Ledger(format!("table {} not found", table_id)))?;
        Ok(rows.iter().map(|(entry, _)| entry.clone()).collect())
    }

    async fn get_entry(&self, table_id: &str, key: &TableKey) -> Result<Value> {
        let tables = self.tables.read();
        tables
            .get(table_id)
            .and_then(|rows| rows.iter().find(|(entry, _)| &entry.key == key))
            .map(|(_, value)| value.clone())
            .ok_or_else(|| Error::Ledger(format!("entry {} in {} not found", key, table_id)))
    }
}

#[async_trait]
impl LedgerWriter for MemoryLedger {
    async fn submit_transaction(&self, call: ContractCall) -> Result<SubmitOutcome> {
        let encoded = serde_json::to_vec(&call)?;
        let digest = hex::encode(keccak256(&encoded));
        let event = serde_json::json!({
            "type": format!("{}::{}::{}", call.package, call.module, call.function),
            "parsedJson": { "arguments": call.arguments },
        });
        self.submitted.write().push(call);
        Ok(SubmitOutcome {
            digest,
            events: vec![event],
        })
    }
}
