//! # Ledger Access
//!
//! Read and write interfaces over the authoritative wallet state. The wallet
//! account is a root object holding two keyed tables: custodial keys keyed by
//! curve tag, and presignature buckets keyed by (curve, algorithm) pair id.
//!
//! Backends expose each table as an ordered sequence of `(tag, reference)`
//! pairs; [`find_first`] is the single search routine used over both tables.

pub mod memory;
pub mod sui;

use crate::config::ChainSettings;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use memory::MemoryLedger;
pub use sui::SuiLedgerReader;

/// Tag of a table entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableKey {
    Text(String),
    U32(u32),
    U64(u64),
}

impl TableKey {
    pub fn text(value: impl Into<String>) -> Self {
        TableKey::Text(value.into())
    }

    /// Move type name of the key, needed for by-key lookups
    pub fn move_type(&self) -> &'static str {
        match self {
            TableKey::Text(_) => "0x1::string::String",
            TableKey::U32(_) => "u32",
            TableKey::U64(_) => "u64",
        }
    }

    /// JSON form expected by the ledger's RPC
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            TableKey::Text(s) => serde_json::Value::String(s.clone()),
            TableKey::U32(n) => serde_json::Value::from(*n),
            // 64-bit integers travel as strings
            TableKey::U64(n) => serde_json::Value::String(n.to_string()),
        }
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKey::Text(s) => write!(f, "{}", s),
            TableKey::U32(n) => write!(f, "{}", n),
            TableKey::U64(n) => write!(f, "{}", n),
        }
    }
}

/// One `(tag, reference)` pair of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub key: TableKey,
    /// Backend-specific reference to the entry object
    pub object_ref: String,
}

/// Table identifiers of a wallet account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub wallet_id: String,
    /// Table of custodial keys keyed by curve tag
    pub key_table: String,
    /// Table of presignature buckets keyed by pair id
    pub presign_table: String,
}

/// Return the first entry whose tag equals `tag` exactly.
pub fn find_first<'a>(entries: &'a [TableEntry], tag: &TableKey) -> Option<&'a TableEntry> {
    entries.iter().find(|entry| &entry.key == tag)
}

/// Read-only view of ledger state
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Load the wallet account root
    async fn get_account(&self, wallet_id: &str) -> Result<AccountSnapshot>;

    /// List a table's entries in ledger order
    async fn list_entries(&self, table_id: &str) -> Result<Vec<TableEntry>>;

    /// Load the value stored under `key`, with backend wrappers removed
    async fn get_entry(&self, table_id: &str, key: &TableKey) -> Result<serde_json::Value>;
}

/// Move call to submit through a [`LedgerWriter`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractCall {
    pub package: String,
    pub module: String,
    pub function: String,
    pub arguments: Vec<serde_json::Value>,
}

impl ContractCall {
    /// Audit record of a submitted signing session
    pub fn record_sign_session(package: &str, record: &SessionRecord) -> Self {
        Self {
            package: package.to_string(),
            module: "rbac".to_string(),
            function: "record_sign_session".to_string(),
            arguments: vec![
                serde_json::Value::String(record.wallet_id.clone()),
                serde_json::Value::String(record.session_id.clone()),
                serde_json::Value::from(record.curve_id),
                serde_json::Value::String(record.key_id.clone()),
                serde_json::Value::String(record.presign_id.clone()),
                serde_json::Value::String(record.payload_digest.clone()),
            ],
        }
    }
}

impl ContractCall {
    /// Ask the network for one more presignature in the chain's bucket
    pub fn add_presignature(
        package: &str,
        wallet_id: &str,
        coordinator_id: &str,
        settings: &ChainSettings,
    ) -> Result<Self> {
        let algorithm_id = settings.signature_algorithm.id(settings.curve)?;
        Ok(Self {
            package: package.to_string(),
            module: "rbac".to_string(),
            function: "add_presignature_to_pool".to_string(),
            arguments: vec![
                serde_json::Value::String(wallet_id.to_string()),
                serde_json::Value::String(coordinator_id.to_string()),
                serde_json::Value::from(settings.curve.id()),
                serde_json::Value::from(algorithm_id),
            ],
        })
    }

    /// Register a freshly generated custodial key on the wallet
    pub fn add_dwallet(
        package: &str,
        wallet_id: &str,
        coordinator_id: &str,
        settings: &ChainSettings,
        dkg: &DkgRequest,
    ) -> Self {
        let bytes = |b: &[u8]| serde_json::Value::String(format!("0x{}", hex::encode(b)));
        Self {
            package: package.to_string(),
            module: "rbac".to_string(),
            function: "add_dWallet".to_string(),
            arguments: vec![
                serde_json::Value::String(coordinator_id.to_string()),
                bytes(&dkg.session_identifier),
                serde_json::Value::String(dkg.encryption_key_id.clone()),
                bytes(&dkg.user_dkg_message),
                bytes(&dkg.user_public_output),
                bytes(&dkg.user_secret_share),
                serde_json::Value::from(settings.curve.id()),
                serde_json::Value::String(wallet_id.to_string()),
            ],
        }
    }
}

/// User-side output of distributed key generation, produced outside this crate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgRequest {
    pub session_identifier: Vec<u8>,
    /// Network encryption key the share is encrypted to
    pub encryption_key_id: String,
    pub user_dkg_message: Vec<u8>,
    pub user_public_output: Vec<u8>,
    pub user_secret_share: Vec<u8>,
}

/// Fields recorded on-ledger for each signing session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub wallet_id: String,
    pub session_id: String,
    pub curve_id: u32,
    pub key_id: String,
    pub presign_id: String,
    /// Hex keccak-256 of the signing payload
    pub payload_digest: String,
}

/// Result of a ledger write
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub digest: String,
    pub events: Vec<serde_json::Value>,
}

/// Side-effect sink for ledger writes
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    async fn submit_transaction(&self, call: ContractCall) -> Result<SubmitOutcome>;
}
