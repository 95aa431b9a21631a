//! Ledger reader over Sui JSON-RPC

use super::{AccountSnapshot, LedgerReader, TableEntry, TableKey};
use crate::error::RpcError;
use crate::rpc::RpcClient;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

/// Field of the wallet object holding the custodial key table
const KEY_TABLE_FIELD: &str = "dWallets";
/// Field of the wallet object holding the presignature table
const PRESIGN_TABLE_FIELD: &str = "presignatures";

/// Reads wallet tables through `sui_getObject` and the dynamic field API
#[derive(Debug, Clone)]
pub struct SuiLedgerReader {
    rpc: RpcClient,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DynamicFieldPage {
    data: Vec<DynamicFieldInfo>,
    next_cursor: Option<String>,
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DynamicFieldInfo {
    name: DynamicFieldName,
    object_id: String,
}

#[derive(Debug, Deserialize)]
struct DynamicFieldName {
    #[serde(rename = "type")]
    type_: String,
    value: Value,
}

impl SuiLedgerReader {
    pub fn new(urls: Vec<String>) -> Result<Self> {
        Ok(Self {
            rpc: RpcClient::new(urls)?,
        })
    }
}

fn ledger_error(context: &str, err: RpcError) -> Error {
    Error::Ledger(format!("{}: {}", context, err))
}

fn table_id(fields: &Value, field: &str) -> Result<String> {
    fields
        .get(field)
        .and_then(|table| table.pointer("/fields/id/id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Ledger(format!("wallet object has no {} table", field)))
}

fn parse_key(name: &DynamicFieldName) -> Result<TableKey> {
    let numeric = || -> Option<u64> {
        match &name.value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    };

    match name.type_.as_str() {
        "u32" => numeric()
            .and_then(|n| u32::try_from(n).ok())
            .map(TableKey::U32),
        "u64" => numeric().map(TableKey::U64),
        _ => name.value.as_str().map(TableKey::text),
    }
    .ok_or_else(|| {
        Error::Ledger(format!(
            "unsupported table key {} of type {}",
            name.value, name.type_
        ))
    })
}

/// Strip Move `{type, fields}` wrappers so values read as plain JSON
pub fn flatten_move_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            if let (Some(fields), true) = (map.get("fields"), map.contains_key("type")) {
                return flatten_move_value(fields);
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), flatten_move_value(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(flatten_move_value).collect()),
        other => other.clone(),
    }
}

#[async_trait]
impl LedgerReader for SuiLedgerReader {
    #[instrument(skip(self))]
    async fn get_account(&self, wallet_id: &str) -> Result<AccountSnapshot> {
        let object: Value = self
            .rpc
            .request(
                "sui_getObject",
                serde_json::json!([wallet_id, {"showContent": true}]),
            )
            .await
            .map_err(|e| ledger_error("sui_getObject", e))?;

        if let Some(error) = object.get("error") {
            return Err(Error::Ledger(format!(
                "wallet {} unavailable: {}",
                wallet_id, error
            )));
        }

        let fields = object
            .pointer("/data/content/fields")
            .ok_or_else(|| Error::Ledger(format!("wallet {} has no content", wallet_id)))?;

        Ok(AccountSnapshot {
            wallet_id: wallet_id.to_string(),
            key_table: table_id(fields, KEY_TABLE_FIELD)?,
            presign_table: table_id(fields, PRESIGN_TABLE_FIELD)?,
        })
    }

    #[instrument(skip(self))]
    async fn list_entries(&self, table_id: &str) -> Result<Vec<TableEntry>> {
        let mut entries = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page: DynamicFieldPage = self
                .rpc
                .request(
                    "suix_getDynamicFields",
                    serde_json::json!([table_id, cursor, Value::Null]),
                )
                .await
                .map_err(|e| ledger_error("suix_getDynamicFields", e))?;

            for info in &page.data {
                entries.push(TableEntry {
                    key: parse_key(&info.name)?,
                    object_ref: info.object_id.clone(),
                });
            }

            match (page.has_next_page, page.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }

        debug!(count = entries.len(), "listed table entries");
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn get_entry(&self, table_id: &str, key: &TableKey) -> Result<Value> {
        let object: Value = self
            .rpc
            .request(
                "suix_getDynamicFieldObject",
                serde_json::json!([table_id, {"type": key.move_type(), "value": key.to_json()}]),
            )
            .await
            .map_err(|e| ledger_error("suix_getDynamicFieldObject", e))?;

        let value = object
            .pointer("/data/content/fields/value")
            .ok_or_else(|| Error::Ledger(format!("entry {} in {} has no value", key, table_id)))?;

        Ok(flatten_move_value(value))
    }
}
