//! # Custodial Key & Presignature Resolution
//!
//! Both lookups scan a wallet table for the first entry carrying the target
//! tag ([`find_first`]) and then wait on the key provider for the matched
//! record to reach a usable state.
//!
//! Presignatures are single-use. Within one process, [`PresignReservations`]
//! keeps two pipelines from selecting the same record: the resolver skips
//! reserved ids, a reservation is released if the attempt fails before the
//! record reaches the network, and it stays held once submitted. Separate
//! processes sharing a wallet are not coordinated.

use crate::ledger::{find_first, AccountSnapshot, LedgerReader, TableKey};
use crate::network::KeyProviderExt;
use crate::pipeline::WalletContext;
use crate::types::{ActiveKey, CompletedPresignature, Curve};
use crate::{Error, Result};
use dashmap::DashSet;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Presignature ids claimed by pipelines in this process
#[derive(Debug, Default)]
pub struct PresignReservations {
    held: DashSet<String>,
}

impl PresignReservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `presign_id`; false if it is already held
    pub fn try_reserve(&self, presign_id: &str) -> bool {
        self.held.insert(presign_id.to_string())
    }

    pub fn is_reserved(&self, presign_id: &str) -> bool {
        self.held.contains(presign_id)
    }

    fn release(&self, presign_id: &str) {
        self.held.remove(presign_id);
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

/// Completed presignature held for one pipeline run
///
/// Dropping it releases the reservation unless [`consume`](Self::consume)
/// was called first.
#[derive(Debug)]
pub struct ReservedPresignature {
    presignature: CompletedPresignature,
    reservations: Arc<PresignReservations>,
    consumed: bool,
}

impl ReservedPresignature {
    pub fn presignature(&self) -> &CompletedPresignature {
        &self.presignature
    }

    pub fn presign_id(&self) -> &str {
        &self.presignature.presign_id
    }

    /// Keep the reservation permanently; call once the record was submitted
    pub fn consume(mut self) -> CompletedPresignature {
        self.consumed = true;
        self.presignature.clone()
    }
}

impl Drop for ReservedPresignature {
    fn drop(&mut self) {
        if !self.consumed {
            debug!(presign_id = %self.presignature.presign_id, "releasing presignature reservation");
            self.reservations.release(&self.presignature.presign_id);
        }
    }
}

/// Identifier of the first custodial key registered for `curve`
pub async fn find_key_id(
    ledger: &dyn LedgerReader,
    snapshot: &AccountSnapshot,
    curve: Curve,
) -> Result<String> {
    let entries = ledger.list_entries(&snapshot.key_table).await?;
    let entry = find_first(&entries, &TableKey::text(curve.tag()))
        .ok_or(Error::KeyNotFound { curve })?;

    let value = ledger.get_entry(&snapshot.key_table, &entry.key).await?;
    value
        .get("dwallet_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Ledger(format!("key entry {} has no dwallet_id", entry.object_ref)))
}

/// Presignature ids in the bucket for `pair_id`, in ledger order
pub async fn find_presign_ids(
    ledger: &dyn LedgerReader,
    snapshot: &AccountSnapshot,
    pair_id: u32,
) -> Result<Vec<String>> {
    let entries = ledger.list_entries(&snapshot.presign_table).await?;
    let entry = find_first(&entries, &TableKey::U32(pair_id))
        .ok_or(Error::PresignatureNotFound { pair_id })?;

    let value = ledger.get_entry(&snapshot.presign_table, &entry.key).await?;
    let records = value.as_array().ok_or_else(|| {
        Error::Ledger(format!("presignature bucket {} is not a list", entry.object_ref))
    })?;

    records
        .iter()
        .map(|record| {
            record
                .get("presign_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::Ledger(format!("record in {} has no presign_id", entry.object_ref))
                })
        })
        .collect()
}

/// Like [`find_presign_ids`], but a wallet without a bucket for `pair_id`
/// yields an empty list. Ledger failures still propagate.
pub async fn list_presign_ids(
    ledger: &dyn LedgerReader,
    snapshot: &AccountSnapshot,
    pair_id: u32,
) -> Result<Vec<String>> {
    match find_presign_ids(ledger, snapshot, pair_id).await {
        Err(Error::PresignatureNotFound { .. }) => Ok(Vec::new()),
        other => other,
    }
}

/// Find the wallet's key for `curve` and wait for it to be Active
#[instrument(skip(ctx, snapshot), fields(wallet = %snapshot.wallet_id))]
pub async fn resolve_key(
    ctx: &WalletContext,
    snapshot: &AccountSnapshot,
    curve: Curve,
) -> Result<ActiveKey> {
    let key_id = find_key_id(ctx.ledger.as_ref(), snapshot, curve).await?;
    debug!(%key_id, "custodial key matched");

    let key = ctx
        .key_provider
        .await_active_key(&key_id, ctx.config.key_state_timeout, ctx.config.poll_interval)
        .await?;
    info!(%key_id, "custodial key active");
    Ok(key)
}

/// Reserve the first free presignature for `pair_id` and wait for it to be
/// Completed
#[instrument(skip(ctx, snapshot), fields(wallet = %snapshot.wallet_id))]
pub async fn resolve_presignature(
    ctx: &WalletContext,
    snapshot: &AccountSnapshot,
    pair_id: u32,
) -> Result<ReservedPresignature> {
    let ids = find_presign_ids(ctx.ledger.as_ref(), snapshot, pair_id).await?;

    let presign_id = ids
        .into_iter()
        .find(|id| ctx.reservations.try_reserve(id))
        .ok_or(Error::PresignatureNotFound { pair_id })?;
    debug!(%presign_id, "presignature reserved");

    // The reservation is dropped, and so released, if the wait fails
    let mut reserved = ReservedPresignature {
        presignature: CompletedPresignature {
            presign_id: presign_id.clone(),
            material: Vec::new(),
        },
        reservations: Arc::clone(&ctx.reservations),
        consumed: false,
    };

    reserved.presignature = ctx
        .key_provider
        .await_completed_presignature(
            &presign_id,
            ctx.config.presign_state_timeout,
            ctx.config.poll_interval,
        )
        .await?;
    info!(%presign_id, "presignature completed");
    Ok(reserved)
}
