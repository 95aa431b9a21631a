//! # Signing Pipeline
//!
//! One signing request runs Resolver → Builder → threshold signer →
//! Finalizer → Broadcaster. Key resolution and the transaction build run
//! joined with presignature resolution; everything after is sequential.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rbac_wallet_core::chain::{EvmAdapter, TransferRequest};
//! use rbac_wallet_core::pipeline::{SigningPipeline, WalletContext};
//!
//! let ctx = WalletContext::new(ledger, network.clone(), network);
//! let adapter = EvmAdapter::new(ChainSettings::ethereum_base_sepolia())?;
//! let pipeline = SigningPipeline::new(Arc::new(ctx), Arc::new(adapter));
//! let outcome = pipeline
//!     .execute(&wallet_id, &TransferRequest::new("0x742d...", "0.001"))
//!     .await?;
//! ```

use crate::chain::{BroadcastReceipt, ChainAdapter, FinalizedTransaction, TransferRequest};
use crate::config::PipelineConfig;
use crate::ledger::{ContractCall, LedgerReader, LedgerWriter, SessionRecord};
use crate::network::{KeyProvider, SignRequest, ThresholdSigner, ThresholdSignerExt};
use crate::resolver::{resolve_key, resolve_presignature, PresignReservations};
use crate::types::{keccak256, SessionId};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Ledger sink that records each submitted session
#[derive(Clone)]
pub struct SessionRecorder {
    pub writer: Arc<dyn LedgerWriter>,
    /// Package publishing the wallet module
    pub package: String,
}

/// Collaborators shared by every pipeline run against a wallet
pub struct WalletContext {
    pub ledger: Arc<dyn LedgerReader>,
    pub key_provider: Arc<dyn KeyProvider>,
    pub signer: Arc<dyn ThresholdSigner>,
    pub recorder: Option<SessionRecorder>,
    pub reservations: Arc<PresignReservations>,
    pub config: PipelineConfig,
}

impl WalletContext {
    pub fn new(
        ledger: Arc<dyn LedgerReader>,
        key_provider: Arc<dyn KeyProvider>,
        signer: Arc<dyn ThresholdSigner>,
    ) -> Self {
        Self {
            ledger,
            key_provider,
            signer,
            recorder: None,
            reservations: Arc::new(PresignReservations::new()),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Record every submitted session through `writer`
    pub fn with_recorder(mut self, writer: Arc<dyn LedgerWriter>, package: impl Into<String>) -> Self {
        self.recorder = Some(SessionRecorder {
            writer,
            package: package.into(),
        });
        self
    }

    /// Share presignature reservations with other contexts
    pub fn with_reservations(mut self, reservations: Arc<PresignReservations>) -> Self {
        self.reservations = reservations;
        self
    }
}

impl std::fmt::Debug for WalletContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletContext")
            .field("recording", &self.recorder.is_some())
            .field("reserved_presignatures", &self.reservations.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Transaction signed and checked, not yet broadcast
#[derive(Debug, Clone)]
pub struct SignedTransfer {
    pub key_id: String,
    pub presign_id: String,
    pub session_id: SessionId,
    /// Address derived from the custodial key
    pub sender: String,
    pub finalized: FinalizedTransaction,
    /// Digest of the ledger write recording the session
    pub ledger_digest: Option<String>,
}

/// Result of a full pipeline run
#[derive(Debug, Clone)]
pub struct SigningOutcome {
    pub signed: SignedTransfer,
    pub receipt: BroadcastReceipt,
}

/// Signing pipeline bound to one chain
pub struct SigningPipeline {
    ctx: Arc<WalletContext>,
    adapter: Arc<dyn ChainAdapter>,
}

impl SigningPipeline {
    pub fn new(ctx: Arc<WalletContext>, adapter: Arc<dyn ChainAdapter>) -> Self {
        Self { ctx, adapter }
    }

    pub fn adapter(&self) -> &dyn ChainAdapter {
        self.adapter.as_ref()
    }

    /// Sign, finalize and broadcast a transfer from `wallet_id`
    #[instrument(skip(self, request), fields(chain = %self.adapter.settings().name))]
    pub async fn execute(&self, wallet_id: &str, request: &TransferRequest) -> Result<SigningOutcome> {
        let signed = self.sign(wallet_id, request).await?;

        let receipt = self
            .adapter
            .broadcast(&signed.finalized, self.ctx.config.confirmation_timeout)
            .await?;
        info!(tx_id = %receipt.tx_id, confirmed_in = receipt.confirmed_in, "transfer confirmed");

        Ok(SigningOutcome { signed, receipt })
    }

    /// Run every stage up to, not including, broadcast
    #[instrument(skip(self, request), fields(chain = %self.adapter.settings().name))]
    pub async fn sign(&self, wallet_id: &str, request: &TransferRequest) -> Result<SignedTransfer> {
        let ctx = self.ctx.as_ref();
        let settings = self.adapter.settings();

        let snapshot = ctx.ledger.get_account(wallet_id).await?;

        let ((key, sender, unsigned), reserved) = tokio::try_join!(
            async {
                let key = resolve_key(ctx, &snapshot, settings.curve).await?;
                let sender = self.adapter.derive_address(&key.public_key)?;
                let unsigned = self.adapter.build_transaction(&sender, request).await?;
                Ok::<_, Error>((key, sender, unsigned))
            },
            resolve_presignature(ctx, &snapshot, settings.presign_pair_id),
        )?;
        info!(key_id = %key.key_id, presign_id = %reserved.presign_id(), %sender, "resolved and built");

        // From here on the presignature counts as spent, whatever the outcome
        let presignature = reserved.consume();
        let session_id = ctx
            .signer
            .submit(&SignRequest {
                payload: &unsigned.signing_payload,
                key: &key,
                presignature: &presignature,
                hash_scheme: settings.hash_scheme,
                algorithm: settings.signature_algorithm,
                curve: settings.curve,
            })
            .await?;
        info!(%session_id, "signing session submitted");

        let ledger_digest = self
            .record_session(
                &snapshot.wallet_id,
                &session_id,
                &key.key_id,
                &presignature.presign_id,
                &unsigned.signing_payload,
            )
            .await;

        let signature = ctx
            .signer
            .await_signature(
                &session_id,
                settings.curve,
                settings.signature_algorithm,
                ctx.config.signature_timeout,
                ctx.config.poll_interval,
            )
            .await?;

        let finalized = self
            .adapter
            .finalize_transaction(&unsigned, &signature, &sender, &session_id)?;

        Ok(SignedTransfer {
            key_id: key.key_id.clone(),
            presign_id: presignature.presign_id,
            session_id,
            sender,
            finalized,
            ledger_digest,
        })
    }

    /// Best-effort audit write; the session is already running either way
    async fn record_session(
        &self,
        wallet_id: &str,
        session_id: &SessionId,
        key_id: &str,
        presign_id: &str,
        payload: &[u8],
    ) -> Option<String> {
        let recorder = self.ctx.recorder.as_ref()?;
        let record = SessionRecord {
            wallet_id: wallet_id.to_string(),
            session_id: session_id.to_string(),
            curve_id: self.adapter.settings().curve.id(),
            key_id: key_id.to_string(),
            presign_id: presign_id.to_string(),
            payload_digest: hex::encode(keccak256(payload)),
        };

        match recorder
            .writer
            .submit_transaction(ContractCall::record_sign_session(&recorder.package, &record))
            .await
        {
            Ok(outcome) => {
                info!(digest = %outcome.digest, "session recorded on ledger");
                Some(outcome.digest)
            }
            Err(e) => {
                warn!(%session_id, error = %e, "failed to record session on ledger");
                None
            }
        }
    }
}

impl std::fmt::Debug for SigningPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningPipeline")
            .field("chain", &self.adapter.settings().name)
            .finish()
    }
}
