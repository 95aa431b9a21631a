//! Threshold network collaborators
//!
//! The key provider reports custodial key and presignature lifecycle; the
//! threshold signer runs signing sessions. Both are external services. The
//! extension traits add deadline-bounded waits on top of the raw state reads.

use crate::types::{
    ActiveKey, CompletedPresignature, Curve, CustodialKeyState, HashScheme, PresignatureState,
    SessionId, SessionState, SignatureAlgorithm,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub mod memory;

pub use memory::MemorySignatureNetwork;

/// Source of custodial key and presignature state
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Current state of a custodial key
    async fn key_state(&self, key_id: &str) -> Result<CustodialKeyState>;

    /// Current state of a presignature record
    async fn presignature_state(&self, presign_id: &str) -> Result<PresignatureState>;
}

/// Everything a signing session consumes
#[derive(Debug, Clone, Copy)]
pub struct SignRequest<'a> {
    /// Exact bytes to sign; the network applies `hash_scheme` itself
    pub payload: &'a [u8],
    pub key: &'a ActiveKey,
    /// Single-use material; must never reach two sessions
    pub presignature: &'a CompletedPresignature,
    pub hash_scheme: HashScheme,
    pub algorithm: SignatureAlgorithm,
    pub curve: Curve,
}

/// Client of the threshold signature protocol
#[async_trait]
pub trait ThresholdSigner: Send + Sync {
    /// Start a session; returns its identifier
    async fn submit(&self, request: &SignRequest<'_>) -> Result<SessionId>;

    /// Observe a session
    async fn session_state(
        &self,
        session_id: &SessionId,
        curve: Curve,
        algorithm: SignatureAlgorithm,
    ) -> Result<SessionState>;
}

/// Extension trait for key providers with deadline support
#[async_trait]
pub trait KeyProviderExt: KeyProvider {
    /// Wait until a key is Active
    async fn await_active_key(
        &self,
        key_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<ActiveKey>;

    /// Wait until a presignature is Completed
    async fn await_completed_presignature(
        &self,
        presign_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<CompletedPresignature>;
}

#[async_trait]
impl<P: KeyProvider + ?Sized> KeyProviderExt for P {
    async fn await_active_key(
        &self,
        key_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<ActiveKey> {
        tokio::time::timeout(timeout, poll_active_key(self, key_id, poll_interval))
            .await
            .map_err(|_| Error::Timeout(format!("custodial key {} to become Active", key_id)))?
    }

    async fn await_completed_presignature(
        &self,
        presign_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<CompletedPresignature> {
        tokio::time::timeout(timeout, poll_presignature(self, presign_id, poll_interval))
            .await
            .map_err(|_| {
                Error::Timeout(format!("presignature {} to become Completed", presign_id))
            })?
    }
}

async fn poll_active_key<P: KeyProvider + ?Sized>(
    provider: &P,
    key_id: &str,
    poll_interval: Duration,
) -> Result<ActiveKey> {
    loop {
        let state = provider.key_state(key_id).await?;
        match state {
            CustodialKeyState::Active(key) => return Ok(key),
            CustodialKeyState::Failed { ref reason } => {
                return Err(Error::InvalidState {
                    entity: "custodial key",
                    id: key_id.to_string(),
                    state: format!("{} ({})", state.name(), reason),
                })
            }
            CustodialKeyState::Pending => {
                debug!(key_id, "custodial key pending");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

async fn poll_presignature<P: KeyProvider + ?Sized>(
    provider: &P,
    presign_id: &str,
    poll_interval: Duration,
) -> Result<CompletedPresignature> {
    loop {
        let state = provider.presignature_state(presign_id).await?;
        match state {
            PresignatureState::Completed(presignature) => return Ok(presignature),
            PresignatureState::Failed { ref reason } => {
                return Err(Error::InvalidState {
                    entity: "presignature",
                    id: presign_id.to_string(),
                    state: format!("{} ({})", state.name(), reason),
                })
            }
            PresignatureState::Requested => {
                debug!(presign_id, "presignature requested");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

/// Extension trait for threshold signers with deadline support
#[async_trait]
pub trait ThresholdSignerExt: ThresholdSigner {
    /// Wait for a session to complete and return the raw signature
    async fn await_signature(
        &self,
        session_id: &SessionId,
        curve: Curve,
        algorithm: SignatureAlgorithm,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Vec<u8>>;
}

#[async_trait]
impl<S: ThresholdSigner + ?Sized> ThresholdSignerExt for S {
    async fn await_signature(
        &self,
        session_id: &SessionId,
        curve: Curve,
        algorithm: SignatureAlgorithm,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Vec<u8>> {
        tokio::time::timeout(
            timeout,
            poll_signature(self, session_id, curve, algorithm, poll_interval),
        )
        .await
        .map_err(|_| Error::Timeout(format!("signing session {}", session_id)))?
    }
}

async fn poll_signature<S: ThresholdSigner + ?Sized>(
    signer: &S,
    session_id: &SessionId,
    curve: Curve,
    algorithm: SignatureAlgorithm,
    poll_interval: Duration,
) -> Result<Vec<u8>> {
    loop {
        match signer.session_state(session_id, curve, algorithm).await? {
            SessionState::Completed { signature } => return Ok(signature),
            SessionState::Failed { reason } => {
                return Err(Error::Protocol {
                    session_id: session_id.to_string(),
                    reason,
                })
            }
            SessionState::Requested | SessionState::Processing => {
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}
