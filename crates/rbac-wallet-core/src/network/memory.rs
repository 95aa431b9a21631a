//! In-memory threshold network for testing and local simulation
//!
//! Holds full private keys and signs directly, so it exercises the pipeline
//! without a real threshold protocol. Signing follows the network's output
//! format: ECDSA sessions return `r || s` with no recovery indicator, EdDSA
//! sessions return the 64-byte signature.

use super::{KeyProvider, SignRequest, ThresholdSigner};
use crate::types::{
    keccak256, ActiveKey, CompletedPresignature, Curve, CustodialKeyState, HashScheme,
    PresignatureState, SessionId, SessionState, SignatureAlgorithm, UserSecretShare,
};
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Full private key standing in for the distributed one
enum SimulatedKey {
    Secp256k1(k256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

struct KeyRecord {
    state: CustodialKeyState,
    signer: Option<SimulatedKey>,
}

struct SessionSlot {
    /// Polls answered with Processing before the outcome is revealed
    pending_polls: u32,
    outcome: SessionState,
}

#[derive(Default)]
struct Inner {
    keys: DashMap<String, KeyRecord>,
    presignatures: DashMap<String, PresignatureState>,
    /// presign id -> session that consumed it
    consumed: DashMap<String, SessionId>,
    sessions: DashMap<SessionId, SessionSlot>,
    submissions: AtomicUsize,
    tamper: AtomicBool,
    fail_sessions: AtomicBool,
    stall_sessions: AtomicBool,
}

/// In-memory key provider and threshold signer
#[derive(Clone, Default)]
pub struct MemorySignatureNetwork {
    inner: Arc<Inner>,
}

impl MemorySignatureNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an Active secp256k1 key; returns its compressed public key
    pub fn insert_secp256k1_key(&self, key_id: &str, secret: &[u8; 32]) -> Result<Vec<u8>> {
        let signing_key = k256::ecdsa::SigningKey::from_slice(secret)
            .map_err(|e| Error::Crypto(format!("Invalid secp256k1 secret: {}", e)))?;
        let public_key = signing_key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec();
        self.insert_active(key_id, public_key.clone(), SimulatedKey::Secp256k1(signing_key));
        Ok(public_key)
    }

    /// Register an Active ed25519 key; returns its 32-byte public key
    pub fn insert_ed25519_key(&self, key_id: &str, seed: &[u8; 32]) -> Vec<u8> {
        let signing_key = ed25519_dalek::SigningKey::from_bytes(seed);
        let public_key = signing_key.verifying_key().to_bytes().to_vec();
        self.insert_active(key_id, public_key.clone(), SimulatedKey::Ed25519(signing_key));
        public_key
    }

    /// Register an Active key with fresh random material
    pub fn generate_key(&self, key_id: &str, curve: Curve) -> Result<Vec<u8>> {
        let secret: [u8; 32] = rand::random();
        match curve {
            Curve::Secp256k1 => self.insert_secp256k1_key(key_id, &secret),
            Curve::Ed25519 => Ok(self.insert_ed25519_key(key_id, &secret)),
            other => Err(Error::InvalidConfig(format!(
                "Simulation does not support curve {}",
                other
            ))),
        }
    }

    fn insert_active(&self, key_id: &str, public_key: Vec<u8>, signer: SimulatedKey) {
        let key = ActiveKey {
            key_id: key_id.to_string(),
            public_output: public_key.clone(),
            public_key,
            user_secret_share: UserSecretShare::new(keccak256(key_id.as_bytes()).to_vec()),
        };
        self.inner.keys.insert(
            key_id.to_string(),
            KeyRecord {
                state: CustodialKeyState::Active(key),
                signer: Some(signer),
            },
        );
    }

    /// Override a key's lifecycle state, e.g. Pending or Failed
    pub fn set_key_state(&self, key_id: &str, state: CustodialKeyState) {
        match self.inner.keys.get_mut(key_id) {
            Some(mut record) => record.state = state,
            None => {
                self.inner.keys.insert(
                    key_id.to_string(),
                    KeyRecord {
                        state,
                        signer: None,
                    },
                );
            }
        }
    }

    /// Register a Completed presignature
    pub fn insert_presignature(&self, presign_id: &str) {
        self.set_presignature_state(
            presign_id,
            PresignatureState::Completed(CompletedPresignature {
                presign_id: presign_id.to_string(),
                material: keccak256(presign_id.as_bytes()).to_vec(),
            }),
        );
    }

    pub fn set_presignature_state(&self, presign_id: &str, state: PresignatureState) {
        self.inner.presignatures.insert(presign_id.to_string(), state);
    }

    /// Flip a bit of every signature produced from now on
    pub fn tamper_signatures(&self, enabled: bool) {
        self.inner.tamper.store(enabled, Ordering::SeqCst);
    }

    /// Resolve every new session to Failed
    pub fn fail_sessions(&self, enabled: bool) {
        self.inner.fail_sessions.store(enabled, Ordering::SeqCst);
    }

    /// Keep every new session in Processing indefinitely
    pub fn stall_sessions(&self, enabled: bool) {
        self.inner.stall_sessions.store(enabled, Ordering::SeqCst);
    }

    /// Number of `submit` calls received, successful or not
    pub fn submission_count(&self) -> usize {
        self.inner.submissions.load(Ordering::SeqCst)
    }

    /// Whether a presignature has been consumed by a session
    pub fn is_consumed(&self, presign_id: &str) -> bool {
        self.inner.consumed.contains_key(presign_id)
    }

    fn sign(&self, request: &SignRequest<'_>) -> Result<Vec<u8>> {
        let record = self
            .inner
            .keys
            .get(&request.key.key_id)
            .ok_or_else(|| Error::Crypto(format!("unknown key {}", request.key.key_id)))?;
        let signer = record
            .signer
            .as_ref()
            .ok_or_else(|| Error::Crypto(format!("key {} has no material", request.key.key_id)))?;

        match (signer, request.curve) {
            (SimulatedKey::Secp256k1(key), Curve::Secp256k1) => {
                let digest = match request.hash_scheme {
                    HashScheme::Keccak256 => keccak256(request.payload).to_vec(),
                    HashScheme::Sha256 => Sha256::digest(request.payload).to_vec(),
                    HashScheme::DoubleSha256 => {
                        Sha256::digest(Sha256::digest(request.payload)).to_vec()
                    }
                    other => {
                        return Err(Error::InvalidConfig(format!(
                            "hash {:?} unsupported on secp256k1",
                            other
                        )))
                    }
                };
                let (signature, _recovery_id) = key
                    .sign_prehash_recoverable(&digest)
                    .map_err(|e| Error::Crypto(format!("ECDSA signing failed: {}", e)))?;
                Ok(signature.to_bytes().to_vec())
            }
            (SimulatedKey::Ed25519(key), Curve::Ed25519) => {
                use ed25519_dalek::Signer;
                Ok(key.sign(request.payload).to_bytes().to_vec())
            }
            (_, curve) => Err(Error::InvalidConfig(format!(
                "key {} is not on curve {}",
                request.key.key_id, curve
            ))),
        }
    }
}

#[async_trait]
impl KeyProvider for MemorySignatureNetwork {
    async fn key_state(&self, key_id: &str) -> Result<CustodialKeyState> {
        self.inner
            .keys
            .get(key_id)
            .map(|record| record.state.clone())
            .ok_or_else(|| Error::InvalidState {
                entity: "custodial key",
                id: key_id.to_string(),
                state: "unknown".to_string(),
            })
    }

    async fn presignature_state(&self, presign_id: &str) -> Result<PresignatureState> {
        self.inner
            .presignatures
            .get(presign_id)
            .map(|state| state.clone())
            .ok_or_else(|| Error::InvalidState {
                entity: "presignature",
                id: presign_id.to_string(),
                state: "unknown".to_string(),
            })
    }
}

#[async_trait]
impl ThresholdSigner for MemorySignatureNetwork {
    async fn submit(&self, request: &SignRequest<'_>) -> Result<SessionId> {
        self.inner.submissions.fetch_add(1, Ordering::SeqCst);

        request.algorithm.id(request.curve)?;
        request.hash_scheme.id(request.curve, request.algorithm)?;

        let session_id = SessionId::new(format!("0x{}", uuid::Uuid::new_v4().simple()));
        let presign_id = request.presignature.presign_id.clone();

        match self.inner.consumed.entry(presign_id.clone()) {
            Entry::Occupied(existing) => {
                return Err(Error::Protocol {
                    session_id: session_id.to_string(),
                    reason: format!(
                        "presignature {} already consumed by session {}",
                        presign_id,
                        existing.get()
                    ),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(session_id.clone());
            }
        }

        let outcome = if self.inner.fail_sessions.load(Ordering::SeqCst) {
            SessionState::Failed {
                reason: "network rejected the user share".to_string(),
            }
        } else {
            let mut signature = self.sign(request)?;
            if self.inner.tamper.load(Ordering::SeqCst) {
                signature[0] ^= 0x01;
            }
            SessionState::Completed { signature }
        };

        info!(%session_id, presign_id = %presign_id, curve = %request.curve, "signing session started");
        self.inner.sessions.insert(
            session_id.clone(),
            SessionSlot {
                pending_polls: if self.inner.stall_sessions.load(Ordering::SeqCst) {
                    u32::MAX
                } else {
                    1
                },
                outcome,
            },
        );
        Ok(session_id)
    }

    async fn session_state(
        &self,
        session_id: &SessionId,
        _curve: Curve,
        _algorithm: SignatureAlgorithm,
    ) -> Result<SessionState> {
        let mut slot = self
            .inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::InvalidState {
                entity: "signing session",
                id: session_id.to_string(),
                state: "unknown".to_string(),
            })?;

        if slot.pending_polls > 0 {
            slot.pending_polls -= 1;
            debug!(%session_id, "signing session processing");
            return Ok(SessionState::Processing);
        }
        Ok(slot.outcome.clone())
    }
}
