//! Core types for custodial wallet signing
//!
//! Curves, signature algorithms and hash schemes carry the small integer ids
//! the threshold network expects. Key, presignature and session states mirror
//! the lifecycle exposed by the network; only terminal states are acted on.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tiny_keccak::{Hasher, Keccak};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Elliptic curve of a custodial key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Curve {
    Secp256k1,
    Secp256r1,
    Ed25519,
    Ristretto,
}

impl Curve {
    /// Numeric id used by the signing protocol
    pub fn id(&self) -> u32 {
        match self {
            Curve::Secp256k1 => 0,
            Curve::Secp256r1 => 1,
            Curve::Ed25519 => 2,
            Curve::Ristretto => 3,
        }
    }

    /// Tag under which the wallet's key table stores this curve
    pub fn tag(&self) -> &'static str {
        match self {
            Curve::Secp256k1 => "secp256k1",
            Curve::Secp256r1 => "secp256r1",
            Curve::Ed25519 => "ed25519",
            Curve::Ristretto => "ristretto",
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Curve {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "secp256k1" => Ok(Curve::Secp256k1),
            "secp256r1" => Ok(Curve::Secp256r1),
            "ed25519" => Ok(Curve::Ed25519),
            "ristretto" => Ok(Curve::Ristretto),
            other => Err(Error::InvalidConfig(format!("Unknown curve: {}", other))),
        }
    }
}

/// Signature algorithm run by the threshold network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    EcdsaSecp256k1,
    Taproot,
    EcdsaSecp256r1,
    EdDsa,
    SchnorrkelSubstrate,
}

impl SignatureAlgorithm {
    /// Protocol id of this algorithm, which is only meaningful relative to `curve`
    pub fn id(&self, curve: Curve) -> Result<u32> {
        match (curve, self) {
            (Curve::Secp256k1, SignatureAlgorithm::EcdsaSecp256k1) => Ok(0),
            (Curve::Secp256k1, SignatureAlgorithm::Taproot) => Ok(1),
            (Curve::Secp256r1, SignatureAlgorithm::EcdsaSecp256r1) => Ok(0),
            (Curve::Ed25519, SignatureAlgorithm::EdDsa) => Ok(0),
            (Curve::Ristretto, SignatureAlgorithm::SchnorrkelSubstrate) => Ok(0),
            _ => Err(Error::InvalidConfig(format!(
                "Algorithm {} is not defined on curve {}",
                self, curve
            ))),
        }
    }

    /// Whether the raw signature lacks a recovery indicator
    pub fn needs_recovery_search(&self) -> bool {
        matches!(
            self,
            SignatureAlgorithm::EcdsaSecp256k1 | SignatureAlgorithm::EcdsaSecp256r1
        )
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignatureAlgorithm::EcdsaSecp256k1 => "ECDSASecp256k1",
            SignatureAlgorithm::Taproot => "Taproot",
            SignatureAlgorithm::EcdsaSecp256r1 => "ECDSASecp256r1",
            SignatureAlgorithm::EdDsa => "EdDSA",
            SignatureAlgorithm::SchnorrkelSubstrate => "SchnorrkelSubstrate",
        };
        f.write_str(name)
    }
}

/// Message digest the network applies before signing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashScheme {
    Keccak256,
    Sha256,
    DoubleSha256,
    Sha512,
    Merlin,
}

impl HashScheme {
    /// Protocol id of this hash for the given curve and algorithm
    pub fn id(&self, curve: Curve, algorithm: SignatureAlgorithm) -> Result<u32> {
        let id = match (curve, algorithm, self) {
            (Curve::Secp256k1, SignatureAlgorithm::EcdsaSecp256k1, HashScheme::Keccak256) => 0,
            (Curve::Secp256k1, SignatureAlgorithm::EcdsaSecp256k1, HashScheme::Sha256) => 1,
            (Curve::Secp256k1, SignatureAlgorithm::EcdsaSecp256k1, HashScheme::DoubleSha256) => 2,
            (Curve::Secp256k1, SignatureAlgorithm::Taproot, HashScheme::Sha256) => 0,
            (Curve::Secp256r1, SignatureAlgorithm::EcdsaSecp256r1, HashScheme::Sha256) => 0,
            (Curve::Ed25519, SignatureAlgorithm::EdDsa, HashScheme::Sha512) => 0,
            (Curve::Ristretto, SignatureAlgorithm::SchnorrkelSubstrate, HashScheme::Merlin) => 0,
            _ => {
                return Err(Error::InvalidConfig(format!(
                    "Hash {:?} is not supported for {} on {}",
                    self, algorithm, curve
                )))
            }
        };
        Ok(id)
    }
}

/// User-retained share of a custodial key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct UserSecretShare(Vec<u8>);

impl UserSecretShare {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for UserSecretShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserSecretShare([REDACTED; {}])", self.0.len())
    }
}

/// Key material of a custodial key in the Active state
#[derive(Debug, Clone)]
pub struct ActiveKey {
    /// Ledger identifier of the key
    pub key_id: String,
    /// Protocol public output, opaque to this crate
    pub public_output: Vec<u8>,
    /// Chain public key (compressed SEC1 for secp256k1, 32 bytes for ed25519)
    pub public_key: Vec<u8>,
    /// Share held by the user side
    pub user_secret_share: UserSecretShare,
}

/// Lifecycle of a custodial key
#[derive(Debug, Clone)]
pub enum CustodialKeyState {
    Pending,
    Active(ActiveKey),
    Failed { reason: String },
}

impl CustodialKeyState {
    pub fn name(&self) -> &'static str {
        match self {
            CustodialKeyState::Pending => "Pending",
            CustodialKeyState::Active(_) => "Active",
            CustodialKeyState::Failed { .. } => "Failed",
        }
    }
}

/// Presignature material ready to be consumed by one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPresignature {
    pub presign_id: String,
    pub material: Vec<u8>,
}

/// Lifecycle of a presignature record
#[derive(Debug, Clone)]
pub enum PresignatureState {
    Requested,
    Completed(CompletedPresignature),
    Failed { reason: String },
}

impl PresignatureState {
    pub fn name(&self) -> &'static str {
        match self {
            PresignatureState::Requested => "Requested",
            PresignatureState::Completed(_) => "Completed",
            PresignatureState::Failed { .. } => "Failed",
        }
    }
}

/// Identifier issued when a signature request is submitted
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Observable state of a signing session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Requested,
    Processing,
    Completed { signature: Vec<u8> },
    Failed { reason: String },
}

/// Keccak-256 digest
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);
    hash
}

/// SHA-512/256 digest
pub fn sha512_256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha512_256};
    Sha512_256::digest(data).into()
}
