//! Error types for custodial wallet signing

use crate::types::Curve;
use thiserror::Error;

/// Result type alias for wallet signing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, signing, finalizing or broadcasting
#[derive(Debug, Error)]
pub enum Error {
    // ============ Resolution Errors ============
    /// No custodial key entry carries the requested curve tag
    #[error("No custodial key found for curve {curve}")]
    KeyNotFound { curve: Curve },

    /// No usable presignature in the bucket for the requested pair id
    #[error("No presignature available for pair id {pair_id}")]
    PresignatureNotFound { pair_id: u32 },

    /// Entity is in an unexpected or terminally failed state
    #[error("{entity} {id} is in state {state}")]
    InvalidState {
        entity: &'static str,
        id: String,
        state: String,
    },

    /// Deadline exceeded while awaiting external state
    #[error("Timeout waiting for {0}")]
    Timeout(String),

    // ============ Transaction Errors ============
    /// Network parameter fetch or local assembly failed
    #[error("Failed to build transaction: {0}")]
    Build(String),

    /// Neither recovery id candidate reproduced the wallet address
    #[error("Signature reconstruction failed for session {session_id}: {details}")]
    SignatureReconstruction { session_id: String, details: String },

    /// Submission to the chain failed
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),

    // ============ Protocol Errors ============
    /// Signing session resolved to Failed
    #[error("Signing session {session_id} failed: {reason}")]
    Protocol { session_id: String, reason: String },

    // ============ Configuration Errors ============
    /// Invalid or missing configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Address could not be parsed for the target chain
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // ============ Data Errors ============
    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Ledger read failed or returned an unexpected layout
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure modes of a chain submission
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The node refused the transaction; message is the node's own text
    #[error("Transaction rejected by node: {message}")]
    Rejected { message: String },

    /// The node could not be reached
    #[error("Connectivity failure during broadcast: {0}")]
    Connectivity(String),

    /// The transaction was included but execution failed
    #[error("Transaction {tx_id} was included but reverted")]
    Reverted { tx_id: String },

    /// The node accepted the transaction but no confirmation was observed.
    ///
    /// The transfer may still land; look it up by `tx_id` before building
    /// another one.
    #[error("Transaction {tx_id} was submitted but not confirmed: {reason}")]
    Unconfirmed { tx_id: String, reason: String },
}

impl Error {
    /// Whether the caller may retry the whole pipeline with fresh parameters.
    ///
    /// Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::Broadcast(BroadcastError::Connectivity(_))
        )
    }

    /// Inverse of [`Error::is_retryable`]
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }

    /// Short machine-readable code for logs and CLI output
    pub fn code(&self) -> &'static str {
        match self {
            Error::KeyNotFound { .. } | Error::PresignatureNotFound { .. } => "NOT_FOUND",
            Error::InvalidState { .. } => "STATE_ERROR",
            Error::Timeout(_) => "TIMEOUT",
            Error::Build(_) => "BUILD_ERROR",
            Error::SignatureReconstruction { .. } => "SIGNATURE_RECONSTRUCTION_ERROR",
            Error::Broadcast(_) => "BROADCAST_ERROR",
            Error::Protocol { .. } => "PROTOCOL_ERROR",
            Error::InvalidConfig(_) | Error::InvalidAddress(_) => "INVALID_INPUT",
            Error::Crypto(_) => "CRYPTO_ERROR",
            Error::Serialization(_) | Error::Deserialization(_) => "ENCODING_ERROR",
            Error::Ledger(_) => "LEDGER_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }
}

/// Transport-level failure from an RPC endpoint, before it is mapped into
/// the stage that issued the call.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// The request never produced a parseable response
    #[error("{0}")]
    Transport(String),

    /// The node answered with an error object
    #[error("{message}")]
    Node { code: i64, message: String },

    /// The node answered with something we could not interpret
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    /// Map into the broadcast taxonomy, keeping node text intact
    pub fn into_broadcast(self) -> BroadcastError {
        match self {
            RpcError::Node { message, .. } => BroadcastError::Rejected { message },
            RpcError::Transport(msg) | RpcError::InvalidResponse(msg) => {
                BroadcastError::Connectivity(msg)
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Deserialization(e.to_string())
    }
}
