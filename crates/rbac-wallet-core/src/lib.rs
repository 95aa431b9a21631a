//! # RBAC Wallet Core
//!
//! Threshold-signing orchestration for custodial multi-chain wallets whose
//! keys are split between a user-held share and a network-held share.
//!
//! ## Architecture
//!
//! A signing request runs through five stages:
//! - **Resolver**: finds the wallet's active custodial key for the target
//!   curve and a completed single-use presignature in the ledger tables
//! - **Builder**: produces the unsigned transaction and its exact signing
//!   payload from live network parameters
//! - **Threshold signer**: an external network that returns the raw signature
//! - **Finalizer**: attaches the signature and checks the signer; for ECDSA
//!   it searches the recovery id against the wallet address
//! - **Broadcaster**: submits once and waits for confirmation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rbac_wallet_core::chain::{EvmAdapter, TransferRequest};
//! use rbac_wallet_core::ledger::SuiLedgerReader;
//! use rbac_wallet_core::pipeline::{SigningPipeline, WalletContext};
//! use rbac_wallet_core::ChainSettings;
//!
//! let ledger = Arc::new(SuiLedgerReader::new(vec![sui_rpc_url])?);
//! let ctx = Arc::new(WalletContext::new(ledger, key_provider, threshold_signer));
//!
//! let adapter = EvmAdapter::new(ChainSettings::ethereum_base_sepolia())?;
//! let pipeline = SigningPipeline::new(ctx, Arc::new(adapter));
//! let outcome = pipeline
//!     .execute(&wallet_id, &TransferRequest::new("0x742d...", "0.001"))
//!     .await?;
//! println!("confirmed {}", outcome.receipt.tx_id);
//! ```
//!
//! ## Failure Model
//!
//! Missing keys or presignatures, failed states and signature
//! reconstruction failures are fatal to an attempt. Timeouts and
//! connectivity failures may be retried by the caller, always from the
//! start of the pipeline: presignatures are single-use and nonces go stale.

pub mod chain;
pub mod config;
pub mod error;
pub mod finalize;
pub mod ledger;
pub mod network;
pub mod pipeline;
pub mod resolver;
pub mod rpc;
pub mod types;

pub use error::{BroadcastError, Error, Result};

pub use config::{ChainKind, ChainSettings, PipelineConfig, WalletConfig};
pub use types::{
    keccak256, ActiveKey, CompletedPresignature, Curve, CustodialKeyState, HashScheme,
    PresignatureState, SessionId, SessionState, SignatureAlgorithm, UserSecretShare,
};

pub use chain::{
    BroadcastReceipt, ChainAdapter, FinalizedTransaction, TransferRequest, UnsignedTx,
};

#[cfg(feature = "evm")]
pub use chain::EvmAdapter;

#[cfg(feature = "algorand")]
pub use chain::AlgorandAdapter;

pub use pipeline::{SigningOutcome, SigningPipeline, WalletContext};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
