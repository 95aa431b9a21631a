//! Chain presets, pipeline deadlines and environment configuration

use crate::types::{Curve, HashScheme, SignatureAlgorithm};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default Sui fullnode used to read wallet state
pub const DEFAULT_SUI_RPC_URL: &str = "https://fullnode.testnet.sui.io:443";

/// Shared dWallet coordinator object on Sui testnet
pub const DEFAULT_COORDINATOR_ID: &str =
    "0x4d157b7415a298c56ec2cb1dcab449525fa74aec17ddba376a83a7600f2062fc";

/// Family of chain a preset targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    /// Account-based chain with EIP-1559 transactions
    Evm,
    /// Round-based chain with msgpack payment transactions
    Algorand,
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainKind::Evm => write!(f, "EVM"),
            ChainKind::Algorand => write!(f, "Algorand"),
        }
    }
}

/// Everything the pipeline needs to know about one target chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    /// Preset name, e.g. `ethereum-base-sepolia`
    pub name: String,
    pub kind: ChainKind,
    pub curve: Curve,
    pub signature_algorithm: SignatureAlgorithm,
    pub hash_scheme: HashScheme,
    /// Key of the wallet's presignature bucket for this curve/algorithm pair
    pub presign_pair_id: u32,
    /// RPC endpoint URLs, tried in order on failure
    pub rpc_urls: Vec<String>,
    pub explorer_url: Option<String>,
    pub symbol: String,
    pub decimals: u8,
    /// EIP-155 chain id, EVM only
    pub chain_id: Option<u64>,
    /// Receipt confirmations (EVM) or rounds to wait (Algorand)
    pub confirmations: u64,
    /// Token sent with every node request, when the endpoint wants one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

impl ChainSettings {
    /// Base Sepolia, signed with ECDSA over secp256k1
    pub fn ethereum_base_sepolia() -> Self {
        Self {
            name: "ethereum-base-sepolia".to_string(),
            kind: ChainKind::Evm,
            curve: Curve::Secp256k1,
            signature_algorithm: SignatureAlgorithm::EcdsaSecp256k1,
            hash_scheme: HashScheme::Keccak256,
            presign_pair_id: 1,
            rpc_urls: vec![
                "https://sepolia.base.org".to_string(),
                "https://base-sepolia.drpc.org".to_string(),
            ],
            explorer_url: Some("https://sepolia.basescan.org".to_string()),
            symbol: "ETH".to_string(),
            decimals: 18,
            chain_id: Some(84532),
            confirmations: 1,
            api_token: None,
        }
    }

    /// Algorand TestNet, signed with EdDSA over ed25519
    pub fn algorand_testnet() -> Self {
        Self {
            name: "algorand-testnet".to_string(),
            kind: ChainKind::Algorand,
            curve: Curve::Ed25519,
            signature_algorithm: SignatureAlgorithm::EdDsa,
            hash_scheme: HashScheme::Sha512,
            presign_pair_id: 2,
            rpc_urls: vec!["https://testnet-api.algonode.cloud".to_string()],
            explorer_url: Some("https://lora.algokit.io/testnet".to_string()),
            symbol: "ALGO".to_string(),
            decimals: 6,
            chain_id: None,
            confirmations: 4,
            api_token: None,
        }
    }

    /// All built-in presets
    pub fn presets() -> Vec<ChainSettings> {
        vec![Self::ethereum_base_sepolia(), Self::algorand_testnet()]
    }

    /// Look up a preset by name
    pub fn by_name(name: &str) -> Result<Self> {
        Self::presets()
            .into_iter()
            .find(|preset| preset.name == name)
            .ok_or_else(|| Error::InvalidConfig(format!("Unknown chain: {}", name)))
    }

    /// Replace the RPC endpoints
    pub fn with_rpc_urls(mut self, urls: Vec<String>) -> Self {
        self.rpc_urls = urls;
        self
    }

    /// Check that curve, algorithm and hash form a combination the network signs
    pub fn validate(&self) -> Result<()> {
        self.signature_algorithm.id(self.curve)?;
        self.hash_scheme.id(self.curve, self.signature_algorithm)?;
        if self.rpc_urls.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "{}: at least one RPC URL required",
                self.name
            )));
        }
        // EVM finalization searches recovery ids; Algorand attaches the signature as is
        let searches = self.signature_algorithm.needs_recovery_search();
        if searches != (self.kind == ChainKind::Evm) {
            return Err(Error::InvalidConfig(format!(
                "{}: {} signatures cannot finalize {} transactions",
                self.name, self.signature_algorithm, self.kind
            )));
        }
        if self.kind == ChainKind::Evm && self.chain_id.is_none() {
            return Err(Error::InvalidConfig(format!(
                "{}: EVM chains need a chain id",
                self.name
            )));
        }
        Ok(())
    }

    pub fn explorer_tx_url(&self, tx_id: &str) -> Option<String> {
        self.explorer_url.as_ref().map(|base| match self.kind {
            ChainKind::Evm => format!("{}/tx/{}", base, tx_id),
            ChainKind::Algorand => format!("{}/transaction/{}", base, tx_id),
        })
    }
}

/// Deadlines bounding every suspension point of the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub key_state_timeout: Duration,
    pub presign_state_timeout: Duration,
    pub signature_timeout: Duration,
    pub confirmation_timeout: Duration,
    /// Delay between polls of external state
    pub poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            key_state_timeout: Duration::from_secs(60),
            presign_state_timeout: Duration::from_secs(60),
            signature_timeout: Duration::from_secs(120),
            confirmation_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl PipelineConfig {
    /// Short deadlines for local simulation and tests
    pub fn fast() -> Self {
        Self {
            key_state_timeout: Duration::from_secs(2),
            presign_state_timeout: Duration::from_secs(2),
            signature_timeout: Duration::from_secs(2),
            confirmation_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Wallet location and endpoint overrides
///
/// The CLI fills this from flags that fall back to `WALLET_ADDRESS`,
/// `PACKAGE_ADDRESS`, `COORDINATOR_ADDRESS`, `SUI_RPC_URL`, `ETH_RPC_URL`,
/// `ALGOD_URL` and `ALGOD_TOKEN`.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// Object id of the wallet account on Sui
    pub wallet_id: Option<String>,
    /// Package that publishes the rbac module
    pub package_id: Option<String>,
    pub coordinator_id: String,
    pub sui_rpc_url: String,
    pub eth_rpc_url: Option<String>,
    pub algod_url: Option<String>,
    pub algod_token: Option<String>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            wallet_id: None,
            package_id: None,
            coordinator_id: DEFAULT_COORDINATOR_ID.to_string(),
            sui_rpc_url: DEFAULT_SUI_RPC_URL.to_string(),
            eth_rpc_url: None,
            algod_url: None,
            algod_token: None,
        }
    }
}

impl WalletConfig {
    /// Chain preset with this wallet's endpoint overrides applied
    pub fn chain(&self, name: &str) -> Result<ChainSettings> {
        let mut settings = ChainSettings::by_name(name)?;
        let url = match settings.kind {
            ChainKind::Evm => self.eth_rpc_url.as_ref(),
            ChainKind::Algorand => {
                settings.api_token = self.algod_token.clone();
                self.algod_url.as_ref()
            }
        };
        if let Some(url) = url {
            settings = settings.with_rpc_urls(vec![url.clone()]);
        }
        Ok(settings)
    }

    pub fn require_wallet(&self) -> Result<&str> {
        required("wallet id (WALLET_ADDRESS)", self.wallet_id.as_deref())
    }

    pub fn require_package(&self) -> Result<&str> {
        required("package id (PACKAGE_ADDRESS)", self.package_id.as_deref())
    }
}

fn required<'a>(what: &str, value: Option<&'a str>) -> Result<&'a str> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::InvalidConfig(format!("Missing {}", what))),
    }
}
