//! RBAC Wallet CLI
//!
//! Operator tool for inspecting wallet state and driving the signing
//! pipeline stage by stage, or end to end against an in-memory network.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rbac_wallet_core::{
    chain::{adapter_for, ChainAdapter, TransferRequest, UnsignedTx},
    config::{DEFAULT_COORDINATOR_ID, DEFAULT_SUI_RPC_URL},
    ledger::{ContractCall, LedgerReader, MemoryLedger, SuiLedgerReader},
    network::MemorySignatureNetwork,
    resolver::{find_key_id, list_presign_ids},
    ChainSettings, PipelineConfig, SessionId, SigningPipeline, WalletConfig,
    WalletContext,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "rbac-wallet")]
#[command(about = "RBAC custodial wallet signing CLI", version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Sui fullnode holding the wallet account
    #[arg(long, global = true, env = "SUI_RPC_URL", default_value = DEFAULT_SUI_RPC_URL)]
    sui_rpc: String,

    /// Wallet account object id
    #[arg(long, global = true, env = "WALLET_ADDRESS")]
    wallet: Option<String>,

    /// Package publishing the rbac module
    #[arg(long, global = true, env = "PACKAGE_ADDRESS")]
    package: Option<String>,

    /// dWallet coordinator object
    #[arg(long, global = true, env = "COORDINATOR_ADDRESS", default_value = DEFAULT_COORDINATOR_ID)]
    coordinator: String,

    /// Override the EVM preset's RPC endpoints
    #[arg(long, global = true, env = "ETH_RPC_URL")]
    eth_rpc: Option<String>,

    /// Override the Algorand preset's algod endpoint
    #[arg(long, global = true, env = "ALGOD_URL")]
    algod_url: Option<String>,

    /// Token sent to algod
    #[arg(long, global = true, env = "ALGOD_TOKEN", hide_env_values = true)]
    algod_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn config(&self) -> WalletConfig {
        WalletConfig {
            wallet_id: self.wallet.clone(),
            package_id: self.package.clone(),
            coordinator_id: self.coordinator.clone(),
            sui_rpc_url: self.sui_rpc.clone(),
            eth_rpc_url: self.eth_rpc.clone(),
            algod_url: self.algod_url.clone(),
            algod_token: self.algod_token.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show version and chain presets
    Info,

    /// Derive the chain address of a custodial public key
    Address {
        /// Chain preset name
        #[arg(short, long)]
        chain: String,

        /// Public key as hex
        #[arg(short, long)]
        public_key: String,
    },

    /// Look up the wallet's key and presignatures for a chain
    Resolve {
        #[arg(short, long)]
        chain: String,
    },

    /// Build an unsigned transfer and write it as JSON
    Build {
        #[arg(short, long)]
        chain: String,

        #[arg(short, long)]
        public_key: String,

        /// Recipient address
        #[arg(short, long)]
        to: String,

        /// Amount in whole native units, e.g. 0.001
        #[arg(short, long)]
        amount: String,

        /// Output file; stdout when absent
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Attach a threshold signature to a built transaction
    Finalize {
        #[arg(short, long)]
        chain: String,

        #[arg(short, long)]
        public_key: String,

        /// JSON file written by `build`
        #[arg(short, long)]
        unsigned: PathBuf,

        /// Raw signature from the signing session, as hex
        #[arg(short, long)]
        signature: String,

        /// Session that produced the signature
        #[arg(long, default_value = "0x0")]
        session: String,

        /// Submit and wait for confirmation
        #[arg(long)]
        broadcast: bool,
    },

    /// Run the whole pipeline against an in-memory wallet and network
    Simulate {
        #[arg(short, long)]
        chain: String,

        #[arg(short, long)]
        to: String,

        #[arg(short, long, default_value = "0.001")]
        amount: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .pretty()
        .init();

    let config = cli.config();
    match &cli.command {
        Commands::Info => show_info(),
        Commands::Address { chain, public_key } => {
            let adapter = adapter_for(config.chain(chain)?)?;
            println!("{}", adapter.derive_address(&decode_hex(public_key)?)?);
        }
        Commands::Resolve { chain } => {
            resolve(&config, chain).await?;
        }
        Commands::Build {
            chain,
            public_key,
            to,
            amount,
            out,
        } => {
            build(config.chain(chain)?, public_key, to, amount, out.as_ref()).await?;
        }
        Commands::Finalize {
            chain,
            public_key,
            unsigned,
            signature,
            session,
            broadcast,
        } => {
            finalize(
                config.chain(chain)?,
                public_key,
                unsigned,
                signature,
                session,
                *broadcast,
            )
            .await?;
        }
        Commands::Simulate { chain, to, amount } => {
            simulate(&config, chain, to, amount).await?;
        }
    }

    Ok(())
}

fn show_info() {
    println!("RBAC Wallet v{}", rbac_wallet_core::VERSION);
    println!();
    println!("Chain presets:");
    for preset in ChainSettings::presets() {
        println!(
            "  - {} ({}, {} / {:?}, presign bucket {})",
            preset.name, preset.kind, preset.curve, preset.hash_scheme, preset.presign_pair_id
        );
        for url in &preset.rpc_urls {
            println!("      rpc: {}", url);
        }
    }
}

async fn resolve(config: &WalletConfig, chain: &str) -> Result<()> {
    let wallet = config.require_wallet()?;
    let settings = config.chain(chain)?;
    let ledger = SuiLedgerReader::new(vec![config.sui_rpc_url.clone()])?;

    let snapshot = ledger.get_account(wallet).await?;
    info!(key_table = %snapshot.key_table, presign_table = %snapshot.presign_table, "wallet loaded");

    let key_id = find_key_id(&ledger, &snapshot, settings.curve).await?;
    let presign_ids = list_presign_ids(&ledger, &snapshot, settings.presign_pair_id).await?;

    let mut output = serde_json::json!({
        "wallet": snapshot.wallet_id,
        "chain": settings.name,
        "curve": settings.curve.to_string(),
        "key_id": key_id,
        "presign_pair_id": settings.presign_pair_id,
        "presign_ids": presign_ids,
    });
    if presign_ids.is_empty() {
        if let Some(package) = config.package_id.as_deref() {
            let call = ContractCall::add_presignature(
                package,
                &snapshot.wallet_id,
                &config.coordinator_id,
                &settings,
            )?;
            output["add_presignature"] = serde_json::to_value(&call)?;
        }
    }
    println!("{}", serde_json::to_string_pretty(&output)?);
    if presign_ids.is_empty() {
        eprintln!("No presignatures left; submit add_presignature_to_pool before signing.");
    }
    Ok(())
}

async fn build(
    settings: ChainSettings,
    public_key: &str,
    to: &str,
    amount: &str,
    out: Option<&PathBuf>,
) -> Result<()> {
    let adapter = adapter_for(settings)?;
    let sender = adapter.derive_address(&decode_hex(public_key)?)?;

    let unsigned = adapter
        .build_transaction(&sender, &TransferRequest::new(to, amount))
        .await?;
    info!(
        from = %unsigned.summary.from,
        to = %unsigned.summary.to,
        value = %unsigned.summary.value,
        fee = %unsigned.summary.estimated_fee,
        "transaction built"
    );
    println!("Signing payload: 0x{}", hex::encode(&unsigned.signing_payload));

    let json = serde_json::to_string_pretty(&unsigned)?;
    match out {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Unsigned transaction written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn finalize(
    settings: ChainSettings,
    public_key: &str,
    unsigned: &PathBuf,
    signature: &str,
    session: &str,
    broadcast: bool,
) -> Result<()> {
    let confirmation_timeout = PipelineConfig::default().confirmation_timeout;
    let adapter = adapter_for(settings)?;
    let sender = adapter.derive_address(&decode_hex(public_key)?)?;

    let json = std::fs::read_to_string(unsigned)
        .with_context(|| format!("reading {}", unsigned.display()))?;
    let unsigned: UnsignedTx = serde_json::from_str(&json)?;
    if unsigned.chain != adapter.settings().name {
        bail!(
            "transaction was built for {}, not {}",
            unsigned.chain,
            adapter.settings().name
        );
    }

    let finalized = adapter.finalize_transaction(
        &unsigned,
        &decode_hex(signature)?,
        &sender,
        &SessionId::new(session),
    )?;
    println!("Signer: {}", finalized.signer);
    println!("Transaction id: {}", finalized.tx_id);
    if let Some(recovery_id) = finalized.recovery_id {
        println!("Recovery id: {}", recovery_id);
    }
    println!("Signed transaction: 0x{}", hex::encode(&finalized.raw_tx));

    if broadcast {
        let receipt = adapter.broadcast(&finalized, confirmation_timeout).await?;
        println!("Confirmed in: {}", receipt.confirmed_in);
        if let Some(url) = receipt.explorer_url {
            println!("Explorer: {}", url);
        }
    }
    Ok(())
}

async fn simulate(config: &WalletConfig, chain: &str, to: &str, amount: &str) -> Result<()> {
    let settings = config.chain(chain)?;
    info!(chain = %settings.name, "running pipeline against an in-memory network");

    let ledger = MemoryLedger::new();
    let network = MemorySignatureNetwork::new();
    let snapshot = ledger.create_wallet("0xsimulated-wallet");

    network.generate_key("0xsimulated-key", settings.curve)?;
    ledger.add_key(&snapshot, settings.curve.tag(), "0xsimulated-key");
    network.insert_presignature("0xsimulated-presign");
    ledger.add_presign_bucket(&snapshot, settings.presign_pair_id, &["0xsimulated-presign"]);

    let ctx = WalletContext::new(
        Arc::new(ledger.clone()),
        Arc::new(network.clone()),
        Arc::new(network),
    )
    .with_config(PipelineConfig::fast())
    .with_recorder(
        Arc::new(ledger.clone()),
        config.package_id.as_deref().unwrap_or("0xsimulated-package"),
    );

    // Chain parameters still come from the configured endpoints
    let adapter = adapter_for(settings)?;
    let pipeline = SigningPipeline::new(Arc::new(ctx), adapter);
    let signed = pipeline
        .sign(&snapshot.wallet_id, &TransferRequest::new(to, amount))
        .await?;

    let output = serde_json::json!({
        "key_id": signed.key_id,
        "presign_id": signed.presign_id,
        "session_id": signed.session_id.to_string(),
        "sender": signed.sender,
        "signer": signed.finalized.signer,
        "recovery_id": signed.finalized.recovery_id,
        "tx_id": signed.finalized.tx_id,
        "raw_tx": format!("0x{}", hex::encode(&signed.finalized.raw_tx)),
        "ledger_digest": signed.ledger_digest,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    println!("\nThe simulated key holds no funds; the transaction was not broadcast.");
    Ok(())
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    let value = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(value).with_context(|| format!("invalid hex: {}", value))
}
