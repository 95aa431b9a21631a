//! Fixtures shared across the suite

#![allow(dead_code)]

use rbac_wallet_core::chain::algorand::MemoryAlgod;
use rbac_wallet_core::chain::evm::{FeeEstimate, MemoryEvmNode};
use rbac_wallet_core::chain::{AlgorandAdapter, EvmAdapter};
use rbac_wallet_core::ledger::{AccountSnapshot, MemoryLedger};
use rbac_wallet_core::network::MemorySignatureNetwork;
use rbac_wallet_core::{ChainSettings, PipelineConfig, WalletContext};
use std::sync::Arc;
use std::time::Duration;

pub const WALLET_ID: &str = "0xwallet";

// EIP-1559 transfer of 0.001 ETH on Base Sepolia at nonce 5, y-parity 1
pub const EVM_SECRET: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
pub const EVM_PUBLIC_KEY: &str =
    "024e3b81af9c2234cad09d679ce6035ed1392347ce64ce405f5dcd36228a25de6e";
pub const EVM_SENDER: &str = "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23";
pub const EVM_RECIPIENT: &str = "0x742d35Cc6634C0532925a3b844Bc9e7595f4e123";
pub const EVM_PAYLOAD: &str = "02f283014a34058477359400850ba43b740082520894742d35cc6634c0532925a3b844bc9e7595f4e12387038d7ea4c6800080c0";
pub const EVM_R: &str = "b416fa1faefe1cae7fdeadeef87f0bde2ee08f44ca5a73cf730c64bb9637d621";
pub const EVM_S: &str = "612e601c3fc85095931521d25483c27d7d5f92cb3e3dbfcb72d2c1471a50280c";
pub const EVM_SIGNED: &str = "02f87583014a34058477359400850ba43b740082520894742d35cc6634c0532925a3b844bc9e7595f4e12387038d7ea4c6800080c001a0b416fa1faefe1cae7fdeadeef87f0bde2ee08f44ca5a73cf730c64bb9637d621a0612e601c3fc85095931521d25483c27d7d5f92cb3e3dbfcb72d2c1471a50280c";
pub const EVM_TX_HASH: &str = "0x11dba423f9133952ceedfe3b05543b768526a9a43b154ef6fadf592f8b7202ea";

// Payment of 0.1 ALGO on Algorand TestNet built at round 1000
pub const ALGO_SENDER_SEED: [u8; 32] = [7u8; 32];
pub const ALGO_RECEIVER_SEED: [u8; 32] = [9u8; 32];
pub const ALGO_SENDER: &str = "5JFGYY7CTRJAVPXVKB5RGLWF7GKUO5VOX27HXESCD3VGSFCG2IWAKDM5YU";
pub const ALGO_RECEIVER: &str = "7ULSIOC2UDDVWZH3PDGWAL5B3GI7327XNMJ4LDWXALVMQNPJ6YMB7QOADI";
pub const ALGO_GENESIS_ID: &str = "testnet-v1.0";
pub const ALGO_GENESIS_HASH: &str = "4863b518a4b3c84ec810f22d4f1081cb0f71f059a7ac20dec62f7f70e5093a22";
pub const ALGO_LAST_ROUND: u64 = 1000;
pub const ALGO_BYTES_TO_SIGN: &str = "545889a3616d74ce000186a0a3666565cd03e8a26676cd03e8a367656eac746573746e65742d76312e30a26768c4204863b518a4b3c84ec810f22d4f1081cb0f71f059a7ac20dec62f7f70e5093a22a26c76cd07d0a3726376c420fd1724385aa0c75b64fb78cd602fa1d991fdebf76b13c58ed702eac835e9f618a3736e64c420ea4a6c63e29c520abef5507b132ec5f9954776aebebe7b92421eea691446d22ca474797065a3706179";
pub const ALGO_SIGNATURE: &str = "a95890784c73e805445825637eddf460ebe9f1accb7f6bb325502d21f189ebd8eb93b93b465e481652a84601e0ed8435073ced8290b513d2da29adfbcbfcb30d";
pub const ALGO_TX_ID: &str = "JNW277SHUIAYAVUWFH5NNVSITRE36JVQCRMIBJLJMR5DY2GGK2EQ";

/// `{sig, txn}` msgpack of the TestNet payment
pub fn algo_signed_hex() -> String {
    // txn map is the signed bytes without the "TX" prefix
    format!(
        "82a3736967c440{}a374786e{}",
        ALGO_SIGNATURE,
        &ALGO_BYTES_TO_SIGN[4..]
    )
}

pub fn bytes32(hex_str: &str) -> [u8; 32] {
    hex::decode(hex_str).unwrap().try_into().unwrap()
}

pub fn base_sepolia_fees() -> FeeEstimate {
    FeeEstimate {
        max_fee_per_gas: 50_000_000_000,
        max_priority_fee_per_gas: 2_000_000_000,
    }
}

/// Node primed with the sender's nonce and the pinned fees
pub fn evm_node() -> MemoryEvmNode {
    let node = MemoryEvmNode::new(84532);
    node.set_nonce(EVM_SENDER, 5);
    node.set_fees(base_sepolia_fees());
    node
}

pub fn evm_adapter(node: &MemoryEvmNode) -> EvmAdapter {
    EvmAdapter::with_rpc(ChainSettings::ethereum_base_sepolia(), Arc::new(node.clone()))
        .unwrap()
        .with_poll_interval(Duration::from_millis(5))
}

pub fn algod() -> MemoryAlgod {
    MemoryAlgod::new(ALGO_GENESIS_ID, bytes32(ALGO_GENESIS_HASH), ALGO_LAST_ROUND)
}

pub fn algorand_adapter(algod: &MemoryAlgod) -> AlgorandAdapter {
    AlgorandAdapter::with_algod(ChainSettings::algorand_testnet(), Arc::new(algod.clone()))
        .unwrap()
        .with_poll_interval(Duration::from_millis(5))
}

/// Wallet with one key per supported curve and a presignature bucket each
pub struct Fixture {
    pub ledger: MemoryLedger,
    pub network: MemorySignatureNetwork,
    pub snapshot: AccountSnapshot,
}

impl Fixture {
    /// Empty wallet: no keys, no presignatures
    pub fn empty() -> Self {
        let ledger = MemoryLedger::new();
        let snapshot = ledger.create_wallet(WALLET_ID);
        Self {
            ledger,
            network: MemorySignatureNetwork::new(),
            snapshot,
        }
    }

    pub fn new() -> Self {
        let fixture = Self::empty();
        fixture
            .network
            .insert_secp256k1_key("0xkey-k1", &bytes32(EVM_SECRET))
            .unwrap();
        fixture
            .network
            .insert_ed25519_key("0xkey-ed", &ALGO_SENDER_SEED);
        fixture
            .ledger
            .add_key(&fixture.snapshot, "secp256k1", "0xkey-k1");
        fixture
            .ledger
            .add_key(&fixture.snapshot, "ed25519", "0xkey-ed");

        fixture.add_presignatures(1, &["0xpre-k1-a", "0xpre-k1-b"]);
        fixture.add_presignatures(2, &["0xpre-ed-a", "0xpre-ed-b"]);
        fixture
    }

    pub fn add_presignatures(&self, pair_id: u32, ids: &[&str]) {
        for id in ids {
            self.network.insert_presignature(id);
        }
        self.ledger.add_presign_bucket(&self.snapshot, pair_id, ids);
    }

    pub fn context(&self) -> WalletContext {
        WalletContext::new(
            Arc::new(self.ledger.clone()),
            Arc::new(self.network.clone()),
            Arc::new(self.network.clone()),
        )
        .with_config(PipelineConfig::fast())
    }
}
