//! Fuzz tests for transaction encodings
//!
//! Unsigned transactions must survive encode/decode unchanged, and the
//! decoders must reject arbitrary input without panicking.

use alloy_primitives::{Address, Bytes, U256};
use proptest::prelude::*;
use rbac_wallet_core::chain::algorand::{
    decode_address, encode_address, PaymentTransaction, SignedTransaction,
};
use rbac_wallet_core::chain::evm::{decode_signed, Eip1559Transaction, TRANSFER_GAS_LIMIT};
use rbac_wallet_core::chain::{format_units, parse_units};

// ============================================================================
// Strategies for generating test data
// ============================================================================

fn eip1559_strategy() -> impl Strategy<Value = Eip1559Transaction> {
    (
        1u64..1_000_000,
        any::<u64>(),
        any::<u64>(),
        any::<u64>(),
        prop::array::uniform20(any::<u8>()),
        any::<u128>(),
        prop::collection::vec(any::<u8>(), 0..64),
    )
        .prop_map(|(chain_id, nonce, tip, extra, to, value, data)| Eip1559Transaction {
            chain_id,
            nonce,
            max_priority_fee_per_gas: tip as u128,
            max_fee_per_gas: tip as u128 + extra as u128,
            gas_limit: TRANSFER_GAS_LIMIT,
            to: Address::from(to),
            value: U256::from(value),
            data: Bytes::from(data),
            access_list: vec![],
        })
}

fn payment_strategy() -> impl Strategy<Value = PaymentTransaction> {
    (
        any::<u64>(),
        1000u64..1_000_000,
        0u64..u64::MAX / 2,
        "[a-z]{0,8}-v[0-9]\\.[0-9]",
        prop::array::uniform32(any::<u8>()),
        prop::array::uniform32(any::<u8>()),
        prop::array::uniform32(any::<u8>()),
    )
        .prop_map(
            |(amount, fee, first_valid, genesis_id, genesis_hash, receiver, sender)| {
                PaymentTransaction {
                    amount,
                    fee,
                    first_valid,
                    genesis_id,
                    genesis_hash,
                    last_valid: first_valid + 1000,
                    receiver,
                    sender,
                    tx_type: "pay".to_string(),
                }
            },
        )
}

// ============================================================================
// EIP-1559
// ============================================================================

proptest! {
    #[test]
    fn eip1559_unsigned_round_trip(tx in eip1559_strategy()) {
        let encoded = tx.encode_unsigned();
        prop_assert_eq!(encoded[0], 0x02);
        let decoded = Eip1559Transaction::decode_unsigned(&encoded).unwrap();
        prop_assert_eq!(decoded, tx);
    }

    #[test]
    fn eip1559_signed_keeps_unsigned_fields(
        tx in eip1559_strategy(),
        y_parity in 0u8..2,
        r in prop::array::uniform32(any::<u8>()),
        s in prop::array::uniform32(any::<u8>()),
    ) {
        let raw = tx.encode_signed(y_parity, U256::from_be_bytes(r), U256::from_be_bytes(s));
        let signed = decode_signed(&raw).unwrap();
        prop_assert_eq!(signed.tx, tx);
        prop_assert_eq!(signed.y_parity, y_parity);
    }

    #[test]
    fn eip1559_decoder_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = Eip1559Transaction::decode_unsigned(&bytes);
        let _ = decode_signed(&bytes);
    }
}

// ============================================================================
// Algorand
// ============================================================================

proptest! {
    #[test]
    fn payment_round_trip(tx in payment_strategy()) {
        let encoded = tx.encode().unwrap();
        let decoded = PaymentTransaction::decode(&encoded).unwrap();
        prop_assert_eq!(decoded, tx);
    }

    #[test]
    fn payment_bytes_to_sign_are_tagged(tx in payment_strategy()) {
        let bytes = tx.bytes_to_sign().unwrap();
        let encoded = tx.encode().unwrap();
        prop_assert_eq!(&bytes[..2], b"TX");
        prop_assert_eq!(&bytes[2..], encoded.as_slice());
        prop_assert_eq!(tx.tx_id().unwrap().len(), 52);
    }

    #[test]
    fn signed_payment_decoder_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = SignedTransaction::decode(&bytes);
        let _ = PaymentTransaction::decode(&bytes);
    }

    #[test]
    fn address_round_trip(public_key in prop::array::uniform32(any::<u8>())) {
        let address = encode_address(&public_key);
        prop_assert_eq!(address.len(), 58);
        prop_assert_eq!(decode_address(&address).unwrap(), public_key);
    }
}

// ============================================================================
// Amounts
// ============================================================================

proptest! {
    #[test]
    fn units_round_trip(raw in 0u128..10u128.pow(30), decimals in prop_oneof![Just(6u8), Just(18u8)]) {
        let formatted = format_units(raw, decimals);
        prop_assert_eq!(parse_units(&formatted, decimals).unwrap(), raw);
    }
}
