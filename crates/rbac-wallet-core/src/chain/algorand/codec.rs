//! Canonical msgpack encoding of Algorand payment transactions
//!
//! Canonical form: map keys sorted, zero-valued fields omitted, byte strings
//! as msgpack `bin`. Field declaration order below is the sorted key order,
//! which is the order serde emits them in.

use crate::types::sha512_256;
use crate::{Error, Result};
use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};

/// Domain separator prefixed to every signed transaction
pub const TX_TAG: &[u8] = b"TX";

/// Bytes an ed25519 signature adds once attached, used in fee estimation
pub const SIGNATURE_OVERHEAD: usize = 75;

/// Length of an encoded address
pub const ADDRESS_LEN: usize = 58;

fn is_zero(v: &u64) -> bool {
    *v == 0
}

fn is_zero_bytes(v: &[u8; 32]) -> bool {
    v.iter().all(|b| *b == 0)
}

/// Payment transaction (`type = "pay"`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    #[serde(rename = "amt", default, skip_serializing_if = "is_zero")]
    pub amount: u64,
    #[serde(rename = "fee", default, skip_serializing_if = "is_zero")]
    pub fee: u64,
    #[serde(rename = "fv", default, skip_serializing_if = "is_zero")]
    pub first_valid: u64,
    #[serde(rename = "gen", default, skip_serializing_if = "String::is_empty")]
    pub genesis_id: String,
    #[serde(
        rename = "gh",
        with = "fixed_bytes",
        default,
        skip_serializing_if = "is_zero_bytes"
    )]
    pub genesis_hash: [u8; 32],
    #[serde(rename = "lv", default, skip_serializing_if = "is_zero")]
    pub last_valid: u64,
    #[serde(
        rename = "rcv",
        with = "fixed_bytes",
        default,
        skip_serializing_if = "is_zero_bytes"
    )]
    pub receiver: [u8; 32],
    #[serde(
        rename = "snd",
        with = "fixed_bytes",
        default,
        skip_serializing_if = "is_zero_bytes"
    )]
    pub sender: [u8; 32],
    #[serde(rename = "type")]
    pub tx_type: String,
}

/// Payment transaction with its signature attached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    #[serde(rename = "sig", with = "fixed_bytes")]
    pub signature: [u8; 64],
    #[serde(rename = "txn")]
    pub transaction: PaymentTransaction,
}

impl PaymentTransaction {
    /// Canonical msgpack encoding
    pub fn encode(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// `"TX" || msgpack(txn)`, the bytes the sender signs
    pub fn bytes_to_sign(&self) -> Result<Vec<u8>> {
        let mut bytes = TX_TAG.to_vec();
        bytes.extend_from_slice(&self.encode()?);
        Ok(bytes)
    }

    /// Transaction id: base32 of SHA-512/256 over the signed bytes
    pub fn tx_id(&self) -> Result<String> {
        Ok(BASE32_NOPAD.encode(&sha512_256(&self.bytes_to_sign()?)))
    }

    /// Size once signed, as used for per-byte fees
    pub fn estimate_signed_size(&self) -> Result<usize> {
        Ok(self.encode()?.len() + SIGNATURE_OVERHEAD)
    }
}

impl SignedTransaction {
    pub fn encode(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Encode a public key as a checksummed address
pub fn encode_address(public_key: &[u8; 32]) -> String {
    let checksum = sha512_256(public_key);
    let mut bytes = public_key.to_vec();
    bytes.extend_from_slice(&checksum[28..]);
    BASE32_NOPAD.encode(&bytes)
}

/// Decode an address and check its checksum
pub fn decode_address(address: &str) -> Result<[u8; 32]> {
    if address.len() != ADDRESS_LEN {
        return Err(Error::InvalidAddress(format!(
            "{}: expected {} characters",
            address, ADDRESS_LEN
        )));
    }
    let bytes = BASE32_NOPAD
        .decode(address.as_bytes())
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", address, e)))?;
    if bytes.len() != 36 {
        return Err(Error::InvalidAddress(format!("{}: bad length", address)));
    }

    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(&bytes[..32]);
    if sha512_256(&public_key)[28..] != bytes[32..] {
        return Err(Error::InvalidAddress(format!("{}: checksum mismatch", address)));
    }
    Ok(public_key)
}

/// Serde adapter for fixed-size byte arrays encoded as msgpack `bin`
mod fixed_bytes {
    use serde::de::{Error as _, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        deserializer.deserialize_bytes(FixedBytesVisitor::<N>)
    }

    struct FixedBytesVisitor<const N: usize>;

    impl<'de, const N: usize> Visitor<'de> for FixedBytesVisitor<N> {
        type Value = [u8; N];

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{} bytes", N)
        }

        fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            v.try_into()
                .map_err(|_| E::invalid_length(v.len(), &self))
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = [0u8; N];
            for (i, byte) in out.iter_mut().enumerate() {
                *byte = seq
                    .next_element()?
                    .ok_or_else(|| A::Error::invalid_length(i, &self))?;
            }
            Ok(out)
        }
    }
}
