//! Core newtypes and serde helpers

use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::field::PrimeField;

/// The operational key (kOp) protected by the backup
///
/// Interpreted as a big-endian field element. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct OperationalKey(Vec<u8>);

impl OperationalKey {
    /// Wrap key bytes, checking length and that the value lies in the field
    pub fn new(bytes: Vec<u8>, key_len: usize, field: &PrimeField) -> Result<Self> {
        if bytes.len() != key_len {
            return Err(Error::InvalidKeyLength {
                expected: key_len,
                got: bytes.len(),
            });
        }
        field.from_bytes(&bytes)?;
        Ok(Self(bytes))
    }

    /// Generate a random key of `key_len` bytes that is below the field modulus
    pub fn generate<R: RngCore + CryptoRng>(
        rng: &mut R,
        key_len: usize,
        field: &PrimeField,
    ) -> Self {
        let value = field.random_below(rng, key_len);
        let raw = value.to_bytes_be();
        let mut bytes = vec![0u8; key_len];
        if raw != [0u8] {
            bytes[key_len - raw.len()..].copy_from_slice(&raw);
        }
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for OperationalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OperationalKey([REDACTED])")
    }
}

impl AsRef<[u8]> for OperationalKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Serde helper for hex-encoded byte vectors
pub mod hex_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
