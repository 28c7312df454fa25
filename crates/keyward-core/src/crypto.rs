//! Key derivation and authenticated encryption for backup sections
//!
//! A 32-byte section key is derived from the operational key with either
//! PBKDF2-HMAC or Argon2id, then used with AES-256-GCM or ChaCha20-Poly1305.
//! Tags are detached so the container can store them after each payload.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::Aes256Gcm;
use argon2::Argon2;
use chacha20poly1305::ChaCha20Poly1305;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Derived key size in bytes
pub const KEY_SIZE: usize = 32;

/// AEAD nonce size in bytes
pub const NONCE_SIZE: usize = 12;

/// AEAD authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// KDF salt size in bytes
pub const SALT_SIZE: usize = 16;

/// Default PBKDF2 iteration count
pub const PBKDF2_ITERATIONS: u32 = 60_000;

/// Argon2id parameters, tuned for an air-gapped machine with limited memory
pub const ARGON2_MEMORY_KB: u32 = 64 * 1024;
pub const ARGON2_ITERATIONS: u32 = 3;
pub const ARGON2_PARALLELISM: u32 = 1;

/// Upper bound on KDF cost accepted from a header
const MAX_KDF_COST: u32 = 10_000_000;

/// Upper bound on Argon2 memory accepted from a header (1 GiB)
const MAX_KDF_MEMORY_KB: u32 = 1024 * 1024;

/// Key derivation function identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KdfId {
    Pbkdf2,
    Argon2id,
}

impl KdfId {
    pub fn id(self) -> u8 {
        match self {
            KdfId::Pbkdf2 => 2,
            KdfId::Argon2id => 3,
        }
    }
}

impl TryFrom<u8> for KdfId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            2 => Ok(KdfId::Pbkdf2),
            3 => Ok(KdfId::Argon2id),
            other => Err(Error::UnsupportedAlgo(format!("kdf id {}", other))),
        }
    }
}

/// Hash function identifier (PBKDF2 only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashId {
    None,
    Sha256,
    Sha512,
}

impl HashId {
    pub fn id(self) -> u8 {
        match self {
            HashId::None => 0,
            HashId::Sha256 => 2,
            HashId::Sha512 => 3,
        }
    }
}

impl TryFrom<u8> for HashId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(HashId::None),
            2 => Ok(HashId::Sha256),
            3 => Ok(HashId::Sha512),
            other => Err(Error::UnsupportedAlgo(format!("hash id {}", other))),
        }
    }
}

/// Cipher identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherId {
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl CipherId {
    pub fn id(self) -> u8 {
        match self {
            CipherId::Aes256Gcm => 1,
            CipherId::ChaCha20Poly1305 => 3,
        }
    }
}

impl TryFrom<u8> for CipherId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(CipherId::Aes256Gcm),
            3 => Ok(CipherId::ChaCha20Poly1305),
            other => Err(Error::UnsupportedAlgo(format!("cipher id {}", other))),
        }
    }
}

/// Cost parameters for key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// PBKDF2 iterations or Argon2 passes
    pub cost: u32,

    /// Argon2 memory in KiB (0 for PBKDF2)
    pub memory_kib: u32,

    /// Argon2 lanes (0 for PBKDF2)
    pub parallelism: u32,
}

impl KdfParams {
    /// Recommended parameters for a KDF
    pub fn default_for(kdf: KdfId) -> Self {
        match kdf {
            KdfId::Pbkdf2 => Self {
                cost: PBKDF2_ITERATIONS,
                memory_kib: 0,
                parallelism: 0,
            },
            KdfId::Argon2id => Self {
                cost: ARGON2_ITERATIONS,
                memory_kib: ARGON2_MEMORY_KB,
                parallelism: ARGON2_PARALLELISM,
            },
        }
    }

    /// Check the parameters and hash choice are usable with `kdf`
    pub fn validate(&self, kdf: KdfId, hash: HashId) -> Result<()> {
        if self.cost == 0 || self.cost > MAX_KDF_COST {
            return Err(Error::InvalidConfig(format!(
                "kdf cost {} out of range",
                self.cost
            )));
        }
        match kdf {
            KdfId::Pbkdf2 => {
                if hash == HashId::None {
                    return Err(Error::UnsupportedAlgo(
                        "PBKDF2 requires a hash function".to_string(),
                    ));
                }
            }
            KdfId::Argon2id => {
                if hash != HashId::None {
                    return Err(Error::UnsupportedAlgo(format!(
                        "Argon2id does not take hash id {}",
                        hash.id()
                    )));
                }
                if self.memory_kib == 0 || self.memory_kib > MAX_KDF_MEMORY_KB {
                    return Err(Error::InvalidConfig(format!(
                        "argon2 memory {} KiB out of range",
                        self.memory_kib
                    )));
                }
                if self.parallelism == 0 {
                    return Err(Error::InvalidConfig(
                        "argon2 parallelism must be at least 1".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Symmetric key derived from the operational key (zeroized on drop)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_SIZE]);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DerivedKey([REDACTED])")
    }
}

/// Derive a section key from the operational key. Deterministic in all inputs.
pub fn derive_key(
    kdf: KdfId,
    hash: HashId,
    params: &KdfParams,
    k_op: &[u8],
    salt: &[u8],
) -> Result<DerivedKey> {
    params.validate(kdf, hash)?;

    let mut key = [0u8; KEY_SIZE];
    match kdf {
        KdfId::Pbkdf2 => match hash {
            HashId::Sha256 => pbkdf2::pbkdf2_hmac::<Sha256>(k_op, salt, params.cost, &mut key),
            HashId::Sha512 => pbkdf2::pbkdf2_hmac::<Sha512>(k_op, salt, params.cost, &mut key),
            HashId::None => {
                return Err(Error::UnsupportedAlgo(
                    "PBKDF2 requires a hash function".to_string(),
                ))
            }
        },
        KdfId::Argon2id => {
            let argon_params = argon2::Params::new(
                params.memory_kib,
                params.cost,
                params.parallelism,
                Some(KEY_SIZE),
            )
            .map_err(|e| Error::Crypto(format!("Invalid Argon2 params: {}", e)))?;

            Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, argon_params)
                .hash_password_into(k_op, salt, &mut key)
                .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;
        }
    }

    let derived = DerivedKey(key);
    key.zeroize();
    Ok(derived)
}

/// Ciphertext with its detached authentication tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

/// Encrypt and authenticate `plaintext`, binding `aad`
pub fn seal(
    cipher: CipherId,
    key: &DerivedKey,
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<SealedPayload> {
    let mut buffer = plaintext.to_vec();
    let tag = match cipher {
        CipherId::Aes256Gcm => {
            let aead = Aes256Gcm::new_from_slice(key.as_bytes())
                .map_err(|e| Error::Crypto(format!("Failed to create cipher: {}", e)))?;
            seal_in_place(&aead, nonce, aad, &mut buffer)?
        }
        CipherId::ChaCha20Poly1305 => {
            let aead = ChaCha20Poly1305::new_from_slice(key.as_bytes())
                .map_err(|e| Error::Crypto(format!("Failed to create cipher: {}", e)))?;
            seal_in_place(&aead, nonce, aad, &mut buffer)?
        }
    };
    Ok(SealedPayload {
        ciphertext: buffer,
        tag,
    })
}

/// Verify and decrypt; fails `BadKey` if the tag does not verify
pub fn unseal(
    cipher: CipherId,
    key: &DerivedKey,
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8; TAG_SIZE],
) -> Result<Vec<u8>> {
    let mut buffer = ciphertext.to_vec();
    match cipher {
        CipherId::Aes256Gcm => {
            let aead = Aes256Gcm::new_from_slice(key.as_bytes())
                .map_err(|e| Error::Crypto(format!("Failed to create cipher: {}", e)))?;
            unseal_in_place(&aead, nonce, aad, &mut buffer, tag)?;
        }
        CipherId::ChaCha20Poly1305 => {
            let aead = ChaCha20Poly1305::new_from_slice(key.as_bytes())
                .map_err(|e| Error::Crypto(format!("Failed to create cipher: {}", e)))?;
            unseal_in_place(&aead, nonce, aad, &mut buffer, tag)?;
        }
    }
    Ok(buffer)
}

fn seal_in_place<A: AeadInPlace>(
    aead: &A,
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    buffer: &mut [u8],
) -> Result<[u8; TAG_SIZE]> {
    let tag = aead
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, buffer)
        .map_err(|_| Error::Crypto("Encryption failed".to_string()))?;
    let mut out = [0u8; TAG_SIZE];
    out.copy_from_slice(tag.as_slice());
    Ok(out)
}

fn unseal_in_place<A: AeadInPlace>(
    aead: &A,
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    buffer: &mut [u8],
    tag: &[u8; TAG_SIZE],
) -> Result<()> {
    aead.decrypt_in_place_detached(
        GenericArray::from_slice(nonce),
        aad,
        buffer,
        GenericArray::from_slice(tag),
    )
    .map_err(|_| Error::BadKey)
}

/// Per-section nonce: the base nonce with the big-endian section index
/// XORed into its last four bytes
pub fn section_nonce(base: &[u8; NONCE_SIZE], index: u32) -> [u8; NONCE_SIZE] {
    let mut nonce = *base;
    for (n, i) in nonce[NONCE_SIZE - 4..].iter_mut().zip(index.to_be_bytes()) {
        *n ^= i;
    }
    nonce
}
