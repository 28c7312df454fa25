//! Keyward Core - Field arithmetic, secret sharing, and the backup container
//!
//! This crate provides the building blocks for protecting an operational key
//! (kOp) by splitting it among custodians and sealing a multi-section backup
//! with a key derived from it.

pub mod container;
pub mod crypto;
pub mod error;
pub mod field;
pub mod shamir;
pub mod storage;
pub mod types;

pub use container::{
    create_backup, decode_encrypted, decode_unencrypted, encode_backup, parse_encrypted,
    parse_unencrypted, BackupAlgorithms, BackupHeader, BackupSection, DecodedBackup,
    BACKUP_MAGIC, HEADER_SIZE,
};
pub use crypto::{
    derive_key, seal, section_nonce, unseal, CipherId, DerivedKey, HashId, KdfId, KdfParams,
    SealedPayload,
};
pub use error::{Error, ErrorKind, Result};
pub use field::{ElementType, FieldElement, PrimeField};
pub use shamir::{
    checksum_of, reconstruct_secret, split_secret, SecretConfig, Shamir, Share, ShareSet,
};
pub use types::OperationalKey;

/// Container format version
pub const VERSION: u8 = 1;

/// Largest number of shares a secret may be split into
pub const MAX_SHARES_LIMIT: usize = 255;

/// Default number of shares produced by a split
pub const DEFAULT_MAX_SHARES: usize = 10;

/// Default number of shares needed to reconstruct
pub const DEFAULT_MIN_SHARES: usize = 4;

/// Default operational key length in bytes
pub const DEFAULT_KEY_LEN: usize = 32;

/// Width of an encoded field element in bytes
pub const ELEMENT_SIZE: usize = 32;

/// Section tag carrying the custodian registry (always clear)
pub const TAG_CUSTODIAN: &str = "CUSTODIAN";

/// Section tag carrying the secret sharing configuration (always clear)
pub const TAG_SSHARING: &str = "SSHARING";

/// Section tag carrying the full share set (always encrypted)
pub const TAG_SHARES: &str = "SHARES";

/// Opaque wallet configuration section
pub const TAG_WALLET_CONFIG: &str = "WALLET_CONFIG";

/// Opaque key material section
pub const TAG_PKEYS: &str = "PKEYS";

/// Opaque storage section
pub const TAG_STORAGE: &str = "STORAGE";
