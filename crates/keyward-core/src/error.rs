//! Error types for Keyward core operations

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an error, stable across variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller supplied an invalid argument or inconsistent data
    Validation,
    /// Key derivation, encryption, or authentication failed
    Crypto,
    /// Malformed bytes or an unsupported encoding
    Format,
    /// Filesystem failure
    Io,
    /// Operation not allowed in the current state
    Protocol,
}

/// Errors that can occur in core operations
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid secret sharing or algorithm configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Value does not fit the prime field
    #[error("Value does not fit the field")]
    SecretOutOfRange,

    /// Operational key has the wrong length
    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    /// A share is malformed
    #[error("Invalid share: {0}")]
    InvalidShare(String),

    /// Two shares at the same x disagree on y
    #[error("Inconsistent shares at x = {0}")]
    InconsistentShares(u32),

    /// Not enough distinct shares to reconstruct
    #[error("Insufficient shares: need {need}, have {have}")]
    InsufficientShares { need: usize, have: usize },

    /// Section tag is empty or longer than 255 bytes
    #[error("Invalid section tag: {0}")]
    InvalidTag(String),

    /// Section tag appears twice in one backup
    #[error("Duplicate section tag: {0}")]
    DuplicateSection(String),

    /// Authentication tag did not verify under the derived key
    #[error("Authentication failed - wrong operational key")]
    BadKey,

    /// Cryptographic primitive failure
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Input ended before a complete structure was read
    #[error("Truncated input: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    /// Backup magic bytes do not match
    #[error("Invalid magic bytes")]
    InvalidMagic,

    /// Backup format version is not supported
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),

    /// Unknown KDF, hash, or cipher identifier
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgo(String),

    /// Structurally invalid backup contents
    #[error("Format error: {0}")]
    Format(String),

    /// A required section is absent
    #[error("Missing section: {0}")]
    MissingSection(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConfig(_)
            | Error::SecretOutOfRange
            | Error::InvalidKeyLength { .. }
            | Error::InvalidShare(_)
            | Error::InconsistentShares(_)
            | Error::InvalidTag(_)
            | Error::DuplicateSection(_) => ErrorKind::Validation,
            Error::BadKey | Error::Crypto(_) => ErrorKind::Crypto,
            Error::Truncated { .. }
            | Error::InvalidMagic
            | Error::UnsupportedVersion(_)
            | Error::UnsupportedAlgo(_)
            | Error::Format(_)
            | Error::MissingSection(_)
            | Error::Serialization(_) => ErrorKind::Format,
            Error::Io(_) => ErrorKind::Io,
            Error::InsufficientShares { .. } => ErrorKind::Protocol,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
