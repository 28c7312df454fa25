//! Error types for custodian and session operations

use std::path::PathBuf;

use keyward_core::ErrorKind;
use thiserror::Error;

use crate::session::SessionState;

/// Result type alias for custody operations
pub type Result<T> = std::result::Result<T, CustodyError>;

/// Errors that can occur in custody operations
#[derive(Debug, Error)]
pub enum CustodyError {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] keyward_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Custodian name is blank
    #[error("Custodian name must not be empty")]
    EmptyName,

    /// Custodian already registered
    #[error("Custodian already exists: {0}")]
    DuplicateName(String),

    /// Custodian name maps to an artifact file already in use
    #[error("Custodian {name} would share an artifact file with {holder}")]
    ArtifactNameTaken { name: String, holder: String },

    /// Custodian must hold at least one share
    #[error("Invalid share count: {0}")]
    InvalidCount(usize),

    /// Requested range runs past the last share
    #[error("Share range of {count} at offset {offset} exceeds {max} shares")]
    RangeExhausted {
        offset: usize,
        count: usize,
        max: usize,
    },

    /// Requested range intersects another custodian's range
    #[error("Share range overlaps custodian {0}")]
    RangeOverlap(String),

    /// Section tag is written by the session itself
    #[error("Section tag is reserved: {0}")]
    ReservedSection(String),

    /// Artifact text or contents failed validation
    #[error("Corrupt share artifact: {0}")]
    CorruptArtifact(String),

    /// Artifact file could not be read
    #[error("Unreadable file {path:?}: {source}")]
    UnreadableFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Artifact contributed no new shares
    #[error("Artifact adds no new shares: {0}")]
    DuplicateArtifact(String),

    /// Operation not valid in the current session state
    #[error("Cannot {operation} while session is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// Other protocol violation
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl CustodyError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CustodyError::Core(e) => e.kind(),
            CustodyError::Io(_) | CustodyError::UnreadableFile { .. } => ErrorKind::Io,
            CustodyError::Serialization(_) | CustodyError::CorruptArtifact(_) => ErrorKind::Format,
            CustodyError::EmptyName
            | CustodyError::DuplicateName(_)
            | CustodyError::ArtifactNameTaken { .. }
            | CustodyError::InvalidCount(_)
            | CustodyError::RangeExhausted { .. }
            | CustodyError::RangeOverlap(_)
            | CustodyError::ReservedSection(_)
            | CustodyError::DuplicateArtifact(_) => ErrorKind::Validation,
            CustodyError::InvalidState { .. } | CustodyError::Protocol(_) => ErrorKind::Protocol,
        }
    }
}

impl From<serde_json::Error> for CustodyError {
    fn from(e: serde_json::Error) -> Self {
        CustodyError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_keep_their_kind() {
        let err = CustodyError::from(keyward_core::Error::BadKey);
        assert_eq!(err.kind(), ErrorKind::Crypto);

        let err = CustodyError::from(keyward_core::Error::InsufficientShares { need: 3, have: 1 });
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_range_exhausted_message() {
        let err = CustodyError::RangeExhausted {
            offset: 3,
            count: 3,
            max: 5,
        };
        assert_eq!(err.to_string(), "Share range of 3 at offset 3 exceeds 5 shares");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
