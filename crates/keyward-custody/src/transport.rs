//! Share artifacts for custodian hand-off
//!
//! Each custodian receives one artifact file holding their shares as
//! QR-ready text:
//!
//! - Single code: `KEYWARD:SHARES:1:<base64-json>`
//! - Larger payloads are split into lines of the form `NN/MM:<chunk>`, each
//!   fitting one QR code. Chunks may be scanned back in any order.
//!
//! The JSON body carries a SHA-256 checksum over the canonical share bytes so
//! a damaged or hand-edited artifact is rejected before any share is used.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use keyward_core::{checksum_of, storage::write_atomic, ElementType, Share};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CustodyError, Result};

/// Artifact format version
pub const ARTIFACT_VERSION: u8 = 1;

/// Prefix for share artifact QR payloads
pub const ARTIFACT_PREFIX: &str = "KEYWARD:SHARES:1:";

/// File extension for share artifacts
pub const ARTIFACT_EXTENSION: &str = "kws";

/// Maximum size for a single QR code (Version 40, Low ECC)
pub const MAX_QR_BYTES: usize = 2953;

/// Space reserved for a chunk header: "NN/MM:"
const CHUNK_HEADER_LEN: usize = 7;

/// Two-digit chunk headers cap an artifact at this many QR codes
pub const MAX_CHUNKS: usize = 99;

/// A custodian's shares as carried in an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareArtifact {
    /// Format version
    pub version: u8,

    /// Custodian the shares were issued to
    pub custodian: String,

    /// Field the shares live in
    pub element_type: ElementType,

    /// Issue timestamp (unix seconds)
    pub created_at: i64,

    /// The shares themselves
    pub shares: Vec<Share>,

    /// Hex SHA-256 over the canonical share bytes
    pub checksum: String,
}

impl ShareArtifact {
    /// Build an artifact, stamping the checksum and creation time
    pub fn new(custodian: &str, element_type: ElementType, shares: Vec<Share>) -> Self {
        Self {
            version: ARTIFACT_VERSION,
            custodian: custodian.to_string(),
            element_type,
            created_at: chrono::Utc::now().timestamp(),
            checksum: checksum_of(&shares),
            shares,
        }
    }

    /// Check version, share list, and checksum
    pub fn verify(&self) -> Result<()> {
        if self.version != ARTIFACT_VERSION {
            return Err(CustodyError::CorruptArtifact(format!(
                "unsupported artifact version {}",
                self.version
            )));
        }
        if self.shares.is_empty() {
            return Err(CustodyError::CorruptArtifact("no shares".to_string()));
        }
        if self.shares.iter().any(|s| s.x == 0) {
            return Err(CustodyError::CorruptArtifact("share at x = 0".to_string()));
        }
        if checksum_of(&self.shares) != self.checksum {
            return Err(CustodyError::CorruptArtifact(
                "checksum mismatch".to_string(),
            ));
        }
        Ok(())
    }
}

/// QR-ready text for an artifact: one line per QR code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactText {
    /// The encoded chunks
    pub chunks: Vec<String>,
}

impl ArtifactText {
    /// Check if this fits a single QR code
    pub fn is_single(&self) -> bool {
        self.chunks.len() == 1
    }

    /// File contents: chunks joined by newlines
    pub fn to_file_contents(&self) -> String {
        let mut out = self.chunks.join("\n");
        out.push('\n');
        out
    }
}

/// Encode an artifact as QR-ready text, chunking if necessary
pub fn encode_text(artifact: &ShareArtifact) -> Result<ArtifactText> {
    let json = serde_json::to_vec(artifact)?;
    let payload = format!("{}{}", ARTIFACT_PREFIX, BASE64.encode(&json));

    if payload.len() <= MAX_QR_BYTES {
        return Ok(ArtifactText {
            chunks: vec![payload],
        });
    }

    let chunk_data_size = MAX_QR_BYTES - CHUNK_HEADER_LEN;
    let total_chunks = (payload.len() + chunk_data_size - 1) / chunk_data_size;
    if total_chunks > MAX_CHUNKS {
        return Err(CustodyError::Serialization(format!(
            "artifact needs {} QR codes, limit is {}",
            total_chunks, MAX_CHUNKS
        )));
    }

    // Payload is ASCII, so byte offsets are char boundaries
    let chunks = payload
        .as_bytes()
        .chunks(chunk_data_size)
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "{:02}/{:02}:{}",
                i + 1,
                total_chunks,
                String::from_utf8_lossy(chunk)
            )
        })
        .collect();

    Ok(ArtifactText { chunks })
}

/// Collects scanned chunks until the full payload is available
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    chunks: Vec<Option<String>>,
    total_chunks: Option<usize>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one scanned line
    ///
    /// Returns true once every chunk has been received.
    pub fn add_chunk(&mut self, data: &str) -> Result<bool> {
        let data = data.trim();

        if data.starts_with(ARTIFACT_PREFIX) {
            if self.total_chunks.is_some() {
                return Err(CustodyError::CorruptArtifact(
                    "unchunked payload mixed with chunks".to_string(),
                ));
            }
            self.total_chunks = Some(1);
            self.chunks = vec![Some(data.to_string())];
            return Ok(true);
        }

        let (header, payload) = data
            .split_once(':')
            .ok_or_else(|| CustodyError::CorruptArtifact("missing artifact prefix".to_string()))?;
        let (index_str, total_str) = header
            .split_once('/')
            .ok_or_else(|| CustodyError::CorruptArtifact("missing artifact prefix".to_string()))?;
        let index: usize = index_str
            .parse()
            .map_err(|_| CustodyError::CorruptArtifact("invalid chunk number".to_string()))?;
        let total: usize = total_str
            .parse()
            .map_err(|_| CustodyError::CorruptArtifact("invalid total chunks".to_string()))?;

        if total == 0 || total > MAX_CHUNKS || index == 0 || index > total {
            return Err(CustodyError::CorruptArtifact(format!(
                "invalid chunk index {}/{}",
                index, total
            )));
        }

        match self.total_chunks {
            None => {
                self.total_chunks = Some(total);
                self.chunks = vec![None; total];
            }
            Some(expected) if expected != total => {
                return Err(CustodyError::CorruptArtifact(
                    "chunk total mismatch".to_string(),
                ));
            }
            Some(_) => {}
        }

        if let Some(existing) = &self.chunks[index - 1] {
            if existing != payload {
                return Err(CustodyError::CorruptArtifact(format!(
                    "conflicting copies of chunk {}",
                    index
                )));
            }
        }
        self.chunks[index - 1] = Some(payload.to_string());

        Ok(self.is_complete())
    }

    /// Check if all chunks received
    pub fn is_complete(&self) -> bool {
        self.total_chunks.is_some() && self.chunks.iter().all(|c| c.is_some())
    }

    /// Get the number of received chunks
    pub fn received_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    /// Get the expected total chunks
    pub fn expected_count(&self) -> Option<usize> {
        self.total_chunks
    }

    /// Decode the reassembled payload
    pub fn finish(&self) -> Result<ShareArtifact> {
        if !self.is_complete() {
            return Err(CustodyError::CorruptArtifact(format!(
                "incomplete artifact: {} of {} chunks",
                self.received_count(),
                self.total_chunks.unwrap_or(0)
            )));
        }

        let combined: String = self.chunks.iter().flatten().map(String::as_str).collect();
        let encoded = combined
            .strip_prefix(ARTIFACT_PREFIX)
            .ok_or_else(|| CustodyError::CorruptArtifact("missing artifact prefix".to_string()))?;

        let json = BASE64
            .decode(encoded)
            .map_err(|e| CustodyError::CorruptArtifact(format!("base64 decode: {}", e)))?;
        let artifact: ShareArtifact = serde_json::from_slice(&json)
            .map_err(|e| CustodyError::CorruptArtifact(format!("json decode: {}", e)))?;

        artifact.verify()?;
        Ok(artifact)
    }
}

/// Decode artifact text (one or more lines)
pub fn decode_text(text: &str) -> Result<ShareArtifact> {
    let mut assembler = ChunkAssembler::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        assembler.add_chunk(line)?;
    }
    assembler.finish()
}

/// File name for a custodian's artifact: `share-<name>.kws`
///
/// Characters outside `[A-Za-z0-9_-]` are replaced with `_`.
pub fn artifact_file_name(custodian: &str) -> String {
    let sanitized: String = custodian
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("share-{}.{}", sanitized, ARTIFACT_EXTENSION)
}

/// Write a custodian's shares to `destination` atomically
pub fn encode(
    shares: &[Share],
    custodian: &str,
    element_type: ElementType,
    destination: &Path,
) -> Result<ShareArtifact> {
    let artifact = ShareArtifact::new(custodian, element_type, shares.to_vec());
    let text = encode_text(&artifact)?;
    write_atomic(destination, text.to_file_contents().as_bytes())?;

    debug!(
        custodian = %custodian,
        shares = shares.len(),
        chunks = text.chunks.len(),
        path = %destination.display(),
        "Share artifact written"
    );
    Ok(artifact)
}

/// Read and verify an artifact file
pub fn decode(path: &Path) -> Result<ShareArtifact> {
    let text = std::fs::read_to_string(path).map_err(|source| CustodyError::UnreadableFile {
        path: path.to_path_buf(),
        source,
    })?;
    decode_text(&text)
}
