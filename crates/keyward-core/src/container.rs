//! Backup container format and I/O
//!
//! Container layout (little-endian integers):
//! ```text
//! OFFSET      SIZE        FIELD
//! ──────────────────────────────────────────────────────
//! 0x0000      8           magic: "KWBACKUP"
//! 0x0008      1           version: 1
//! 0x0009      1           kdf id
//! 0x000A      1           hash id
//! 0x000B      1           cipher id
//! 0x000C      4           kdf cost (PBKDF2 iterations / Argon2 passes)
//! 0x0010      4           kdf memory in KiB (Argon2 only)
//! 0x0014      4           kdf parallelism (Argon2 only)
//! 0x0018      16          salt
//! 0x0028      12          base nonce
//! 0x0034      2           section count
//!
//! 0x0036      ...         records[section count]
//! ```
//!
//! Each record is `tag_len u8 | tag | flags u8 | len u32 | payload`, followed
//! by a 16-byte authentication tag when bit 0 of `flags` is set. Encrypted
//! payloads use the base nonce with the section index folded in, and bind
//! the header, index, and tag as associated data.

use std::collections::HashSet;
use std::path::Path;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::crypto::{
    derive_key, seal, section_nonce, unseal, CipherId, DerivedKey, HashId, KdfId, KdfParams,
    NONCE_SIZE, SALT_SIZE, TAG_SIZE,
};
use crate::error::{Error, Result};
use crate::storage::write_atomic;
use crate::VERSION;

/// Magic bytes identifying a Keyward backup
pub const BACKUP_MAGIC: &[u8; 8] = b"KWBACKUP";

/// Total header size
pub const HEADER_SIZE: usize = 0x36;

/// Longest permitted section tag in bytes
pub const MAX_TAG_LEN: usize = 255;

/// Record flag marking an encrypted payload
const FLAG_ENCRYPTED: u8 = 0x01;

/// Algorithm choice for a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupAlgorithms {
    pub kdf: KdfId,
    pub hash: HashId,
    pub cipher: CipherId,
    pub kdf_params: KdfParams,
}

impl Default for BackupAlgorithms {
    fn default() -> Self {
        Self {
            kdf: KdfId::Pbkdf2,
            hash: HashId::Sha256,
            cipher: CipherId::Aes256Gcm,
            kdf_params: KdfParams::default_for(KdfId::Pbkdf2),
        }
    }
}

impl BackupAlgorithms {
    pub fn new(kdf: KdfId, hash: HashId, cipher: CipherId) -> Self {
        Self {
            kdf,
            hash,
            cipher,
            kdf_params: KdfParams::default_for(kdf),
        }
    }

    pub fn with_kdf_params(mut self, kdf_params: KdfParams) -> Self {
        self.kdf_params = kdf_params;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.kdf_params.validate(self.kdf, self.hash)
    }

    fn derive(&self, k_op: &[u8], salt: &[u8]) -> Result<DerivedKey> {
        derive_key(self.kdf, self.hash, &self.kdf_params, k_op, salt)
    }
}

/// Backup header (54 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupHeader {
    /// Magic bytes (must be "KWBACKUP")
    pub magic: [u8; 8],

    /// Format version
    pub version: u8,

    /// KDF, hash, cipher, and KDF cost
    pub algorithms: BackupAlgorithms,

    /// KDF salt
    pub salt: [u8; SALT_SIZE],

    /// Base nonce; each encrypted section derives its own from this
    pub nonce: [u8; NONCE_SIZE],

    /// Number of records following the header
    pub section_count: u16,
}

impl BackupHeader {
    /// Create a header with a fresh random salt and nonce
    pub fn new(algorithms: BackupAlgorithms, section_count: u16) -> Self {
        let mut salt = [0u8; SALT_SIZE];
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        Self {
            magic: *BACKUP_MAGIC,
            version: VERSION,
            algorithms,
            salt,
            nonce,
            section_count,
        }
    }

    /// Serialize to bytes (54 bytes)
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        let params = &self.algorithms.kdf_params;

        bytes[0x00..0x08].copy_from_slice(&self.magic);
        bytes[0x08] = self.version;
        bytes[0x09] = self.algorithms.kdf.id();
        bytes[0x0A] = self.algorithms.hash.id();
        bytes[0x0B] = self.algorithms.cipher.id();
        bytes[0x0C..0x10].copy_from_slice(&params.cost.to_le_bytes());
        bytes[0x10..0x14].copy_from_slice(&params.memory_kib.to_le_bytes());
        bytes[0x14..0x18].copy_from_slice(&params.parallelism.to_le_bytes());
        bytes[0x18..0x28].copy_from_slice(&self.salt);
        bytes[0x28..0x34].copy_from_slice(&self.nonce);
        bytes[0x34..0x36].copy_from_slice(&self.section_count.to_le_bytes());

        bytes
    }

    /// Deserialize from the start of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Truncated {
                offset: 0,
                needed: HEADER_SIZE,
            });
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[0x00..0x08]);
        if &magic != BACKUP_MAGIC {
            return Err(Error::InvalidMagic);
        }

        let version = bytes[0x08];
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let kdf = KdfId::try_from(bytes[0x09])?;
        let hash = HashId::try_from(bytes[0x0A])?;
        let cipher = CipherId::try_from(bytes[0x0B])?;
        let kdf_params = KdfParams {
            cost: read_u32(&bytes[0x0C..0x10]),
            memory_kib: read_u32(&bytes[0x10..0x14]),
            parallelism: read_u32(&bytes[0x14..0x18]),
        };

        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&bytes[0x18..0x28]);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[0x28..0x34]);
        let section_count = u16::from_le_bytes([bytes[0x34], bytes[0x35]]);

        Ok(Self {
            magic,
            version,
            algorithms: BackupAlgorithms {
                kdf,
                hash,
                cipher,
                kdf_params,
            },
            salt,
            nonce,
            section_count,
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

/// One tagged section of a backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSection {
    pub tag: String,
    pub encrypted: bool,
    pub payload: Vec<u8>,
}

impl BackupSection {
    pub fn new(tag: impl Into<String>, encrypted: bool, payload: Vec<u8>) -> Self {
        Self {
            tag: tag.into(),
            encrypted,
            payload,
        }
    }

    /// A section stored in clear
    pub fn clear(tag: impl Into<String>, payload: Vec<u8>) -> Self {
        Self::new(tag, false, payload)
    }

    /// A section encrypted under the derived key
    pub fn sealed(tag: impl Into<String>, payload: Vec<u8>) -> Self {
        Self::new(tag, true, payload)
    }
}

/// Check a tag is 1..=255 bytes
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(Error::InvalidTag("tag must not be empty".to_string()));
    }
    if tag.len() > MAX_TAG_LEN {
        return Err(Error::InvalidTag(format!(
            "tag is {} bytes, limit is {}",
            tag.len(),
            MAX_TAG_LEN
        )));
    }
    Ok(())
}

/// Result of decoding a backup
#[derive(Debug, Clone)]
pub struct DecodedBackup {
    pub header: BackupHeader,

    /// Sections in file order
    pub sections: Vec<BackupSection>,

    /// Tags of encrypted sections that were skipped without a key
    pub sealed_tags: Vec<String>,
}

impl DecodedBackup {
    /// Find a decoded section by tag
    pub fn section(&self, tag: &str) -> Option<&BackupSection> {
        self.sections.iter().find(|s| s.tag == tag)
    }
}

/// Associated data for an encrypted record
fn section_aad(header: &[u8; HEADER_SIZE], index: u32, tag: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(HEADER_SIZE + 4 + tag.len());
    aad.extend_from_slice(header);
    aad.extend_from_slice(&index.to_le_bytes());
    aad.extend_from_slice(tag.as_bytes());
    aad
}

/// Serialize a complete backup in memory
///
/// Fails before producing any bytes if a tag is invalid or repeated.
pub fn encode_backup(
    algorithms: &BackupAlgorithms,
    k_op: &[u8],
    sections: &[BackupSection],
) -> Result<Vec<u8>> {
    algorithms.validate()?;

    let section_count = u16::try_from(sections.len()).map_err(|_| {
        Error::InvalidConfig(format!("too many sections: {}", sections.len()))
    })?;

    let mut seen = HashSet::new();
    for section in sections {
        validate_tag(&section.tag)?;
        if !seen.insert(section.tag.as_str()) {
            return Err(Error::DuplicateSection(section.tag.clone()));
        }
        u32::try_from(section.payload.len()).map_err(|_| {
            Error::InvalidConfig(format!("section {} is too large", section.tag))
        })?;
    }

    let header = BackupHeader::new(*algorithms, section_count);
    let header_bytes = header.to_bytes();

    let key = if sections.iter().any(|s| s.encrypted) {
        Some(algorithms.derive(k_op, &header.salt)?)
    } else {
        None
    };

    let mut out = header_bytes.to_vec();
    for (index, section) in sections.iter().enumerate() {
        let index = index as u32;
        out.push(section.tag.len() as u8);
        out.extend_from_slice(section.tag.as_bytes());

        match (&key, section.encrypted) {
            (Some(key), true) => {
                let nonce = section_nonce(&header.nonce, index);
                let aad = section_aad(&header_bytes, index, &section.tag);
                let sealed = seal(algorithms.cipher, key, &nonce, &aad, &section.payload)?;

                out.push(FLAG_ENCRYPTED);
                out.extend_from_slice(&(sealed.ciphertext.len() as u32).to_le_bytes());
                out.extend_from_slice(&sealed.ciphertext);
                out.extend_from_slice(&sealed.tag);
            }
            _ => {
                out.push(0);
                out.extend_from_slice(&(section.payload.len() as u32).to_le_bytes());
                out.extend_from_slice(&section.payload);
            }
        }

        debug!(
            tag = %section.tag,
            encrypted = section.encrypted,
            len = section.payload.len(),
            "Encoded backup section"
        );
    }

    Ok(out)
}

/// Write a backup to `path` atomically
///
/// Sections are written in the given order. Nothing is left at `path` (or
/// beside it) if any step fails.
pub fn create_backup(
    path: &Path,
    algorithms: &BackupAlgorithms,
    k_op: &[u8],
    sections: &[BackupSection],
) -> Result<()> {
    let bytes = encode_backup(algorithms, k_op, sections)?;
    write_atomic(path, &bytes)?;

    info!(
        path = %path.display(),
        sections = sections.len(),
        "Backup written"
    );
    Ok(())
}

/// Read only the clear sections of a backup file; needs no key
pub fn decode_unencrypted(path: &Path) -> Result<DecodedBackup> {
    let bytes = std::fs::read(path)?;
    parse_unencrypted(&bytes)
}

/// Read every section of a backup file, decrypting with a key derived from `k_op`
pub fn decode_encrypted(path: &Path, k_op: &[u8]) -> Result<DecodedBackup> {
    let bytes = std::fs::read(path)?;
    parse_encrypted(&bytes, k_op)
}

/// Parse a backup in memory, returning clear sections and skipping encrypted ones
pub fn parse_unencrypted(bytes: &[u8]) -> Result<DecodedBackup> {
    let parsed = parse_records(bytes)?;

    let mut sections = Vec::new();
    let mut sealed_tags = Vec::new();
    for record in parsed.records {
        if record.auth_tag.is_some() {
            sealed_tags.push(record.tag);
        } else {
            sections.push(BackupSection::clear(record.tag, record.payload.to_vec()));
        }
    }

    Ok(DecodedBackup {
        header: parsed.header,
        sections,
        sealed_tags,
    })
}

/// Parse a backup in memory and decrypt every encrypted section
pub fn parse_encrypted(bytes: &[u8], k_op: &[u8]) -> Result<DecodedBackup> {
    let parsed = parse_records(bytes)?;
    let algorithms = parsed.header.algorithms;

    let key = if parsed.records.iter().any(|r| r.auth_tag.is_some()) {
        Some(algorithms.derive(k_op, &parsed.header.salt)?)
    } else {
        None
    };

    let mut sections = Vec::with_capacity(parsed.records.len());
    for (index, record) in parsed.records.into_iter().enumerate() {
        let section = match (&key, record.auth_tag) {
            (Some(key), Some(auth_tag)) => {
                let index = index as u32;
                let nonce = section_nonce(&parsed.header.nonce, index);
                let aad = section_aad(&parsed.header_bytes, index, &record.tag);
                let payload = unseal(
                    algorithms.cipher,
                    key,
                    &nonce,
                    &aad,
                    record.payload,
                    &auth_tag,
                )?;
                BackupSection::sealed(record.tag, payload)
            }
            _ => BackupSection::clear(record.tag, record.payload.to_vec()),
        };
        sections.push(section);
    }

    Ok(DecodedBackup {
        header: parsed.header,
        sections,
        sealed_tags: Vec::new(),
    })
}

struct RawRecord<'a> {
    tag: String,
    payload: &'a [u8],
    auth_tag: Option<[u8; TAG_SIZE]>,
}

struct ParsedBackup<'a> {
    header: BackupHeader,
    header_bytes: [u8; HEADER_SIZE],
    records: Vec<RawRecord<'a>>,
}

/// Bounds-checked cursor over the record area
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(Error::Truncated {
                offset: self.offset,
                needed: n,
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(read_u32(self.take(4)?))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }
}

fn parse_records(bytes: &[u8]) -> Result<ParsedBackup<'_>> {
    let header = BackupHeader::from_bytes(bytes)?;
    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes.copy_from_slice(&bytes[..HEADER_SIZE]);

    let mut reader = Reader {
        bytes,
        offset: HEADER_SIZE,
    };
    let mut records = Vec::with_capacity(header.section_count as usize);
    let mut seen = HashSet::new();

    for _ in 0..header.section_count {
        let tag_len = reader.u8()? as usize;
        if tag_len == 0 {
            return Err(Error::Format(format!(
                "empty section tag at offset {}",
                reader.offset - 1
            )));
        }
        let tag = std::str::from_utf8(reader.take(tag_len)?)
            .map_err(|_| Error::Format("section tag is not UTF-8".to_string()))?
            .to_string();

        let flags = reader.u8()?;
        if flags & !FLAG_ENCRYPTED != 0 {
            return Err(Error::Format(format!(
                "unknown flags {:#04x} on section {}",
                flags, tag
            )));
        }

        let len = reader.u32()? as usize;
        let payload = reader.take(len)?;
        let auth_tag = if flags & FLAG_ENCRYPTED != 0 {
            let mut auth_tag = [0u8; TAG_SIZE];
            auth_tag.copy_from_slice(reader.take(TAG_SIZE)?);
            Some(auth_tag)
        } else {
            None
        };

        if !seen.insert(tag.clone()) {
            return Err(Error::Format(format!("duplicate section tag {}", tag)));
        }
        records.push(RawRecord {
            tag,
            payload,
            auth_tag,
        });
    }

    if reader.remaining() > 0 {
        return Err(Error::Format(format!(
            "{} trailing bytes after last section",
            reader.remaining()
        )));
    }

    Ok(ParsedBackup {
        header,
        header_bytes,
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fast_algorithms(cipher: CipherId) -> BackupAlgorithms {
        BackupAlgorithms::new(KdfId::Pbkdf2, HashId::Sha256, cipher).with_kdf_params(KdfParams {
            cost: 1000,
            memory_kib: 0,
            parallelism: 0,
        })
    }

    fn sample_sections() -> Vec<BackupSection> {
        vec![
            BackupSection::clear("SSHARING", b"{\"max_shares\":5}".to_vec()),
            BackupSection::sealed("WALLET_CONFIG", b"wallet secrets".to_vec()),
            BackupSection::clear("STORAGE", Vec::new()),
        ]
    }

    #[test]
    fn test_header_roundtrip() {
        let header = BackupHeader::new(fast_algorithms(CipherId::ChaCha20Poly1305), 3);
        let bytes = header.to_bytes();
        let recovered = BackupHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header, recovered);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = BackupHeader::new(BackupAlgorithms::default(), 0).to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            BackupHeader::from_bytes(&bytes),
            Err(Error::InvalidMagic)
        ));
    }

    #[test]
    fn test_unsupported_version_and_algo() {
        let header = BackupHeader::new(BackupAlgorithms::default(), 0);

        let mut bytes = header.to_bytes();
        bytes[0x08] = 9;
        assert!(matches!(
            BackupHeader::from_bytes(&bytes),
            Err(Error::UnsupportedVersion(9))
        ));

        let mut bytes = header.to_bytes();
        bytes[0x0B] = 2;
        assert!(matches!(
            BackupHeader::from_bytes(&bytes),
            Err(Error::UnsupportedAlgo(_))
        ));
    }

    #[test]
    fn test_encode_parse_roundtrip() {
        for cipher in [CipherId::Aes256Gcm, CipherId::ChaCha20Poly1305] {
            let sections = sample_sections();
            let bytes = encode_backup(&fast_algorithms(cipher), b"operational", &sections).unwrap();

            let decoded = parse_encrypted(&bytes, b"operational").unwrap();
            assert_eq!(decoded.sections, sections);
            assert_eq!(decoded.header.section_count, 3);
        }
    }

    #[test]
    fn test_unencrypted_skips_sealed_sections() {
        let bytes = encode_backup(
            &fast_algorithms(CipherId::Aes256Gcm),
            b"operational",
            &sample_sections(),
        )
        .unwrap();

        let decoded = parse_unencrypted(&bytes).unwrap();
        let tags: Vec<&str> = decoded.sections.iter().map(|s| s.tag.as_str()).collect();
        assert_eq!(tags, vec!["SSHARING", "STORAGE"]);
        assert_eq!(decoded.sealed_tags, vec!["WALLET_CONFIG".to_string()]);
    }

    #[test]
    fn test_wrong_key_is_bad_key() {
        let bytes = encode_backup(
            &fast_algorithms(CipherId::Aes256Gcm),
            b"operational",
            &sample_sections(),
        )
        .unwrap();

        assert!(matches!(
            parse_encrypted(&bytes, b"not the key"),
            Err(Error::BadKey)
        ));
    }

    #[test]
    fn test_ciphertext_does_not_contain_plaintext() {
        let bytes = encode_backup(
            &fast_algorithms(CipherId::Aes256Gcm),
            b"operational",
            &sample_sections(),
        )
        .unwrap();
        assert!(!bytes
            .windows(b"wallet secrets".len())
            .any(|w| w == b"wallet secrets"));
    }

    #[test]
    fn test_duplicate_and_invalid_tags_rejected() {
        let algorithms = fast_algorithms(CipherId::Aes256Gcm);

        let dup = vec![
            BackupSection::clear("A", vec![1]),
            BackupSection::sealed("A", vec![2]),
        ];
        assert!(matches!(
            encode_backup(&algorithms, b"k", &dup),
            Err(Error::DuplicateSection(_))
        ));

        let empty = vec![BackupSection::clear("", vec![1])];
        assert!(matches!(
            encode_backup(&algorithms, b"k", &empty),
            Err(Error::InvalidTag(_))
        ));

        let long = vec![BackupSection::clear("T".repeat(256), vec![1])];
        assert!(matches!(
            encode_backup(&algorithms, b"k", &long),
            Err(Error::InvalidTag(_))
        ));
    }

    #[test]
    fn test_tampered_header_fails_authentication() {
        let mut bytes = encode_backup(
            &fast_algorithms(CipherId::Aes256Gcm),
            b"operational",
            &sample_sections(),
        )
        .unwrap();

        // Flip a nonce bit: header is bound into every section's AAD
        bytes[0x28] ^= 0x01;
        assert!(matches!(
            parse_encrypted(&bytes, b"operational"),
            Err(Error::BadKey)
        ));
    }

    #[test]
    fn test_trailing_bytes_and_bad_flags() {
        let algorithms = fast_algorithms(CipherId::Aes256Gcm);
        let sections = vec![BackupSection::clear("A", vec![1, 2, 3])];

        let mut bytes = encode_backup(&algorithms, b"k", &sections).unwrap();
        bytes.push(0);
        assert!(matches!(parse_unencrypted(&bytes), Err(Error::Format(_))));

        let mut bytes = encode_backup(&algorithms, b"k", &sections).unwrap();
        // flags byte follows tag_len (1) and tag (1)
        bytes[HEADER_SIZE + 2] = 0x80;
        assert!(matches!(parse_unencrypted(&bytes), Err(Error::Format(_))));
    }

    #[test]
    fn test_clear_only_backup_opens_with_any_key() {
        let algorithms = fast_algorithms(CipherId::Aes256Gcm);
        let sections = vec![BackupSection::clear("A", vec![7])];
        let bytes = encode_backup(&algorithms, b"k", &sections).unwrap();

        let decoded = parse_encrypted(&bytes, b"anything").unwrap();
        assert_eq!(decoded.sections, sections);
    }

    #[test]
    fn test_create_and_decode_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.kwb");
        let sections = sample_sections();

        create_backup(
            &path,
            &fast_algorithms(CipherId::Aes256Gcm),
            b"operational",
            &sections,
        )
        .unwrap();

        let decoded = decode_encrypted(&path, b"operational").unwrap();
        assert_eq!(decoded.sections, sections);
        assert_eq!(decode_unencrypted(&path).unwrap().sections.len(), 2);
    }

    #[test]
    fn test_create_backup_failure_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.kwb");
        let dup = vec![
            BackupSection::clear("A", vec![1]),
            BackupSection::clear("A", vec![2]),
        ];

        assert!(create_backup(&path, &BackupAlgorithms::default(), b"k", &dup).is_err());
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
