//! Backup session
//!
//! A session sequences the whole lifecycle of one backup, either sealing a
//! new one or restoring an existing one:
//!
//! ```text
//! Uninitialized ── initialize ──> Initialized ── generate_shares ──> Splitting ── create_backup ──> Sealed
//!                                      │
//!                                      └── decode_unencrypted ──> Scanning ── decode_encrypted ──> Unsealed
//! ```
//!
//! `initialize` may be called from any state and starts over. Once sealed or
//! unsealed, getters keep working but every mutating call is refused.

use std::fmt;
use std::path::Path;

use keyward_core::{
    container::validate_tag, create_backup, decode_encrypted, decode_unencrypted,
    BackupAlgorithms, BackupSection, OperationalKey, SecretConfig, Shamir, Share, ShareSet,
    ELEMENT_SIZE, TAG_CUSTODIAN, TAG_SHARES, TAG_SSHARING,
};
use rand::rngs::OsRng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CustodyError, Result};
use crate::registry::{Custodian, CustodianRegistry};
use crate::transport;

/// Lifecycle state of a backup session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Splitting,
    Sealed,
    Scanning,
    Unsealed,
}

impl SessionState {
    /// Sealed and unsealed sessions accept no further changes
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Sealed | SessionState::Unsealed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initialized => "initialized",
            SessionState::Splitting => "splitting",
            SessionState::Sealed => "sealed",
            SessionState::Scanning => "scanning",
            SessionState::Unsealed => "unsealed",
        };
        f.write_str(name)
    }
}

/// Outcome of scanning one artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Custodian named in the artifact
    pub custodian: String,

    /// Shares this artifact contributed
    pub added: usize,

    /// Distinct shares held after the scan
    pub total: usize,

    /// Shares needed to reconstruct
    pub needed: usize,
}

impl ScanOutcome {
    pub fn can_reconstruct(&self) -> bool {
        self.total >= self.needed
    }
}

/// One backup lifecycle: split and seal, or scan and unseal
pub struct BackupSession {
    id: Uuid,
    state: SessionState,
    config: SecretConfig,
    k_op: Option<OperationalKey>,
    shares: ShareSet,
    registry: CustodianRegistry,
    sections: Vec<BackupSection>,
}

impl fmt::Debug for BackupSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("config", &self.config)
            .field("has_key", &self.k_op.is_some())
            .field("shares", &self.shares.len())
            .field("custodians", &self.registry.len())
            .field("sections", &self.sections.len())
            .finish()
    }
}

impl Default for BackupSession {
    fn default() -> Self {
        Self::new()
    }
}

impl BackupSession {
    /// Create an uninitialized session
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Uninitialized,
            config: SecretConfig::default(),
            k_op: None,
            shares: ShareSet::new(),
            registry: CustodianRegistry::new(),
            sections: Vec::new(),
        }
    }

    /// Validate `config` and reset everything
    pub fn initialize(&mut self, config: SecretConfig) -> Result<()> {
        config.validate()?;

        *self = Self::new();
        self.config = config;
        self.state = SessionState::Initialized;

        info!(
            session = %self.id,
            max_shares = config.max_shares,
            min_shares = config.min_shares,
            element_type = %config.element_type,
            "Session initialized"
        );
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SecretConfig {
        &self.config
    }

    fn require(&self, operation: &'static str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CustodyError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn shamir(&self) -> Result<Shamir> {
        Ok(Shamir::new(self.config)?)
    }

    // ----------------------------------------
    // Operational key
    // ----------------------------------------

    /// Generate a random operational key for this session
    pub fn generate_operational_key(&mut self) -> Result<&OperationalKey> {
        self.require(
            "generate operational key",
            &[SessionState::Initialized, SessionState::Scanning],
        )?;
        if self.k_op.is_some() {
            return Err(CustodyError::Protocol(
                "operational key already set".to_string(),
            ));
        }

        let key = OperationalKey::generate(&mut OsRng, self.config.key_len, &self.config.field());
        debug!(session = %self.id, "Operational key generated");
        Ok(&*self.k_op.insert(key))
    }

    /// Supply the operational key; allowed once per session
    pub fn set_operational_key(&mut self, bytes: &[u8]) -> Result<()> {
        self.require(
            "set operational key",
            &[SessionState::Initialized, SessionState::Scanning],
        )?;
        if self.k_op.is_some() {
            return Err(CustodyError::Protocol(
                "operational key already set".to_string(),
            ));
        }

        let key = OperationalKey::new(bytes.to_vec(), self.config.key_len, &self.config.field())?;
        self.k_op = Some(key);
        debug!(session = %self.id, "Operational key set");
        Ok(())
    }

    pub fn operational_key(&self) -> Option<&OperationalKey> {
        self.k_op.as_ref()
    }

    /// Use `supplied` if given (checking it against any held key), else the held key
    fn resolve_key(&self, supplied: Option<&[u8]>) -> Result<OperationalKey> {
        match (supplied, &self.k_op) {
            (Some(bytes), Some(held)) if bytes != held.as_bytes() => Err(CustodyError::Protocol(
                "a different operational key is already set".to_string(),
            )),
            (_, Some(held)) => Ok(held.clone()),
            (Some(bytes), None) => Ok(OperationalKey::new(
                bytes.to_vec(),
                self.config.key_len,
                &self.config.field(),
            )?),
            (None, None) => Err(CustodyError::Protocol(
                "no operational key available".to_string(),
            )),
        }
    }

    // ----------------------------------------
    // Splitting
    // ----------------------------------------

    /// Split the operational key into `max_shares` shares
    ///
    /// `k_op` becomes the session key if none is set yet.
    pub fn generate_shares(&mut self, k_op: Option<&[u8]>) -> Result<&ShareSet> {
        self.require("generate shares", &[SessionState::Initialized])?;

        let key = self.resolve_key(k_op)?;
        let shares = self.shamir()?.split(&key, &mut OsRng)?;

        self.k_op = Some(key);
        self.shares = shares;
        self.state = SessionState::Splitting;

        info!(
            session = %self.id,
            shares = self.shares.len(),
            threshold = self.config.min_shares,
            "Shares generated"
        );
        Ok(&self.shares)
    }

    pub fn share_count(&self) -> usize {
        self.shares.len()
    }

    pub fn share(&self, index: usize) -> Option<&Share> {
        self.shares.get(index)
    }

    pub fn share_set(&self) -> &ShareSet {
        &self.shares
    }

    /// Assign `[offset, offset + count)` to a new custodian and write their artifact
    pub fn add_custodian(
        &mut self,
        name: &str,
        storage_dir: &Path,
        share_offset: usize,
        share_count: usize,
    ) -> Result<Custodian> {
        self.require("add custodian", &[SessionState::Splitting])?;
        self.registry.add_custodian(
            name,
            storage_dir,
            share_offset,
            share_count,
            &self.shares,
            self.config.element_type,
        )
    }

    pub fn custodians(&self) -> &[Custodian] {
        self.registry.list()
    }

    pub fn custodian(&self, index: usize) -> Option<&Custodian> {
        self.registry.get(index)
    }

    pub fn registry(&self) -> &CustodianRegistry {
        &self.registry
    }

    // ----------------------------------------
    // Sealing
    // ----------------------------------------

    /// Queue a section for the backup
    pub fn register_section(&mut self, tag: &str, encrypted: bool, payload: Vec<u8>) -> Result<()> {
        self.require(
            "register section",
            &[SessionState::Initialized, SessionState::Splitting],
        )?;
        if tag == TAG_CUSTODIAN || tag == TAG_SSHARING {
            return Err(CustodyError::ReservedSection(tag.to_string()));
        }
        validate_tag(tag)?;
        if self.sections.iter().any(|s| s.tag == tag) {
            return Err(keyward_core::Error::DuplicateSection(tag.to_string()).into());
        }

        debug!(session = %self.id, tag = %tag, encrypted, len = payload.len(), "Section registered");
        self.sections.push(BackupSection::new(tag, encrypted, payload));
        Ok(())
    }

    /// Queue the full share set as the encrypted `SHARES` section
    pub fn register_share_set_section(&mut self) -> Result<()> {
        self.require("register share set", &[SessionState::Splitting])?;
        let payload = serde_json::to_vec(&self.shares)?;
        self.register_section(TAG_SHARES, true, payload)
    }

    pub fn sections(&self) -> &[BackupSection] {
        &self.sections
    }

    /// Write the backup: clear `CUSTODIAN` and `SSHARING` first, then queued sections
    pub fn create_backup(
        &mut self,
        path: &Path,
        algorithms: &BackupAlgorithms,
        k_op: Option<&[u8]>,
    ) -> Result<()> {
        self.require("create backup", &[SessionState::Splitting])?;

        let assigned = self.registry.assigned_total();
        if assigned < self.config.min_shares {
            return Err(CustodyError::Protocol(format!(
                "only {} shares assigned, {} needed to reconstruct",
                assigned, self.config.min_shares
            )));
        }

        let key = self.resolve_key(k_op)?;

        let mut sections = Vec::with_capacity(self.sections.len() + 2);
        sections.push(BackupSection::clear(TAG_CUSTODIAN, self.registry.to_json()?));
        sections.push(BackupSection::clear(
            TAG_SSHARING,
            serde_json::to_vec_pretty(&self.config)?,
        ));
        sections.extend(self.sections.iter().cloned());

        create_backup(path, algorithms, key.as_bytes(), &sections)?;
        self.state = SessionState::Sealed;

        info!(
            session = %self.id,
            path = %path.display(),
            custodians = self.registry.len(),
            sections = sections.len(),
            "Backup sealed"
        );
        Ok(())
    }

    // ----------------------------------------
    // Restoring
    // ----------------------------------------

    /// Read the clear sections, adopting the stored registry and configuration
    ///
    /// Reading a backup again while scanning starts the collection over:
    /// shares and any key gathered for the previous file are discarded.
    pub fn decode_unencrypted(&mut self, path: &Path) -> Result<Vec<BackupSection>> {
        self.require(
            "decode backup",
            &[SessionState::Initialized, SessionState::Scanning],
        )?;

        let decoded = decode_unencrypted(path)?;

        let ssharing = decoded
            .section(TAG_SSHARING)
            .ok_or_else(|| keyward_core::Error::MissingSection(TAG_SSHARING.to_string()))?;
        let config: SecretConfig = serde_json::from_slice(&ssharing.payload)
            .map_err(|e| keyward_core::Error::Format(format!("invalid SSHARING section: {}", e)))?;
        config.validate()?;

        let custodian = decoded
            .section(TAG_CUSTODIAN)
            .ok_or_else(|| keyward_core::Error::MissingSection(TAG_CUSTODIAN.to_string()))?;
        let registry = CustodianRegistry::from_json(&custodian.payload).map_err(|e| {
            keyward_core::Error::Format(format!("invalid CUSTODIAN section: {}", e))
        })?;

        if self.state == SessionState::Scanning {
            if !self.shares.is_empty() {
                debug!(session = %self.id, dropped = self.shares.len(), "Discarding scanned shares");
            }
            self.shares = ShareSet::new();
            self.k_op = None;
        }

        self.config = config;
        self.registry = registry;
        self.state = SessionState::Scanning;

        info!(
            session = %self.id,
            path = %path.display(),
            custodians = self.registry.len(),
            threshold = self.config.min_shares,
            "Backup header read, awaiting share artifacts"
        );
        Ok(decoded.sections)
    }

    /// Scan one custodian artifact, returning how many new shares it added
    ///
    /// A failed scan leaves the collected shares untouched and the session
    /// still scanning.
    pub fn scan_share(&mut self, path: &Path) -> Result<ScanOutcome> {
        self.require("scan share", &[SessionState::Scanning])?;

        let result = self.merge_artifact(path);
        if let Err(e) = &result {
            warn!(session = %self.id, path = %path.display(), error = %e, "Artifact rejected");
        }
        result
    }

    fn merge_artifact(&mut self, path: &Path) -> Result<ScanOutcome> {
        let artifact = transport::decode(path)?;
        self.check_artifact(&artifact)?;

        let added = self.shares.merge(&artifact.shares)?;
        if added == 0 {
            return Err(CustodyError::DuplicateArtifact(artifact.custodian));
        }

        let outcome = ScanOutcome {
            custodian: artifact.custodian,
            added,
            total: self.shares.len(),
            needed: self.config.min_shares,
        };
        info!(
            session = %self.id,
            custodian = %outcome.custodian,
            added = outcome.added,
            total = outcome.total,
            needed = outcome.needed,
            "Artifact scanned"
        );
        Ok(outcome)
    }

    /// Match an artifact against the loaded registry and field
    ///
    /// Nothing is merged unless every share belongs to the named custodian's
    /// range and is a valid element, so a rejected artifact leaves no trace.
    fn check_artifact(&self, artifact: &transport::ShareArtifact) -> Result<()> {
        if artifact.element_type != self.config.element_type {
            return Err(CustodyError::CorruptArtifact(format!(
                "artifact field {} does not match backup field {}",
                artifact.element_type, self.config.element_type
            )));
        }

        let custodian = self
            .registry
            .find_by_name(&artifact.custodian)
            .ok_or_else(|| {
                CustodyError::CorruptArtifact(format!(
                    "custodian {} is not part of this backup",
                    artifact.custodian
                ))
            })?;
        let field = self.config.field();
        for share in &artifact.shares {
            let index = (share.x as usize).checked_sub(1);
            if !index.map_or(false, |i| custodian.range().contains(&i))
                || share.x as usize > self.config.max_shares
            {
                return Err(CustodyError::CorruptArtifact(format!(
                    "share x = {} is outside the range of {}",
                    share.x, custodian.name
                )));
            }
            if share.y.len() != ELEMENT_SIZE || field.from_bytes(&share.y).is_err() {
                return Err(CustodyError::CorruptArtifact(format!(
                    "share x = {} is not a {} element",
                    share.x, self.config.element_type
                )));
            }
        }

        if !custodian.artifact_checksum.is_empty()
            && custodian.artifact_checksum != artifact.checksum
        {
            return Err(CustodyError::CorruptArtifact(format!(
                "artifact was not issued to {} for this backup",
                custodian.name
            )));
        }
        Ok(())
    }

    /// Whether enough distinct shares are held to reconstruct
    pub fn can_reconstruct(&self) -> bool {
        self.shares.len() >= self.config.min_shares
    }

    /// Recover the operational key from the scanned shares
    pub fn reconstruct(&mut self) -> Result<&OperationalKey> {
        self.require("reconstruct", &[SessionState::Scanning])?;

        let key = self.shamir()?.reconstruct(self.shares.as_slice())?;
        if let Some(held) = &self.k_op {
            if *held != key {
                return Err(CustodyError::Protocol(
                    "reconstructed key differs from the key already set".to_string(),
                ));
            }
        }

        info!(session = %self.id, shares = self.shares.len(), "Operational key reconstructed");
        Ok(&*self.k_op.insert(key))
    }

    /// Decrypt every section; a `SHARES` section restores the full share set
    pub fn decode_encrypted(
        &mut self,
        path: &Path,
        k_op: Option<&[u8]>,
    ) -> Result<Vec<BackupSection>> {
        self.require("decode encrypted backup", &[SessionState::Scanning])?;

        let key = self.resolve_key(k_op)?;
        let decoded = decode_encrypted(path, key.as_bytes())?;

        if let Some(section) = decoded.section(TAG_SHARES) {
            let restored: ShareSet = serde_json::from_slice(&section.payload).map_err(|e| {
                keyward_core::Error::Format(format!("invalid SHARES section: {}", e))
            })?;
            let added = self.shares.merge(restored.as_slice())?;
            debug!(session = %self.id, added, "Share set restored from backup");
        }

        self.k_op = Some(key);
        self.state = SessionState::Unsealed;

        info!(
            session = %self.id,
            path = %path.display(),
            sections = decoded.sections.len(),
            "Backup unsealed"
        );
        Ok(decoded.sections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_core::{CipherId, ErrorKind, HashId, KdfId, KdfParams};
    use tempfile::TempDir;

    fn fast_algorithms() -> BackupAlgorithms {
        BackupAlgorithms::new(KdfId::Pbkdf2, HashId::Sha256, CipherId::Aes256Gcm).with_kdf_params(
            KdfParams {
                cost: 1000,
                memory_kib: 0,
                parallelism: 0,
            },
        )
    }

    fn splitting_session(dir: &Path) -> BackupSession {
        let mut session = BackupSession::new();
        session
            .initialize(SecretConfig::new(5, 3, keyward_core::ElementType::Bn254Fr))
            .unwrap();
        session.generate_operational_key().unwrap();
        session.generate_shares(None).unwrap();
        session.add_custodian("alice", dir, 0, 2).unwrap();
        session.add_custodian("bob", dir, 2, 2).unwrap();
        session
    }

    #[test]
    fn test_new_session_is_uninitialized() {
        let mut session = BackupSession::new();
        assert_eq!(session.state(), SessionState::Uninitialized);

        let err = session.generate_shares(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_initialize_rejects_bad_config() {
        let mut session = BackupSession::new();
        let err = session
            .initialize(SecretConfig::new(3, 4, keyward_core::ElementType::Bn254Fr))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[test]
    fn test_operational_key_set_once() {
        let mut session = BackupSession::new();
        session.initialize(SecretConfig::default()).unwrap();

        session.set_operational_key(&[0x01; 32]).unwrap();
        assert!(matches!(
            session.set_operational_key(&[0x02; 32]),
            Err(CustodyError::Protocol(_))
        ));
        assert!(matches!(
            session.generate_operational_key(),
            Err(CustodyError::Protocol(_))
        ));
        assert_eq!(session.operational_key().unwrap().as_bytes(), &[0x01; 32]);
    }

    #[test]
    fn test_operational_key_validation() {
        let mut session = BackupSession::new();
        session.initialize(SecretConfig::default()).unwrap();

        let err = session.set_operational_key(&[0x01; 16]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = session.set_operational_key(&[0xFF; 32]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(session.operational_key().is_none());
    }

    #[test]
    fn test_generate_shares_with_conflicting_key() {
        let mut session = BackupSession::new();
        session.initialize(SecretConfig::default()).unwrap();
        session.set_operational_key(&[0x01; 32]).unwrap();

        assert!(matches!(
            session.generate_shares(Some(&[0x02; 32])),
            Err(CustodyError::Protocol(_))
        ));
        assert_eq!(session.state(), SessionState::Initialized);

        session.generate_shares(Some(&[0x01; 32])).unwrap();
        assert_eq!(session.share_count(), 10);
        assert_eq!(session.state(), SessionState::Splitting);
    }

    #[test]
    fn test_generate_shares_sets_key() {
        let mut session = BackupSession::new();
        session.initialize(SecretConfig::default()).unwrap();

        session.generate_shares(Some(&[0x07; 32])).unwrap();
        assert_eq!(session.operational_key().unwrap().as_bytes(), &[0x07; 32]);
        assert_eq!(session.share(0).unwrap().x, 1);
    }

    #[test]
    fn test_custodian_requires_splitting() {
        let dir = TempDir::new().unwrap();
        let mut session = BackupSession::new();
        session.initialize(SecretConfig::default()).unwrap();

        assert!(matches!(
            session.add_custodian("alice", dir.path(), 0, 1),
            Err(CustodyError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_reserved_and_duplicate_sections() {
        let mut session = BackupSession::new();
        session.initialize(SecretConfig::default()).unwrap();

        assert!(matches!(
            session.register_section(TAG_CUSTODIAN, false, vec![]),
            Err(CustodyError::ReservedSection(_))
        ));
        assert!(matches!(
            session.register_section(TAG_SSHARING, true, vec![]),
            Err(CustodyError::ReservedSection(_))
        ));

        session.register_section("PKEYS", true, vec![1]).unwrap();
        let err = session.register_section("PKEYS", false, vec![2]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(session.sections().len(), 1);
    }

    #[test]
    fn test_create_backup_requires_threshold() {
        let dir = TempDir::new().unwrap();
        let mut session = BackupSession::new();
        session
            .initialize(SecretConfig::new(5, 3, keyward_core::ElementType::Bn254Fr))
            .unwrap();
        session.generate_shares(Some(&[0x05; 32])).unwrap();
        session.add_custodian("alice", dir.path(), 0, 2).unwrap();

        let path = dir.path().join("backup.kwb");
        let err = session
            .create_backup(&path, &fast_algorithms(), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(session.state(), SessionState::Splitting);
        assert!(!path.exists());
    }

    #[test]
    fn test_sealed_session_refuses_mutation() {
        let dir = TempDir::new().unwrap();
        let mut session = splitting_session(dir.path());
        let path = dir.path().join("backup.kwb");

        session
            .create_backup(&path, &fast_algorithms(), None)
            .unwrap();
        assert_eq!(session.state(), SessionState::Sealed);
        assert!(session.state().is_terminal());

        assert!(session.add_custodian("carol", dir.path(), 4, 1).is_err());
        assert!(session.register_section("X", false, vec![]).is_err());
        assert!(session
            .create_backup(&path, &fast_algorithms(), None)
            .is_err());

        // Getters keep working
        assert_eq!(session.custodians().len(), 2);
        assert_eq!(session.share_count(), 5);

        // initialize starts over
        session.initialize(SecretConfig::default()).unwrap();
        assert_eq!(session.state(), SessionState::Initialized);
        assert!(session.custodians().is_empty());
    }

    #[test]
    fn test_full_restore_cycle() {
        let dir = TempDir::new().unwrap();
        let mut session = splitting_session(dir.path());
        let original_key = session.operational_key().unwrap().clone();
        session
            .register_section("WALLET_CONFIG", true, b"wallet".to_vec())
            .unwrap();
        session.register_share_set_section().unwrap();

        let path = dir.path().join("backup.kwb");
        session
            .create_backup(&path, &fast_algorithms(), None)
            .unwrap();
        let alice = session.custodian(0).unwrap().artifact_path.clone();
        let bob = session.custodian(1).unwrap().artifact_path.clone();

        let mut restore = BackupSession::new();
        restore.initialize(SecretConfig::default()).unwrap();
        let clear = restore.decode_unencrypted(&path).unwrap();
        assert_eq!(clear.len(), 2);
        assert_eq!(restore.config().max_shares, 5);
        assert_eq!(restore.custodians().len(), 2);

        assert_eq!(restore.scan_share(&alice).unwrap().added, 2);
        assert!(!restore.can_reconstruct());
        assert!(matches!(
            restore.reconstruct(),
            Err(CustodyError::Core(keyward_core::Error::InsufficientShares { need: 3, have: 2 }))
        ));

        let outcome = restore.scan_share(&bob).unwrap();
        assert!(outcome.can_reconstruct());
        assert_eq!(restore.reconstruct().unwrap(), &original_key);

        let all = restore.decode_encrypted(&path, None).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(restore.state(), SessionState::Unsealed);
        // SHARES restores the shares no custodian handed back
        assert_eq!(restore.share_count(), 5);
    }

    #[test]
    fn test_rescan_is_duplicate() {
        let dir = TempDir::new().unwrap();
        let mut session = splitting_session(dir.path());
        let path = dir.path().join("backup.kwb");
        session
            .create_backup(&path, &fast_algorithms(), None)
            .unwrap();
        let alice = session.custodian(0).unwrap().artifact_path.clone();

        let mut restore = BackupSession::new();
        restore.initialize(SecretConfig::default()).unwrap();
        restore.decode_unencrypted(&path).unwrap();
        restore.scan_share(&alice).unwrap();

        let err = restore.scan_share(&alice).unwrap_err();
        assert!(matches!(err, CustodyError::DuplicateArtifact(ref name) if name == "alice"));
        assert_eq!(restore.share_count(), 2);
        assert_eq!(restore.state(), SessionState::Scanning);
    }

    fn sealed_restore(dir: &Path) -> (BackupSession, OperationalKey) {
        let mut session = splitting_session(dir);
        let key = session.operational_key().unwrap().clone();
        let path = dir.join("backup.kwb");
        session
            .create_backup(&path, &fast_algorithms(), None)
            .unwrap();

        let mut restore = BackupSession::new();
        restore.initialize(SecretConfig::default()).unwrap();
        restore.decode_unencrypted(&path).unwrap();
        (restore, key)
    }

    #[test]
    fn test_out_of_field_share_rejected_before_merge() {
        let dir = TempDir::new().unwrap();
        let (mut restore, key) = sealed_restore(dir.path());

        let forged = dir.path().join("forged.kws");
        transport::encode(
            &[Share::new(1, vec![0xFF; 32])],
            "alice",
            keyward_core::ElementType::Bn254Fr,
            &forged,
        )
        .unwrap();
        let err = restore.scan_share(&forged).unwrap_err();
        assert!(matches!(err, CustodyError::CorruptArtifact(ref m) if m.contains("element")));

        transport::encode(
            &[Share::new(2, vec![0x01; 16])],
            "alice",
            keyward_core::ElementType::Bn254Fr,
            &forged,
        )
        .unwrap();
        assert!(matches!(
            restore.scan_share(&forged),
            Err(CustodyError::CorruptArtifact(_))
        ));
        assert_eq!(restore.share_count(), 0);

        // The genuine artifacts still reconstruct the key
        restore.scan_share(&dir.path().join("share-alice.kws")).unwrap();
        restore.scan_share(&dir.path().join("share-bob.kws")).unwrap();
        assert_eq!(restore.reconstruct().unwrap(), &key);
    }

    #[test]
    fn test_artifact_must_match_registry() {
        let dir = TempDir::new().unwrap();
        let (mut restore, _) = sealed_restore(dir.path());
        let forged = dir.path().join("forged.kws");
        let fr = keyward_core::ElementType::Bn254Fr;

        transport::encode(&[Share::new(5, vec![0x01; 32])], "mallory", fr, &forged).unwrap();
        let err = restore.scan_share(&forged).unwrap_err();
        assert!(matches!(err, CustodyError::CorruptArtifact(ref m) if m.contains("mallory")));
        assert_eq!(err.kind(), ErrorKind::Format);

        // x = 3 belongs to bob
        transport::encode(&[Share::new(3, vec![0x01; 32])], "alice", fr, &forged).unwrap();
        let err = restore.scan_share(&forged).unwrap_err();
        assert!(matches!(err, CustodyError::CorruptArtifact(ref m) if m.contains("range")));

        // In range and in field, but not the shares alice was given
        transport::encode(&[Share::new(1, vec![0x01; 32])], "alice", fr, &forged).unwrap();
        let err = restore.scan_share(&forged).unwrap_err();
        assert!(matches!(err, CustodyError::CorruptArtifact(ref m) if m.contains("not issued")));

        assert_eq!(restore.share_count(), 0);
        assert_eq!(restore.state(), SessionState::Scanning);
    }

    #[test]
    fn test_decode_again_discards_scanned_shares() {
        let dir = TempDir::new().unwrap();
        let (mut restore, key) = sealed_restore(dir.path());
        let alice = dir.path().join("share-alice.kws");

        restore.scan_share(&alice).unwrap();
        assert_eq!(restore.share_count(), 2);

        restore.decode_unencrypted(&dir.path().join("backup.kwb")).unwrap();
        assert_eq!(restore.share_count(), 0);
        assert!(restore.operational_key().is_none());
        assert_eq!(restore.state(), SessionState::Scanning);

        // alice counts as new again after the reload
        assert_eq!(restore.scan_share(&alice).unwrap().added, 2);
        restore.scan_share(&dir.path().join("share-bob.kws")).unwrap();
        assert_eq!(restore.reconstruct().unwrap(), &key);
    }

    #[test]
    fn test_scan_requires_scanning_state() {
        let dir = TempDir::new().unwrap();
        let mut session = BackupSession::new();
        session.initialize(SecretConfig::default()).unwrap();

        let err = session.scan_share(&dir.path().join("x.kws")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }
}
