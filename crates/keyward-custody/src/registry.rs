//! Custodian registry
//!
//! Tracks who holds which shares and where their artifact was written.
//! Ranges are half-open `[offset, offset + count)` indices into the share
//! set, pairwise disjoint, and bounded by the configured share count.

use std::ops::Range;
use std::path::{Path, PathBuf};

use keyward_core::{ElementType, ShareSet};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CustodyError, Result};
use crate::transport;

/// A named holder of a contiguous range of shares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Custodian {
    /// Display name (trimmed)
    pub name: String,

    /// Index of the first assigned share
    pub share_offset: usize,

    /// Number of assigned shares
    pub share_count: usize,

    /// Where the custodian's artifact was written
    pub artifact_path: PathBuf,

    /// Checksum of the assigned shares, matching the artifact's own
    #[serde(default)]
    pub artifact_checksum: String,

    /// Registration timestamp (unix seconds)
    pub created_at: i64,
}

impl Custodian {
    /// Assigned share indices
    pub fn range(&self) -> Range<usize> {
        self.share_offset..self.share_offset + self.share_count
    }

    fn overlaps(&self, other: &Range<usize>) -> bool {
        let own = self.range();
        own.start < other.end && other.start < own.end
    }
}

/// Registry of custodians in creation order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodianRegistry {
    custodians: Vec<Custodian>,
}

impl CustodianRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a prospective assignment without changing anything
    ///
    /// Returns the trimmed name on success.
    pub fn check_assignment(
        &self,
        name: &str,
        share_offset: usize,
        share_count: usize,
        max_shares: usize,
    ) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CustodyError::EmptyName);
        }
        if self.find_by_name(name).is_some() {
            return Err(CustodyError::DuplicateName(name.to_string()));
        }
        // Names that sanitize alike would share one artifact file
        let file_name = transport::artifact_file_name(name);
        if let Some(holder) = self
            .custodians
            .iter()
            .find(|c| transport::artifact_file_name(&c.name) == file_name)
        {
            return Err(CustodyError::ArtifactNameTaken {
                name: name.to_string(),
                holder: holder.name.clone(),
            });
        }
        if share_count == 0 {
            return Err(CustodyError::InvalidCount(share_count));
        }

        let end = share_offset
            .checked_add(share_count)
            .filter(|&end| end <= max_shares)
            .ok_or(CustodyError::RangeExhausted {
                offset: share_offset,
                count: share_count,
                max: max_shares,
            })?;

        let requested = share_offset..end;
        if let Some(holder) = self.custodians.iter().find(|c| c.overlaps(&requested)) {
            return Err(CustodyError::RangeOverlap(holder.name.clone()));
        }

        Ok(name.to_string())
    }

    /// Register a custodian and write their artifact to `storage_dir`
    ///
    /// The registry is unchanged if validation or the artifact write fails.
    pub fn add_custodian(
        &mut self,
        name: &str,
        storage_dir: &Path,
        share_offset: usize,
        share_count: usize,
        shares: &ShareSet,
        element_type: ElementType,
    ) -> Result<Custodian> {
        let name = self.check_assignment(name, share_offset, share_count, shares.len())?;
        let assigned = shares
            .range(share_offset, share_count)
            .ok_or(CustodyError::RangeExhausted {
                offset: share_offset,
                count: share_count,
                max: shares.len(),
            })?;

        let artifact_path = storage_dir.join(transport::artifact_file_name(&name));
        let artifact = transport::encode(assigned, &name, element_type, &artifact_path)?;

        let custodian = Custodian {
            name,
            share_offset,
            share_count,
            artifact_path,
            artifact_checksum: artifact.checksum,
            created_at: chrono::Utc::now().timestamp(),
        };
        self.custodians.push(custodian.clone());

        info!(
            custodian = %custodian.name,
            offset = share_offset,
            count = share_count,
            assigned_total = self.assigned_total(),
            "Custodian registered"
        );
        Ok(custodian)
    }

    /// All custodians in creation order
    pub fn list(&self) -> &[Custodian] {
        &self.custodians
    }

    /// Custodian by creation index
    pub fn get(&self, index: usize) -> Option<&Custodian> {
        self.custodians.get(index)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Custodian> {
        let name = name.trim();
        self.custodians.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.custodians.len()
    }

    pub fn is_empty(&self) -> bool {
        self.custodians.is_empty()
    }

    /// Total number of shares handed out
    pub fn assigned_total(&self) -> usize {
        self.custodians.iter().map(|c| c.share_count).sum()
    }

    /// Serialize for the clear `CUSTODIAN` backup section
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Load from a `CUSTODIAN` backup section
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_core::Share;
    use tempfile::TempDir;

    fn shares(n: u32) -> ShareSet {
        ShareSet::from_shares((1..=n).map(|x| Share::new(x, vec![x as u8; 32])).collect())
    }

    #[test]
    fn test_register_custodians() {
        let dir = TempDir::new().unwrap();
        let set = shares(5);
        let mut registry = CustodianRegistry::new();

        let alice = registry
            .add_custodian("alice", dir.path(), 0, 2, &set, ElementType::Bn254Fr)
            .unwrap();
        registry
            .add_custodian("bob", dir.path(), 2, 3, &set, ElementType::Bn254Fr)
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.assigned_total(), 5);
        assert_eq!(registry.get(0).unwrap().name, "alice");
        assert_eq!(alice.artifact_path, dir.path().join("share-alice.kws"));
        assert!(alice.artifact_path.exists());

        let artifact = transport::decode(&alice.artifact_path).unwrap();
        assert_eq!(artifact.shares, set.as_slice()[0..2].to_vec());
    }

    #[test]
    fn test_validation_errors() {
        let dir = TempDir::new().unwrap();
        let set = shares(5);
        let mut registry = CustodianRegistry::new();
        registry
            .add_custodian("alice", dir.path(), 0, 2, &set, ElementType::Bn254Fr)
            .unwrap();

        let fr = ElementType::Bn254Fr;
        assert!(matches!(
            registry.add_custodian("   ", dir.path(), 2, 1, &set, fr),
            Err(CustodyError::EmptyName)
        ));
        assert!(matches!(
            registry.add_custodian(" alice ", dir.path(), 2, 1, &set, fr),
            Err(CustodyError::DuplicateName(_))
        ));
        assert!(matches!(
            registry.add_custodian("bob", dir.path(), 2, 0, &set, fr),
            Err(CustodyError::InvalidCount(0))
        ));
        assert!(matches!(
            registry.add_custodian("bob", dir.path(), 3, 3, &set, fr),
            Err(CustodyError::RangeExhausted { .. })
        ));
        assert!(matches!(
            registry.add_custodian("bob", dir.path(), 1, 2, &set, fr),
            Err(CustodyError::RangeOverlap(ref holder)) if holder == "alice"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_names_sharing_artifact_file_rejected() {
        let dir = TempDir::new().unwrap();
        let set = shares(5);
        let mut registry = CustodianRegistry::new();
        let first = registry
            .add_custodian("a b", dir.path(), 0, 2, &set, ElementType::Bn254Fr)
            .unwrap();

        let err = registry
            .add_custodian("a_b", dir.path(), 2, 2, &set, ElementType::Bn254Fr)
            .unwrap_err();
        assert!(matches!(
            err,
            CustodyError::ArtifactNameTaken { ref holder, .. } if holder == "a b"
        ));
        assert_eq!(err.kind(), keyward_core::ErrorKind::Validation);
        assert_eq!(registry.len(), 1);

        // The first custodian's artifact still holds their own shares
        let artifact = transport::decode(&first.artifact_path).unwrap();
        assert_eq!(artifact.custodian, "a b");
        assert_eq!(artifact.shares, set.as_slice()[0..2].to_vec());
        assert_eq!(first.artifact_checksum, artifact.checksum);
    }

    #[test]
    fn test_range_boundary() {
        let dir = TempDir::new().unwrap();
        let set = shares(5);
        let mut registry = CustodianRegistry::new();

        assert!(matches!(
            registry.add_custodian("a", dir.path(), 0, 6, &set, ElementType::Bn254Fr),
            Err(CustodyError::RangeExhausted { .. })
        ));
        assert!(registry
            .add_custodian("a", dir.path(), 0, 5, &set, ElementType::Bn254Fr)
            .is_ok());
    }

    #[test]
    fn test_failed_write_leaves_registry_unchanged() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("not-there");
        let set = shares(5);
        let mut registry = CustodianRegistry::new();

        let result = registry.add_custodian("alice", &missing, 0, 2, &set, ElementType::Bn254Fr);
        assert!(result.is_err());
        assert!(registry.is_empty());
        assert_eq!(registry.assigned_total(), 0);
    }

    #[test]
    fn test_json_roundtrip() {
        let dir = TempDir::new().unwrap();
        let set = shares(4);
        let mut registry = CustodianRegistry::new();
        registry
            .add_custodian("alice", dir.path(), 1, 2, &set, ElementType::Bn254Fq)
            .unwrap();

        let bytes = registry.to_json().unwrap();
        let restored = CustodianRegistry::from_json(&bytes).unwrap();
        assert_eq!(restored, registry);
        assert_eq!(restored.find_by_name("alice").unwrap().range(), 1..3);
    }
}
