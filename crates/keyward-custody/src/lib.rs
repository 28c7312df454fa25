//! Keyward Custody - Custodian handling and the backup session
//!
//! This crate provides:
//! - Share artifact encoding for hand-off to custodians
//! - The custodian registry and its share range bookkeeping
//! - The backup session state machine tying splitting, sealing, and restoring together
//! - Persistent backup settings

pub mod error;
pub mod registry;
pub mod session;
pub mod settings;
pub mod transport;

pub use error::{CustodyError, Result};
pub use registry::{Custodian, CustodianRegistry};
pub use session::{BackupSession, ScanOutcome, SessionState};
pub use settings::BackupSettings;
pub use transport::{ChunkAssembler, ShareArtifact};
