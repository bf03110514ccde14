//! Descriptor persistence.
//!
//! Sessions outlive the process through their descriptors: announce tiers
//! plus metadata bytes, saved once a session closes or obtains metadata
//! and merged back in when the same infohash is created again. A missing
//! descriptor is the common case and is not an error.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::TorrentDescriptor;
use crate::infohash::InfoHash;

mod fs;

pub use fs::FsStore;

/// Errors from descriptor load/save.
///
/// Callers on the session-creation path log these and carry on; a failed
/// load is treated the same as an absent descriptor.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("failed to encode descriptor: {reason}")]
    Encode { reason: String },
}

/// Durable storage for session descriptors, keyed by infohash.
pub trait DescriptorStore: Send + Sync + 'static {
    /// Load the persisted descriptor, `Ok(None)` when absent.
    fn load(&self, hash: InfoHash) -> Result<Option<TorrentDescriptor>, StoreError>;

    /// Persist the descriptor, replacing any previous one.
    fn save(&self, hash: InfoHash, descriptor: &TorrentDescriptor) -> Result<(), StoreError>;
}
