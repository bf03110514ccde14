//! Filesystem descriptor store.
//!
//! One bincode file per infohash, `<hex>.session`, under a single
//! directory. Saves go through a temp file and an atomic rename so a
//! crash mid-write never leaves a truncated descriptor behind.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::PathBuf;

use crate::engine::TorrentDescriptor;
use crate::infohash::InfoHash;

use super::{DescriptorStore, StoreError};

/// Store writing descriptors to a directory on disk.
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    /// Create a store rooted at `dir`. The directory is created lazily on
    /// the first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn descriptor_path(&self, hash: InfoHash) -> PathBuf {
        self.dir.join(format!("{}.session", hash.hex()))
    }
}

impl DescriptorStore for FsStore {
    fn load(&self, hash: InfoHash) -> Result<Option<TorrentDescriptor>, StoreError> {
        let path = self.descriptor_path(hash);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(StoreError::Read {
                    path,
                    source: err,
                })
            }
        };
        let reader = BufReader::new(file);
        bincode::deserialize_from(reader)
            .map(Some)
            .map_err(|err| StoreError::Decode {
                path,
                reason: err.to_string(),
            })
    }

    fn save(&self, hash: InfoHash, descriptor: &TorrentDescriptor) -> Result<(), StoreError> {
        let path = self.descriptor_path(hash);
        std::fs::create_dir_all(&self.dir).map_err(|err| StoreError::Write {
            path: self.dir.clone(),
            source: err,
        })?;

        // Write to a temp file first, then rename for atomicity.
        let temp_path = path.with_extension("tmp");
        let file = File::create(&temp_path).map_err(|err| StoreError::Write {
            path: temp_path.clone(),
            source: err,
        })?;
        let writer = BufWriter::new(file);
        bincode::serialize_into(writer, descriptor).map_err(|err| StoreError::Encode {
            reason: err.to_string(),
        })?;

        std::fs::rename(&temp_path, &path).map_err(|err| StoreError::Write {
            path,
            source: err,
        })
    }
}
