//! Directory-backed substrate
//!
//! Each object is one file named after the hex encoding of its id. The file
//! holds a JSON envelope:
//! - `id` (hex): object id, checked on read
//! - `data` (bytes): object content
//! - `created_at` / `updated_at`: RFC 3339 timestamps
//!
//! Writes go to a temporary file in the same directory which is then renamed
//! over the target, so a reader sees either the old or the new content.

use super::{conflict, not_found, CreateMode, PersistentStore};
use crate::error::{Result, TeeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Envelope written to disk for every object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Hex-encoded object id
    pub id: String,
    /// Object content
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn new(id: &[u8], data: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id: hex::encode(id),
            data,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the content, keeping the creation time
    pub fn replace(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self.updated_at = Utc::now();
        self
    }
}

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        info!(root = %root.display(), "File store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &[u8]) -> PathBuf {
        self.root.join(hex::encode(id))
    }

    fn load(&self, id: &[u8]) -> Result<Option<StoredRecord>> {
        let bytes = match fs::read(self.path_for(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: StoredRecord = serde_json::from_slice(&bytes)?;
        if record.id != hex::encode(id) {
            return Err(TeeError::Storage(std::io::Error::new(
                ErrorKind::InvalidData,
                format!("record id mismatch in {}", record.id),
            )));
        }
        Ok(Some(record))
    }
}

impl PersistentStore for FileStore {
    fn exists(&self, id: &[u8]) -> Result<bool> {
        Ok(self.path_for(id).is_file())
    }

    fn read(&self, id: &[u8]) -> Result<Vec<u8>> {
        let record = self.load(id)?.ok_or_else(|| not_found(id))?;
        debug!(data_len = record.data.len(), "object read from file store");
        Ok(record.data)
    }

    fn write(&self, id: &[u8], data: &[u8], mode: CreateMode) -> Result<()> {
        let record = match mode {
            CreateMode::Exclusive => StoredRecord::new(id, data.to_vec()),
            CreateMode::Overwrite => match self.load(id)? {
                Some(existing) => existing.replace(data.to_vec()),
                None => StoredRecord::new(id, data.to_vec()),
            },
        };

        let mut tmp = NamedTempFile::new_in(&self.root)?;
        serde_json::to_writer(&mut tmp, &record)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;

        let target = self.path_for(id);
        match mode {
            CreateMode::Overwrite => {
                tmp.persist(&target).map_err(|e| TeeError::Storage(e.error))?;
            }
            CreateMode::Exclusive => {
                tmp.persist_noclobber(&target).map_err(|e| {
                    if e.error.kind() == ErrorKind::AlreadyExists {
                        conflict(id)
                    } else {
                        TeeError::Storage(e.error)
                    }
                })?;
            }
        }

        debug!(data_len = data.len(), ?mode, "object written to file store");
        Ok(())
    }

    fn delete(&self, id: &[u8]) -> Result<bool> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
