//! Secure object store: named opaque blobs
//!
//! Reads follow the short-buffer convention: a caller that does not know an
//! object's size passes any buffer, receives `ShortBuffer` with the exact
//! size, and retries with a buffer that fits.

use crate::error::Result;
use crate::params::Memref;
use crate::storage::{data_object_id, CreateMode, PersistentStore};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a delete; removing an absent object is not an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

#[derive(Debug, Clone)]
pub struct ObjectStore {
    store: Arc<dyn PersistentStore>,
}

impl ObjectStore {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }

    /// Creates or atomically replaces the object `id`
    pub fn write_object(&self, id: &[u8], data: &[u8]) -> Result<()> {
        let object_id = data_object_id(id)?;
        self.store.write(&object_id, data, CreateMode::Overwrite)?;
        info!(id = %String::from_utf8_lossy(id), data_len = data.len(), "Object written");
        Ok(())
    }

    /// Copies object `id` into `out`, or reports its size if `out` is too small
    pub fn read_object(&self, id: &[u8], out: &mut Memref<'_>) -> Result<()> {
        let object_id = data_object_id(id)?;
        let data = self.store.read(&object_id)?;
        if data.len() > out.capacity() {
            debug!(
                required = data.len(),
                capacity = out.capacity(),
                "Object does not fit caller buffer"
            );
            return Err(out.short(data.len()));
        }
        out.write(&data)?;
        debug!(id = %String::from_utf8_lossy(id), data_len = data.len(), "Object read");
        Ok(())
    }

    pub fn delete_object(&self, id: &[u8]) -> Result<DeleteOutcome> {
        let object_id = data_object_id(id)?;
        let outcome = if self.store.delete(&object_id)? {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::NotFound
        };
        info!(id = %String::from_utf8_lossy(id), ?outcome, "Object delete");
        Ok(outcome)
    }
}
