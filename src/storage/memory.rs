//! Volatile in-memory substrate

use super::{conflict, not_found, CreateMode, PersistentStore};
use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, HashMap<Vec<u8>, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PersistentStore for MemoryStore {
    fn exists(&self, id: &[u8]) -> Result<bool> {
        Ok(self.objects().contains_key(id))
    }

    fn read(&self, id: &[u8]) -> Result<Vec<u8>> {
        self.objects().get(id).cloned().ok_or_else(|| not_found(id))
    }

    fn write(&self, id: &[u8], data: &[u8], mode: CreateMode) -> Result<()> {
        let mut objects = self.objects();
        if mode == CreateMode::Exclusive && objects.contains_key(id) {
            return Err(conflict(id));
        }
        objects.insert(id.to_vec(), data.to_vec());
        debug!(data_len = data.len(), ?mode, "object written to memory store");
        Ok(())
    }

    fn delete(&self, id: &[u8]) -> Result<bool> {
        Ok(self.objects().remove(id).is_some())
    }
}
