//! Persistence substrate shared by the key manager and the object store
//!
//! Objects are opaque byte blobs addressed by a byte-string id. Two
//! namespaces share one substrate:
//! - `KEY#<decimal id>`: persisted key records
//! - `OBJ#<caller id>`: secure objects written by the storage application

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::{Result, TeeError};
use std::fmt;

/// Maximum length of a caller-supplied object id (`TEE_OBJECT_ID_MAX_LEN`)
pub const OBJECT_ID_MAX_LEN: usize = 64;

const KEY_PREFIX: &[u8] = b"KEY#";
const OBJECT_PREFIX: &[u8] = b"OBJ#";

/// What to do when writing to an id that already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Atomically replace any existing content
    Overwrite,
    /// Fail with `AccessConflict` if the id is taken
    Exclusive,
}

/// Durable object storage
pub trait PersistentStore: Send + Sync + fmt::Debug {
    fn exists(&self, id: &[u8]) -> Result<bool>;

    /// Reads an object, `ItemNotFound` if absent
    fn read(&self, id: &[u8]) -> Result<Vec<u8>>;

    /// Writes an object atomically; readers never observe a partial write
    fn write(&self, id: &[u8], data: &[u8], mode: CreateMode) -> Result<()>;

    /// Removes an object, returning whether it existed
    fn delete(&self, id: &[u8]) -> Result<bool>;
}

/// Substrate id of a persisted key
pub fn key_object_id(key_id: u32) -> Vec<u8> {
    let mut id = KEY_PREFIX.to_vec();
    id.extend_from_slice(key_id.to_string().as_bytes());
    id
}

/// Substrate id of a caller-named secure object
pub fn data_object_id(object_id: &[u8]) -> Result<Vec<u8>> {
    if object_id.is_empty() || object_id.len() > OBJECT_ID_MAX_LEN {
        return Err(TeeError::bad_params(format!(
            "object id length {} outside 1..={}",
            object_id.len(),
            OBJECT_ID_MAX_LEN
        )));
    }
    let mut id = OBJECT_PREFIX.to_vec();
    id.extend_from_slice(object_id);
    Ok(id)
}

fn not_found(id: &[u8]) -> TeeError {
    TeeError::ItemNotFound(String::from_utf8_lossy(id).into_owned())
}

fn conflict(id: &[u8]) -> TeeError {
    TeeError::AccessConflict(format!(
        "object {} already exists",
        String::from_utf8_lossy(id)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaces_do_not_collide() {
        assert_eq!(key_object_id(7), b"KEY#7".to_vec());
        assert_eq!(data_object_id(b"7").unwrap(), b"OBJ#7".to_vec());
    }

    #[test]
    fn test_object_id_length() {
        assert!(data_object_id(b"").is_err());
        assert!(data_object_id(&[b'a'; OBJECT_ID_MAX_LEN]).is_ok());
        assert!(data_object_id(&[b'a'; OBJECT_ID_MAX_LEN + 1]).is_err());
    }
}
