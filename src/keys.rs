//! Key lifecycle: generation, persistence and retrieval by numeric id
//!
//! Keys are generated inside the enclave and never leave it. A generated key
//! is persisted once under `KEY#<id>` and never overwritten; asking to
//! generate over an existing id is an `AccessConflict`.

use crate::error::{Result, TeeError};
use crate::flags::KeyClass;
use crate::handle::{HandleKind, HandlePool, TransientHandle};
use crate::storage::{key_object_id, CreateMode, PersistentStore};
use ring::rand::{SecureRandom, SystemRandom};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// GlobalPlatform object type of an AES key
pub const TEE_TYPE_AES: u32 = 0xA000_0010;
/// GlobalPlatform object type of an RSA key pair
pub const TEE_TYPE_RSA_KEYPAIR: u32 = 0xA100_0030;

pub const AES_KEY_SIZES: [u32; 3] = [128, 192, 256];
pub const RSA_KEY_SIZES: [u32; 4] = [1024, 2048, 3072, 4096];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    Aes,
    RsaKeyPair,
}

impl KeyType {
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            TEE_TYPE_AES => Ok(KeyType::Aes),
            TEE_TYPE_RSA_KEYPAIR => Ok(KeyType::RsaKeyPair),
            other => Err(TeeError::NotSupported(format!("key type {:#x}", other))),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            KeyType::Aes => TEE_TYPE_AES,
            KeyType::RsaKeyPair => TEE_TYPE_RSA_KEYPAIR,
        }
    }

    pub fn key_class(self) -> KeyClass {
        match self {
            KeyType::Aes => KeyClass::Symmetric,
            KeyType::RsaKeyPair => KeyClass::Asymmetric,
        }
    }

    fn check_size(self, bits: u32) -> Result<()> {
        let supported: &[u32] = match self {
            KeyType::Aes => &AES_KEY_SIZES,
            KeyType::RsaKeyPair => &RSA_KEY_SIZES,
        };
        if supported.contains(&bits) {
            Ok(())
        } else {
            Err(TeeError::NotSupported(format!(
                "{:?} key size {} bits",
                self, bits
            )))
        }
    }
}

/// Persisted form of a key
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyRecord {
    #[zeroize(skip)]
    pub id: u32,
    #[zeroize(skip)]
    pub key_type: KeyType,
    /// Key size in bits
    #[zeroize(skip)]
    pub key_size: u32,
    /// Raw AES key bytes, or PKCS#8 DER for RSA
    #[serde(with = "serde_bytes")]
    pub material: Vec<u8>,
}

/// Decoded key material
pub enum KeyMaterial {
    Aes(Zeroizing<Vec<u8>>),
    Rsa(Box<RsaPrivateKey>),
}

/// A persisted key opened for one operation
///
/// Holds one slot of the transient handle pool; dropping the handle
/// releases the slot and wipes the material.
pub struct KeyHandle {
    id: u32,
    key_type: KeyType,
    key_size: u32,
    material: KeyMaterial,
    _slot: TransientHandle,
}

impl KeyHandle {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Key size in bits
    pub fn key_size(&self) -> u32 {
        self.key_size
    }

    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }
}

impl std::fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyHandle")
            .field("id", &self.id)
            .field("key_type", &self.key_type)
            .field("key_size", &self.key_size)
            .finish_non_exhaustive()
    }
}

/// Generates, persists and opens keys
#[derive(Debug, Clone)]
pub struct KeyManager {
    store: Arc<dyn PersistentStore>,
    pool: HandlePool,
}

impl KeyManager {
    pub fn new(store: Arc<dyn PersistentStore>, pool: HandlePool) -> Self {
        Self { store, pool }
    }

    /// Generates a key of `key_type` (GlobalPlatform object type) and
    /// `key_size` bits and persists it under `key_id`
    pub fn generate_key(&self, key_type: u32, key_size: u32, key_id: u32) -> Result<()> {
        let key_type = KeyType::from_raw(key_type)?;
        key_type.check_size(key_size)?;

        let object_id = key_object_id(key_id);
        if self.store.exists(&object_id)? {
            warn!(key_id, "Refusing to overwrite existing key");
            return Err(TeeError::AccessConflict(format!("key {} already exists", key_id)));
        }

        info!(key_id, ?key_type, key_size, "Generating key");
        let _generation = self.pool.acquire(HandleKind::Generation)?;

        let record = KeyRecord {
            id: key_id,
            key_type,
            key_size,
            material: generate_material(key_type, key_size)?,
        };
        let serialized = Zeroizing::new(serde_json::to_vec(&record)?);
        self.store
            .write(&object_id, &serialized, CreateMode::Exclusive)?;

        info!(key_id, "Key generated and persisted");
        Ok(())
    }

    /// Opens the key persisted under `key_id`
    pub fn get_key(&self, key_id: u32) -> Result<KeyHandle> {
        let slot = self.pool.acquire(HandleKind::Key)?;

        let bytes = match self.store.read(&key_object_id(key_id)) {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(TeeError::ItemNotFound(_)) => {
                return Err(TeeError::ItemNotFound(format!("key {}", key_id)))
            }
            Err(e) => return Err(e),
        };
        let record: KeyRecord = serde_json::from_slice(&bytes)?;
        if record.id != key_id {
            return Err(TeeError::Crypto(format!(
                "key record {} stored under id {}",
                record.id, key_id
            )));
        }

        let material = match record.key_type {
            KeyType::Aes => {
                if record.material.len() * 8 != record.key_size as usize {
                    return Err(TeeError::Crypto(format!("key {} has corrupt material", key_id)));
                }
                KeyMaterial::Aes(Zeroizing::new(record.material.clone()))
            }
            KeyType::RsaKeyPair => {
                let key = RsaPrivateKey::from_pkcs8_der(&record.material)
                    .map_err(|e| TeeError::Crypto(format!("Failed to parse key {}: {}", key_id, e)))?;
                KeyMaterial::Rsa(Box::new(key))
            }
        };

        debug!(key_id, key_type = ?record.key_type, "Key opened");
        Ok(KeyHandle {
            id: key_id,
            key_type: record.key_type,
            key_size: record.key_size,
            material,
            _slot: slot,
        })
    }

    /// Removes a key; management path only, not reachable from the command table
    pub fn delete_key(&self, key_id: u32) -> Result<bool> {
        let removed = self.store.delete(&key_object_id(key_id))?;
        info!(key_id, removed, "Key deleted");
        Ok(removed)
    }
}

fn generate_material(key_type: KeyType, key_size: u32) -> Result<Vec<u8>> {
    match key_type {
        KeyType::Aes => {
            let mut key = vec![0u8; key_size as usize / 8];
            SystemRandom::new()
                .fill(&mut key)
                .map_err(|e| TeeError::Crypto(format!("Failed to generate key: {}", e)))?;
            Ok(key)
        }
        KeyType::RsaKeyPair => {
            let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, key_size as usize)
                .map_err(|e| TeeError::Crypto(format!("Failed to generate key: {}", e)))?;
            debug!(modulus_bytes = key.size(), "RSA key pair generated");
            let der = key
                .to_pkcs8_der()
                .map_err(|e| TeeError::Crypto(format!("Failed to encode key: {}", e)))?;
            Ok(der.as_bytes().to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn manager() -> (KeyManager, Arc<MemoryStore>, HandlePool) {
        let store = Arc::new(MemoryStore::new());
        let pool = HandlePool::default();
        (KeyManager::new(store.clone(), pool.clone()), store, pool)
    }

    #[test]
    fn test_generate_and_get_aes() {
        let (keys, _, pool) = manager();
        for (id, size) in AES_KEY_SIZES.iter().enumerate() {
            keys.generate_key(TEE_TYPE_AES, *size, id as u32).unwrap();
            let handle = keys.get_key(id as u32).unwrap();
            assert_eq!(handle.key_type(), KeyType::Aes);
            assert_eq!(handle.key_size(), *size);
            match handle.material() {
                KeyMaterial::Aes(k) => assert_eq!(k.len() * 8, *size as usize),
                KeyMaterial::Rsa(_) => panic!("expected AES material"),
            }
        }
        assert_eq!(pool.in_use(), 0);
    }

    fn check_rsa_round_trip(bits: u32) {
        let (keys, _, pool) = manager();
        keys.generate_key(TEE_TYPE_RSA_KEYPAIR, bits, bits).unwrap();
        let handle = keys.get_key(bits).unwrap();
        assert_eq!(handle.key_type(), KeyType::RsaKeyPair);
        assert_eq!(handle.key_size(), bits);
        match handle.material() {
            KeyMaterial::Rsa(k) => assert_eq!(k.size() * 8, bits as usize),
            KeyMaterial::Aes(_) => panic!("expected RSA material"),
        }
        drop(handle);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_generate_and_get_rsa() {
        check_rsa_round_trip(1024);
        check_rsa_round_trip(2048);
    }

    #[test]
    #[ignore = "slow key generation in debug builds"]
    fn test_generate_and_get_rsa_large() {
        for bits in RSA_KEY_SIZES.iter().filter(|bits| **bits > 2048) {
            check_rsa_round_trip(*bits);
        }
    }

    #[test]
    fn test_duplicate_id_is_access_conflict() {
        let (keys, store, _) = manager();
        keys.generate_key(TEE_TYPE_AES, 128, 1).unwrap();
        let before = store.read(&key_object_id(1)).unwrap();
        let err = keys.generate_key(TEE_TYPE_AES, 256, 1).unwrap_err();
        assert!(matches!(err, TeeError::AccessConflict(_)));
        assert_eq!(store.read(&key_object_id(1)).unwrap(), before);
    }

    #[test]
    fn test_unsupported_type_and_size_leave_nothing_behind() {
        let (keys, store, pool) = manager();
        assert!(matches!(
            keys.generate_key(0x1234, 128, 2),
            Err(TeeError::NotSupported(_))
        ));
        assert!(matches!(
            keys.generate_key(TEE_TYPE_AES, 100, 2),
            Err(TeeError::NotSupported(_))
        ));
        assert!(matches!(
            keys.generate_key(TEE_TYPE_RSA_KEYPAIR, 128, 2),
            Err(TeeError::NotSupported(_))
        ));
        assert!(!store.exists(&key_object_id(2)).unwrap());
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_get_missing_key() {
        let (keys, _, pool) = manager();
        assert!(matches!(keys.get_key(42), Err(TeeError::ItemNotFound(_))));
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_generation_needs_a_free_handle() {
        let store = Arc::new(MemoryStore::new());
        let pool = HandlePool::new(1);
        let keys = KeyManager::new(store.clone(), pool.clone());
        keys.generate_key(TEE_TYPE_AES, 128, 1).unwrap();
        let _held = keys.get_key(1).unwrap();
        assert!(matches!(
            keys.generate_key(TEE_TYPE_AES, 128, 2),
            Err(TeeError::OutOfMemory(_))
        ));
        assert!(!store.exists(&key_object_id(2)).unwrap());
    }

    #[test]
    fn test_delete_key() {
        let (keys, _, _) = manager();
        keys.generate_key(TEE_TYPE_AES, 128, 3).unwrap();
        assert!(keys.delete_key(3).unwrap());
        assert!(!keys.delete_key(3).unwrap());
        keys.generate_key(TEE_TYPE_AES, 128, 3).unwrap();
    }
}
