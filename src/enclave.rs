//! Enclave host
//!
//! Owns the persistence substrate and the transient handle pool, and hosts
//! the trusted applications. Clients reach an application by opening a
//! [`Session`] on its UUID and invoking commands through it.

use crate::config::{EnclaveConfig, StorageBackend};
use crate::error::{Result, TeeError};
use crate::handle::HandlePool;
use crate::params::Operation;
use crate::storage::{FileStore, MemoryStore, PersistentStore};
use crate::ta::{CryptoService, StorageService, TrustedApplication};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct Enclave {
    applications: Vec<Box<dyn TrustedApplication>>,
    store: Arc<dyn PersistentStore>,
    pool: HandlePool,
    sessions_opened: u32,
}

impl Enclave {
    /// Creates an enclave with the backend named by `config`
    pub fn new(config: &EnclaveConfig) -> Result<Self> {
        let store: Arc<dyn PersistentStore> = match &config.storage {
            StorageBackend::File(dir) => Arc::new(FileStore::open(dir)?),
            StorageBackend::Memory => {
                warn!("Using volatile storage, objects will not outlive the enclave");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(Self::with_store(store, config))
    }

    /// Creates an enclave over an existing substrate
    pub fn with_store(store: Arc<dyn PersistentStore>, config: &EnclaveConfig) -> Self {
        let pool = HandlePool::new(config.max_transient_handles);
        let applications: Vec<Box<dyn TrustedApplication>> = vec![
            Box::new(CryptoService::new(
                Arc::clone(&store),
                pool.clone(),
                config.decode_policy(),
            )),
            Box::new(StorageService::new(Arc::clone(&store))),
        ];

        info!(
            applications = applications.len(),
            max_transient_handles = pool.capacity(),
            strict_flags = config.strict_flags,
            "Enclave initialized"
        );

        Self {
            applications,
            store,
            pool,
            sessions_opened: 0,
        }
    }

    pub fn handle_pool(&self) -> &HandlePool {
        &self.pool
    }

    pub fn store(&self) -> &Arc<dyn PersistentStore> {
        &self.store
    }

    /// UUIDs of the hosted applications
    pub fn applications(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.applications.iter().map(|app| app.uuid())
    }

    /// Opens a session without parameters
    pub fn open_session(&mut self, uuid: &Uuid) -> Result<Session<'_>> {
        self.open_session_with(uuid, &mut Operation::empty())
    }

    /// Opens a session, handing `operation` to the application's open entry point
    pub fn open_session_with(
        &mut self,
        uuid: &Uuid,
        operation: &mut Operation<'_>,
    ) -> Result<Session<'_>> {
        let app = self
            .applications
            .iter()
            .find(|app| app.uuid() == *uuid)
            .ok_or_else(|| TeeError::ItemNotFound(format!("trusted application {}", uuid)))?;

        app.open_session(operation.param_types, &operation.params)?;

        self.sessions_opened += 1;
        let id = self.sessions_opened;
        info!(session_id = id, application = app.name(), %uuid, "Session opened");

        Ok(Session {
            id,
            app: app.as_ref(),
        })
    }
}

/// An open session with one trusted application
///
/// A session holds the enclave mutably borrowed, so only one invocation can
/// be in flight at a time. Dropping it closes the session.
pub struct Session<'e> {
    id: u32,
    app: &'e dyn TrustedApplication,
}

impl Session<'_> {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn application(&self) -> Uuid {
        self.app.uuid()
    }

    /// Invokes `command_id`; memory reference sizes in `operation` are
    /// updated in place, including on `ShortBuffer`
    pub fn invoke(&mut self, command_id: u32, operation: &mut Operation<'_>) -> Result<()> {
        debug!(session_id = self.id, command_id, "Invoking command");
        self.app
            .invoke_command(command_id, operation.param_types, &mut operation.params)
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.app.close_session();
        info!(session_id = self.id, application = self.app.name(), "Session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{AES, CBC_NOPAD, DECRYPT, ENCRYPT};
    use crate::keys::TEE_TYPE_AES;
    use crate::params::{Param, ParamType, ParamTypes};
    use crate::ta::crypto::{
        CMD_ENCRYPT_DECRYPT, CMD_GENERATE_KEY, ENCRYPT_DECRYPT_PARAMS, GENERATE_KEY_PARAMS,
    };
    use crate::ta::storage::{CMD_READ_RAW, CMD_WRITE_RAW, READ_RAW_PARAMS, WRITE_RAW_PARAMS};
    use crate::ta::{CRYPTO_UUID, STORAGE_UUID};
    use tempfile::TempDir;

    #[test]
    fn test_hosts_both_applications() {
        let enclave = Enclave::new(&EnclaveConfig::in_memory()).unwrap();
        let uuids: Vec<Uuid> = enclave.applications().collect();
        assert_eq!(uuids, vec![CRYPTO_UUID, STORAGE_UUID]);
        assert_eq!(
            CRYPTO_UUID.to_string(),
            "484d4141-2d53-4841-3120-4a6f636b6542"
        );
        assert_eq!(
            STORAGE_UUID.to_string(),
            "f4e750bb-1437-4fbf-8785-8d3580c34994"
        );
    }

    #[test]
    fn test_unknown_application() {
        let mut enclave = Enclave::new(&EnclaveConfig::in_memory()).unwrap();
        let err = enclave.open_session(&Uuid::nil()).err().unwrap();
        assert!(matches!(err, TeeError::ItemNotFound(_)));
    }

    #[test]
    fn test_open_session_rejects_parameters() {
        let mut enclave = Enclave::new(&EnclaveConfig::in_memory()).unwrap();
        let mut operation = Operation::new(
            ParamTypes::new(
                ParamType::ValueInput,
                ParamType::None,
                ParamType::None,
                ParamType::None,
            ),
            [Param::value(1, 2), Param::None, Param::None, Param::None],
        );
        let err = enclave
            .open_session_with(&CRYPTO_UUID, &mut operation)
            .err()
            .unwrap();
        assert!(matches!(err, TeeError::BadParameters(_)));
    }

    #[test]
    fn test_sessions_are_sequential() {
        let mut enclave = Enclave::new(&EnclaveConfig::in_memory()).unwrap();
        let first = enclave.open_session(&CRYPTO_UUID).unwrap().id();
        let second = enclave.open_session(&STORAGE_UUID).unwrap().id();
        assert_eq!(second, first + 1);
    }

    #[test]
    fn test_crypto_session_round_trip() {
        let mut enclave = Enclave::new(&EnclaveConfig::in_memory()).unwrap();
        let pool = enclave.handle_pool().clone();
        let mut session = enclave.open_session(&CRYPTO_UUID).unwrap();

        let mut keygen = Operation::new(
            GENERATE_KEY_PARAMS,
            [
                Param::value(TEE_TYPE_AES, 128),
                Param::value(1, 0),
                Param::None,
                Param::None,
            ],
        );
        session.invoke(CMD_GENERATE_KEY, &mut keygen).unwrap();

        let plaintext = *b"sixteen byte msg";
        let mut input = plaintext;
        let mut ciphertext = [0u8; 16];
        let mut encrypt = Operation::new(
            ENCRYPT_DECRYPT_PARAMS,
            [
                Param::value(1, AES | ENCRYPT | CBC_NOPAD),
                Param::memref(&mut input),
                Param::memref(&mut ciphertext),
                Param::None,
            ],
        );
        session.invoke(CMD_ENCRYPT_DECRYPT, &mut encrypt).unwrap();
        drop(encrypt);

        let mut recovered = [0u8; 16];
        let mut decrypt = Operation::new(
            ENCRYPT_DECRYPT_PARAMS,
            [
                Param::value(1, AES | DECRYPT | CBC_NOPAD),
                Param::memref(&mut ciphertext),
                Param::memref(&mut recovered),
                Param::None,
            ],
        );
        session.invoke(CMD_ENCRYPT_DECRYPT, &mut decrypt).unwrap();
        drop(decrypt);

        assert_eq!(recovered, plaintext);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_file_backend_persists_across_enclaves() {
        let dir = TempDir::new().unwrap();
        let config = EnclaveConfig::in_memory().with_storage_dir(dir.path());

        {
            let mut enclave = Enclave::new(&config).unwrap();
            let mut session = enclave.open_session(&STORAGE_UUID).unwrap();
            let mut id = b"persisted".to_vec();
            let mut data = b"still here".to_vec();
            let mut write = Operation::new(
                WRITE_RAW_PARAMS,
                [
                    Param::memref(&mut id),
                    Param::memref(&mut data),
                    Param::None,
                    Param::None,
                ],
            );
            session.invoke(CMD_WRITE_RAW, &mut write).unwrap();
        }

        let mut enclave = Enclave::new(&config).unwrap();
        let mut session = enclave.open_session(&STORAGE_UUID).unwrap();
        let mut id = b"persisted".to_vec();
        let mut out = [0u8; 32];
        let mut read = Operation::new(
            READ_RAW_PARAMS,
            [
                Param::memref(&mut id),
                Param::memref(&mut out),
                Param::None,
                Param::None,
            ],
        );
        session.invoke(CMD_READ_RAW, &mut read).unwrap();
        assert_eq!(read.params[1].memref_size(), Some(10));
        drop(read);
        assert_eq!(&out[..10], b"still here");
    }

    #[test]
    fn test_keys_persist_across_enclaves() {
        let dir = TempDir::new().unwrap();
        let config = EnclaveConfig::in_memory().with_storage_dir(dir.path());
        let plaintext = *b"persistent key!!";
        let iv = [3u8; 16];

        let mut ciphertext = iv;
        {
            let mut enclave = Enclave::new(&config).unwrap();
            let mut session = enclave.open_session(&CRYPTO_UUID).unwrap();
            let mut keygen = Operation::new(
                GENERATE_KEY_PARAMS,
                [
                    Param::value(TEE_TYPE_AES, 256),
                    Param::value(2, 0),
                    Param::None,
                    Param::None,
                ],
            );
            session.invoke(CMD_GENERATE_KEY, &mut keygen).unwrap();

            let mut input = plaintext;
            let mut encrypt = Operation::new(
                ENCRYPT_DECRYPT_PARAMS,
                [
                    Param::value(2, AES | ENCRYPT | CBC_NOPAD),
                    Param::memref(&mut input),
                    Param::memref(&mut ciphertext),
                    Param::None,
                ],
            );
            session.invoke(CMD_ENCRYPT_DECRYPT, &mut encrypt).unwrap();
        }

        let mut enclave = Enclave::new(&config).unwrap();
        let pool = enclave.handle_pool().clone();
        let mut session = enclave.open_session(&CRYPTO_UUID).unwrap();

        let mut recovered = iv;
        let mut decrypt = Operation::new(
            ENCRYPT_DECRYPT_PARAMS,
            [
                Param::value(2, AES | DECRYPT | CBC_NOPAD),
                Param::memref(&mut ciphertext),
                Param::memref(&mut recovered),
                Param::None,
            ],
        );
        session.invoke(CMD_ENCRYPT_DECRYPT, &mut decrypt).unwrap();
        drop(decrypt);
        assert_eq!(recovered, plaintext);

        let mut duplicate = Operation::new(
            GENERATE_KEY_PARAMS,
            [
                Param::value(TEE_TYPE_AES, 128),
                Param::value(2, 0),
                Param::None,
                Param::None,
            ],
        );
        let err = session.invoke(CMD_GENERATE_KEY, &mut duplicate).unwrap_err();
        assert!(matches!(err, TeeError::AccessConflict(_)));
        assert_eq!(pool.in_use(), 0);
    }
}
