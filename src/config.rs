//! Enclave configuration
//!
//! Selects the persistence backend, the size of the transient handle pool and
//! how strictly operation bitmasks are decoded. The CLI maps its flags and
//! environment onto this struct.

use crate::flags::DecodePolicy;
use crate::handle::DEFAULT_MAX_TRANSIENT_HANDLES;
use std::path::PathBuf;

// =============================================================================
// DEFAULTS
// =============================================================================

/// Directory holding persisted objects when no other location is given
pub const DEFAULT_STORAGE_DIR: &str = ".se_enclave";

/// Environment variable overriding the storage directory
pub const STORAGE_DIR_ENV: &str = "SE_ENCLAVE_STORAGE";

// =============================================================================

/// Where persistent objects live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// One file per object under a directory
    File(PathBuf),
    /// Volatile, lost when the enclave is dropped
    Memory,
}

#[derive(Debug, Clone)]
pub struct EnclaveConfig {
    pub storage: StorageBackend,
    /// Upper bound on simultaneously open key and operation handles
    pub max_transient_handles: usize,
    /// Reject ambiguous or undefined flag bits instead of picking by priority
    pub strict_flags: bool,
}

impl Default for EnclaveConfig {
    fn default() -> Self {
        Self::new(StorageBackend::File(PathBuf::from(DEFAULT_STORAGE_DIR)))
    }
}

impl EnclaveConfig {
    pub fn new(storage: StorageBackend) -> Self {
        Self {
            storage,
            max_transient_handles: DEFAULT_MAX_TRANSIENT_HANDLES,
            strict_flags: false,
        }
    }

    /// Volatile configuration, used by tests
    pub fn in_memory() -> Self {
        Self::new(StorageBackend::Memory)
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage = StorageBackend::File(dir.into());
        self
    }

    pub fn with_max_transient_handles(mut self, max: usize) -> Self {
        self.max_transient_handles = max;
        self
    }

    pub fn with_strict_flags(mut self, strict: bool) -> Self {
        self.strict_flags = strict;
        self
    }

    pub fn decode_policy(&self) -> DecodePolicy {
        if self.strict_flags {
            DecodePolicy::Strict
        } else {
            DecodePolicy::Priority
        }
    }
}
