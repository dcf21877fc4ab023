//! Error types for the secure-element enclave
//!
//! Every variant maps onto a GlobalPlatform TEE result code so that the
//! normal-world caller sees the same numeric codes a real trusted
//! application would return.

use thiserror::Error;

/// GlobalPlatform result code for success
pub const TEE_SUCCESS: u32 = 0x0000_0000;
pub const TEE_ERROR_GENERIC: u32 = 0xFFFF_0000;
pub const TEE_ERROR_ACCESS_CONFLICT: u32 = 0xFFFF_0003;
pub const TEE_ERROR_BAD_PARAMETERS: u32 = 0xFFFF_0006;
pub const TEE_ERROR_ITEM_NOT_FOUND: u32 = 0xFFFF_0008;
pub const TEE_ERROR_NOT_SUPPORTED: u32 = 0xFFFF_000A;
pub const TEE_ERROR_OUT_OF_MEMORY: u32 = 0xFFFF_000C;
pub const TEE_ERROR_SHORT_BUFFER: u32 = 0xFFFF_0010;
pub const TEE_ERROR_SIGNATURE_INVALID: u32 = 0xFFFF_3072;

/// Errors that can occur in the enclave
#[derive(Error, Debug)]
pub enum TeeError {
    #[error("bad parameters: {0}")]
    BadParameters(String),

    #[error("item not found: {0}")]
    ItemNotFound(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("out of transient handles: {0}")]
    OutOfMemory(String),

    /// Recoverable: the caller must retry with at least `required` bytes
    #[error("short buffer: {required} bytes required")]
    ShortBuffer { required: usize },

    #[error("access conflict: {0}")]
    AccessConflict(String),

    #[error("signature invalid")]
    SignatureInvalid,

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TeeError {
    pub(crate) fn bad_params(msg: impl Into<String>) -> Self {
        TeeError::BadParameters(msg.into())
    }

    /// Returns the GlobalPlatform result code for this error
    pub fn code(&self) -> u32 {
        match self {
            TeeError::BadParameters(_) => TEE_ERROR_BAD_PARAMETERS,
            TeeError::ItemNotFound(_) => TEE_ERROR_ITEM_NOT_FOUND,
            TeeError::NotSupported(_) => TEE_ERROR_NOT_SUPPORTED,
            TeeError::OutOfMemory(_) => TEE_ERROR_OUT_OF_MEMORY,
            TeeError::ShortBuffer { .. } => TEE_ERROR_SHORT_BUFFER,
            TeeError::AccessConflict(_) => TEE_ERROR_ACCESS_CONFLICT,
            TeeError::SignatureInvalid => TEE_ERROR_SIGNATURE_INVALID,
            TeeError::Crypto(_) | TeeError::Storage(_) | TeeError::Serialization(_) => {
                TEE_ERROR_GENERIC
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, TeeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_codes() {
        assert_eq!(TeeError::bad_params("x").code(), TEE_ERROR_BAD_PARAMETERS);
        assert_eq!(
            TeeError::ShortBuffer { required: 4 }.code(),
            TEE_ERROR_SHORT_BUFFER
        );
        assert_eq!(TeeError::SignatureInvalid.code(), TEE_ERROR_SIGNATURE_INVALID);
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(TeeError::from(io).code(), TEE_ERROR_GENERIC);
    }

    #[test]
    fn test_short_buffer_message() {
        let err = TeeError::ShortBuffer { required: 7000 };
        assert_eq!(err.to_string(), "short buffer: 7000 bytes required");
    }
}
