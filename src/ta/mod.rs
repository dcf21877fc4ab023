//! Trusted applications hosted by the enclave
//!
//! Each application has a UUID and a fixed command table. Invocations carry
//! a command id and four typed parameter slots; the application checks the
//! slot signature for the command before doing anything else.
//!
//! ## Applications
//!
//! ### Crypto (`CRYPTO_UUID`)
//! - `0` GenerateKey: `[value{key_type, key_size}, value{key_id}, -, -]`
//! - `1` EncryptDecrypt: `[value{key_id, flags}, inout{input}, inout{output}, -]`
//!
//! ### Secure storage (`STORAGE_UUID`)
//! - `0` ReadRaw: `[in{id}, out{data}, -, -]`
//! - `1` WriteRaw: `[in{id}, in{data}, -, -]`
//! - `2` Delete: `[in{id}, -, -, -]`

pub mod crypto;
pub mod storage;

pub use crypto::CryptoService;
pub use storage::StorageService;

use crate::error::Result;
use crate::params::{check_param_types, Param, ParamTypes, NUM_PARAMS, PARAM_TYPES_NONE};
use uuid::Uuid;

/// Crypto application UUID
pub const CRYPTO_UUID: Uuid = Uuid::from_fields(
    0x484d_4141,
    0x2d53,
    0x4841,
    &[0x31, 0x20, 0x4a, 0x6f, 0x63, 0x6b, 0x65, 0x42],
);

/// Secure storage application UUID
pub const STORAGE_UUID: Uuid = Uuid::from_fields(
    0xf4e7_50bb,
    0x1437,
    0x4fbf,
    &[0x87, 0x85, 0x8d, 0x35, 0x80, 0xc3, 0x49, 0x94],
);

/// Entry points every trusted application implements
pub trait TrustedApplication: Send + Sync {
    fn uuid(&self) -> Uuid;

    fn name(&self) -> &'static str;

    /// Sessions are opened without parameters
    fn open_session(&self, param_types: ParamTypes, params: &[Param<'_>; NUM_PARAMS]) -> Result<()> {
        check_param_types(PARAM_TYPES_NONE, param_types, params)
    }

    fn close_session(&self) {}

    fn invoke_command(
        &self,
        command_id: u32,
        param_types: ParamTypes,
        params: &mut [Param<'_>; NUM_PARAMS],
    ) -> Result<()>;
}
