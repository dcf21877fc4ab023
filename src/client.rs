//! Typed client calls over an open [`Session`]
//!
//! These assemble the parameter slots for each command so callers never
//! build descriptors by hand.

use crate::enclave::Session;
use crate::error::{Result, TeeError};
use crate::params::{Operation, Param};
use crate::ta::crypto::{
    CMD_ENCRYPT_DECRYPT, CMD_GENERATE_KEY, ENCRYPT_DECRYPT_PARAMS, GENERATE_KEY_PARAMS,
};
use crate::ta::storage::{
    CMD_DELETE, CMD_READ_RAW, CMD_WRITE_RAW, DELETE_PARAMS, READ_RAW_PARAMS, WRITE_RAW_PARAMS,
};
use tracing::debug;

/// Initial buffer offered when reading an object of unknown size
pub const INITIAL_READ_BUFFER: usize = 7000;

pub fn generate_key(
    session: &mut Session<'_>,
    key_type: u32,
    key_size: u32,
    key_id: u32,
) -> Result<()> {
    let mut operation = Operation::new(
        GENERATE_KEY_PARAMS,
        [
            Param::value(key_type, key_size),
            Param::value(key_id, 0),
            Param::None,
            Param::None,
        ],
    );
    session.invoke(CMD_GENERATE_KEY, &mut operation)
}

/// Runs EncryptDecrypt with `output` as the output slot
///
/// `output` carries the IV or the signature to verify on entry. Returns the
/// number of bytes the enclave reported back.
pub fn encrypt_decrypt(
    session: &mut Session<'_>,
    key_id: u32,
    flags: u32,
    input: &[u8],
    output: &mut [u8],
) -> Result<usize> {
    let mut input = input.to_vec();
    let mut operation = Operation::new(
        ENCRYPT_DECRYPT_PARAMS,
        [
            Param::value(key_id, flags),
            Param::memref(&mut input),
            Param::memref(output),
            Param::None,
        ],
    );
    session.invoke(CMD_ENCRYPT_DECRYPT, &mut operation)?;
    Ok(operation.params[2].memref_size().unwrap_or(0))
}

pub fn write_object(session: &mut Session<'_>, id: &[u8], data: &[u8]) -> Result<()> {
    let mut id = id.to_vec();
    let mut data = data.to_vec();
    let mut operation = Operation::new(
        WRITE_RAW_PARAMS,
        [
            Param::memref(&mut id),
            Param::memref(&mut data),
            Param::None,
            Param::None,
        ],
    );
    session.invoke(CMD_WRITE_RAW, &mut operation)
}

/// Reads into a caller buffer; `ShortBuffer` carries the required size
pub fn read_object_into(session: &mut Session<'_>, id: &[u8], out: &mut [u8]) -> Result<usize> {
    let mut id = id.to_vec();
    let mut operation = Operation::new(
        READ_RAW_PARAMS,
        [
            Param::memref(&mut id),
            Param::memref(out),
            Param::None,
            Param::None,
        ],
    );
    session.invoke(CMD_READ_RAW, &mut operation)?;
    Ok(operation.params[1].memref_size().unwrap_or(0))
}

/// Reads a whole object, resizing once if the first buffer is too small
pub fn read_object(session: &mut Session<'_>, id: &[u8]) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; INITIAL_READ_BUFFER];
    let size = match read_object_into(session, id, &mut buffer) {
        Ok(size) => size,
        Err(TeeError::ShortBuffer { required }) => {
            debug!(required, "Retrying read with a larger buffer");
            buffer.resize(required, 0);
            read_object_into(session, id, &mut buffer)?
        }
        Err(e) => return Err(e),
    };
    buffer.truncate(size);
    Ok(buffer)
}

pub fn delete_object(session: &mut Session<'_>, id: &[u8]) -> Result<()> {
    let mut id = id.to_vec();
    let mut operation = Operation::new(
        DELETE_PARAMS,
        [Param::memref(&mut id), Param::None, Param::None, Param::None],
    );
    session.invoke(CMD_DELETE, &mut operation)
}
