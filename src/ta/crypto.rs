//! Crypto application: key generation and single-shot transforms

use super::{TrustedApplication, CRYPTO_UUID};
use crate::engine::CryptoEngine;
use crate::error::{Result, TeeError};
use crate::flags::{decode_with, DecodePolicy, Mode};
use crate::handle::HandlePool;
use crate::keys::KeyManager;
use crate::params::{check_param_types, Param, ParamType, ParamTypes, Value, NUM_PARAMS};
use crate::storage::PersistentStore;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CMD_GENERATE_KEY: u32 = 0;
pub const CMD_ENCRYPT_DECRYPT: u32 = 1;

pub const GENERATE_KEY_PARAMS: ParamTypes = ParamTypes::new(
    ParamType::ValueInput,
    ParamType::ValueInput,
    ParamType::None,
    ParamType::None,
);

pub const ENCRYPT_DECRYPT_PARAMS: ParamTypes = ParamTypes::new(
    ParamType::ValueInput,
    ParamType::MemrefInout,
    ParamType::MemrefInout,
    ParamType::None,
);

#[derive(Debug, Clone)]
pub struct CryptoService {
    keys: KeyManager,
    engine: CryptoEngine,
    policy: DecodePolicy,
}

impl CryptoService {
    pub fn new(store: Arc<dyn PersistentStore>, pool: HandlePool, policy: DecodePolicy) -> Self {
        Self {
            keys: KeyManager::new(store, pool.clone()),
            engine: CryptoEngine::new(pool),
            policy,
        }
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    fn generate_key(&self, param_types: ParamTypes, params: &[Param<'_>; NUM_PARAMS]) -> Result<()> {
        check_param_types(GENERATE_KEY_PARAMS, param_types, params)?;
        let Value {
            a: key_type,
            b: key_size,
        } = params[0].as_value()?;
        let key_id = params[1].as_value()?.a;
        self.keys.generate_key(key_type, key_size, key_id)
    }

    fn encrypt_decrypt(
        &self,
        param_types: ParamTypes,
        params: &mut [Param<'_>; NUM_PARAMS],
    ) -> Result<()> {
        check_param_types(ENCRYPT_DECRYPT_PARAMS, param_types, params)?;
        let Value { a: key_id, b: flags } = params[0].as_value()?;
        let op = decode_with(flags, self.policy)?.resolve()?;
        debug!(key_id, flags, mode = ?op.mode, algorithm = %op.algorithm, "Resolved operation");

        let key = match op.mode {
            Mode::Digest => None,
            _ => Some(self.keys.get_key(key_id)?),
        };

        let [_, input, output, _] = params;
        let input = input.as_memref()?.contents();
        let output = output.as_memref_mut()?;
        self.engine.execute(op, key.as_ref(), input, output)
    }
}

impl TrustedApplication for CryptoService {
    fn uuid(&self) -> Uuid {
        CRYPTO_UUID
    }

    fn name(&self) -> &'static str {
        "crypto"
    }

    fn invoke_command(
        &self,
        command_id: u32,
        param_types: ParamTypes,
        params: &mut [Param<'_>; NUM_PARAMS],
    ) -> Result<()> {
        debug!(command_id, param_types = param_types.raw(), "Processing crypto command");

        let result = match command_id {
            CMD_GENERATE_KEY => self.generate_key(param_types, params),
            CMD_ENCRYPT_DECRYPT => self.encrypt_decrypt(param_types, params),
            other => Err(TeeError::bad_params(format!("unknown command {}", other))),
        };

        match &result {
            Err(TeeError::ShortBuffer { required }) => {
                debug!(command_id, required, "Output buffer too small");
            }
            Err(e) => warn!(command_id, code = e.code(), error = %e, "Crypto command failed"),
            Ok(()) => {}
        }
        result
    }
}
