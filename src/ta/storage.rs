//! Secure storage application: raw object read, write and delete

use super::{TrustedApplication, STORAGE_UUID};
use crate::error::{Result, TeeError};
use crate::objects::ObjectStore;
use crate::params::{check_param_types, Param, ParamType, ParamTypes, NUM_PARAMS};
use crate::storage::PersistentStore;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CMD_READ_RAW: u32 = 0;
pub const CMD_WRITE_RAW: u32 = 1;
pub const CMD_DELETE: u32 = 2;

pub const READ_RAW_PARAMS: ParamTypes = ParamTypes::new(
    ParamType::MemrefInput,
    ParamType::MemrefOutput,
    ParamType::None,
    ParamType::None,
);

pub const WRITE_RAW_PARAMS: ParamTypes = ParamTypes::new(
    ParamType::MemrefInput,
    ParamType::MemrefInput,
    ParamType::None,
    ParamType::None,
);

pub const DELETE_PARAMS: ParamTypes = ParamTypes::new(
    ParamType::MemrefInput,
    ParamType::None,
    ParamType::None,
    ParamType::None,
);

#[derive(Debug, Clone)]
pub struct StorageService {
    objects: ObjectStore,
}

impl StorageService {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self {
            objects: ObjectStore::new(store),
        }
    }

    fn read_raw(&self, param_types: ParamTypes, params: &mut [Param<'_>; NUM_PARAMS]) -> Result<()> {
        check_param_types(READ_RAW_PARAMS, param_types, params)?;
        let [id, data, _, _] = params;
        let id = id.as_memref()?.contents();
        self.objects.read_object(id, data.as_memref_mut()?)
    }

    fn write_raw(&self, param_types: ParamTypes, params: &[Param<'_>; NUM_PARAMS]) -> Result<()> {
        check_param_types(WRITE_RAW_PARAMS, param_types, params)?;
        let id = params[0].as_memref()?.contents();
        let data = params[1].as_memref()?.contents();
        self.objects.write_object(id, data)
    }

    fn delete(&self, param_types: ParamTypes, params: &[Param<'_>; NUM_PARAMS]) -> Result<()> {
        check_param_types(DELETE_PARAMS, param_types, params)?;
        let id = params[0].as_memref()?.contents();
        self.objects.delete_object(id)?;
        Ok(())
    }
}

impl TrustedApplication for StorageService {
    fn uuid(&self) -> Uuid {
        STORAGE_UUID
    }

    fn name(&self) -> &'static str {
        "secure_storage"
    }

    fn invoke_command(
        &self,
        command_id: u32,
        param_types: ParamTypes,
        params: &mut [Param<'_>; NUM_PARAMS],
    ) -> Result<()> {
        debug!(command_id, param_types = param_types.raw(), "Processing storage command");

        let result = match command_id {
            CMD_READ_RAW => self.read_raw(param_types, params),
            CMD_WRITE_RAW => self.write_raw(param_types, params),
            CMD_DELETE => self.delete(param_types, params),
            other => Err(TeeError::bad_params(format!("unknown command {}", other))),
        };

        match &result {
            Err(TeeError::ShortBuffer { required }) => {
                debug!(command_id, required, "Object larger than caller buffer");
            }
            Err(e) => warn!(command_id, code = e.code(), error = %e, "Storage command failed"),
            Ok(()) => {}
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn service() -> StorageService {
        StorageService::new(Arc::new(MemoryStore::new()))
    }

    fn write(service: &StorageService, id: &[u8], data: &[u8]) -> Result<()> {
        let mut id = id.to_vec();
        let mut data = data.to_vec();
        let mut params = [
            Param::memref(&mut id),
            Param::memref(&mut data),
            Param::None,
            Param::None,
        ];
        service.invoke_command(CMD_WRITE_RAW, WRITE_RAW_PARAMS, &mut params)
    }

    /// Returns the reported size alongside the invocation result
    fn read(service: &StorageService, id: &[u8], out: &mut [u8]) -> (Result<()>, Option<usize>) {
        let mut id = id.to_vec();
        let mut params = [
            Param::memref(&mut id),
            Param::memref(out),
            Param::None,
            Param::None,
        ];
        let result = service.invoke_command(CMD_READ_RAW, READ_RAW_PARAMS, &mut params);
        (result, params[1].memref_size())
    }

    fn delete(service: &StorageService, id: &[u8]) -> Result<()> {
        let mut id = id.to_vec();
        let mut params = [Param::memref(&mut id), Param::None, Param::None, Param::None];
        service.invoke_command(CMD_DELETE, DELETE_PARAMS, &mut params)
    }

    #[test]
    fn test_write_read_delete() {
        let service = service();
        write(&service, b"note", b"hello enclave").unwrap();

        let mut out = [0u8; 64];
        let (result, size) = read(&service, b"note", &mut out);
        result.unwrap();
        assert_eq!(size, Some(13));
        assert_eq!(&out[..13], b"hello enclave");

        delete(&service, b"note").unwrap();
        let (result, _) = read(&service, b"note", &mut out);
        assert!(matches!(result, Err(TeeError::ItemNotFound(_))));
    }

    #[test]
    fn test_short_buffer_then_retry() {
        let service = service();
        let blob = vec![0xabu8; 9000];
        write(&service, b"big", &blob).unwrap();

        let mut out = vec![0u8; 7000];
        let (result, size) = read(&service, b"big", &mut out);
        assert!(matches!(result, Err(TeeError::ShortBuffer { required: 9000 })));
        assert_eq!(size, Some(9000));
        assert!(out.iter().all(|b| *b == 0));

        let mut out = vec![0u8; 9000];
        let (result, _) = read(&service, b"big", &mut out);
        result.unwrap();
        assert_eq!(out, blob);
    }

    #[test]
    fn test_delete_absent_is_ok() {
        let service = service();
        delete(&service, b"nothing here").unwrap();
    }

    #[test]
    fn test_id_length_limits() {
        let service = service();
        assert!(matches!(write(&service, b"", b"x"), Err(TeeError::BadParameters(_))));
        assert!(matches!(
            write(&service, &[b'a'; 65], b"x"),
            Err(TeeError::BadParameters(_))
        ));
        write(&service, &[b'a'; 64], b"x").unwrap();
    }

    #[test]
    fn test_wrong_signature() {
        let service = service();
        let mut id = b"x".to_vec();
        let mut params = [Param::memref(&mut id), Param::None, Param::None, Param::None];
        assert!(matches!(
            service.invoke_command(CMD_WRITE_RAW, DELETE_PARAMS, &mut params),
            Err(TeeError::BadParameters(_))
        ));
        assert!(matches!(
            service.invoke_command(CMD_READ_RAW, DELETE_PARAMS, &mut params),
            Err(TeeError::BadParameters(_))
        ));
        assert!(matches!(
            service.invoke_command(7, DELETE_PARAMS, &mut params),
            Err(TeeError::BadParameters(_))
        ));
    }
}
