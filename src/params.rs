//! Four-slot command parameters
//!
//! A command invocation carries a packed parameter-type descriptor and four
//! slots. Each slot is empty, a value pair, or a memory reference borrowed
//! from the caller for the duration of one invocation. The memory reference
//! size is updated on return to report the bytes produced (or, on a short
//! buffer, the bytes required).

use crate::error::{Result, TeeError};

/// Number of parameter slots in every invocation
pub const NUM_PARAMS: usize = 4;

/// Type of a single parameter slot (GlobalPlatform encoding)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ParamType {
    None = 0,
    ValueInput = 1,
    ValueOutput = 2,
    ValueInout = 3,
    MemrefInput = 5,
    MemrefOutput = 6,
    MemrefInout = 7,
}

impl ParamType {
    fn from_nibble(nibble: u32) -> Option<Self> {
        match nibble {
            0 => Some(ParamType::None),
            1 => Some(ParamType::ValueInput),
            2 => Some(ParamType::ValueOutput),
            3 => Some(ParamType::ValueInout),
            5 => Some(ParamType::MemrefInput),
            6 => Some(ParamType::MemrefOutput),
            7 => Some(ParamType::MemrefInout),
            _ => None,
        }
    }

    pub fn is_value(self) -> bool {
        matches!(
            self,
            ParamType::ValueInput | ParamType::ValueOutput | ParamType::ValueInout
        )
    }

    pub fn is_memref(self) -> bool {
        matches!(
            self,
            ParamType::MemrefInput | ParamType::MemrefOutput | ParamType::MemrefInout
        )
    }
}

/// Packed descriptor of the four slot types, one nibble per slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamTypes(u32);

impl ParamTypes {
    pub const fn new(t0: ParamType, t1: ParamType, t2: ParamType, t3: ParamType) -> Self {
        Self((t0 as u32) | ((t1 as u32) << 4) | ((t2 as u32) << 8) | ((t3 as u32) << 12))
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Type of slot `index`; undefined nibbles are rejected
    pub fn slot(self, index: usize) -> Result<ParamType> {
        if index >= NUM_PARAMS {
            return Err(TeeError::bad_params(format!("no parameter slot {}", index)));
        }
        let nibble = (self.0 >> (index * 4)) & 0xF;
        ParamType::from_nibble(nibble).ok_or_else(|| {
            TeeError::bad_params(format!("undefined type {:#x} in slot {}", nibble, index))
        })
    }
}

/// Descriptor with every slot empty
pub const PARAM_TYPES_NONE: ParamTypes = ParamTypes::new(
    ParamType::None,
    ParamType::None,
    ParamType::None,
    ParamType::None,
);

/// A value-pair slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Value {
    pub a: u32,
    pub b: u32,
}

/// A caller-owned buffer lent to the enclave for one invocation
#[derive(Debug)]
pub struct Memref<'a> {
    buffer: &'a mut [u8],
    size: usize,
}

impl<'a> Memref<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        let size = buffer.len();
        Self { buffer, size }
    }

    /// Size reported by the enclave (bytes written or bytes required)
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Current buffer contents up to the reported size
    pub fn contents(&self) -> &[u8] {
        &self.buffer[..self.size.min(self.buffer.len())]
    }

    /// Copies `data` into the buffer, or reports the size required without
    /// touching the buffer
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.buffer.len() {
            self.size = data.len();
            return Err(TeeError::ShortBuffer {
                required: data.len(),
            });
        }
        self.buffer[..data.len()].copy_from_slice(data);
        self.size = data.len();
        Ok(())
    }

    /// Records a required size without writing anything
    pub(crate) fn short(&mut self, required: usize) -> TeeError {
        self.size = required;
        TeeError::ShortBuffer { required }
    }
}

/// One parameter slot
#[derive(Debug, Default)]
pub enum Param<'a> {
    #[default]
    None,
    Value(Value),
    Memref(Memref<'a>),
}

impl<'a> Param<'a> {
    pub fn value(a: u32, b: u32) -> Self {
        Param::Value(Value { a, b })
    }

    pub fn memref(buffer: &'a mut [u8]) -> Self {
        Param::Memref(Memref::new(buffer))
    }

    pub(crate) fn as_value(&self) -> Result<Value> {
        match self {
            Param::Value(v) => Ok(*v),
            _ => Err(TeeError::bad_params("expected a value slot")),
        }
    }

    pub(crate) fn as_memref(&self) -> Result<&Memref<'a>> {
        match self {
            Param::Memref(m) => Ok(m),
            _ => Err(TeeError::bad_params("expected a memory reference slot")),
        }
    }

    pub(crate) fn as_memref_mut(&mut self) -> Result<&mut Memref<'a>> {
        match self {
            Param::Memref(m) => Ok(m),
            _ => Err(TeeError::bad_params("expected a memory reference slot")),
        }
    }

    /// Size reported back in a memory reference slot, if this is one
    pub fn memref_size(&self) -> Option<usize> {
        match self {
            Param::Memref(m) => Some(m.size()),
            _ => None,
        }
    }
}

/// Descriptor plus slots, as assembled by the caller
#[derive(Debug)]
pub struct Operation<'a> {
    pub param_types: ParamTypes,
    pub params: [Param<'a>; NUM_PARAMS],
}

impl<'a> Operation<'a> {
    pub fn new(param_types: ParamTypes, params: [Param<'a>; NUM_PARAMS]) -> Self {
        Self {
            param_types,
            params,
        }
    }

    pub fn empty() -> Self {
        Self::new(PARAM_TYPES_NONE, Default::default())
    }
}

/// Rejects an invocation whose descriptor is not exactly `expected`, or whose
/// slots disagree with the declared types
pub fn check_param_types(
    expected: ParamTypes,
    actual: ParamTypes,
    params: &[Param<'_>; NUM_PARAMS],
) -> Result<()> {
    if expected != actual {
        return Err(TeeError::bad_params(format!(
            "param types {:#06x} do not match expected {:#06x}",
            actual.raw(),
            expected.raw()
        )));
    }
    for (index, param) in params.iter().enumerate() {
        let declared = expected.slot(index)?;
        let agrees = match param {
            Param::None => declared == ParamType::None,
            Param::Value(_) => declared.is_value(),
            Param::Memref(_) => declared.is_memref(),
        };
        if !agrees {
            return Err(TeeError::bad_params(format!(
                "slot {} does not hold a {:?} parameter",
                index, declared
            )));
        }
    }
    Ok(())
}
