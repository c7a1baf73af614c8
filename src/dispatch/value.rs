//! Host-side argument and return values.

use std::fmt;

use crate::types::FfiType;

/// A value crossing the native boundary
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// Raw address; never dereferenced by the bridge
    Pointer(usize),
    /// Result of a `void` function
    Void,
}

impl Value {
    pub fn null() -> Self {
        Value::Pointer(0)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Value::Pointer(ptr as usize)
    }

    pub fn from_mut_ptr<T>(ptr: *mut T) -> Self {
        Value::Pointer(ptr as usize)
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Value::I32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Value::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<usize> {
        match *self {
            Value::Pointer(v) => Some(v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Pointer(_) => "pointer",
            Value::Void => "void",
        }
    }

    /// Whether this value can be passed for a parameter of type `ty`.
    /// Matching is exact: no implicit widening or int/float conversion.
    pub fn conforms_to(&self, ty: &FfiType) -> bool {
        matches!(
            (self, ty),
            (Value::I32(_), FfiType::Int32)
                | (Value::I64(_), FfiType::Int64)
                | (Value::F32(_), FfiType::Float32)
                | (Value::F64(_), FfiType::Float64)
                | (Value::Pointer(_), FfiType::Pointer(_))
        )
    }

    /// Store into an 8-byte marshaling slot at its natural width
    pub(crate) fn write_slot(&self, slot: &mut u64) {
        let p = slot as *mut u64;
        // SAFETY: the slot is 8 bytes, 8-aligned; every payload is at most 8
        // bytes and written at the slot's start address
        unsafe {
            match *self {
                Value::I32(v) => (p as *mut i32).write(v),
                Value::I64(v) => (p as *mut i64).write(v),
                Value::F32(v) => (p as *mut f32).write(v),
                Value::F64(v) => (p as *mut f64).write(v),
                Value::Pointer(v) => (p as *mut usize).write(v),
                Value::Void => {}
            }
        }
    }

    /// Read a return slot written by a thunk for a function returning `ty`
    pub(crate) fn read_slot(slot: &u64, ty: &FfiType) -> Self {
        let p = slot as *const u64;
        // SAFETY: as in `write_slot`; the thunk stored a value of exactly `ty`
        unsafe {
            match ty {
                FfiType::Void => Value::Void,
                FfiType::Int32 => Value::I32((p as *const i32).read()),
                FfiType::Int64 => Value::I64((p as *const i64).read()),
                FfiType::Float32 => Value::F32((p as *const f32).read()),
                FfiType::Float64 => Value::F64((p as *const f64).read()),
                FfiType::Pointer(_) => Value::Pointer((p as *const usize).read()),
            }
        }
    }

    /// Parse a command-line argument as a value of type `ty`
    pub fn parse_as(text: &str, ty: &FfiType) -> Result<Self, String> {
        let bad = |e: &dyn fmt::Display| format!("cannot parse '{}' as {}: {}", text, ty, e);
        match ty {
            FfiType::Int32 => text.parse().map(Value::I32).map_err(|e| bad(&e)),
            FfiType::Int64 => text.parse().map(Value::I64).map_err(|e| bad(&e)),
            FfiType::Float32 => text.parse().map(Value::F32).map_err(|e| bad(&e)),
            FfiType::Float64 => text.parse().map(Value::F64).map_err(|e| bad(&e)),
            FfiType::Pointer(_) => {
                let parsed = match text.strip_prefix("0x") {
                    Some(hex) => usize::from_str_radix(hex, 16),
                    None => text.parse(),
                };
                parsed.map(Value::Pointer).map_err(|e| bad(&e))
            }
            FfiType::Void => Err(format!("cannot pass '{}' as void", text)),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Pointer(v) => write!(f, "{:#x}", v),
            Value::Void => write!(f, "()"),
        }
    }
}
