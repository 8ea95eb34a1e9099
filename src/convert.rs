//! Conversion traits between Rust scalars and guest values.
//!
//! - [`FromValue`]: extract a Rust scalar from a [`Value`]
//! - [`IntoValue`]: box a Rust scalar as a [`Value`]
//!
//! Integer extraction follows the native calling convention rather than
//! guest arithmetic: the guest integer is truncated to the target width and
//! reinterpreted with the target's signedness, exactly as a C cast would.

use crate::error::{FfiError, FfiResult};
use crate::value::{NativePointer, Value};

/// Extract a Rust value from a guest value.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> FfiResult<Self>;
}

/// Box a Rust value as a guest value.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

/// The integer payload of `value`, or a conversion error naming its class.
pub fn expect_integer(value: &Value) -> FfiResult<i128> {
    value
        .as_integer()
        .ok_or_else(|| FfiError::conversion(value.class_name(), "Integer"))
}

/// The numeric payload of `value` as `f64`.
pub fn expect_float(value: &Value) -> FfiResult<f64> {
    value
        .as_float()
        .ok_or_else(|| FfiError::conversion(value.class_name(), "Float"))
}

// ============================================================================
// Integer implementations
// ============================================================================

macro_rules! impl_integer_conversions {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> FfiResult<Self> {
                    // `as` from i128 keeps the low bits: truncation plus
                    // two's-complement reinterpretation.
                    Ok(expect_integer(value)? as $ty)
                }
            }

            impl IntoValue for $ty {
                fn into_value(self) -> Value {
                    Value::integer(self as i128)
                }
            }
        )*
    };
}

impl_integer_conversions!(i8, u8, i16, u16, i32, u32, i64, u64, isize, usize);

// ============================================================================
// Float, bool, pointer and unit implementations
// ============================================================================

impl FromValue for f64 {
    fn from_value(value: &Value) -> FfiResult<Self> {
        expect_float(value)
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> FfiResult<Self> {
        Ok(expect_float(value)? as f32)
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl IntoValue for f32 {
    fn into_value(self) -> Value {
        Value::Float(f64::from(self))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> FfiResult<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => Err(FfiError::conversion(other.class_name(), "Boolean")),
        }
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl FromValue for NativePointer {
    /// Accepts explicit pointers, `nil` (NULL) and raw integer addresses.
    fn from_value(value: &Value) -> FfiResult<Self> {
        match value {
            Value::Pointer(p) => Ok(*p),
            Value::Nil => Ok(NativePointer::NULL),
            Value::Fixnum(_) | Value::Bignum(_) => usize::try_from(expect_integer(value)?)
                .map(NativePointer::new)
                .map_err(|_| FfiError::conversion(value.class_name(), "Pointer")),
            other => Err(FfiError::conversion(other.class_name(), "Pointer")),
        }
    }
}

impl IntoValue for NativePointer {
    fn into_value(self) -> Value {
        Value::Pointer(self)
    }
}

impl IntoValue for () {
    fn into_value(self) -> Value {
        Value::Nil
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::string(self)
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}
