//! Canonical native type tags.

use std::ffi::{c_char, c_double, c_float, c_int, c_long, c_longlong, c_short};
use std::fmt;
use std::mem::align_of;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{Platform, TypeHash};

/// One C-ABI scalar or aggregate shape.
///
/// The discriminants are the stable tag ids exposed to guest code as the
/// `TYPE_<TAG>` constants; `NativeType::try_from(id)` inverts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum NativeType {
    Void = 0,
    Int8 = 1,
    Uint8 = 2,
    Int16 = 3,
    Uint16 = 4,
    Int32 = 5,
    Uint32 = 6,
    Int64 = 7,
    Uint64 = 8,
    Long = 9,
    Ulong = 10,
    Float32 = 11,
    Float64 = 12,
    LongDouble = 13,
    Pointer = 14,
    Bool = 15,
    Varargs = 16,
    Struct = 17,
    Mapped = 18,
}

impl NativeType {
    /// The builtin tags, each of which is also a ready-made `Type`.
    pub const PRIMITIVES: [NativeType; 17] = [
        NativeType::Int8,
        NativeType::Uint8,
        NativeType::Int16,
        NativeType::Uint16,
        NativeType::Int32,
        NativeType::Uint32,
        NativeType::Int64,
        NativeType::Uint64,
        NativeType::Long,
        NativeType::Ulong,
        NativeType::Float32,
        NativeType::Float64,
        NativeType::Void,
        NativeType::LongDouble,
        NativeType::Pointer,
        NativeType::Bool,
        NativeType::Varargs,
    ];

    /// Every tag, including the `STRUCT` and `MAPPED` categories.
    pub const ALL: [NativeType; 19] = [
        NativeType::Void,
        NativeType::Int8,
        NativeType::Uint8,
        NativeType::Int16,
        NativeType::Uint16,
        NativeType::Int32,
        NativeType::Uint32,
        NativeType::Int64,
        NativeType::Uint64,
        NativeType::Long,
        NativeType::Ulong,
        NativeType::Float32,
        NativeType::Float64,
        NativeType::LongDouble,
        NativeType::Pointer,
        NativeType::Bool,
        NativeType::Varargs,
        NativeType::Struct,
        NativeType::Mapped,
    ];

    /// Canonical upper-case name (`"INT8"`, `"FLOAT64"`).
    pub const fn name(self) -> &'static str {
        match self {
            NativeType::Void => "VOID",
            NativeType::Int8 => "INT8",
            NativeType::Uint8 => "UINT8",
            NativeType::Int16 => "INT16",
            NativeType::Uint16 => "UINT16",
            NativeType::Int32 => "INT32",
            NativeType::Uint32 => "UINT32",
            NativeType::Int64 => "INT64",
            NativeType::Uint64 => "UINT64",
            NativeType::Long => "LONG",
            NativeType::Ulong => "ULONG",
            NativeType::Float32 => "FLOAT32",
            NativeType::Float64 => "FLOAT64",
            NativeType::LongDouble => "LONGDOUBLE",
            NativeType::Pointer => "POINTER",
            NativeType::Bool => "BOOL",
            NativeType::Varargs => "VARARGS",
            NativeType::Struct => "STRUCT",
            NativeType::Mapped => "MAPPED",
        }
    }

    /// Look up a canonical tag by name, ignoring ASCII case.
    ///
    /// Aliases are not consulted here; see [`crate::resolve_name`].
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|tag| tag.name().eq_ignore_ascii_case(name))
    }

    /// The numeric tag id.
    #[inline]
    pub fn id(self) -> u8 {
        self.into()
    }

    /// Native size in bytes. Categories without an intrinsic size report 0.
    pub const fn size(self) -> usize {
        match self {
            NativeType::Int8 | NativeType::Uint8 => Platform::INT8_SIZE,
            NativeType::Int16 | NativeType::Uint16 => Platform::INT16_SIZE,
            NativeType::Int32 | NativeType::Uint32 => Platform::INT32_SIZE,
            NativeType::Int64 | NativeType::Uint64 => Platform::INT64_SIZE,
            NativeType::Long | NativeType::Ulong => Platform::LONG_SIZE,
            NativeType::Float32 => Platform::FLOAT_SIZE,
            NativeType::Float64 => Platform::DOUBLE_SIZE,
            NativeType::LongDouble => Platform::LONG_DOUBLE_SIZE,
            NativeType::Pointer => Platform::ADDRESS_SIZE,
            NativeType::Bool => Platform::BOOL_SIZE,
            NativeType::Void | NativeType::Varargs | NativeType::Struct | NativeType::Mapped => 0,
        }
    }

    /// Natural alignment in bytes (at least 1).
    pub const fn alignment(self) -> usize {
        match self {
            NativeType::Int8 | NativeType::Uint8 => align_of::<c_char>(),
            NativeType::Int16 | NativeType::Uint16 => align_of::<c_short>(),
            NativeType::Int32 | NativeType::Uint32 => align_of::<c_int>(),
            NativeType::Int64 | NativeType::Uint64 => align_of::<c_longlong>(),
            NativeType::Long | NativeType::Ulong => align_of::<c_long>(),
            NativeType::Float32 => align_of::<c_float>(),
            NativeType::Float64 => align_of::<c_double>(),
            NativeType::LongDouble => Platform::LONG_DOUBLE_ALIGN,
            NativeType::Pointer => Platform::ADDRESS_ALIGN,
            NativeType::Bool => align_of::<bool>(),
            NativeType::Void | NativeType::Varargs | NativeType::Struct | NativeType::Mapped => 1,
        }
    }

    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            NativeType::Int8
                | NativeType::Uint8
                | NativeType::Int16
                | NativeType::Uint16
                | NativeType::Int32
                | NativeType::Uint32
                | NativeType::Int64
                | NativeType::Uint64
                | NativeType::Long
                | NativeType::Ulong
        )
    }

    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            NativeType::Int8 | NativeType::Int16 | NativeType::Int32 | NativeType::Int64 | NativeType::Long
        )
    }

    pub const fn is_float(self) -> bool {
        matches!(self, NativeType::Float32 | NativeType::Float64 | NativeType::LongDouble)
    }

    /// Whether a value of this tag can be passed or stored as a scalar.
    pub const fn is_scalar(self) -> bool {
        self.is_integer() || self.is_float() || matches!(self, NativeType::Pointer | NativeType::Bool)
    }

    /// Identity hash, derived from the canonical name.
    pub fn type_hash(self) -> TypeHash {
        TypeHash::from_name(self.name())
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
