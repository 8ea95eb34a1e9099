//! Resolved native types.
//!
//! A [`Type`] is what every signature, struct member and buffer hint resolves
//! to. Builtins are plain tags; mapped types and struct layouts are shared
//! behind `Rc` so that every Function using them sees the same instance.

mod mapped;
mod registry;

use std::fmt;
use std::rc::Rc;

use guest_ffi_core::{NativeType, TypeHash};
use libffi::middle;

use crate::error::{FfiError, FfiResult};
use crate::struct_layout::{StructByReference, StructLayout};

pub use mapped::{CustomConversion, GuestConverter, GuestHandler, HookConversion, MappedType};
pub use registry::TypeRegistry;

/// One native type.
#[derive(Clone)]
pub enum Type {
    Builtin(NativeType),
    Mapped(Rc<MappedType>),
    /// An aggregate passed by value.
    Struct(Rc<StructLayout>),
    /// The address of an out-of-line aggregate.
    StructByReference(StructByReference),
}

impl Type {
    /// The canonical tag. By-reference structs are pointers at the ABI level.
    pub fn tag(&self) -> NativeType {
        match self {
            Type::Builtin(tag) => *tag,
            Type::Mapped(_) => NativeType::Mapped,
            Type::Struct(_) => NativeType::Struct,
            Type::StructByReference(_) => NativeType::Pointer,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Type::StructByReference(_) => "STRUCT_BY_REFERENCE",
            other => other.tag().name(),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Type::Builtin(tag) => tag.size(),
            Type::Mapped(mapped) => mapped.size(),
            Type::Struct(layout) => layout.size(),
            Type::StructByReference(_) => NativeType::Pointer.size(),
        }
    }

    pub fn alignment(&self) -> usize {
        match self {
            Type::Builtin(tag) => tag.alignment(),
            Type::Mapped(mapped) => mapped.alignment(),
            Type::Struct(layout) => layout.alignment(),
            Type::StructByReference(_) => NativeType::Pointer.alignment(),
        }
    }

    /// Whether values of this type are stored and passed as a single scalar.
    pub fn is_scalar(&self) -> bool {
        match self {
            Type::Builtin(tag) => tag.is_scalar(),
            Type::Mapped(_) | Type::StructByReference(_) => true,
            Type::Struct(_) => false,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Builtin(NativeType::Void))
    }

    pub fn is_varargs(&self) -> bool {
        matches!(self, Type::Builtin(NativeType::Varargs))
    }

    pub fn type_hash(&self) -> TypeHash {
        match self {
            Type::Builtin(tag) => tag.type_hash(),
            Type::Mapped(mapped) => mapped.type_hash(),
            Type::Struct(layout) => layout.type_hash(),
            Type::StructByReference(by_ref) => TypeHash::by_reference(by_ref.layout().type_hash()),
        }
    }

    /// The libffi description of this type.
    pub fn ffi_type(&self) -> FfiResult<middle::Type> {
        match self {
            Type::Builtin(tag) => builtin_ffi_type(*tag),
            Type::Mapped(mapped) => builtin_ffi_type(mapped.native_type()?),
            Type::Struct(layout) => layout.ffi_type(),
            Type::StructByReference(_) => Ok(middle::Type::pointer()),
        }
    }
}

fn builtin_ffi_type(tag: NativeType) -> FfiResult<middle::Type> {
    Ok(match tag {
        NativeType::Void => middle::Type::void(),
        NativeType::Int8 => middle::Type::i8(),
        NativeType::Uint8 => middle::Type::u8(),
        NativeType::Int16 => middle::Type::i16(),
        NativeType::Uint16 => middle::Type::u16(),
        NativeType::Int32 => middle::Type::i32(),
        NativeType::Uint32 => middle::Type::u32(),
        NativeType::Int64 => middle::Type::i64(),
        NativeType::Uint64 => middle::Type::u64(),
        NativeType::Long => middle::Type::c_long(),
        NativeType::Ulong => middle::Type::c_ulong(),
        NativeType::Float32 => middle::Type::f32(),
        NativeType::Float64 => middle::Type::f64(),
        NativeType::Pointer => middle::Type::pointer(),
        NativeType::Bool => middle::Type::u8(),
        NativeType::LongDouble
        | NativeType::Varargs
        | NativeType::Struct
        | NativeType::Mapped => {
            return Err(FfiError::unsupported(format!(
                "{} has no native representation",
                tag.name()
            )));
        }
    })
}

impl From<NativeType> for Type {
    fn from(tag: NativeType) -> Self {
        Type::Builtin(tag)
    }
}

impl From<StructLayout> for Type {
    fn from(layout: StructLayout) -> Self {
        Type::Struct(Rc::new(layout))
    }
}

impl From<StructByReference> for Type {
    fn from(by_ref: StructByReference) -> Self {
        Type::StructByReference(by_ref)
    }
}

impl From<MappedType> for Type {
    fn from(mapped: MappedType) -> Self {
        Type::Mapped(Rc::new(mapped))
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Type::Builtin(a), Type::Builtin(b)) => a == b,
            (Type::Mapped(a), Type::Mapped(b)) => Rc::ptr_eq(a, b),
            (Type::Struct(_), Type::Struct(_))
            | (Type::StructByReference(_), Type::StructByReference(_)) => {
                self.type_hash() == other.type_hash()
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Builtin(tag) => write!(f, "Type::{}", tag.name()),
            Type::Mapped(mapped) => write!(f, "Type::Mapped({})", mapped.type_hash()),
            Type::Struct(layout) => write!(f, "Type::Struct({layout:?})"),
            Type::StructByReference(by_ref) => write!(f, "Type::{by_ref:?}"),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
