//! Guest value to native argument coercion.
//!
//! Each parameter type has exactly one coercion. Anything the native side
//! points into (C strings, by-value struct copies) lives in the per-call
//! arena and is freed when the call returns.

use std::ffi::{c_long, c_ulong, c_void};

use bumpalo::Bump;
use guest_ffi_core::NativeType;
use libffi::middle::Arg;

use crate::convert::{FromValue, expect_float, expect_integer};
use crate::error::{FfiError, FfiResult};
use crate::struct_layout::StructLayout;
use crate::types::Type;
use crate::value::{NativePointer, Value};

/// One argument in native representation.
#[derive(Debug, Clone, Copy)]
pub(crate) enum NativeArg<'a> {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Long(c_long),
    Ulong(c_ulong),
    F32(f32),
    F64(f64),
    Pointer(*mut c_void),
    /// By-value aggregate; never empty.
    Struct(&'a [u8]),
}

impl NativeArg<'_> {
    /// The libffi view of this argument; borrows `self`.
    pub(crate) fn as_arg(&self) -> Arg {
        match self {
            NativeArg::I8(v) => Arg::new(v),
            NativeArg::U8(v) => Arg::new(v),
            NativeArg::I16(v) => Arg::new(v),
            NativeArg::U16(v) => Arg::new(v),
            NativeArg::I32(v) => Arg::new(v),
            NativeArg::U32(v) => Arg::new(v),
            NativeArg::I64(v) => Arg::new(v),
            NativeArg::U64(v) => Arg::new(v),
            NativeArg::Long(v) => Arg::new(v),
            NativeArg::Ulong(v) => Arg::new(v),
            NativeArg::F32(v) => Arg::new(v),
            NativeArg::F64(v) => Arg::new(v),
            NativeArg::Pointer(v) => Arg::new(v),
            NativeArg::Struct(bytes) => Arg::new(&bytes[0]),
        }
    }

    /// Address of the argument value, for `ffi_call`.
    pub(crate) fn as_raw(&self) -> *mut c_void {
        match self {
            NativeArg::I8(v) => v as *const _ as *mut c_void,
            NativeArg::U8(v) => v as *const _ as *mut c_void,
            NativeArg::I16(v) => v as *const _ as *mut c_void,
            NativeArg::U16(v) => v as *const _ as *mut c_void,
            NativeArg::I32(v) => v as *const _ as *mut c_void,
            NativeArg::U32(v) => v as *const _ as *mut c_void,
            NativeArg::I64(v) => v as *const _ as *mut c_void,
            NativeArg::U64(v) => v as *const _ as *mut c_void,
            NativeArg::Long(v) => v as *const _ as *mut c_void,
            NativeArg::Ulong(v) => v as *const _ as *mut c_void,
            NativeArg::F32(v) => v as *const _ as *mut c_void,
            NativeArg::F64(v) => v as *const _ as *mut c_void,
            NativeArg::Pointer(v) => v as *const _ as *mut c_void,
            NativeArg::Struct(bytes) => bytes.as_ptr() as *mut c_void,
        }
    }
}

/// Coerce `value` to the native form of `ty`.
pub(crate) fn coerce<'a>(arena: &'a Bump, ty: &Type, value: &Value) -> FfiResult<NativeArg<'a>> {
    match ty {
        Type::Builtin(tag) => coerce_builtin(arena, *tag, value),
        Type::Mapped(mapped) => {
            let native = mapped.to_native(value)?;
            coerce_builtin(arena, mapped.native_type()?, &native)
        }
        Type::Struct(layout) => coerce_struct(arena, layout, value),
        Type::StructByReference(by_ref) => {
            if let Value::Buffer(buffer) = value {
                let have = buffer.borrow().total();
                let need = by_ref.layout().size();
                if have < need {
                    return Err(FfiError::OutOfBounds {
                        offset: 0,
                        width: need,
                        len: have,
                    });
                }
            }
            coerce_pointer(arena, value)
        }
    }
}

fn coerce_builtin<'a>(arena: &'a Bump, tag: NativeType, value: &Value) -> FfiResult<NativeArg<'a>> {
    Ok(match tag {
        NativeType::Int8 => NativeArg::I8(expect_integer(value)? as i8),
        NativeType::Uint8 => NativeArg::U8(expect_integer(value)? as u8),
        NativeType::Int16 => NativeArg::I16(expect_integer(value)? as i16),
        NativeType::Uint16 => NativeArg::U16(expect_integer(value)? as u16),
        NativeType::Int32 => NativeArg::I32(expect_integer(value)? as i32),
        NativeType::Uint32 => NativeArg::U32(expect_integer(value)? as u32),
        NativeType::Int64 => NativeArg::I64(expect_integer(value)? as i64),
        NativeType::Uint64 => NativeArg::U64(expect_integer(value)? as u64),
        NativeType::Long => NativeArg::Long(expect_integer(value)? as c_long),
        NativeType::Ulong => NativeArg::Ulong(expect_integer(value)? as c_ulong),
        NativeType::Float32 => NativeArg::F32(expect_float(value)? as f32),
        NativeType::Float64 => NativeArg::F64(expect_float(value)?),
        NativeType::Bool => NativeArg::U8(u8::from(bool::from_value(value)?)),
        NativeType::Pointer => coerce_pointer(arena, value)?,
        NativeType::LongDouble => {
            return Err(FfiError::unsupported("LONGDOUBLE values cannot be marshaled"));
        }
        NativeType::Void | NativeType::Varargs | NativeType::Struct | NativeType::Mapped => {
            return Err(FfiError::unsupported(format!("{tag} is not an argument type")));
        }
    })
}

/// Pointer-bearing values: pointers, `nil`, raw addresses, buffers, strings
/// and library symbols.
fn coerce_pointer<'a>(arena: &'a Bump, value: &Value) -> FfiResult<NativeArg<'a>> {
    let ptr = match value {
        Value::Buffer(buffer) => buffer.borrow_mut().as_mut_ptr().cast::<c_void>(),
        Value::String(text) => {
            if text.bytes().any(|b| b == 0) {
                return Err(FfiError::InteriorNul);
            }
            let bytes = arena.alloc_slice_fill_copy(text.len() + 1, 0u8);
            bytes[..text.len()].copy_from_slice(text.as_bytes());
            bytes.as_mut_ptr().cast::<c_void>()
        }
        Value::LibrarySymbol(symbol) => symbol
            .address()
            .ok_or_else(|| FfiError::SymbolNotFound {
                name: symbol.name().to_string(),
                library: String::new(),
            })?
            .as_ptr(),
        _ => NativePointer::from_value(value)?.as_ptr(),
    };
    Ok(NativeArg::Pointer(ptr))
}

fn coerce_struct<'a>(arena: &'a Bump, layout: &StructLayout, value: &Value) -> FfiResult<NativeArg<'a>> {
    let Value::Buffer(buffer) = value else {
        return Err(FfiError::conversion(value.class_name(), "FFI::Buffer"));
    };
    let buffer = buffer.borrow();
    let bytes = buffer
        .as_bytes()
        .get(..layout.size())
        .filter(|bytes| !bytes.is_empty())
        .ok_or(FfiError::OutOfBounds {
            offset: 0,
            width: layout.size(),
            len: buffer.total(),
        })?;
    Ok(NativeArg::Struct(arena.alloc_slice_copy(bytes)))
}

/// The type a variadic argument is passed as after C default promotions.
pub(crate) fn promote(ty: Type) -> Type {
    match ty.tag() {
        NativeType::Int8 | NativeType::Uint8 | NativeType::Int16 | NativeType::Uint16 | NativeType::Bool
            if matches!(ty, Type::Builtin(_)) =>
        {
            Type::Builtin(NativeType::Int32)
        }
        NativeType::Float32 if matches!(ty, Type::Builtin(_)) => Type::Builtin(NativeType::Float64),
        _ => ty,
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::buffer::Buffer;
    use crate::types::TypeRegistry;

    fn builtin(tag: NativeType) -> Type {
        Type::Builtin(tag)
    }

    #[test]
    fn integers_truncate_to_declared_width() {
        let arena = Bump::new();
        assert!(matches!(
            coerce(&arena, &builtin(NativeType::Uint8), &Value::Fixnum(0x1ff)).unwrap(),
            NativeArg::U8(0xff)
        ));
        assert!(matches!(
            coerce(&arena, &builtin(NativeType::Int16), &Value::Fixnum(-1)).unwrap(),
            NativeArg::I16(-1)
        ));
        assert!(matches!(
            coerce(&arena, &builtin(NativeType::Uint64), &Value::Bignum(u64::MAX as i128)).unwrap(),
            NativeArg::U64(u64::MAX)
        ));
    }

    #[test]
    fn mismatches_name_the_guest_class() {
        let arena = Bump::new();
        let err = coerce(&arena, &builtin(NativeType::Float64), &Value::symbol("x")).unwrap_err();
        assert_eq!(err.to_string(), "can't convert Symbol into Float");
        let err = coerce(&arena, &builtin(NativeType::Int32), &Value::Float(1.0)).unwrap_err();
        assert_eq!(err.to_string(), "can't convert Float into Integer");
        let err = coerce(&arena, &builtin(NativeType::Pointer), &Value::Float(1.0)).unwrap_err();
        assert_eq!(err.to_string(), "can't convert Float into Pointer");
    }

    #[test]
    fn floats_accept_integers() {
        let arena = Bump::new();
        assert!(matches!(
            coerce(&arena, &builtin(NativeType::Float64), &Value::Fixnum(3)).unwrap(),
            NativeArg::F64(v) if v == 3.0
        ));
    }

    #[test]
    fn long_double_is_unsupported() {
        let arena = Bump::new();
        let err = coerce(&arena, &builtin(NativeType::LongDouble), &Value::Float(1.0)).unwrap_err();
        assert!(matches!(err, FfiError::Unsupported(_)));
    }

    #[test]
    fn strings_are_nul_terminated_copies() {
        let arena = Bump::new();
        let NativeArg::Pointer(ptr) = coerce(&arena, &builtin(NativeType::Pointer), &Value::string("hi")).unwrap()
        else {
            panic!("expected a pointer");
        };
        let copy = unsafe { std::ffi::CStr::from_ptr(ptr.cast()) };
        assert_eq!(copy.to_str().unwrap(), "hi");
        assert!(matches!(
            coerce(&arena, &builtin(NativeType::Pointer), &Value::string("a\0b")),
            Err(FfiError::InteriorNul)
        ));
    }

    #[test]
    fn buffers_pass_their_storage() {
        let arena = Bump::new();
        let buffer = Buffer::with_length(4).unwrap().into_ref();
        let expected = buffer.borrow_mut().as_mut_ptr().cast::<c_void>();
        let arg = coerce(&arena, &builtin(NativeType::Pointer), &Value::Buffer(Rc::clone(&buffer))).unwrap();
        assert!(matches!(arg, NativeArg::Pointer(p) if p == expected));
        assert!(matches!(
            coerce(&arena, &builtin(NativeType::Pointer), &Value::Nil).unwrap(),
            NativeArg::Pointer(p) if p.is_null()
        ));
    }

    #[test]
    fn structs_by_value_copy_the_layout_bytes() {
        let arena = Bump::new();
        let registry = TypeRegistry::new();
        let layout = StructLayout::new(&registry, &[("a", Value::symbol("int32"))]).unwrap();
        let mut buffer = layout.allocate();
        buffer.put_int(0, 5).unwrap();
        let ty = Type::from(layout);
        let arg = coerce(&arena, &ty, &Value::buffer(buffer)).unwrap();
        let NativeArg::Struct(bytes) = arg else {
            panic!("expected a struct");
        };
        assert_eq!(bytes, &5i32.to_le_bytes()[..]);

        let small = Value::buffer(Buffer::with_length(2).unwrap());
        assert!(matches!(coerce(&arena, &ty, &small), Err(FfiError::OutOfBounds { .. })));
        assert!(coerce(&arena, &ty, &Value::Fixnum(1)).is_err());
    }

    #[test]
    fn mapped_values_go_through_to_native() {
        let arena = Bump::new();
        let mut registry = TypeRegistry::new();
        let ty = registry
            .define_mapped(
                NativeType::Int32,
                |v| Ok(Value::integer(expect_integer(v)? + 1)),
                |v| Ok(v),
            )
            .unwrap();
        assert!(matches!(coerce(&arena, &ty, &Value::Fixnum(41)).unwrap(), NativeArg::I32(42)));
    }

    #[test]
    fn variadic_promotions() {
        assert_eq!(promote(builtin(NativeType::Int8)), builtin(NativeType::Int32));
        assert_eq!(promote(builtin(NativeType::Uint16)), builtin(NativeType::Int32));
        assert_eq!(promote(builtin(NativeType::Float32)), builtin(NativeType::Float64));
        assert_eq!(promote(builtin(NativeType::Int64)), builtin(NativeType::Int64));
        assert_eq!(promote(builtin(NativeType::Pointer)), builtin(NativeType::Pointer));
    }
}
