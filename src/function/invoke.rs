//! The libffi call and native return decoding.

use std::ffi::{c_long, c_ulong, c_void};
use std::rc::Rc;

use guest_ffi_core::NativeType;
use libffi::low::ffi_arg;
use libffi::middle::{Arg, Cif, CodePtr};
use libffi::raw;

use super::marshal::NativeArg;
use crate::buffer::Buffer;
use crate::error::{FfiError, FfiResult};
use crate::types::{MappedType, Type};
use crate::value::{NativePointer, Value};

/// How the return value comes back, decided before the call is made.
pub(crate) enum ReturnKind {
    Scalar(NativeType),
    Mapped(Rc<MappedType>, NativeType),
    Struct(usize),
}

impl ReturnKind {
    pub(crate) fn of(ty: &Type) -> FfiResult<Self> {
        let kind = match ty {
            Type::Builtin(tag) => ReturnKind::Scalar(*tag),
            Type::Mapped(mapped) => ReturnKind::Mapped(Rc::clone(mapped), mapped.native_type()?),
            Type::StructByReference(_) => ReturnKind::Scalar(NativeType::Pointer),
            Type::Struct(layout) => return Ok(ReturnKind::Struct(layout.size())),
        };
        match kind {
            ReturnKind::Scalar(tag) | ReturnKind::Mapped(_, tag)
                if !tag.is_scalar() && tag != NativeType::Void =>
            {
                Err(FfiError::unsupported(format!("{tag} is not a return type")))
            }
            ReturnKind::Scalar(NativeType::LongDouble) | ReturnKind::Mapped(_, NativeType::LongDouble) => {
                Err(FfiError::unsupported("LONGDOUBLE values cannot be marshaled"))
            }
            kind => Ok(kind),
        }
    }

    /// Guest-side conversion of the raw native result. Runs after leaving
    /// native code, since mapped conversions may call back into the guest.
    pub(crate) fn finish(&self, raw: Value) -> FfiResult<Value> {
        match self {
            ReturnKind::Mapped(mapped, _) => mapped.from_native(raw),
            _ => Ok(raw),
        }
    }
}

/// Call `code` and decode its result.
///
/// # Safety
///
/// `code` must be the address of a function whose C signature is the one
/// `cif` describes, and `args` must match the cif's argument types.
pub(crate) unsafe fn invoke(
    cif: &Cif,
    code: CodePtr,
    args: &[NativeArg<'_>],
    kind: &ReturnKind,
) -> FfiResult<Value> {
    let ffi_args: Vec<Arg> = args.iter().map(NativeArg::as_arg).collect();
    match kind {
        ReturnKind::Scalar(tag) | ReturnKind::Mapped(_, tag) => unsafe { call_scalar(cif, code, &ffi_args, *tag) },
        ReturnKind::Struct(size) => {
            let mut raw_args: Vec<*mut c_void> = args.iter().map(NativeArg::as_raw).collect();
            // Some ABIs store whole registers; leave room past the struct.
            let mut ret = vec![0u8; size.next_multiple_of(16).max(16)];
            unsafe {
                raw::ffi_call(
                    cif.as_raw_ptr(),
                    Some(*code.as_safe_fun()),
                    ret.as_mut_ptr().cast::<c_void>(),
                    raw_args.as_mut_ptr(),
                );
            }
            Ok(Value::buffer(Buffer::from_bytes(&ret[..*size])))
        }
    }
}

/// Integer returns narrower than a register come back widened to `ffi_arg`.
unsafe fn call_scalar(cif: &Cif, code: CodePtr, args: &[Arg], tag: NativeType) -> FfiResult<Value> {
    let value = unsafe {
        match tag {
            NativeType::Void => {
                cif.call::<()>(code, args);
                Value::Nil
            }
            NativeType::Int8 => Value::integer(i128::from(cif.call::<ffi_arg>(code, args) as i8)),
            NativeType::Uint8 => Value::integer(i128::from(cif.call::<ffi_arg>(code, args) as u8)),
            NativeType::Int16 => Value::integer(i128::from(cif.call::<ffi_arg>(code, args) as i16)),
            NativeType::Uint16 => Value::integer(i128::from(cif.call::<ffi_arg>(code, args) as u16)),
            NativeType::Int32 => Value::integer(i128::from(cif.call::<ffi_arg>(code, args) as i32)),
            NativeType::Uint32 => Value::integer(i128::from(cif.call::<ffi_arg>(code, args) as u32)),
            NativeType::Bool => Value::Bool(cif.call::<ffi_arg>(code, args) as u8 != 0),
            NativeType::Int64 => Value::integer(i128::from(cif.call::<i64>(code, args))),
            NativeType::Uint64 => Value::integer(i128::from(cif.call::<u64>(code, args))),
            NativeType::Long => Value::integer(i128::from(cif.call::<c_long>(code, args))),
            NativeType::Ulong => Value::integer(i128::from(cif.call::<c_ulong>(code, args))),
            NativeType::Float32 => Value::Float(f64::from(cif.call::<f32>(code, args))),
            NativeType::Float64 => Value::Float(cif.call::<f64>(code, args)),
            NativeType::Pointer => Value::Pointer(NativePointer::new(cif.call::<usize>(code, args))),
            NativeType::LongDouble | NativeType::Varargs | NativeType::Struct | NativeType::Mapped => {
                return Err(FfiError::unsupported(format!("{tag} is not a return type")));
            }
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeRegistry;

    #[test]
    fn return_kinds() {
        assert!(matches!(
            ReturnKind::of(&Type::Builtin(NativeType::Void)),
            Ok(ReturnKind::Scalar(NativeType::Void))
        ));
        assert!(ReturnKind::of(&Type::Builtin(NativeType::LongDouble)).is_err());
        assert!(ReturnKind::of(&Type::Builtin(NativeType::Varargs)).is_err());
    }

    #[test]
    fn mapped_returns_finish_through_from_native() {
        let mut registry = TypeRegistry::new();
        let ty = registry
            .define_mapped(NativeType::Int32, |v| Ok(v.clone()), |v| {
                Ok(Value::Bool(v.as_integer() == Some(1)))
            })
            .unwrap();
        let kind = ReturnKind::of(&ty).unwrap();
        assert_eq!(kind.finish(Value::Fixnum(1)).unwrap(), Value::Bool(true));
    }
}
