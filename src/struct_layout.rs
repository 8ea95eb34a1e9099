//! C struct layout and by-reference passing.
//!
//! Offsets follow the standard C packing rule: each field starts at the
//! first offset at or after the previous field's end that is a multiple of
//! its alignment, and the total size is rounded up to the largest member
//! alignment.

use std::fmt;
use std::rc::Rc;

use guest_ffi_core::{NativeType, TypeHash};
use libffi::middle;
use log::debug;
use rustc_hash::FxHashMap;

use crate::buffer::Buffer;
use crate::error::{FfiError, FfiResult};
use crate::types::{Type, TypeRegistry};
use crate::value::Value;

/// One member of a layout.
#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    pub name: String,
    pub ty: Type,
    pub offset: usize,
}

/// Ordered fields with computed offsets.
#[derive(Clone)]
pub struct StructLayout {
    fields: Vec<StructField>,
    index: FxHashMap<String, usize>,
    size: usize,
    alignment: usize,
    hash: TypeHash,
}

impl StructLayout {
    /// Resolve each `(name, type token)` member and lay them out.
    pub fn new(registry: &TypeRegistry, members: &[(&str, Value)]) -> FfiResult<Self> {
        let resolved = members
            .iter()
            .map(|(name, token)| Ok((name.to_string(), registry.resolve(token)?)))
            .collect::<FfiResult<Vec<_>>>()?;
        Self::from_types(resolved)
    }

    /// Lay out already resolved members.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn from_types(members: impl IntoIterator<Item = (String, Type)>) -> FfiResult<Self> {
        let mut fields = Vec::new();
        let mut index = FxHashMap::default();
        let mut end = 0usize;
        let mut alignment = 1usize;

        for (name, ty) in members {
            check_member(&name, &ty)?;
            if index.contains_key(&name) {
                return Err(FfiError::DuplicateField(name));
            }
            let align = ty.alignment().max(1);
            let offset = align_up(end, align);
            end = offset + ty.size();
            alignment = alignment.max(align);
            index.insert(name.clone(), fields.len());
            fields.push(StructField { name, ty, offset });
        }

        let hash = TypeHash::from_struct(fields.iter().map(|f| (f.name.as_str(), f.ty.type_hash())));
        let layout = Self {
            size: align_up(end, alignment),
            alignment,
            fields,
            index,
            hash,
        };
        debug!(
            "struct layout {} fields, size {}, align {}",
            layout.fields.len(),
            layout.size,
            layout.alignment
        );
        Ok(layout)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn type_hash(&self) -> TypeHash {
        self.hash
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[StructField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.field(name).map(|f| f.offset)
    }

    /// A libffi structure type mirroring this layout.
    pub fn ffi_type(&self) -> FfiResult<middle::Type> {
        let members = self
            .fields
            .iter()
            .map(|f| f.ty.ffi_type())
            .collect::<FfiResult<Vec<_>>>()?;
        Ok(middle::Type::structure(members))
    }

    /// Zeroed storage for one instance.
    pub fn allocate(&self) -> Buffer {
        Buffer::from_bytes(&vec![0; self.size])
    }

    /// Read field `name` out of `buffer`.
    ///
    /// Nested structs come back as a copy of their bytes.
    pub fn read_field(&self, buffer: &Buffer, name: &str) -> FfiResult<Value> {
        let field = self.lookup(name)?;
        let offset = field.offset as i64;
        match &field.ty {
            Type::Builtin(tag) => buffer.get(offset, *tag),
            Type::Mapped(mapped) => mapped.from_native(buffer.get(offset, mapped.native_type()?)?),
            Type::StructByReference(_) => buffer.get(offset, NativeType::Pointer),
            Type::Struct(nested) => {
                let end = field.offset + nested.size();
                let bytes = buffer.as_bytes().get(field.offset..end).ok_or(FfiError::OutOfBounds {
                    offset,
                    width: nested.size(),
                    len: buffer.total(),
                })?;
                Ok(Value::buffer(Buffer::from_bytes(bytes)))
            }
        }
    }

    /// Write `value` into field `name` of `buffer`.
    pub fn write_field(&self, buffer: &mut Buffer, name: &str, value: &Value) -> FfiResult<()> {
        let field = self.lookup(name)?;
        let offset = field.offset as i64;
        match &field.ty {
            Type::Builtin(tag) => buffer.put(offset, *tag, value),
            Type::Mapped(mapped) => {
                let native = mapped.to_native(value)?;
                buffer.put(offset, mapped.native_type()?, &native)
            }
            Type::StructByReference(_) => buffer.put(offset, NativeType::Pointer, value),
            Type::Struct(nested) => {
                let Value::Buffer(source) = value else {
                    return Err(FfiError::conversion(value.class_name(), "FFI::Buffer"));
                };
                let source = source.borrow();
                let bytes = source.as_bytes().get(..nested.size()).ok_or(FfiError::OutOfBounds {
                    offset: 0,
                    width: nested.size(),
                    len: source.total(),
                })?;
                let len = buffer.total();
                let target = buffer
                    .as_bytes_mut()
                    .get_mut(field.offset..field.offset + nested.size())
                    .ok_or(FfiError::OutOfBounds {
                        offset,
                        width: nested.size(),
                        len,
                    })?;
                target.copy_from_slice(bytes);
                Ok(())
            }
        }
    }

    fn lookup(&self, name: &str) -> FfiResult<&StructField> {
        self.field(name)
            .ok_or_else(|| FfiError::UnknownField(name.to_string()))
    }
}

fn check_member(name: &str, ty: &Type) -> FfiResult<()> {
    match ty {
        Type::Builtin(tag) if !tag.is_scalar() => Err(FfiError::unsupported(format!(
            "struct field '{name}' cannot have type {tag}"
        ))),
        _ => Ok(()),
    }
}

#[inline]
fn align_up(offset: usize, align: usize) -> usize {
    offset.div_ceil(align) * align
}

impl fmt::Debug for StructLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("StructLayout");
        for field in &self.fields {
            s.field(&field.name, &(field.offset, field.ty.name()));
        }
        s.field("size", &self.size).finish()
    }
}

/// "Pass the address of an instance of this layout."
#[derive(Clone)]
pub struct StructByReference {
    layout: Rc<StructLayout>,
}

impl StructByReference {
    pub fn new(layout: Rc<StructLayout>) -> Self {
        Self { layout }
    }

    /// Wrap a struct `Type`; anything else is a conversion error.
    pub fn from_type(ty: &Type) -> FfiResult<Self> {
        match ty {
            Type::Struct(layout) => Ok(Self::new(Rc::clone(layout))),
            Type::StructByReference(by_ref) => Ok(by_ref.clone()),
            other => Err(FfiError::conversion(type_class(other), "FFI::StructLayout")),
        }
    }

    pub fn layout(&self) -> &Rc<StructLayout> {
        &self.layout
    }
}

fn type_class(ty: &Type) -> &'static str {
    match ty {
        Type::Mapped(_) => "FFI::Type::Mapped",
        _ => "FFI::Type",
    }
}

impl fmt::Debug for StructByReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StructByReference({})", self.layout.type_hash())
    }
}
