//! Raw fixed-size memory with typed accessors.
//!
//! Storage is always byte-addressed. Multi-byte values are assembled and
//! split one byte at a time by positional weight in little-endian order, with
//! `u128` as the intermediate so that every 64-bit unsigned value survives a
//! round trip. Every access is bounds-checked before any byte is touched.

use std::cell::RefCell;
use std::ffi::{c_long, c_ulong};
use std::rc::Rc;

use guest_ffi_core::NativeType;

use crate::convert::{FromValue, IntoValue, expect_integer};
use crate::error::{Arity, FfiError, FfiResult};
use crate::types::Type;
use crate::value::{NativePointer, Value};

/// A buffer shared between the guest object and any Function call using it.
pub type BufferRef = Rc<RefCell<Buffer>>;

/// A mutable, fixed-length byte array.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    bytes: Vec<u8>,
    /// Bookkeeping hint only; accessors always take byte offsets.
    element_size: usize,
}

impl Buffer {
    /// `length` zeroed bytes.
    pub fn with_length(length: i64) -> FfiResult<Self> {
        let len = usize::try_from(length).map_err(|_| FfiError::InvalidLength(length))?;
        Ok(Self {
            bytes: zeroed(len, length)?,
            element_size: 1,
        })
    }

    /// Room for `count` elements of the type named by `token`.
    pub fn with_type(token: &Value, count: i64) -> FfiResult<Self> {
        let element_size = element_size_of(token)?;
        let elements = usize::try_from(count).map_err(|_| FfiError::InvalidLength(count))?;
        let len = elements
            .checked_mul(element_size)
            .ok_or(FfiError::InvalidLength(count))?;
        Ok(Self {
            bytes: zeroed(len, count)?,
            element_size,
        })
    }

    /// Guest constructor: `(length)`, `(nil, length)`, `(length, nil)` or
    /// `(type, count)`.
    pub fn new(args: &[Value]) -> FfiResult<Self> {
        match args {
            [Value::Nil, length] => Self::with_length(expect_length(length)?),
            [length] | [length, Value::Nil] if length.as_integer().is_some() => {
                Self::with_length(expect_length(length)?)
            }
            [other] | [other, Value::Nil] => Err(FfiError::conversion(other.class_name(), "Integer")),
            [token, count] => Self::with_type(token, expect_length(count)?),
            _ => Err(FfiError::ArgumentCount {
                name: "new".to_string(),
                given: args.len(),
                expected: Arity::exact(2),
            }),
        }
    }

    pub fn new_in(args: &[Value]) -> FfiResult<Self> {
        Self::new(args)
    }

    pub fn new_out(args: &[Value]) -> FfiResult<Self> {
        Self::new(args)
    }

    pub fn new_inout(args: &[Value]) -> FfiResult<Self> {
        Self::new(args)
    }

    pub fn alloc_in(args: &[Value]) -> FfiResult<Self> {
        Self::new(args)
    }

    pub fn alloc_out(args: &[Value]) -> FfiResult<Self> {
        Self::new(args)
    }

    pub fn alloc_inout(args: &[Value]) -> FfiResult<Self> {
        Self::new(args)
    }

    /// Copy of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            element_size: 1,
        }
    }

    pub fn into_ref(self) -> BufferRef {
        Rc::new(RefCell::new(self))
    }

    /// Storage size in bytes.
    #[inline]
    pub fn total(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.bytes.as_mut_ptr()
    }

    /// Zero every byte.
    pub fn clear(&mut self) -> &mut Self {
        self.bytes.fill(0);
        self
    }

    fn range(&self, offset: i64, width: usize) -> FfiResult<std::ops::Range<usize>> {
        let out_of_bounds = || FfiError::OutOfBounds {
            offset,
            width,
            len: self.bytes.len(),
        };
        let start = usize::try_from(offset).map_err(|_| out_of_bounds())?;
        let end = start.checked_add(width).ok_or_else(out_of_bounds)?;
        if end > self.bytes.len() {
            return Err(out_of_bounds());
        }
        Ok(start..end)
    }

    /// Unsigned little-endian integer of `width` bytes at `offset`.
    pub fn read_uint(&self, offset: i64, width: usize) -> FfiResult<u128> {
        let range = self.range(offset, width)?;
        let value = self.bytes[range]
            .iter()
            .enumerate()
            .fold(0u128, |acc, (i, byte)| acc | (u128::from(*byte) << (8 * i)));
        Ok(value)
    }

    /// Sign-extended little-endian integer of `width` bytes at `offset`.
    pub fn read_int(&self, offset: i64, width: usize) -> FfiResult<i128> {
        let raw = self.read_uint(offset, width)?;
        if width == 0 {
            return Ok(0);
        }
        let shift = 128 - 8 * width as u32;
        Ok(((raw << shift) as i128) >> shift)
    }

    /// Store the low `width` bytes of `value` at `offset`.
    pub fn write_uint(&mut self, offset: i64, width: usize, value: u128) -> FfiResult<()> {
        let range = self.range(offset, width)?;
        for (i, byte) in self.bytes[range].iter_mut().enumerate() {
            *byte = (value >> (8 * i)) as u8;
        }
        Ok(())
    }

    /// Read one scalar of kind `tag`.
    pub fn get(&self, offset: i64, tag: NativeType) -> FfiResult<Value> {
        let width = tag.size();
        match tag {
            _ if tag.is_integer() && tag.is_signed() => {
                Ok(Value::integer(self.read_int(offset, width)?))
            }
            _ if tag.is_integer() => Ok(Value::integer(self.read_uint(offset, width)? as i128)),
            NativeType::Float32 => Ok(Value::Float(f64::from(f32::from_bits(
                self.read_uint(offset, width)? as u32,
            )))),
            NativeType::Float64 => Ok(Value::Float(f64::from_bits(
                self.read_uint(offset, width)? as u64,
            ))),
            NativeType::Pointer => Ok(Value::Pointer(NativePointer::new(
                self.read_uint(offset, width)? as usize,
            ))),
            NativeType::Bool => Ok(Value::Bool(self.read_uint(offset, width)? != 0)),
            other => Err(FfiError::unsupported(format!(
                "cannot read {other} from a buffer"
            ))),
        }
    }

    /// Write one scalar of kind `tag`. Integers are truncated to the width.
    pub fn put(&mut self, offset: i64, tag: NativeType, value: &Value) -> FfiResult<()> {
        let width = tag.size();
        let raw = match tag {
            _ if tag.is_integer() => expect_integer(value)? as u128,
            NativeType::Float32 => u128::from(f32::from_value(value)?.to_bits()),
            NativeType::Float64 => u128::from(f64::from_value(value)?.to_bits()),
            NativeType::Pointer => NativePointer::from_value(value)?.address() as u128,
            NativeType::Bool => u128::from(bool::from_value(value)?),
            other => {
                return Err(FfiError::unsupported(format!(
                    "cannot write {other} to a buffer"
                )));
            }
        };
        self.write_uint(offset, width, raw)
    }

    /// Guest method dispatch: `total`, `element_size`, `clear`,
    /// `get_<kind>(offset)` and `put_<kind>(offset, value)`.
    ///
    /// `put_*` and `clear` answer the buffer itself so calls chain.
    pub fn send(this: &BufferRef, method: &str, args: &[Value]) -> FfiResult<Value> {
        if let Some(kind) = method.strip_prefix("get_") {
            let tag = accessor_tag(kind).ok_or_else(|| FfiError::no_method(method, "FFI::Buffer"))?;
            let [offset] = args else {
                return Err(arity(method, args, 1));
            };
            return this.borrow().get(expect_offset(offset)?, tag);
        }
        if let Some(kind) = method.strip_prefix("put_") {
            let tag = accessor_tag(kind).ok_or_else(|| FfiError::no_method(method, "FFI::Buffer"))?;
            let [offset, value] = args else {
                return Err(arity(method, args, 2));
            };
            this.borrow_mut().put(expect_offset(offset)?, tag, value)?;
            return Ok(Value::Buffer(Rc::clone(this)));
        }
        match (method, args) {
            ("total" | "length" | "size", []) => Ok(this.borrow().total().into_value()),
            ("element_size", []) => Ok(this.borrow().element_size().into_value()),
            ("clear", []) => {
                this.borrow_mut().clear();
                Ok(Value::Buffer(Rc::clone(this)))
            }
            ("total" | "length" | "size" | "element_size" | "clear", _) => {
                Err(arity(method, args, 0))
            }
            _ => Err(FfiError::no_method(method, "FFI::Buffer")),
        }
    }
}

macro_rules! typed_accessors {
    ($($get:ident, $put:ident => $ty:ty, $tag:expr;)*) => {
        impl Buffer {
            $(
                pub fn $get(&self, offset: i64) -> FfiResult<$ty> {
                    <$ty>::from_value(&self.get(offset, $tag)?)
                }

                pub fn $put(&mut self, offset: i64, value: $ty) -> FfiResult<&mut Self> {
                    self.put(offset, $tag, &value.into_value())?;
                    Ok(self)
                }
            )*
        }
    };
}

typed_accessors! {
    get_char, put_char => i8, NativeType::Int8;
    get_uchar, put_uchar => u8, NativeType::Uint8;
    get_short, put_short => i16, NativeType::Int16;
    get_ushort, put_ushort => u16, NativeType::Uint16;
    get_int, put_int => i32, NativeType::Int32;
    get_uint, put_uint => u32, NativeType::Uint32;
    get_long, put_long => c_long, NativeType::Long;
    get_ulong, put_ulong => c_ulong, NativeType::Ulong;
    get_long_long, put_long_long => i64, NativeType::Int64;
    get_ulong_long, put_ulong_long => u64, NativeType::Uint64;
    get_float, put_float => f32, NativeType::Float32;
    get_double, put_double => f64, NativeType::Float64;
    get_pointer, put_pointer => NativePointer, NativeType::Pointer;
}

/// The scalar an accessor suffix (`uint`, `long_long`, `int16`) names.
fn accessor_tag(kind: &str) -> Option<NativeType> {
    guest_ffi_core::resolve_name(kind)
        .filter(|tag| tag.is_scalar() && *tag != NativeType::LongDouble)
}

fn element_size_of(token: &Value) -> FfiResult<usize> {
    let size = match token {
        Value::Type(ty) => ty.size(),
        Value::Symbol(name) | Value::String(name) => guest_ffi_core::resolve_name(name)
            .map(|tag| Type::Builtin(tag).size())
            .unwrap_or(0),
        other => return Err(FfiError::conversion(other.class_name(), "Type")),
    };
    if size == 0 {
        return Err(FfiError::conversion(token.class_name(), "Type"));
    }
    Ok(size)
}

/// `len` zero bytes, or `InvalidLength(requested)` when the allocator refuses.
fn zeroed(len: usize, requested: i64) -> FfiResult<Vec<u8>> {
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(len)
        .map_err(|_| FfiError::InvalidLength(requested))?;
    bytes.resize(len, 0);
    Ok(bytes)
}

pub(crate) fn expect_length(value: &Value) -> FfiResult<i64> {
    let n = expect_integer(value)?;
    i64::try_from(n).map_err(|_| FfiError::InvalidLength(i64::MAX))
}

fn expect_offset(value: &Value) -> FfiResult<i64> {
    let n = expect_integer(value)?;
    // Anything past i64 is out of bounds anyway.
    Ok(i64::try_from(n).unwrap_or(i64::MIN))
}

fn arity(method: &str, args: &[Value], expected: usize) -> FfiError {
    FfiError::ArgumentCount {
        name: method.to_string(),
        given: args.len(),
        expected: Arity::exact(expected),
    }
}
