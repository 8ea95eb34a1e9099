//! Guest value model.
//!
//! [`Value`] is the boxed representation the embedding runtime hands to the
//! bridge and receives back from it. Only the shapes the bridge needs to
//! distinguish are modelled; anything else the runtime owns stays on its side
//! of the boundary.

use std::fmt;
use std::rc::Rc;

use crate::buffer::{Buffer, BufferRef};
use crate::function::Function;
use crate::library::{DynamicLibrary, Symbol};
use crate::types::Type;

/// A raw native address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct NativePointer(usize);

impl NativePointer {
    pub const NULL: NativePointer = NativePointer(0);

    #[inline]
    pub const fn new(address: usize) -> Self {
        NativePointer(address)
    }

    #[inline]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        NativePointer(ptr as usize)
    }

    #[inline]
    pub const fn address(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}

impl fmt::Debug for NativePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativePointer({:#x})", self.0)
    }
}

/// A boxed guest-language value.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    /// Integer in the host's signed machine range.
    Fixnum(i64),
    /// Integer outside `i64`; wide enough for every 64-bit unsigned value.
    Bignum(i128),
    Float(f64),
    String(Rc<str>),
    /// Interned guest symbol such as `:int8`.
    Symbol(Rc<str>),
    Array(Rc<[Value]>),
    Pointer(NativePointer),
    Buffer(BufferRef),
    Type(Type),
    /// A library export (`DynamicLibrary::Symbol`), not a guest symbol.
    LibrarySymbol(Symbol),
    Library(DynamicLibrary),
    Function(Rc<Function>),
}

impl Value {
    /// Box an integer, picking `Fixnum` whenever it fits.
    pub fn integer(value: i128) -> Self {
        match i64::try_from(value) {
            Ok(v) => Value::Fixnum(v),
            Err(_) => Value::Bignum(value),
        }
    }

    pub fn symbol(name: &str) -> Self {
        Value::Symbol(Rc::from(name))
    }

    pub fn string(text: &str) -> Self {
        Value::String(Rc::from(text))
    }

    pub fn array(values: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(values.into_iter().collect())
    }

    pub fn buffer(buffer: Buffer) -> Self {
        Value::Buffer(buffer.into_ref())
    }

    /// The guest class name used in conversion errors.
    pub fn class_name(&self) -> &'static str {
        match self {
            Value::Nil => "NilClass",
            Value::Bool(true) => "TrueClass",
            Value::Bool(false) => "FalseClass",
            Value::Fixnum(_) => "Fixnum",
            Value::Bignum(_) => "Bignum",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Symbol(_) => "Symbol",
            Value::Array(_) => "Array",
            Value::Pointer(_) => "FFI::Pointer",
            Value::Buffer(_) => "FFI::Buffer",
            Value::Type(_) => "FFI::Type",
            Value::LibrarySymbol(_) => "FFI::DynamicLibrary::Symbol",
            Value::Library(_) => "FFI::DynamicLibrary",
            Value::Function(_) => "FFI::Function",
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Guest truthiness: everything except `nil` and `false`.
    #[inline]
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// The integer payload, if this is an integer.
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Fixnum(v) => Some(i128::from(*v)),
            Value::Bignum(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric payload widened to `f64`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Fixnum(v) => Some(*v as f64),
            Value::Bignum(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Name carried by a guest symbol or string.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Value::Symbol(name) | Value::String(name) => Some(name.as_ref()),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Fixnum(_) | Value::Bignum(_), Value::Fixnum(_) | Value::Bignum(_)) => {
                self.as_integer() == other.as_integer()
            }
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            (Value::Buffer(a), Value::Buffer(b)) => Rc::ptr_eq(a, b),
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::LibrarySymbol(a), Value::LibrarySymbol(b)) => {
                a.name() == b.name() && a.address() == b.address()
            }
            (Value::Library(a), Value::Library(b)) => a.same_handle(b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Type> for Value {
    fn from(ty: Type) -> Self {
        Value::Type(ty)
    }
}

impl From<Symbol> for Value {
    fn from(symbol: Symbol) -> Self {
        Value::LibrarySymbol(symbol)
    }
}

impl From<BufferRef> for Value {
    fn from(buffer: BufferRef) -> Self {
        Value::Buffer(buffer)
    }
}

impl From<NativePointer> for Value {
    fn from(pointer: NativePointer) -> Self {
        Value::Pointer(pointer)
    }
}
