//! Foreign function interface for a dynamic guest language.
//!
//! The guest describes native signatures with type tokens, opens shared
//! libraries, and calls their exports with guest values:
//!
//! ```no_run
//! use guest_ffi::prelude::*;
//!
//! let ffi = FfiModule::new();
//! let libc = ffi.open_library(&Value::Nil, &Value::Nil)?;
//! let strlen = ffi.function(
//!     &Value::symbol("ulong"),
//!     &Value::array([Value::symbol("string")]),
//!     &Value::LibrarySymbol(libc.find("strlen")?),
//!     CallOptions::new(),
//! )?;
//! assert_eq!(strlen.call(&[Value::string("hello")])?, Value::Fixnum(5));
//! # Ok::<(), FfiError>(())
//! ```

pub mod buffer;
pub mod config;
pub mod convert;
pub mod error;
pub mod function;
pub mod library;
pub mod module;
pub mod object;
pub mod struct_layout;
pub mod types;
pub mod value;

pub use guest_ffi_core::{ALIASES, NativeType, Platform, TypeHash, resolve_alias};

pub mod prelude {
    pub use crate::buffer::{Buffer, BufferRef};
    pub use crate::config::{CallOptions, CallingConvention, FfiConfig};
    pub use crate::convert::{FromValue, IntoValue};
    pub use crate::error::{Arity, FfiError, FfiResult};
    pub use crate::function::{Function, NativeCall, NativeCallHooks, NoopHooks};
    pub use crate::library::{DynamicLibrary, LoadFlags, Symbol};
    pub use crate::module::FfiModule;
    pub use crate::object::{GuestObject, MethodHost, NativeMethod};
    pub use crate::struct_layout::{StructByReference, StructLayout};
    pub use crate::types::{CustomConversion, MappedType, Type, TypeRegistry};
    pub use crate::value::{NativePointer, Value};
    pub use crate::{NativeType, Platform};
}
