//! Error types for the FFI bridge.
//!
//! Every failure the guest can observe is an [`FfiError`]. The embedding
//! runtime raises it as the guest exception named by [`FfiError::guest_class`]
//! and unwinds to the nearest guest-level handler; nothing here retries or
//! recovers.

use std::fmt;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type FfiResult<T> = Result<T, FfiError>;

/// Number of arguments a signature accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub fixed: usize,
    pub variadic: bool,
}

impl Arity {
    pub const fn exact(fixed: usize) -> Self {
        Self { fixed, variadic: false }
    }

    pub const fn at_least(fixed: usize) -> Self {
        Self { fixed, variadic: true }
    }

    /// Whether `given` arguments satisfy this arity.
    pub const fn accepts(&self, given: usize) -> bool {
        if self.variadic {
            given >= self.fixed
        } else {
            given == self.fixed
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.variadic {
            write!(f, "{}+", self.fixed)
        } else {
            write!(f, "{}", self.fixed)
        }
    }
}

/// Errors raised by type resolution, marshaling, loading and buffer access.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FfiError {
    /// A guest value could not be converted into the expected category.
    ///
    /// `from` is the guest class of the offending value (`"Fixnum"`,
    /// `"Symbol"`), `into` the category that was required (`"Type"`).
    #[error("can't convert {from} into {into}")]
    TypeConversion { from: &'static str, into: &'static str },

    /// Call-site argument count disagrees with the declared signature.
    #[error("wrong number of arguments for '{name}' (given {given}, expected {expected})")]
    ArgumentCount {
        name: String,
        given: usize,
        expected: Arity,
    },

    /// A shared library could not be opened.
    #[error("Could not open library '{name}': {reason}")]
    LibraryLoad { name: String, reason: String },

    /// An exported name is absent from the searched libraries.
    #[error("Function '{name}' not found in [{library}]")]
    SymbolNotFound { name: String, library: String },

    /// A memory access would leave the storage bounds.
    #[error("memory access offset={offset} size={width} is out of bounds (size {len})")]
    OutOfBounds { offset: i64, width: usize, len: usize },

    /// A buffer or struct size was negative or overflowed.
    #[error("invalid length {0}")]
    InvalidLength(i64),

    /// A struct declared the same field name twice.
    #[error("duplicate struct field '{0}'")]
    DuplicateField(String),

    /// A struct field lookup by name failed.
    #[error("no such field '{0}'")]
    UnknownField(String),

    /// A resolvable type that cannot be used in this position.
    #[error("{0}")]
    Unsupported(String),

    /// A string passed as a pointer contains an interior NUL byte.
    #[error("string contains null byte")]
    InteriorNul,

    /// The call options named a calling convention other than C.
    #[error("unsupported calling convention '{0}'")]
    UnsupportedConvention(String),

    /// A typedef would redefine a canonical tag.
    #[error("cannot redefine native type '{0}'")]
    ReservedTypeName(String),

    /// A method that neither the receiver nor its forwarding handler defines.
    #[error("undefined method '{method}' for {receiver}")]
    NoMethod { method: String, receiver: String },

    /// A guest-level conversion hook reported a failure.
    #[error("conversion hook failed: {0}")]
    Hook(String),
}

impl FfiError {
    /// Shorthand for a [`FfiError::TypeConversion`].
    pub fn conversion(from: &'static str, into: &'static str) -> Self {
        FfiError::TypeConversion { from, into }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        FfiError::Unsupported(message.into())
    }

    pub fn no_method(method: impl Into<String>, receiver: impl Into<String>) -> Self {
        FfiError::NoMethod {
            method: method.into(),
            receiver: receiver.into(),
        }
    }

    /// The guest exception class the embedding runtime raises for this error.
    pub fn guest_class(&self) -> &'static str {
        match self {
            FfiError::TypeConversion { .. } => "TypeError",
            FfiError::ArgumentCount { .. } | FfiError::InteriorNul => "ArgumentError",
            FfiError::LibraryLoad { .. } => "LoadError",
            FfiError::SymbolNotFound { .. } => "FFI::NotFoundError",
            FfiError::OutOfBounds { .. } => "IndexError",
            FfiError::InvalidLength(_) => "RangeError",
            FfiError::DuplicateField(_) | FfiError::UnknownField(_) => "ArgumentError",
            FfiError::Unsupported(_) | FfiError::UnsupportedConvention(_) => "TypeError",
            FfiError::ReservedTypeName(_) => "ArgumentError",
            FfiError::NoMethod { .. } => "NoMethodError",
            FfiError::Hook(_) => "RuntimeError",
        }
    }
}
