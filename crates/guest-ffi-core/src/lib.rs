//! Core tables for the guest FFI bridge.
//!
//! Everything in this crate is pure data: no dynamic loading, no guest values,
//! no interpreter state. The root `guest-ffi` crate builds the type registry,
//! buffers, struct layouts and the calling bridge on top of it.
//!
//! - [`Platform`] - host sizes of the native scalar kinds
//! - [`NativeType`] - the closed set of canonical type tags
//! - [`alias`] - convenience names (`CHAR`, `STRING`, ...) mapped to tags
//! - [`TypeHash`] - deterministic identity for mapped and struct types

pub mod alias;
mod native_type;
mod platform;
mod type_hash;

pub use alias::{ALIASES, resolve_alias, resolve_name};
pub use native_type::NativeType;
pub use platform::Platform;
pub use type_hash::{TypeHash, hash_constants};
