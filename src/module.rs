//! The guest-facing `FFI` namespace.
//!
//! [`FfiModule`] owns the state the guest shares across calls (the type
//! registry, loader configuration and native-call hooks) and is where guest
//! constants and factory calls land.

use std::rc::Rc;

use guest_ffi_core::Platform;

use crate::buffer::{Buffer, expect_length};
use crate::config::{CallOptions, FfiConfig};
use crate::error::{FfiError, FfiResult};
use crate::function::{Function, NativeCallHooks, NoopHooks};
use crate::library::{DynamicLibrary, LoadFlags, Symbol};
use crate::struct_layout::StructLayout;
use crate::types::{GuestHandler, MappedType, Type, TypeRegistry};
use crate::value::Value;

pub struct FfiModule {
    registry: TypeRegistry,
    config: FfiConfig,
    hooks: Rc<dyn NativeCallHooks>,
}

impl Default for FfiModule {
    fn default() -> Self {
        Self::new()
    }
}

impl FfiModule {
    pub fn new() -> Self {
        Self::with_config(FfiConfig::default())
    }

    pub fn with_config(config: FfiConfig) -> Self {
        Self {
            registry: TypeRegistry::new(),
            config,
            hooks: Rc::new(NoopHooks),
        }
    }

    /// Hooks installed on every Function this module builds from now on.
    pub fn with_hooks(mut self, hooks: Rc<dyn NativeCallHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &FfiConfig {
        &self.config
    }

    /// `DynamicLibrary.open(name, flags)`.
    ///
    /// A nil name opens the current process. Nil flags fall back to the
    /// configured defaults.
    pub fn open_library(&self, name: &Value, flags: &Value) -> FfiResult<DynamicLibrary> {
        let flags = match flags {
            Value::Nil => None,
            other => {
                let bits = other
                    .as_integer()
                    .ok_or_else(|| FfiError::conversion(other.class_name(), "Integer"))?;
                Some(LoadFlags::from_raw(bits as std::ffi::c_int))
            }
        };
        match name {
            Value::Nil => Ok(DynamicLibrary::open_current()),
            other => {
                let name = other
                    .as_name()
                    .ok_or_else(|| FfiError::conversion(other.class_name(), "String"))?;
                DynamicLibrary::open_with_config(name, flags, &self.config)
            }
        }
    }

    /// `Function.new(return_type, [param_types], symbol, options)`.
    pub fn function(
        &self,
        return_type: &Value,
        param_types: &Value,
        symbol: &Value,
        options: CallOptions,
    ) -> FfiResult<Function> {
        let Value::Array(params) = param_types else {
            return Err(FfiError::conversion(param_types.class_name(), "Array"));
        };
        let function = Function::new(&self.registry, return_type, params, symbol, options)?;
        Ok(function.with_hooks(Rc::clone(&self.hooks)))
    }

    /// A symbol to be resolved when its Function is attached.
    pub fn symbol(&self, name: &str) -> Symbol {
        Symbol::unresolved(name)
    }

    /// `Buffer.new(...)`, with type tokens resolved through this registry's
    /// typedefs as well as the builtin names.
    pub fn buffer(&self, args: &[Value]) -> FfiResult<Buffer> {
        match args {
            [token @ (Value::Symbol(_) | Value::String(_)), count] if self.is_typedef(token) => {
                let element = self.registry.resolve(token)?;
                Buffer::with_type(&Value::Type(element), expect_length(count)?)
            }
            _ => Buffer::new(args),
        }
    }

    /// `StructLayout.new(name, type, ...)`.
    pub fn struct_layout(&self, members: &[(&str, Value)]) -> FfiResult<Type> {
        Ok(Type::from(StructLayout::new(&self.registry, members)?))
    }

    /// `Type::Mapped.new(converter)`, registered with this module.
    pub fn mapped(&mut self, receiver: Value, handler: GuestHandler) -> Type {
        self.registry
            .register_mapped(MappedType::from_guest(receiver, handler))
    }

    /// Look up a constant by its guest path, such as `TYPE_INT32`,
    /// `Platform::ADDRESS_SIZE`, `Type::UINT8` or `DynamicLibrary::RTLD_LAZY`.
    ///
    /// `TypeDefs` and `Types` are `[name, Type]` pair tables: every resolvable
    /// name, and the canonical tags only.
    pub fn constant(&self, path: &str) -> Option<Value> {
        let (scope, name) = path.rsplit_once("::").unwrap_or(("", path));
        match scope {
            "" => match name {
                "TypeDefs" => Some(self.typedef_table()),
                "Types" => Some(Value::array(crate::NativeType::PRIMITIVES.iter().map(|tag| {
                    Value::array([Value::symbol(tag.name()), Value::Type(Type::Builtin(*tag))])
                }))),
                _ => TypeRegistry::type_constants()
                    .into_iter()
                    .find(|(constant, _)| constant == name)
                    .map(|(_, id)| Value::Fixnum(i64::from(id))),
            },
            "Platform" => Platform::size_constant(name).map(|size| Value::Fixnum(size as i64)),
            "Type" | "NativeType" => self.registry.resolve_name(name).map(Value::Type),
            "DynamicLibrary" => LoadFlags::constants()
                .into_iter()
                .find(|(constant, _)| *constant == name)
                .map(|(_, bits)| Value::Fixnum(i64::from(bits))),
            // Placeholder class; the guest never instantiates it.
            "StructLayout" if name == "Field" => Some(Value::Nil),
            _ => None,
        }
    }

    fn typedef_table(&self) -> Value {
        Value::array(
            self.registry
                .typedefs()
                .into_iter()
                .map(|(name, ty)| Value::array([Value::symbol(&name), Value::Type(ty)])),
        )
    }

    fn is_typedef(&self, token: &Value) -> bool {
        token
            .as_name()
            .is_some_and(|name| guest_ffi_core::resolve_name(name).is_none() && self.registry.resolve_name(name).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NativeType;

    #[test]
    fn platform_and_type_constants() {
        let ffi = FfiModule::new();
        assert_eq!(ffi.constant("Platform::INT32_SIZE"), Some(Value::Fixnum(4)));
        assert_eq!(
            ffi.constant("Platform::ADDRESS_SIZE"),
            Some(Value::Fixnum(size_of::<usize>() as i64))
        );
        assert_eq!(ffi.constant("TYPE_VOID"), Some(Value::Fixnum(0)));
        assert_eq!(
            ffi.constant("Type::UCHAR"),
            Some(Value::Type(Type::Builtin(NativeType::Uint8)))
        );
        assert_eq!(
            ffi.constant("NativeType::INT32"),
            Some(Value::Type(Type::Builtin(NativeType::Int32)))
        );
        assert_eq!(ffi.constant("StructLayout::Field"), Some(Value::Nil));
        assert_eq!(ffi.constant("Type::STRUCT"), None);
        assert_eq!(ffi.constant("Nope::X"), None);
    }

    #[test]
    fn load_flag_constants() {
        let ffi = FfiModule::new();
        let lazy = ffi.constant("DynamicLibrary::RTLD_LAZY").unwrap();
        assert_eq!(lazy, Value::Fixnum(i64::from(LoadFlags::LAZY.bits())));
    }

    #[test]
    fn typedefs_table_lists_aliases() {
        let ffi = FfiModule::new();
        let Some(Value::Array(rows)) = ffi.constant("TypeDefs") else {
            panic!("TypeDefs is an array");
        };
        assert!(rows.iter().any(|row| {
            matches!(row, Value::Array(pair)
                if pair[0] == Value::symbol("SCHAR")
                    && pair[1] == Value::Type(Type::Builtin(NativeType::Int8)))
        }));
    }

    #[test]
    fn types_table_pairs_canonical_tags() {
        let ffi = FfiModule::new();
        let Some(Value::Array(rows)) = ffi.constant("Types") else {
            panic!("Types is an array");
        };
        assert_eq!(rows.len(), NativeType::PRIMITIVES.len());
        assert!(rows.contains(&Value::array([
            Value::symbol("INT32"),
            Value::Type(Type::Builtin(NativeType::Int32)),
        ])));
        assert!(!rows.iter().any(|row| {
            matches!(row, Value::Array(pair) if pair[0] == Value::symbol("SCHAR"))
        }));
    }

    #[test]
    fn open_library_arguments() {
        let ffi = FfiModule::new();
        let current = ffi.open_library(&Value::Nil, &Value::Nil).unwrap();
        assert_eq!(current.name(), "[current process]");
        let err = ffi.open_library(&Value::Nil, &Value::string("lazy")).unwrap_err();
        assert_eq!(err.to_string(), "can't convert String into Integer");
        let err = ffi
            .open_library(&Value::string("libdefinitely-not-here.so"), &Value::Nil)
            .unwrap_err();
        assert!(matches!(err, FfiError::LibraryLoad { .. }));
    }

    #[test]
    fn function_params_must_be_an_array() {
        let ffi = FfiModule::new();
        let symbol = Value::LibrarySymbol(ffi.symbol("abs"));
        let err = ffi
            .function(&Value::symbol("int"), &Value::symbol("int"), &symbol, CallOptions::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "can't convert Symbol into Array");
        let f = ffi
            .function(
                &Value::symbol("int"),
                &Value::array([Value::symbol("int")]),
                &symbol,
                CallOptions::new(),
            )
            .unwrap();
        assert_eq!(f.name(), "abs");
    }

    #[test]
    fn buffers_see_runtime_typedefs() {
        let mut ffi = FfiModule::new();
        ffi.registry_mut()
            .typedef("handle", &Value::symbol("pointer"))
            .unwrap();
        let buffer = ffi.buffer(&[Value::symbol("handle"), Value::Fixnum(2)]).unwrap();
        assert_eq!(buffer.total(), 2 * size_of::<usize>());
        let buffer = ffi.buffer(&[Value::symbol("int32"), Value::Fixnum(3)]).unwrap();
        assert_eq!(buffer.total(), 12);
    }

    #[test]
    fn typedef_buffer_counts_are_range_checked() {
        let mut ffi = FfiModule::new();
        ffi.registry_mut()
            .typedef("handle", &Value::symbol("pointer"))
            .unwrap();
        let err = ffi
            .buffer(&[Value::symbol("handle"), Value::Bignum((1 << 64) + 1)])
            .unwrap_err();
        assert!(matches!(err, FfiError::InvalidLength(_)));
        let err = ffi
            .buffer(&[Value::symbol("handle"), Value::Fixnum(-1)])
            .unwrap_err();
        assert!(matches!(err, FfiError::InvalidLength(-1)));
        let err = ffi
            .buffer(&[Value::symbol("handle"), Value::Float(1.0)])
            .unwrap_err();
        assert_eq!(err.to_string(), "can't convert Float into Integer");
    }

    #[test]
    fn struct_layouts_are_types() {
        let ffi = FfiModule::new();
        let ty = ffi
            .struct_layout(&[("a", Value::symbol("int8")), ("b", Value::symbol("int32"))])
            .unwrap();
        assert_eq!(ty.size(), 8);
        assert_eq!(ty.tag(), NativeType::Struct);
    }
}
