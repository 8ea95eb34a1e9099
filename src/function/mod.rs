//! The calling bridge.
//!
//! A [`Function`] binds a [`Symbol`] to a declared signature. Every type in
//! the signature is resolved when the Function is built, so a malformed
//! binding fails before any native call is attempted. Calling it:
//!
//! 1. checks the argument count against the signature
//! 2. coerces each argument to its parameter type
//! 3. brackets the native call with the enter/leave hooks
//! 4. decodes the native return value
//!
//! A trailing `VARARGS` parameter admits extra arguments, passed as
//! `(type, value)` pairs and promoted the way C promotes variadic arguments.

mod hooks;
mod invoke;
mod marshal;

use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;

use bumpalo::Bump;
use libffi::middle::{Cif, CodePtr};
use log::{debug, trace};

use crate::config::CallOptions;
use crate::error::{Arity, FfiError, FfiResult};
use crate::library::Symbol;
use crate::object::{MethodHost, NativeMethod};
use crate::types::{Type, TypeRegistry};
use crate::value::Value;

pub use hooks::{NativeCall, NativeCallHooks, NativeScope, NoopHooks};

use invoke::ReturnKind;

/// A native function bound to a signature.
#[derive(Clone)]
pub struct Function {
    name: String,
    symbol: Symbol,
    return_type: Type,
    /// Fixed parameters; a trailing VARARGS is recorded in `variadic`.
    param_types: Vec<Type>,
    variadic: bool,
    options: CallOptions,
    hooks: Rc<dyn NativeCallHooks>,
    /// Resolves the type tokens of variadic arguments.
    registry: TypeRegistry,
}

impl Function {
    /// Build from guest tokens.
    ///
    /// # Errors
    ///
    /// - [`FfiError::TypeConversion`] into `Type` for the first token that
    ///   does not resolve, checked return type first then parameters in order
    /// - [`FfiError::TypeConversion`] into `Symbol` when `symbol` is not a
    ///   library symbol
    pub fn new(
        registry: &TypeRegistry,
        return_type: &Value,
        param_types: &[Value],
        symbol: &Value,
        options: CallOptions,
    ) -> FfiResult<Self> {
        let return_type = registry.resolve(return_type)?;
        let param_types = param_types
            .iter()
            .map(|token| registry.resolve(token))
            .collect::<FfiResult<Vec<_>>>()?;
        let Value::LibrarySymbol(symbol) = symbol else {
            return Err(FfiError::conversion(symbol.class_name(), "Symbol"));
        };
        let mut function = Self::from_types(return_type, param_types, symbol.clone(), options)?;
        function.registry = registry.clone();
        Ok(function)
    }

    /// Build from resolved types.
    pub fn from_types(
        return_type: Type,
        mut param_types: Vec<Type>,
        symbol: Symbol,
        options: CallOptions,
    ) -> FfiResult<Self> {
        options.convention()?;
        if return_type.is_varargs() {
            return Err(FfiError::unsupported("VARARGS is not a return type"));
        }
        check_aggregate(&return_type)?;

        let variadic = param_types.last().is_some_and(Type::is_varargs);
        if variadic {
            param_types.pop();
        }
        for ty in &param_types {
            if ty.is_void() {
                return Err(FfiError::unsupported("VOID is not a parameter type"));
            }
            if ty.is_varargs() {
                return Err(FfiError::unsupported("VARARGS must be the last parameter"));
            }
            check_aggregate(ty)?;
        }

        let function = Self {
            name: symbol.name().to_string(),
            symbol,
            return_type,
            param_types,
            variadic,
            options,
            hooks: Rc::new(NoopHooks),
            registry: TypeRegistry::new(),
        };
        debug!("built {function:?}");
        Ok(function)
    }

    /// Install `hooks` around every native call this Function makes.
    pub fn with_hooks(mut self, hooks: Rc<dyn NativeCallHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn return_type(&self) -> &Type {
        &self.return_type
    }

    pub fn param_types(&self) -> &[Type] {
        &self.param_types
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    pub fn options(&self) -> &CallOptions {
        &self.options
    }

    pub fn arity(&self) -> Arity {
        if self.variadic {
            Arity::at_least(self.param_types.len())
        } else {
            Arity::exact(self.param_types.len())
        }
    }

    /// Call the native function with guest arguments.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn call(&self, args: &[Value]) -> FfiResult<Value> {
        let fixed = self.param_types.len();
        let arity = self.arity();
        if !arity.accepts(args.len()) || (self.variadic && (args.len() - fixed) % 2 != 0) {
            return Err(FfiError::ArgumentCount {
                name: self.name.clone(),
                given: args.len(),
                expected: arity,
            });
        }
        let address = self.symbol.address().ok_or_else(|| FfiError::SymbolNotFound {
            name: self.symbol.name().to_string(),
            library: String::new(),
        })?;
        let return_kind = ReturnKind::of(&self.return_type)?;

        let arena = Bump::new();
        let mut types = self.param_types.clone();
        let mut native = bumpalo::collections::Vec::with_capacity_in(args.len(), &arena);
        for (ty, value) in self.param_types.iter().zip(args) {
            trace!("{}: {value:?} as {ty}", self.name);
            native.push(marshal::coerce(&arena, ty, value)?);
        }
        for pair in args[fixed..].chunks_exact(2) {
            let ty = marshal::promote(self.registry.resolve(&pair[0])?);
            if ty.is_void() || ty.is_varargs() {
                return Err(FfiError::unsupported(format!("{ty} is not an argument type")));
            }
            trace!("{}: {:?} as variadic {ty}", self.name, pair[1]);
            native.push(marshal::coerce(&arena, &ty, &pair[1])?);
            types.push(ty);
        }

        let arg_types = types
            .iter()
            .map(Type::ffi_type)
            .collect::<FfiResult<Vec<_>>>()?;
        let result_type = self.return_type.ffi_type()?;
        let cif = if self.variadic {
            Cif::new_variadic(arg_types, fixed, result_type)
        } else {
            Cif::new(arg_types, result_type)
        };
        let code = CodePtr::from_ptr(address.as_ptr::<c_void>().cast_const());

        let raw = {
            #[cfg(feature = "profiling")]
            profiling::scope!("native call");
            let _scope = NativeScope::enter(
                self.hooks.as_ref(),
                NativeCall {
                    name: &self.name,
                    blocking: self.options.blocking(),
                },
            )?;
            // SAFETY: the symbol was resolved from a library this Function
            // keeps loaded, and the cif was built from the declared signature
            // the arguments were just coerced to.
            unsafe { invoke::invoke(&cif, code, &native, &return_kind)? }
        };
        trace!("{} returned {raw:?}", self.name);
        return_kind.finish(raw)
    }

    /// Install this Function on `target` as the method `name`.
    ///
    /// An unresolved symbol is looked up in `target`'s libraries first; the
    /// installed copy carries `name` as its display name.
    pub fn attach(&self, target: &mut dyn MethodHost, name: &str) -> FfiResult<()> {
        let symbol = self.symbol.resolve_in(target.libraries())?;
        let bound = Function {
            name: name.to_string(),
            symbol,
            ..self.clone()
        };
        debug!("attached {} as {name}", self.symbol.name());
        target.define_method(name, Rc::new(bound));
        Ok(())
    }
}

fn check_aggregate(ty: &Type) -> FfiResult<()> {
    match ty {
        Type::Struct(layout) if layout.size() == 0 => {
            Err(FfiError::unsupported("empty structs cannot be passed by value"))
        }
        _ => Ok(()),
    }
}

impl NativeMethod for Function {
    fn call(&self, args: &[Value]) -> FfiResult<Value> {
        Function::call(self, args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("symbol", &self.symbol)
            .field("return_type", &self.return_type)
            .field("param_types", &self.param_types)
            .field("variadic", &self.variadic)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use guest_ffi_core::NativeType;

    use super::*;
    use crate::library::DynamicLibrary;
    use crate::object::GuestObject;

    fn fname() -> Value {
        Value::LibrarySymbol(Symbol::unresolved("fname"))
    }

    fn libc(name: &str) -> Value {
        Value::LibrarySymbol(DynamicLibrary::open_current().find(name).unwrap())
    }

    #[test]
    fn construction_resolves_every_token() {
        let registry = TypeRegistry::new();
        let f = Function::new(
            &registry,
            &Value::symbol("void"),
            &[Value::symbol("int8"), Value::symbol("int16")],
            &fname(),
            CallOptions::new(),
        )
        .unwrap();
        assert_eq!(f.name(), "fname");
        assert_eq!(f.return_type(), &Type::Builtin(NativeType::Void));
        assert_eq!(
            f.param_types(),
            &[Type::Builtin(NativeType::Int8), Type::Builtin(NativeType::Int16)]
        );

        let f = Function::new(
            &registry,
            &Value::Type(Type::Builtin(NativeType::Void)),
            &[Value::Type(Type::Builtin(NativeType::Int8))],
            &fname(),
            CallOptions::new(),
        );
        assert!(f.is_ok());
    }

    #[test]
    fn construction_errors_name_the_offending_class() {
        let registry = TypeRegistry::new();
        let build = |ret: Value, params: &[Value], symbol: Value| {
            Function::new(&registry, &ret, params, &symbol, CallOptions::new())
                .unwrap_err()
                .to_string()
        };
        assert_eq!(build(Value::Fixnum(1), &[], fname()), "can't convert Fixnum into Type");
        assert_eq!(
            build(Value::symbol("void"), &[Value::Fixnum(2)], fname()),
            "can't convert Fixnum into Type"
        );
        assert_eq!(build(Value::symbol("null"), &[], fname()), "can't convert Symbol into Type");
        assert_eq!(
            build(Value::symbol("int32"), &[Value::symbol("array")], fname()),
            "can't convert Symbol into Type"
        );
        assert_eq!(
            build(Value::symbol("void"), &[Value::symbol("uint8")], Value::Fixnum(500)),
            "can't convert Fixnum into Symbol"
        );
    }

    #[test]
    fn signature_shape_is_checked() {
        let registry = TypeRegistry::new();
        let build = |ret: &str, params: &[&str]| {
            let params: Vec<Value> = params.iter().map(|p| Value::symbol(p)).collect();
            Function::new(&registry, &Value::symbol(ret), &params, &fname(), CallOptions::new())
        };
        assert!(build("varargs", &[]).is_err());
        assert!(build("int", &["void"]).is_err());
        assert!(build("int", &["varargs", "int"]).is_err());
        let printf = build("int", &["string", "varargs"]).unwrap();
        assert!(printf.is_variadic());
        assert_eq!(printf.arity(), Arity::at_least(1));
        assert!(build("longdouble", &["longdouble"]).is_ok());
    }

    #[test]
    fn unknown_convention_fails_at_construction() {
        let options = CallOptions::new().with("convention", Value::symbol("stdcall"));
        let err = Function::from_types(
            Type::Builtin(NativeType::Void),
            Vec::new(),
            Symbol::unresolved("f"),
            options,
        )
        .unwrap_err();
        assert!(matches!(err, FfiError::UnsupportedConvention(_)));
    }

    #[test]
    fn argument_count_is_checked_before_anything_else() {
        let registry = TypeRegistry::new();
        let f = Function::new(
            &registry,
            &Value::symbol("ulong"),
            &[Value::symbol("string")],
            &fname(),
            CallOptions::new(),
        )
        .unwrap();
        let err = f.call(&[]).unwrap_err();
        assert!(matches!(err, FfiError::ArgumentCount { given: 0, .. }));
        let err = f.call(&[Value::string("a"), Value::string("b")]).unwrap_err();
        assert!(err.to_string().contains("given 2, expected 1"));
    }

    #[test]
    fn unresolved_symbols_cannot_be_called() {
        let registry = TypeRegistry::new();
        let f = Function::new(&registry, &Value::symbol("void"), &[], &fname(), CallOptions::new()).unwrap();
        assert!(matches!(f.call(&[]), Err(FfiError::SymbolNotFound { .. })));
    }

    #[test]
    fn calls_into_libc() {
        let registry = TypeRegistry::new();
        let strlen = Function::new(
            &registry,
            &Value::symbol("ulong"),
            &[Value::symbol("string")],
            &libc("strlen"),
            CallOptions::new(),
        )
        .unwrap();
        assert_eq!(strlen.call(&[Value::string("hello")]).unwrap(), Value::Fixnum(5));

        let abs = Function::new(
            &registry,
            &Value::symbol("int"),
            &[Value::symbol("int")],
            &libc("abs"),
            CallOptions::new(),
        )
        .unwrap();
        assert_eq!(abs.call(&[Value::Fixnum(-42)]).unwrap(), Value::Fixnum(42));
    }

    #[test]
    fn variadic_call_through_snprintf() {
        let registry = TypeRegistry::new();
        let snprintf = Function::new(
            &registry,
            &Value::symbol("int"),
            &[
                Value::symbol("buffer_out"),
                Value::symbol("ulong"),
                Value::symbol("string"),
                Value::symbol("varargs"),
            ],
            &libc("snprintf"),
            CallOptions::new(),
        )
        .unwrap();
        let out = crate::buffer::Buffer::with_length(32).unwrap().into_ref();
        let written = snprintf
            .call(&[
                Value::Buffer(Rc::clone(&out)),
                Value::Fixnum(32),
                Value::string("%d-%.1f"),
                Value::symbol("int"),
                Value::Fixnum(7),
                Value::symbol("float"),
                Value::Float(2.5),
            ])
            .unwrap();
        assert_eq!(written, Value::Fixnum(5));
        assert_eq!(&out.borrow().as_bytes()[..6], b"7-2.5\0");

        let err = snprintf
            .call(&[Value::Nil, Value::Fixnum(0), Value::string("%d"), Value::symbol("int")])
            .unwrap_err();
        assert!(matches!(err, FfiError::ArgumentCount { .. }));
    }

    #[test]
    fn long_double_fails_at_call_time() {
        let registry = TypeRegistry::new();
        let f = Function::new(
            &registry,
            &Value::symbol("double"),
            &[Value::symbol("longdouble")],
            &libc("abs"),
            CallOptions::new(),
        )
        .unwrap();
        assert!(matches!(f.call(&[Value::Float(1.0)]), Err(FfiError::Unsupported(_))));
    }

    #[test]
    fn hooks_bracket_the_call() {
        struct Counting(Cell<u32>, Cell<bool>);
        impl NativeCallHooks for Counting {
            fn enter_native(&self, call: NativeCall<'_>) -> FfiResult<()> {
                self.0.set(self.0.get() + 1);
                self.1.set(call.blocking);
                Ok(())
            }
            fn leave_native(&self, _call: NativeCall<'_>) {
                self.0.set(self.0.get() + 10);
            }
        }

        let registry = TypeRegistry::new();
        let hooks = Rc::new(Counting(Cell::new(0), Cell::new(false)));
        let abs = Function::new(
            &registry,
            &Value::symbol("int"),
            &[Value::symbol("int")],
            &libc("abs"),
            CallOptions::new().with("blocking", Value::Bool(true)),
        )
        .unwrap()
        .with_hooks(hooks.clone());
        abs.call(&[Value::Fixnum(-1)]).unwrap();
        assert_eq!(hooks.0.get(), 11);
        assert!(hooks.1.get());
    }

    #[test]
    fn attach_resolves_against_the_target() {
        let registry = TypeRegistry::new();
        let abs = Function::new(
            &registry,
            &Value::symbol("int"),
            &[Value::symbol("int")],
            &Value::LibrarySymbol(Symbol::unresolved("abs")),
            CallOptions::new(),
        )
        .unwrap();
        let mut target = GuestObject::new("LibraryMock").with_library(DynamicLibrary::open_current());
        abs.attach(&mut target, "absolute").unwrap();
        assert!(target.responds_to("absolute"));
        assert_eq!(target.send("absolute", &[Value::Fixnum(-3)]).unwrap(), Value::Fixnum(3));

        let mut empty = GuestObject::new("Empty");
        assert!(matches!(
            abs.attach(&mut empty, "absolute"),
            Err(FfiError::SymbolNotFound { .. })
        ));
    }
}
