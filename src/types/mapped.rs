//! User-extensible mapped types.
//!
//! A mapped type pairs a native scalar shape with conversion logic supplied by
//! the embedder or by guest code. The bridge only ever asks three things of
//! it: the native type, `to_native` before a call and `from_native` after.
//! Every other method the guest sends is forwarded to the conversion itself.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use guest_ffi_core::{NativeType, TypeHash};

use crate::error::{Arity, FfiError, FfiResult};
use crate::value::Value;

use super::Type;

/// Conversion logic for a mapped type.
pub trait CustomConversion {
    /// The scalar the value travels as across the ABI.
    fn native_type(&self) -> FfiResult<NativeType>;

    /// Guest value to a value of [`Self::native_type`].
    fn to_native(&self, value: &Value) -> FfiResult<Value>;

    /// Value of [`Self::native_type`] back to a guest value.
    fn from_native(&self, value: Value) -> FfiResult<Value>;

    /// Handle a method the mapped type does not define itself.
    fn forward(&self, method: &str, _args: &[Value]) -> FfiResult<Value> {
        Err(FfiError::no_method(method, "FFI::Type::Mapped"))
    }

    /// Whether [`Self::forward`] answers `method`.
    fn responds_to(&self, _method: &str) -> bool {
        false
    }
}

/// Guest-level dispatch: `(receiver, method, args) -> result`.
pub type GuestHandler = Rc<dyn Fn(&Value, &str, &[Value]) -> FfiResult<Value>>;

type ToNativeHook = Rc<dyn Fn(&Value) -> FfiResult<Value>>;
type FromNativeHook = Rc<dyn Fn(Value) -> FfiResult<Value>>;

/// A conversion built from a fixed native type and a pair of closures.
#[derive(Clone)]
pub struct HookConversion {
    native: NativeType,
    to_native: ToNativeHook,
    from_native: FromNativeHook,
}

impl HookConversion {
    pub fn new(
        native: NativeType,
        to_native: impl Fn(&Value) -> FfiResult<Value> + 'static,
        from_native: impl Fn(Value) -> FfiResult<Value> + 'static,
    ) -> Self {
        Self {
            native,
            to_native: Rc::new(to_native),
            from_native: Rc::new(from_native),
        }
    }
}

impl CustomConversion for HookConversion {
    fn native_type(&self) -> FfiResult<NativeType> {
        Ok(self.native)
    }

    fn to_native(&self, value: &Value) -> FfiResult<Value> {
        (self.to_native)(value)
    }

    fn from_native(&self, value: Value) -> FfiResult<Value> {
        (self.from_native)(value)
    }
}

/// A conversion whose every method is answered by a guest object.
///
/// `receiver` is whatever value the guest passed to `Type::Mapped.new`; the
/// handler is the embedding runtime's method dispatch for it.
#[derive(Clone)]
pub struct GuestConverter {
    receiver: Value,
    handler: GuestHandler,
}

impl GuestConverter {
    pub fn new(receiver: Value, handler: GuestHandler) -> Self {
        Self { receiver, handler }
    }

    pub fn receiver(&self) -> &Value {
        &self.receiver
    }
}

impl CustomConversion for GuestConverter {
    fn native_type(&self) -> FfiResult<NativeType> {
        let answer = (self.handler)(&self.receiver, "native_type", &[])?;
        match &answer {
            Value::Type(ty) if ty.is_scalar() => Ok(ty.tag()),
            Value::Symbol(name) | Value::String(name) => guest_ffi_core::resolve_name(name)
                .filter(|tag| tag.is_scalar())
                .ok_or_else(|| FfiError::conversion(answer.class_name(), "Type")),
            other => Err(FfiError::conversion(other.class_name(), "Type")),
        }
    }

    fn to_native(&self, value: &Value) -> FfiResult<Value> {
        (self.handler)(&self.receiver, "to_native", std::slice::from_ref(value))
    }

    fn from_native(&self, value: Value) -> FfiResult<Value> {
        (self.handler)(&self.receiver, "from_native", &[value])
    }

    fn forward(&self, method: &str, args: &[Value]) -> FfiResult<Value> {
        (self.handler)(&self.receiver, method, args)
    }

    fn responds_to(&self, _method: &str) -> bool {
        true
    }
}

static NEXT_MAPPED: AtomicU64 = AtomicU64::new(1);

/// A registered mapped type.
pub struct MappedType {
    converter: Box<dyn CustomConversion>,
    /// Resolved once at construction; `None` when the conversion could not
    /// name a scalar yet.
    native: Option<NativeType>,
    hash: TypeHash,
}

impl MappedType {
    pub fn new(converter: impl CustomConversion + 'static) -> Self {
        let native = converter.native_type().ok();
        let sequence = NEXT_MAPPED.fetch_add(1, Ordering::Relaxed);
        Self {
            converter: Box::new(converter),
            native,
            hash: TypeHash::from_mapped(sequence),
        }
    }

    /// `Type::Mapped.new(receiver)`: accepts any guest value.
    pub fn from_guest(receiver: Value, handler: GuestHandler) -> Self {
        Self::new(GuestConverter::new(receiver, handler))
    }

    pub fn type_hash(&self) -> TypeHash {
        self.hash
    }

    /// The scalar this type travels as.
    pub fn native_type(&self) -> FfiResult<NativeType> {
        self.native
            .ok_or_else(|| FfiError::unsupported("mapped type does not define a native type"))
    }

    pub fn size(&self) -> usize {
        self.native.map_or(0, NativeType::size)
    }

    pub fn alignment(&self) -> usize {
        self.native.map_or(1, NativeType::alignment)
    }

    pub fn to_native(&self, value: &Value) -> FfiResult<Value> {
        self.converter.to_native(value)
    }

    pub fn from_native(&self, value: Value) -> FfiResult<Value> {
        self.converter.from_native(value)
    }

    pub fn responds_to(&self, method: &str) -> bool {
        matches!(
            method,
            "native_type" | "to_native" | "from_native" | "respond_to?" | "method_missing"
        ) || self.converter.responds_to(method)
    }

    /// Guest method dispatch on the mapped type.
    pub fn send(&self, method: &str, args: &[Value]) -> FfiResult<Value> {
        match method {
            "native_type" => {
                expect_args(method, args, 0)?;
                Ok(Value::Type(Type::Builtin(self.native_type()?)))
            }
            "to_native" => {
                expect_args(method, args, 1)?;
                self.to_native(&args[0])
            }
            "from_native" => {
                expect_args(method, args, 1)?;
                self.from_native(args[0].clone())
            }
            "respond_to?" => {
                expect_args(method, args, 1)?;
                let name = args[0]
                    .as_name()
                    .ok_or_else(|| FfiError::conversion(args[0].class_name(), "Symbol"))?;
                Ok(Value::Bool(self.responds_to(name)))
            }
            _ => self.converter.forward(method, args),
        }
    }
}

fn expect_args(method: &str, args: &[Value], count: usize) -> FfiResult<()> {
    if args.len() == count {
        Ok(())
    } else {
        Err(FfiError::ArgumentCount {
            name: method.to_string(),
            given: args.len(),
            expected: Arity::exact(count),
        })
    }
}

impl fmt::Debug for MappedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedType")
            .field("native", &self.native)
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doubling() -> HookConversion {
        HookConversion::new(
            NativeType::Int32,
            |v| Ok(Value::integer(v.as_integer().unwrap_or(0) * 2)),
            |v| Ok(Value::integer(v.as_integer().unwrap_or(0) / 2)),
        )
    }

    #[test]
    fn hook_conversion_round_trip() {
        let mapped = MappedType::new(doubling());
        assert_eq!(mapped.native_type().unwrap(), NativeType::Int32);
        assert_eq!(mapped.size(), 4);
        assert_eq!(mapped.to_native(&Value::Fixnum(21)).unwrap(), Value::Fixnum(42));
        assert_eq!(mapped.from_native(Value::Fixnum(42)).unwrap(), Value::Fixnum(21));
    }

    #[test]
    fn every_registration_gets_its_own_identity() {
        let a = MappedType::new(doubling());
        let b = MappedType::new(doubling());
        assert_ne!(a.type_hash(), b.type_hash());
    }

    #[test]
    fn hook_conversion_does_not_forward() {
        let mapped = MappedType::new(doubling());
        let err = mapped.send("frobnicate", &[]).unwrap_err();
        assert!(matches!(err, FfiError::NoMethod { .. }));
        assert!(!mapped.responds_to("frobnicate"));
    }

    #[test]
    fn guest_receiver_accepts_any_value() {
        let handler: GuestHandler = Rc::new(|receiver, method, args| match method {
            "native_type" => Ok(Value::symbol("int")),
            "describe" => Ok(Value::array([receiver.clone(), Value::integer(args.len() as i128)])),
            _ => Err(FfiError::no_method(method, receiver.class_name())),
        });
        let mapped = MappedType::from_guest(Value::Fixnum(42), handler);
        assert_eq!(mapped.native_type().unwrap(), NativeType::Int32);
        assert_eq!(
            mapped.send("describe", &[Value::Nil]).unwrap(),
            Value::array([Value::Fixnum(42), Value::Fixnum(1)])
        );
        assert_eq!(
            mapped.send("respond_to?", &[Value::symbol("method_missing")]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn guest_receiver_without_native_type_still_constructs() {
        let handler: GuestHandler =
            Rc::new(|receiver, method, _| Err(FfiError::no_method(method, receiver.class_name())));
        let mapped = MappedType::from_guest(Value::Fixnum(42), handler);
        assert_eq!(mapped.size(), 0);
        assert!(matches!(mapped.native_type(), Err(FfiError::Unsupported(_))));
    }

    #[test]
    fn send_checks_arity() {
        let mapped = MappedType::new(doubling());
        let err = mapped.send("to_native", &[]).unwrap_err();
        assert!(err.to_string().contains("given 0, expected 1"));
    }
}
