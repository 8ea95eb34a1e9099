//! Attach targets.
//!
//! `Function::attach` needs two things from the guest object it installs
//! itself on: somewhere to put the method and the ordered list of libraries
//! to resolve an unbound symbol against. [`MethodHost`] is that seam;
//! [`GuestObject`] is a self-contained implementation for embedders that
//! have no object model of their own to plug in.

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::{FfiError, FfiResult};
use crate::library::DynamicLibrary;
use crate::value::Value;

/// Something callable with guest arguments.
pub trait NativeMethod {
    fn call(&self, args: &[Value]) -> FfiResult<Value>;
}

impl<F> NativeMethod for F
where
    F: Fn(&[Value]) -> FfiResult<Value>,
{
    fn call(&self, args: &[Value]) -> FfiResult<Value> {
        (self)(args)
    }
}

/// A guest object methods can be attached to.
pub trait MethodHost {
    /// Install `method` under `name`, replacing any previous definition.
    fn define_method(&mut self, name: &str, method: Rc<dyn NativeMethod>);

    /// Libraries searched, first match wins, when attaching an unresolved
    /// symbol.
    fn libraries(&self) -> &[DynamicLibrary];
}

/// A method table plus a library list.
pub struct GuestObject {
    class_name: String,
    methods: FxHashMap<String, Rc<dyn NativeMethod>>,
    libraries: Vec<DynamicLibrary>,
}

impl GuestObject {
    pub fn new(class_name: &str) -> Self {
        Self {
            class_name: class_name.to_string(),
            methods: FxHashMap::default(),
            libraries: Vec::new(),
        }
    }

    pub fn with_library(mut self, library: DynamicLibrary) -> Self {
        self.libraries.push(library);
        self
    }

    pub fn add_library(&mut self, library: DynamicLibrary) {
        self.libraries.push(library);
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn responds_to(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Invoke method `name`.
    pub fn send(&self, name: &str, args: &[Value]) -> FfiResult<Value> {
        match self.methods.get(name) {
            Some(method) => method.call(args),
            None => Err(FfiError::no_method(name, self.class_name.as_str())),
        }
    }
}

impl MethodHost for GuestObject {
    fn define_method(&mut self, name: &str, method: Rc<dyn NativeMethod>) {
        self.methods.insert(name.to_string(), method);
    }

    fn libraries(&self) -> &[DynamicLibrary] {
        &self.libraries
    }
}

impl fmt::Debug for GuestObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("GuestObject")
            .field("class", &self.class_name)
            .field("methods", &methods)
            .field("libraries", &self.libraries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_methods() {
        let mut obj = GuestObject::new("Greeter");
        obj.define_method("count", Rc::new(|args: &[Value]| Ok(Value::integer(args.len() as i128))));
        assert!(obj.responds_to("count"));
        assert_eq!(obj.send("count", &[Value::Nil, Value::Nil]).unwrap(), Value::Fixnum(2));
    }

    #[test]
    fn missing_methods() {
        let obj = GuestObject::new("Greeter");
        let err = obj.send("hello", &[]).unwrap_err();
        assert_eq!(err.guest_class(), "NoMethodError");
        assert!(err.to_string().contains("Greeter"));
    }

    #[test]
    fn redefinition_replaces() {
        let mut obj = GuestObject::new("Greeter");
        obj.define_method("v", Rc::new(|_: &[Value]| Ok(Value::Fixnum(1))));
        obj.define_method("v", Rc::new(|_: &[Value]| Ok(Value::Fixnum(2))));
        assert_eq!(obj.send("v", &[]).unwrap(), Value::Fixnum(2));
    }

    #[test]
    fn library_order_is_kept() {
        let a = DynamicLibrary::open_current();
        let obj = GuestObject::new("Lib").with_library(a.clone());
        assert_eq!(obj.libraries().len(), 1);
        assert!(obj.libraries()[0].same_handle(&a));
    }
}
