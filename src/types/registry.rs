//! Type resolution.
//!
//! Call sites accept a `Type`, a bare tag name or an alias interchangeably;
//! [`TypeRegistry::resolve`] is the one place that turns any of them into a
//! [`Type`].

use std::rc::Rc;

use guest_ffi_core::{ALIASES, NativeType, TypeHash};
use log::debug;
use rustc_hash::FxHashMap;

use crate::error::{FfiError, FfiResult};
use crate::value::Value;

use super::{HookConversion, MappedType, Type};

/// Builtin tags, aliases, runtime typedefs and mapped types.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    /// Runtime typedefs, keyed by upper-case name, in definition order.
    typedefs: Vec<(String, Type)>,
    typedef_index: FxHashMap<String, usize>,
    mapped: FxHashMap<TypeHash, Rc<MappedType>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a type token: a `Type`, a tag name or an alias name.
    ///
    /// # Errors
    ///
    /// [`FfiError::TypeConversion`] naming the token's guest class when it
    /// is neither.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn resolve(&self, token: &Value) -> FfiResult<Type> {
        match token {
            Value::Type(ty) => Ok(ty.clone()),
            Value::Symbol(name) | Value::String(name) => self
                .resolve_name(name)
                .ok_or_else(|| FfiError::conversion(token.class_name(), "Type")),
            other => Err(FfiError::conversion(other.class_name(), "Type")),
        }
    }

    /// Resolve a name (case-insensitive). Tags win over aliases, aliases over
    /// runtime typedefs.
    pub fn resolve_name(&self, name: &str) -> Option<Type> {
        if let Some(tag) = guest_ffi_core::resolve_name(name) {
            // STRUCT and MAPPED are categories, not types one can name.
            return NativeType::PRIMITIVES.contains(&tag).then_some(Type::Builtin(tag));
        }
        self.typedef_index
            .get(&name.to_ascii_uppercase())
            .map(|&i| self.typedefs[i].1.clone())
    }

    /// Define `name` as another name for the type `token` resolves to.
    ///
    /// Redefining a runtime typedef replaces it. Canonical tags and builtin
    /// aliases are fixed.
    pub fn typedef(&mut self, name: &str, token: &Value) -> FfiResult<Type> {
        if guest_ffi_core::resolve_name(name).is_some() {
            return Err(FfiError::ReservedTypeName(name.to_string()));
        }
        let ty = self.resolve(token)?;
        let key = name.to_ascii_uppercase();
        debug!("typedef {key} -> {ty:?}");
        match self.typedef_index.get(&key) {
            Some(&i) => self.typedefs[i].1 = ty.clone(),
            None => {
                self.typedef_index.insert(key.clone(), self.typedefs.len());
                self.typedefs.push((key, ty.clone()));
            }
        }
        Ok(ty)
    }

    /// Register a mapped type built from a hook pair.
    pub fn define_mapped(
        &mut self,
        native: NativeType,
        to_native: impl Fn(&Value) -> FfiResult<Value> + 'static,
        from_native: impl Fn(Value) -> FfiResult<Value> + 'static,
    ) -> FfiResult<Type> {
        if !native.is_scalar() {
            return Err(FfiError::unsupported(format!(
                "mapped types must travel as a scalar, not {native}"
            )));
        }
        Ok(self.register_mapped(MappedType::new(HookConversion::new(
            native,
            to_native,
            from_native,
        ))))
    }

    /// Register an already built mapped type.
    pub fn register_mapped(&mut self, mapped: MappedType) -> Type {
        let mapped = Rc::new(mapped);
        debug!("registered mapped type {}", mapped.type_hash());
        self.mapped.insert(mapped.type_hash(), Rc::clone(&mapped));
        Type::Mapped(mapped)
    }

    /// Look up a mapped type by identity.
    pub fn mapped(&self, hash: TypeHash) -> Option<Type> {
        self.mapped.get(&hash).map(|m| Type::Mapped(Rc::clone(m)))
    }

    /// Every resolvable name and what it resolves to: tags, then builtin
    /// aliases, then runtime typedefs.
    pub fn typedefs(&self) -> Vec<(String, Type)> {
        NativeType::PRIMITIVES
            .iter()
            .map(|tag| (tag.name().to_string(), Type::Builtin(*tag)))
            .chain(
                ALIASES
                    .iter()
                    .map(|(alias, tag)| (alias.to_string(), Type::Builtin(*tag))),
            )
            .chain(self.typedefs.iter().cloned())
            .collect()
    }

    /// `TYPE_<TAG>` constants and their numeric tag ids.
    pub fn type_constants() -> Vec<(String, u8)> {
        NativeType::ALL
            .iter()
            .map(|tag| (format!("TYPE_{}", tag.name()), tag.id()))
            .collect()
    }
}
