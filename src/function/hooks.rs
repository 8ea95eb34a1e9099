//! Enter/leave notifications around native calls.
//!
//! The embedding runtime installs a [`NativeCallHooks`] to release its
//! interpreter lock while native code runs. The bridge only guarantees that
//! the native call happens strictly between the two notifications.

use log::trace;

use crate::error::FfiResult;

/// What a hook is told about the call it brackets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeCall<'a> {
    pub name: &'a str,
    /// Set from the Function's `blocking` option.
    pub blocking: bool,
}

/// Hooks run immediately before and after every native call.
pub trait NativeCallHooks {
    /// Called before the first argument is handed to native code. An error
    /// aborts the call.
    fn enter_native(&self, call: NativeCall<'_>) -> FfiResult<()>;

    /// Called once native code has returned, whether or not the result
    /// converts successfully.
    fn leave_native(&self, call: NativeCall<'_>);
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl NativeCallHooks for NoopHooks {
    fn enter_native(&self, _call: NativeCall<'_>) -> FfiResult<()> {
        Ok(())
    }

    fn leave_native(&self, _call: NativeCall<'_>) {}
}

/// Scope guard pairing `enter_native` with `leave_native`.
pub struct NativeScope<'h> {
    hooks: &'h dyn NativeCallHooks,
    call: NativeCall<'h>,
}

impl<'h> NativeScope<'h> {
    pub fn enter(hooks: &'h dyn NativeCallHooks, call: NativeCall<'h>) -> FfiResult<Self> {
        hooks.enter_native(call)?;
        trace!("enter native {}", call.name);
        Ok(Self { hooks, call })
    }
}

impl Drop for NativeScope<'_> {
    fn drop(&mut self) {
        trace!("leave native {}", self.call.name);
        self.hooks.leave_native(self.call);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::error::FfiError;

    #[derive(Default)]
    struct Recorder {
        events: RefCell<Vec<String>>,
        refuse: bool,
    }

    impl NativeCallHooks for Recorder {
        fn enter_native(&self, call: NativeCall<'_>) -> FfiResult<()> {
            if self.refuse {
                return Err(FfiError::Hook("interpreter busy".into()));
            }
            self.events.borrow_mut().push(format!("enter {} {}", call.name, call.blocking));
            Ok(())
        }

        fn leave_native(&self, call: NativeCall<'_>) {
            self.events.borrow_mut().push(format!("leave {}", call.name));
        }
    }

    #[test]
    fn scope_brackets_the_body() {
        let hooks = Recorder::default();
        {
            let _scope = NativeScope::enter(&hooks, NativeCall { name: "pow", blocking: true }).unwrap();
            hooks.events.borrow_mut().push("call".into());
        }
        assert_eq!(*hooks.events.borrow(), ["enter pow true", "call", "leave pow"]);
    }

    #[test]
    fn refused_enter_skips_leave() {
        let hooks = Recorder {
            refuse: true,
            ..Default::default()
        };
        let scope = NativeScope::enter(&hooks, NativeCall { name: "pow", blocking: false });
        assert!(scope.is_err());
        drop(scope);
        assert!(hooks.events.borrow().is_empty());
    }
}
