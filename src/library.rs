//! Shared library loading and symbol resolution.
//!
//! A [`DynamicLibrary`] is the sole owner of the loaded module. Every
//! [`Symbol`] resolved from it keeps a counted reference to that owner, so a
//! library can never be unloaded while a Symbol or Function derived from it
//! is still reachable.

use std::ffi::{CString, c_int, c_void};
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use libloading::os::unix::{Library as RawLibrary, RTLD_GLOBAL, RTLD_LAZY, RTLD_LOCAL, RTLD_NOW};
use log::{debug, warn};

use crate::config::FfiConfig;
use crate::error::{FfiError, FfiResult};
use crate::value::NativePointer;

bitflags! {
    /// Visibility and binding flags for the host loader.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LoadFlags: c_int {
        const LAZY = RTLD_LAZY;
        const NOW = RTLD_NOW;
        const GLOBAL = RTLD_GLOBAL;
        const LOCAL = RTLD_LOCAL;
    }
}

impl LoadFlags {
    /// Guest `RTLD_*` constants.
    pub fn constants() -> [(&'static str, c_int); 4] {
        [
            ("RTLD_LAZY", RTLD_LAZY),
            ("RTLD_NOW", RTLD_NOW),
            ("RTLD_GLOBAL", RTLD_GLOBAL),
            ("RTLD_LOCAL", RTLD_LOCAL),
        ]
    }

    /// Flags from a guest integer; unknown bits pass through to the loader.
    pub fn from_raw(bits: c_int) -> Self {
        Self::from_bits_retain(bits)
    }
}

struct LibraryHandle {
    name: String,
    library: RawLibrary,
}

/// An open shared library.
#[derive(Clone)]
pub struct DynamicLibrary {
    handle: Rc<LibraryHandle>,
}

impl DynamicLibrary {
    /// Open `name` with `flags`, trying the default name decorations.
    pub fn open(name: &str, flags: LoadFlags) -> FfiResult<Self> {
        Self::open_with_config(name, Some(flags), &FfiConfig::default())
    }

    /// Open `name`, walking the candidates `config` derives from it.
    ///
    /// The first candidate the host loader accepts wins. When every one
    /// fails, the error carries the loader's message for the last attempt.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn open_with_config(
        name: &str,
        flags: Option<LoadFlags>,
        config: &FfiConfig,
    ) -> FfiResult<Self> {
        let flags = flags.unwrap_or(config.default_flags);
        let mut reason = String::from("no candidate paths");
        for candidate in config.candidates(name) {
            // SAFETY: running a library's initialisers is the point of
            // opening it; the guest asked for this library by name.
            match unsafe { RawLibrary::open(Some(&candidate), flags.bits()) } {
                Ok(library) => {
                    debug!("opened {} as {} ({flags:?})", name, candidate.display());
                    return Ok(Self {
                        handle: Rc::new(LibraryHandle {
                            name: name.to_string(),
                            library,
                        }),
                    });
                }
                Err(err) => {
                    warn!("could not open {}: {err}", candidate.display());
                    reason = err.to_string();
                }
            }
        }
        Err(FfiError::LibraryLoad {
            name: name.to_string(),
            reason,
        })
    }

    /// The running process image and everything it has loaded globally.
    pub fn open_current() -> Self {
        debug!("opened current process");
        Self {
            handle: Rc::new(LibraryHandle {
                name: "[current process]".to_string(),
                library: RawLibrary::this(),
            }),
        }
    }

    /// The name this library was opened under.
    pub fn name(&self) -> &str {
        &self.handle.name
    }

    /// Resolve an exported function.
    pub fn find(&self, name: &str) -> FfiResult<Symbol> {
        let address = self.lookup(name)?;
        debug!("resolved {name} in {} at {address:?}", self.name());
        Ok(Symbol {
            name: Rc::from(name),
            binding: Some(SymbolBinding {
                address,
                library: self.clone(),
            }),
        })
    }

    /// Resolve an exported variable. Same lookup, kept distinct for guests
    /// that use both spellings.
    pub fn find_variable(&self, name: &str) -> FfiResult<Symbol> {
        self.find(name)
    }

    fn lookup(&self, name: &str) -> FfiResult<NativePointer> {
        let not_found = || FfiError::SymbolNotFound {
            name: name.to_string(),
            library: self.name().to_string(),
        };
        let c_name = CString::new(name).map_err(|_| FfiError::InteriorNul)?;
        // SAFETY: the symbol is read as an untyped address; nothing is
        // called or dereferenced here.
        let symbol = unsafe { self.handle.library.get::<*mut c_void>(c_name.as_bytes_with_nul()) }
            .map_err(|_| not_found())?;
        let address = NativePointer::from_ptr(*symbol);
        if address.is_null() {
            return Err(not_found());
        }
        Ok(address)
    }

    /// Whether both values own the same loaded module.
    pub fn same_handle(&self, other: &DynamicLibrary) -> bool {
        Rc::ptr_eq(&self.handle, &other.handle)
    }
}

impl fmt::Debug for DynamicLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DynamicLibrary").field(&self.handle.name).finish()
    }
}

#[derive(Clone)]
struct SymbolBinding {
    address: NativePointer,
    library: DynamicLibrary,
}

/// An exported name, optionally bound to an address in an open library.
#[derive(Clone)]
pub struct Symbol {
    name: Rc<str>,
    binding: Option<SymbolBinding>,
}

impl Symbol {
    /// A name not yet looked up anywhere.
    pub fn unresolved(name: &str) -> Self {
        Self {
            name: Rc::from(name),
            binding: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Option<NativePointer> {
        self.binding.as_ref().map(|b| b.address)
    }

    /// The library keeping [`Self::address`] valid.
    pub fn library(&self) -> Option<&DynamicLibrary> {
        self.binding.as_ref().map(|b| &b.library)
    }

    pub fn is_resolved(&self) -> bool {
        self.binding.is_some()
    }

    /// This symbol bound to the first of `libraries` that exports it.
    ///
    /// An already bound symbol is returned as is.
    pub fn resolve_in(&self, libraries: &[DynamicLibrary]) -> FfiResult<Symbol> {
        if self.is_resolved() {
            return Ok(self.clone());
        }
        libraries
            .iter()
            .find_map(|lib| lib.find(&self.name).ok())
            .ok_or_else(|| FfiError::SymbolNotFound {
                name: self.name.to_string(),
                library: libraries
                    .iter()
                    .map(DynamicLibrary::name)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.binding {
            Some(b) => write!(f, "Symbol({} @ {:?} in {})", self.name, b.address, b.library.name()),
            None => write!(f, "Symbol({}, unresolved)", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_mirror_the_host_loader() {
        assert_eq!(LoadFlags::NOW.bits(), RTLD_NOW);
        assert_eq!(LoadFlags::from_raw(RTLD_LAZY | RTLD_GLOBAL), LoadFlags::LAZY | LoadFlags::GLOBAL);
        assert!(LoadFlags::constants().iter().any(|(name, _)| *name == "RTLD_LOCAL"));
    }

    #[test]
    fn missing_library_is_a_load_error() {
        let err = DynamicLibrary::open("libdefinitely-not-here-4711", LoadFlags::LAZY).unwrap_err();
        assert_eq!(err.guest_class(), "LoadError");
        assert!(err.to_string().contains("libdefinitely-not-here-4711"));
    }

    #[test]
    fn current_process_exports_libc() {
        let lib = DynamicLibrary::open_current();
        let strlen = lib.find("strlen").unwrap();
        assert!(strlen.is_resolved());
        assert!(!strlen.address().unwrap().is_null());
        assert!(strlen.library().unwrap().same_handle(&lib));
    }

    #[test]
    fn missing_symbol() {
        let lib = DynamicLibrary::open_current();
        let err = lib.find("no_such_function_4711").unwrap_err();
        assert!(matches!(err, FfiError::SymbolNotFound { .. }));
        assert!(matches!(lib.find("bad\0name"), Err(FfiError::InteriorNul)));
    }

    #[test]
    fn unresolved_symbols_resolve_by_first_match() {
        let first = DynamicLibrary::open_current();
        let second = DynamicLibrary::open_current();
        let sym = Symbol::unresolved("strlen");
        assert!(sym.address().is_none());
        let bound = sym.resolve_in(&[first.clone(), second]).unwrap();
        assert!(bound.library().unwrap().same_handle(&first));

        let err = Symbol::unresolved("no_such_function_4711")
            .resolve_in(&[first])
            .unwrap_err();
        assert!(err.to_string().contains("[current process]"));
    }

    #[test]
    fn clones_share_the_handle() {
        let lib = DynamicLibrary::open_current();
        assert!(lib.same_handle(&lib.clone()));
        assert!(!lib.same_handle(&DynamicLibrary::open_current()));
    }
}
