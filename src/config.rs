//! Loader configuration and per-function call options.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::error::{FfiError, FfiResult};
use crate::library::LoadFlags;
use crate::value::Value;

/// Settings used when opening libraries by name.
#[derive(Debug, Clone)]
pub struct FfiConfig {
    /// Flags applied when the caller passes none.
    pub default_flags: LoadFlags,
    /// Directories tried, in order, after the bare name.
    pub search_paths: Vec<PathBuf>,
    /// Whether `m` may also be tried as `libm.so` (platform prefix and suffix).
    pub decorate_names: bool,
}

impl Default for FfiConfig {
    fn default() -> Self {
        Self {
            default_flags: LoadFlags::LAZY | LoadFlags::LOCAL,
            search_paths: Vec::new(),
            decorate_names: true,
        }
    }
}

impl FfiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_flags(mut self, flags: LoadFlags) -> Self {
        self.default_flags = flags;
        self
    }

    pub fn with_search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_paths.push(dir.into());
        self
    }

    pub fn with_decorated_names(mut self, enabled: bool) -> Self {
        self.decorate_names = enabled;
        self
    }

    /// Paths to try for `name`, most specific first.
    ///
    /// A name containing a path separator is used as given. Otherwise the
    /// bare name comes first (so the host loader's own search applies), then
    /// the decorated name, then both joined onto every configured directory.
    pub fn candidates(&self, name: &str) -> Vec<PathBuf> {
        if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
            return vec![PathBuf::from(name)];
        }

        let mut names = vec![name.to_string()];
        if self.decorate_names {
            let decorated = decorate(name);
            if decorated != name {
                names.push(decorated);
            }
        }

        let mut out: Vec<PathBuf> = names.iter().map(PathBuf::from).collect();
        for dir in &self.search_paths {
            for n in &names {
                out.push(Path::new(dir).join(n));
            }
        }
        out
    }
}

/// `m` → `libm.so`, leaving names that already look like library files alone.
fn decorate(name: &str) -> String {
    let prefix = std::env::consts::DLL_PREFIX;
    let suffix = std::env::consts::DLL_SUFFIX;
    let has_suffix = name.ends_with(suffix) || name.contains(&format!("{suffix}."));
    let with_prefix = if name.starts_with(prefix) {
        name.to_string()
    } else {
        format!("{prefix}{name}")
    };
    if has_suffix {
        with_prefix
    } else {
        format!("{with_prefix}{suffix}")
    }
}

/// Calling conventions a Function may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallingConvention {
    /// The platform C convention.
    #[default]
    C,
}

/// The free-form options mapping given to a Function.
///
/// Unknown keys are kept and ignored. Recognised keys:
/// - `convention`: `:default`, `:c` or `:cdecl`
/// - `blocking`: truthy when the native call may block for a long time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    entries: FxHashMap<String, Value>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.entries.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The requested calling convention.
    pub fn convention(&self) -> FfiResult<CallingConvention> {
        match self.entries.get("convention") {
            None | Some(Value::Nil) => Ok(CallingConvention::C),
            Some(value) => match value.as_name() {
                Some(name)
                    if ["default", "c", "cdecl"]
                        .iter()
                        .any(|c| c.eq_ignore_ascii_case(name)) =>
                {
                    Ok(CallingConvention::C)
                }
                Some(name) => Err(FfiError::UnsupportedConvention(name.to_string())),
                None => Err(FfiError::conversion(value.class_name(), "Symbol")),
            },
        }
    }

    /// Whether the call was flagged as potentially long-running.
    pub fn blocking(&self) -> bool {
        self.entries.get("blocking").is_some_and(Value::truthy)
    }
}

impl<'a> FromIterator<(&'a str, Value)> for CallOptions {
    fn from_iter<I: IntoIterator<Item = (&'a str, Value)>>(iter: I) -> Self {
        let mut options = CallOptions::new();
        for (key, value) in iter {
            options.insert(key, value);
        }
        options
    }
}
