//! Alias table: convenience names resolved to canonical tags.
//!
//! Resolution is a pure function of the name. Every alias maps directly to a
//! canonical tag, so resolution never chains and can never cycle.

use std::sync::LazyLock;

use rustc_hash::FxHashMap;

use crate::NativeType;

/// Alias name to canonical tag, in guest declaration order.
pub const ALIASES: &[(&str, NativeType)] = &[
    ("SCHAR", NativeType::Int8),
    ("CHAR", NativeType::Int8),
    ("UCHAR", NativeType::Uint8),
    ("SHORT", NativeType::Int16),
    ("SSHORT", NativeType::Int16),
    ("USHORT", NativeType::Uint16),
    ("INT", NativeType::Int32),
    ("SINT", NativeType::Int32),
    ("UINT", NativeType::Uint32),
    ("LONG_LONG", NativeType::Int64),
    ("SLONG", NativeType::Long),
    ("SLONG_LONG", NativeType::Int64),
    ("ULONG_LONG", NativeType::Uint64),
    ("FLOAT", NativeType::Float32),
    ("DOUBLE", NativeType::Float64),
    ("STRING", NativeType::Pointer),
    ("BUFFER_IN", NativeType::Pointer),
    ("BUFFER_OUT", NativeType::Pointer),
    ("BUFFER_INOUT", NativeType::Pointer),
];

static ALIAS_INDEX: LazyLock<FxHashMap<&'static str, NativeType>> =
    LazyLock::new(|| ALIASES.iter().copied().collect());

/// Resolve an alias name (case-insensitive) to its canonical tag.
pub fn resolve_alias(name: &str) -> Option<NativeType> {
    ALIAS_INDEX.get(name.to_ascii_uppercase().as_str()).copied()
}

/// Resolve a canonical tag name or an alias name.
///
/// Canonical names win, so `"LONG"` is the `LONG` tag even though `SLONG`
/// also points at it.
pub fn resolve_name(name: &str) -> Option<NativeType> {
    NativeType::from_name(name).or_else(|| resolve_alias(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_their_tags() {
        assert_eq!(resolve_alias("CHAR"), Some(NativeType::Int8));
        assert_eq!(resolve_alias("uint"), Some(NativeType::Uint32));
        assert_eq!(resolve_alias("STRING"), Some(NativeType::Pointer));
        assert_eq!(resolve_alias("SLONG"), Some(NativeType::Long));
        assert_eq!(resolve_alias("INT8"), None);
    }

    #[test]
    fn aliases_never_shadow_canonical_names() {
        for (alias, _) in ALIASES {
            assert!(NativeType::from_name(alias).is_none(), "{alias} shadows a tag");
        }
    }

    #[test]
    fn alias_targets_are_canonical_scalars() {
        for (alias, tag) in ALIASES {
            assert!(tag.is_scalar(), "{alias} must map to a scalar tag");
        }
    }

    #[test]
    fn resolve_name_covers_tags_and_aliases() {
        assert_eq!(resolve_name("void"), Some(NativeType::Void));
        assert_eq!(resolve_name("BUFFER_INOUT"), Some(NativeType::Pointer));
        assert_eq!(resolve_name("double"), Some(NativeType::Float64));
        assert_eq!(resolve_name("null"), None);
        assert_eq!(resolve_name("array"), None);
    }
}
