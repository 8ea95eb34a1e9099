//! Deterministic hash-based type identity.
//!
//! Builtin tags hash from their canonical name. Struct layouts hash from their
//! ordered member names and member hashes, so two layouts declared with the
//! same members share an identity. Mapped types carry no structural shape and
//! hash from a registration sequence number instead.

use std::fmt;

use xxhash_rust::xxh64::xxh64;

/// Domain-specific mixing constants for hash computation.
pub mod hash_constants {
    /// Separator constant for chained components
    pub const SEP: u64 = 0x4bc94d6bd06053ad;

    /// Domain marker for named type hashes
    pub const TYPE: u64 = 0x2fac10b63a6cc57c;

    /// Domain marker for struct layout hashes
    pub const STRUCT: u64 = 0x5ea77ffbcdf5f302;

    /// Domain marker for mapped type hashes
    pub const MAPPED: u64 = 0x7d3c8b4a92e15f6d;

    /// Domain marker for by-reference wrappers
    pub const BY_REFERENCE: u64 = 0x3e9f5d2a8c7b1403;

    /// Member position mixing constants, so that member order matters.
    pub const MEMBER_MARKERS: [u64; 8] = [
        0x9e3779b97f4a7c15,
        0xbf58476d1ce4e5b9,
        0x94d049bb133111eb,
        0xd6e8feb86659fd93,
        0xe7037ed1a0b428db,
        0xc6a4a7935bd1e995,
        0x8648dbbc94d49b8d,
        0xa2b48b2c69e0d657,
    ];
}

/// A deterministic 64-bit identity for a native type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeHash(pub u64);

impl TypeHash {
    /// Empty/invalid hash constant.
    pub const EMPTY: TypeHash = TypeHash(0);

    /// Hash a canonical type name.
    #[inline]
    pub fn from_name(name: &str) -> Self {
        TypeHash(hash_constants::TYPE ^ xxh64(name.as_bytes(), 0))
    }

    /// Hash a struct layout from its ordered `(field name, member hash)` pairs.
    pub fn from_struct<'a>(members: impl IntoIterator<Item = (&'a str, TypeHash)>) -> Self {
        let mut hash = hash_constants::STRUCT;
        for (i, (name, member)) in members.into_iter().enumerate() {
            let marker = hash_constants::MEMBER_MARKERS
                .get(i)
                .copied()
                .unwrap_or_else(|| hash_constants::MEMBER_MARKERS[0].wrapping_add(i as u64));
            let field = xxh64(name.as_bytes(), 0) ^ member.0;
            // wrapping_mul keeps the fold order-sensitive, unlike a plain XOR
            hash = hash.wrapping_mul(hash_constants::SEP).wrapping_add(marker ^ field);
        }
        TypeHash(hash)
    }

    /// Hash the `sequence`-th mapped type registration.
    #[inline]
    pub fn from_mapped(sequence: u64) -> Self {
        TypeHash(hash_constants::MAPPED ^ xxh64(&sequence.to_le_bytes(), 0))
    }

    /// Hash a by-reference wrapper around `inner`.
    #[inline]
    pub fn by_reference(inner: TypeHash) -> Self {
        TypeHash(hash_constants::BY_REFERENCE ^ inner.0.rotate_left(17))
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHash({:#018x})", self.0)
    }
}

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_hash_is_deterministic() {
        assert_eq!(TypeHash::from_name("INT8"), TypeHash::from_name("INT8"));
        assert_ne!(TypeHash::from_name("INT8"), TypeHash::from_name("UINT8"));
    }

    #[test]
    fn struct_hash_depends_on_member_order() {
        let a = TypeHash::from_name("INT8");
        let b = TypeHash::from_name("INT32");
        let ab = TypeHash::from_struct([("x", a), ("y", b)]);
        let ba = TypeHash::from_struct([("x", b), ("y", a)]);
        assert_ne!(ab, ba);
        assert_eq!(ab, TypeHash::from_struct([("x", a), ("y", b)]));
    }

    #[test]
    fn struct_hash_depends_on_field_names() {
        let a = TypeHash::from_name("INT8");
        assert_ne!(
            TypeHash::from_struct([("x", a)]),
            TypeHash::from_struct([("y", a)])
        );
    }

    #[test]
    fn mapped_hashes_are_distinct_per_sequence() {
        assert_ne!(TypeHash::from_mapped(1), TypeHash::from_mapped(2));
        assert_eq!(TypeHash::from_mapped(7), TypeHash::from_mapped(7));
    }

    #[test]
    fn by_reference_differs_from_inner() {
        let inner = TypeHash::from_struct([("a", TypeHash::from_name("INT8"))]);
        assert_ne!(TypeHash::by_reference(inner), inner);
    }

    #[test]
    fn display_is_hex() {
        assert_eq!(format!("{}", TypeHash(0x1f)), "0x000000000000001f");
        assert!(TypeHash::EMPTY.is_empty());
    }
}
