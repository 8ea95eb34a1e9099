//! Host platform size table.
//!
//! Sizes are taken from the C type aliases in `std::ffi`, so they always agree
//! with what the host C compiler uses for the same target.

use std::ffi::{c_char, c_double, c_float, c_int, c_long, c_longlong, c_short, c_void};
use std::mem::{align_of, size_of};

/// Read-only table of native scalar sizes for the host.
///
/// All values are in bytes. The table is evaluated at compile time and never
/// changes during the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform;

impl Platform {
    pub const INT8_SIZE: usize = size_of::<c_char>();
    pub const INT16_SIZE: usize = size_of::<c_short>();
    pub const INT32_SIZE: usize = size_of::<c_int>();
    pub const INT64_SIZE: usize = size_of::<c_longlong>();
    pub const LONG_SIZE: usize = size_of::<c_long>();
    pub const FLOAT_SIZE: usize = size_of::<c_float>();
    pub const DOUBLE_SIZE: usize = size_of::<c_double>();
    pub const LONG_DOUBLE_SIZE: usize = long_double_layout().0;
    pub const ADDRESS_SIZE: usize = size_of::<*const c_void>();
    pub const BOOL_SIZE: usize = size_of::<bool>();

    pub const INT8_ALIGN: usize = align_of::<c_char>();
    pub const INT16_ALIGN: usize = align_of::<c_short>();
    pub const INT32_ALIGN: usize = align_of::<c_int>();
    pub const INT64_ALIGN: usize = align_of::<c_longlong>();
    pub const LONG_ALIGN: usize = align_of::<c_long>();
    pub const FLOAT_ALIGN: usize = align_of::<c_float>();
    pub const DOUBLE_ALIGN: usize = align_of::<c_double>();
    pub const LONG_DOUBLE_ALIGN: usize = long_double_layout().1;
    pub const ADDRESS_ALIGN: usize = align_of::<*const c_void>();

    /// Operating system name, as reported by `std::env::consts::OS`.
    pub const OS: &'static str = std::env::consts::OS;

    /// CPU architecture name, as reported by `std::env::consts::ARCH`.
    pub const ARCH: &'static str = std::env::consts::ARCH;

    /// The guest-visible size constants, in declaration order.
    pub const fn size_constants() -> [(&'static str, usize); 9] {
        [
            ("INT8_SIZE", Self::INT8_SIZE),
            ("INT16_SIZE", Self::INT16_SIZE),
            ("INT32_SIZE", Self::INT32_SIZE),
            ("INT64_SIZE", Self::INT64_SIZE),
            ("LONG_SIZE", Self::LONG_SIZE),
            ("FLOAT_SIZE", Self::FLOAT_SIZE),
            ("DOUBLE_SIZE", Self::DOUBLE_SIZE),
            ("LONG_DOUBLE_SIZE", Self::LONG_DOUBLE_SIZE),
            ("ADDRESS_SIZE", Self::ADDRESS_SIZE),
        ]
    }

    /// Look up a size constant by its guest name (`"INT32_SIZE"`).
    pub fn size_constant(name: &str) -> Option<usize> {
        Self::size_constants()
            .into_iter()
            .find(|(n, _)| *n == name)
            .map(|(_, size)| size)
    }
}

/// `long double` has no `std::ffi` alias, so its layout is picked per target.
const fn long_double_layout() -> (usize, usize) {
    if cfg!(windows) || cfg!(all(target_vendor = "apple", target_arch = "aarch64")) {
        (8, 8)
    } else if cfg!(target_arch = "x86") {
        (12, 4)
    } else if cfg!(target_pointer_width = "64") {
        (16, 16)
    } else {
        (8, 8)
    }
}
