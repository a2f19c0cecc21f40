//! Core types used throughout the runtime memory subsystem

/// Address type
pub type Addr = usize;

/// Size type
pub type Size = usize;

/// Count type
pub type Count = u64;

/// Time in nanoseconds
pub type Nanoseconds = u64;

/// Result type for operations that can fail
pub type Result<T> = core::result::Result<T, crate::error::Error>;

/// Rounds `value` up to `align`, which must be a power of two.
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Rounds `value` down to `align`, which must be a power of two.
#[inline]
pub const fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(10, 2), 10);
        assert_eq!(align_up(10, 4), 12);
        assert_eq!(align_down(0x1017, 16), 0x1010);
    }
}
