use core::fmt;
use core::hash::Hash;

/// Sealed trait pattern to restrict `PageSize` impls to our markers.
mod sealed {
    pub trait Sealed {}
}

/// Marker trait for the page granularities used by x86 paging.
pub trait PageSize:
    sealed::Sealed + Clone + Copy + Eq + PartialEq + Ord + PartialOrd + Hash + fmt::Debug
{
    /// Page size in bytes (power of two).
    const SIZE: u64;
    /// log2(SIZE), i.e., number of low bits used for the offset.
    const SHIFT: u32;
    /// Mask selecting the offset within a page of this size.
    const MASK: u64 = Self::SIZE - 1;
}

macro_rules! page_size {
    ($(#[$doc:meta])* $name:ident, $shift:expr) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name;
        impl sealed::Sealed for $name {}
        impl PageSize for $name {
            const SIZE: u64 = 1 << $shift;
            const SHIFT: u32 = $shift;
        }
    };
}

page_size!(
    /// 4 KiB base page.
    Size4K,
    12
);
page_size!(
    /// 2 MiB superpage (PAE and long-mode PDE with `PS=1`).
    Size2M,
    21
);
page_size!(
    /// 4 MiB superpage (32-bit PDE with `PS=1`).
    Size4M,
    22
);
page_size!(
    /// 1 GiB superpage (long-mode PDPTE with `PS=1`).
    Size1G,
    30
);
