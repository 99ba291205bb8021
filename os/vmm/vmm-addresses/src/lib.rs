//! # VMM Address Types
//!
//! Strongly typed wrappers for the two address spaces the hypervisor's memory
//! subsystem juggles all the time:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | Host-physical (or, by context, guest-physical) address. |
//! | [`VirtualAddress`] | Address in the VMM's own virtual address space. |
//!
//! Both are `#[repr(transparent)]` wrappers around `u64`. There is no implicit
//! conversion between them. The only bridge is [`PhysWindow`], which describes
//! the fixed-offset mapping of the VMM memory pool and exposes exactly one
//! conversion in each direction ([`PhysWindow::phys_to_virt`] and
//! [`PhysWindow::virt_to_phys`]).
//!
//! ## Page Sizes
//!
//! Marker types implementing [`PageSize`] select the granularity for
//! alignment helpers:
//!
//! - [`Size4K`]: base pages
//! - [`Size2M`]: PAE / long-mode PDE superpages
//! - [`Size4M`]: 32-bit (2-level) PDE superpages
//! - [`Size1G`]: long-mode PDPTE superpages
//!
//! ```rust
//! # use vmm_addresses::*;
//! let pa = PhysicalAddress::new(0x0000_0010_2000_0042);
//! assert_eq!(pa.page::<Size4K>().as_u64(), 0x0000_0010_2000_0000);
//! assert_eq!(pa.offset::<Size4K>(), 0x42);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod page_size;
mod physical_address;
mod virtual_address;
mod window;

pub use crate::page_size::{PageSize, Size1G, Size2M, Size4K, Size4M};
pub use crate::physical_address::PhysicalAddress;
pub use crate::virtual_address::VirtualAddress;
pub use crate::window::PhysWindow;

/// Base page size in bytes.
pub const PAGE_SIZE: u64 = Size4K::SIZE;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = Size4K::SHIFT;

/// Mask selecting the in-page offset of an address.
pub const PAGE_MASK: u64 = PAGE_SIZE - 1;

/// Number of base pages touched by a byte range starting `offset` bytes into
/// its first page and spanning `len` bytes.
///
/// A zero-length range still touches the page it starts in.
///
/// ```rust
/// # use vmm_addresses::pages_spanned;
/// assert_eq!(pages_spanned(0, 4096), 1);
/// assert_eq!(pages_spanned(0xFFF, 2), 2);
/// assert_eq!(pages_spanned(0x10, 0), 1);
/// ```
#[inline]
#[must_use]
pub const fn pages_spanned(offset: u64, len: u64) -> u64 {
    let n = (offset + len + PAGE_MASK) >> PAGE_SHIFT;
    if n == 0 { 1 } else { n }
}
