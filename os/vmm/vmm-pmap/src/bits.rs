//! Page-table entry bits.
//!
//! The walker works on raw `u64` entries (32-bit tables are widened on read)
//! and these masks. [`EntryBits`] is a typed view of the same layout for code
//! that inspects individual fields.

use bitfield_struct::bitfield;
use vmm_addresses::PhysicalAddress;

pub const PTE_P: u64 = 1 << 0;
pub const PTE_RW: u64 = 1 << 1;
pub const PTE_US: u64 = 1 << 2;
pub const PTE_PWT: u64 = 1 << 3;
pub const PTE_PCD: u64 = 1 << 4;
pub const PTE_A: u64 = 1 << 5;
pub const PTE_D: u64 = 1 << 6;
/// Page size (PDE / PDPTE only).
pub const PDE_PS: u64 = 1 << 7;
/// PAT selector in a 4 KiB PTE; shares its position with `PDE_PS`.
pub const PTE_PAT: u64 = 1 << 7;
pub const PTE_G: u64 = 1 << 8;
/// Software bit: process stack page retired by `unmap_stack`, reusable.
pub const PTE_AVAILABLE1: u64 = 1 << 9;
/// Software bit: page is shared, its frame is not owned by the mapping.
pub const PTE_AVAILABLE2: u64 = 1 << 10;
/// PAT selector in a superpage PDE / PDPTE.
pub const PDE_LARGE_PAT: u64 = 1 << 12;
pub const PTE_NX: u64 = 1 << 63;

/// Attribute part of an entry.
pub const PTE_ATTR_MASK: u64 = 0xFFF;
/// Frame address of a 64-bit entry.
pub const PTE_ADDR_MASK: u64 = 0x0000_FFFF_FFFF_F000;
/// Frame address of a PAE page-directory-pointer table in CR3 (32-byte aligned).
pub const PAE_ROOT_MASK: u64 = 0xFFFF_FFE0;
/// Cache-control bits inherited by table reads.
pub const TABLE_ATTR_MASK: u64 = PTE_PWT | PTE_PCD;

/// Typed view of a 64-bit page-table entry.
///
/// | Bits   | Field |
/// |--------|-------|
/// | 0      | `present` |
/// | 1      | `writable` |
/// | 2      | `user` |
/// | 3      | `write_through` |
/// | 4      | `cache_disabled` |
/// | 5      | `accessed` |
/// | 6      | `dirty` (leaf only) |
/// | 7      | `size_or_pat`: PS in PDE/PDPTE, PAT in a PTE |
/// | 8      | `global` |
/// | 9      | `retired` (software) |
/// | 10     | `shared` (software) |
/// | 11     | software, unused |
/// | 12..52 | frame bits 51:12 (bit 12 is PAT for superpages) |
/// | 52..63 | ignored |
/// | 63     | `no_execute` |
///
/// ```rust
/// # use vmm_pmap::{EntryBits, PTE_P, PTE_RW, PTE_AVAILABLE2};
/// # use vmm_addresses::PhysicalAddress;
/// let e = EntryBits::from_bits(0x0012_3000 | PTE_P | PTE_RW | PTE_AVAILABLE2);
/// assert!(e.present() && e.writable() && e.shared());
/// assert_eq!(e.frame(), PhysicalAddress::new(0x0012_3000));
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct EntryBits {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    pub write_through: bool,
    pub cache_disabled: bool,
    pub accessed: bool,
    pub dirty: bool,
    pub size_or_pat: bool,
    pub global: bool,
    pub retired: bool,
    pub shared: bool,
    pub os_bit11: bool,
    #[bits(40)]
    frame_bits: u64,
    #[bits(11)]
    pub os_high: u16,
    pub no_execute: bool,
}

impl EntryBits {
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame_bits() << 12)
    }

    #[inline]
    #[must_use]
    pub const fn with_frame(self, pa: PhysicalAddress) -> Self {
        self.with_frame_bits(pa.as_u64() >> 12)
    }

    /// A present, writable, user-accessible leaf for a process page.
    #[inline]
    #[must_use]
    pub const fn user_page(pa: PhysicalAddress, writable: bool) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(writable)
            .with_user(true)
            .with_frame(pa)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_and_masks_agree() {
        let raw = 0x8000_0001_2345_6000 | PTE_P | PTE_US | PTE_AVAILABLE1 | PTE_PAT;
        let e = EntryBits::from_bits(raw);
        assert!(e.present() && e.user() && e.retired() && e.size_or_pat());
        assert!(!e.shared() && !e.writable());
        assert!(e.no_execute());
        assert_eq!(e.frame().as_u64(), raw & PTE_ADDR_MASK);
    }

    #[test]
    fn user_page_sets_expected_bits() {
        let e = EntryBits::user_page(PhysicalAddress::new(0x5000), true);
        assert_eq!(e.into_bits(), 0x5000 | PTE_P | PTE_RW | PTE_US);
    }
}
