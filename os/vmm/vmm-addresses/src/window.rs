use crate::{PAGE_MASK, PAGE_SHIFT, PhysicalAddress, VirtualAddress};

/// Fixed-offset mapping between a physical range and a virtual range.
///
/// The VMM memory pool is mapped linearly: pool page `i` lives at
/// `phys_base + i * 4096` and is reachable at `virt_base + i * 4096`. All
/// conversions between the two address spaces for pool memory go through
/// this type.
///
/// ```text
///   phys_base                      phys_base + len
///   |==============================|      physical
///   virt_base                      virt_base + len
///   |==============================|      virtual
/// ```
///
/// ```rust
/// # use vmm_addresses::*;
/// let w = PhysWindow::new(
///     PhysicalAddress::new(0x0010_0000),
///     VirtualAddress::new(0x4000_0000),
///     0x40_0000,
/// );
/// let va = w.phys_to_virt(PhysicalAddress::new(0x0010_2345));
/// assert_eq!(va, VirtualAddress::new(0x4000_2345));
/// assert_eq!(w.virt_to_phys(va), PhysicalAddress::new(0x0010_2345));
/// assert_eq!(w.page_index_of(va), 2);
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PhysWindow {
    phys_base: PhysicalAddress,
    virt_base: VirtualAddress,
    len: u64,
}

impl PhysWindow {
    /// Describe a window of `len` bytes.
    ///
    /// # Panics
    /// If either base or `len` is not page aligned.
    #[must_use]
    pub const fn new(phys_base: PhysicalAddress, virt_base: VirtualAddress, len: u64) -> Self {
        assert!(phys_base.as_u64() & PAGE_MASK == 0);
        assert!(virt_base.as_u64() & PAGE_MASK == 0);
        assert!(len & PAGE_MASK == 0);
        Self {
            phys_base,
            virt_base,
            len,
        }
    }

    #[inline]
    #[must_use]
    pub const fn phys_base(&self) -> PhysicalAddress {
        self.phys_base
    }

    #[inline]
    #[must_use]
    pub const fn virt_base(&self) -> VirtualAddress {
        self.virt_base
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of base pages covered by the window.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn page_count(&self) -> usize {
        (self.len >> PAGE_SHIFT) as usize
    }

    #[inline]
    #[must_use]
    pub const fn contains_phys(&self, pa: PhysicalAddress) -> bool {
        let pa = pa.as_u64();
        pa >= self.phys_base.as_u64() && pa - self.phys_base.as_u64() < self.len
    }

    #[inline]
    #[must_use]
    pub const fn contains_virt(&self, va: VirtualAddress) -> bool {
        let va = va.as_u64();
        va >= self.virt_base.as_u64() && va - self.virt_base.as_u64() < self.len
    }

    /// Virtual alias of a physical address inside the window.
    ///
    /// # Panics
    /// If `pa` lies outside the window.
    #[inline]
    #[must_use]
    pub fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        assert!(self.contains_phys(pa), "{pa} outside physical window");
        self.virt_base + (pa - self.phys_base)
    }

    /// Physical address backing a virtual address inside the window.
    ///
    /// # Panics
    /// If `va` lies outside the window.
    #[inline]
    #[must_use]
    pub fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        assert!(self.contains_virt(va), "{va} outside virtual window");
        self.phys_base + (va - self.virt_base)
    }

    /// Index of the base page holding `va`.
    ///
    /// # Panics
    /// If `va` lies outside the window.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn page_index_of(&self, va: VirtualAddress) -> usize {
        assert!(self.contains_virt(va), "{va} outside virtual window");
        ((va - self.virt_base) >> PAGE_SHIFT) as usize
    }

    /// Virtual address of base page `index`.
    ///
    /// # Panics
    /// If `index` is past the end of the window.
    #[inline]
    #[must_use]
    pub fn page_virt(&self, index: usize) -> VirtualAddress {
        assert!(index < self.page_count(), "page index {index} out of range");
        self.virt_base + ((index as u64) << PAGE_SHIFT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> PhysWindow {
        PhysWindow::new(
            PhysicalAddress::new(0x20_0000),
            VirtualAddress::new(0x7f00_0000_0000),
            16 * 4096,
        )
    }

    #[test]
    fn edges_are_half_open() {
        let w = window();
        assert!(w.contains_phys(PhysicalAddress::new(0x20_0000)));
        assert!(w.contains_phys(PhysicalAddress::new(0x20_FFFF)));
        assert!(!w.contains_phys(PhysicalAddress::new(0x21_0000)));
        assert!(!w.contains_phys(PhysicalAddress::new(0x1F_FFFF)));
        assert!(!w.contains_virt(VirtualAddress::new(0x7f00_0001_0000)));
    }

    #[test]
    fn page_index_and_page_virt_agree() {
        let w = window();
        for i in 0..w.page_count() {
            let va = w.page_virt(i);
            assert_eq!(w.page_index_of(va + 0x123), i);
        }
    }

    #[test]
    #[should_panic(expected = "outside physical window")]
    fn phys_outside_window_panics() {
        let _ = window().phys_to_virt(PhysicalAddress::new(0x1000));
    }
}
