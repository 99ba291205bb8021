use crate::memory::{
    HPHYS_ADDR, MAPMEM_ADDR_END, MAPMEM_ADDR_START, NUM_OF_HPHYS_PAGES, PAGE_SIZE,
    PROCESS_LIMIT, VMM_PAGING_LEVELS,
};
use vmm_addresses::{PhysicalAddress, VirtualAddress};

/// Runtime view of the VMM address-space layout.
///
/// [`Default`] reproduces the compile-time constants of [`crate::memory`].
/// Host-side tests shrink the arena to exercise wrap-around, or disable the
/// host-physical window (`hphys_pages == 0`) so every mapping takes the
/// page-table path.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryLayout {
    /// First address of the mapmem arena.
    pub mapmem_start: VirtualAddress,
    /// End (exclusive) of the mapmem arena.
    pub mapmem_end: VirtualAddress,
    /// Base of the static host-physical window.
    pub hphys_base: VirtualAddress,
    /// Pages covered by the host-physical window; `0` disables it.
    pub hphys_pages: u64,
    /// Levels of the VMM's own page tables (2, 3 or 4).
    pub vmm_levels: u8,
    /// Upper bound (exclusive) of process virtual addresses.
    pub process_limit: u64,
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self {
            mapmem_start: VirtualAddress::new(MAPMEM_ADDR_START),
            mapmem_end: VirtualAddress::new(MAPMEM_ADDR_END),
            hphys_base: VirtualAddress::new(HPHYS_ADDR),
            hphys_pages: NUM_OF_HPHYS_PAGES,
            vmm_levels: VMM_PAGING_LEVELS,
            process_limit: PROCESS_LIMIT,
        }
    }
}

impl MemoryLayout {
    /// Replace the arena range.
    ///
    /// # Panics
    /// If the range is empty or not page aligned.
    #[must_use]
    pub fn with_mapmem(mut self, start: VirtualAddress, end: VirtualAddress) -> Self {
        assert!(start.as_u64().is_multiple_of(PAGE_SIZE) && end.as_u64().is_multiple_of(PAGE_SIZE));
        assert!(start < end, "empty mapmem arena");
        self.mapmem_start = start;
        self.mapmem_end = end;
        self
    }

    /// Disable the host-physical fast path.
    #[must_use]
    pub const fn without_hphys_window(mut self) -> Self {
        self.hphys_pages = 0;
        self
    }

    #[inline]
    #[must_use]
    pub fn in_mapmem(&self, va: VirtualAddress) -> bool {
        va >= self.mapmem_start && va < self.mapmem_end
    }

    /// Number of pages in the arena.
    #[inline]
    #[must_use]
    pub fn mapmem_pages(&self) -> u64 {
        (self.mapmem_end - self.mapmem_start) / PAGE_SIZE
    }

    /// Address of `[phys, phys + len)` inside the host-physical window, if
    /// the whole range is covered by it.
    #[must_use]
    pub fn hphys_virt(&self, phys: PhysicalAddress, len: u64) -> Option<VirtualAddress> {
        let first = phys.frame_number();
        let last = phys.checked_add(len.max(1) - 1)?.frame_number();
        if first < self.hphys_pages && last < self.hphys_pages {
            self.hphys_base.checked_add(phys.as_u64())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_constants() {
        let l = MemoryLayout::default();
        assert_eq!(l.mapmem_pages(), (MAPMEM_ADDR_END - MAPMEM_ADDR_START) / PAGE_SIZE);
        assert!(l.in_mapmem(VirtualAddress::new(MAPMEM_ADDR_START)));
        assert!(!l.in_mapmem(VirtualAddress::new(MAPMEM_ADDR_END)));
    }

    #[test]
    fn hphys_window_covers_first_four_gib() {
        let l = MemoryLayout::default();
        assert_eq!(
            l.hphys_virt(PhysicalAddress::new(0x1234), 16),
            Some(VirtualAddress::new(HPHYS_ADDR + 0x1234))
        );
        assert_eq!(l.hphys_virt(PhysicalAddress::new(0xFFFF_F000), 0x1001), None);
        assert_eq!(l.hphys_virt(PhysicalAddress::new(0x1_0000_0000), 1), None);
    }

    #[test]
    fn disabled_window_never_matches() {
        let l = MemoryLayout::default().without_hphys_window();
        assert_eq!(l.hphys_virt(PhysicalAddress::zero(), 1), None);
    }
}
