//! # Process address spaces
//!
//! VMM-internal processes run in the low part of a 4-level address space,
//! below [`MemoryLayout::process_limit`]. Each process owns three pages of
//! paging structure; everything above the first gigabyte is shared with the
//! VMM by copying the active root's entries.
//!
//! ```text
//! PML4 (private copy)        PDPT (private)              PD (private)
//! [0] ──────────────────►    [0] ──────────────────►     0 GiB .. 1 GiB
//! [1..512] = VMM's           [1..4] = VMM's              (process pages)
//!                            [4..512] = 0
//! ```
//!
//! Process virtual memory is managed through the *active* tables:
//!
//! | Range                                   | Use |
//! |-----------------------------------------|-----|
//! | `PROCESS_MAP_FLOOR..PROCESS_SHARED_START` | shared pages, allocated top-down |
//! | `..PROCESS_STACK_TOP`                    | stacks, allocated top-down |
//!
//! Two software PTE bits carry ownership: `AVAILABLE2` marks a shared page
//! whose frame belongs to someone else, `AVAILABLE1` a retired stack page
//! that [`map_stack`](MemorySubsystem::map_stack) may hand out again.
//!
//! [`MemoryLayout::process_limit`]: vmm_info::MemoryLayout::process_limit

use crate::error::ProcessError;
use crate::subsystem::MemorySubsystem;
use log::{debug, trace};
use vmm_addresses::{PAGE_MASK, PhysicalAddress, Size4K, VirtualAddress};
use vmm_info::memory::{PROCESS_MAP_FLOOR, PROCESS_SHARED_START, PROCESS_STACK_TOP};
use vmm_pmap::{
    EntryBits, PTE_ADDR_MASK, PTE_ATTR_MASK, PTE_AVAILABLE1, PTE_AVAILABLE2, PTE_P, PTE_RW,
    PTE_US,
};

const PAGE: u64 = 4096;
const PAGE_2M: u64 = 2 * 1024 * 1024;

/// Attributes of the private PML4 and PDPT links.
const LINK_ATTR: u64 = PTE_P | PTE_RW | PTE_US;

impl MemorySubsystem<'_> {
    /// Raw view of a paging-structure page inside the pool.
    fn table(&self, phys: PhysicalAddress) -> *mut u64 {
        self.pool
            .phys_to_virt(PhysicalAddress::new(phys.as_u64() & PTE_ADDR_MASK))
            .as_mut_ptr()
    }

    /// Create an empty process address space and return its root.
    ///
    /// # Errors
    /// [`ProcessError::OutOfMemory`] if the three table pages cannot be
    /// allocated.
    ///
    /// # Panics
    /// If the VMM does not use 4-level paging, or the active root is not in
    /// the pool.
    pub fn process_alloc(&self) -> Result<PhysicalAddress, ProcessError> {
        assert_eq!(self.layout.vmm_levels, 4, "process address spaces need 4-level paging");
        let (_, pd) = self.pool.alloc_zeroed_page()?;
        let (_, pdpt) = match self.pool.alloc_zeroed_page() {
            Ok(page) => page,
            Err(e) => {
                self.pool.free_page_phys(pd);
                return Err(e.into());
            }
        };
        let (_, pml4) = match self.pool.alloc_zeroed_page() {
            Ok(page) => page,
            Err(e) => {
                self.pool.free_page_phys(pdpt);
                self.pool.free_page_phys(pd);
                return Err(e.into());
            }
        };

        let vmm_pml4 = self.table(PhysicalAddress::new(self.mmu.current_root()));
        let (new_pml4, new_pdpt) = (self.table(pml4), self.table(pdpt));
        // SAFETY: all four are pool pages; the new ones are exclusively ours.
        unsafe {
            core::ptr::copy_nonoverlapping(vmm_pml4, new_pml4, 512);
            new_pml4.write(pdpt.as_u64() | LINK_ATTR);
            let shared = vmm_pml4.read();
            if shared & PTE_P != 0 {
                let vmm_pdpt = self.table(PhysicalAddress::new(shared));
                core::ptr::copy_nonoverlapping(vmm_pdpt.add(1), new_pdpt.add(1), 3);
            }
            new_pdpt.write(pd.as_u64() | LINK_ATTR);
        }
        debug!("process address space {pml4} created");
        Ok(pml4)
    }

    /// Free the paging structure of a process created by
    /// [`process_alloc`](Self::process_alloc). Its pages must have been
    /// released with [`unmap_all`](Self::unmap_all) first.
    pub fn process_free(&self, root: PhysicalAddress) {
        // SAFETY: `root` and its first links are pool pages built by
        // `process_alloc`.
        let (pdpt, pd) = unsafe {
            let pdpt = PhysicalAddress::new(self.table(root).read() & PTE_ADDR_MASK);
            let pd = PhysicalAddress::new(self.table(pdpt).read() & PTE_ADDR_MASK);
            (pdpt, pd)
        };
        self.pool.free_page_phys(pd);
        self.pool.free_page_phys(pdpt);
        self.pool.free_page_phys(root);
        debug!("process address space {root} freed");
    }

    /// Page-aligned start and page count of a process range.
    fn user_range(
        &self,
        virt: VirtualAddress,
        len: usize,
    ) -> Result<(VirtualAddress, u64), ProcessError> {
        let limit = self.layout.process_limit;
        let start = virt.as_u64();
        let end = start.checked_add(len as u64).ok_or(ProcessError::OutOfRange)?;
        if start >= limit || end >= limit {
            return Err(ProcessError::OutOfRange);
        }
        let pages = ((start & PAGE_MASK) + len as u64).div_ceil(PAGE);
        Ok((virt.page::<Size4K>(), pages))
    }

    /// Install `pte` for the unmapped process page `virt`.
    fn map_page(&self, virt: VirtualAddress, pte: u64) -> Result<(), ProcessError> {
        let mut m = self.current_tables();
        m.seek(virt, 1);
        m.autoalloc(&self.pool)?;
        assert!(m.read() & PTE_P == 0, "process page {virt} is already mapped");
        let stored = m.write(pte, PTE_ATTR_MASK);
        debug_assert!(stored.is_ok());
        m.close();
        self.mmu.flush_all();
        Ok(())
    }

    /// Back stack page `virt` with a fresh page, or revive a retired one.
    fn map_stack_page(&self, virt: VirtualAddress) -> Result<(), ProcessError> {
        let mut m = self.current_tables();
        m.seek(virt, 1);
        m.autoalloc(&self.pool)?;
        let mut pte = m.read();
        if pte & PTE_P == 0 {
            let (_, phys) = self.pool.alloc_zeroed_page()?;
            pte = EntryBits::user_page(phys, true).into_bits();
        } else {
            pte &= !PTE_AVAILABLE1;
        }
        let stored = m.write(pte, PTE_ATTR_MASK);
        debug_assert!(stored.is_ok());
        m.close();
        self.mmu.flush_all();
        Ok(())
    }

    /// Leaf entry for `virt` in the active tables, `0` if absent.
    fn current_leaf(&self, virt: u64) -> u64 {
        let mut m = self.current_tables();
        m.seek(VirtualAddress::new(virt), 1);
        m.read()
    }

    /// Replace `[virt, virt + len)` with fresh zeroed, writable pages.
    ///
    /// # Errors
    /// - [`ProcessError::OutOfRange`] if the range leaves process space.
    /// - [`ProcessError::OutOfMemory`] if a page or table cannot be
    ///   allocated; pages mapped before that stay mapped.
    pub fn map_alloc(&self, virt: VirtualAddress, len: usize) -> Result<(), ProcessError> {
        let (base, pages) = self.user_range(virt, len)?;
        self.unmap(virt, len)?;
        for i in 0..pages {
            let (_, phys) = self.pool.alloc_zeroed_page()?;
            let page = base + i * PAGE;
            if let Err(e) = self.map_page(page, EntryBits::user_page(phys, true).into_bits()) {
                self.pool.free_page_phys(phys);
                return Err(e);
            }
        }
        trace!("process map_alloc {base} ({pages} pages)");
        Ok(())
    }

    /// Map the foreign frame `phys` at `virt`. The frame stays owned by its
    /// owner; [`unmap`](Self::unmap) leaves it alone.
    ///
    /// # Errors
    /// - [`ProcessError::OutOfRange`] if `virt` is not process space.
    /// - [`ProcessError::OutOfMemory`] if a table cannot be allocated.
    pub fn map_shared_physpage(
        &self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        writable: bool,
    ) -> Result<(), ProcessError> {
        let virt = virt.page::<Size4K>();
        if virt.as_u64() >= self.layout.process_limit {
            return Err(ProcessError::OutOfRange);
        }
        self.unmap(virt, 4096)?;
        let pte = EntryBits::user_page(phys, writable)
            .with_shared(true)
            .into_bits();
        self.map_page(virt, pte)
    }

    /// Physical address of `virt` in the process rooted at `root`.
    #[must_use]
    pub fn process_virt_to_phys(
        &self,
        root: PhysicalAddress,
        virt: VirtualAddress,
    ) -> Option<PhysicalAddress> {
        let _guard = self.process_v2p.lock();
        let mut m = self.tables_at(root.as_u64());
        m.seek(virt, 1);
        let pte = m.read();
        m.close();
        (pte & PTE_P != 0)
            .then(|| PhysicalAddress::new((pte & PTE_ADDR_MASK) | (virt.as_u64() & PAGE_MASK)))
    }

    /// Make `[buf, buf + len)` of the process rooted at `source` visible in
    /// the active process, below `PROCESS_SHARED_START`.
    ///
    /// Returns the address of `buf`'s first byte in the active process.
    ///
    /// # Errors
    /// - [`ProcessError::OutOfRange`] for an empty or wrapping buffer.
    /// - [`ProcessError::Unmapped`] if a source page is not mapped; the
    ///   pages shared so far are unmapped again.
    /// - [`ProcessError::OutOfMemory`] if a table cannot be allocated.
    ///
    /// # Panics
    /// If the shared window has no room left.
    #[allow(clippy::cast_possible_truncation)]
    pub fn map_shared(
        &self,
        source: PhysicalAddress,
        buf: VirtualAddress,
        len: usize,
        writable: bool,
    ) -> Result<VirtualAddress, ProcessError> {
        if len == 0 {
            return Err(ProcessError::OutOfRange);
        }
        let start = buf.as_u64();
        let end = start.checked_add(len as u64).ok_or(ProcessError::OutOfRange)?;
        let first = start & !PAGE_MASK;
        let pages = (end - first).div_ceil(PAGE);

        let mut user = PROCESS_SHARED_START;
        'scan: loop {
            for _ in 0..pages {
                user -= PAGE;
                assert!(user > PROCESS_MAP_FLOOR, "no room to share {len} bytes");
                if self.current_leaf(user) & PTE_P != 0 {
                    continue 'scan;
                }
            }
            break;
        }

        let offset = start & PAGE_MASK;
        for i in 0..pages {
            let src = VirtualAddress::new(first + i * PAGE);
            let Some(phys) = self.process_virt_to_phys(source, src) else {
                self.unmap(VirtualAddress::new(user + offset), len)?;
                return Err(ProcessError::Unmapped { virt: src });
            };
            self.map_shared_physpage(VirtualAddress::new(user + i * PAGE), phys, writable)?;
        }
        trace!("process map_shared {buf}+{len:#x} -> {user:#x}");
        Ok(VirtualAddress::new(user + offset))
    }

    /// Map a stack of at least `len` bytes below `PROCESS_STACK_TOP`,
    /// reusing retired stack pages. Returns the stack top (exclusive).
    ///
    /// # Errors
    /// [`ProcessError::OutOfMemory`] if a page or table cannot be allocated.
    ///
    /// # Panics
    /// If the stack window has no room left.
    pub fn map_stack(&self, len: usize) -> Result<VirtualAddress, ProcessError> {
        let pages = (len as u64).div_ceil(PAGE);
        let mut top = PROCESS_STACK_TOP;
        'scan: loop {
            top -= PAGE;
            for i in 0..pages {
                let v = top - i * PAGE;
                assert!(v > PROCESS_MAP_FLOOR, "no room for a {len}-byte stack");
                let pte = self.current_leaf(v);
                if pte & PTE_P != 0 && pte & PTE_AVAILABLE1 == 0 {
                    top = v;
                    continue 'scan;
                }
            }
            break;
        }
        for i in 0..pages {
            self.map_stack_page(VirtualAddress::new(top - i * PAGE))?;
        }
        trace!("process stack {pages} pages below {:#x}", top + PAGE);
        Ok(VirtualAddress::new(top + PAGE))
    }

    /// Unmap `[virt, virt + len)` and free the frames it owns.
    ///
    /// # Errors
    /// [`ProcessError::OutOfRange`] if the range leaves process space.
    pub fn unmap(&self, virt: VirtualAddress, len: usize) -> Result<(), ProcessError> {
        let (base, pages) = self.user_range(virt, len)?;
        let mut m = self.current_tables();
        for i in 0..pages {
            m.seek(base + i * PAGE, 1);
            let pte = m.read();
            if pte & PTE_P == 0 {
                continue;
            }
            if pte & PTE_AVAILABLE2 == 0 {
                self.pool.free_page_phys(PhysicalAddress::new(pte & PTE_ADDR_MASK));
            }
            let stored = m.write(0, PTE_ATTR_MASK);
            debug_assert!(stored.is_ok());
        }
        m.close();
        self.mmu.flush_all();
        Ok(())
    }

    /// Retire the stack pages of `[virt, virt + len)`. They stay mapped and
    /// are reused by the next [`map_stack`](Self::map_stack).
    ///
    /// # Errors
    /// [`ProcessError::OutOfRange`] if the range leaves process space.
    pub fn unmap_stack(&self, virt: VirtualAddress, len: usize) -> Result<(), ProcessError> {
        let (base, pages) = self.user_range(virt, len)?;
        let mut m = self.current_tables();
        for i in 0..pages {
            m.seek(base + i * PAGE, 1);
            let pte = m.read();
            if pte & PTE_P == 0 || pte & PTE_AVAILABLE2 != 0 {
                continue;
            }
            let stored = m.write(pte | PTE_AVAILABLE1, PTE_ATTR_MASK);
            debug_assert!(stored.is_ok());
        }
        m.close();
        self.mmu.flush_all();
        Ok(())
    }

    /// Unmap all process pages of the active address space and free its
    /// page tables below the process limit.
    ///
    /// # Panics
    /// If the process limit is not a multiple of 2 MiB.
    #[allow(clippy::cast_possible_truncation)]
    pub fn unmap_all(&self) {
        let limit = self.layout.process_limit;
        assert!(limit.is_multiple_of(PAGE_2M), "process limit {limit:#x} is not 2 MiB aligned");
        let whole = self.unmap(VirtualAddress::new(0), (limit - 1) as usize);
        assert!(whole.is_ok(), "process space does not fit below the limit");
        let mut m = self.current_tables();
        for v in (0..limit).step_by(PAGE_2M as usize) {
            m.seek(VirtualAddress::new(v), 2);
            let pde = m.read();
            if pde & PTE_P == 0 {
                continue;
            }
            self.pool.free_page_phys(PhysicalAddress::new(pde & PTE_ADDR_MASK));
            let stored = m.write(0, PTE_ATTR_MASK);
            debug_assert!(stored.is_ok());
        }
        m.close();
        self.mmu.flush_all();
    }

    /// Activate the address space rooted at `root`; returns the previous
    /// root.
    pub fn switch(&self, root: PhysicalAddress) -> PhysicalAddress {
        PhysicalAddress::new(self.mmu.switch_root(root.as_u64()))
    }
}
