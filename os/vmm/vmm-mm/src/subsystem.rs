use crate::error::MapError;
use crate::mmu::HostMmu;
use core::sync::atomic::{AtomicBool, Ordering};
use log::{debug, info};
use vmm_addresses::{PhysicalAddress, VirtualAddress};
use vmm_alloc::{AllocError, PoolAllocator};
use vmm_info::MemoryLayout;
use vmm_pmap::{PDE_PS, PTE_A, PTE_ATTR_MASK, PTE_D, PTE_P, PTE_RW, Pmap, VmmTables};
use vmm_sync::SpinLock;

/// The VMM memory subsystem: pool allocators, the mapmem arena and process
/// address spaces, bound to one [`HostMmu`].
///
/// One instance exists per hypervisor; see [`crate::global`].
pub struct MemorySubsystem<'a> {
    pub(crate) pool: PoolAllocator<'a>,
    pub(crate) layout: MemoryLayout,
    pub(crate) mmu: &'a dyn HostMmu,
    /// Where the next arena scan starts.
    pub(crate) arena: SpinLock<VirtualAddress>,
    /// Serialises walks of other processes' tables.
    pub(crate) process_v2p: SpinLock<()>,
    /// Set once [`map_hphys_window`](Self::map_hphys_window) has installed
    /// the host-physical window.
    hphys_window: AtomicBool,
}

impl<'a> MemorySubsystem<'a> {
    /// # Panics
    /// If the layout's paging depth is not 2, 3 or 4.
    pub fn new(pool: PoolAllocator<'a>, layout: MemoryLayout, mmu: &'a dyn HostMmu) -> Self {
        assert!(
            (2..=4).contains(&layout.vmm_levels),
            "unsupported paging depth {}",
            layout.vmm_levels
        );
        info!(
            "mapmem arena {}..{} ({} pages)",
            layout.mapmem_start,
            layout.mapmem_end,
            layout.mapmem_pages()
        );
        Self {
            pool,
            layout,
            mmu,
            arena: SpinLock::new(layout.mapmem_start),
            process_v2p: SpinLock::new(()),
            hphys_window: AtomicBool::new(false),
        }
    }

    #[inline]
    #[must_use]
    pub const fn pool(&self) -> &PoolAllocator<'a> {
        &self.pool
    }

    #[inline]
    #[must_use]
    pub const fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    #[inline]
    #[must_use]
    pub fn mmu(&self) -> &dyn HostMmu {
        self.mmu
    }

    /// # Errors
    /// [`AllocError::OutOfMemory`] if the pool is exhausted.
    #[inline]
    pub fn alloc_page(&self) -> Result<(VirtualAddress, PhysicalAddress), AllocError> {
        self.pool.alloc_page()
    }

    /// # Errors
    /// [`AllocError::OutOfMemory`] if the pool is exhausted.
    #[inline]
    pub fn alloc_pages(&self, pages: usize) -> Result<VirtualAddress, AllocError> {
        self.pool.alloc_pages(pages)
    }

    #[inline]
    pub fn free_page(&self, virt: VirtualAddress) {
        self.pool.free_page(virt);
    }

    #[inline]
    pub fn free_page_phys(&self, phys: PhysicalAddress) {
        self.pool.free_page_phys(phys);
    }

    /// # Errors
    /// [`AllocError::OutOfMemory`] if the pool is exhausted.
    #[inline]
    pub fn alloc(&self, len: usize) -> Result<VirtualAddress, AllocError> {
        self.pool.alloc(len)
    }

    #[inline]
    pub fn free(&self, ptr: VirtualAddress) {
        self.pool.free(ptr);
    }

    #[inline]
    #[must_use]
    pub fn num_of_available_pages(&self) -> usize {
        self.pool.num_of_available_pages()
    }

    /// Pointer for dereferencing a VMM virtual address on this CPU.
    #[inline]
    #[must_use]
    pub fn host_ptr<T>(&self, virt: VirtualAddress) -> *mut T {
        self.mmu.host_ptr(virt).cast()
    }

    /// Window address of `[phys, phys + len)`, if the window is mapped and
    /// covers the range.
    pub(crate) fn hphys_window_virt(
        &self,
        phys: PhysicalAddress,
        len: u64,
    ) -> Option<VirtualAddress> {
        if !self.hphys_window.load(Ordering::Acquire) {
            return None;
        }
        self.layout.hphys_virt(phys, len)
    }

    /// Cursor over the tables of the active address space.
    pub(crate) fn current_tables(&self) -> Pmap<VmmTables> {
        self.tables_at(self.mmu.current_root())
    }

    /// Cursor over the tables rooted at `root`.
    pub(crate) fn tables_at(&self, root: u64) -> Pmap<VmmTables> {
        Pmap::open_vmm(self.pool.tables(), root, self.layout.vmm_levels)
    }

    /// Map the host-physical window with 2 MiB pages into the active tables.
    ///
    /// Only 4-level tables get a window; otherwise this does nothing and
    /// every mapping goes through the arena.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if a table page cannot be allocated.
    ///
    /// # Panics
    /// If the window base is not 2 MiB aligned.
    pub fn map_hphys_window(&self) -> Result<(), MapError> {
        const PAGES_2M: usize = 512;
        if self.layout.vmm_levels != 4 || self.layout.hphys_pages == 0 {
            debug!("no host-physical window for this layout");
            return Ok(());
        }
        let base = self.layout.hphys_base;
        assert!(base.as_u64().trailing_zeros() >= 21, "hphys window at {base} is not 2 MiB aligned");
        let mut m = self.current_tables();
        for page in (0..self.layout.hphys_pages).step_by(PAGES_2M) {
            m.seek(base + (page << 12), 2);
            m.autoalloc(&self.pool)?;
            m.read();
            let pde = (page << 12) | PTE_P | PTE_RW | PDE_PS | PTE_A | PTE_D;
            let stored = m.write(pde, PTE_ATTR_MASK);
            debug_assert!(stored.is_ok());
        }
        m.close();
        self.mmu.flush_all();
        self.hphys_window.store(true, Ordering::Release);
        info!(
            "host-physical window at {base}: {} MiB",
            self.layout.hphys_pages >> 8
        );
        Ok(())
    }
}
