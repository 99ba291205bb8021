use crate::error::AllocError;
use crate::frame::FrameAllocator;
use crate::heap::ByteAllocator;
use crate::page::PageDescriptor;
use crate::small::SmallAllocator;
use core::ops::Range;
use vmm_addresses::{PhysWindow, PhysicalAddress, VirtualAddress};
use vmm_pmap::{FrameAlloc, VmmTables};

/// Everything that hands out VMM pool memory: whole blocks from the buddy
/// allocator and small objects carved from arena pages.
pub struct PoolAllocator<'a> {
    frames: FrameAllocator<'a>,
    small: SmallAllocator,
}

impl<'a> PoolAllocator<'a> {
    /// # Panics
    /// See [`FrameAllocator::new`].
    pub fn new(
        window: PhysWindow,
        descriptors: &'a mut [PageDescriptor],
        reserved: &[Range<PhysicalAddress>],
    ) -> Self {
        Self {
            frames: FrameAllocator::new(window, descriptors, reserved),
            small: SmallAllocator::new(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> &FrameAllocator<'a> {
        &self.frames
    }

    #[inline]
    #[must_use]
    pub const fn window(&self) -> &PhysWindow {
        self.frames.window()
    }

    /// Table backend for page tables that live in this pool.
    #[must_use]
    pub const fn tables(&self) -> VmmTables {
        // SAFETY: the window describes pool memory that stays mapped for the
        // lifetime of the allocator, and VMM tables are allocated from it.
        unsafe { VmmTables::new(*self.frames.window()) }
    }

    /// # Errors
    /// [`AllocError::OutOfMemory`] if the pool is exhausted.
    #[inline]
    pub fn alloc_page(&self) -> Result<(VirtualAddress, PhysicalAddress), AllocError> {
        self.frames.alloc_page()
    }

    /// # Errors
    /// [`AllocError::OutOfMemory`] if the pool is exhausted.
    ///
    /// # Panics
    /// If `pages` exceeds the largest block.
    #[inline]
    pub fn alloc_pages(&self, pages: usize) -> Result<VirtualAddress, AllocError> {
        self.frames.alloc_pages(pages)
    }

    /// # Panics
    /// On a double free.
    #[inline]
    pub fn free_page(&self, virt: VirtualAddress) {
        self.frames.free_page(virt);
    }

    /// # Panics
    /// On a double free.
    #[inline]
    pub fn free_page_phys(&self, phys: PhysicalAddress) {
        self.frames.free_page_phys(phys);
    }

    /// Zeroed page; returns both addresses.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] if the pool is exhausted.
    pub fn alloc_zeroed_page(&self) -> Result<(VirtualAddress, PhysicalAddress), AllocError> {
        let (va, pa) = self.frames.alloc_page()?;
        // SAFETY: fresh pool page.
        unsafe { core::ptr::write_bytes(va.as_mut_ptr::<u8>(), 0, 4096) };
        Ok((va, pa))
    }

    /// # Errors
    /// [`AllocError::OutOfMemory`] if the pool is exhausted.
    #[inline]
    pub fn alloc(&self, len: usize) -> Result<VirtualAddress, AllocError> {
        self.small.alloc(&self.frames, len)
    }

    /// # Panics
    /// On a double free or a foreign pointer.
    #[inline]
    pub fn free(&self, ptr: VirtualAddress) {
        self.small.free(&self.frames, ptr);
    }

    #[inline]
    #[must_use]
    pub fn num_of_available_pages(&self) -> usize {
        self.frames.num_of_available_pages()
    }

    #[inline]
    #[must_use]
    pub const fn phys_in_vmm(&self, phys: PhysicalAddress) -> bool {
        self.frames.phys_in_vmm(phys)
    }

    #[inline]
    #[must_use]
    pub fn phys_to_virt(&self, phys: PhysicalAddress) -> VirtualAddress {
        self.frames.phys_to_virt(phys)
    }

    #[inline]
    #[must_use]
    pub fn virt_to_phys(&self, virt: VirtualAddress) -> PhysicalAddress {
        self.frames.virt_to_phys(virt)
    }
}

impl FrameAlloc for PoolAllocator<'_> {
    fn alloc_zeroed_table(&self) -> Option<PhysicalAddress> {
        self.frames.alloc_zeroed_table()
    }
}

impl ByteAllocator for PoolAllocator<'_> {
    fn alloc_bytes(&self, len: usize) -> Result<VirtualAddress, AllocError> {
        self.alloc(len)
    }

    unsafe fn free_bytes(&self, ptr: VirtualAddress) {
        self.free(ptr);
    }
}
