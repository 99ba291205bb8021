//! # Buddy frame allocator
//!
//! Blocks of `2^n` pages (`n < NUM_OF_ORDERS`) carved from the pool. Block
//! `i` of order `n` starts at page `i` with `i` a multiple of `2^n`, and its
//! buddy is page `i ^ 2^n`.
//!
//! ```text
//! order 2   [ 0 . . . ][ 4 . . . ]
//! order 1   [ 0 . ][ 2 . ]
//! order 0   [0][1]
//!              ▲ buddy of 0 is 1, buddy of 0 at order 1 is 2
//! ```
//!
//! A free block is never next to a free buddy of the same order: freeing
//! merges upwards until that holds again.

use crate::error::AllocError;
use crate::page::{FreeLists, PageDescriptor, PageType};
use core::ops::Range;
use log::{info, trace, warn};
use vmm_addresses::{
    PAGE_SHIFT, PAGE_SIZE, PhysWindow, PhysicalAddress, Size4K, VirtualAddress,
};
use vmm_info::memory::NUM_OF_ORDERS;
use vmm_pmap::FrameAlloc;
use vmm_sync::SpinLock;

/// Smallest order whose blocks hold `pages` pages.
///
/// # Panics
/// If no order is large enough.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn order_for_pages(pages: usize) -> u8 {
    let order = pages.max(1).next_power_of_two().trailing_zeros() as usize;
    assert!(
        order < NUM_OF_ORDERS,
        "allocation of {pages} pages exceeds the largest block"
    );
    order as u8
}

pub struct FrameAllocator<'a> {
    window: PhysWindow,
    lists: SpinLock<FreeLists<'a>>,
}

impl<'a> FrameAllocator<'a> {
    /// Build the allocator over `window`, one descriptor per pool page.
    ///
    /// Pages inside any of `reserved` stay [`PageType::Reserved`]; every
    /// other page is freed through the regular path, so the lists start out
    /// fully merged.
    ///
    /// # Panics
    /// If `descriptors` does not match the window's page count.
    pub fn new(
        window: PhysWindow,
        descriptors: &'a mut [PageDescriptor],
        reserved: &[Range<PhysicalAddress>],
    ) -> Self {
        assert_eq!(
            descriptors.len(),
            window.page_count(),
            "one descriptor per pool page"
        );
        let mut lists = FreeLists::new(descriptors);
        let mut kept = 0_usize;
        for idx in 0..lists.len() {
            let pa = window.phys_base() + ((idx as u64) << PAGE_SHIFT);
            if reserved.iter().any(|r| r.contains(&pa)) {
                kept += 1;
                continue;
            }
            lists.set(idx, PageType::Allocated, 0);
            release(&mut lists, idx);
        }
        info!(
            "frame allocator: pool {}..{} ({} pages, {kept} reserved)",
            window.phys_base(),
            window.phys_base() + window.len(),
            window.page_count()
        );
        Self {
            window,
            lists: SpinLock::new(lists),
        }
    }

    #[inline]
    #[must_use]
    pub const fn window(&self) -> &PhysWindow {
        &self.window
    }

    /// Whether `phys` belongs to the VMM pool.
    #[inline]
    #[must_use]
    pub const fn phys_in_vmm(&self, phys: PhysicalAddress) -> bool {
        self.window.contains_phys(phys)
    }

    #[inline]
    #[must_use]
    pub fn phys_to_virt(&self, phys: PhysicalAddress) -> VirtualAddress {
        self.window.phys_to_virt(phys)
    }

    #[inline]
    #[must_use]
    pub fn virt_to_phys(&self, virt: VirtualAddress) -> PhysicalAddress {
        self.window.virt_to_phys(virt)
    }

    /// Allocate a block of `2^order` pages.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] if neither that order nor a larger one
    /// has a free block.
    ///
    /// # Panics
    /// If `order` is out of range or the lists are corrupt.
    #[allow(clippy::cast_possible_truncation)]
    pub fn alloc_order(&self, order: u8) -> Result<VirtualAddress, AllocError> {
        let want = usize::from(order);
        assert!(want < NUM_OF_ORDERS, "order {order} out of range");
        let idx = {
            let mut lists = self.lists.lock();
            let Some(mut have) = (want..NUM_OF_ORDERS).find(|&n| lists.count(n) > 0) else {
                drop(lists);
                warn!("pool exhausted at order {order}");
                return Err(AllocError::OutOfMemory { order });
            };
            let idx = lists.pop(have).ok_or(AllocError::OutOfMemory { order })?;
            let head = lists.page(idx);
            assert!(
                head.kind() == PageType::Free && usize::from(head.order()) == have,
                "free list {have} holds page {idx} in state {:?}/{}",
                head.kind(),
                head.order()
            );
            // Split, keeping the lower half and listing the upper one.
            while have > want {
                have -= 1;
                let upper = idx + (1 << have);
                lists.set(upper, PageType::Free, have as u8);
                lists.push(have, upper);
            }
            lists.set(idx, PageType::Allocated, order);
            idx
        };
        let va = self.window.page_virt(idx);
        trace!("alloc order {order} -> {va}");
        Ok(va)
    }

    /// Allocate at least `pages` contiguous pages.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] if the pool is exhausted.
    ///
    /// # Panics
    /// If `pages` exceeds the largest block size.
    pub fn alloc_pages(&self, pages: usize) -> Result<VirtualAddress, AllocError> {
        self.alloc_order(order_for_pages(pages))
    }

    /// Allocate one page; returns both of its addresses.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] if the pool is exhausted.
    pub fn alloc_page(&self) -> Result<(VirtualAddress, PhysicalAddress), AllocError> {
        let va = self.alloc_order(0)?;
        Ok((va, self.window.virt_to_phys(va)))
    }

    /// Return a block obtained from this allocator.
    ///
    /// # Panics
    /// If `virt` is not the start of an allocated block (double free or
    /// foreign pointer).
    pub fn free_page(&self, virt: VirtualAddress) {
        assert!(
            virt.is_aligned::<Size4K>(),
            "free of unaligned address {virt}"
        );
        let idx = self.window.page_index_of(virt);
        let mut lists = self.lists.lock();
        let page = *lists.page(idx);
        assert!(
            page.kind() == PageType::Allocated,
            "free of {virt} in state {:?} (double free?)",
            page.kind()
        );
        trace!("free order {} <- {virt}", page.order());
        release(&mut lists, idx);
    }

    /// [`free_page`](Self::free_page) by physical address.
    ///
    /// # Panics
    /// See [`free_page`](Self::free_page); also if `phys` is outside the pool.
    pub fn free_page_phys(&self, phys: PhysicalAddress) {
        self.free_page(self.window.phys_to_virt(phys));
    }

    /// Pages currently free, summed over all orders.
    #[must_use]
    pub fn num_of_available_pages(&self) -> usize {
        let lists = self.lists.lock();
        (0..NUM_OF_ORDERS).map(|n| lists.count(n) << n).sum()
    }

    /// Number of free blocks per order.
    #[must_use]
    pub fn free_blocks(&self) -> [usize; NUM_OF_ORDERS] {
        let lists = self.lists.lock();
        core::array::from_fn(|n| lists.count(n))
    }

    /// Order of the allocated block starting at `virt`, if any.
    #[must_use]
    pub fn allocated_order(&self, virt: VirtualAddress) -> Option<u8> {
        if !self.window.contains_virt(virt) {
            return None;
        }
        let lists = self.lists.lock();
        let page = lists.page(self.window.page_index_of(virt));
        (page.kind() == PageType::Allocated).then_some(page.order())
    }
}

/// Mark block `idx` free and merge it with free buddies.
#[allow(clippy::cast_possible_truncation)]
fn release(lists: &mut FreeLists<'_>, mut idx: usize) {
    let mut order = usize::from(lists.page(idx).order());
    while order + 1 < NUM_OF_ORDERS {
        let buddy = idx ^ (1 << order);
        if buddy >= lists.len() {
            break;
        }
        let b = lists.page(buddy);
        if b.kind() != PageType::Free || usize::from(b.order()) != order {
            break;
        }
        lists.remove(order, buddy);
        let (lower, upper) = (idx.min(buddy), idx.max(buddy));
        lists.set(upper, PageType::NotHead, 0);
        idx = lower;
        order += 1;
    }
    lists.set(idx, PageType::Free, order as u8);
    lists.push(order, idx);
}

impl FrameAlloc for FrameAllocator<'_> {
    fn alloc_zeroed_table(&self) -> Option<PhysicalAddress> {
        let (va, pa) = self.alloc_page().ok()?;
        // SAFETY: a freshly allocated pool page is exclusively ours.
        unsafe { core::ptr::write_bytes(va.as_mut_ptr::<u8>(), 0, PAGE_SIZE as usize) };
        Some(pa)
    }
}
