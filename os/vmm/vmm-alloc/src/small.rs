//! # Small-object allocator
//!
//! Requests up to [`MAX_SLOT_SIZE`] bytes are served from arena pages, one
//! size class per page. A page starts with its header; the slots the header
//! overlaps are marked used from the start, so offset 0 is never returned
//! and a zero page offset always means "whole page".
//!
//! ```text
//! arena page (class n, slot = 16 << n bytes)
//! +--------+-------+--------------+--------+--------+-----+
//! | next   | class | bitmap ...   | slot k | slot k+1 | ...
//! +--------+-------+--------------+--------+--------+-----+
//! 0        8       9              k * slot
//! ```
//!
//! Each class keeps a list of pages that still have a free slot. A page that
//! fills up is flagged and dropped from the list; the next free from it
//! clears the flag and puts it back. Arena pages are never returned to the
//! frame allocator.

use crate::error::AllocError;
use crate::frame::FrameAllocator;
use log::trace;
use vmm_addresses::{PAGE_MASK, VirtualAddress};
use vmm_info::memory::{MAX_SLOT_SIZE, MIN_SLOT_SIZE, NUM_OF_SIZE_CLASSES};
use vmm_sync::SpinLock;

const PAGE: usize = 4096;

/// Byte offset of the class byte in an arena header.
const CLASS_OFFSET: usize = 8;
/// Byte offset of the occupancy bitmap.
const BITMAP_OFFSET: usize = 9;
/// Class byte flag: page has no free slot and is not listed.
const FULL: u8 = 0x80;

#[inline]
const fn slot_size(class: usize) -> usize {
    MIN_SLOT_SIZE << class
}

#[inline]
const fn slots_per_page(class: usize) -> usize {
    PAGE / slot_size(class)
}

#[inline]
const fn bitmap_len(class: usize) -> usize {
    slots_per_page(class).div_ceil(8)
}

/// Slots covered by the header of a class-`class` page.
#[inline]
const fn header_slots(class: usize) -> usize {
    (BITMAP_OFFSET + bitmap_len(class)).div_ceil(slot_size(class))
}

/// Size class serving `len` bytes, if any.
#[must_use]
pub fn size_class(len: usize) -> Option<usize> {
    (0..NUM_OF_SIZE_CLASSES).find(|&c| len <= slot_size(c))
}

/// View of one arena page through raw pointers into pool memory.
struct ArenaPage(*mut u8);

impl ArenaPage {
    fn at(va: VirtualAddress) -> Self {
        Self(va.as_mut_ptr())
    }

    fn addr(&self) -> VirtualAddress {
        VirtualAddress::from_ptr(self.0)
    }

    // SAFETY (all accessors): `self.0` is a live arena page, only touched
    // with the class lock held.

    fn next(&self) -> u64 {
        unsafe { self.0.cast::<u64>().read() }
    }

    fn set_next(&self, next: u64) {
        unsafe { self.0.cast::<u64>().write(next) }
    }

    fn class_byte(&self) -> u8 {
        unsafe { self.0.add(CLASS_OFFSET).read() }
    }

    fn set_class_byte(&self, v: u8) {
        unsafe { self.0.add(CLASS_OFFSET).write(v) }
    }

    fn bitmap(&mut self, class: usize) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.0.add(BITMAP_OFFSET), bitmap_len(class)) }
    }

    /// Lay out a fresh page for `class`.
    #[allow(clippy::cast_possible_truncation)]
    fn format(&mut self, class: usize) {
        unsafe { core::ptr::write_bytes(self.0, 0, BITMAP_OFFSET + bitmap_len(class)) };
        self.set_class_byte(class as u8);
        let map = self.bitmap(class);
        for slot in 0..header_slots(class) {
            map[slot / 8] |= 1 << (slot % 8);
        }
    }

    /// Claim the first free slot; `None` if the page is full.
    fn claim(&mut self, class: usize) -> Option<usize> {
        let slots = slots_per_page(class);
        let map = self.bitmap(class);
        let byte = map.iter().position(|&b| b != 0xFF)?;
        let bit = map[byte].trailing_ones() as usize;
        let slot = byte * 8 + bit;
        if slot >= slots {
            return None;
        }
        map[byte] |= 1 << bit;
        let offset = slot * slot_size(class);
        assert!(offset != 0 && offset < PAGE, "slot {slot} of class {class} overlaps the header");
        Some(offset)
    }
}

/// Size-class allocator on top of the [`FrameAllocator`].
pub struct SmallAllocator {
    /// Per class: first arena page with a free slot, `0` if none.
    partial: SpinLock<[u64; NUM_OF_SIZE_CLASSES]>,
}

impl Default for SmallAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SmallAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            partial: SpinLock::new([0; NUM_OF_SIZE_CLASSES]),
        }
    }

    /// Allocate `len` bytes. Sizes above [`MAX_SLOT_SIZE`] take whole pages.
    ///
    /// Slots are aligned to their size.
    ///
    /// # Errors
    /// [`AllocError::OutOfMemory`] if a new arena page (or the page run) is
    /// not available.
    pub fn alloc(
        &self,
        frames: &FrameAllocator<'_>,
        len: usize,
    ) -> Result<VirtualAddress, AllocError> {
        let Some(class) = size_class(len) else {
            return frames.alloc_pages(len.div_ceil(PAGE));
        };
        let mut partial = self.partial.lock();
        loop {
            let mut page = if partial[class] == 0 {
                let va = frames.alloc_order(0)?;
                let mut page = ArenaPage::at(va);
                page.format(class);
                page.set_next(0);
                partial[class] = va.as_u64();
                trace!("arena page {va} for {}-byte slots", slot_size(class));
                page
            } else {
                ArenaPage::at(VirtualAddress::new(partial[class]))
            };
            if let Some(offset) = page.claim(class) {
                return Ok(page.addr() + offset as u64);
            }
            page.set_class_byte(page.class_byte() | FULL);
            partial[class] = page.next();
        }
    }

    /// Release memory from [`alloc`](Self::alloc).
    ///
    /// # Panics
    /// On a double free or a pointer that is not a slot start.
    #[allow(clippy::cast_possible_truncation)]
    pub fn free(&self, frames: &FrameAllocator<'_>, ptr: VirtualAddress) {
        let offset = (ptr.as_u64() & PAGE_MASK) as usize;
        if offset == 0 {
            frames.free_page(ptr);
            return;
        }
        let mut page = ArenaPage::at(VirtualAddress::new(ptr.as_u64() & !PAGE_MASK));
        let mut partial = self.partial.lock();
        let tag = page.class_byte();
        let class = usize::from(tag & !FULL);
        assert!(class < NUM_OF_SIZE_CLASSES, "{ptr} is not in an arena page");
        assert!(
            offset.is_multiple_of(slot_size(class)),
            "{ptr} is not a slot start"
        );
        if tag & FULL != 0 {
            page.set_class_byte(tag & !FULL);
            page.set_next(partial[class]);
            partial[class] = page.addr().as_u64();
        }
        let slot = offset / slot_size(class);
        let map = page.bitmap(class);
        assert!(map[slot / 8] & (1 << (slot % 8)) != 0, "double free of {ptr}");
        map[slot / 8] &= !(1 << (slot % 8));
    }
}

const _: () = {
    assert!(slot_size(NUM_OF_SIZE_CLASSES - 1) == MAX_SLOT_SIZE);
    assert!(header_slots(NUM_OF_SIZE_CLASSES - 1) < slots_per_page(NUM_OF_SIZE_CLASSES - 1));
};
