//! # VMM heap
//!
//! [`VmmHeap`] lets in-VMM Rust code use `alloc` collections on top of the
//! pool. It is a thin [`GlobalAlloc`] shim over a [`ByteAllocator`]; the
//! backend is looked up on every call so the heap can be declared as a
//! `static` before the memory subsystem exists. Until then every allocation
//! fails with a null pointer.
//!
//! ```rust,ignore
//! #[global_allocator]
//! static HEAP: VmmHeap = VmmHeap::new(vmm_mm::global::heap_backend);
//! ```

use crate::error::AllocError;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;
use vmm_addresses::VirtualAddress;
use vmm_info::memory::{MAX_BLOCK_SIZE, PAGE_SIZE};

/// Byte-granular allocation interface.
///
/// Returned memory is aligned to the largest power of two not exceeding the
/// requested length, up to a page.
pub trait ByteAllocator: Sync {
    /// # Errors
    /// [`AllocError::OutOfMemory`] if the request cannot be served.
    fn alloc_bytes(&self, len: usize) -> Result<VirtualAddress, AllocError>;

    /// # Safety
    /// `ptr` must come from [`alloc_bytes`](Self::alloc_bytes) on the same
    /// allocator and must not be used afterwards.
    unsafe fn free_bytes(&self, ptr: VirtualAddress);
}

/// Backend lookup for [`VmmHeap`].
pub type HeapBackend = fn() -> Option<&'static dyn ByteAllocator>;

/// [`GlobalAlloc`] adapter over a [`ByteAllocator`].
pub struct VmmHeap {
    backend: HeapBackend,
}

impl VmmHeap {
    #[must_use]
    pub const fn new(backend: HeapBackend) -> Self {
        Self { backend }
    }

    /// Request size that yields a block satisfying `layout`, if any.
    ///
    /// Slot and page alignment equals the slot or block size, so asking for
    /// at least `align` bytes is enough up to page alignment. Nothing larger
    /// than the biggest pool block can be served.
    #[allow(clippy::cast_possible_truncation)]
    fn request_len(layout: Layout) -> Option<usize> {
        if layout.align() > PAGE_SIZE as usize {
            return None;
        }
        let len = layout.size().max(layout.align());
        (len <= MAX_BLOCK_SIZE as usize).then_some(len)
    }
}

unsafe impl GlobalAlloc for VmmHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let (Some(backend), Some(len)) = ((self.backend)(), Self::request_len(layout)) else {
            return ptr::null_mut();
        };
        backend
            .alloc_bytes(len)
            .map_or(ptr::null_mut(), VirtualAddress::as_mut_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if ptr.is_null() {
            return;
        }
        if let Some(backend) = (self.backend)() {
            // SAFETY: the GlobalAlloc contract guarantees `ptr` came from `alloc`.
            unsafe { backend.free_bytes(VirtualAddress::from_ptr(ptr)) };
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        // SAFETY: forwarded contract.
        let p = unsafe { self.alloc(layout) };
        if !p.is_null() {
            // SAFETY: `p` points to at least `layout.size()` writable bytes.
            unsafe { ptr::write_bytes(p, 0, layout.size()) };
        }
        p
    }
}
