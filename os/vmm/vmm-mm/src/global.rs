//! The hypervisor-wide [`MemorySubsystem`] instance.
//!
//! Boot code builds the subsystem once and hands it to [`init`]; everything
//! else reaches it through [`get`] or [`with_memory`]. The [`VmmHeap`]
//! global allocator finds its backend through [`heap_backend`].
//!
//! [`VmmHeap`]: vmm_alloc::VmmHeap

use crate::subsystem::MemorySubsystem;
use vmm_alloc::ByteAllocator;
use vmm_sync::SyncOnceCell;

static MEMORY: SyncOnceCell<MemorySubsystem<'static>> = SyncOnceCell::new();

/// Publish `mm` as the global instance. Only the first call has an effect;
/// later instances are dropped.
pub fn init(mm: MemorySubsystem<'static>) -> &'static MemorySubsystem<'static> {
    MEMORY.get_or_init(|| mm)
}

/// The global instance, once [`init`] has run.
#[inline]
#[must_use]
pub fn get() -> Option<&'static MemorySubsystem<'static>> {
    MEMORY.get()
}

/// Run `f` against the global instance.
///
/// # Panics
/// If [`init`] has not run yet.
#[inline]
pub fn with_memory<R>(f: impl FnOnce(&MemorySubsystem<'static>) -> R) -> R {
    let Some(mm) = MEMORY.get() else {
        panic!("memory subsystem not initialised");
    };
    f(mm)
}

/// Backend for [`VmmHeap`](vmm_alloc::VmmHeap): the global pool, if any.
#[must_use]
pub fn heap_backend() -> Option<&'static dyn ByteAllocator> {
    get().map(|mm| mm.pool() as &dyn ByteAllocator)
}
