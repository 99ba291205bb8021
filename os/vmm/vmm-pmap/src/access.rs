//! Backends for reading and writing table entries.
//!
//! The walker never touches memory itself. Every entry load and store goes
//! through a [`TableAccess`] implementation selected by the table kind:
//!
//! | Kind | Backend | Semantics |
//! |------|---------|-----------|
//! | [`TableKind::Vmm`] | [`VmmTables`] | Direct loads/stores through the pool window |
//! | [`TableKind::GuestPlain`] | [`GuestTables`] | Guest-physical reads/writes |
//! | [`TableKind::GuestAtomic`] | [`AtomicGuestTables`] | Locked reads, compare-and-swap writes |

use crate::error::CasFailure;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use vmm_addresses::{PhysWindow, PhysicalAddress};

/// Which address space a table lives in and how it is updated.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TableKind {
    /// The VMM's own tables, in pool memory.
    Vmm,
    /// Guest tables, updated with plain stores.
    GuestPlain,
    /// Guest tables shared with running guest CPUs, updated with CAS.
    GuestAtomic,
}

/// Entry load/store interface used by [`Pmap`](crate::Pmap).
///
/// `attr` carries the `PWT`/`PCD` bits of the referencing entry so guest
/// memory can be accessed with the cache type the hardware walker would use.
pub trait TableAccess {
    const KIND: TableKind;

    fn read32(&self, phys: PhysicalAddress, attr: u64) -> u32;
    fn read64(&self, phys: PhysicalAddress, attr: u64) -> u64;

    /// Store `new` over an entry last seen as `old`.
    ///
    /// # Errors
    /// Only atomic backends fail: with the value actually in memory, or
    /// because the entry could not be reached.
    fn write32(
        &self,
        phys: PhysicalAddress,
        old: u32,
        new: u32,
        attr: u64,
    ) -> Result<(), CasFailure<u32>>;

    /// 64-bit counterpart of [`write32`](Self::write32).
    ///
    /// # Errors
    /// As for [`write32`](Self::write32).
    fn write64(
        &self,
        phys: PhysicalAddress,
        old: u64,
        new: u64,
        attr: u64,
    ) -> Result<(), CasFailure<u64>>;
}

/// Access to guest-physical memory, provided by the guest memory manager.
///
/// The compare-and-swap operations store nothing and return
/// [`CasFailure::Changed`] when memory does not hold `old`, or
/// [`CasFailure::Unreachable`] when the address cannot be accessed.
pub trait GuestPhysMemory {
    fn read32(&self, gphys: PhysicalAddress, attr: u64) -> u32;
    fn read64(&self, gphys: PhysicalAddress, attr: u64) -> u64;
    fn write32(&self, gphys: PhysicalAddress, value: u32, attr: u64);
    fn write64(&self, gphys: PhysicalAddress, value: u64, attr: u64);

    /// # Errors
    /// See the trait documentation.
    fn cmpxchg32(
        &self,
        gphys: PhysicalAddress,
        old: u32,
        new: u32,
        attr: u64,
    ) -> Result<(), CasFailure<u32>>;

    /// # Errors
    /// See the trait documentation.
    fn cmpxchg64(
        &self,
        gphys: PhysicalAddress,
        old: u64,
        new: u64,
        attr: u64,
    ) -> Result<(), CasFailure<u64>>;
}

impl<G: GuestPhysMemory + ?Sized> GuestPhysMemory for &G {
    fn read32(&self, gphys: PhysicalAddress, attr: u64) -> u32 {
        (**self).read32(gphys, attr)
    }

    fn read64(&self, gphys: PhysicalAddress, attr: u64) -> u64 {
        (**self).read64(gphys, attr)
    }

    fn write32(&self, gphys: PhysicalAddress, value: u32, attr: u64) {
        (**self).write32(gphys, value, attr);
    }

    fn write64(&self, gphys: PhysicalAddress, value: u64, attr: u64) {
        (**self).write64(gphys, value, attr);
    }

    fn cmpxchg32(
        &self,
        gphys: PhysicalAddress,
        old: u32,
        new: u32,
        attr: u64,
    ) -> Result<(), CasFailure<u32>> {
        (**self).cmpxchg32(gphys, old, new, attr)
    }

    fn cmpxchg64(
        &self,
        gphys: PhysicalAddress,
        old: u64,
        new: u64,
        attr: u64,
    ) -> Result<(), CasFailure<u64>> {
        (**self).cmpxchg64(gphys, old, new, attr)
    }
}

/// The VMM's own page tables, reached through the pool window.
///
/// Loads and stores are relaxed atomics: other CPUs may be installing arena
/// mappings in the same tables at the same time.
#[derive(Debug, Copy, Clone)]
pub struct VmmTables {
    window: PhysWindow,
}

impl VmmTables {
    /// # Safety
    /// Every table reachable from roots opened with this backend must lie
    /// inside `window`, and the window's virtual side must be mapped
    /// read-write for as long as the backend is used.
    #[must_use]
    pub const unsafe fn new(window: PhysWindow) -> Self {
        Self { window }
    }

    #[inline]
    #[must_use]
    pub const fn window(&self) -> &PhysWindow {
        &self.window
    }

    #[inline]
    fn slot64(&self, phys: PhysicalAddress) -> &AtomicU64 {
        let p = self.window.phys_to_virt(phys).as_mut_ptr::<u64>();
        // SAFETY: entries are naturally aligned inside a mapped table page,
        // guaranteed by the contract of `new`.
        unsafe { AtomicU64::from_ptr(p) }
    }

    #[inline]
    fn slot32(&self, phys: PhysicalAddress) -> &AtomicU32 {
        let p = self.window.phys_to_virt(phys).as_mut_ptr::<u32>();
        // SAFETY: see `slot64`.
        unsafe { AtomicU32::from_ptr(p) }
    }
}

impl TableAccess for VmmTables {
    const KIND: TableKind = TableKind::Vmm;

    fn read32(&self, phys: PhysicalAddress, _attr: u64) -> u32 {
        self.slot32(phys).load(Ordering::Relaxed)
    }

    fn read64(&self, phys: PhysicalAddress, _attr: u64) -> u64 {
        self.slot64(phys).load(Ordering::Relaxed)
    }

    fn write32(
        &self,
        phys: PhysicalAddress,
        _old: u32,
        new: u32,
        _attr: u64,
    ) -> Result<(), CasFailure<u32>> {
        self.slot32(phys).store(new, Ordering::Relaxed);
        Ok(())
    }

    fn write64(
        &self,
        phys: PhysicalAddress,
        _old: u64,
        new: u64,
        _attr: u64,
    ) -> Result<(), CasFailure<u64>> {
        self.slot64(phys).store(new, Ordering::Relaxed);
        Ok(())
    }
}

/// Guest tables updated with plain stores.
#[derive(Debug, Copy, Clone)]
pub struct GuestTables<G> {
    mem: G,
}

impl<G: GuestPhysMemory> GuestTables<G> {
    pub const fn new(mem: G) -> Self {
        Self { mem }
    }
}

impl<G: GuestPhysMemory> TableAccess for GuestTables<G> {
    const KIND: TableKind = TableKind::GuestPlain;

    fn read32(&self, phys: PhysicalAddress, attr: u64) -> u32 {
        self.mem.read32(phys, attr)
    }

    fn read64(&self, phys: PhysicalAddress, attr: u64) -> u64 {
        self.mem.read64(phys, attr)
    }

    fn write32(
        &self,
        phys: PhysicalAddress,
        _old: u32,
        new: u32,
        attr: u64,
    ) -> Result<(), CasFailure<u32>> {
        self.mem.write32(phys, new, attr);
        Ok(())
    }

    fn write64(
        &self,
        phys: PhysicalAddress,
        _old: u64,
        new: u64,
        attr: u64,
    ) -> Result<(), CasFailure<u64>> {
        self.mem.write64(phys, new, attr);
        Ok(())
    }
}

/// Guest tables that live guest CPUs may modify concurrently.
///
/// Reads are a compare-and-swap of `0` with `0`, so each load is one locked
/// access; stores only commit if the entry still holds what was read.
#[derive(Debug, Copy, Clone)]
pub struct AtomicGuestTables<G> {
    mem: G,
}

impl<G: GuestPhysMemory> AtomicGuestTables<G> {
    pub const fn new(mem: G) -> Self {
        Self { mem }
    }
}

impl<G: GuestPhysMemory> TableAccess for AtomicGuestTables<G> {
    const KIND: TableKind = TableKind::GuestAtomic;

    fn read32(&self, phys: PhysicalAddress, attr: u64) -> u32 {
        match self.mem.cmpxchg32(phys, 0, 0, attr) {
            Err(CasFailure::Changed(actual)) => actual,
            Ok(()) | Err(CasFailure::Unreachable) => 0,
        }
    }

    fn read64(&self, phys: PhysicalAddress, attr: u64) -> u64 {
        match self.mem.cmpxchg64(phys, 0, 0, attr) {
            Err(CasFailure::Changed(actual)) => actual,
            Ok(()) | Err(CasFailure::Unreachable) => 0,
        }
    }

    fn write32(
        &self,
        phys: PhysicalAddress,
        old: u32,
        new: u32,
        attr: u64,
    ) -> Result<(), CasFailure<u32>> {
        self.mem.cmpxchg32(phys, old, new, attr)
    }

    fn write64(
        &self,
        phys: PhysicalAddress,
        old: u64,
        new: u64,
        attr: u64,
    ) -> Result<(), CasFailure<u64>> {
        self.mem.cmpxchg64(phys, old, new, attr)
    }
}

/// Backends that address guest-physical memory.
pub trait GuestAccess: TableAccess {}

impl<G: GuestPhysMemory> GuestAccess for GuestTables<G> {}
impl<G: GuestPhysMemory> GuestAccess for AtomicGuestTables<G> {}
