//! Single-access helpers for host-physical memory.
//!
//! Each accessor maps the addressed word with
//! [`mapmem_hphys`](MemorySubsystem::mapmem_hphys), touches it once and
//! unmaps it. `attr` carries the `PWT`/`PCD`/`PAT` bits of the caller's view
//! of that memory (as in a 4 KiB PTE); a plain access passes `0` and usually
//! takes the identity-window fast path.

use crate::error::MapError;
use crate::mapmem::MapFlags;
use crate::subsystem::MemorySubsystem;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use vmm_addresses::PhysicalAddress;

/// Volatile load, falling back to an unaligned read.
///
/// # Safety
/// `p` must be valid for reads of `T`.
#[inline]
pub(crate) unsafe fn load<T: Copy>(p: *const T) -> T {
    if p.is_aligned() {
        unsafe { p.read_volatile() }
    } else {
        unsafe { p.read_unaligned() }
    }
}

/// Volatile store, falling back to an unaligned write.
///
/// # Safety
/// `p` must be valid for writes of `T`.
#[inline]
pub(crate) unsafe fn store<T: Copy>(p: *mut T, value: T) {
    if p.is_aligned() {
        unsafe { p.write_volatile(value) }
    } else {
        unsafe { p.write_unaligned(value) }
    }
}

/// # Safety
/// `p` must be valid for reads and writes of `u32`.
///
/// # Panics
/// If `p` is not 4-byte aligned.
#[inline]
pub(crate) unsafe fn cmpxchg_u32(p: *mut u32, old: u32, new: u32) -> Result<(), u32> {
    assert!(p.is_aligned(), "misaligned cmpxchg at {p:p}");
    let word = unsafe { AtomicU32::from_ptr(p) };
    word.compare_exchange(old, new, Ordering::SeqCst, Ordering::SeqCst)
        .map(drop)
}

/// # Safety
/// `p` must be valid for reads and writes of `u64`.
///
/// # Panics
/// If `p` is not 8-byte aligned.
#[inline]
pub(crate) unsafe fn cmpxchg_u64(p: *mut u64, old: u64, new: u64) -> Result<(), u64> {
    assert!(p.is_aligned(), "misaligned cmpxchg at {p:p}");
    let word = unsafe { AtomicU64::from_ptr(p) };
    word.compare_exchange(old, new, Ordering::SeqCst, Ordering::SeqCst)
        .map(drop)
}

impl MemorySubsystem<'_> {
    fn with_hphys<T, R>(
        &self,
        phys: PhysicalAddress,
        attr: u64,
        write: bool,
        f: impl FnOnce(*mut T) -> R,
    ) -> Result<R, MapError> {
        let len = size_of::<T>();
        let flags = MapFlags::from_pte_attr(attr).with_write(write);
        let va = self.mapmem_hphys(phys, len, flags)?;
        let r = f(self.host_ptr(va));
        self.unmapmem(va, len);
        Ok(r)
    }

    /// # Errors
    /// See [`mapmem_hphys`](Self::mapmem_hphys).
    pub fn read_hphys_b(&self, phys: PhysicalAddress, attr: u64) -> Result<u8, MapError> {
        // SAFETY (all accessors): the pointer covers the freshly mapped word.
        self.with_hphys(phys, attr, false, |p| unsafe { load::<u8>(p) })
    }

    /// # Errors
    /// See [`mapmem_hphys`](Self::mapmem_hphys).
    pub fn read_hphys_w(&self, phys: PhysicalAddress, attr: u64) -> Result<u16, MapError> {
        self.with_hphys(phys, attr, false, |p| unsafe { load::<u16>(p) })
    }

    /// # Errors
    /// See [`mapmem_hphys`](Self::mapmem_hphys).
    pub fn read_hphys_l(&self, phys: PhysicalAddress, attr: u64) -> Result<u32, MapError> {
        self.with_hphys(phys, attr, false, |p| unsafe { load::<u32>(p) })
    }

    /// # Errors
    /// See [`mapmem_hphys`](Self::mapmem_hphys).
    pub fn read_hphys_q(&self, phys: PhysicalAddress, attr: u64) -> Result<u64, MapError> {
        self.with_hphys(phys, attr, false, |p| unsafe { load::<u64>(p) })
    }

    /// # Errors
    /// See [`mapmem_hphys`](Self::mapmem_hphys).
    pub fn write_hphys_b(&self, phys: PhysicalAddress, value: u8, attr: u64) -> Result<(), MapError> {
        self.with_hphys(phys, attr, true, |p| unsafe { store::<u8>(p, value) })
    }

    /// # Errors
    /// See [`mapmem_hphys`](Self::mapmem_hphys).
    pub fn write_hphys_w(&self, phys: PhysicalAddress, value: u16, attr: u64) -> Result<(), MapError> {
        self.with_hphys(phys, attr, true, |p| unsafe { store::<u16>(p, value) })
    }

    /// # Errors
    /// See [`mapmem_hphys`](Self::mapmem_hphys).
    pub fn write_hphys_l(&self, phys: PhysicalAddress, value: u32, attr: u64) -> Result<(), MapError> {
        self.with_hphys(phys, attr, true, |p| unsafe { store::<u32>(p, value) })
    }

    /// # Errors
    /// See [`mapmem_hphys`](Self::mapmem_hphys).
    pub fn write_hphys_q(&self, phys: PhysicalAddress, value: u64, attr: u64) -> Result<(), MapError> {
        self.with_hphys(phys, attr, true, |p| unsafe { store::<u64>(p, value) })
    }

    /// Atomically replace the dword at `phys` if it equals `old`.
    ///
    /// The inner result is `Err(actual)` if the comparison failed.
    ///
    /// # Errors
    /// See [`mapmem_hphys`](Self::mapmem_hphys).
    ///
    /// # Panics
    /// If `phys` is not 4-byte aligned.
    pub fn cmpxchg_hphys_l(
        &self,
        phys: PhysicalAddress,
        old: u32,
        new: u32,
        attr: u64,
    ) -> Result<Result<(), u32>, MapError> {
        self.with_hphys(phys, attr, true, |p| unsafe { cmpxchg_u32(p, old, new) })
    }

    /// Quadword version of [`cmpxchg_hphys_l`](Self::cmpxchg_hphys_l).
    ///
    /// # Errors
    /// See [`mapmem_hphys`](Self::mapmem_hphys).
    ///
    /// # Panics
    /// If `phys` is not 8-byte aligned.
    pub fn cmpxchg_hphys_q(
        &self,
        phys: PhysicalAddress,
        old: u64,
        new: u64,
        attr: u64,
    ) -> Result<Result<(), u64>, MapError> {
        self.with_hphys(phys, attr, true, |p| unsafe { cmpxchg_u64(p, old, new) })
    }
}
