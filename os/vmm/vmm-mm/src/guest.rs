//! Guest-physical memory seen through the mapmem arena.

use crate::hphys::{cmpxchg_u32, cmpxchg_u64, load, store};
use crate::mapmem::MapFlags;
use crate::subsystem::MemorySubsystem;
use log::warn;
use vmm_addresses::PhysicalAddress;
use vmm_pmap::{CasFailure, GuestPhysMemory};

/// Host page backing a guest-physical address.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct GuestPage {
    /// Host-physical address, same page offset as the guest address.
    pub hphys: PhysicalAddress,
    /// The page is a read-only shadow (emulated ROM); writes must not reach
    /// it.
    pub fake_rom: bool,
}

/// Guest-physical to host-physical translation of one guest.
pub trait GuestPhysMap {
    /// Backing of `gphys`, or `None` if the guest has nothing there.
    fn gp2hp(&self, gphys: PhysicalAddress) -> Option<GuestPage>;
}

impl<G: GuestPhysMap + ?Sized> GuestPhysMap for &G {
    fn gp2hp(&self, gphys: PhysicalAddress) -> Option<GuestPage> {
        (**self).gp2hp(gphys)
    }
}

/// [`GuestPhysMemory`] for one guest, so the page-table walker can read and
/// update guest tables.
///
/// Every access maps the word with [`mapmem_gphys`] and unmaps it again.
/// Accesses that cannot be mapped read as zero (a non-present entry), drop
/// writes and fail compare-and-swaps with [`CasFailure::Unreachable`].
///
/// [`mapmem_gphys`]: MemorySubsystem::mapmem_gphys
pub struct GuestMemory<'m, 'p, G: ?Sized> {
    mm: &'m MemorySubsystem<'p>,
    guest: &'m G,
}

impl<'m, 'p, G: GuestPhysMap + ?Sized> GuestMemory<'m, 'p, G> {
    #[must_use]
    pub const fn new(mm: &'m MemorySubsystem<'p>, guest: &'m G) -> Self {
        Self { mm, guest }
    }

    fn access<T, R>(
        &self,
        gphys: PhysicalAddress,
        attr: u64,
        write: bool,
        unmapped: R,
        f: impl FnOnce(*mut T) -> R,
    ) -> R {
        let len = size_of::<T>();
        let flags = MapFlags::from_pte_attr(attr).with_write(write);
        match self.mm.mapmem_gphys(self.guest, gphys, len, flags) {
            Ok(va) => {
                let r = f(self.mm.host_ptr(va));
                self.mm.unmapmem(va, len);
                r
            }
            Err(e) => {
                warn!("guest access at {gphys} failed: {e}");
                unmapped
            }
        }
    }
}

impl<G: GuestPhysMap + ?Sized> GuestPhysMemory for GuestMemory<'_, '_, G> {
    fn read32(&self, gphys: PhysicalAddress, attr: u64) -> u32 {
        // SAFETY (all accessors): the pointer covers the freshly mapped word.
        self.access(gphys, attr, false, 0, |p| unsafe { load::<u32>(p) })
    }

    fn read64(&self, gphys: PhysicalAddress, attr: u64) -> u64 {
        self.access(gphys, attr, false, 0, |p| unsafe { load::<u64>(p) })
    }

    fn write32(&self, gphys: PhysicalAddress, value: u32, attr: u64) {
        self.access(gphys, attr, true, (), |p| unsafe { store::<u32>(p, value) });
    }

    fn write64(&self, gphys: PhysicalAddress, value: u64, attr: u64) {
        self.access(gphys, attr, true, (), |p| unsafe { store::<u64>(p, value) });
    }

    fn cmpxchg32(
        &self,
        gphys: PhysicalAddress,
        old: u32,
        new: u32,
        attr: u64,
    ) -> Result<(), CasFailure<u32>> {
        self.access(gphys, attr, true, Err(CasFailure::Unreachable), |p| {
            unsafe { cmpxchg_u32(p, old, new) }.map_err(CasFailure::Changed)
        })
    }

    fn cmpxchg64(
        &self,
        gphys: PhysicalAddress,
        old: u64,
        new: u64,
        attr: u64,
    ) -> Result<(), CasFailure<u64>> {
        self.access(gphys, attr, true, Err(CasFailure::Unreachable), |p| {
            unsafe { cmpxchg_u64(p, old, new) }.map_err(CasFailure::Changed)
        })
    }
}
