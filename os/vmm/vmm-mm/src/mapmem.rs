//! # mapmem: temporary VMM mappings of physical memory
//!
//! The VMM reaches host- and guest-physical memory through VMM-virtual
//! pointers. There are two ways to get one:
//!
//! 1. **Fast path.** Once the static window at [`MemoryLayout::hphys_base`]
//!    is mapped, a host-physical range inside it requested without
//!    cache-attribute flags is simply `hphys_base + phys`. A guest-physical range qualifies when all of its
//!    pages translate to one contiguous host run inside that window.
//! 2. **Arena.** Otherwise a run of free pages is taken from the mapmem
//!    arena and mapped page by page.
//!
//! ```text
//!   mapmem_start                     lastvirt                mapmem_end
//!   |  used  |     |  used  used |      ▼   scan ──►               |
//!   +--------+-----+-------------+-----------------------------------+
//!     ▲ wrap: restart here at most once per request
//! ```
//!
//! Arena allocation happens in two phases. Under the arena lock the scan
//! finds enough non-present PTEs starting at the cursor and writes a bare
//! `P` placeholder into each, so concurrent scans skip them; intermediate
//! tables are created here too. After the lock is dropped, the real leaf
//! entries replace the placeholders and each page is invalidated. If the
//! guest translation fails half way, the pages installed so far are unmapped
//! again.
//!
//! [`MemoryLayout::hphys_base`]: vmm_info::MemoryLayout::hphys_base

use crate::error::MapError;
use crate::guest::GuestPhysMap;
use crate::subsystem::MemorySubsystem;
use bitfield_struct::bitfield;
use log::{debug, trace, warn};
use vmm_addresses::{PAGE_MASK, PhysicalAddress, Size4K, VirtualAddress, pages_spanned};
use vmm_pmap::{
    PTE_ATTR_MASK, PTE_AVAILABLE2, PTE_P, PTE_PAT, PTE_PCD, PTE_PWT, PTE_RW, Pmap, VmmTables,
};

/// Access and cache attributes of a mapping.
///
/// ```rust
/// # use vmm_mm::MapFlags;
/// let f = MapFlags::WRITE.with_pcd(true);
/// assert!(f.write() && f.has_cache_attrs());
/// assert!(!MapFlags::READ.has_cache_attrs());
/// ```
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct MapFlags {
    /// Map writable.
    pub write: bool,
    /// Write-through.
    pub pwt: bool,
    /// Cache disable.
    pub pcd: bool,
    /// PAT selector.
    pub pat: bool,
    #[bits(4)]
    __: u8,
}

impl MapFlags {
    pub const READ: Self = Self::new();
    pub const WRITE: Self = Self::new().with_write(true);

    /// Cache attributes rule out the identity window.
    #[inline]
    #[must_use]
    pub const fn has_cache_attrs(self) -> bool {
        self.pwt() || self.pcd() || self.pat()
    }

    /// Cache attributes taken from the `PWT`/`PCD`/`PAT` bits of a 4 KiB PTE.
    #[must_use]
    pub const fn from_pte_attr(attr: u64) -> Self {
        Self::new()
            .with_pwt(attr & PTE_PWT != 0)
            .with_pcd(attr & PTE_PCD != 0)
            .with_pat(attr & PTE_PAT != 0)
    }

    /// Leaf entry for `frame` with these attributes.
    const fn pte(self, frame: PhysicalAddress) -> u64 {
        let mut pte = frame.as_u64() | PTE_P;
        if self.write() {
            pte |= PTE_RW;
        }
        if self.pwt() {
            pte |= PTE_PWT;
        }
        if self.pcd() {
            pte |= PTE_PCD;
        }
        if self.pat() {
            pte |= PTE_PAT;
        }
        pte
    }
}

/// Attribute bits mapmem sets explicitly; the rest take table defaults.
const LEAF_ATTR_MASK: u64 = PTE_P | PTE_RW | PTE_PWT | PTE_PCD | PTE_PAT;

impl MemorySubsystem<'_> {
    /// Map `len` bytes of host-physical memory at `phys`.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if the arena needs a table page and the
    /// pool is exhausted.
    ///
    /// # Panics
    /// If the arena has no run of free pages long enough.
    pub fn mapmem_hphys(
        &self,
        phys: PhysicalAddress,
        len: usize,
        flags: MapFlags,
    ) -> Result<VirtualAddress, MapError> {
        if !flags.has_cache_attrs()
            && let Some(va) = self.hphys_window_virt(phys, len as u64)
        {
            return Ok(va);
        }
        self.map_arena(phys, len, flags, Ok)
    }

    /// Map `len` bytes of `guest`'s physical memory at `gphys`.
    ///
    /// # Errors
    /// - [`MapError::FakeRom`] for a writable request touching a read-only
    ///   shadowed page.
    /// - [`MapError::NoTarget`] if a page has no host backing.
    /// - [`MapError::OutOfMemory`] as for [`mapmem_hphys`](Self::mapmem_hphys).
    ///
    /// # Panics
    /// If the arena has no run of free pages long enough.
    pub fn mapmem_gphys<G: GuestPhysMap + ?Sized>(
        &self,
        guest: &G,
        gphys: PhysicalAddress,
        len: usize,
        flags: MapFlags,
    ) -> Result<VirtualAddress, MapError> {
        if !flags.has_cache_attrs()
            && let Some(va) = self.mapped_gphys(guest, gphys, len, flags.write())
        {
            return Ok(va);
        }
        self.map_arena(gphys, len, flags, |page| {
            let backing = guest.gp2hp(page).ok_or(MapError::NoTarget { gphys: page })?;
            if backing.fake_rom && flags.write() {
                warn!("writable mapping of ROM page {page} refused");
                return Err(MapError::FakeRom { gphys: page });
            }
            Ok(backing.hphys.page::<Size4K>())
        })
    }

    /// Remove a mapping made by [`mapmem_hphys`](Self::mapmem_hphys) or
    /// [`mapmem_gphys`](Self::mapmem_gphys).
    ///
    /// Pointers outside the arena (fast-path results) are ignored.
    pub fn unmapmem(&self, virt: VirtualAddress, len: usize) {
        if !self.layout.in_mapmem(virt) {
            return;
        }
        let _arena = self.arena.lock();
        let mut m = self.current_tables();
        let pages = pages_spanned(virt.as_u64() & PAGE_MASK, len as u64);
        self.clear_run(&mut m, virt.page::<Size4K>(), pages);
        m.close();
    }

    /// Identity-window address of a guest range backed by one contiguous
    /// host run.
    fn mapped_gphys<G: GuestPhysMap + ?Sized>(
        &self,
        guest: &G,
        gphys: PhysicalAddress,
        len: usize,
        write: bool,
    ) -> Option<VirtualAddress> {
        let first = guest.gp2hp(gphys)?;
        if write && first.fake_rom {
            return None;
        }
        let pages = pages_spanned(gphys.as_u64() & PAGE_MASK, len as u64);
        let (gbase, hbase) = (gphys.page::<Size4K>(), first.hphys.page::<Size4K>());
        for i in 1..pages {
            let next = guest.gp2hp(gbase + (i << 12))?;
            if next.hphys.page::<Size4K>() != hbase + (i << 12) || (write && next.fake_rom) {
                return None;
            }
        }
        self.hphys_window_virt(first.hphys, len as u64)
    }

    /// Reserve arena pages for `[phys, phys + len)` and map each page to the
    /// frame `translate` returns for it.
    #[allow(clippy::cast_possible_truncation)]
    fn map_arena(
        &self,
        phys: PhysicalAddress,
        len: usize,
        flags: MapFlags,
        translate: impl Fn(PhysicalAddress) -> Result<PhysicalAddress, MapError>,
    ) -> Result<VirtualAddress, MapError> {
        let offset = phys.as_u64() & PAGE_MASK;
        let pages = pages_spanned(offset, len as u64);
        let mut m = self.current_tables();
        let base = self.reserve(&mut m, pages)?;
        let first = phys.page::<Size4K>();
        for i in 0..pages {
            let va = base + (i << 12);
            let frame = match translate(first + (i << 12)) {
                Ok(frame) => frame,
                Err(e) => {
                    m.close();
                    self.unmapmem(base, (pages << 12) as usize);
                    return Err(e);
                }
            };
            m.seek(va, 1);
            assert!(m.read() & PTE_P != 0, "mapmem placeholder at {va} vanished");
            let stored = m.write(flags.pte(frame), LEAF_ATTR_MASK);
            debug_assert!(stored.is_ok());
            self.mmu.invalidate_page(va);
        }
        m.close();
        trace!("mapmem {phys}+{len:#x} -> {base} ({pages} pages)");
        Ok(base + offset)
    }

    /// Find and claim `pages` consecutive free arena pages.
    ///
    /// The scan starts at the cursor and may wrap to the arena start once.
    fn reserve(&self, m: &mut Pmap<VmmTables>, pages: u64) -> Result<VirtualAddress, MapError> {
        let (start, end) = (self.layout.mapmem_start, self.layout.mapmem_end);
        let mut cursor = self.arena.lock();
        let mut v = *cursor;
        let mut wraps = 0;
        'scan: loop {
            for i in 0..pages {
                let va = v + (i << 12);
                if va >= end {
                    v = start;
                    wraps += 1;
                    assert!(wraps == 1, "mapmem arena exhausted ({pages} pages requested)");
                    debug!("mapmem arena wrapped");
                    continue 'scan;
                }
                m.seek(va, 1);
                if m.read() & PTE_P != 0 {
                    v = va + 4096;
                    continue 'scan;
                }
            }
            break;
        }
        for i in 0..pages {
            m.seek(v + (i << 12), 1);
            if let Err(e) = m.autoalloc(&self.pool) {
                self.clear_run(m, v, i);
                return Err(e.into());
            }
            let stored = m.write(PTE_P, PTE_ATTR_MASK);
            debug_assert!(stored.is_ok());
        }
        *cursor = v + (pages << 12);
        Ok(v)
    }

    /// Clear every present, non-shared entry of `pages` pages at `base` and
    /// invalidate them.
    fn clear_run(&self, m: &mut Pmap<VmmTables>, base: VirtualAddress, pages: u64) {
        for i in 0..pages {
            let va = base + (i << 12);
            m.seek(va, 1);
            let pte = m.read();
            if pte & PTE_P != 0 && pte & PTE_AVAILABLE2 == 0 {
                let stored = m.write(0, PTE_ATTR_MASK);
                debug_assert!(stored.is_ok());
            }
            self.mmu.invalidate_page(va);
        }
    }
}
