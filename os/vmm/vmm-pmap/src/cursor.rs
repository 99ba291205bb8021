use crate::access::{GuestAccess, TableAccess, TableKind, VmmTables};
use crate::bits::{
    PAE_ROOT_MASK, PDE_LARGE_PAT, PDE_PS, PTE_A, PTE_ADDR_MASK, PTE_ATTR_MASK, PTE_D, PTE_P,
    PTE_PAT, PTE_PCD, PTE_PWT, PTE_RW, PTE_US, TABLE_ATTR_MASK,
};
use crate::error::{CasFailure, PmapError, PmapWriteError};
use vmm_addresses::{PhysicalAddress, VirtualAddress};

/// Source of zeroed pages for intermediate tables.
pub trait FrameAlloc {
    /// A zeroed, page-aligned frame inside the VMM pool.
    fn alloc_zeroed_table(&self) -> Option<PhysicalAddress>;
}

/// Bits of the linear address that select the cached entry at each level,
/// indexed by `levels - 2`, then by level (0 = PTE).
const SEEK_MASKS: [[u64; 4]; 3] = [
    [0xFFFF_F000, 0xFFC0_0000, 0, 0],
    [0xFFFF_F000, 0xFFE0_0000, 0xC000_0000, 0],
    [
        0x0000_FFFF_FFFF_F000,
        0x0000_FFFF_FFE0_0000,
        0x0000_FFFF_C000_0000,
        0x0000_FF80_0000_0000,
    ],
];

/// Cursor over a multi-level page table.
///
/// Levels are numbered from the leaf: `0` is the PTE, `levels - 1` the
/// top-level table, and `levels` the root pointer itself (CR3). Public APIs
/// take 1-based levels (`1` = PTE) like [`seek`](Self::seek).
///
/// The cursor caches the entry it read at each level together with the
/// physical address it was read from. After [`seek`](Self::seek) only the
/// levels whose covered range changed are re-read, so walking neighbouring
/// addresses costs one load per page.
///
/// ```text
///   entry[levels]  = root | P
///   entry[3] ─► PML4E  at entryaddr[3]
///   entry[2] ─► PDPTE  at entryaddr[2]
///   entry[1] ─► PDE    at entryaddr[1]
///   entry[0] ─► PTE    at entryaddr[0]
///               ▲
///               └── curlevel (target)     readlevel: lowest valid cache slot
/// ```
///
/// Invariant: `readlevel >= curlevel` after [`seek`](Self::seek). Entries
/// from `readlevel` up are valid; anything below is fetched by the next
/// [`read`](Self::read), which brings `readlevel` down to `curlevel` unless
/// it stops at a non-present entry.
#[derive(Debug)]
pub struct Pmap<A> {
    access: A,
    entry: [u64; 5],
    entryaddr: [PhysicalAddress; 4],
    levels: usize,
    curlevel: usize,
    readlevel: usize,
    curaddr: u64,
}

impl<A: TableAccess> Pmap<A> {
    fn open(access: A, root_entry: u64, levels: u8) -> Self {
        assert!((2..=4).contains(&levels), "unsupported paging depth {levels}");
        let levels = usize::from(levels);
        let mut entry = [0; 5];
        entry[levels] = root_entry;
        Self {
            access,
            entry,
            entryaddr: [PhysicalAddress::zero(); 4],
            levels,
            curlevel: levels - 1,
            readlevel: levels,
            curaddr: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> TableKind {
        A::KIND
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn levels(&self) -> u8 {
        self.levels as u8
    }

    #[inline]
    #[must_use]
    pub const fn access(&self) -> &A {
        &self.access
    }

    /// Select the level subsequent reads and writes target (1 = PTE).
    ///
    /// # Panics
    /// If `level` is not in `1..=levels`.
    #[inline]
    pub fn set_level(&mut self, level: usize) {
        assert!((1..=self.levels).contains(&level), "level {level} out of range");
        self.curlevel = level - 1;
    }

    /// Deepest level (1-based) whose entry is currently cached. After a
    /// [`read`](Self::read) that hit a non-present entry, this is the level
    /// of that entry.
    #[inline]
    #[must_use]
    pub const fn read_level(&self) -> usize {
        self.readlevel + 1
    }

    /// Move the cursor to `virt` and target `level` (1 = PTE).
    ///
    /// Cached entries whose covered range still contains `virt` are kept.
    pub fn seek(&mut self, virt: VirtualAddress, level: usize) {
        let virt = virt.as_u64();
        self.set_level(level);
        let masks = &SEEK_MASKS[self.levels - 2];
        while self.readlevel < self.levels {
            let mask = masks[self.readlevel];
            if self.curaddr & mask == virt & mask {
                break;
            }
            self.readlevel += 1;
        }
        // Cached entries below the new target are still valid but unused.
        self.readlevel = self.readlevel.max(self.curlevel);
        self.curaddr = virt;
    }

    /// Walk down to the target level and return its entry.
    ///
    /// Returns `0` if a non-present entry is found on the way; the cursor
    /// then stays at that level (see [`read_level`](Self::read_level)). A
    /// superpage above the target level is returned expanded into the
    /// equivalent entry for the target level, with the PAT bit moved to the
    /// 4 KiB position when the target is a PTE.
    pub fn read(&mut self) -> u64 {
        while self.readlevel > self.curlevel {
            let e = self.entry[self.readlevel];
            if e & PTE_P == 0 {
                return 0;
            }
            if e & PDE_PS != 0 {
                if self.readlevel == 1 {
                    return self.expand_pde(e);
                }
                if self.readlevel == 2 && self.levels == 4 {
                    return self.expand_pdpte(e);
                }
            }
            let attr = e & TABLE_ATTR_MASK;
            let table = if self.levels == 3 && self.readlevel == 3 {
                e & PAE_ROOT_MASK
            } else {
                e & PTE_ADDR_MASK
            };
            self.readlevel -= 1;
            let level = self.readlevel;
            let value = if self.levels == 2 {
                let index = (self.curaddr >> (10 + 10 * level)) & 0xFFC;
                let addr = PhysicalAddress::new(table | index);
                self.entryaddr[level] = addr;
                u64::from(self.access.read32(addr, attr))
            } else {
                let index = (self.curaddr >> (9 + 9 * level)) & 0xFF8;
                let addr = PhysicalAddress::new(table | index);
                self.entryaddr[level] = addr;
                self.access.read64(addr, attr)
            };
            self.entry[level] = value;
        }
        self.entry[self.curlevel]
    }

    /// 2 MiB / 4 MiB PDE as the PTE covering `curaddr`.
    fn expand_pde(&self, mut e: u64) -> u64 {
        e = leaf_pat(e & !PDE_PS);
        if self.levels == 2 {
            // PSE-36: PDE bits 16:13 hold physical bits 35:32.
            e |= ((e & 0x1_E000) >> 13) << 32;
            e &= !0x3F_F000;
            e |= self.curaddr & 0x3F_F000;
        } else {
            e &= !0x1F_F000;
            e |= self.curaddr & 0x1F_F000;
        }
        e
    }

    /// 1 GiB PDPTE as the PDE (target level 2) or PTE covering `curaddr`.
    fn expand_pdpte(&self, e: u64) -> u64 {
        if self.curlevel == 1 {
            (e & !0x3FE0_0000) | (self.curaddr & 0x3FE0_0000)
        } else {
            (leaf_pat(e & !PDE_PS) & !0x3FFF_F000) | (self.curaddr & 0x3FFF_F000)
        }
    }

    /// Store `entry` at the target level.
    ///
    /// Attribute bits (low 12) are taken from `entry` where set in
    /// `attrmask`; the remaining attribute bits get defaults: `RW|US|A` for
    /// table entries, plus `D` for a PTE, nothing for a PAE
    /// page-directory-pointer entry.
    ///
    /// # Errors
    /// Only on an atomic guest table: [`PmapWriteError::Conflict`] if the
    /// entry changed since it was read, after which the cursor caches the
    /// observed value; [`PmapWriteError::Unreachable`] if the entry could not
    /// be accessed, after which the next [`read`](Self::read) fetches it again.
    ///
    /// # Panics
    /// If the target level has not been read.
    pub fn write(&mut self, entry: u64, attrmask: u64) -> Result<(), PmapWriteError> {
        assert!(
            self.readlevel <= self.curlevel,
            "pmap write before reading level {}",
            self.curlevel + 1
        );
        let mut attrdef = PTE_RW | PTE_US | PTE_A;
        if self.levels == 3 && self.curlevel == 2 {
            attrdef = 0;
        } else if self.curlevel == 0 {
            attrdef |= PTE_D;
        }
        let mut e = entry & (!PTE_ATTR_MASK | attrmask);
        e |= attrdef & !attrmask;

        let attr = self.entry[self.curlevel + 1] & TABLE_ATTR_MASK;
        let addr = self.entryaddr[self.curlevel];
        let old = self.entry[self.curlevel];
        #[allow(clippy::cast_possible_truncation)]
        let stored = if self.levels == 2 {
            self.access
                .write32(addr, old as u32, e as u32, attr)
                .map_err(|f| f.map(u64::from))
        } else {
            self.access.write64(addr, old, e, attr)
        };
        match stored {
            Ok(()) => {
                self.entry[self.curlevel] = e;
                Ok(())
            }
            Err(CasFailure::Changed(observed)) => {
                self.entry[self.curlevel] = observed;
                self.readlevel = self.curlevel;
                Err(PmapWriteError::Conflict { observed })
            }
            Err(CasFailure::Unreachable) => {
                self.readlevel = self.curlevel + 1;
                Err(PmapWriteError::Unreachable { addr })
            }
        }
    }

    /// Release the cursor.
    pub fn close(self) {}
}

/// Move the superpage PAT bit (12) to the 4 KiB PTE position (7).
#[inline]
const fn leaf_pat(mut e: u64) -> u64 {
    if e & PDE_LARGE_PAT != 0 {
        e |= PTE_PAT;
        e &= !PDE_LARGE_PAT;
    }
    e
}

impl Pmap<VmmTables> {
    /// Open the VMM's own tables rooted at `cr3`.
    ///
    /// # Panics
    /// If `levels` is not 2, 3 or 4.
    #[must_use]
    pub fn open_vmm(tables: VmmTables, cr3: u64, levels: u8) -> Self {
        Self::open(tables, (cr3 & !PTE_ATTR_MASK) | PTE_P, levels)
    }

    /// Materialise missing intermediate tables down to the target level.
    ///
    /// Each missing table is a fresh zeroed page linked with the default
    /// table attributes (`RW|US|A`).
    ///
    /// # Errors
    /// [`PmapError::OutOfMemory`] if `frames` runs dry; tables linked before
    /// that point stay in place.
    ///
    /// # Panics
    /// If a superpage is in the way.
    pub fn autoalloc(&mut self, frames: &impl FrameAlloc) -> Result<(), PmapError> {
        let level = self.curlevel;
        if self.readlevel <= level {
            return Ok(());
        }
        let mut missing = self.entry[self.readlevel] & PTE_P == 0;
        loop {
            if !missing {
                self.read();
                if self.readlevel <= level {
                    return Ok(());
                }
                assert!(
                    self.entry[self.readlevel] & PTE_P == 0,
                    "superpage at level {} blocks table allocation",
                    self.readlevel + 1
                );
            }
            missing = false;
            let table = frames.alloc_zeroed_table().ok_or(PmapError::OutOfMemory)?;
            log::trace!("pmap: new table {table} at level {}", self.readlevel);
            self.curlevel = self.readlevel;
            let linked = self.write(table.as_u64() | PTE_P, PTE_P);
            self.curlevel = level;
            debug_assert!(linked.is_ok(), "VMM table stores are unconditional");
        }
    }

    /// Zero the table below the target level's parent, i.e. the table that
    /// holds the target entry.
    ///
    /// # Panics
    /// If the parent entry is absent, is a superpage, or was not read.
    pub fn clear(&mut self) {
        let parent = self.entry[self.curlevel + 1];
        assert!(self.readlevel <= self.curlevel + 1, "pmap clear before read");
        assert!(parent & PTE_P != 0, "pmap clear below a non-present entry");
        assert!(
            !(self.curlevel == 0 && self.entry[1] & PDE_PS != 0),
            "pmap clear below a superpage"
        );
        let len = if self.levels == 3 && self.curlevel == 2 { 32 } else { 4096 };
        let table = self
            .access
            .window()
            .phys_to_virt(PhysicalAddress::new(parent & !PTE_ATTR_MASK));
        // SAFETY: the table is a pool page mapped through the window.
        unsafe { core::ptr::write_bytes(table.as_mut_ptr::<u8>(), 0, len) };
        self.readlevel = self.curlevel + 1;
    }

    /// VMM-virtual address of the target entry.
    ///
    /// # Panics
    /// If the target level has not been read.
    #[must_use]
    pub fn entry_ptr(&self) -> VirtualAddress {
        assert!(self.readlevel <= self.curlevel, "pmap pointer before read");
        self.access.window().phys_to_virt(self.entryaddr[self.curlevel])
    }
}

impl<A: GuestAccess> Pmap<A> {
    /// Open guest tables rooted at guest `cr3`.
    ///
    /// The root keeps its `PWT`/`PCD` bits so the first table read uses the
    /// guest's cache type. For PAE the root is 32-byte aligned.
    ///
    /// # Panics
    /// If `levels` is not 2, 3 or 4.
    #[must_use]
    pub fn open_guest(access: A, cr3: u64, levels: u8) -> Self {
        let keep = PTE_PWT | PTE_PCD;
        let root = if levels == 3 {
            cr3 & (PAE_ROOT_MASK | keep)
        } else {
            cr3 & (PTE_ADDR_MASK | keep)
        };
        Self::open(access, root | PTE_P, levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AtomicGuestTables, GuestPhysMemory, GuestTables};
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    /// Sparse guest memory; counts accesses.
    #[derive(Default)]
    struct GuestRam {
        words: RefCell<HashMap<u64, u64>>,
        loads: Cell<usize>,
        /// Page whose compare-and-swaps fail as unreachable.
        hole: Cell<Option<u64>>,
    }

    impl GuestRam {
        fn put(&self, addr: u64, v: u64) {
            self.words.borrow_mut().insert(addr, v);
        }
        fn get(&self, addr: u64) -> u64 {
            self.words.borrow().get(&addr).copied().unwrap_or(0)
        }
    }

    impl GuestPhysMemory for GuestRam {
        fn read32(&self, gphys: PhysicalAddress, _attr: u64) -> u32 {
            self.loads.set(self.loads.get() + 1);
            self.get(gphys.as_u64()) as u32
        }
        fn read64(&self, gphys: PhysicalAddress, _attr: u64) -> u64 {
            self.loads.set(self.loads.get() + 1);
            self.get(gphys.as_u64())
        }
        fn write32(&self, gphys: PhysicalAddress, value: u32, _attr: u64) {
            self.put(gphys.as_u64(), u64::from(value));
        }
        fn write64(&self, gphys: PhysicalAddress, value: u64, _attr: u64) {
            self.put(gphys.as_u64(), value);
        }
        fn cmpxchg32(
            &self,
            gphys: PhysicalAddress,
            old: u32,
            new: u32,
            _attr: u64,
        ) -> Result<(), CasFailure<u32>> {
            self.cmpxchg64(gphys, u64::from(old), u64::from(new), 0)
                .map_err(|f| f.map(|v| v as u32))
        }
        fn cmpxchg64(
            &self,
            gphys: PhysicalAddress,
            old: u64,
            new: u64,
            _attr: u64,
        ) -> Result<(), CasFailure<u64>> {
            self.loads.set(self.loads.get() + 1);
            if self.hole.get() == Some(gphys.as_u64() & !0xFFF) {
                return Err(CasFailure::Unreachable);
            }
            let cur = self.get(gphys.as_u64());
            if cur == old {
                self.put(gphys.as_u64(), new);
                Ok(())
            } else {
                Err(CasFailure::Changed(cur))
            }
        }
    }

    const CR3: u64 = 0x1000;
    const PDPT: u64 = 0x2000;
    const PD: u64 = 0x3000;
    const PT: u64 = 0x4000;
    const PD_HIGH: u64 = 0x5000;

    /// 4-level guest tables mapping 0x0040_1000 -> 0x0009_9000 via a PT,
    /// and 0x4000_0000.. as a 2 MiB page at 0x0060_0000 with PAT set.
    fn long_mode_guest() -> GuestRam {
        let ram = GuestRam::default();
        ram.put(CR3, PDPT | PTE_P | PTE_RW);
        ram.put(PDPT, PD | PTE_P | PTE_RW);
        ram.put(PDPT + 8, PD_HIGH | PTE_P);
        ram.put(PD + 2 * 8, PT | PTE_P | PTE_RW);
        ram.put(PT + 8, 0x0009_9000 | PTE_P | PTE_RW);
        ram.put(PD_HIGH, 0x0060_0000 | PDE_LARGE_PAT | PDE_PS | PTE_P);
        ram
    }

    #[test]
    fn walks_four_levels_to_a_pte() {
        let ram = long_mode_guest();
        let mut m = Pmap::open_guest(GuestTables::new(&ram), CR3, 4);
        m.seek(VirtualAddress::new(0x0040_1000), 1);
        assert_eq!(m.read(), 0x0009_9000 | PTE_P | PTE_RW);
        assert_eq!(m.read_level(), 1);
    }

    #[test]
    fn seek_within_the_same_table_reuses_upper_levels() {
        let ram = long_mode_guest();
        let mut m = Pmap::open_guest(GuestTables::new(&ram), CR3, 4);
        m.seek(VirtualAddress::new(0x0040_1000), 1);
        m.read();
        let walked = ram.loads.get();
        m.seek(VirtualAddress::new(0x0040_2000), 1);
        assert_eq!(m.read(), 0);
        assert_eq!(ram.loads.get(), walked + 1);
    }

    #[test]
    fn seek_to_a_coarser_level_keeps_its_cached_entry() {
        let ram = long_mode_guest();
        let mut m = Pmap::open_guest(GuestTables::new(&ram), CR3, 4);
        m.seek(VirtualAddress::new(0x0040_1000), 1);
        m.read();
        let walked = ram.loads.get();
        m.seek(VirtualAddress::new(0x0040_1000), 2);
        assert_eq!(m.read_level(), 2);
        assert_eq!(m.read(), PT | PTE_P | PTE_RW);
        assert_eq!(ram.loads.get(), walked);
    }

    #[test]
    fn missing_entry_reports_its_level() {
        let ram = long_mode_guest();
        let mut m = Pmap::open_guest(GuestTables::new(&ram), CR3, 4);
        m.seek(VirtualAddress::new(0x0000_0080_0000_0000), 1);
        assert_eq!(m.read(), 0);
        assert_eq!(m.read_level(), 4);
    }

    #[test]
    fn two_mib_superpage_expands_with_pat_relocated() {
        let ram = long_mode_guest();
        let mut m = Pmap::open_guest(GuestTables::new(&ram), CR3, 4);
        // Bit 12 of the expanded frame is clear, so it can only be PAT.
        m.seek(VirtualAddress::new(0x4012_2456), 1);
        let e = m.read();
        assert_eq!(e & PTE_ADDR_MASK, 0x0072_2000);
        assert_ne!(e & PTE_PAT, 0);
        assert_eq!(e & PDE_LARGE_PAT, 0);
        assert_ne!(e & PTE_P, 0);
        // Odd 4 KiB frames keep bit 12 as an address bit.
        m.seek(VirtualAddress::new(0x4012_3456), 1);
        assert_eq!(m.read() & PTE_ADDR_MASK, 0x0072_3000);
        // Asked for the PDE itself, the superpage comes back untouched.
        m.seek(VirtualAddress::new(0x4012_3456), 2);
        assert_eq!(m.read(), 0x0060_0000 | PDE_LARGE_PAT | PDE_PS | PTE_P);
    }

    #[test]
    fn one_gib_superpage_expands_to_pde_or_pte() {
        let ram = GuestRam::default();
        ram.put(CR3, PDPT | PTE_P);
        ram.put(PDPT + 8, 0x8000_0000 | PDE_PS | PTE_P | PTE_RW);
        let mut m = Pmap::open_guest(GuestTables::new(&ram), CR3, 4);
        m.seek(VirtualAddress::new(0x4765_4321), 1);
        assert_eq!(m.read(), 0x8765_4000 | PTE_P | PTE_RW);
        m.seek(VirtualAddress::new(0x4765_4321), 2);
        assert_eq!(m.read(), 0x8760_0000 | PDE_PS | PTE_P | PTE_RW);
    }

    #[test]
    fn pae_root_is_32_byte_aligned_and_pdpte_has_no_defaults() {
        let ram = GuestRam::default();
        // CR3 with PWT set and low garbage.
        let cr3 = 0x1020 | PTE_PWT | 0x7;
        ram.put(0x1020 + 8, PD | PTE_P);
        let mut m = Pmap::open_guest(GuestTables::new(&ram), cr3, 3);
        m.seek(VirtualAddress::new(0x4000_0000), 3);
        assert_eq!(m.read(), PD | PTE_P);
        m.write(PT | PTE_P, PTE_P).unwrap();
        assert_eq!(ram.get(0x1028), PT | PTE_P);
    }

    #[test]
    fn two_level_tables_use_32_bit_entries() {
        let ram = GuestRam::default();
        ram.put(CR3 + (0x0080_0000 >> 22) * 4, PT | PTE_P);
        ram.put(PT + 5 * 4, 0x0005_5000 | PTE_P);
        // 4 MiB page with PSE-36 high bits: physical 0x1_0040_0000.
        ram.put(CR3 + 3 * 4, 0x0040_0000 | (1 << 13) | PDE_PS | PTE_P);
        let mut m = Pmap::open_guest(GuestTables::new(&ram), CR3, 2);
        m.seek(VirtualAddress::new(0x0080_5000), 1);
        assert_eq!(m.read(), 0x0005_5000 | PTE_P);
        m.seek(VirtualAddress::new(0x00C0_3000), 1);
        assert_eq!(m.read() & !PTE_ATTR_MASK, 0x1_0040_3000);
    }

    #[test]
    fn plain_write_fills_default_attributes() {
        let ram = long_mode_guest();
        let mut m = Pmap::open_guest(GuestTables::new(&ram), CR3, 4);
        m.seek(VirtualAddress::new(0x0040_3000), 1);
        assert_eq!(m.read(), 0);
        m.write(0x0077_7000 | PTE_P, PTE_P).unwrap();
        assert_eq!(ram.get(PT + 3 * 8), 0x0077_7000 | PTE_P | PTE_RW | PTE_US | PTE_A | PTE_D);
        // With a full mask nothing is added.
        m.write(0x0077_7000 | PTE_P, PTE_ATTR_MASK).unwrap();
        assert_eq!(ram.get(PT + 3 * 8), 0x0077_7000 | PTE_P);
    }

    #[test]
    fn atomic_write_reports_concurrent_change() {
        let ram = long_mode_guest();
        let mut m = Pmap::open_guest(AtomicGuestTables::new(&ram), CR3, 4);
        m.seek(VirtualAddress::new(0x0040_1000), 1);
        let seen = m.read();
        // A guest CPU sets the accessed bit behind our back.
        ram.put(PT + 8, seen | PTE_A);
        assert_eq!(
            m.write(0, 0),
            Err(PmapWriteError::Conflict { observed: seen | PTE_A })
        );
        assert_eq!(ram.get(PT + 8), seen | PTE_A);
        // Retrying against the observed value commits.
        assert_eq!(m.read(), seen | PTE_A);
        m.write(0, PTE_ATTR_MASK).unwrap();
        assert_eq!(ram.get(PT + 8), 0);
    }

    #[test]
    fn atomic_write_to_unreachable_entry_is_not_a_conflict() {
        let ram = long_mode_guest();
        let mut m = Pmap::open_guest(AtomicGuestTables::new(&ram), CR3, 4);
        m.seek(VirtualAddress::new(0x0040_1000), 1);
        let seen = m.read();
        ram.hole.set(Some(PT));
        assert_eq!(
            m.write(0, 0),
            Err(PmapWriteError::Unreachable {
                addr: PhysicalAddress::new(PT + 8)
            })
        );
        assert_eq!(ram.get(PT + 8), seen);
        // The entry is fetched again once the page is back.
        ram.hole.set(None);
        let loads = ram.loads.get();
        assert_eq!(m.read(), seen);
        assert_eq!(ram.loads.get(), loads + 1);
        m.write(0, PTE_ATTR_MASK).unwrap();
        assert_eq!(ram.get(PT + 8), 0);
    }

    #[test]
    #[should_panic(expected = "pmap write before reading")]
    fn write_without_read_is_fatal() {
        let ram = long_mode_guest();
        let mut m = Pmap::open_guest(GuestTables::new(&ram), CR3, 4);
        m.seek(VirtualAddress::new(0x0040_1000), 1);
        let _ = m.write(0, 0);
    }
}
