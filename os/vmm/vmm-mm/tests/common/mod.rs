#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use vmm_addresses::{PhysWindow, PhysicalAddress, VirtualAddress};
use vmm_alloc::{PageDescriptor, PoolAllocator};
use vmm_info::MemoryLayout;
use vmm_mm::{GuestPage, GuestPhysMap, HostMmu, MemorySubsystem};
use vmm_pmap::{PTE_ADDR_MASK, PTE_P, Pmap, VmmTables};

pub const POOL_PHYS: u64 = 0x0100_0000;

#[repr(C, align(4096))]
pub struct Frame([u8; 4096]);

/// Software MMU: arena and window addresses are resolved by walking the
/// active VMM tables, pool addresses are used as they are.
pub struct SoftMmu {
    root: AtomicU64,
    window: PhysWindow,
    pub invalidations: AtomicUsize,
    pub flushes: AtomicUsize,
}

impl SoftMmu {
    pub fn new(window: PhysWindow, root: u64) -> Self {
        Self {
            root: AtomicU64::new(root),
            window,
            invalidations: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
        }
    }

    /// Leaf entry for `virt` in the active tables.
    pub fn translate(&self, virt: VirtualAddress) -> u64 {
        let tables = unsafe { VmmTables::new(self.window) };
        let mut m = Pmap::open_vmm(tables, self.current_root(), 4);
        m.seek(virt, 1);
        m.read()
    }
}

impl HostMmu for SoftMmu {
    fn current_root(&self) -> u64 {
        self.root.load(Ordering::SeqCst)
    }

    fn switch_root(&self, root: u64) -> u64 {
        self.root.swap(root, Ordering::SeqCst)
    }

    fn invalidate_page(&self, _virt: VirtualAddress) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    fn flush_all(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn host_ptr(&self, virt: VirtualAddress) -> *mut u8 {
        if self.window.contains_virt(virt) {
            return virt.as_mut_ptr();
        }
        let pte = self.translate(virt);
        assert!(pte & PTE_P != 0, "page fault at {virt}");
        let phys = PhysicalAddress::new((pte & PTE_ADDR_MASK) | (virt.as_u64() & 0xFFF));
        self.window.phys_to_virt(phys).as_mut_ptr()
    }
}

pub struct Rig {
    pub mm: MemorySubsystem<'static>,
    pub mmu: &'static SoftMmu,
}

/// A subsystem over a leaked pool of `pages` pages whose first allocation
/// is the (empty) VMM root table.
pub fn boot(pages: usize, layout: MemoryLayout) -> Rig {
    let frames: &'static mut [Frame] =
        Box::leak((0..pages).map(|_| Frame([0; 4096])).collect::<Vec<_>>().into_boxed_slice());
    let descriptors: &'static mut [PageDescriptor] =
        Box::leak(vec![PageDescriptor::default(); pages].into_boxed_slice());
    let window = PhysWindow::new(
        PhysicalAddress::new(POOL_PHYS),
        VirtualAddress::from_ptr(frames.as_mut_ptr()),
        (pages * 4096) as u64,
    );
    let pool = PoolAllocator::new(window, descriptors, &[]);
    let (_, root) = pool.alloc_zeroed_page().unwrap();
    let mmu: &'static SoftMmu = Box::leak(Box::new(SoftMmu::new(window, root.as_u64())));
    Rig {
        mm: MemorySubsystem::new(pool, layout, mmu),
        mmu,
    }
}

/// Layout without the identity window: every mapping uses the arena.
pub fn arena_only() -> MemoryLayout {
    MemoryLayout::default().without_hphys_window()
}

/// Guest-physical map backed by pool pages.
#[derive(Default)]
pub struct GuestMap {
    pages: HashMap<u64, GuestPage>,
}

impl GuestMap {
    pub fn back(&mut self, gpage: u64, hphys: PhysicalAddress, fake_rom: bool) {
        self.pages.insert(gpage, GuestPage { hphys, fake_rom });
    }
}

impl GuestPhysMap for GuestMap {
    fn gp2hp(&self, gphys: PhysicalAddress) -> Option<GuestPage> {
        let offset = gphys.as_u64() & 0xFFF;
        self.pages.get(&(gphys.as_u64() - offset)).map(|p| GuestPage {
            hphys: p.hphys + offset,
            fake_rom: p.fake_rom,
        })
    }
}
