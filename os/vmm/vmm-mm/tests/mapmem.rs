mod common;

use common::{GuestMap, arena_only, boot};
use std::collections::HashSet;
use std::sync::Barrier;
use std::sync::atomic::Ordering;
use vmm_addresses::{PhysicalAddress, VirtualAddress};
use vmm_info::MemoryLayout;
use vmm_info::memory::{HPHYS_ADDR, MAPMEM_ADDR_START};
use vmm_mm::{MapError, MapFlags};
use vmm_pmap::{PTE_P, PTE_PCD, PTE_RW};

#[test]
fn write_unmap_remap_read() {
    let rig = boot(64, arena_only());
    let mm = &rig.mm;
    let (page, phys) = mm.alloc_page().unwrap();

    let w = mm.mapmem_hphys(phys + 0x10, 8, MapFlags::WRITE).unwrap();
    assert!(mm.layout().in_mapmem(w));
    assert_eq!(w.as_u64() & 0xFFF, 0x10);
    assert_ne!(rig.mmu.translate(w) & PTE_RW, 0);
    unsafe { mm.host_ptr::<u64>(w).write(0x1122_3344_5566_7788) };
    mm.unmapmem(w, 8);
    assert_eq!(rig.mmu.translate(w) & PTE_P, 0);

    let r = mm.mapmem_hphys(phys + 0x10, 8, MapFlags::READ).unwrap();
    assert_eq!(rig.mmu.translate(r) & PTE_RW, 0);
    assert_eq!(unsafe { mm.host_ptr::<u64>(r).read() }, 0x1122_3344_5566_7788);
    mm.unmapmem(r, 8);

    // The bytes landed in the pool page itself.
    let direct = unsafe { (page + 0x10).as_ptr::<u64>().read() };
    assert_eq!(direct, 0x1122_3344_5566_7788);
}

#[test]
fn mappings_spanning_pages_cover_every_page() {
    let rig = boot(64, arena_only());
    let mm = &rig.mm;
    let block = mm.alloc_pages(2).unwrap();
    let phys = mm.pool().virt_to_phys(block);

    let p = mm.mapmem_hphys(phys + 0xFFC, 8, MapFlags::WRITE).unwrap();
    let base = VirtualAddress::new(p.as_u64() & !0xFFF);
    assert_ne!(rig.mmu.translate(base) & PTE_P, 0);
    assert_ne!(rig.mmu.translate(base + 4096) & PTE_P, 0);

    let before = rig.mmu.invalidations.load(Ordering::SeqCst);
    mm.unmapmem(p, 8);
    assert_eq!(rig.mmu.invalidations.load(Ordering::SeqCst), before + 2);
    assert_eq!(rig.mmu.translate(base) & PTE_P, 0);
    assert_eq!(rig.mmu.translate(base + 4096) & PTE_P, 0);
}

#[test]
fn consecutive_requests_take_fresh_pages() {
    let rig = boot(64, arena_only());
    let mm = &rig.mm;
    let (_, phys) = mm.alloc_page().unwrap();

    let a = mm.mapmem_hphys(phys, 16, MapFlags::READ).unwrap();
    let b = mm.mapmem_hphys(phys, 16, MapFlags::READ).unwrap();
    assert_eq!(a, VirtualAddress::new(MAPMEM_ADDR_START));
    assert_eq!(b, a + 4096);

    // Freed pages are not reused until the cursor comes round again.
    mm.unmapmem(a, 16);
    let c = mm.mapmem_hphys(phys, 16, MapFlags::READ).unwrap();
    assert_eq!(c, b + 4096);
}

#[test]
fn arena_wraps_once() {
    let start = VirtualAddress::new(MAPMEM_ADDR_START);
    let layout = arena_only().with_mapmem(start, start + 4 * 4096);
    let rig = boot(64, layout);
    let mm = &rig.mm;
    let (_, phys) = mm.alloc_page().unwrap();

    let three = mm.mapmem_hphys(phys, 3 * 4096, MapFlags::READ).unwrap();
    assert_eq!(three, start);
    mm.unmapmem(three, 3 * 4096);

    // One page left before the end; the two-page run wraps to the start.
    let two = mm.mapmem_hphys(phys, 2 * 4096, MapFlags::READ).unwrap();
    assert_eq!(two, start);
}

#[test]
#[should_panic(expected = "mapmem arena exhausted")]
fn full_arena_is_fatal() {
    let start = VirtualAddress::new(MAPMEM_ADDR_START);
    let layout = arena_only().with_mapmem(start, start + 4 * 4096);
    let rig = boot(64, layout);
    let (_, phys) = rig.mm.alloc_page().unwrap();
    let _all = rig.mm.mapmem_hphys(phys, 4 * 4096, MapFlags::READ).unwrap();
    let _more = rig.mm.mapmem_hphys(phys, 1, MapFlags::READ);
}

#[test]
fn unmapping_outside_the_arena_does_nothing() {
    let rig = boot(64, arena_only());
    rig.mm.unmapmem(VirtualAddress::new(0x1000), 4096);
    rig.mm.unmapmem(VirtualAddress::new(HPHYS_ADDR), 4096);
    assert_eq!(rig.mmu.invalidations.load(Ordering::SeqCst), 0);
}

#[test]
fn identity_window_serves_uncached_requests() {
    let rig = boot(64, MemoryLayout::default());
    let mm = &rig.mm;
    mm.map_hphys_window().unwrap();
    let (page, phys) = mm.alloc_page().unwrap();

    let p = mm.mapmem_hphys(phys + 8, 4, MapFlags::WRITE).unwrap();
    assert_eq!(p, VirtualAddress::new(HPHYS_ADDR + phys.as_u64() + 8));
    unsafe { mm.host_ptr::<u32>(p).write(0xCAFE_F00D) };
    assert_eq!(unsafe { (page + 8).as_ptr::<u32>().read() }, 0xCAFE_F00D);

    // Cache attributes force an arena mapping with those attributes.
    let uc = mm.mapmem_hphys(phys + 8, 4, MapFlags::READ.with_pcd(true)).unwrap();
    assert!(mm.layout().in_mapmem(uc));
    assert_ne!(rig.mmu.translate(uc) & PTE_PCD, 0);
    assert_eq!(unsafe { mm.host_ptr::<u32>(uc).read() }, 0xCAFE_F00D);
    mm.unmapmem(uc, 4);
}

#[test]
fn window_is_unused_until_mapped() {
    let rig = boot(64, MemoryLayout::default());
    let mm = &rig.mm;
    let (page, phys) = mm.alloc_page().unwrap();
    unsafe { page.as_mut_ptr::<u64>().write(0x1122_3344) };

    let p = mm.mapmem_hphys(phys, 8, MapFlags::READ).unwrap();
    assert!(mm.layout().in_mapmem(p));
    assert_eq!(unsafe { mm.host_ptr::<u64>(p).read() }, 0x1122_3344);
    mm.unmapmem(p, 8);
}

#[test]
fn three_level_tables_map_through_the_arena() {
    let layout = MemoryLayout {
        vmm_levels: 3,
        ..MemoryLayout::default()
    };
    let rig = boot(64, layout);
    let mm = &rig.mm;
    mm.map_hphys_window().unwrap();
    let (_, phys) = mm.alloc_page().unwrap();

    let p = mm.mapmem_hphys(phys, 8, MapFlags::READ).unwrap();
    assert!(mm.layout().in_mapmem(p));
    assert_ne!(p, VirtualAddress::new(HPHYS_ADDR + phys.as_u64()));
    mm.unmapmem(p, 8);
}

#[test]
fn concurrent_mappings_never_alias() {
    const THREADS: usize = 4;
    const EACH: usize = 16;

    let rig = boot(256, arena_only());
    let mm = &rig.mm;
    let barrier = Barrier::new(THREADS);

    let live: Vec<Vec<u64>> = std::thread::scope(|s| {
        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let barrier = &barrier;
                s.spawn(move || {
                    let pages: Vec<PhysicalAddress> =
                        (0..EACH).map(|_| mm.alloc_page().unwrap().1).collect();
                    barrier.wait();
                    let mut mine = Vec::new();
                    for (i, &phys) in pages.iter().enumerate() {
                        let va = mm.mapmem_hphys(phys, 8, MapFlags::WRITE).unwrap();
                        let tag = ((t as u64) << 32) | i as u64;
                        unsafe { mm.host_ptr::<u64>(va).write(tag) };
                        mine.push((va, tag));
                    }
                    barrier.wait();
                    for &(va, tag) in &mine {
                        assert_eq!(unsafe { mm.host_ptr::<u64>(va).read() }, tag);
                    }
                    mine.iter().map(|(va, _)| va.as_u64()).collect()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let mut seen = HashSet::new();
    for va in live.iter().flatten() {
        assert!(seen.insert(*va), "arena page {va:#x} handed out twice");
    }
    assert_eq!(seen.len(), THREADS * EACH);
}

#[test]
fn writable_mapping_of_rom_is_refused() {
    let rig = boot(64, arena_only());
    let mm = &rig.mm;
    let (_, rom) = mm.alloc_page().unwrap();
    let mut guest = GuestMap::default();
    guest.back(0xF_0000, rom, true);

    let err = mm
        .mapmem_gphys(&guest, PhysicalAddress::new(0xF_0010), 4, MapFlags::WRITE)
        .unwrap_err();
    assert_eq!(err, MapError::FakeRom { gphys: PhysicalAddress::new(0xF_0000) });

    let r = mm
        .mapmem_gphys(&guest, PhysicalAddress::new(0xF_0010), 4, MapFlags::READ)
        .unwrap();
    assert_eq!(unsafe { mm.host_ptr::<u32>(r).read() }, 0);
    mm.unmapmem(r, 4);
}

#[test]
fn failed_guest_mapping_is_rolled_back() {
    let rig = boot(64, arena_only());
    let mm = &rig.mm;
    let (_, backing) = mm.alloc_page().unwrap();
    let mut guest = GuestMap::default();
    guest.back(0x10_0000, backing, false);

    let err = mm
        .mapmem_gphys(&guest, PhysicalAddress::new(0x10_0800), 0x1000, MapFlags::READ)
        .unwrap_err();
    assert_eq!(err, MapError::NoTarget { gphys: PhysicalAddress::new(0x10_1000) });

    let start = VirtualAddress::new(MAPMEM_ADDR_START);
    assert_eq!(rig.mmu.translate(start) & PTE_P, 0);
    assert_eq!(rig.mmu.translate(start + 4096) & PTE_P, 0);
}

#[test]
fn contiguous_guest_range_uses_the_identity_window() {
    let rig = boot(64, MemoryLayout::default());
    let mm = &rig.mm;
    mm.map_hphys_window().unwrap();
    let block = mm.alloc_pages(2).unwrap();
    let hphys = mm.pool().virt_to_phys(block);

    let mut guest = GuestMap::default();
    guest.back(0x20_0000, hphys, false);
    guest.back(0x20_1000, hphys + 4096, false);
    let p = mm
        .mapmem_gphys(&guest, PhysicalAddress::new(0x20_0FF0), 0x20, MapFlags::WRITE)
        .unwrap();
    assert_eq!(p, VirtualAddress::new(HPHYS_ADDR + hphys.as_u64() + 0xFF0));

    // Scattered backing needs the arena.
    let (_, other) = mm.alloc_page().unwrap();
    guest.back(0x20_1000, other, false);
    let q = mm
        .mapmem_gphys(&guest, PhysicalAddress::new(0x20_0FF0), 0x20, MapFlags::WRITE)
        .unwrap();
    assert!(mm.layout().in_mapmem(q));
    mm.unmapmem(q, 0x20);
}
