use vmm_addresses::{PhysWindow, PhysicalAddress, VirtualAddress};
use vmm_alloc::{PageDescriptor, PoolAllocator};

#[repr(C, align(4096))]
struct Frame([u8; 4096]);

fn with_pool<R>(pages: usize, f: impl FnOnce(&PoolAllocator<'_>) -> R) -> R {
    let mut frames: Vec<Frame> = (0..pages).map(|_| Frame([0; 4096])).collect();
    let mut descriptors = vec![PageDescriptor::default(); pages];
    let window = PhysWindow::new(
        PhysicalAddress::new(0x0400_0000),
        VirtualAddress::from_ptr(frames.as_mut_ptr()),
        (pages * 4096) as u64,
    );
    let pool = PoolAllocator::new(window, &mut descriptors, &[]);
    f(&pool)
}

#[test]
fn small_objects_share_an_arena_page() {
    with_pool(8, |pool| {
        let a = pool.alloc(100).unwrap();
        let b = pool.alloc(100).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.as_u64() & !0xFFF, b.as_u64() & !0xFFF);
        assert_eq!(a.as_u64() % 128, 0);
        assert_eq!(b.as_u64() % 128, 0);
        assert_ne!(a.as_u64() & 0xFFF, 0);
        assert_eq!(pool.num_of_available_pages(), 7);

        // Slots are usable memory.
        unsafe {
            a.as_mut_ptr::<u8>().write_bytes(0xAA, 100);
            b.as_mut_ptr::<u8>().write_bytes(0x55, 100);
            assert_eq!(*a.as_ptr::<u8>().add(99), 0xAA);
        }

        pool.free(a);
        assert_eq!(pool.alloc(90).unwrap(), a);
    });
}

#[test]
fn full_page_is_relisted_after_a_free() {
    with_pool(8, |pool| {
        // 1 KiB slots: the header takes the first, three remain.
        let first: Vec<_> = (0..3).map(|_| pool.alloc(1024).unwrap()).collect();
        let page = first[0].as_u64() & !0xFFF;
        assert!(first.iter().all(|p| p.as_u64() & !0xFFF == page));

        let spill = pool.alloc(1000).unwrap();
        assert_ne!(spill.as_u64() & !0xFFF, page);
        assert_eq!(pool.num_of_available_pages(), 6);

        pool.free(first[1]);
        assert_eq!(pool.alloc(1024).unwrap(), first[1]);
    });
}

#[test]
fn large_requests_take_whole_pages() {
    with_pool(16, |pool| {
        let big = pool.alloc(5000).unwrap();
        assert_eq!(big.as_u64() & 0xFFF, 0);
        assert_eq!(pool.num_of_available_pages(), 14);
        pool.free(big);
        assert_eq!(pool.num_of_available_pages(), 16);
    });
}

#[test]
fn classes_do_not_mix() {
    with_pool(8, |pool| {
        let small = pool.alloc(16).unwrap();
        let medium = pool.alloc(512).unwrap();
        assert_ne!(small.as_u64() & !0xFFF, medium.as_u64() & !0xFFF);
        pool.free(small);
        pool.free(medium);
        // Arena pages stay with the small-object allocator.
        assert_eq!(pool.num_of_available_pages(), 6);
    });
}

#[test]
#[should_panic(expected = "double free")]
fn double_free_of_a_slot_is_fatal() {
    with_pool(4, |pool| {
        let p = pool.alloc(32).unwrap();
        pool.free(p);
        pool.free(p);
    });
}
