//! # Memory Layout

/// Size of the physical memory pool owned by the VMM.
pub const VMM_POOL_SIZE: u64 = 64 * 1024 * 1024;

/// Base page size.
pub const PAGE_SIZE: u64 = 4096;

/// Number of base pages in the VMM pool.
#[allow(clippy::cast_possible_truncation)]
pub const NUM_OF_PAGES: usize = (VMM_POOL_SIZE / PAGE_SIZE) as usize;

/// Number of buddy orders; order `n` blocks are `4096 << n` bytes.
pub const NUM_OF_ORDERS: usize = 13;

/// Largest block the frame allocator hands out (16 MiB).
pub const MAX_BLOCK_SIZE: u64 = PAGE_SIZE << (NUM_OF_ORDERS - 1);

/// Number of small-object size classes; class `n` slots are `16 << n` bytes.
pub const NUM_OF_SIZE_CLASSES: usize = 7;

/// Smallest small-object slot.
pub const MIN_SLOT_SIZE: usize = 16;

/// Largest small-object slot. Bigger requests take whole pages.
pub const MAX_SLOT_SIZE: usize = MIN_SLOT_SIZE << (NUM_OF_SIZE_CLASSES - 1);

/// First address of the mapmem arena.
pub const MAPMEM_ADDR_START: u64 = 0x8100_0000;

/// End (exclusive) of the mapmem arena.
pub const MAPMEM_ADDR_END: u64 = 0x8300_0000;

/// Base of the static host-physical window: `HPHYS_ADDR + pa` aliases `pa`.
pub const HPHYS_ADDR: u64 = 1 << 39;

/// Number of base pages covered by the host-physical window (4 GiB).
pub const NUM_OF_HPHYS_PAGES: u64 = 1024 * 1024;

/// Page-table levels of the VMM's own address space.
pub const VMM_PAGING_LEVELS: u8 = 4;

/// Process virtual addresses must stay below this; VMM space starts here.
pub const PROCESS_LIMIT: u64 = 0x4000_0000;

/// Shared-buffer mappings are placed downwards from here.
pub const PROCESS_SHARED_START: u64 = 0x3000_0000;

/// Shared-buffer and stack mappings must stay above this.
pub const PROCESS_MAP_FLOOR: u64 = 0x2000_0000;

/// Stacks grow down from this page.
pub const PROCESS_STACK_TOP: u64 = 0x3FFF_F000;

const _: () = {
    assert!(VMM_POOL_SIZE.is_multiple_of(MAX_BLOCK_SIZE));
    assert!(NUM_OF_PAGES.is_power_of_two());
    assert!(MAX_SLOT_SIZE < PAGE_SIZE as usize);
    assert!(MAPMEM_ADDR_START.is_multiple_of(PAGE_SIZE));
    assert!(MAPMEM_ADDR_END.is_multiple_of(PAGE_SIZE));
    assert!(MAPMEM_ADDR_START < MAPMEM_ADDR_END);
    assert!(MAPMEM_ADDR_END <= HPHYS_ADDR);
    assert!(PROCESS_MAP_FLOOR < PROCESS_SHARED_START);
    assert!(PROCESS_STACK_TOP < PROCESS_LIMIT);
    assert!(PROCESS_LIMIT <= MAPMEM_ADDR_START);
};
