//! # VMM Memory Configuration
//!
//! Compile-time layout constants and the runtime [`MemoryLayout`] shared by
//! every crate of the hypervisor memory subsystem.
//!
//! ## VMM Virtual Address Space
//!
//! ```text
//! 0x0000_0000_0000 ┌─────────────────────────────────┐
//!                  │   Process space (in-VMM tasks)  │
//!                  │   shared window   0x2000_0000.. │
//!                  │   stacks          ..0x3FFF_F000 │
//! PROCESS_LIMIT    ├─────────────────────────────────┤ 0x4000_0000
//!                  │   VMM image and memory pool     │
//! MAPMEM_ADDR_START├─────────────────────────────────┤ 0x8100_0000
//!                  │   mapmem arena (32 MiB ring)    │
//! MAPMEM_ADDR_END  ├─────────────────────────────────┤ 0x8300_0000
//!                  │                                 │
//! HPHYS_ADDR       ├─────────────────────────────────┤ 0x80_0000_0000
//!                  │   static host-physical window   │
//!                  │   (first 4 GiB, 1:1 offset)     │
//!                  └─────────────────────────────────┘
//! ```
//!
//! ## Memory Pool
//!
//! The VMM owns a single contiguous physical pool of [`VMM_POOL_SIZE`]
//! bytes, split into [`NUM_OF_PAGES`] base pages. Blocks are handed out in
//! [`NUM_OF_ORDERS`] power-of-two sizes (4 KiB to 16 MiB), and small objects
//! in [`NUM_OF_SIZE_CLASSES`] slot sizes (16 to 1024 bytes).
//!
//! All values are `const` and checked at compile time; [`MemoryLayout`]
//! carries the subset a running system (or a test) may want to vary.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

mod layout;
pub mod memory;

pub use crate::layout::MemoryLayout;
