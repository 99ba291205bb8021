//! # VMM memory subsystem
//!
//! Ties the pool allocators and the page-table walker together into the
//! service the rest of the hypervisor uses:
//!
//! | Area | Operations |
//! |------|------------|
//! | pool | [`alloc_page`], [`alloc_pages`], [`free_page`], [`alloc`], [`free`] |
//! | mapmem | [`mapmem_hphys`], [`mapmem_gphys`], [`unmapmem`] |
//! | host-physical access | `read_hphys_{b,w,l,q}`, `write_hphys_*`, `cmpxchg_hphys_{l,q}` |
//! | processes | [`process_alloc`], [`map_alloc`], [`map_shared`], [`map_stack`], [`unmap`], [`switch`], ... |
//!
//! The processor is reached only through [`HostMmu`] and guest memory only
//! through [`GuestPhysMap`], so all of it runs unchanged in host-side tests
//! with a software MMU.
//!
//! ## Locks
//!
//! Besides the allocator locks, the subsystem holds two spin locks: the
//! mapmem arena cursor and the helper that walks other processes' tables.
//! Neither is held while another subsystem lock is taken, except that arena
//! reservation may allocate page-table pages.
//!
//! [`alloc_page`]: MemorySubsystem::alloc_page
//! [`alloc_pages`]: MemorySubsystem::alloc_pages
//! [`free_page`]: MemorySubsystem::free_page
//! [`alloc`]: MemorySubsystem::alloc
//! [`free`]: MemorySubsystem::free
//! [`mapmem_hphys`]: MemorySubsystem::mapmem_hphys
//! [`mapmem_gphys`]: MemorySubsystem::mapmem_gphys
//! [`unmapmem`]: MemorySubsystem::unmapmem
//! [`process_alloc`]: MemorySubsystem::process_alloc
//! [`map_alloc`]: MemorySubsystem::map_alloc
//! [`map_shared`]: MemorySubsystem::map_shared
//! [`map_stack`]: MemorySubsystem::map_stack
//! [`unmap`]: MemorySubsystem::unmap
//! [`switch`]: MemorySubsystem::switch

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod error;
pub mod global;
mod guest;
mod hphys;
mod mapmem;
mod mmu;
mod process;
mod subsystem;

pub use crate::error::{MapError, ProcessError};
pub use crate::guest::{GuestMemory, GuestPage, GuestPhysMap};
pub use crate::mapmem::MapFlags;
#[cfg(target_arch = "x86_64")]
pub use crate::mmu::X86Mmu;
pub use crate::mmu::HostMmu;
pub use crate::subsystem::MemorySubsystem;
