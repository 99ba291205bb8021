//! # Page-Table Walker
//!
//! One cursor type, [`Pmap`], walks every x86 paging format the hypervisor
//! meets, both in its own address space and in the guest's:
//!
//! | Levels | Format | Entry | Top-level table |
//! |:------:|--------|:-----:|-----------------|
//! | 2 | 32-bit | 4 bytes | page directory, 1024 entries |
//! | 3 | PAE | 8 bytes | page-directory-pointer table, 4 entries (32 bytes) |
//! | 4 | long mode | 8 bytes | PML4, 512 entries |
//!
//! ## Linear address split
//!
//! ```text
//! 2 levels:                   | 31‒22 PD | 21‒12 PT | 11‒0 |
//! 3 levels:        | 31‒30 PDPT | 29‒21 PD | 20‒12 PT | 11‒0 |
//! 4 levels: | 47‒39 PML4 | 38‒30 PDPT | 29‒21 PD | 20‒12 PT | 11‒0 |
//! ```
//!
//! A PDE with `PS=1` maps a 4 MiB (2 levels) or 2 MiB (3/4 levels) page; in
//! long mode a PDPTE with `PS=1` maps 1 GiB. Reading through such an entry
//! at a finer level yields the equivalent finer entry, so callers never need
//! to special-case superpages.
//!
//! ## Table access
//!
//! Where the tables live and how they may be updated is a [`TableKind`],
//! realised by a [`TableAccess`] backend:
//!
//! - [`VmmTables`]: the VMM's tables, addressed through the pool window.
//! - [`GuestTables`]: guest tables, plain accesses via [`GuestPhysMemory`].
//! - [`AtomicGuestTables`]: guest tables that guest CPUs update concurrently;
//!   writes are compare-and-swap and a lost race is reported as
//!   [`PmapWriteError::Conflict`].
//!
//! Only VMM tables can grow: [`Pmap::autoalloc`] links fresh zeroed tables
//! taken from a [`FrameAlloc`].
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut m = Pmap::open_vmm(tables, cr3, 4);
//! m.seek(va, 1);
//! m.autoalloc(&frames)?;
//! m.write(pa.as_u64() | PTE_P | PTE_RW, PTE_P | PTE_RW)?;
//! assert_eq!(m.read() & PTE_ADDR_MASK, pa.as_u64());
//! m.close();
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod access;
mod bits;
mod cursor;
mod error;

pub use crate::access::{
    AtomicGuestTables, GuestAccess, GuestPhysMemory, GuestTables, TableAccess, TableKind,
    VmmTables,
};
pub use crate::bits::*;
pub use crate::cursor::{FrameAlloc, Pmap};
pub use crate::error::{CasFailure, PmapError, PmapWriteError};
