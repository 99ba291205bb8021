//! # VMM Pool Allocation
//!
//! All memory the hypervisor uses for itself comes from one fixed, physically
//! contiguous pool. This crate manages it in two layers:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  VmmHeap (GlobalAlloc)                       │
//! └──────────────────┬───────────────────────────┘
//! ┌──────────────────▼───────────────────────────┐
//! │  SmallAllocator                              │
//! │    16 B .. 1 KiB slots in arena pages        │
//! │    larger requests: whole pages              │
//! └──────────────────┬───────────────────────────┘
//! ┌──────────────────▼───────────────────────────┐
//! │  FrameAllocator                              │
//! │    binary buddy, 4 KiB .. 16 MiB blocks      │
//! │    one PageDescriptor per pool page          │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! [`PoolAllocator`] bundles both layers and is what the rest of the
//! subsystem holds on to. It also feeds new page-table pages to the walker
//! through [`vmm_pmap::FrameAlloc`].
//!
//! ## Failure model
//!
//! Running out of pool memory is an ordinary [`AllocError`]. Misuse is not:
//! freeing a block twice, freeing a pointer the allocator never handed out,
//! or asking for more than the largest block size panics.
//!
//! ## Concurrency
//!
//! The buddy lists and the size-class lists each sit behind their own
//! [`SpinLock`](vmm_sync::SpinLock). A small-object allocation may take the
//! buddy lock while holding the size-class lock, never the other way round.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod error;
mod frame;
mod heap;
mod page;
mod pool;
mod small;

pub use crate::error::AllocError;
pub use crate::frame::{FrameAllocator, order_for_pages};
pub use crate::heap::{ByteAllocator, HeapBackend, VmmHeap};
pub use crate::page::{PageDescriptor, PageType};
pub use crate::pool::PoolAllocator;
pub use crate::small::{SmallAllocator, size_class};
