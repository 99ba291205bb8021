//! # VMM synchronization primitives
//!
//! The memory subsystem runs on every physical CPU at once, with interrupts
//! typically disabled and nothing to schedule. Waiting therefore always means
//! spinning:
//!
//! - [`SpinLock`] guards bookkeeping (free lists, size-class lists, the
//!   mapmem arena cursor, the process translation helper). Critical sections
//!   are short and never block.
//! - [`SyncOnceCell`] publishes the single memory-subsystem instance once
//!   initialisation has finished.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;
mod sync_once_cell;

pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
