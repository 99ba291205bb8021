use thiserror::Error;
use vmm_addresses::PhysicalAddress;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum PmapError {
    /// No page was available for a missing intermediate table.
    #[error("out of memory while allocating a page table")]
    OutOfMemory,
}

/// A [`Pmap::write`](crate::Pmap::write) that stored nothing.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum PmapWriteError {
    /// An atomic guest-table store found a different value than the cursor
    /// had read; `observed` is the entry now in memory.
    #[error("page-table entry changed concurrently (now {observed:#x})")]
    Conflict { observed: u64 },
    /// The entry's guest-physical address could not be reached.
    #[error("page-table entry at {addr} is not accessible")]
    Unreachable { addr: PhysicalAddress },
}

/// Why a guest compare-and-swap did not store.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CasFailure<T> {
    /// Memory held this value instead of the expected one.
    Changed(T),
    /// The address has no backing or may not be written.
    Unreachable,
}

impl<T> CasFailure<T> {
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CasFailure<U> {
        match self {
            Self::Changed(v) => CasFailure::Changed(f(v)),
            Self::Unreachable => CasFailure::Unreachable,
        }
    }
}
