use vmm_addresses::{PhysicalAddress, VirtualAddress};

/// Why a mapmem request was not served.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    /// A writable mapping was requested for a guest page that is shadowed
    /// read-only (ROM emulation).
    #[error("guest page {gphys} is read-only ROM")]
    FakeRom { gphys: PhysicalAddress },
    /// A page table for the arena could not be allocated.
    #[error("out of memory for mapmem page tables")]
    OutOfMemory,
    /// The guest-physical page has no host backing.
    #[error("guest page {gphys} has no host backing")]
    NoTarget { gphys: PhysicalAddress },
}

/// Failure of a process address-space operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ProcessError {
    /// The range reaches into VMM space or wraps around.
    #[error("range is outside the process address space")]
    OutOfRange,
    /// A page of the source buffer is not mapped in the source process.
    #[error("{virt} is not mapped")]
    Unmapped { virt: VirtualAddress },
    #[error("out of memory")]
    OutOfMemory,
}

impl From<vmm_pmap::PmapError> for MapError {
    fn from(_: vmm_pmap::PmapError) -> Self {
        Self::OutOfMemory
    }
}

impl From<vmm_pmap::PmapError> for ProcessError {
    fn from(_: vmm_pmap::PmapError) -> Self {
        Self::OutOfMemory
    }
}

impl From<vmm_alloc::AllocError> for ProcessError {
    fn from(_: vmm_alloc::AllocError) -> Self {
        Self::OutOfMemory
    }
}
