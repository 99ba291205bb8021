//! The subsystem's view of the host MMU.
//!
//! Everything that touches CR3 or the TLB goes through [`HostMmu`], so the
//! mapping logic can run against the real processor or against a software
//! model in host-side tests.

use vmm_addresses::VirtualAddress;

/// Page-table root and TLB control of the executing CPU.
pub trait HostMmu: Sync {
    /// Current root pointer (CR3), including its attribute bits.
    fn current_root(&self) -> u64;

    /// Load `root` and return the previous root.
    fn switch_root(&self, root: u64) -> u64;

    /// Drop the TLB entry for the page containing `virt`.
    fn invalidate_page(&self, virt: VirtualAddress);

    /// Drop all non-global TLB entries by reloading the current root.
    fn flush_all(&self) {
        self.switch_root(self.current_root());
    }

    /// Pointer through which this CPU reaches `virt`.
    ///
    /// On hardware this is the address itself.
    fn host_ptr(&self, virt: VirtualAddress) -> *mut u8 {
        virt.as_mut_ptr()
    }
}

/// [`HostMmu`] backed by the x86-64 control registers.
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Default)]
pub struct X86Mmu;

#[cfg(target_arch = "x86_64")]
impl X86Mmu {
    /// # Safety
    /// Only usable at CPL0 with paging enabled.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self
    }
}

#[cfg(target_arch = "x86_64")]
impl HostMmu for X86Mmu {
    fn current_root(&self) -> u64 {
        let cr3: u64;
        // SAFETY: construction requires CPL0.
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        cr3
    }

    fn switch_root(&self, root: u64) -> u64 {
        let old = self.current_root();
        // SAFETY: callers hand in roots whose upper half maps the VMM.
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) root, options(nostack, preserves_flags));
        }
        old
    }

    fn invalidate_page(&self, virt: VirtualAddress) {
        // SAFETY: invlpg has no memory effects besides the TLB.
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) virt.as_u64(), options(nostack, preserves_flags));
        }
    }
}
