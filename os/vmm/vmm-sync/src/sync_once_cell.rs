use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const READY: u8 = 2;

/// Write-once cell usable from a `static`.
///
/// The first caller of [`set`](Self::set) or [`get_or_init`](Self::get_or_init)
/// stores the value; concurrent callers spin until it is published. Readers
/// never take a lock.
///
/// ```rust
/// # use vmm_sync::SyncOnceCell;
/// static POOL_BASE: SyncOnceCell<u64> = SyncOnceCell::new();
/// assert!(POOL_BASE.get().is_none());
/// assert_eq!(POOL_BASE.set(0x10_0000), Ok(()));
/// assert_eq!(POOL_BASE.set(0x20_0000), Err(0x20_0000));
/// assert_eq!(POOL_BASE.get(), Some(&0x10_0000));
/// ```
pub struct SyncOnceCell<T> {
    state: AtomicU8,
    slot: UnsafeCell<MaybeUninit<T>>,
}

// SAFETY: the value is written once before READY and only shared afterwards.
unsafe impl<T: Send + Sync> Sync for SyncOnceCell<T> {}
unsafe impl<T: Send> Send for SyncOnceCell<T> {}

impl<T> Default for SyncOnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncOnceCell<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            slot: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// The stored value, if published.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == READY {
            // SAFETY: READY is stored only after the slot was written.
            Some(unsafe { (*self.slot.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// Store `value` unless the cell is (being) filled; on loss the value is
    /// handed back.
    ///
    /// # Errors
    /// Returns `Err(value)` if another value got there first.
    pub fn set(&self, value: T) -> Result<(), T> {
        if self.claim() {
            self.publish(value);
            Ok(())
        } else {
            Err(value)
        }
    }

    /// Initialise at most once and return the stored value.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        if let Some(v) = self.get() {
            return v;
        }
        if self.claim() {
            self.publish(init());
        }
        self.wait()
    }

    fn claim(&self) -> bool {
        self.state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn publish(&self, value: T) {
        // SAFETY: the WRITING state grants exclusive access to the slot.
        unsafe { (*self.slot.get()).write(value) };
        self.state.store(READY, Ordering::Release);
    }

    fn wait(&self) -> &T {
        loop {
            if let Some(v) = self.get() {
                return v;
            }
            spin_loop();
        }
    }
}

impl<T> Drop for SyncOnceCell<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == READY {
            // SAFETY: READY means the slot holds an initialised value.
            unsafe { self.slot.get_mut().assume_init_drop() };
        }
    }
}
