use std::panic;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use vmm_sync::SpinLock;

#[test]
fn guard_releases_on_drop() {
    let lock = SpinLock::new(0_u32);
    {
        let mut g = lock.lock();
        *g = 7;
        assert!(lock.is_locked());
    }
    assert!(!lock.is_locked());
    assert_eq!(*lock.lock(), 7);
}

#[test]
fn try_lock_fails_while_held() {
    let lock = SpinLock::new([0_u8; 4]);
    let held = lock.try_lock().expect("uncontended");
    assert!(lock.try_lock().is_none());
    drop(held);
    assert!(lock.try_lock().is_some());
}

#[test]
fn with_lock_returns_closure_result() {
    let lock = SpinLock::new(Vec::<u64>::new());
    let len = lock.with_lock(|v| {
        v.extend([0x1000, 0x2000]);
        v.len()
    });
    assert_eq!(len, 2);
    assert_eq!(lock.into_inner(), vec![0x1000, 0x2000]);
}

#[test]
fn get_mut_bypasses_the_lock() {
    let mut lock = SpinLock::new(3_usize);
    *lock.get_mut() += 1;
    assert_eq!(lock.with_lock(|v| *v), 4);
}

/// Simulates several CPUs pushing and popping a shared free list.
#[test]
fn contended_free_list_stays_consistent() {
    const CPUS: usize = 8;
    const ROUNDS: usize = 2_000;

    let list = Arc::new(SpinLock::new((0..CPUS as u32).collect::<Vec<_>>()));
    let inside = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(CPUS));

    let handles: Vec<_> = (0..CPUS)
        .map(|_| {
            let list = Arc::clone(&list);
            let inside = Arc::clone(&inside);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..ROUNDS {
                    let page = list.with_lock(|l| {
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        let p = l.pop();
                        inside.fetch_sub(1, Ordering::SeqCst);
                        p
                    });
                    if let Some(p) = page {
                        thread::yield_now();
                        list.with_lock(|l| l.push(p));
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let mut pages = Arc::try_unwrap(list).unwrap().into_inner();
    pages.sort_unstable();
    assert_eq!(pages, (0..CPUS as u32).collect::<Vec<_>>());
}

#[test]
fn panic_inside_critical_section_unlocks() {
    let lock = SpinLock::new(0_u32);
    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        lock.with_lock(|v| {
            *v = 99;
            panic!("fatal inside lock");
        });
    }));
    assert!(res.is_err());
    assert_eq!(lock.with_lock(|v| *v), 99);
}

#[test]
fn spin_lock_is_sync_for_send_payload() {
    fn takes_sync<S: Sync>(_s: &S) {}
    takes_sync(&SpinLock::new(std::cell::Cell::new(0_u8)));
}
