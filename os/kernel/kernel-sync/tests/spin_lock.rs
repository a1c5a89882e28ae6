use kernel_sync::{InterruptGuard, SpinLock};
use std::{panic, thread};

#[test]
fn guard_releases_on_drop() {
    let l = SpinLock::new(0_u32);

    {
        let mut g = l.lock();
        *g = 41;
        assert!(l.is_locked());
    }
    assert!(!l.is_locked());

    let mut g = l.lock();
    *g += 1;
    assert_eq!(*g, 42);
}

#[test]
fn try_lock_detects_a_held_lock() {
    let l = SpinLock::new(1u8);

    let outer = l.try_lock();
    assert!(outer.is_some());

    // A nested attempt from the same context is the re-entrancy signal.
    assert!(l.try_lock().is_none());

    drop(outer);
    assert!(l.try_lock().is_some());
}

#[test]
fn with_lock_returns_closure_result() {
    let l = SpinLock::new(String::from("a"));
    let len = l.with_lock(|s| {
        s.push('b');
        s.len()
    });
    assert_eq!(len, 2);
    assert_eq!(l.into_inner(), "ab");
}

#[test]
fn get_mut_allows_direct_mutation() {
    let mut l = SpinLock::new(vec![1, 2, 3]);
    l.get_mut().push(4);
    assert_eq!(l.lock().as_slice(), &[1, 2, 3, 4]);
}

#[test]
fn contended_increments_are_exact_and_exclusive() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    let threads = 4;
    let iters = 2_000;

    let lock = Arc::new(SpinLock::new(0usize));
    let in_cs = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let in_cs = Arc::clone(&in_cs);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    lock.with_lock(|v| {
                        let prev = in_cs.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(prev, 0, "mutual exclusion violated");
                        *v += 1;
                        in_cs.fetch_sub(1, Ordering::SeqCst);
                    });
                    thread::yield_now();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(lock.with_lock(|v| *v), threads * iters);
}

#[test]
fn lock_is_released_on_panic() {
    let l = SpinLock::new(0u32);

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        l.with_lock(|v| {
            *v = 123;
            panic!("boom");
        });
    }));
    assert!(res.is_err(), "expected panic");

    assert_eq!(l.with_lock(|v| *v), 123);
}

#[test]
fn interrupt_guards_nest() {
    let outer = InterruptGuard::new();
    {
        let inner = InterruptGuard::new();
        assert!(!inner.were_enabled());
    }
    drop(outer);
}

#[test]
fn spinlock_is_sync_for_send_t() {
    fn takes_sync<S: Sync>(_s: &S) {}
    let l = SpinLock::new(0u8);
    takes_sync(&l);
}
