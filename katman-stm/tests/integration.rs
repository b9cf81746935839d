use katman_stm::{Stm, StmError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[test]
fn test_basic_read_write() {
    let stm = Stm::new();
    let account = stm.tvar(100i32);

    stm.atomically(|tx| {
        let value = tx.load(&account)?;
        tx.store(&account, value + 50)
    })
    .unwrap();

    let balance = stm.atomically(|tx| tx.load(&account)).unwrap();
    assert_eq!(balance, 150);
}

#[test]
fn test_transaction_returns_body_value() {
    let stm = Stm::new();
    let var = stm.tvar(10i64);

    let result = stm
        .atomically(|tx| {
            let value = tx.load(&var)?;
            tx.store(&var, value * 2)?;
            Ok(value)
        })
        .unwrap();

    assert_eq!(result, 10);
    assert_eq!(stm.atomically(|tx| tx.load(&var)).unwrap(), 20);
}

#[test]
fn test_read_your_own_writes() {
    let stm = Stm::new();
    let var = stm.tvar(10i32);

    stm.atomically(|tx| {
        assert_eq!(tx.load(&var)?, 10);

        tx.store(&var, 20)?;
        assert_eq!(tx.load(&var)?, 20);

        tx.store(&var, 30)?;
        assert_eq!(tx.load(&var)?, 30);
        Ok(())
    })
    .unwrap();

    assert_eq!(stm.atomically(|tx| tx.load(&var)).unwrap(), 30);
}

#[test]
fn test_store_then_load_law() {
    let stm = Stm::new();
    let var = stm.tvar(0u64);

    let observed = stm
        .atomically(|tx| {
            tx.store(&var, 77)?;
            tx.load(&var)
        })
        .unwrap();
    assert_eq!(observed, 77);
}

#[test]
fn test_error_rolls_back_staged_writes() {
    let stm = Stm::new();
    let status = stm.tvar(String::from("Clean"));

    let result: Result<(), StmError> = stm.atomically(|tx| {
        tx.store(&status, String::from("Dirty"))?;
        Err(StmError::user(std::io::Error::other("boom")))
    });

    match result {
        Err(StmError::User(err)) => assert_eq!(err.to_string(), "boom"),
        other => panic!("expected the user error to propagate, got {other:?}"),
    }

    let after = stm.atomically(|tx| tx.load(&status)).unwrap();
    assert_eq!(after, "Clean");
}

#[test]
fn test_multi_var_swap_is_atomic() {
    let stm = Stm::new();
    let left = stm.tvar(100i64);
    let right = stm.tvar(0i64);

    stm.atomically(|tx| {
        let a = tx.load(&left)?;
        let b = tx.load(&right)?;
        tx.store(&left, a - 50)?;
        tx.store(&right, b + 50)
    })
    .unwrap();

    let (a, b) = stm
        .atomically(|tx| Ok((tx.load(&left)?, tx.load(&right)?)))
        .unwrap();
    assert_eq!((a, b), (50, 50));
}

#[test]
fn test_explicit_retry_reexecutes_body() {
    let stm = Stm::new();
    let var = stm.tvar(0u32);
    let attempts = AtomicUsize::new(0);

    stm.atomically(|tx| {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst);
        tx.store(&var, attempt as u32)?;
        if attempt < 3 {
            return Err(StmError::Retry);
        }
        Ok(())
    })
    .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    // Only the successful attempt's write survived.
    assert_eq!(stm.atomically(|tx| tx.load(&var)).unwrap(), 3);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_snapshot_isolation_reader_vs_writer() {
    let stm = Arc::new(Stm::new());
    let var = Arc::new(stm.tvar(0i32));

    let reader_entered = Arc::new(AtomicBool::new(false));
    let writer_done = Arc::new(AtomicBool::new(false));

    let writer = {
        let stm = stm.clone();
        let var = var.clone();
        let reader_entered = reader_entered.clone();
        let writer_done = writer_done.clone();
        thread::spawn(move || {
            while !reader_entered.load(Ordering::SeqCst) {
                thread::yield_now();
            }
            stm.atomically(|tx| tx.store(&var, 42)).unwrap();
            writer_done.store(true, Ordering::SeqCst);
        })
    };

    let seen = stm
        .atomically(|tx| {
            let first = tx.load(&var)?;

            reader_entered.store(true, Ordering::SeqCst);
            while !writer_done.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }

            // The writer committed meanwhile; this snapshot must not see it.
            let second = tx.load(&var)?;
            Ok((first, second))
        })
        .unwrap();

    // The read-only transaction commits on its original snapshot.
    assert_eq!(seen, (0, 0));

    writer.join().unwrap();
    assert_eq!(stm.atomically(|tx| tx.load(&var)).unwrap(), 42);
}

#[test]
fn test_alloc_survives_commit() {
    let stm = Stm::new();

    let ptr = stm
        .atomically(|tx| Ok(tx.alloc::<u64>(9000)))
        .unwrap();

    // Committed allocations are user-owned from here on.
    assert_eq!(unsafe { *ptr }, 9000);

    stm.atomically(|tx| {
        // SAFETY: the allocation committed, nothing else references it,
        // and this read-only body runs exactly once.
        unsafe { tx.free(ptr) };
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_aborted_alloc_leaves_no_live_object() {
    let drops = Arc::new(AtomicUsize::new(0));

    struct Tracked(Arc<AtomicUsize>);
    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let stm = Stm::new();
    let observed = drops.clone();
    let result: Result<(), StmError> = stm.atomically(move |tx| {
        tx.alloc(Tracked(observed.clone()));
        Err(StmError::user(std::io::Error::other("abort")))
    });

    assert!(result.is_err());
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}
