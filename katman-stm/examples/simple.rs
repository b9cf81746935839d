//! Two threads move money between accounts; the invariant holds at every
//! point in time because transfers commit atomically.

use katman_stm::Stm;
use std::sync::Arc;
use std::thread;

fn main() {
    let stm = Arc::new(Stm::new());
    let checking = Arc::new(stm.tvar(900i64));
    let savings = Arc::new(stm.tvar(100i64));

    let mut handles = vec![];
    for worker in 0..2 {
        let stm = stm.clone();
        let checking = checking.clone();
        let savings = savings.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..1000 {
                stm.atomically(|tx| {
                    let from = tx.load(&checking)?;
                    let to = tx.load(&savings)?;
                    if from >= 10 {
                        tx.store(&checking, from - 10)?;
                        tx.store(&savings, to + 10)?;
                    } else {
                        // Sweep everything back and start over.
                        tx.store(&checking, from + to)?;
                        tx.store(&savings, 0)?;
                    }
                    Ok(())
                })
                .unwrap();
            }
            println!("worker {worker} done");
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let (from, to) = stm
        .atomically(|tx| Ok((tx.load(&checking)?, tx.load(&savings)?)))
        .unwrap();

    println!("checking = {from}, savings = {to}, total = {}", from + to);
    assert_eq!(from + to, 1000);
}
