//! katman-stm: software transactional memory with strict serializability.
//!
//! Shared state lives in [`TVar`]s; mutations happen inside
//! [`atomically`] blocks that either commit as a whole at a single clock
//! timestamp or leave no trace and re-execute. The protocol is
//! multi-version timestamp ordering with commit-time locking:
//!
//! - **Reads** are optimistic and lock-free: each variable keeps a short
//!   chain of recent versions, and a load walks to the newest version at
//!   or below the transaction's snapshot timestamp.
//! - **Writes** are buffered in a per-thread descriptor and published at
//!   commit under striped locks, after the whole read set re-validates.
//! - **Reclamation**: replaced versions are retired through `katman`'s
//!   epochs; version nodes themselves come from `katman-alloc`'s thread
//!   heap.
//!
//! # Example
//!
//! ```rust
//! use katman_stm::Stm;
//!
//! let stm = Stm::new();
//! let account = stm.tvar(100i64);
//!
//! let before = stm
//!     .atomically(|tx| {
//!         let balance = tx.load(&account)?;
//!         tx.store(&account, balance + 50)?;
//!         Ok(balance)
//!     })
//!     .unwrap();
//!
//! assert_eq!(before, 100);
//! assert_eq!(stm.atomically(|tx| tx.load(&account)).unwrap(), 150);
//! ```
//!
//! Do not perform I/O or other irrevocable effects inside a transaction
//! body: conflicting bodies are re-executed.

mod clock;
mod descriptor;
mod errors;
mod lock_table;
mod node;
mod transaction;
mod var;

pub use clock::GlobalClock;
pub use errors::{StmError, UserError};
pub use lock_table::STRIPE_COUNT;
pub use transaction::Transaction;
pub use var::{MAX_HISTORY, TVar};

use core::cell::RefCell;
use descriptor::TransactionDescriptor;

thread_local! {
    // One long-lived descriptor per thread, reused by every transaction.
    static DESCRIPTOR: RefCell<TransactionDescriptor> =
        RefCell::new(TransactionDescriptor::new());
}

/// The STM runtime: owns the commit clock.
///
/// The stripe table and the reclamation epochs are process-wide; the
/// clock is what ties a set of `TVar`s into one serializable history, so
/// every variable must be used with the `Stm` whose transactions created
/// its versions. One global instance ([`STM`]) covers the common
/// case.
pub struct Stm {
    clock: GlobalClock,
}

impl Stm {
    /// Create an STM runtime with its clock at zero.
    pub const fn new() -> Self {
        Self {
            clock: GlobalClock::new(),
        }
    }

    /// Create a transactional variable holding `value`.
    pub fn tvar<T: Send + Sync + 'static>(&self, value: T) -> TVar<T> {
        TVar::new(value)
    }

    /// Run `body` as a transaction, retrying until it commits.
    ///
    /// The body observes a consistent snapshot and its writes apply
    /// atomically at commit. [`StmError::Retry`] from the body (or a
    /// conflict found at commit) discards the attempt and re-executes;
    /// [`StmError::User`] aborts for good and is returned. The body runs
    /// inside an epoch critical section for its entire duration,
    /// including retries.
    ///
    /// Nesting `atomically` on one thread is a programming error and
    /// panics.
    pub fn atomically<T, F>(&self, mut body: F) -> Result<T, StmError>
    where
        F: FnMut(&mut Transaction<'_>) -> Result<T, StmError>,
    {
        let _epoch = katman::pin();

        DESCRIPTOR.with(|cell| {
            let mut desc = cell
                .try_borrow_mut()
                .expect("nested atomically is not supported");

            let mut retries: u64 = 0;
            loop {
                let mut tx = Transaction::new(&self.clock, &mut desc);
                tx.begin();

                match body(&mut tx) {
                    Ok(value) => {
                        if tx.commit() {
                            return Ok(value);
                        }
                        // Conflict: staged state is already rolled back.
                    }
                    Err(StmError::Retry) => {
                        tx.abort();
                        std::thread::yield_now();
                    }
                    Err(user) => {
                        tx.abort();
                        return Err(user);
                    }
                }

                retries += 1;
                if retries % 1000 == 0 {
                    tracing::trace!(retries, "transaction still retrying");
                }
            }
        })
    }
}

impl Default for Stm {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide STM instance for code that doesn't thread its own
/// runtime around.
pub static STM: Stm = Stm::new();

/// Run a transaction against the global [`STM`] instance.
pub fn atomically<T, F>(body: F) -> Result<T, StmError>
where
    F: FnMut(&mut Transaction<'_>) -> Result<T, StmError>,
{
    STM.atomically(body)
}
