//! Transaction error signals.

use core::fmt;
use std::error::Error;

/// Boxed user error carried out of an aborted transaction.
pub type UserError = Box<dyn Error + Send + Sync + 'static>;

/// Signal returned by a transaction body.
///
/// `Retry` is internal control flow: the `atomically` loop consumes it and
/// re-executes the body, so it never reaches the caller. A body may return
/// it deliberately to discard the current attempt. `User` aborts the
/// transaction for good: staged writes are released and the error is
/// handed back to the caller of `atomically`.
#[derive(Debug)]
pub enum StmError {
    /// Re-execute the transaction without committing.
    Retry,
    /// Abort and surface this error to the caller.
    User(UserError),
}

impl StmError {
    /// Wrap an application error for propagation out of `atomically`.
    pub fn user<E: Into<UserError>>(err: E) -> Self {
        StmError::User(err.into())
    }
}

impl fmt::Display for StmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StmError::Retry => write!(f, "transaction retry requested"),
            StmError::User(err) => write!(f, "transaction aborted: {err}"),
        }
    }
}

impl Error for StmError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StmError::Retry => None,
            StmError::User(err) => Some(err.as_ref()),
        }
    }
}
