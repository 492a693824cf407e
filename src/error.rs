//! Error kinds the core must distinguish (spec §7).
//!
//! Propagation policy: any latch held by the failing thread is released
//! before the error surfaces (enforced by RAII latch guards, not by this
//! module). Split failures and undo failures during rollback are
//! non-recoverable: callers that hit them must mark the owning `Database`
//! panicked via [`crate::db::Database::panic_closed`] rather than attempt to
//! continue.

use backtrace::Backtrace;
use std::fmt;

use crate::types::{PageId, TreeId};

/// The specific way a lock request failed, mirroring the states a
/// `Locker::tryLock*` call can return per spec §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockFailureKind {
    TimedOut,
    Interrupted,
    IllegalUpgrade,
    Deadlock,
}

impl fmt::Display for LockFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockFailureKind::TimedOut => "timed out",
            LockFailureKind::Interrupted => "interrupted",
            LockFailureKind::IllegalUpgrade => "illegal upgrade (shared to exclusive)",
            LockFailureKind::Deadlock => "deadlock detected",
        };
        f.write_str(s)
    }
}

/// A backtrace wrapper that implements `Debug`/`PartialEq` loosely enough to
/// sit inside a derived error enum without fighting `thiserror`.
pub struct Captured(pub Backtrace);

impl fmt::Debug for Captured {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl Captured {
    fn here() -> Self {
        Captured(Backtrace::new_unresolved())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("lock failure ({kind}) on index {index_id:?} key {key}")]
    LockFailure {
        kind: LockFailureKind,
        index_id: TreeId,
        key: String,
    },

    #[error("corrupt database: {detail} (page {page_id:?})")]
    CorruptDatabase {
        page_id: Option<PageId>,
        detail: String,
        #[allow(dead_code)]
        backtrace: Captured,
    },

    #[error("write failure: {0}")]
    WriteFailure(String),

    #[error("database full: page allocation exhausted")]
    DatabaseFull,

    #[error("redo write attempted against an unmodifiable replica")]
    UnmodifiableReplica,

    #[error("invalid transaction: {reason}")]
    InvalidTransaction { reason: String },

    #[error("mutation against a closed index")]
    ClosedIndex,

    #[error("entry too large to store without a fragment service: {0} bytes")]
    EntryTooLarge(usize),

    #[error("database is panicked and refusing further operations: {0}")]
    Panicked(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn corrupt(page_id: Option<PageId>, detail: impl Into<String>) -> Self {
        EngineError::CorruptDatabase {
            page_id,
            detail: detail.into(),
            backtrace: Captured::here(),
        }
    }

    pub fn lock_failure(kind: LockFailureKind, index_id: TreeId, key: &[u8]) -> Self {
        EngineError::LockFailure {
            kind,
            index_id,
            key: hex::encode(key),
        }
    }

    /// True for the class of errors spec §7 calls non-recoverable: the
    /// caller should panic-close the database rather than keep going.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::CorruptDatabase { .. } | EngineError::Panicked(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
