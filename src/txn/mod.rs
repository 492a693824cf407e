//! Undo log, redo log, and the `Transaction` that composes them with the
//! lock manager (spec §4.7-§4.9).

pub mod redo;
pub mod transaction;
pub mod undo;

pub use redo::RedoLog;
pub use transaction::{Transaction, UndoSink};
pub use undo::{UndoEntry, UndoLog};
