//! latchtree: an embedded, transactional, ordered key/value storage engine
//! backed by a paged on-disk file.
//!
//! The public entry point is [`db::Database`]. Everything else is the
//! layered implementation underneath it: [`node`] owns the page byte
//! layout and the in-memory B-tree node, [`tree`] drives search/split/merge
//! over a chain of nodes, [`lock`] and [`txn`] provide two-phase locking
//! and undo/redo, [`checkpoint`] and [`recovery`] make the whole thing
//! durable across a restart.

pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod error;
pub mod fragment;
pub mod latch;
pub mod lock;
pub mod log;
pub mod node;
pub mod page_array;
pub mod recovery;
pub mod tree;
pub mod txn;
pub mod types;
pub mod util;

pub use config::{Config, DurabilityMode};
pub use db::{Database, DbTransaction};
pub use error::{EngineError, Result};
pub use types::{PageId, TreeId, TxnId};
