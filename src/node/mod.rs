//! The node layer (spec §4.2-§4.4): page byte layout, the in-memory `Node`
//! and its algorithms, the process-wide node map and usage list, plus the
//! split/rebalance/compaction helpers `crate::tree::Tree` drives.

pub mod alloc;
pub mod layout;
pub mod map;
pub mod node;
pub mod rebalance;
pub mod split;
pub mod usage_list;

pub use map::NodeMap;
pub use node::{CacheState, Entry, EntryValue, Node, Split, UsageLink};
pub use usage_list::UsageList;
