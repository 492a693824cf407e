//! Search, insert, delete, and ordered iteration over one index's page
//! chain (spec §4.4, §4.5).

pub mod cursor;
pub mod tree;

pub use cursor::TreeCursor;
pub use tree::Tree;
