//! The node cache layer: a fixed-capacity direct-buffer LRU of raw page
//! bytes (spec §4.2), plus the narrow optional secondary-cache interface
//! (spec §6).

pub mod primary;
pub mod secondary;

pub use primary::PageCache;
pub use secondary::{NullSecondaryCache, SecondaryCache};
