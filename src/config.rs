//! Configuration surface (spec §6): `page_size`, `cache_bytes`,
//! `lock_timeout`, default `durability_mode`, `max_key_size`,
//! `max_entry_size`, `max_fragmented_entry_size`.

use std::time::Duration;

/// Durability modes a transaction's commit can request (spec §4.8).
///
/// `NoRedo` disables redo recording entirely; it is meant for temporary
/// trees whose contents need not survive a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    Sync,
    NoSync,
    NoFlush,
    NoRedo,
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::Sync
    }
}

/// Engine-wide configuration, supplied once at `Database::open`.
#[derive(Debug, Clone)]
pub struct Config {
    pub page_size: u32,
    pub cache_bytes: usize,
    pub lock_timeout: Duration,
    pub durability_mode: DurabilityMode,
    pub max_key_size: usize,
    pub max_entry_size: usize,
    pub max_fragmented_entry_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            page_size: 4096,
            cache_bytes: 64 * 1024 * 1024,
            lock_timeout: Duration::from_secs(1),
            durability_mode: DurabilityMode::Sync,
            max_key_size: 2048,
            max_entry_size: 4096 / 4,
            max_fragmented_entry_size: 4096 / 2,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        assert!(
            page_size.is_power_of_two() && (512..=65536).contains(&page_size),
            "page_size must be a power of two in 512..=65536"
        );
        self.page_size = page_size;
        self
    }

    pub fn with_cache_bytes(mut self, cache_bytes: usize) -> Self {
        self.cache_bytes = cache_bytes;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_durability_mode(mut self, mode: DurabilityMode) -> Self {
        self.durability_mode = mode;
        self
    }

    pub fn with_max_key_size(mut self, max_key_size: usize) -> Self {
        self.max_key_size = max_key_size;
        self
    }

    pub fn with_max_entry_size(mut self, max_entry_size: usize) -> Self {
        self.max_entry_size = max_entry_size;
        self
    }

    /// Number of node-cache slots implied by `cache_bytes`, used to size the
    /// primary page cache (spec §4.2).
    pub fn cache_slot_count(&self) -> usize {
        (self.cache_bytes / self.page_size as usize).max(16)
    }
}
