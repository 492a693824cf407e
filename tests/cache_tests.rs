//! Scenario 1 (fill then scrambled-order round trip) and scenario 2
//! (eviction under overflow) against the public cache surface, exercised
//! through a full page size rather than the unit tests' smaller buffers.

use latchtree::cache::PageCache;
use latchtree::PageId;

fn scramble(n: u64) -> Vec<u64> {
    let mut ids: Vec<u64> = (0..n).collect();
    let mut seed = 0x9E3779B97F4A7C15u64;
    for i in (1..ids.len()).rev() {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        let j = (seed >> 33) as usize % (i + 1);
        ids.swap(i, j);
    }
    ids
}

#[test]
fn fill_then_scrambled_lookup_returns_every_page_intact() {
    let capacity = 128;
    let cache = PageCache::new(capacity);
    let page_size = 4096usize;

    let pages: Vec<Vec<u8>> = (0..capacity as u64)
        .map(|id| vec![(id % 251) as u8; page_size])
        .collect();

    for (id, bytes) in pages.iter().enumerate() {
        cache.add(PageId(id as u64), bytes);
    }

    let mut out = Vec::new();
    for id in scramble(capacity as u64) {
        assert!(cache.remove(PageId(id), &mut out), "page {id} missing");
        assert_eq!(out, pages[id as usize]);
    }
}

#[test]
fn overflowing_the_cache_evicts_the_oldest_pages_first() {
    let capacity = 32;
    let cache = PageCache::new(capacity);
    let overflow = capacity * 3;

    for id in 0..overflow {
        cache.add(PageId(id as u64), &[id as u8; 64]);
    }

    let mut out = Vec::new();
    for id in 0..(overflow - capacity) {
        assert!(!cache.remove(PageId(id as u64), &mut out), "id {id} should have been evicted");
    }
    for id in (overflow - capacity)..overflow {
        assert!(cache.remove(PageId(id as u64), &mut out), "id {id} should still be resident");
    }
}

#[test]
fn repeated_access_protects_a_page_from_eviction() {
    let capacity = 8;
    let cache = PageCache::new(capacity);
    for id in 0..capacity as u64 {
        cache.add(PageId(id), &[0xAB; 32]);
    }

    // Touch page 0 again so it becomes most-recently-used before the
    // overflow below would otherwise reclaim it.
    cache.add(PageId(0), &[0xAB; 32]);

    for id in capacity as u64..(capacity as u64 * 2 - 1) {
        cache.add(PageId(id), &[0xCD; 32]);
    }

    let mut out = Vec::new();
    assert!(cache.remove(PageId(0), &mut out), "recently touched page evicted too early");
}
