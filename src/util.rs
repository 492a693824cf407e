//! Small shared helpers: unsigned key comparison with the prefix-skip
//! optimisation binary search relies on, and a deterministic shuffle used by
//! the cache fill/scrambled test scenario (spec §8 scenario 1).

use rand::{rngs::StdRng, Rng, SeedableRng};

/// Unsigned lexicographic comparison, the only ordering the engine ever
/// uses for keys (spec §3 "Key encoding").
pub fn compare_unsigned(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    a.cmp(b)
}

/// Length of the common prefix of `a` and `b`, starting the scan at `skip`
/// bytes in (both must already be known equal up to `skip`). Used by
/// `Node::binary_search` to avoid re-comparing bytes already known to match
/// from the previous probe.
pub fn common_prefix_len(a: &[u8], b: &[u8], skip: usize) -> usize {
    let max = a.len().min(b.len());
    let mut i = skip.min(max);
    while i < max && a[i] == b[i] {
        i += 1;
    }
    i
}

/// Deterministically permutes `0..n` using a fixed seed, so repeated test
/// runs see the same "scrambled" id order described in spec §8 scenario 1.
pub fn scramble(n: u64) -> Vec<u64> {
    let mut ids: Vec<u64> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(0x5db_fee_d00);
    for i in (1..ids.len()).rev() {
        let j = rng.gen_range(0..=i);
        ids.swap(i, j);
    }
    ids
}
