//! Fast non-cryptographic 64-bit hash used for bucket placement.
//!
//! The input is consumed as little-endian 8-byte words; the final 1..=7 bytes
//! are folded into one zero-padded word, so the tail costs the same as a full
//! word. Output is stable across runs, platforms and toolchains, which keeps
//! bucket placement reproducible. Never use this for anything security
//! related.

/// Multiplier applied after every word.
const M: u64 = 0x8803_55f2_1e6d_1965;

#[inline]
fn mix(mut h: u64) -> u64 {
    h ^= h >> 23;
    h = h.wrapping_mul(0x2127_599b_f432_5c37);
    h ^= h >> 47;
    h
}

/// Hash `bytes` with seed 0.
#[inline]
pub fn fast_hash(bytes: &[u8]) -> u64 {
    fast_hash_with_seed(bytes, 0)
}

/// Hash `bytes` with an explicit seed.
pub fn fast_hash_with_seed(bytes: &[u8], seed: u64) -> u64 {
    let mut h = seed ^ (bytes.len() as u64).wrapping_mul(M);

    let mut words = bytes.chunks_exact(8);
    for word in &mut words {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(word);
        h ^= mix(u64::from_le_bytes(buf));
        h = h.wrapping_mul(M);
    }

    let tail = words.remainder();
    if !tail.is_empty() {
        let mut buf = [0u8; 8];
        buf[..tail.len()].copy_from_slice(tail);
        h ^= mix(u64::from_le_bytes(buf));
        h = h.wrapping_mul(M);
    }

    mix(h)
}

/// Map a hash onto one of `buckets` slots.
#[inline]
pub fn bucket_index(hash: u64, buckets: usize) -> usize {
    debug_assert!(buckets > 0, "buckets must be > 0");
    (hash % buckets as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let a = fast_hash(b"the quick brown fox");
        let b = fast_hash(b"the quick brown fox");
        assert_eq!(a, b);
        assert_eq!(fast_hash(b""), fast_hash(&[]));
    }

    #[test]
    fn test_known_values() {
        // Output is part of the contract: stable across runs and platforms.
        assert_eq!(fast_hash(b""), 0);
        assert_eq!(fast_hash(b"a"), 0x527c_05aa_9617_41c6);
        assert_eq!(fast_hash(b"12345678"), 0x2153_cc5b_93db_5911);
        assert_eq!(fast_hash(b"123456789"), 0xe159_b2b4_6b02_08a2);
        assert_eq!(fast_hash(b"the quick brown fox"), 0x677c_bec6_f4ab_fabe);
        assert_eq!(fast_hash_with_seed(b"key", 1), 0x2b69_5a1d_17f1_b130);
    }

    #[test]
    fn test_seed_changes_output() {
        assert_ne!(fast_hash_with_seed(b"key", 0), fast_hash_with_seed(b"key", 1));
    }

    #[test]
    fn test_tail_lengths_distinct() {
        // Every prefix length exercises a different tail size.
        let data = b"0123456789abcdef0";
        let mut seen = std::collections::HashSet::new();
        for len in 0..=data.len() {
            assert!(seen.insert(fast_hash(&data[..len])), "collision at len {}", len);
        }
    }

    #[test]
    fn test_trailing_zero_not_ignored() {
        // Zero padding of the tail must not make these collide.
        assert_ne!(fast_hash(b"abc"), fast_hash(b"abc\0"));
    }

    #[test]
    fn test_avalanche() {
        let base = *b"avalanche-input!";
        let h0 = fast_hash(&base);
        let mut total = 0u32;
        let mut flips = 0u32;
        for byte in 0..base.len() {
            for bit in 0..8 {
                let mut changed = base;
                changed[byte] ^= 1 << bit;
                total += (h0 ^ fast_hash(&changed)).count_ones();
                flips += 1;
            }
        }
        let mean = total as f64 / flips as f64;
        assert!(mean > 24.0 && mean < 40.0, "mean flipped bits {}", mean);
    }

    #[test]
    fn test_bucket_index_in_range() {
        for i in 0..1000u32 {
            let h = fast_hash(&i.to_le_bytes());
            assert!(bucket_index(h, 7) < 7);
        }
    }
}
