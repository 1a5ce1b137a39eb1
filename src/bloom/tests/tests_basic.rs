#[cfg(test)]
mod tests {
    use crate::bloom::{BloomFilter, MAX_HASH_COUNT};

    #[test]
    fn test_added_keys_are_reported_present() {
        let mut bloom = BloomFilter::new(100);

        bloom.add(b"apple");
        assert!(bloom.might_contain(b"apple"));

        // A key that was never added is almost certainly absent in a
        // filter this sparse.
        assert!(!bloom.might_contain(b"banana"));
    }

    #[test]
    fn test_empty_filter_contains_nothing() {
        let bloom = BloomFilter::new(100);
        assert!(!bloom.might_contain(b"anything"));
    }

    #[test]
    fn test_zero_expected_items_still_usable() {
        let mut bloom = BloomFilter::new(0);
        assert!(bloom.bit_count() >= 1);
        assert!(bloom.hash_count() >= 1);

        bloom.add(b"k");
        assert!(bloom.might_contain(b"k"));
    }

    #[test]
    fn test_optimal_sizing_formulas() {
        // m = ceil(-n ln p / (ln 2)^2): for n=1000, p=0.01 → 9586 bits.
        assert_eq!(BloomFilter::optimal_bit_count(1000, 0.01), 9586);
        // k = ceil((m/n) ln 2): 9586/1000 * ln 2 → 7.
        assert_eq!(BloomFilter::optimal_hash_count(9586, 1000), 7);
    }

    #[test]
    fn test_hash_count_clamped() {
        // Absurdly wide filter for a single item would want k >> 10.
        assert_eq!(
            BloomFilter::optimal_hash_count(1_000_000, 1),
            MAX_HASH_COUNT
        );
        // Tiny filter never drops below one hash.
        assert_eq!(BloomFilter::optimal_hash_count(1, 1_000_000), 1);
    }

    #[test]
    fn test_hashing_is_deterministic() {
        let mut a = BloomFilter::with_rate(50, 0.01);
        let mut b = BloomFilter::with_rate(50, 0.01);

        for key in [&b"x"[..], b"y", b"z"] {
            a.add(key);
            b.add(key);
        }

        let mut buf_a = Vec::new();
        let mut buf_b = Vec::new();
        a.serialize_to(&mut buf_a);
        b.serialize_to(&mut buf_b);
        assert_eq!(buf_a, buf_b);
    }
}
