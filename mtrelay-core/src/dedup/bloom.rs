use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Fixed-size bloom filter using double hashing.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
    inserted: u64,
}

impl BloomFilter {
    /// Size the filter for `capacity` items at `fp_rate`.
    pub fn new(capacity: usize, fp_rate: f64) -> Self {
        let n = capacity.max(1) as f64;
        let p = fp_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let num_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().clamp(1.0, 32.0) as u32;
        let words = num_bits.div_ceil(64) as usize;
        Self {
            bits: vec![0; words],
            num_bits,
            num_hashes,
            inserted: 0,
        }
    }

    fn hash_pair(item: &str) -> (u64, u64) {
        let mut first = DefaultHasher::new();
        0u8.hash(&mut first);
        item.hash(&mut first);
        let mut second = DefaultHasher::new();
        1u8.hash(&mut second);
        item.hash(&mut second);
        // An odd step visits distinct positions for every probe.
        (first.finish(), second.finish() | 1)
    }

    fn positions(&self, item: &str) -> impl Iterator<Item = u64> + '_ {
        let (h1, h2) = Self::hash_pair(item);
        (0..u64::from(self.num_hashes))
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits)
    }

    pub fn insert(&mut self, item: &str) {
        let positions: Vec<u64> = self.positions(item).collect();
        for pos in positions {
            self.bits[(pos / 64) as usize] |= 1 << (pos % 64);
        }
        self.inserted += 1;
    }

    pub fn contains(&self, item: &str) -> bool {
        self.positions(item)
            .all(|pos| self.bits[(pos / 64) as usize] & (1 << (pos % 64)) != 0)
    }

    pub fn inserted(&self) -> u64 {
        self.inserted
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }
}

/// Two bloom generations. When the current one reaches its capacity it
/// becomes the previous one and a fresh filter takes its place, so the
/// false positive rate stays within budget under unbounded input.
#[derive(Debug, Clone)]
pub struct RotatingBloom {
    current: BloomFilter,
    previous: Option<BloomFilter>,
    capacity: usize,
    fp_rate: f64,
}

impl RotatingBloom {
    pub fn new(capacity: usize, fp_rate: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            current: BloomFilter::new(capacity, fp_rate),
            previous: None,
            capacity,
            fp_rate,
        }
    }

    pub fn insert(&mut self, item: &str) {
        if self.current.inserted() >= self.capacity as u64 {
            let fresh = BloomFilter::new(self.capacity, self.fp_rate);
            self.previous = Some(std::mem::replace(&mut self.current, fresh));
        }
        self.current.insert(item);
    }

    pub fn contains(&self, item: &str) -> bool {
        self.current.contains(item)
            || self
                .previous
                .as_ref()
                .is_some_and(|previous| previous.contains(item))
    }

    /// Ids inserted across both live generations.
    pub fn len(&self) -> u64 {
        self.current.inserted() + self.previous.as_ref().map_or(0, BloomFilter::inserted)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let mut filter = BloomFilter::new(1000, 0.01);
        for i in 0..1000 {
            filter.insert(&format!("event-{i}"));
        }
        for i in 0..1000 {
            assert!(filter.contains(&format!("event-{i}")));
        }
    }

    #[test]
    fn test_false_positive_rate_within_budget() {
        let mut filter = BloomFilter::new(10_000, 0.01);
        for i in 0..10_000 {
            filter.insert(&format!("in-{i}"));
        }
        let false_positives = (0..10_000)
            .filter(|i| filter.contains(&format!("out-{i}")))
            .count();
        // 1% target, generous slack for hash variance.
        assert!(false_positives < 300, "fp count {false_positives}");
    }

    #[test]
    fn test_rotation_keeps_previous_generation() {
        let mut bloom = RotatingBloom::new(10, 0.01);
        for i in 0..10 {
            bloom.insert(&format!("a-{i}"));
        }
        // Rotates on the 11th insert.
        bloom.insert("b-0");
        assert!(bloom.contains("a-3"));
        assert!(bloom.contains("b-0"));
        assert_eq!(bloom.len(), 11);

        for i in 1..11 {
            bloom.insert(&format!("b-{i}"));
        }
        // The "a" generation has been discarded.
        assert!(bloom.contains("b-10"));
        assert_eq!(bloom.len(), 11);
    }
}
