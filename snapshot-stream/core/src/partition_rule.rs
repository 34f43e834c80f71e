use std::hash::Hasher;

/// Routes every key to the index of the reducer that owns it
///
/// Implementations must be pure: the same key always maps to the same index,
/// no matter which mapper asks, so a key's count is never split across reducers.
pub trait PartitionRule: Send + Sync + 'static {
    fn partition(&self, key: &str) -> usize;

    /// Number of reducers the rule routes to
    fn partitions(&self) -> usize;
}

/// Two-way split on the first character: below the pivot goes to reducer 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirstLetterPartition {
    pivot: char,
}

impl FirstLetterPartition {
    pub fn new(pivot: char) -> Self {
        Self { pivot }
    }
}

impl Default for FirstLetterPartition {
    fn default() -> Self {
        Self::new('m')
    }
}

impl PartitionRule for FirstLetterPartition {
    fn partition(&self, key: &str) -> usize {
        match key.chars().next() {
            Some(first) if first >= self.pivot => 1,
            _ => 0,
        }
    }

    fn partitions(&self) -> usize {
        2
    }
}

/// Spreads keys over any number of reducers by FNV hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashPartition {
    partitions: usize,
}

impl HashPartition {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
        }
    }
}

impl PartitionRule for HashPartition {
    fn partition(&self, key: &str) -> usize {
        let mut hasher = fnv::FnvHasher::with_key(0);
        hasher.write(key.as_bytes());
        (hasher.finish() % self.partitions as u64) as usize
    }

    fn partitions(&self) -> usize {
        self.partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_letter_reference_routing() {
        let rule = FirstLetterPartition::default();
        assert_eq!(rule.partition("apple"), 0);
        assert_eq!(rule.partition("lazy"), 0);
        assert_eq!(rule.partition("m"), 1);
        assert_eq!(rule.partition("zebra"), 1);
        assert_eq!(rule.partition(""), 0);
        // Uppercase sorts below lowercase
        assert_eq!(rule.partition("Zebra"), 0);
    }

    #[test]
    fn test_hash_partition_is_stable_and_in_range() {
        let rule = HashPartition::new(3);
        for key in ["apple", "banana", "zebra", "", "the"] {
            let first = rule.partition(key);
            assert!(first < 3);
            assert_eq!(first, HashPartition::new(3).partition(key));
        }
    }

    #[test]
    fn test_hash_partition_never_divides_by_zero() {
        assert_eq!(HashPartition::new(0).partitions(), 1);
        assert_eq!(HashPartition::new(0).partition("apple"), 0);
    }
}
