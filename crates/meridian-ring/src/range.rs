//! Inclusive partition ranges.

use serde::{Deserialize, Serialize};

use crate::PartitionId;

/// A contiguous, inclusive run of partitions `start..=end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionRange {
    pub start: PartitionId,
    pub end: PartitionId,
}

impl PartitionRange {
    pub fn new(start: PartitionId, end: PartitionId) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, partition: PartitionId) -> bool {
        self.start <= partition && partition <= self.end
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Collapse partitions into the minimal list of ranges.
    ///
    /// Input need not be sorted; duplicates are ignored.
    pub fn compress(partitions: impl IntoIterator<Item = PartitionId>) -> Vec<PartitionRange> {
        let mut sorted: Vec<PartitionId> = partitions.into_iter().collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut ranges: Vec<PartitionRange> = Vec::new();
        for p in sorted {
            match ranges.last_mut() {
                Some(last) if last.end + 1 == p => last.end = p,
                _ => ranges.push(PartitionRange::new(p, p)),
            }
        }
        ranges
    }

    /// Expand ranges back into individual partitions.
    pub fn expand(ranges: &[PartitionRange]) -> impl Iterator<Item = PartitionId> + '_ {
        ranges.iter().flat_map(|r| r.start..=r.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_runs() {
        let ranges = PartitionRange::compress([5, 0, 1, 2, 7, 6, 9, 2]);
        assert_eq!(
            ranges,
            vec![
                PartitionRange::new(0, 2),
                PartitionRange::new(5, 7),
                PartitionRange::new(9, 9),
            ]
        );
        assert_eq!(ranges[1].len(), 3);
        assert!(ranges[1].contains(6));
        assert!(!ranges[1].contains(8));
    }

    #[test]
    fn compress_full_ring() {
        let ranges = PartitionRange::compress(0..256);
        assert_eq!(ranges, vec![PartitionRange::new(0, 255)]);
        assert_eq!(PartitionRange::expand(&ranges).count(), 256);
    }

    #[test]
    fn compress_empty() {
        assert!(PartitionRange::compress(std::iter::empty()).is_empty());
    }
}
