//! Stable resource name → partition hashing.

use crate::{PARTITION_COUNT, PartitionId, RingError, RingResult};

/// CRC-32 (IEEE) of the UTF-8 name, reduced modulo the partition count.
///
/// Unsalted, so the mapping is identical across processes and restarts.
pub fn hash_key(name: &str) -> PartitionId {
    (crc32fast::hash(name.as_bytes()) % PARTITION_COUNT as u32) as PartitionId
}

/// Validate an externally supplied partition index.
pub fn check_partition(partition: u32) -> RingResult<PartitionId> {
    if (partition as usize) < PARTITION_COUNT {
        Ok(partition as PartitionId)
    } else {
        Err(RingError::InvalidPartition(partition))
    }
}
