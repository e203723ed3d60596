use thiserror::Error;

use crate::PartitionId;

pub type RingResult<T> = Result<T, RingError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RingError {
    #[error("partition {0} is outside the ring")]
    InvalidPartition(u32),

    #[error("partition {partition} has no owner while the ring has {members} members")]
    CoverageGap { partition: PartitionId, members: usize },

    #[error("partition {partition} is claimed by both {first} and {second}")]
    DoubleOwned {
        partition: PartitionId,
        first: String,
        second: String,
    },

    #[error("partition {partition} is owned by {owner}, which is not a ring member")]
    UnknownOwner { partition: PartitionId, owner: String },
}
