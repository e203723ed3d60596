//! Meridian partition ring.
//!
//! Resource names hash into a fixed space of [`PARTITION_COUNT`]
//! partitions. Each partition is owned by at most one worker; whenever the
//! ring has a member, every partition has an owner. Membership changes
//! move the fewest partitions possible and never shuffle partitions
//! between two workers that were already members.
//!
//! # Components
//!
//! - **`hash`** — `hash_key()`, the stable name → partition mapping
//! - **`range`** — inclusive partition ranges for compact transfer
//! - **`ring`** — the mutable ring (single writer) and rebalance reports
//! - **`snapshot`** — immutable, lock-free views for readers

pub mod error;
pub mod hash;
pub mod range;
pub mod ring;
pub mod snapshot;

pub use error::{RingError, RingResult};
pub use hash::hash_key;
pub use range::PartitionRange;
pub use ring::{PartitionMove, PartitionRing, Rebalance};
pub use snapshot::RingSnapshot;

/// Number of partitions in the ring. Fixed for the lifetime of a cluster.
pub const PARTITION_COUNT: usize = 256;

/// A partition index in `0..PARTITION_COUNT`.
pub type PartitionId = u16;
