//! The partition ring — single writer, lock-free readers.
//!
//! Joins fill unowned partitions first, then take one partition at a time
//! from the most-loaded member until the newcomer holds its fair share
//! (`ceil(PARTITION_COUNT / members)`). Leaves hand each released
//! partition, in ascending order, to the least-loaded remaining member.
//! Neither direction moves a partition between two workers that were
//! members both before and after the change.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{PARTITION_COUNT, PartitionId, PartitionRange, RingSnapshot};

/// One partition changing hands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMove {
    pub partition: PartitionId,
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Report of a membership change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rebalance {
    /// Ring epoch after the change.
    pub epoch: u64,
    pub moves: Vec<PartitionMove>,
}

impl Rebalance {
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Moved partitions grouped by the worker that lost them.
    pub fn by_previous_owner(&self) -> BTreeMap<String, Vec<PartitionId>> {
        let mut out: BTreeMap<String, Vec<PartitionId>> = BTreeMap::new();
        for m in &self.moves {
            if let Some(from) = &m.from {
                out.entry(from.clone()).or_default().push(m.partition);
            }
        }
        out
    }

    /// Moved partitions grouped by the worker that gained them.
    pub fn by_new_owner(&self) -> BTreeMap<String, Vec<PartitionId>> {
        let mut out: BTreeMap<String, Vec<PartitionId>> = BTreeMap::new();
        for m in &self.moves {
            if let Some(to) = &m.to {
                out.entry(to.clone()).or_default().push(m.partition);
            }
        }
        out
    }
}

/// Partition ownership table.
pub struct PartitionRing {
    writer: Mutex<()>,
    current: ArcSwap<RingSnapshot>,
}

impl Default for PartitionRing {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionRing {
    pub fn new() -> Self {
        Self {
            writer: Mutex::new(()),
            current: ArcSwap::from_pointee(RingSnapshot::default()),
        }
    }

    /// Current immutable view.
    pub fn snapshot(&self) -> Arc<RingSnapshot> {
        self.current.load_full()
    }

    pub fn owner_of(&self, partition: PartitionId) -> Option<String> {
        self.current.load().owner_of(partition).map(str::to_string)
    }

    /// Add a worker and return its ranges. Idempotent for members.
    pub fn assign_ranges(&self, worker_id: &str) -> Vec<PartitionRange> {
        self.join(worker_id);
        self.snapshot().ranges_of(worker_id)
    }

    /// Remove a worker, redistributing its partitions.
    pub fn release_ranges(&self, worker_id: &str) -> Rebalance {
        self.leave(worker_id)
    }

    /// Add a worker, reporting every partition that moved.
    pub fn join(&self, worker_id: &str) -> Rebalance {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.current.load_full();
        if current.is_member(worker_id) {
            return Rebalance {
                epoch: current.epoch,
                moves: Vec::new(),
            };
        }

        let mut next = RingSnapshot::clone(&current);
        next.add_member(worker_id);
        let mut moves = Vec::new();

        for p in 0..PARTITION_COUNT as PartitionId {
            if next.owner_of(p).is_none() {
                next.set_owner(p, Some(worker_id));
                moves.push(PartitionMove {
                    partition: p,
                    from: None,
                    to: Some(worker_id.to_string()),
                });
            }
        }

        let target = PARTITION_COUNT.div_ceil(next.member_count());
        while next.count_of(worker_id) < target {
            let Some((donor, donor_count)) = next.most_loaded_except(worker_id) else {
                break;
            };
            if donor_count <= next.count_of(worker_id) {
                break;
            }
            let donor = donor.to_string();
            let Some(p) = next.highest_partition_of(&donor) else {
                break;
            };
            next.set_owner(p, Some(worker_id));
            moves.push(PartitionMove {
                partition: p,
                from: Some(donor),
                to: Some(worker_id.to_string()),
            });
        }

        next.epoch += 1;
        let epoch = next.epoch;
        let owned = next.count_of(worker_id);
        let members = next.member_count();
        self.current.store(Arc::new(next));

        info!(%worker_id, epoch, owned, members, moved = moves.len(), "worker joined ring");
        Rebalance { epoch, moves }
    }

    /// Remove a worker, reporting every partition that moved.
    pub fn leave(&self, worker_id: &str) -> Rebalance {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.current.load_full();
        if !current.is_member(worker_id) {
            return Rebalance {
                epoch: current.epoch,
                moves: Vec::new(),
            };
        }

        let mut next = RingSnapshot::clone(&current);
        let released = next.remove_member(worker_id);
        let mut moves = Vec::with_capacity(released.len());

        for p in released {
            let to = next.least_loaded().map(str::to_string);
            next.set_owner(p, to.as_deref());
            moves.push(PartitionMove {
                partition: p,
                from: Some(worker_id.to_string()),
                to,
            });
        }

        next.epoch += 1;
        let epoch = next.epoch;
        let members = next.member_count();
        self.current.store(Arc::new(next));

        if members == 0 {
            debug!(%worker_id, epoch, "last worker left ring; all partitions unassigned");
        }
        info!(%worker_id, epoch, members, moved = moves.len(), "worker left ring");
        Rebalance { epoch, moves }
    }
}
