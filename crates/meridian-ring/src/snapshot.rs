//! Immutable ring views.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{PARTITION_COUNT, PartitionId, PartitionRange, RingError, RingResult};

/// A point-in-time copy of partition ownership.
///
/// Readers hold an `Arc<RingSnapshot>` and never observe a partially
/// applied rebalance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingSnapshot {
    /// Incremented on every membership change.
    pub epoch: u64,
    owners: Vec<Option<String>>,
    /// Reverse index of `owners`. Only `add_member`, `remove_member` and
    /// `set_owner` write it; `validate_coverage` cross-checks the two.
    members: BTreeMap<String, BTreeSet<PartitionId>>,
}

impl Default for RingSnapshot {
    fn default() -> Self {
        Self {
            epoch: 0,
            owners: vec![None; PARTITION_COUNT],
            members: BTreeMap::new(),
        }
    }
}

impl RingSnapshot {
    pub fn owner_of(&self, partition: PartitionId) -> Option<&str> {
        self.owners.get(partition as usize)?.as_deref()
    }

    pub fn is_member(&self, worker_id: &str) -> bool {
        self.members.contains_key(worker_id)
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Partitions owned by a worker, ascending.
    pub fn partitions_of(&self, worker_id: &str) -> Vec<PartitionId> {
        self.members
            .get(worker_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn ranges_of(&self, worker_id: &str) -> Vec<PartitionRange> {
        self.members
            .get(worker_id)
            .map(|set| PartitionRange::compress(set.iter().copied()))
            .unwrap_or_default()
    }

    /// Partition count per member.
    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.members
            .iter()
            .map(|(id, set)| (id.clone(), set.len()))
            .collect()
    }

    /// Number of partitions without an owner.
    pub fn unassigned(&self) -> usize {
        self.owners.iter().filter(|o| o.is_none()).count()
    }

    /// Check the ownership invariants: every partition owned by a member
    /// whenever members exist, no partition claimed twice, owner table
    /// and member sets in agreement.
    pub fn validate_coverage(&self) -> RingResult<()> {
        let mut claimed: Vec<Option<&str>> = vec![None; PARTITION_COUNT];
        for (member, set) in &self.members {
            for &p in set {
                let slot = claimed
                    .get_mut(p as usize)
                    .ok_or(RingError::InvalidPartition(u32::from(p)))?;
                if let Some(first) = slot {
                    return Err(RingError::DoubleOwned {
                        partition: p,
                        first: first.to_string(),
                        second: member.clone(),
                    });
                }
                *slot = Some(member.as_str());
            }
        }

        for (p, owner) in self.owners.iter().enumerate() {
            let partition = p as PartitionId;
            match owner {
                Some(owner) if !self.members.contains_key(owner) => {
                    return Err(RingError::UnknownOwner {
                        partition,
                        owner: owner.clone(),
                    });
                }
                Some(owner) if claimed[p] != Some(owner.as_str()) => {
                    return Err(RingError::DoubleOwned {
                        partition,
                        first: owner.clone(),
                        second: claimed[p].unwrap_or("<none>").to_string(),
                    });
                }
                None if !self.members.is_empty() => {
                    return Err(RingError::CoverageGap {
                        partition,
                        members: self.members.len(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    // Mutation helpers for the ring writer.

    pub(crate) fn add_member(&mut self, worker_id: &str) {
        self.members.entry(worker_id.to_string()).or_default();
    }

    pub(crate) fn remove_member(&mut self, worker_id: &str) -> BTreeSet<PartitionId> {
        self.members.remove(worker_id).unwrap_or_default()
    }

    pub(crate) fn count_of(&self, worker_id: &str) -> usize {
        self.members.get(worker_id).map_or(0, BTreeSet::len)
    }

    pub(crate) fn set_owner(&mut self, partition: PartitionId, owner: Option<&str>) {
        if let Some(Some(prev)) = self.owners.get(partition as usize) {
            if let Some(set) = self.members.get_mut(prev) {
                set.remove(&partition);
            }
        }
        if let Some(owner) = owner {
            if let Some(set) = self.members.get_mut(owner) {
                set.insert(partition);
            }
        }
        if let Some(slot) = self.owners.get_mut(partition as usize) {
            *slot = owner.map(str::to_string);
        }
    }

    /// Member with the most partitions, excluding `except`; ties go to the
    /// lowest id.
    pub(crate) fn most_loaded_except(&self, except: &str) -> Option<(&str, usize)> {
        self.members
            .iter()
            .filter(|(id, _)| id.as_str() != except)
            .map(|(id, set)| (id.as_str(), set.len()))
            .fold(None, |best, (id, n)| match best {
                Some((_, bn)) if bn >= n => best,
                _ => Some((id, n)),
            })
    }

    /// Member with the fewest partitions; ties go to the lowest id.
    pub(crate) fn least_loaded(&self) -> Option<&str> {
        self.members
            .iter()
            .map(|(id, set)| (id.as_str(), set.len()))
            .fold(None, |best: Option<(&str, usize)>, (id, n)| match best {
                Some((_, bn)) if bn <= n => best,
                _ => Some((id, n)),
            })
            .map(|(id, _)| id)
    }

    pub(crate) fn highest_partition_of(&self, worker_id: &str) -> Option<PartitionId> {
        self.members.get(worker_id)?.last().copied()
    }
}
