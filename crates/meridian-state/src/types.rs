//! Domain types for the Meridian state store.
//!
//! These types represent the persisted state of workers and resources.
//! All types are serializable to/from JSON for storage in redb tables.

use std::collections::BTreeMap;

use meridian_capability::{CapabilityDocument, RequirementSet};
use serde::{Deserialize, Serialize};

/// Unique identifier for a worker process.
pub type WorkerId = String;

/// Partition index (mirrors `meridian_ring::PartitionId`).
pub type PartitionId = u16;

// ── Worker ─────────────────────────────────────────────────────────

/// Lifecycle status of a worker as seen by the coordinator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Heartbeating on schedule.
    Healthy,
    /// Missed at least one heartbeat interval; still owns its partitions.
    Degraded,
    /// Reloaded after a coordinator restart and not yet re-registered.
    Stale,
    /// Missed too many heartbeats; partitions reassigned.
    Evicted,
}

impl WorkerStatus {
    /// Whether the worker is a ring member eligible for assignments.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

/// Last resource usage reported by a worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkerUsage {
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_mb: u64,
    #[serde(default)]
    pub active_resources: u32,
    #[serde(default)]
    pub uptime_secs: u64,
}

/// Health of one resource as reported by the worker serving it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceHealth {
    Serving,
    Loading,
    Failing,
}

/// A worker as persisted by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerRecord {
    pub worker_id: WorkerId,
    pub address: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub version: String,
    /// Declared capabilities, if the worker fronts a specific backend.
    #[serde(default)]
    pub capabilities: Option<CapabilityDocument>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub status: WorkerStatus,
    /// Epoch milliseconds of first registration.
    pub registered_at_ms: u64,
    /// Epoch milliseconds of the last accepted heartbeat (or registration).
    pub last_heartbeat_ms: u64,
    /// Epoch milliseconds of the last status transition.
    pub status_changed_ms: u64,
    #[serde(default)]
    pub usage: WorkerUsage,
    #[serde(default)]
    pub resource_health: BTreeMap<String, ResourceHealth>,
}

impl WorkerRecord {
    pub fn table_key(&self) -> &str {
        &self.worker_id
    }
}

// ── Resource ───────────────────────────────────────────────────────

/// Backend selection and policy for a resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Backend implementation identifier, e.g. `"postgres"`.
    #[serde(default)]
    pub backend: String,
    /// Policy metadata (retention, quotas, owners, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Arbitrary backend options, passed through untouched.
    #[serde(default)]
    pub options: serde_json::Value,
}

/// A named resource (namespace) and its placement inputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRecord {
    pub name: String,
    /// `hash_key(name)`; the owner is derived from the ring, never stored.
    pub partition_id: PartitionId,
    /// Starts at 1 and increments on every update.
    pub version: u64,
    #[serde(default)]
    pub requirements: RequirementSet,
    #[serde(default)]
    pub config: ResourceConfig,
    pub requesting_worker: WorkerId,
    /// Pre-validated caller identity.
    #[serde(default)]
    pub principal: String,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl ResourceRecord {
    pub fn table_key(&self) -> &str {
        &self.name
    }
}
