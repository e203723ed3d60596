//! Wire types shared by the coordinator's HTTP API and its clients.
//!
//! Every response is wrapped in [`ApiResponse`]: `{success, data?, error?}`.

use std::collections::BTreeMap;
use std::fmt;

use meridian_capability::{CapabilityDocument, RankingStrategy, RequirementSet, WorkerMatch};
use meridian_ring::{PartitionId, PartitionRange};
use meridian_state::{ResourceConfig, ResourceHealth, ResourceRecord, WorkerRecord, WorkerUsage};
use serde::{Deserialize, Serialize};

// ── Envelope ───────────────────────────────────────────────────────

/// Response wrapper for consistent API format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: ApiError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Structured error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Stable machine-readable code, e.g. `no_capable_worker`.
    pub code: String,
    pub message: String,
    /// The worker, resource, or document the error is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

// ── Registration ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub worker_id: String,
    pub address: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub capabilities: Option<CapabilityDocument>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A resource a worker should serve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub name: String,
    pub partition_id: PartitionId,
    pub config: ResourceConfig,
    pub version: u64,
}

impl From<&ResourceRecord> for Assignment {
    fn from(r: &ResourceRecord) -> Self {
        Self {
            name: r.name.clone(),
            partition_id: r.partition_id,
            config: r.config.clone(),
            version: r.version,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAck {
    pub accepted: bool,
    pub worker_id: String,
    pub partition_ranges: Vec<PartitionRange>,
    pub initial_assignments: Vec<Assignment>,
    pub heartbeat_interval_ms: u64,
    pub ring_epoch: u64,
    /// Highest command sequence already covered by `initial_assignments`;
    /// the worker acks from here.
    pub command_seq: u64,
}

// ── Heartbeat ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub resource_health: BTreeMap<String, ResourceHealth>,
    #[serde(default)]
    pub usage: WorkerUsage,
    /// Every command with `seq <= acked_through` has been applied.
    #[serde(default)]
    pub acked_through: u64,
}

/// A coordinator → worker instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandAction {
    Assign(Assignment),
    Revoke { name: String },
}

impl CommandAction {
    pub fn resource(&self) -> &str {
        match self {
            Self::Assign(a) => &a.name,
            Self::Revoke { name } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub seq: u64,
    pub action: CommandAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub server_time_ms: u64,
    /// How long the coordinator keeps the worker live without another beat.
    pub ttl_ms: u64,
    #[serde(default)]
    pub commands: Vec<Command>,
    /// Ring epoch at the time of this beat.
    #[serde(default)]
    pub ring_epoch: u64,
    /// Partitions the worker currently owns.
    #[serde(default)]
    pub partition_ranges: Vec<PartitionRange>,
}

// ── Resources ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResourceRequest {
    pub name: String,
    pub requesting_worker: String,
    #[serde(default)]
    pub requirements: RequirementSet,
    #[serde(default)]
    pub config: ResourceConfig,
    #[serde(default)]
    pub principal: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResourceAck {
    pub accepted: bool,
    pub name: String,
    pub assigned_partition: PartitionId,
    #[serde(default)]
    pub assigned_worker: Option<String>,
    pub version: u64,
    /// No worker owns the partition yet; the resource is stored and will
    /// be assigned when one joins.
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResourceRequest {
    #[serde(default)]
    pub config: ResourceConfig,
    /// Replacement requirements; `None` keeps the current ones.
    #[serde(default)]
    pub requirements: Option<RequirementSet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResourceAck {
    pub name: String,
    pub version: u64,
    pub assigned_worker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResourceAck {
    pub name: String,
    pub deleted: bool,
}

/// A resource with its derived owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceView {
    #[serde(flatten)]
    pub record: ResourceRecord,
    pub owner: Option<String>,
}

// ── Discovery & operator views ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindCapableRequest {
    #[serde(default)]
    pub requirements: RequirementSet,
    /// Overrides the requirement set's own ranking.
    #[serde(default)]
    pub ranking: Option<RankingStrategy>,
    #[serde(default)]
    pub include_near_miss: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindCapableResponse {
    pub matches: Vec<WorkerMatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerView {
    #[serde(flatten)]
    pub record: WorkerRecord,
    pub partition_count: usize,
    pub pending_commands: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionTable {
    pub epoch: u64,
    pub members: BTreeMap<String, Vec<PartitionRange>>,
    pub unassigned: Vec<PartitionRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishCapabilityAck {
    pub identifier: String,
    pub version: String,
}
