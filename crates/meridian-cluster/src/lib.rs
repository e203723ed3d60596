//! meridian-cluster — control plane and worker client for Meridian.
//!
//! A single coordinator assigns named resources to a fleet of stateless
//! workers. Resources hash into fixed partitions, partitions are owned by
//! workers, and a resource may additionally require backend capabilities
//! that its owner must declare.
//!
//! # Architecture
//!
//! ```text
//! Coordinator
//!   ├── HTTP/JSON RPC (axum, /v1)
//!   │   ├── Register() → joins the ring, returns ranges + assignments
//!   │   ├── Heartbeat() → refreshes liveness, returns queued commands
//!   │   └── Create/Update/Delete/FindCapable → resource lifecycle
//!   ├── WorkerRegistry → worker records mirrored to the StateStore
//!   ├── PartitionRing → partition ownership (meridian-ring)
//!   ├── CapabilityRegistry → documents + matcher (meridian-capability)
//!   ├── Outbox → per-worker Assign/Revoke commands
//!   └── Sweeper → healthy → degraded → evicted → removed
//!
//! Worker
//!   └── WorkerAgent
//!       ├── Registers over a ControlPlane (HTTP or in-process)
//!       ├── Heartbeats, applies and acks commands
//!       └── Keeps serving last-known assignments when cut off
//! ```

pub mod agent;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod outbox;
pub mod proto;
pub mod registry;
pub mod server;

pub use agent::{AgentConfig, AssignmentTable, WorkerAgent};
pub use client::{ControlPlane, HttpControlPlane, LocalControlPlane};
pub use config::{CoordinatorConfig, parse_duration};
pub use coordinator::{Coordinator, SweepReport};
pub use error::{ClientError, ClientResult, CoordinatorError, CoordinatorResult};
pub use events::{ClusterEvent, EventSink, MemoryEventSink, TracingEventSink};
pub use registry::WorkerRegistry;
pub use server::build_router;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
