//! Structured cluster events.
//!
//! The coordinator reports lifecycle changes through an [`EventSink`].
//! Emission is fire-and-forget: a sink must not block or fail the
//! operation that produced the event.

use std::sync::{Mutex, PoisonError};

use meridian_ring::PartitionId;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClusterEvent {
    WorkerRegistered {
        worker_id: String,
        address: String,
        partitions: usize,
        rejoined: bool,
    },
    WorkerDegraded {
        worker_id: String,
        silent_ms: u64,
    },
    WorkerEvicted {
        worker_id: String,
        partitions_released: usize,
    },
    WorkerRemoved {
        worker_id: String,
    },
    PartitionReassigned {
        partition: PartitionId,
        from: Option<String>,
        to: Option<String>,
    },
    ResourceAssigned {
        name: String,
        partition: PartitionId,
        worker_id: String,
        version: u64,
    },
    ResourceRevoked {
        name: String,
        worker_id: String,
    },
    CapabilityMismatch {
        resource: String,
        worker_id: String,
        missing_features: Vec<String>,
    },
}

impl ClusterEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::WorkerRegistered { .. } => "worker_registered",
            Self::WorkerDegraded { .. } => "worker_degraded",
            Self::WorkerEvicted { .. } => "worker_evicted",
            Self::WorkerRemoved { .. } => "worker_removed",
            Self::PartitionReassigned { .. } => "partition_reassigned",
            Self::ResourceAssigned { .. } => "resource_assigned",
            Self::ResourceRevoked { .. } => "resource_revoked",
            Self::CapabilityMismatch { .. } => "capability_mismatch",
        }
    }
}

/// Destination for cluster events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ClusterEvent);
}

/// Default sink: one `tracing` event per cluster event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: ClusterEvent) {
        match &event {
            ClusterEvent::WorkerRegistered {
                worker_id,
                address,
                partitions,
                rejoined,
            } => info!(event = event.name(), %worker_id, %address, partitions, rejoined),
            ClusterEvent::WorkerDegraded {
                worker_id,
                silent_ms,
            } => warn!(event = event.name(), %worker_id, silent_ms),
            ClusterEvent::WorkerEvicted {
                worker_id,
                partitions_released,
            } => warn!(event = event.name(), %worker_id, partitions_released),
            ClusterEvent::WorkerRemoved { worker_id } => info!(event = event.name(), %worker_id),
            ClusterEvent::PartitionReassigned {
                partition,
                from,
                to,
            } => info!(event = event.name(), partition, ?from, ?to),
            ClusterEvent::ResourceAssigned {
                name,
                partition,
                worker_id,
                version,
            } => info!(event = event.name(), %name, partition, %worker_id, version),
            ClusterEvent::ResourceRevoked { name, worker_id } => {
                info!(event = event.name(), %name, %worker_id)
            }
            ClusterEvent::CapabilityMismatch {
                resource,
                worker_id,
                missing_features,
            } => warn!(event = event.name(), %resource, %worker_id, ?missing_features),
        }
    }
}

/// Sink that keeps every event in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<ClusterEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ClusterEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events with the given name, e.g. `"worker_evicted"`.
    pub fn named(&self, name: &str) -> Vec<ClusterEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.name() == name)
            .collect()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: ClusterEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_json_is_tagged() {
        let event = ClusterEvent::ResourceRevoked {
            name: "orders".to_string(),
            worker_id: "w1".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "resource_revoked");
        assert_eq!(json["name"], "orders");
        assert_eq!(event.name(), "resource_revoked");
    }

    #[test]
    fn memory_sink_filters_by_name() {
        let sink = MemoryEventSink::new();
        sink.emit(ClusterEvent::WorkerRemoved {
            worker_id: "a".to_string(),
        });
        sink.emit(ClusterEvent::WorkerDegraded {
            worker_id: "b".to_string(),
            silent_ms: 6000,
        });
        TracingEventSink.emit(ClusterEvent::WorkerRemoved {
            worker_id: "a".to_string(),
        });

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.named("worker_degraded").len(), 1);
    }
}
