//! Worker agent — client-side participation in the control plane.
//!
//! The agent registers its worker, heartbeats on the interval the
//! coordinator hands back, applies the `Assign`/`Revoke` commands that
//! ride on heartbeat acknowledgements, and acks them on the next beat.
//! When the coordinator is unreachable it backs off and keeps serving its
//! last-known assignments; it never drops them on its own.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use meridian_capability::{CapabilityDocument, RequirementSet};
use meridian_ring::PartitionRange;
use meridian_state::{ResourceConfig, ResourceHealth, WorkerUsage};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::ControlPlane;
use crate::error::{ClientError, ClientResult};
use crate::proto::*;

// ── Assignment table ───────────────────────────────────────────────

/// The resources this worker currently serves.
#[derive(Debug, Default)]
pub struct AssignmentTable {
    entries: RwLock<BTreeMap<String, Assignment>>,
}

impl AssignmentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an assignment if it is newer than what is held.
    /// Duplicates and stale versions are no-ops.
    pub fn apply(&self, assignment: Assignment) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&assignment.name) {
            Some(current) if current.version >= assignment.version => false,
            _ => {
                debug!(name = %assignment.name, version = assignment.version, "assignment applied");
                entries.insert(assignment.name.clone(), assignment);
                true
            }
        }
    }

    pub fn revoke(&self, name: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let removed = entries.remove(name).is_some();
        if removed {
            debug!(%name, "assignment revoked");
        }
        removed
    }

    pub fn apply_command(&self, action: &CommandAction) -> bool {
        match action {
            CommandAction::Assign(a) => self.apply(a.clone()),
            CommandAction::Revoke { name } => self.revoke(name),
        }
    }

    /// Replace the whole table with the coordinator's view.
    pub fn resync(&self, assignments: Vec<Assignment>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        *entries = assignments
            .into_iter()
            .map(|a| (a.name.clone(), a))
            .collect();
    }

    pub fn get(&self, name: &str) -> Option<Assignment> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All assignments, sorted by name.
    pub fn snapshot(&self) -> Vec<Assignment> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().cloned().collect()
    }
}

// ── Agent ──────────────────────────────────────────────────────────

/// Identity and declared capabilities of this worker.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub worker_id: String,
    /// Address other components reach this worker at.
    pub address: String,
    pub region: String,
    pub version: String,
    pub capabilities: Option<CapabilityDocument>,
    pub metadata: BTreeMap<String, String>,
    /// Upper bound for the retry delay while the coordinator is down.
    pub max_backoff: Duration,
}

impl AgentConfig {
    pub fn new(worker_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            address: address.into(),
            region: String::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: None,
            metadata: BTreeMap::new(),
            max_backoff: Duration::from_secs(30),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_capabilities(mut self, doc: CapabilityDocument) -> Self {
        self.capabilities = Some(doc);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }
}

#[derive(Debug)]
struct Session {
    registered: bool,
    heartbeat_interval: Duration,
    acked_through: u64,
    ring_epoch: u64,
    partition_ranges: Vec<PartitionRange>,
}

/// Keeps one worker registered with the coordinator.
pub struct WorkerAgent<C> {
    config: AgentConfig,
    control: C,
    assignments: Arc<AssignmentTable>,
    session: Mutex<Session>,
    started: Instant,
}

impl<C: ControlPlane> WorkerAgent<C> {
    pub fn new(config: AgentConfig, control: C) -> Self {
        Self {
            config,
            control,
            assignments: Arc::new(AssignmentTable::new()),
            session: Mutex::new(Session {
                registered: false,
                heartbeat_interval: Duration::from_secs(5),
                acked_through: 0,
                ring_epoch: 0,
                partition_ranges: Vec::new(),
            }),
            started: Instant::now(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Shared handle to the local assignment table.
    pub fn assignments(&self) -> Arc<AssignmentTable> {
        Arc::clone(&self.assignments)
    }

    pub fn is_registered(&self) -> bool {
        self.session().registered
    }

    pub fn partition_ranges(&self) -> Vec<PartitionRange> {
        self.session().partition_ranges.clone()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.session().heartbeat_interval
    }

    /// Ring epoch seen at the last registration.
    pub fn ring_epoch(&self) -> u64 {
        self.session().ring_epoch
    }

    fn session(&self) -> std::sync::MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register and replace local assignments with the coordinator's.
    pub async fn register(&self) -> ClientResult<RegisterAck> {
        let ack = self
            .control
            .register(RegisterRequest {
                worker_id: self.config.worker_id.clone(),
                address: self.config.address.clone(),
                region: self.config.region.clone(),
                version: self.config.version.clone(),
                capabilities: self.config.capabilities.clone(),
                metadata: self.config.metadata.clone(),
            })
            .await?;

        self.assignments.resync(ack.initial_assignments.clone());
        {
            let mut session = self.session();
            session.registered = true;
            session.heartbeat_interval = Duration::from_millis(ack.heartbeat_interval_ms.max(1));
            session.acked_through = ack.command_seq;
            session.ring_epoch = ack.ring_epoch;
            session.partition_ranges = ack.partition_ranges.clone();
        }

        info!(
            worker_id = %self.config.worker_id,
            ranges = ack.partition_ranges.len(),
            assignments = ack.initial_assignments.len(),
            epoch = ack.ring_epoch,
            "registered with coordinator"
        );
        Ok(ack)
    }

    /// Send one heartbeat and apply the returned commands.
    /// Returns the number of commands that changed the local table.
    pub async fn heartbeat_once(&self) -> ClientResult<usize> {
        let acked_through = {
            let session = self.session();
            if !session.registered {
                return Err(ClientError::NotRegistered(self.config.worker_id.clone()));
            }
            session.acked_through
        };

        let resource_health: BTreeMap<String, ResourceHealth> = self
            .assignments
            .snapshot()
            .into_iter()
            .map(|a| (a.name, ResourceHealth::Serving))
            .collect();
        let req = HeartbeatRequest {
            usage: WorkerUsage {
                active_resources: resource_health.len() as u32,
                uptime_secs: self.started.elapsed().as_secs(),
                ..Default::default()
            },
            resource_health,
            acked_through,
        };

        let ack = match self.control.heartbeat(&self.config.worker_id, req).await {
            Ok(ack) => ack,
            Err(e) => {
                if e.requires_registration() {
                    self.session().registered = false;
                }
                return Err(e);
            }
        };

        let mut changed = 0;
        let mut through = acked_through;
        for command in ack.commands.iter().filter(|c| c.seq > acked_through) {
            if self.assignments.apply_command(&command.action) {
                changed += 1;
            }
            through = through.max(command.seq);
        }
        {
            let mut session = self.session();
            session.acked_through = through;
            if ack.ring_epoch != session.ring_epoch {
                debug!(
                    worker_id = %self.config.worker_id,
                    from = session.ring_epoch,
                    to = ack.ring_epoch,
                    ranges = ack.partition_ranges.len(),
                    "ring epoch changed"
                );
            }
            session.ring_epoch = ack.ring_epoch;
            session.partition_ranges = ack.partition_ranges;
        }

        debug!(
            worker_id = %self.config.worker_id,
            commands = ack.commands.len(),
            changed,
            acked_through = through,
            "heartbeat acknowledged"
        );
        Ok(changed)
    }

    /// Replace local assignments with the coordinator's full list.
    pub async fn resync(&self) -> ClientResult<usize> {
        let assignments = self.control.list_assignments(&self.config.worker_id).await?;
        let count = assignments.len();
        self.assignments.resync(assignments);
        Ok(count)
    }

    /// Heartbeat until `shutdown` flips, re-registering whenever the
    /// coordinator forgets this worker.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = self.heartbeat_interval();
        info!(worker_id = %self.config.worker_id, "worker agent started");

        loop {
            let delay = match self.tick().await {
                Ok(()) => {
                    backoff = self.heartbeat_interval();
                    backoff
                }
                Err(e) if e.requires_registration() => {
                    warn!(worker_id = %self.config.worker_id, error = %e, "coordinator lost this worker, re-registering");
                    Duration::ZERO
                }
                Err(e) => {
                    backoff = (backoff * 2).min(self.config.max_backoff);
                    warn!(
                        worker_id = %self.config.worker_id,
                        error = %e,
                        retry_in = ?backoff,
                        serving = self.assignments.len(),
                        "coordinator unreachable, serving last-known assignments"
                    );
                    backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!(worker_id = %self.config.worker_id, "worker agent stopped");
    }

    async fn tick(&self) -> ClientResult<()> {
        if !self.is_registered() {
            self.register().await?;
        }
        self.heartbeat_once().await.map(|_| ())
    }

    // ── Resource RPCs ──────────────────────────────────────────────

    pub async fn create_resource(
        &self,
        name: &str,
        requirements: RequirementSet,
        config: ResourceConfig,
        principal: &str,
    ) -> ClientResult<CreateResourceAck> {
        self.control
            .create_resource(CreateResourceRequest {
                name: name.to_string(),
                requesting_worker: self.config.worker_id.clone(),
                requirements,
                config,
                principal: principal.to_string(),
            })
            .await
    }

    pub async fn update_resource(
        &self,
        name: &str,
        config: ResourceConfig,
        requirements: Option<RequirementSet>,
    ) -> ClientResult<UpdateResourceAck> {
        self.control
            .update_resource(name, UpdateResourceRequest { config, requirements })
            .await
    }

    pub async fn delete_resource(&self, name: &str) -> ClientResult<DeleteResourceAck> {
        self.control.delete_resource(name).await
    }

    pub async fn find_capable_workers(&self, req: FindCapableRequest) -> ClientResult<FindCapableResponse> {
        self.control.find_capable_workers(req).await
    }
}
