//! The control-plane coordinator.
//!
//! Owns the worker registry, the partition ring, the capability registry
//! and the per-worker command outbox, and implements every RPC the HTTP
//! server exposes.
//!
//! Locking: membership changes take the topology lock for writing, one
//! worker at a time; every other operation reads it while deciding.
//! Resource mutations additionally serialize on one of 256 partition
//! stripes. Nothing is awaited while a lock is held.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use meridian_capability::{
    CapabilityDocument, CapabilityRegistry, FeatureSchema, RequirementSet, matches, rank,
};
use meridian_ring::{PARTITION_COUNT, PartitionId, PartitionRange, PartitionRing, Rebalance, hash_key};
use meridian_state::{ResourceRecord, StateStore, WorkerRecord, WorkerStatus};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::epoch_ms;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::events::{ClusterEvent, EventSink, TracingEventSink};
use crate::outbox::Outbox;
use crate::proto::*;
use crate::registry::WorkerRegistry;

const MAX_NAME_LEN: usize = 255;

/// Outcome of one liveness sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub degraded: Vec<String>,
    pub evicted: Vec<String>,
    pub removed: Vec<String>,
    /// Partitions that changed owner because of evictions.
    pub reassigned_partitions: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.degraded.is_empty() && self.evicted.is_empty() && self.removed.is_empty()
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
    state: StateStore,
    workers: WorkerRegistry,
    ring: PartitionRing,
    capabilities: CapabilityRegistry,
    outbox: Outbox,
    events: Arc<dyn EventSink>,
    topology: RwLock<()>,
    partition_locks: Vec<Mutex<()>>,
    no_capabilities: CapabilityDocument,
}

impl Coordinator {
    /// Build a coordinator over `state`, restoring published capability
    /// documents and reloading known workers as stale.
    pub fn new(state: StateStore, config: CoordinatorConfig) -> CoordinatorResult<Self> {
        Self::with_schema(state, config, FeatureSchema::default())
    }

    /// Like [`Coordinator::new`] with a custom feature schema.
    pub fn with_schema(
        state: StateStore,
        config: CoordinatorConfig,
        schema: FeatureSchema,
    ) -> CoordinatorResult<Self> {
        let capabilities = CapabilityRegistry::new(schema);
        let restored = capabilities.restore(state.list_capabilities()?);

        let workers = WorkerRegistry::new(state.clone());
        let stale = workers.load_stale(epoch_ms())?;

        info!(
            heartbeat_interval_ms = config.heartbeat_interval_ms(),
            eviction_timeout_ms = config.eviction_timeout_ms(),
            capability_documents = restored,
            stale_workers = stale,
            "coordinator initialized"
        );

        Ok(Self {
            config,
            state,
            workers,
            ring: PartitionRing::new(),
            capabilities,
            outbox: Outbox::new(),
            events: Arc::new(TracingEventSink),
            topology: RwLock::new(()),
            partition_locks: (0..PARTITION_COUNT).map(|_| Mutex::new(())).collect(),
            no_capabilities: CapabilityDocument::new("", ""),
        })
    }

    /// Replace the default tracing event sink.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn ring(&self) -> &PartitionRing {
        &self.ring
    }

    pub fn workers(&self) -> &WorkerRegistry {
        &self.workers
    }

    // ── Worker lifecycle ───────────────────────────────────────────

    /// Register (or re-register) a worker.
    ///
    /// A live worker re-registering keeps its partitions and receives its
    /// current assignment. Anyone else joins the ring; resources in the
    /// partitions it takes over are revoked at their previous owners.
    pub fn register(&self, req: RegisterRequest) -> CoordinatorResult<RegisterAck> {
        validate_worker_id(&req.worker_id)?;
        if let Some(doc) = &req.capabilities {
            let created = self
                .capabilities
                .publish_or_verify(doc)
                .map_err(|e| CoordinatorError::from_capability(&req.worker_id, e))?;
            if created {
                self.state.put_capability(doc)?;
            }
        }

        let now = epoch_ms();
        let _topology = self.topology.write().unwrap_or_else(PoisonError::into_inner);

        let previous = self.workers.get(&req.worker_id).filter(|w| w.status.is_live());
        let rejoined = previous.is_some();
        let worker_id = req.worker_id.clone();

        let record = WorkerRecord {
            worker_id: req.worker_id,
            address: req.address,
            region: req.region,
            version: req.version,
            capabilities: req.capabilities,
            metadata: req.metadata,
            status: WorkerStatus::Healthy,
            registered_at_ms: previous.as_ref().map_or(now, |w| w.registered_at_ms),
            last_heartbeat_ms: now,
            status_changed_ms: match &previous {
                Some(w) if w.status == WorkerStatus::Healthy => w.status_changed_ms,
                _ => now,
            },
            usage: previous.as_ref().map(|w| w.usage.clone()).unwrap_or_default(),
            resource_health: previous.map(|w| w.resource_health).unwrap_or_default(),
        };
        let address = record.address.clone();
        match &record.capabilities {
            Some(doc) => self
                .capabilities
                .bind(&worker_id, &doc.identifier, &doc.version)
                .map_err(|e| CoordinatorError::from_capability(&worker_id, e))?,
            None => {
                self.capabilities.unbind(&worker_id);
            }
        }
        self.workers.upsert(record)?;

        if !rejoined {
            let rebalance = self.ring.join(&worker_id);
            self.emit_moves(&rebalance);
            self.queue_revocations(&rebalance)?;
        }

        let snapshot = self.ring.snapshot();
        let partitions = snapshot.partitions_of(&worker_id);
        let mut initial_assignments = Vec::new();
        for resource in self.state.list_resources_in(&partitions)? {
            if self.gate(&resource, &worker_id, true) {
                initial_assignments.push(Assignment::from(&resource));
            }
        }
        let command_seq = self.outbox.reset(&worker_id);

        self.events.emit(ClusterEvent::WorkerRegistered {
            worker_id: worker_id.clone(),
            address,
            partitions: partitions.len(),
            rejoined,
        });

        Ok(RegisterAck {
            accepted: true,
            partition_ranges: snapshot.ranges_of(&worker_id),
            worker_id,
            initial_assignments,
            heartbeat_interval_ms: self.config.heartbeat_interval_ms(),
            ring_epoch: snapshot.epoch,
            command_seq,
        })
    }

    pub fn heartbeat(&self, worker_id: &str, req: HeartbeatRequest) -> CoordinatorResult<HeartbeatAck> {
        self.heartbeat_at(worker_id, req, epoch_ms())
    }

    /// Heartbeat with an explicit clock.
    pub fn heartbeat_at(
        &self,
        worker_id: &str,
        req: HeartbeatRequest,
        now_ms: u64,
    ) -> CoordinatorResult<HeartbeatAck> {
        let _topology = self.topology.read().unwrap_or_else(PoisonError::into_inner);
        let previous = self
            .workers
            .record_heartbeat(worker_id, now_ms, req.usage, req.resource_health)?
            .ok_or_else(|| CoordinatorError::UnknownWorker {
                worker_id: worker_id.to_string(),
            })?;
        if previous == WorkerStatus::Degraded {
            info!(%worker_id, "worker recovered");
        }

        self.outbox.ack(worker_id, req.acked_through);
        let snapshot = self.ring.snapshot();
        Ok(HeartbeatAck {
            server_time_ms: now_ms,
            ttl_ms: self.config.eviction_timeout_ms(),
            commands: self.outbox.pending(worker_id),
            ring_epoch: snapshot.epoch,
            partition_ranges: snapshot.ranges_of(worker_id),
        })
    }

    /// Full current assignment list for a live worker.
    pub fn list_assignments(&self, worker_id: &str) -> CoordinatorResult<Vec<Assignment>> {
        let _topology = self.topology.read().unwrap_or_else(PoisonError::into_inner);
        self.live_worker(worker_id)?;
        let partitions = self.ring.snapshot().partitions_of(worker_id);
        Ok(self
            .state
            .list_resources_in(&partitions)?
            .iter()
            .filter(|r| self.gate(r, worker_id, false))
            .map(Assignment::from)
            .collect())
    }

    pub fn list_workers(&self) -> Vec<WorkerView> {
        let snapshot = self.ring.snapshot();
        self.workers
            .list()
            .into_iter()
            .map(|record| WorkerView {
                partition_count: snapshot.partitions_of(&record.worker_id).len(),
                pending_commands: self.outbox.pending_count(&record.worker_id),
                record,
            })
            .collect()
    }

    pub fn partition_table(&self) -> PartitionTable {
        let snapshot = self.ring.snapshot();
        let members = snapshot
            .members()
            .map(|m| (m.to_string(), snapshot.ranges_of(m)))
            .collect();
        let unassigned = PartitionRange::compress(
            (0..PARTITION_COUNT as PartitionId).filter(|p| snapshot.owner_of(*p).is_none()),
        );
        PartitionTable {
            epoch: snapshot.epoch,
            members,
            unassigned,
        }
    }

    // ── Resources ──────────────────────────────────────────────────

    pub fn create_resource(&self, req: CreateResourceRequest) -> CoordinatorResult<CreateResourceAck> {
        validate_resource_name(&req.name)?;
        self.capabilities
            .schema()
            .validate_requirements(&req.requirements)
            .map_err(|e| CoordinatorError::from_capability(&req.name, e))?;

        let partition = hash_key(&req.name);
        let _topology = self.topology.read().unwrap_or_else(PoisonError::into_inner);
        let _stripe = self.partition_lock(partition);

        if self.state.get_resource(&req.name)?.is_some() {
            return Err(CoordinatorError::AlreadyExists { name: req.name });
        }

        let owner = self.ring.owner_of(partition);
        if let Some(owner) = &owner {
            self.require_capable(&req.name, &req.requirements, owner)?;
        }

        let now = epoch_ms();
        let record = ResourceRecord {
            name: req.name,
            partition_id: partition,
            version: 1,
            requirements: req.requirements,
            config: req.config,
            requesting_worker: req.requesting_worker,
            principal: req.principal,
            created_at_ms: now,
            updated_at_ms: now,
        };
        if !self.state.insert_resource(&record)? {
            return Err(CoordinatorError::AlreadyExists { name: record.name });
        }

        let pending = owner.is_none();
        match &owner {
            Some(owner) => self.push_assign(owner, &record),
            None => info!(
                name = %record.name,
                partition,
                "resource stored without an owner; waiting for a worker"
            ),
        }

        Ok(CreateResourceAck {
            accepted: true,
            name: record.name,
            assigned_partition: partition,
            assigned_worker: owner,
            version: record.version,
            pending,
            retry_after_ms: pending.then(|| self.pending_retry_after_ms()),
        })
    }

    pub fn update_resource(
        &self,
        name: &str,
        req: UpdateResourceRequest,
    ) -> CoordinatorResult<UpdateResourceAck> {
        if let Some(requirements) = &req.requirements {
            self.capabilities
                .schema()
                .validate_requirements(requirements)
                .map_err(|e| CoordinatorError::from_capability(name, e))?;
        }

        let partition = hash_key(name);
        let _topology = self.topology.read().unwrap_or_else(PoisonError::into_inner);
        let _stripe = self.partition_lock(partition);

        let mut record = self
            .state
            .get_resource(name)?
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: name.to_string(),
            })?;
        let Some(owner) = self.ring.owner_of(record.partition_id) else {
            return Err(CoordinatorError::RingExhausted {
                resource: name.to_string(),
                partition: record.partition_id,
                retry_after_ms: self.pending_retry_after_ms(),
            });
        };

        let requirements = req.requirements.unwrap_or_else(|| record.requirements.clone());
        self.require_capable(name, &requirements, &owner)?;

        record.requirements = requirements;
        record.config = req.config;
        record.version += 1;
        record.updated_at_ms = epoch_ms();
        self.state.put_resource(&record)?;
        self.push_assign(&owner, &record);

        Ok(UpdateResourceAck {
            name: record.name,
            version: record.version,
            assigned_worker: Some(owner),
        })
    }

    /// Delete a resource. Deleting a missing resource succeeds with
    /// `deleted = false`.
    pub fn delete_resource(&self, name: &str) -> CoordinatorResult<DeleteResourceAck> {
        let partition = hash_key(name);
        let _topology = self.topology.read().unwrap_or_else(PoisonError::into_inner);
        let _stripe = self.partition_lock(partition);

        let deleted = self.state.delete_resource(name)?;
        if deleted {
            if let Some(owner) = self.ring.owner_of(partition) {
                self.push_revoke(&owner, name);
            }
        }
        Ok(DeleteResourceAck {
            name: name.to_string(),
            deleted,
        })
    }

    pub fn get_resource(&self, name: &str) -> CoordinatorResult<ResourceView> {
        let record = self
            .state
            .get_resource(name)?
            .ok_or_else(|| CoordinatorError::NotFound {
                entity: name.to_string(),
            })?;
        Ok(ResourceView {
            owner: self.ring.owner_of(record.partition_id),
            record,
        })
    }

    // ── Capabilities ───────────────────────────────────────────────

    /// Rank live workers against a requirement set.
    pub fn find_capable_workers(&self, req: FindCapableRequest) -> CoordinatorResult<FindCapableResponse> {
        self.capabilities
            .schema()
            .validate_requirements(&req.requirements)
            .map_err(|e| CoordinatorError::from_capability("requirements", e))?;

        let candidates: Vec<(String, Option<Arc<CapabilityDocument>>)> = self
            .workers
            .ready_ids()
            .into_iter()
            .map(|id| {
                let doc = self.capabilities.document_for(&id);
                (id, doc)
            })
            .collect();

        let strategy = req.ranking.unwrap_or(req.requirements.ranking);
        let matches = rank(
            candidates.iter().map(|(id, doc)| {
                (
                    id.as_str(),
                    doc.as_deref().unwrap_or(&self.no_capabilities),
                )
            }),
            &req.requirements,
            strategy,
            req.include_near_miss,
        );
        debug!(candidates = candidates.len(), matched = matches.len(), ?strategy, "capability match");
        Ok(FindCapableResponse { matches })
    }

    /// Publish a capability document independently of any worker.
    pub fn publish_capability(&self, doc: CapabilityDocument) -> CoordinatorResult<PublishCapabilityAck> {
        let key = doc.key();
        let published = self
            .capabilities
            .publish(doc)
            .map_err(|e| CoordinatorError::from_capability(&key, e))?;
        self.state.put_capability(&published)?;
        Ok(PublishCapabilityAck {
            identifier: published.identifier.clone(),
            version: published.version.clone(),
        })
    }

    pub fn list_capabilities(&self) -> Vec<CapabilityDocument> {
        self.capabilities
            .list()
            .into_iter()
            .map(|d| d.as_ref().clone())
            .collect()
    }

    // ── Liveness sweep ─────────────────────────────────────────────

    /// Degrade, evict and purge workers based on heartbeat silence at
    /// `now_ms`. Yields between evictions.
    pub async fn sweep_at(&self, now_ms: u64) -> CoordinatorResult<SweepReport> {
        let interval = self.config.heartbeat_interval_ms();
        let timeout = self.config.eviction_timeout_ms();
        let retention = self.config.retention.as_millis() as u64;
        let mut report = SweepReport::default();
        let mut to_degrade = Vec::new();
        let mut to_evict = Vec::new();
        let mut to_purge = Vec::new();

        for worker in self.workers.list() {
            let silent_ms = now_ms.saturating_sub(worker.last_heartbeat_ms);
            match worker.status {
                WorkerStatus::Healthy | WorkerStatus::Degraded if silent_ms > timeout => {
                    to_evict.push(worker.worker_id);
                }
                WorkerStatus::Healthy if silent_ms > interval => to_degrade.push(worker.worker_id),
                WorkerStatus::Evicted | WorkerStatus::Stale
                    if now_ms.saturating_sub(worker.status_changed_ms) > retention =>
                {
                    to_purge.push(worker.worker_id);
                }
                _ => {}
            }
        }

        // Each transition re-checks the record under the topology lock; the
        // listing above may be stale by the time it is applied.
        for worker_id in to_degrade {
            if self.degrade_worker(&worker_id, now_ms)? {
                report.degraded.push(worker_id);
            }
        }

        for worker_id in to_evict {
            if let Some(released) = self.evict_worker(&worker_id, now_ms)? {
                report.reassigned_partitions += released;
                report.evicted.push(worker_id);
            }
            tokio::task::yield_now().await;
        }

        for worker_id in to_purge {
            if self.purge_worker(&worker_id, now_ms)? {
                report.removed.push(worker_id);
            }
        }

        Ok(report)
    }

    /// Run the sweep every heartbeat interval until `shutdown` flips.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.heartbeat_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_ms = period.as_millis() as u64, "liveness sweeper started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep_at(epoch_ms()).await {
                        Ok(report) if !report.is_empty() => {
                            info!(
                                degraded = report.degraded.len(),
                                evicted = report.evicted.len(),
                                removed = report.removed.len(),
                                reassigned = report.reassigned_partitions,
                                "liveness sweep"
                            );
                        }
                        Err(e) => warn!(error = %e, "liveness sweep failed"),
                        _ => {}
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("liveness sweeper stopped");
    }

    /// Evict one worker and redistribute its partitions. Returns the
    /// number of partitions released, or `None` if the worker heartbeated
    /// (or vanished) since the sweep looked at it.
    fn evict_worker(&self, worker_id: &str, now_ms: u64) -> CoordinatorResult<Option<usize>> {
        let _topology = self.topology.write().unwrap_or_else(PoisonError::into_inner);
        let Some(worker) = self.workers.get(worker_id) else {
            return Ok(None);
        };
        if !worker.status.is_live()
            || now_ms.saturating_sub(worker.last_heartbeat_ms) <= self.config.eviction_timeout_ms()
        {
            return Ok(None);
        }

        self.workers.mark(worker_id, WorkerStatus::Evicted, now_ms)?;
        self.capabilities.unbind(worker_id);
        let dropped = self.outbox.drop_worker(worker_id);
        let rebalance = self.ring.leave(worker_id);
        let released = rebalance.moves.len();

        self.events.emit(ClusterEvent::WorkerEvicted {
            worker_id: worker_id.to_string(),
            partitions_released: released,
        });
        self.emit_moves(&rebalance);
        self.queue_reassignments(&rebalance)?;

        debug!(%worker_id, dropped_commands = dropped, epoch = rebalance.epoch, "worker evicted");
        Ok(Some(released))
    }

    /// Mark a healthy worker degraded if it is still silent at `now_ms`.
    fn degrade_worker(&self, worker_id: &str, now_ms: u64) -> CoordinatorResult<bool> {
        let _topology = self.topology.write().unwrap_or_else(PoisonError::into_inner);
        let Some(worker) = self.workers.get(worker_id) else {
            return Ok(false);
        };
        let silent_ms = now_ms.saturating_sub(worker.last_heartbeat_ms);
        if worker.status != WorkerStatus::Healthy || silent_ms <= self.config.heartbeat_interval_ms() {
            return Ok(false);
        }
        self.workers.mark(worker_id, WorkerStatus::Degraded, now_ms)?;
        self.events.emit(ClusterEvent::WorkerDegraded {
            worker_id: worker_id.to_string(),
            silent_ms,
        });
        Ok(true)
    }

    /// Forget an evicted or stale worker whose retention has lapsed. A
    /// worker that re-registered in the meantime is left alone.
    fn purge_worker(&self, worker_id: &str, now_ms: u64) -> CoordinatorResult<bool> {
        let _topology = self.topology.write().unwrap_or_else(PoisonError::into_inner);
        let Some(worker) = self.workers.get(worker_id) else {
            return Ok(false);
        };
        let retention = self.config.retention.as_millis() as u64;
        if worker.status.is_live()
            || self.ring.snapshot().is_member(worker_id)
            || now_ms.saturating_sub(worker.status_changed_ms) <= retention
        {
            return Ok(false);
        }
        self.workers.purge(worker_id)?;
        self.outbox.drop_worker(worker_id);
        self.events.emit(ClusterEvent::WorkerRemoved {
            worker_id: worker_id.to_string(),
        });
        Ok(true)
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn live_worker(&self, worker_id: &str) -> CoordinatorResult<WorkerRecord> {
        self.workers
            .get(worker_id)
            .filter(|w| w.status.is_live())
            .ok_or_else(|| CoordinatorError::UnknownWorker {
                worker_id: worker_id.to_string(),
            })
    }

    fn partition_lock(&self, partition: PartitionId) -> std::sync::MutexGuard<'_, ()> {
        self.partition_locks[usize::from(partition) % PARTITION_COUNT]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_retry_after_ms(&self) -> u64 {
        self.config.pending_retry_after.as_millis() as u64
    }

    /// Missing feature labels of `worker_id` for `requirements`.
    fn missing_for(&self, requirements: &RequirementSet, worker_id: &str) -> Vec<String> {
        if requirements.is_trivial() {
            return Vec::new();
        }
        let doc = self.capabilities.document_for(worker_id);
        matches(doc.as_deref().unwrap_or(&self.no_capabilities), requirements).missing_features
    }

    fn require_capable(
        &self,
        resource: &str,
        requirements: &RequirementSet,
        worker_id: &str,
    ) -> CoordinatorResult<()> {
        let missing_features = self.missing_for(requirements, worker_id);
        if missing_features.is_empty() {
            return Ok(());
        }
        self.events.emit(ClusterEvent::CapabilityMismatch {
            resource: resource.to_string(),
            worker_id: worker_id.to_string(),
            missing_features: missing_features.clone(),
        });
        Err(CoordinatorError::NoCapableWorker {
            resource: resource.to_string(),
            worker: worker_id.to_string(),
            missing_features,
        })
    }

    /// Whether `worker_id` can serve `resource`; reports a mismatch event
    /// when asked to.
    fn gate(&self, resource: &ResourceRecord, worker_id: &str, report: bool) -> bool {
        let missing_features = self.missing_for(&resource.requirements, worker_id);
        if missing_features.is_empty() {
            return true;
        }
        if report {
            self.events.emit(ClusterEvent::CapabilityMismatch {
                resource: resource.name.clone(),
                worker_id: worker_id.to_string(),
                missing_features,
            });
        }
        false
    }

    fn push_assign(&self, worker_id: &str, resource: &ResourceRecord) {
        self.outbox
            .push(worker_id, CommandAction::Assign(Assignment::from(resource)));
        self.events.emit(ClusterEvent::ResourceAssigned {
            name: resource.name.clone(),
            partition: resource.partition_id,
            worker_id: worker_id.to_string(),
            version: resource.version,
        });
    }

    fn push_revoke(&self, worker_id: &str, name: &str) {
        self.outbox.push(
            worker_id,
            CommandAction::Revoke {
                name: name.to_string(),
            },
        );
        self.events.emit(ClusterEvent::ResourceRevoked {
            name: name.to_string(),
            worker_id: worker_id.to_string(),
        });
    }

    fn emit_moves(&self, rebalance: &Rebalance) {
        for m in &rebalance.moves {
            self.events.emit(ClusterEvent::PartitionReassigned {
                partition: m.partition,
                from: m.from.clone(),
                to: m.to.clone(),
            });
        }
    }

    /// After a join: the previous owners stop serving moved resources.
    fn queue_revocations(&self, rebalance: &Rebalance) -> CoordinatorResult<()> {
        for (previous, partitions) in rebalance.by_previous_owner() {
            for resource in self.state.list_resources_in(&partitions)? {
                self.push_revoke(&previous, &resource.name);
            }
        }
        Ok(())
    }

    /// After a leave: the new owners start serving moved resources they
    /// are capable of.
    fn queue_reassignments(&self, rebalance: &Rebalance) -> CoordinatorResult<()> {
        for (owner, partitions) in rebalance.by_new_owner() {
            for resource in self.state.list_resources_in(&partitions)? {
                if self.gate(&resource, &owner, true) {
                    self.push_assign(&owner, &resource);
                }
            }
        }
        Ok(())
    }
}

fn validate_worker_id(worker_id: &str) -> CoordinatorResult<()> {
    if worker_id.trim().is_empty() {
        return Err(CoordinatorError::InvalidName {
            name: worker_id.to_string(),
            reason: "worker id must not be empty".to_string(),
        });
    }
    Ok(())
}

fn validate_resource_name(name: &str) -> CoordinatorResult<()> {
    let reason = if name.is_empty() {
        Some("must not be empty".to_string())
    } else if name.len() > MAX_NAME_LEN {
        Some(format!("longer than {MAX_NAME_LEN} bytes"))
    } else {
        name.chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
            .map(|c| format!("character '{c}' is not allowed"))
    };
    match reason {
        Some(reason) => Err(CoordinatorError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventSink;
    use meridian_capability::Predicate;
    use meridian_state::ResourceConfig;

    const INTERVAL_MS: u64 = 1000;

    fn coordinator() -> (Coordinator, Arc<MemoryEventSink>) {
        coordinator_on(StateStore::open_in_memory().unwrap())
    }

    fn coordinator_on(state: StateStore) -> (Coordinator, Arc<MemoryEventSink>) {
        let sink = Arc::new(MemoryEventSink::new());
        let config = CoordinatorConfig::default()
            .with_heartbeat_interval(Duration::from_millis(INTERVAL_MS))
            .with_retention(Duration::from_secs(60));
        let coordinator = Coordinator::new(state, config)
            .unwrap()
            .with_event_sink(sink.clone());
        (coordinator, sink)
    }

    fn register(c: &Coordinator, id: &str, doc: Option<CapabilityDocument>) -> RegisterAck {
        c.register(RegisterRequest {
            worker_id: id.to_string(),
            address: format!("{id}.internal:8980"),
            region: "eu-west-1a".to_string(),
            version: "0.1.0".to_string(),
            capabilities: doc,
            metadata: Default::default(),
        })
        .unwrap()
    }

    fn create(c: &Coordinator, name: &str, requirements: RequirementSet) -> CoordinatorResult<CreateResourceAck> {
        c.create_resource(CreateResourceRequest {
            name: name.to_string(),
            requesting_worker: "w1".to_string(),
            requirements,
            config: ResourceConfig {
                backend: "postgres".to_string(),
                ..Default::default()
            },
            principal: "alice".to_string(),
        })
    }

    fn postgres(transactions: bool) -> CapabilityDocument {
        CapabilityDocument::new("postgres", if transactions { "16" } else { "16-notx" })
            .with("transactions", transactions)
    }

    fn pending_actions(c: &Coordinator, worker: &str) -> Vec<CommandAction> {
        c.outbox.pending(worker).into_iter().map(|cmd| cmd.action).collect()
    }

    #[test]
    fn first_worker_owns_every_partition() {
        let (c, events) = coordinator();
        let ack = register(&c, "w1", None);
        assert!(ack.accepted);
        assert_eq!(ack.partition_ranges, vec![PartitionRange::new(0, 255)]);
        assert_eq!(ack.heartbeat_interval_ms, INTERVAL_MS);
        assert_eq!(events.named("partition_reassigned").len(), PARTITION_COUNT);
        assert_eq!(c.partition_table().unassigned, Vec::new());
    }

    #[test]
    fn registration_is_idempotent() {
        let (c, events) = coordinator();
        let first = register(&c, "w1", Some(postgres(true)));
        register(&c, "w2", None);
        let epoch = c.ring.snapshot().epoch;

        let again = register(&c, "w1", Some(postgres(true)));
        assert_eq!(again.partition_ranges, c.ring.snapshot().ranges_of("w1"));
        assert_ne!(again.partition_ranges, first.partition_ranges);
        assert_eq!(c.ring.snapshot().epoch, epoch);

        let registered = events.named("worker_registered");
        assert!(matches!(
            registered.last(),
            Some(ClusterEvent::WorkerRegistered { rejoined: true, .. })
        ));
    }

    #[test]
    fn reregistration_returns_same_assignments() {
        let (c, _) = coordinator();
        register(&c, "w1", None);
        register(&c, "w2", None);
        for i in 0..24 {
            create(&c, &format!("tenant-{i}"), RequirementSet::new()).unwrap();
        }

        let names = |ack: &RegisterAck| {
            let mut names: Vec<String> = ack.initial_assignments.iter().map(|a| a.name.clone()).collect();
            names.sort();
            names
        };
        let first = register(&c, "w1", None);
        let second = register(&c, "w1", None);
        assert!(!first.initial_assignments.is_empty());
        assert_eq!(names(&first), names(&second));
        assert_eq!(first.partition_ranges, second.partition_ranges);
        assert_eq!(first.ring_epoch, second.ring_epoch);
        assert_eq!(c.list_assignments("w1").unwrap().len(), first.initial_assignments.len());
    }

    #[test]
    fn unknown_feature_rejected() {
        let (c, _) = coordinator();
        let err = c
            .register(RegisterRequest {
                worker_id: "w1".to_string(),
                address: "a".to_string(),
                region: String::new(),
                version: String::new(),
                capabilities: Some(CapabilityDocument::new("x", "1").with("teleport", true)),
                metadata: Default::default(),
            })
            .unwrap_err();
        assert_eq!(err.code(), "invalid_capability");
        assert!(err.to_string().contains("teleport"));
        assert!(c.workers.get("w1").is_none());
    }

    #[test]
    fn create_assigns_to_owner() {
        let (c, events) = coordinator();
        register(&c, "w1", None);

        let ack = create(&c, "orders", RequirementSet::new()).unwrap();
        assert!(ack.accepted && !ack.pending);
        assert_eq!(ack.assigned_partition, hash_key("orders"));
        assert_eq!(ack.assigned_worker.as_deref(), Some("w1"));
        assert_eq!(ack.version, 1);

        let pending = pending_actions(&c, "w1");
        assert!(matches!(&pending[..], [CommandAction::Assign(a)] if a.name == "orders"));
        assert_eq!(events.named("resource_assigned").len(), 1);

        let err = create(&c, "orders", RequirementSet::new()).unwrap_err();
        assert_eq!(err.code(), "already_exists");
    }

    #[test]
    fn invalid_names_rejected() {
        let (c, _) = coordinator();
        let long = "x".repeat(256);
        for name in ["", "a/b", "white space", long.as_str()] {
            let err = create(&c, name, RequirementSet::new()).unwrap_err();
            assert_eq!(err.code(), "invalid_name", "name {name:?}");
        }
        assert!(create(&c, "tenant-1:orders.v2", RequirementSet::new()).is_ok());
    }

    #[test]
    fn create_without_workers_is_pending() {
        let (c, _) = coordinator();
        let ack = create(&c, "orders", RequirementSet::new()).unwrap();
        assert!(ack.pending);
        assert_eq!(ack.assigned_worker, None);
        assert_eq!(ack.retry_after_ms, Some(2000));

        // The first worker picks it up on registration.
        let reg = register(&c, "w1", None);
        assert_eq!(reg.initial_assignments.len(), 1);
        assert_eq!(reg.initial_assignments[0].name, "orders");
    }

    #[test]
    fn capability_gate_names_missing_features() {
        let (c, events) = coordinator();
        register(&c, "w1", Some(postgres(false)));

        let req = RequirementSet::new().require(Predicate::enabled("transactions"));
        let err = create(&c, "orders", req).unwrap_err();
        match &err {
            CoordinatorError::NoCapableWorker {
                resource,
                worker,
                missing_features,
            } => {
                assert_eq!(resource, "orders");
                assert_eq!(worker, "w1");
                assert_eq!(missing_features, &vec!["transactions".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(c.get_resource("orders").is_err());
        assert_eq!(events.named("capability_mismatch").len(), 1);
    }

    #[test]
    fn worker_without_document_fails_nontrivial_requirements() {
        let (c, _) = coordinator();
        register(&c, "w1", None);
        let req = RequirementSet::new().require(Predicate::at_least("max_rps", 100.0));
        let err = create(&c, "orders", req).unwrap_err();
        assert_eq!(err.code(), "no_capable_worker");
    }

    #[test]
    fn concurrent_creation_has_one_winner() {
        let (c, _) = coordinator();
        register(&c, "w1", None);

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| create(&c, "orders", RequirementSet::new())))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        for r in results.iter().filter_map(|r| r.as_ref().err()) {
            assert_eq!(r.code(), "already_exists");
        }
    }

    #[test]
    fn update_bumps_version_and_repushes() {
        let (c, _) = coordinator();
        register(&c, "w1", Some(postgres(true)));
        create(&c, "orders", RequirementSet::new()).unwrap();

        let ack = c
            .update_resource(
                "orders",
                UpdateResourceRequest {
                    config: ResourceConfig {
                        backend: "postgres".to_string(),
                        options: serde_json::json!({"pool": 16}),
                        ..Default::default()
                    },
                    requirements: Some(
                        RequirementSet::new().require(Predicate::enabled("transactions")),
                    ),
                },
            )
            .unwrap();
        assert_eq!(ack.version, 2);

        let pending = pending_actions(&c, "w1");
        assert!(matches!(&pending[..], [CommandAction::Assign(a)] if a.version == 2));

        let err = c
            .update_resource(
                "missing",
                UpdateResourceRequest {
                    config: ResourceConfig::default(),
                    requirements: None,
                },
            )
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn update_without_owner_is_ring_exhausted() {
        let (c, _) = coordinator();
        create(&c, "orders", RequirementSet::new()).unwrap();
        let err = c
            .update_resource(
                "orders",
                UpdateResourceRequest {
                    config: ResourceConfig::default(),
                    requirements: None,
                },
            )
            .unwrap_err();
        assert_eq!(err.code(), "ring_exhausted");
        assert_eq!(c.get_resource("orders").unwrap().record.version, 1);
    }

    #[test]
    fn delete_is_idempotent_and_revokes() {
        let (c, _) = coordinator();
        register(&c, "w1", None);
        create(&c, "orders", RequirementSet::new()).unwrap();

        assert!(c.delete_resource("orders").unwrap().deleted);
        assert!(!c.delete_resource("orders").unwrap().deleted);

        let pending = pending_actions(&c, "w1");
        assert_eq!(
            pending,
            vec![CommandAction::Revoke {
                name: "orders".to_string()
            }]
        );
    }

    #[test]
    fn join_revokes_moved_resources_at_previous_owner() {
        let (c, _) = coordinator();
        register(&c, "a", None);
        register(&c, "b", None);
        let names: Vec<String> = (0..64).map(|i| format!("res-{i}")).collect();
        for name in &names {
            create(&c, name, RequirementSet::new()).unwrap();
        }
        let owners_before: Vec<_> = names
            .iter()
            .map(|n| c.ring.owner_of(hash_key(n)).unwrap())
            .collect();
        for w in ["a", "b"] {
            let seq = c.outbox.pending(w).last().map_or(0, |cmd| cmd.seq);
            c.heartbeat(w, HeartbeatRequest { acked_through: seq, ..Default::default() })
                .unwrap();
        }

        let ack = register(&c, "c", None);
        let counts = c.ring.snapshot().counts();
        assert_eq!(counts["a"], 85);
        assert_eq!(counts["b"], 85);
        assert_eq!(counts["c"], 86);

        for (name, before) in names.iter().zip(&owners_before) {
            let now = c.ring.owner_of(hash_key(name)).unwrap();
            let revoke = CommandAction::Revoke { name: name.clone() };
            if now == "c" {
                assert!(ack.initial_assignments.iter().any(|a| &a.name == name));
                assert!(pending_actions(&c, before).contains(&revoke));
            } else {
                assert_eq!(&now, before, "{name} moved between existing members");
                assert!(!pending_actions(&c, before).contains(&revoke));
            }
        }
    }

    #[test]
    fn heartbeat_delivers_and_acks_commands() {
        let (c, _) = coordinator();
        let reg = register(&c, "w1", None);
        create(&c, "orders", RequirementSet::new()).unwrap();
        create(&c, "users", RequirementSet::new()).unwrap();

        let ack = c
            .heartbeat("w1", HeartbeatRequest { acked_through: reg.command_seq, ..Default::default() })
            .unwrap();
        assert_eq!(ack.commands.len(), 2);
        assert_eq!(ack.ttl_ms, 3 * INTERVAL_MS);

        // Unacked commands are redelivered.
        let again = c
            .heartbeat("w1", HeartbeatRequest { acked_through: reg.command_seq, ..Default::default() })
            .unwrap();
        assert_eq!(again.commands, ack.commands);

        let through = ack.commands[1].seq;
        let done = c
            .heartbeat("w1", HeartbeatRequest { acked_through: through, ..Default::default() })
            .unwrap();
        assert!(done.commands.is_empty());
    }

    #[tokio::test]
    async fn silent_worker_is_degraded_then_recovers() {
        let (c, events) = coordinator();
        register(&c, "w1", None);
        let t0 = epoch_ms();

        let report = c.sweep_at(t0 + INTERVAL_MS + 1).await.unwrap();
        assert_eq!(report.degraded, vec!["w1".to_string()]);
        assert_eq!(c.workers.get("w1").unwrap().status, WorkerStatus::Degraded);
        assert_eq!(events.named("worker_degraded").len(), 1);

        c.heartbeat_at("w1", HeartbeatRequest::default(), t0 + INTERVAL_MS + 2)
            .unwrap();
        assert_eq!(c.workers.get("w1").unwrap().status, WorkerStatus::Healthy);
        assert_eq!(c.ring.snapshot().partitions_of("w1").len(), PARTITION_COUNT);
    }

    #[tokio::test]
    async fn eviction_reassigns_resources() {
        let (c, events) = coordinator();
        register(&c, "a", None);
        register(&c, "b", None);
        let names: Vec<String> = (0..32).map(|i| format!("ns-{i}")).collect();
        for name in &names {
            create(&c, name, RequirementSet::new()).unwrap();
        }
        let on_a: Vec<_> = names
            .iter()
            .filter(|n| c.ring.owner_of(hash_key(n)).as_deref() == Some("a"))
            .cloned()
            .collect();
        let t0 = epoch_ms();

        // b keeps beating; a goes silent for three intervals.
        c.heartbeat_at("b", HeartbeatRequest::default(), t0 + 3 * INTERVAL_MS)
            .unwrap();
        let report = c.sweep_at(t0 + 3 * INTERVAL_MS + 1).await.unwrap();
        assert_eq!(report.evicted, vec!["a".to_string()]);
        assert_eq!(report.reassigned_partitions, 128);

        let snapshot = c.ring.snapshot();
        assert!(snapshot.validate_coverage().is_ok());
        assert_eq!(snapshot.partitions_of("b").len(), PARTITION_COUNT);

        let assigned: Vec<String> = pending_actions(&c, "b")
            .into_iter()
            .filter_map(|a| match a {
                CommandAction::Assign(a) => Some(a.name),
                CommandAction::Revoke { .. } => None,
            })
            .collect();
        for name in &on_a {
            assert!(assigned.contains(name), "{name} not reassigned to b");
        }
        assert_eq!(events.named("worker_evicted").len(), 1);

        let err = c
            .heartbeat_at("a", HeartbeatRequest::default(), t0 + 3 * INTERVAL_MS + 2)
            .unwrap_err();
        assert_eq!(err.code(), "unknown_worker");
        assert_eq!(c.workers.get("a").unwrap().status, WorkerStatus::Evicted);
        assert_eq!(c.outbox.pending_count("a"), 0);
    }

    #[tokio::test]
    async fn silent_worker_walks_degraded_then_evicted() {
        let (c, events) = coordinator();
        register(&c, "a", None);
        register(&c, "b", None);
        let t0 = epoch_ms();

        let mut seen = Vec::new();
        for tick in 1..=4 {
            let now = t0 + tick * INTERVAL_MS;
            c.heartbeat_at("b", HeartbeatRequest::default(), now).unwrap();
            c.sweep_at(now + 1).await.unwrap();
            seen.push(c.workers.get("a").unwrap().status);
            assert_eq!(c.workers.get("b").unwrap().status, WorkerStatus::Healthy);
        }
        assert_eq!(
            seen,
            vec![
                WorkerStatus::Degraded,
                WorkerStatus::Degraded,
                WorkerStatus::Evicted,
                WorkerStatus::Evicted,
            ]
        );
        assert_eq!(events.named("worker_degraded").len(), 1);
        assert_eq!(events.named("worker_evicted").len(), 1);
        assert_eq!(c.ring.snapshot().partitions_of("b").len(), PARTITION_COUNT);
    }

    #[tokio::test]
    async fn late_transitions_recheck_the_record() {
        let (c, events) = coordinator();
        register(&c, "a", None);
        let t0 = epoch_ms();
        let evicted_at = t0 + 3 * INTERVAL_MS + 1;
        c.sweep_at(evicted_at).await.unwrap();
        assert_eq!(c.workers.get("a").unwrap().status, WorkerStatus::Evicted);

        // The worker comes back before a purge decided on the old record runs.
        register(&c, "a", None);
        assert!(!c.purge_worker("a", evicted_at + 120_000).unwrap());
        assert_eq!(c.workers.get("a").unwrap().status, WorkerStatus::Healthy);
        assert!(c.ring.snapshot().is_member("a"));
        assert!(events.named("worker_removed").is_empty());

        // A heartbeat newer than the degrade decision wins.
        c.heartbeat_at("a", HeartbeatRequest::default(), evicted_at + 500)
            .unwrap();
        assert!(!c.degrade_worker("a", evicted_at + 500 + INTERVAL_MS / 2).unwrap());
        assert_eq!(c.workers.get("a").unwrap().status, WorkerStatus::Healthy);
    }

    #[tokio::test]
    async fn evicted_records_removed_after_retention() {
        let (c, events) = coordinator();
        register(&c, "a", None);
        let t0 = epoch_ms();
        let evicted_at = t0 + 3 * INTERVAL_MS + 1;
        c.sweep_at(evicted_at).await.unwrap();
        assert_eq!(c.partition_table().unassigned, vec![PartitionRange::new(0, 255)]);

        let report = c.sweep_at(evicted_at + 60_000).await.unwrap();
        assert!(report.removed.is_empty());
        let report = c.sweep_at(evicted_at + 60_001).await.unwrap();
        assert_eq!(report.removed, vec!["a".to_string()]);
        assert!(c.workers.get("a").is_none());
        assert_eq!(events.named("worker_removed").len(), 1);
    }

    #[test]
    fn restart_reloads_workers_as_stale() {
        let state = StateStore::open_in_memory().unwrap();
        {
            let (c, _) = coordinator_on(state.clone());
            register(&c, "w1", Some(postgres(true)));
            create(&c, "orders", RequirementSet::new()).unwrap();
        }

        let (c, _) = coordinator_on(state);
        assert_eq!(c.workers.get("w1").unwrap().status, WorkerStatus::Stale);
        assert_eq!(c.list_capabilities().len(), 1);
        assert_eq!(c.partition_table().unassigned.len(), 1);

        let err = c.heartbeat("w1", HeartbeatRequest::default()).unwrap_err();
        assert_eq!(err.code(), "unknown_worker");
        assert_eq!(c.list_assignments("w1").unwrap_err().code(), "unknown_worker");

        let ack = register(&c, "w1", Some(postgres(true)));
        assert_eq!(ack.initial_assignments.len(), 1);
        assert_eq!(c.list_assignments("w1").unwrap().len(), 1);
    }

    #[test]
    fn find_capable_ranks_live_workers() {
        let (c, _) = coordinator();
        register(
            &c,
            "fast",
            Some(postgres(true).with("latency_p50_ms", 1.0)),
        );
        register(
            &c,
            "slow",
            Some(
                CapabilityDocument::new("postgres", "15")
                    .with("transactions", true)
                    .with("latency_p50_ms", 8.0),
            ),
        );
        register(&c, "bare", None);

        let resp = c
            .find_capable_workers(FindCapableRequest {
                requirements: RequirementSet::new().require(Predicate::enabled("transactions")),
                ranking: Some(meridian_capability::RankingStrategy::LowestLatency),
                include_near_miss: true,
            })
            .unwrap();
        let ids: Vec<_> = resp.matches.iter().map(|m| m.worker_id.as_str()).collect();
        assert_eq!(ids, vec!["fast", "slow", "bare"]);
        assert_eq!(resp.matches[2].score, 0.0);
        assert_eq!(resp.matches[2].missing_features, vec!["transactions".to_string()]);
    }

    #[test]
    fn publish_capability_is_immutable() {
        let (c, _) = coordinator();
        let doc = postgres(true);
        let ack = c.publish_capability(doc.clone()).unwrap();
        assert_eq!(ack.identifier, "postgres");

        let err = c.publish_capability(doc.clone()).unwrap_err();
        assert_eq!(err.code(), "immutable_version");

        // Registration with an identical document is still accepted.
        register(&c, "w1", Some(doc));
        let changed = postgres(true).with("max_rps", 5000.0);
        let err = c
            .register(RegisterRequest {
                worker_id: "w2".to_string(),
                address: "w2:1".to_string(),
                region: String::new(),
                version: String::new(),
                capabilities: Some(changed),
                metadata: Default::default(),
            })
            .unwrap_err();
        assert_eq!(err.code(), "immutable_version");
    }
}
