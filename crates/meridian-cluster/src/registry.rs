//! Worker registry — tracks worker records and their lifecycle status.
//!
//! Keeps an in-memory map for fast lookups on the heartbeat path and
//! mirrors every change to the `StateStore`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, info, warn};

use meridian_state::*;

/// Manages worker records.
pub struct WorkerRegistry {
    state: StateStore,
    workers: RwLock<HashMap<WorkerId, WorkerRecord>>,
}

impl WorkerRegistry {
    /// Create an empty registry backed by `state`.
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Reload persisted workers after a restart.
    ///
    /// Every record comes back as `Stale`: it owns nothing until the
    /// worker re-registers. Returns the number of records loaded.
    pub fn load_stale(&self, now_ms: u64) -> StateResult<usize> {
        let persisted = self.state.list_workers()?;
        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
        let mut loaded = 0;
        for mut record in persisted {
            if record.status != WorkerStatus::Stale {
                record.status = WorkerStatus::Stale;
                record.status_changed_ms = now_ms;
                self.state.put_worker(&record)?;
            }
            workers.insert(record.worker_id.clone(), record);
            loaded += 1;
        }
        if loaded > 0 {
            info!(count = loaded, "reloaded persisted workers as stale");
        }
        Ok(loaded)
    }

    /// Insert or replace a worker record.
    pub fn upsert(&self, record: WorkerRecord) -> StateResult<()> {
        self.state.put_worker(&record)?;
        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
        workers.insert(record.worker_id.clone(), record);
        Ok(())
    }

    pub fn get(&self, worker_id: &str) -> Option<WorkerRecord> {
        let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
        workers.get(worker_id).cloned()
    }

    /// All workers, sorted by id.
    pub fn list(&self) -> Vec<WorkerRecord> {
        let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<_> = workers.values().cloned().collect();
        list.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        list
    }

    /// Process a heartbeat from a live worker.
    ///
    /// Returns the status the worker had before this beat, or `None` when
    /// the worker is unknown or no longer live (nothing is updated).
    pub fn record_heartbeat(
        &self,
        worker_id: &str,
        now_ms: u64,
        usage: WorkerUsage,
        resource_health: BTreeMap<String, ResourceHealth>,
    ) -> StateResult<Option<WorkerStatus>> {
        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(record) = workers.get_mut(worker_id) else {
            warn!(%worker_id, "heartbeat from unknown worker");
            return Ok(None);
        };
        if !record.status.is_live() {
            warn!(%worker_id, status = ?record.status, "heartbeat from non-live worker");
            return Ok(None);
        }

        let previous = record.status;
        record.last_heartbeat_ms = now_ms;
        record.usage = usage;
        record.resource_health = resource_health;
        if previous != WorkerStatus::Healthy {
            record.status = WorkerStatus::Healthy;
            record.status_changed_ms = now_ms;
        }
        self.state.put_worker(record)?;
        debug!(%worker_id, "heartbeat received");
        Ok(Some(previous))
    }

    /// Transition a worker to `status`. Returns false if unknown.
    pub fn mark(&self, worker_id: &str, status: WorkerStatus, now_ms: u64) -> StateResult<bool> {
        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(record) = workers.get_mut(worker_id) else {
            return Ok(false);
        };
        if record.status != status {
            record.status = status;
            record.status_changed_ms = now_ms;
            self.state.put_worker(record)?;
            debug!(%worker_id, ?status, "worker status changed");
        }
        Ok(true)
    }

    /// Remove a worker record entirely.
    pub fn purge(&self, worker_id: &str) -> StateResult<bool> {
        let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
        let existed = workers.remove(worker_id).is_some();
        self.state.delete_worker(worker_id)?;
        if existed {
            info!(%worker_id, "worker record removed");
        }
        Ok(existed)
    }

    /// Ids of healthy and degraded workers, sorted.
    pub fn ready_ids(&self) -> Vec<WorkerId> {
        let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = workers
            .values()
            .filter(|w| w.status.is_live())
            .map(|w| w.worker_id.clone())
            .collect();
        ids.sort();
        ids
    }
}
