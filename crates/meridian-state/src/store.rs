//! StateStore — typed persistence for the Meridian coordinator.
//!
//! Provides typed CRUD operations over workers, resources, and capability
//! documents. All values are JSON-serialized before they reach the
//! [`KvBackend`]. The store supports both on-disk and in-memory redb
//! backends (the latter for testing), or any injected backend.

use std::path::Path;
use std::sync::Arc;

use meridian_capability::CapabilityDocument;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::backend::{KvBackend, RedbBackend};
use crate::error::{StateError, StateResult};
use crate::tables::Table;
use crate::types::*;

/// Thread-safe state store over a pluggable backend.
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn KvBackend>,
}

impl StateStore {
    /// Open (or create) a persistent redb-backed store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let backend = RedbBackend::open(path)?;
        debug!(?path, "state store opened");
        Ok(Self::with_backend(Arc::new(backend)))
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = RedbBackend::in_memory()?;
        debug!("in-memory state store opened");
        Ok(Self::with_backend(Arc::new(backend)))
    }

    /// Wrap an arbitrary backend.
    pub fn with_backend(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    fn get_json<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        match self.backend.get(table, key)? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| StateError::corrupt(table.name(), key, e))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| StateError::encode(table.name(), key, e))?;
        self.backend.put(table, key, &bytes)
    }

    fn list_json<T: DeserializeOwned>(&self, table: Table) -> StateResult<Vec<T>> {
        self.backend
            .list(table)?
            .into_iter()
            .map(|(key, bytes)| {
                serde_json::from_slice(&bytes).map_err(|e| StateError::corrupt(table.name(), &key, e))
            })
            .collect()
    }

    // ── Workers ────────────────────────────────────────────────────

    /// Insert or update a worker record.
    pub fn put_worker(&self, worker: &WorkerRecord) -> StateResult<()> {
        self.put_json(Table::Workers, worker.table_key(), worker)?;
        debug!(worker_id = %worker.worker_id, status = ?worker.status, "worker stored");
        Ok(())
    }

    pub fn get_worker(&self, worker_id: &str) -> StateResult<Option<WorkerRecord>> {
        self.get_json(Table::Workers, worker_id)
    }

    pub fn list_workers(&self) -> StateResult<Vec<WorkerRecord>> {
        self.list_json(Table::Workers)
    }

    /// Delete a worker record. Returns true if it existed.
    pub fn delete_worker(&self, worker_id: &str) -> StateResult<bool> {
        let existed = self.backend.delete(Table::Workers, worker_id)?;
        debug!(%worker_id, existed, "worker deleted");
        Ok(existed)
    }

    // ── Resources ──────────────────────────────────────────────────

    /// Insert a resource only if no resource with that name exists.
    ///
    /// Returns `false` (and writes nothing) when the name is taken.
    pub fn insert_resource(&self, resource: &ResourceRecord) -> StateResult<bool> {
        let bytes = serde_json::to_vec(resource)
            .map_err(|e| StateError::encode(Table::Resources.name(), &resource.name, e))?;
        let inserted = self
            .backend
            .put_if_absent(Table::Resources, resource.table_key(), &bytes)?;
        debug!(name = %resource.name, inserted, "resource insert");
        Ok(inserted)
    }

    /// Overwrite an existing resource record.
    pub fn put_resource(&self, resource: &ResourceRecord) -> StateResult<()> {
        self.put_json(Table::Resources, resource.table_key(), resource)?;
        debug!(name = %resource.name, version = resource.version, "resource stored");
        Ok(())
    }

    pub fn get_resource(&self, name: &str) -> StateResult<Option<ResourceRecord>> {
        self.get_json(Table::Resources, name)
    }

    pub fn list_resources(&self) -> StateResult<Vec<ResourceRecord>> {
        self.list_json(Table::Resources)
    }

    /// All resources hashing into one of the given partitions.
    pub fn list_resources_in(&self, partitions: &[PartitionId]) -> StateResult<Vec<ResourceRecord>> {
        Ok(self
            .list_resources()?
            .into_iter()
            .filter(|r| partitions.contains(&r.partition_id))
            .collect())
    }

    /// Delete a resource by name. Returns true if it existed.
    pub fn delete_resource(&self, name: &str) -> StateResult<bool> {
        let existed = self.backend.delete(Table::Resources, name)?;
        debug!(%name, existed, "resource deleted");
        Ok(existed)
    }

    // ── Capabilities ───────────────────────────────────────────────

    pub fn put_capability(&self, doc: &CapabilityDocument) -> StateResult<()> {
        self.put_json(Table::Capabilities, &doc.key(), doc)
    }

    pub fn list_capabilities(&self) -> StateResult<Vec<CapabilityDocument>> {
        self.list_json(Table::Capabilities)
    }
}
