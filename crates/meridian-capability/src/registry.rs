//! Capability registry — published documents and worker bindings.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use crate::document::CapabilityDocument;
use crate::error::{CapabilityError, CapabilityResult};
use crate::schema::FeatureSchema;

/// Thread-safe store of immutable capability documents keyed by
/// `identifier@version`, plus which document each worker declared.
pub struct CapabilityRegistry {
    schema: FeatureSchema,
    documents: RwLock<HashMap<String, Arc<CapabilityDocument>>>,
    bindings: RwLock<HashMap<String, String>>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new(FeatureSchema::default())
    }
}

impl CapabilityRegistry {
    pub fn new(schema: FeatureSchema) -> Self {
        Self {
            schema,
            documents: RwLock::new(HashMap::new()),
            bindings: RwLock::new(HashMap::new()),
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Publish a new document. An existing `(identifier, version)` is
    /// rejected even when identical.
    pub fn publish(&self, doc: CapabilityDocument) -> CapabilityResult<Arc<CapabilityDocument>> {
        self.schema.validate(&doc)?;
        let key = doc.key();
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        if documents.contains_key(&key) {
            return Err(CapabilityError::ImmutableVersion {
                identifier: doc.identifier,
                version: doc.version,
            });
        }
        let doc = Arc::new(doc);
        documents.insert(key, doc.clone());
        info!(identifier = %doc.identifier, version = %doc.version, features = doc.features.len(), "capability document published");
        Ok(doc)
    }

    /// Publish, or accept an identical re-publish as a no-op.
    ///
    /// Returns `true` when the document was newly stored.
    pub fn publish_or_verify(&self, doc: &CapabilityDocument) -> CapabilityResult<bool> {
        self.schema.validate(doc)?;
        let key = doc.key();
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        match documents.get(&key) {
            Some(existing) if existing.as_ref() == doc => Ok(false),
            Some(_) => Err(CapabilityError::ImmutableVersion {
                identifier: doc.identifier.clone(),
                version: doc.version.clone(),
            }),
            None => {
                documents.insert(key, Arc::new(doc.clone()));
                info!(identifier = %doc.identifier, version = %doc.version, "capability document published");
                Ok(true)
            }
        }
    }

    /// Reload previously persisted documents without validation errors
    /// aborting startup; invalid entries are skipped.
    pub fn restore(&self, docs: impl IntoIterator<Item = CapabilityDocument>) -> usize {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        let mut restored = 0;
        for doc in docs {
            if let Err(e) = self.schema.validate(&doc) {
                debug!(error = %e, "skipping persisted capability document");
                continue;
            }
            documents.insert(doc.key(), Arc::new(doc));
            restored += 1;
        }
        restored
    }

    pub fn get(&self, identifier: &str, version: &str) -> Option<Arc<CapabilityDocument>> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        documents.get(&format!("{identifier}@{version}")).cloned()
    }

    /// All published documents, sorted by key.
    pub fn list(&self) -> Vec<Arc<CapabilityDocument>> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        let mut docs: Vec<_> = documents.values().cloned().collect();
        docs.sort_by_key(|d| d.key());
        docs
    }

    /// Bind a worker to a published document.
    pub fn bind(&self, worker_id: &str, identifier: &str, version: &str) -> CapabilityResult<()> {
        if self.get(identifier, version).is_none() {
            return Err(CapabilityError::NotFound {
                identifier: identifier.to_string(),
                version: version.to_string(),
            });
        }
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        bindings.insert(worker_id.to_string(), format!("{identifier}@{version}"));
        Ok(())
    }

    /// Drop a worker's binding. Returns whether one existed.
    pub fn unbind(&self, worker_id: &str) -> bool {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        bindings.remove(worker_id).is_some()
    }

    /// The document a worker is bound to, if any.
    pub fn document_for(&self, worker_id: &str) -> Option<Arc<CapabilityDocument>> {
        let key = {
            let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
            bindings.get(worker_id)?.clone()
        };
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        documents.get(&key).cloned()
    }
}
