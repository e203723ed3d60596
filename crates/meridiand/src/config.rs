//! `meridian.toml` — daemon configuration.
//!
//! ```toml
//! [coordinator]
//! listen = "0.0.0.0:7700"
//! data_dir = "/var/lib/meridian"
//! heartbeat_interval = "5s"
//! eviction_multiplier = 3
//! retention = "1h"
//! pending_retry_after = "2s"
//!
//! [worker]
//! coordinator = "http://10.0.0.1:7700"
//! id = "proxy-a"
//! address = "10.0.0.7:8980"
//! region = "eu-west-1a"
//!
//! [worker.capabilities]
//! identifier = "postgres"
//! version = "16"
//! features = { transactions = true, max_rps = 20000.0 }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};
use meridian_capability::CapabilityDocument;
use meridian_cluster::{AgentConfig, CoordinatorConfig, parse_duration};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeridianConfig {
    #[serde(default)]
    pub coordinator: CoordinatorSection,
    pub worker: Option<WorkerSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSection {
    pub listen: String,
    pub data_dir: PathBuf,
    pub heartbeat_interval: String,
    pub eviction_multiplier: u32,
    pub retention: String,
    pub pending_retry_after: String,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7700".to_string(),
            data_dir: PathBuf::from("/var/lib/meridian"),
            heartbeat_interval: "5s".to_string(),
            eviction_multiplier: 3,
            retention: "1h".to_string(),
            pending_retry_after: "2s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    /// Coordinator endpoint, `host:port` or `http://host:port`.
    pub coordinator: String,
    /// Defaults to the machine's hostname.
    pub id: Option<String>,
    pub address: String,
    #[serde(default)]
    pub region: String,
    /// Reported process version; defaults to the crate version.
    pub version: Option<String>,
    /// Where to serve `/healthz` and `/assignments` for this worker.
    pub status_listen: Option<String>,
    #[serde(default = "default_max_backoff")]
    pub max_backoff: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
    pub capabilities: Option<CapabilityDocument>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_max_backoff() -> String {
    "30s".to_string()
}

fn default_request_timeout() -> String {
    "5s".to_string()
}

fn duration(field: &str, value: &str) -> anyhow::Result<Duration> {
    parse_duration(value).ok_or_else(|| anyhow!("invalid duration for {field}: '{value}'"))
}

impl MeridianConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: MeridianConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if given, else defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}

impl CoordinatorSection {
    pub fn to_config(&self) -> anyhow::Result<CoordinatorConfig> {
        Ok(CoordinatorConfig::default()
            .with_heartbeat_interval(duration("heartbeat_interval", &self.heartbeat_interval)?)
            .with_eviction_multiplier(self.eviction_multiplier)
            .with_retention(duration("retention", &self.retention)?)
            .with_pending_retry_after(duration("pending_retry_after", &self.pending_retry_after)?))
    }
}

impl WorkerSection {
    pub fn new(coordinator: String, address: String) -> Self {
        Self {
            coordinator,
            id: None,
            address,
            region: String::new(),
            version: None,
            status_listen: None,
            max_backoff: default_max_backoff(),
            request_timeout: default_request_timeout(),
            capabilities: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn worker_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| {
            std::env::var("HOSTNAME").unwrap_or_else(|_| format!("worker-{}", std::process::id()))
        })
    }

    pub fn request_timeout(&self) -> anyhow::Result<Duration> {
        duration("request_timeout", &self.request_timeout)
    }

    pub fn to_agent_config(&self) -> anyhow::Result<AgentConfig> {
        let mut config = AgentConfig::new(self.worker_id(), &self.address)
            .with_region(&self.region)
            .with_max_backoff(duration("max_backoff", &self.max_backoff)?);
        if let Some(version) = &self.version {
            config.version = version.clone();
        }
        if let Some(doc) = &self.capabilities {
            config = config.with_capabilities(doc.clone());
        }
        for (key, value) in &self.metadata {
            config = config.with_metadata(key, value);
        }
        Ok(config)
    }
}
