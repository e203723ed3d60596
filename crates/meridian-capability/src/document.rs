//! Capability documents.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::schema::{ConsistencyLevel, keys};

/// A single feature value.
///
/// Serialized untagged so documents read naturally in TOML and JSON:
/// `transactions = true`, `max_rps = 5000`, `query_languages = ["sql"]`,
/// `consistency = "strong"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Flag(bool),
    Number(f64),
    Labels(BTreeSet<String>),
    Text(String),
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        Self::Flag(v)
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<ConsistencyLevel> for FeatureValue {
    fn from(v: ConsistencyLevel) -> Self {
        Self::Text(v.as_str().to_string())
    }
}

impl<S: Into<String>> From<Vec<S>> for FeatureValue {
    fn from(v: Vec<S>) -> Self {
        Self::Labels(v.into_iter().map(Into::into).collect())
    }
}

/// What a backend implementation can do, declared by the worker that
/// fronts it. Immutable once published under `(identifier, version)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDocument {
    pub identifier: String,
    pub version: String,
    #[serde(default)]
    pub features: BTreeMap<String, FeatureValue>,
}

impl CapabilityDocument {
    pub fn new(identifier: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            version: version.into(),
            features: BTreeMap::new(),
        }
    }

    /// Builder-style feature setter.
    pub fn with(mut self, feature: &str, value: impl Into<FeatureValue>) -> Self {
        self.features.insert(feature.to_string(), value.into());
        self
    }

    /// `identifier@version`, used as the registry key and in error messages.
    pub fn key(&self) -> String {
        format!("{}@{}", self.identifier, self.version)
    }

    pub fn get(&self, feature: &str) -> Option<&FeatureValue> {
        self.features.get(feature)
    }

    pub fn flag(&self, feature: &str) -> Option<bool> {
        match self.features.get(feature)? {
            FeatureValue::Flag(v) => Some(*v),
            _ => None,
        }
    }

    pub fn number(&self, feature: &str) -> Option<f64> {
        match self.features.get(feature)? {
            FeatureValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn labels(&self, feature: &str) -> Option<&BTreeSet<String>> {
        match self.features.get(feature)? {
            FeatureValue::Labels(v) => Some(v),
            _ => None,
        }
    }

    /// Declared consistency level, if any.
    pub fn consistency(&self) -> Option<ConsistencyLevel> {
        match self.features.get(keys::CONSISTENCY)? {
            FeatureValue::Text(s) => ConsistencyLevel::parse(s),
            _ => None,
        }
    }
}
