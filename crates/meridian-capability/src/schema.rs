//! Feature schema — the set of recognized capability keys.
//!
//! Capability documents are open maps, so the schema is what keeps a
//! typo like `transaction` from silently never matching. Every key in a
//! published document (and every feature a predicate references) must be
//! registered here with the kind of value it carries.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::{CapabilityDocument, FeatureValue};
use crate::error::{CapabilityError, CapabilityResult};
use crate::requirement::{Predicate, RequirementSet};

/// Value kind accepted for a feature key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// `true` / `false`.
    Flag,
    /// Any finite number (limits, latency, throughput).
    Number,
    /// A set of string labels (e.g. query languages).
    Labels,
    /// A [`ConsistencyLevel`] name.
    Consistency,
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Flag => "flag",
            Self::Number => "number",
            Self::Labels => "labels",
            Self::Consistency => "consistency",
        };
        f.write_str(s)
    }
}

/// Consistency levels, ordered weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    Eventual,
    Session,
    BoundedStaleness,
    Strong,
    Linearizable,
}

impl ConsistencyLevel {
    /// Parse a level from its snake_case name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "eventual" => Some(Self::Eventual),
            "session" => Some(Self::Session),
            "bounded_staleness" => Some(Self::BoundedStaleness),
            "strong" => Some(Self::Strong),
            "linearizable" => Some(Self::Linearizable),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eventual => "eventual",
            Self::Session => "session",
            Self::BoundedStaleness => "bounded_staleness",
            Self::Strong => "strong",
            Self::Linearizable => "linearizable",
        }
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known feature keys.
pub mod keys {
    pub const TRANSACTIONS: &str = "transactions";
    pub const QUERY_LANGUAGES: &str = "query_languages";
    pub const CONSISTENCY: &str = "consistency";
    pub const LATENCY_P50_MS: &str = "latency_p50_ms";
    pub const LATENCY_P99_MS: &str = "latency_p99_ms";
    pub const MAX_RPS: &str = "max_rps";
    pub const MAX_CONNECTIONS: &str = "max_connections";
    pub const MAX_VALUE_BYTES: &str = "max_value_bytes";
    pub const TTL: &str = "ttl";
    pub const STREAMING: &str = "streaming";
    pub const SECONDARY_INDEXES: &str = "secondary_indexes";
    pub const PUBSUB: &str = "pubsub";
}

/// Registry of recognized feature names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    features: BTreeMap<String, FeatureKind>,
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::empty()
            .with(keys::TRANSACTIONS, FeatureKind::Flag)
            .with(keys::QUERY_LANGUAGES, FeatureKind::Labels)
            .with(keys::CONSISTENCY, FeatureKind::Consistency)
            .with(keys::LATENCY_P50_MS, FeatureKind::Number)
            .with(keys::LATENCY_P99_MS, FeatureKind::Number)
            .with(keys::MAX_RPS, FeatureKind::Number)
            .with(keys::MAX_CONNECTIONS, FeatureKind::Number)
            .with(keys::MAX_VALUE_BYTES, FeatureKind::Number)
            .with(keys::TTL, FeatureKind::Flag)
            .with(keys::STREAMING, FeatureKind::Flag)
            .with(keys::SECONDARY_INDEXES, FeatureKind::Flag)
            .with(keys::PUBSUB, FeatureKind::Flag)
    }
}

impl FeatureSchema {
    /// A schema with no recognized features.
    pub fn empty() -> Self {
        Self {
            features: BTreeMap::new(),
        }
    }

    /// Builder-style registration.
    pub fn with(mut self, name: &str, kind: FeatureKind) -> Self {
        self.register(name, kind);
        self
    }

    /// Register (or re-type) a feature key.
    pub fn register(&mut self, name: &str, kind: FeatureKind) {
        self.features.insert(name.to_string(), kind);
    }

    /// Kind of a registered feature.
    pub fn kind_of(&self, name: &str) -> Option<FeatureKind> {
        self.features.get(name).copied()
    }

    /// Iterate all registered features.
    pub fn features(&self) -> impl Iterator<Item = (&str, FeatureKind)> {
        self.features.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Validate every key and value kind in a document.
    pub fn validate(&self, doc: &CapabilityDocument) -> CapabilityResult<()> {
        check_identifier("identifier", &doc.identifier)?;
        check_identifier("version", &doc.version)?;
        let document = doc.key();
        for (feature, value) in &doc.features {
            let kind = self
                .kind_of(feature)
                .ok_or_else(|| CapabilityError::UnknownFeature {
                    document: document.clone(),
                    feature: feature.clone(),
                })?;
            if !value_fits(value, kind) {
                return Err(CapabilityError::KindMismatch {
                    document,
                    feature: feature.clone(),
                    expected: kind,
                });
            }
        }
        Ok(())
    }

    /// Validate that every predicate references a known feature of a
    /// compatible kind.
    pub fn validate_requirements(&self, req: &RequirementSet) -> CapabilityResult<()> {
        for predicate in req.required.iter().chain(&req.optional) {
            let feature = predicate.feature();
            let kind = self
                .kind_of(feature)
                .ok_or_else(|| CapabilityError::UnknownFeature {
                    document: "requirements".to_string(),
                    feature: feature.to_string(),
                })?;
            let expected = match predicate {
                Predicate::Enabled { .. } => FeatureKind::Flag,
                Predicate::Includes { .. } => FeatureKind::Labels,
                Predicate::AtLeast { .. } | Predicate::AtMost { .. } => FeatureKind::Number,
                Predicate::ConsistencyAtLeast { .. } => FeatureKind::Consistency,
            };
            if kind != expected {
                return Err(CapabilityError::KindMismatch {
                    document: "requirements".to_string(),
                    feature: feature.to_string(),
                    expected: kind,
                });
            }
        }
        Ok(())
    }
}

/// `@` separates identifier from version in registry keys, so neither
/// half may contain one.
fn check_identifier(field: &'static str, value: &str) -> CapabilityResult<()> {
    let reason = if value.is_empty() {
        "must not be empty"
    } else if value.contains('@') {
        "must not contain '@'"
    } else {
        return Ok(());
    };
    Err(CapabilityError::InvalidIdentifier {
        field,
        value: value.to_string(),
        reason,
    })
}

fn value_fits(value: &FeatureValue, kind: FeatureKind) -> bool {
    match (value, kind) {
        (FeatureValue::Flag(_), FeatureKind::Flag) => true,
        (FeatureValue::Number(n), FeatureKind::Number) => n.is_finite(),
        (FeatureValue::Labels(_), FeatureKind::Labels) => true,
        (FeatureValue::Text(s), FeatureKind::Consistency) => ConsistencyLevel::parse(s).is_some(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schema_knows_core_features() {
        let schema = FeatureSchema::default();
        assert_eq!(schema.kind_of("transactions"), Some(FeatureKind::Flag));
        assert_eq!(schema.kind_of("query_languages"), Some(FeatureKind::Labels));
        assert_eq!(schema.kind_of("consistency"), Some(FeatureKind::Consistency));
        assert_eq!(schema.kind_of("max_rps"), Some(FeatureKind::Number));
        assert_eq!(schema.kind_of("teleportation"), None);
    }

    #[test]
    fn rejects_unknown_key() {
        let schema = FeatureSchema::default();
        let doc = CapabilityDocument::new("redis", "7.2").with("transaction", true);

        let err = schema.validate(&doc).unwrap_err();
        assert!(err.is_invalid());
        assert!(err.to_string().contains("redis@7.2"));
        assert!(err.to_string().contains("transaction"));
    }

    #[test]
    fn rejects_wrong_kind() {
        let schema = FeatureSchema::default();
        let doc = CapabilityDocument::new("redis", "7.2").with("max_rps", true);
        assert!(matches!(
            schema.validate(&doc),
            Err(CapabilityError::KindMismatch { .. })
        ));

        let doc = CapabilityDocument::new("redis", "7.2").with("consistency", "sorta");
        assert!(schema.validate(&doc).is_err());
    }

    #[test]
    fn rejects_ambiguous_keys() {
        let schema = FeatureSchema::default();

        // Both would collapse to the key "a@b@c".
        for doc in [
            CapabilityDocument::new("a@b", "c"),
            CapabilityDocument::new("a", "b@c"),
        ] {
            let err = schema.validate(&doc).unwrap_err();
            assert!(matches!(err, CapabilityError::InvalidIdentifier { .. }));
            assert!(err.is_invalid());
        }

        let err = schema.validate(&CapabilityDocument::new("", "1")).unwrap_err();
        assert!(matches!(
            err,
            CapabilityError::InvalidIdentifier { field: "identifier", .. }
        ));
    }

    #[test]
    fn accepts_well_formed_document() {
        let schema = FeatureSchema::default();
        let doc = CapabilityDocument::new("postgres", "16")
            .with("transactions", true)
            .with("query_languages", vec!["sql"])
            .with("consistency", ConsistencyLevel::Linearizable)
            .with("max_connections", 500.0);
        assert!(schema.validate(&doc).is_ok());
    }

    #[test]
    fn custom_feature_registration() {
        let schema = FeatureSchema::empty().with("vector_search", FeatureKind::Flag);
        let doc = CapabilityDocument::new("qdrant", "1.9").with("vector_search", true);
        assert!(schema.validate(&doc).is_ok());
    }

    #[test]
    fn requirements_must_reference_known_features() {
        let schema = FeatureSchema::default();
        let req = RequirementSet::new().require(Predicate::enabled("teleportation"));
        assert!(schema.validate_requirements(&req).is_err());

        let req = RequirementSet::new().require(Predicate::at_least("transactions", 1.0));
        assert!(schema.validate_requirements(&req).is_err());

        let req = RequirementSet::new()
            .require(Predicate::enabled("transactions"))
            .prefer(Predicate::at_most("latency_p50_ms", 5.0));
        assert!(schema.validate_requirements(&req).is_ok());
    }

    #[test]
    fn consistency_levels_are_ordered() {
        assert!(ConsistencyLevel::Eventual < ConsistencyLevel::Session);
        assert!(ConsistencyLevel::Strong < ConsistencyLevel::Linearizable);
        assert_eq!(
            ConsistencyLevel::parse("bounded_staleness"),
            Some(ConsistencyLevel::BoundedStaleness)
        );
    }
}
