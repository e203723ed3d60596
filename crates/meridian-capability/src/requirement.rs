//! Requirement predicates and ranking strategies.

use serde::{Deserialize, Serialize};

use crate::document::CapabilityDocument;
use crate::schema::{ConsistencyLevel, keys};

/// A single condition over a capability document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// Flag feature must be `true`.
    Enabled { feature: String },
    /// Labels feature must contain `label`.
    Includes { feature: String, label: String },
    /// Numeric feature must be `>= value`.
    AtLeast { feature: String, value: f64 },
    /// Numeric feature must be `<= value`.
    AtMost { feature: String, value: f64 },
    /// Declared consistency must be at least `level`.
    ConsistencyAtLeast { level: ConsistencyLevel },
}

impl Predicate {
    pub fn enabled(feature: &str) -> Self {
        Self::Enabled {
            feature: feature.to_string(),
        }
    }

    pub fn includes(feature: &str, label: &str) -> Self {
        Self::Includes {
            feature: feature.to_string(),
            label: label.to_string(),
        }
    }

    pub fn at_least(feature: &str, value: f64) -> Self {
        Self::AtLeast {
            feature: feature.to_string(),
            value,
        }
    }

    pub fn at_most(feature: &str, value: f64) -> Self {
        Self::AtMost {
            feature: feature.to_string(),
            value,
        }
    }

    pub fn consistency_at_least(level: ConsistencyLevel) -> Self {
        Self::ConsistencyAtLeast { level }
    }

    /// The feature key this predicate reads.
    pub fn feature(&self) -> &str {
        match self {
            Self::Enabled { feature }
            | Self::Includes { feature, .. }
            | Self::AtLeast { feature, .. }
            | Self::AtMost { feature, .. } => feature,
            Self::ConsistencyAtLeast { .. } => keys::CONSISTENCY,
        }
    }

    /// Stable label reported in `missing_features`.
    pub fn label(&self) -> String {
        match self {
            Self::Enabled { feature } => feature.clone(),
            Self::Includes { feature, label } => format!("{feature}:{label}"),
            Self::AtLeast { feature, value } => format!("{feature}>={value}"),
            Self::AtMost { feature, value } => format!("{feature}<={value}"),
            Self::ConsistencyAtLeast { level } => format!("{}>={level}", keys::CONSISTENCY),
        }
    }

    /// Evaluate against a document. Absent features never satisfy.
    pub fn evaluate(&self, doc: &CapabilityDocument) -> bool {
        match self {
            Self::Enabled { feature } => doc.flag(feature).unwrap_or(false),
            Self::Includes { feature, label } => doc
                .labels(feature)
                .is_some_and(|labels| labels.contains(label)),
            Self::AtLeast { feature, value } => doc.number(feature).is_some_and(|n| n >= *value),
            Self::AtMost { feature, value } => doc.number(feature).is_some_and(|n| n <= *value),
            Self::ConsistencyAtLeast { level } => doc.consistency().is_some_and(|c| c >= *level),
        }
    }
}

/// Tie-break ordering among equally-scored capable workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingStrategy {
    /// Ascending `latency_p50_ms`; undeclared latency sorts last.
    LowestLatency,
    /// Descending `max_rps`.
    HighestThroughput,
    /// Descending declared consistency.
    StrongestConsistency,
    /// Descending count of satisfied optional predicates.
    #[default]
    MostFeatures,
}

/// What a resource's workload needs from its backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequirementSet {
    #[serde(default)]
    pub required: Vec<Predicate>,
    #[serde(default)]
    pub optional: Vec<Predicate>,
    #[serde(default)]
    pub ranking: RankingStrategy,
}

impl RequirementSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, predicate: Predicate) -> Self {
        self.required.push(predicate);
        self
    }

    pub fn prefer(mut self, predicate: Predicate) -> Self {
        self.optional.push(predicate);
        self
    }

    pub fn ranked_by(mut self, ranking: RankingStrategy) -> Self {
        self.ranking = ranking;
        self
    }

    /// No required predicates: any worker satisfies it.
    pub fn is_trivial(&self) -> bool {
        self.required.is_empty()
    }
}
