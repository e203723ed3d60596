//! Capability matching and candidate ranking.
//!
//! `matches()` is the hard gate used on resource creation: every required
//! predicate must hold. `rank()` orders candidate workers for discovery:
//! - **Score**: matched required / total required (1.0 with none)
//! - **Tie-break**: the requested [`RankingStrategy`]
//! - **Near misses**: optionally appended after every capable worker

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::document::CapabilityDocument;
use crate::requirement::{RankingStrategy, RequirementSet};
use crate::schema::keys;

/// Result of checking one document against a requirement set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Every required predicate holds.
    pub satisfied: bool,
    /// Labels of the required predicates that failed.
    pub missing_features: Vec<String>,
    pub matched_required: usize,
    pub total_required: usize,
    /// Optional predicates that hold. Never affects `satisfied`.
    pub matched_optional: usize,
}

impl MatchOutcome {
    /// Fraction of required predicates met, 1.0 when none are required.
    pub fn score(&self) -> f64 {
        if self.total_required == 0 {
            1.0
        } else {
            self.matched_required as f64 / self.total_required as f64
        }
    }
}

/// A ranked discovery result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMatch {
    pub worker_id: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_features: Vec<String>,
}

/// Check a document against a requirement set.
pub fn matches(doc: &CapabilityDocument, req: &RequirementSet) -> MatchOutcome {
    let mut missing_features = Vec::new();
    let mut matched_required = 0;
    for predicate in &req.required {
        if predicate.evaluate(doc) {
            matched_required += 1;
        } else {
            missing_features.push(predicate.label());
        }
    }
    let matched_optional = req.optional.iter().filter(|p| p.evaluate(doc)).count();

    MatchOutcome {
        satisfied: missing_features.is_empty(),
        missing_features,
        matched_required,
        total_required: req.required.len(),
        matched_optional,
    }
}

struct Candidate<'a> {
    worker_id: &'a str,
    doc: &'a CapabilityDocument,
    outcome: MatchOutcome,
}

/// Rank candidate workers for a requirement set, best first.
pub fn rank<'a, I>(
    candidates: I,
    req: &RequirementSet,
    strategy: RankingStrategy,
    include_near_miss: bool,
) -> Vec<WorkerMatch>
where
    I: IntoIterator<Item = (&'a str, &'a CapabilityDocument)>,
{
    let (mut capable, mut near_miss): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .map(|(worker_id, doc)| Candidate {
            worker_id,
            doc,
            outcome: matches(doc, req),
        })
        .partition(|c| c.outcome.satisfied);

    capable.sort_by(|a, b| {
        b.outcome
            .score()
            .total_cmp(&a.outcome.score())
            .then_with(|| tie_break(strategy, a, b))
            .then_with(|| a.worker_id.cmp(b.worker_id))
    });

    let mut ranked: Vec<WorkerMatch> = capable
        .into_iter()
        .map(|c| WorkerMatch {
            worker_id: c.worker_id.to_string(),
            score: c.outcome.score(),
            missing_features: Vec::new(),
        })
        .collect();

    if include_near_miss {
        near_miss.sort_by(|a, b| {
            a.outcome
                .missing_features
                .len()
                .cmp(&b.outcome.missing_features.len())
                .then_with(|| a.worker_id.cmp(b.worker_id))
        });
        ranked.extend(near_miss.into_iter().map(|c| WorkerMatch {
            worker_id: c.worker_id.to_string(),
            score: 0.0,
            missing_features: c.outcome.missing_features,
        }));
    }

    ranked
}

fn tie_break(strategy: RankingStrategy, a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    match strategy {
        RankingStrategy::LowestLatency => {
            let la = a.doc.number(keys::LATENCY_P50_MS).unwrap_or(f64::INFINITY);
            let lb = b.doc.number(keys::LATENCY_P50_MS).unwrap_or(f64::INFINITY);
            la.total_cmp(&lb)
        }
        RankingStrategy::HighestThroughput => {
            let ta = a.doc.number(keys::MAX_RPS).unwrap_or(f64::NEG_INFINITY);
            let tb = b.doc.number(keys::MAX_RPS).unwrap_or(f64::NEG_INFINITY);
            tb.total_cmp(&ta)
        }
        RankingStrategy::StrongestConsistency => b.doc.consistency().cmp(&a.doc.consistency()),
        RankingStrategy::MostFeatures => b.outcome.matched_optional.cmp(&a.outcome.matched_optional),
    }
}
