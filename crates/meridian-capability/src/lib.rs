//! meridian-capability — backend capability documents and matching.
//!
//! Workers declare what the backend implementation behind them can do
//! (transactions, query languages, consistency level, throughput and
//! latency envelope, size limits) as a [`CapabilityDocument`]. Resources
//! carry a [`RequirementSet`] describing what their workload needs.
//!
//! # Components
//!
//! - **`schema`** — recognized feature names and their value kinds
//! - **`document`** — versioned, immutable capability documents
//! - **`requirement`** — predicates, requirement sets, ranking strategies
//! - **`matcher`** — pure `matches()` gate and `rank()` ordering
//! - **`registry`** — published documents and worker bindings

pub mod document;
pub mod error;
pub mod matcher;
pub mod registry;
pub mod requirement;
pub mod schema;

pub use document::{CapabilityDocument, FeatureValue};
pub use error::{CapabilityError, CapabilityResult};
pub use matcher::{MatchOutcome, WorkerMatch, matches, rank};
pub use registry::CapabilityRegistry;
pub use requirement::{Predicate, RankingStrategy, RequirementSet};
pub use schema::{ConsistencyLevel, FeatureKind, FeatureSchema};
