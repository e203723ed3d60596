//! meridian-state — coordinator persistence for Meridian.
//!
//! The coordinator's durable state (worker records, resource records,
//! published capability documents) goes through the [`KvBackend`] trait:
//! a flat `table → key → bytes` interface with an atomic
//! insert-if-absent. [`RedbBackend`] implements it on
//! [redb](https://docs.rs/redb), on disk or in memory.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into `&[u8]` value columns.
//! [`StateStore`] layers typed CRUD on top of any backend; it is `Clone`
//! + `Send` + `Sync` (backed by `Arc<dyn KvBackend>`) and can be shared
//! across async tasks.

pub mod backend;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use backend::{KvBackend, RedbBackend};
pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use tables::Table;
pub use types::*;
