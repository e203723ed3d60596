//! redb table definitions for the Meridian state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Worker records keyed by `{worker_id}`.
pub const WORKERS: TableDefinition<&str, &[u8]> = TableDefinition::new("workers");

/// Resource records keyed by `{name}`.
pub const RESOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("resources");

/// Capability documents keyed by `{identifier}@{version}`.
pub const CAPABILITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("capabilities");

/// Logical tables exposed through [`crate::KvBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Workers,
    Resources,
    Capabilities,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Workers, Table::Resources, Table::Capabilities];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Workers => "workers",
            Self::Resources => "resources",
            Self::Capabilities => "capabilities",
        }
    }

    pub(crate) fn definition(&self) -> TableDefinition<'static, &'static str, &'static [u8]> {
        match self {
            Self::Workers => WORKERS,
            Self::Resources => RESOURCES,
            Self::Capabilities => CAPABILITIES,
        }
    }
}
