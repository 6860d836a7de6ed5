//! redb table definitions for the record store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Health-check records keyed by `{vm_id}`.
pub const HEALTH_CHECKS: TableDefinition<&str, &[u8]> = TableDefinition::new("health_checks");

/// Primary records keyed by `{scaling_group_name}` of the preferred group.
/// One key per cluster is what bounds the cluster to a single record.
pub const PRIMARIES: TableDefinition<&str, &[u8]> = TableDefinition::new("primaries");

/// Shape shared by every table: string key, JSON value.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;
