//! Schema definitions and migration runner for SurrealDB.
//!
//! All table definitions use SCHEMAFULL mode for data integrity.
//! UUIDs are stored as strings. Enums are stored as strings with
//! ASSERT constraints for validation.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
    #[allow(dead_code)]
    name: String,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: SCHEMA_V1,
}];

// -----------------------------------------------------------------------
// Schema v1 — initial table definitions
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Tenants
-- =======================================================================
DEFINE TABLE tenants SCHEMAFULL;
DEFINE FIELD email ON TABLE tenants TYPE string;
DEFINE FIELD profile ON TABLE tenants TYPE string;
DEFINE FIELD os_username ON TABLE tenants TYPE string;
DEFINE FIELD ns_base_name ON TABLE tenants TYPE string;
DEFINE FIELD created_at ON TABLE tenants TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE tenants TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_tenants_ns_base_name ON TABLE tenants \
    COLUMNS ns_base_name UNIQUE;

-- =======================================================================
-- Namespaces (one environment of a tenant on one cluster)
-- =======================================================================
DEFINE TABLE namespaces SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE namespaces TYPE string;
DEFINE FIELD env_type ON TABLE namespaces TYPE string \
    ASSERT $value IN ['user', 'jenkins', 'che', 'run', 'stage', 'test', \
    'custom'];
DEFINE FIELD name ON TABLE namespaces TYPE string;
DEFINE FIELD cluster_url ON TABLE namespaces TYPE string;
DEFINE FIELD version ON TABLE namespaces TYPE string;
DEFINE FIELD state ON TABLE namespaces TYPE string \
    ASSERT $value IN ['provisioning', 'updating', 'ready', 'failed'];
DEFINE FIELD updated_by ON TABLE namespaces TYPE string;
DEFINE FIELD created_at ON TABLE namespaces TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE namespaces TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_namespaces_tenant_type ON TABLE namespaces \
    COLUMNS tenant_id, env_type UNIQUE;
DEFINE INDEX idx_namespaces_name ON TABLE namespaces \
    COLUMNS name UNIQUE;
DEFINE INDEX idx_namespaces_cluster_name ON TABLE namespaces \
    COLUMNS cluster_url, name;

-- =======================================================================
-- Fleet update singleton
-- =======================================================================
DEFINE TABLE tenants_update SCHEMAFULL;
DEFINE FIELD status ON TABLE tenants_update TYPE string \
    ASSERT $value IN ['finished', 'updating', 'failed', 'killed', \
    'incomplete'];
DEFINE FIELD last_time_updated ON TABLE tenants_update TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD failed_count ON TABLE tenants_update TYPE int DEFAULT 0;
DEFINE FIELD file_versions ON TABLE tenants_update TYPE object FLEXIBLE \
    DEFAULT {};

-- =======================================================================
-- Advisory locks (Single-Flight Mutex)
-- =======================================================================
DEFINE TABLE advisory_lock SCHEMAFULL;
DEFINE FIELD holder ON TABLE advisory_lock TYPE string;
DEFINE FIELD acquired_at ON TABLE advisory_lock TYPE datetime \
    DEFAULT time::now();
";

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Run all pending migrations against the given SurrealDB client.
///
/// Creates a `_migration` tracking table on first run, then applies
/// each migration whose version exceeds the current maximum.
/// All DEFINE statements are idempotent so re-running is safe.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let mut result = db
        .query("SELECT * FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    let current_version = records.first().map(|m| m.version).unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version > current_version {
            info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            db.query(migration.sql).await?.check().map_err(|e| {
                DbError::Migration(format!(
                    "Migration v{} '{}' failed: {}",
                    migration.version, migration.name, e,
                ))
            })?;

            db.query("CREATE _migration SET version = $version, name = $name")
                .bind(("version", migration.version))
                .bind(("name", migration.name))
                .await?
                .check()
                .map_err(|e| {
                    DbError::Migration(format!(
                        "Failed to record migration v{}: {}",
                        migration.version, e,
                    ))
                })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_v1_is_nonempty() {
        assert!(!SCHEMA_V1.is_empty());
    }

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(
                window[0].version < window[1].version,
                "Migrations must be in ascending version order"
            );
        }
    }
}
