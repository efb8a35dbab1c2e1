//! SurrealDB implementation of [`UpdateRepository`] — the fleet-update
//! singleton row.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use provost_core::models::{TenantsUpdate, UpdateStatus};
use provost_core::repository::UpdateRepository;
use provost_core::ProvostResult;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;

use crate::error::DbError;

/// Fixed record id — there is never more than one row.
const SINGLETON_ID: &str = "singleton";

#[derive(Debug, SurrealValue)]
struct TenantsUpdateRow {
    status: String,
    last_time_updated: DateTime<Utc>,
    failed_count: u32,
    file_versions: serde_json::Value,
}

impl TenantsUpdateRow {
    fn try_into_update(self) -> Result<TenantsUpdate, DbError> {
        let file_versions: BTreeMap<String, String> =
            serde_json::from_value(self.file_versions)
                .map_err(|e| DbError::Migration(format!("invalid file_versions: {e}")))?;
        Ok(TenantsUpdate {
            status: parse_status(&self.status)?,
            last_time_updated: self.last_time_updated,
            failed_count: self.failed_count,
            file_versions,
        })
    }
}

fn parse_status(value: &str) -> Result<UpdateStatus, DbError> {
    match value {
        "finished" => Ok(UpdateStatus::Finished),
        "updating" => Ok(UpdateStatus::Updating),
        "failed" => Ok(UpdateStatus::Failed),
        "killed" => Ok(UpdateStatus::Killed),
        "incomplete" => Ok(UpdateStatus::Incomplete),
        other => Err(DbError::Migration(format!("invalid update status '{other}'"))),
    }
}

/// SurrealDB implementation of the fleet-update repository.
#[derive(Clone)]
pub struct SurrealUpdateRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealUpdateRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn read_singleton(&self) -> Result<Option<TenantsUpdate>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM type::record('tenants_update', $id)")
            .bind(("id", SINGLETON_ID))
            .await?;
        let rows: Vec<TenantsUpdateRow> = result.take(0)?;
        rows.into_iter()
            .next()
            .map(TenantsUpdateRow::try_into_update)
            .transpose()
    }

    async fn write_singleton(&self, update: &TenantsUpdate) -> Result<(), DbError> {
        let file_versions = serde_json::to_value(&update.file_versions)
            .map_err(|e| DbError::Migration(format!("invalid file_versions: {e}")))?;
        self.db
            .query(
                "UPSERT type::record('tenants_update', $id) SET \
                 status = $status, last_time_updated = $last_time_updated, \
                 failed_count = $failed_count, file_versions = $file_versions",
            )
            .bind(("id", SINGLETON_ID))
            .bind(("status", update.status.as_str()))
            .bind(("last_time_updated", update.last_time_updated))
            .bind(("failed_count", update.failed_count))
            .bind(("file_versions", file_versions))
            .await?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;
        Ok(())
    }
}

impl<C: Connection> UpdateRepository for SurrealUpdateRepository<C> {
    async fn get_tenants_update(&self) -> ProvostResult<TenantsUpdate> {
        if let Some(update) = self.read_singleton().await? {
            return Ok(update);
        }
        // First access: materialize the default row.
        let update = TenantsUpdate::default();
        self.write_singleton(&update).await?;
        Ok(update)
    }

    async fn save_tenants_update(&self, update: &TenantsUpdate) -> ProvostResult<()> {
        self.write_singleton(update).await?;
        Ok(())
    }

    async fn update_status(&self, status: UpdateStatus) -> ProvostResult<()> {
        let mut update = self.get_tenants_update().await?;
        update.status = status;
        self.write_singleton(&update).await?;
        Ok(())
    }

    async fn stop(&self) -> ProvostResult<()> {
        self.update_status(UpdateStatus::Killed).await
    }

    async fn prepare_for_updating(&self) -> ProvostResult<()> {
        let mut update = self.get_tenants_update().await?;
        update.status = UpdateStatus::Updating;
        update.last_time_updated = Utc::now();
        self.write_singleton(&update).await?;
        Ok(())
    }
}
