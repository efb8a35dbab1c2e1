//! Database-backed advisory lock (the Single-Flight Mutex).
//!
//! SurrealDB has no native advisory-lock primitive, so `lock(id, timeout)`
//! is a compare-and-set on a dedicated record: `CREATE` on a fixed record
//! id succeeds for exactly one caller, everyone else keeps retrying until
//! the timeout and then reports `Busy`. A holder that died without
//! releasing is evicted once its record is older than the staleness
//! window.

use std::time::Duration;

use chrono::Utc;
use surrealdb::{Connection, Surreal};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DbError;

/// Lock id serializing all fleet-update scheduling decisions.
pub const UPDATE_LOCK_ID: &str = "tenants-update";

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Factory for advisory locks on one database.
#[derive(Clone)]
pub struct AdvisoryLock<C: Connection> {
    db: Surreal<C>,
    stale_after: chrono::Duration,
}

impl<C: Connection> AdvisoryLock<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self {
            db,
            stale_after: chrono::Duration::minutes(10),
        }
    }

    /// Overrides the staleness window after which an unreleased lock may
    /// be taken over.
    pub fn with_stale_after(mut self, stale_after: chrono::Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Acquires the lock `id`, waiting up to `timeout` on contention.
    pub async fn lock(&self, id: &str, timeout: Duration) -> Result<LockGuard<C>, DbError> {
        let holder = Uuid::new_v4().to_string();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            self.evict_stale(id).await?;

            let taken = self
                .db
                .query("CREATE type::record('advisory_lock', $id) SET holder = $holder")
                .bind(("id", id.to_string()))
                .bind(("holder", holder.clone()))
                .await?
                .check()
                .is_ok();

            if taken {
                debug!(lock_id = %id, %holder, "acquired advisory lock");
                return Ok(LockGuard {
                    db: self.db.clone(),
                    id: id.to_string(),
                    holder,
                });
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(DbError::Busy(format!(
                    "advisory lock '{id}' is held by another instance"
                )));
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    async fn evict_stale(&self, id: &str) -> Result<(), DbError> {
        let cutoff = Utc::now() - self.stale_after;
        self.db
            .query("DELETE type::record('advisory_lock', $id) WHERE acquired_at < $cutoff")
            .bind(("id", id.to_string()))
            .bind(("cutoff", cutoff))
            .await?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;
        Ok(())
    }
}

impl<C: Connection> provost_core::repository::AdvisoryMutex for AdvisoryLock<C> {
    type Guard = LockGuard<C>;

    async fn lock(
        &self,
        id: &str,
        timeout: Duration,
    ) -> provost_core::ProvostResult<Self::Guard> {
        AdvisoryLock::lock(self, id, timeout).await.map_err(Into::into)
    }

    async fn release(&self, guard: Self::Guard) -> provost_core::ProvostResult<()> {
        guard.release().await.map_err(Into::into)
    }
}

/// Proof of lock ownership. Must be released explicitly; an unreleased
/// guard is eventually evicted through the staleness window.
pub struct LockGuard<C: Connection> {
    db: Surreal<C>,
    id: String,
    holder: String,
}

impl<C: Connection> LockGuard<C> {
    /// Releases the lock. Only removes the record if this guard still
    /// owns it.
    pub async fn release(self) -> Result<(), DbError> {
        let result = self
            .db
            .query("DELETE type::record('advisory_lock', $id) WHERE holder = $holder")
            .bind(("id", self.id.clone()))
            .bind(("holder", self.holder.clone()))
            .await?
            .check();
        if let Err(e) = result {
            warn!(lock_id = %self.id, error = %e, "failed to release advisory lock");
            return Err(DbError::Migration(e.to_string()));
        }
        debug!(lock_id = %self.id, "released advisory lock");
        Ok(())
    }
}
