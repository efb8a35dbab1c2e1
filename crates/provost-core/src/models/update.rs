//! The fleet-wide rolling update singleton.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Status of the fleet-wide rolling update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Finished,
    Updating,
    Failed,
    Killed,
    Incomplete,
}

impl UpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::Finished => "finished",
            UpdateStatus::Updating => "updating",
            UpdateStatus::Failed => "failed",
            UpdateStatus::Killed => "killed",
            UpdateStatus::Incomplete => "incomplete",
        }
    }
}

impl std::fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single row describing the fleet-wide template upgrade.
///
/// `file_versions` maps every known template file to the version that was
/// last successfully applied across the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantsUpdate {
    pub status: UpdateStatus,
    pub last_time_updated: DateTime<Utc>,
    pub failed_count: u32,
    pub file_versions: BTreeMap<String, String>,
}

impl TenantsUpdate {
    /// Whether a new scheduler run may take over. An `updating` row blocks
    /// a new run unless it has been stuck for longer than `stuck_timeout`,
    /// in which case it is assumed stale and may be taken over.
    pub fn can_start(&self, stuck_timeout: Duration) -> bool {
        match self.status {
            UpdateStatus::Updating => Utc::now() - self.last_time_updated > stuck_timeout,
            _ => true,
        }
    }
}

impl Default for TenantsUpdate {
    fn default() -> Self {
        Self {
            status: UpdateStatus::Finished,
            last_time_updated: Utc::now(),
            failed_count: 0,
            file_versions: BTreeMap::new(),
        }
    }
}
