//! Tenant domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The owning account of a set of cluster workspaces.
///
/// `ns_base_name` is the cluster-side namespace prefix. It is assigned once
/// when the tenant is first provisioned and stays invariant for the
/// tenant's life; on a naming collision provisioning retries with `base2`,
/// `base3`, … until a free prefix is found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub email: String,
    /// Profile tag of the owning user (e.g. `free`).
    pub profile: String,
    /// The user's identity on the cluster side.
    pub os_username: String,
    pub ns_base_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(id: Uuid, email: impl Into<String>, os_username: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            email: email.into(),
            profile: String::new(),
            os_username: os_username.into(),
            ns_base_name: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Derives a cluster-safe base name from a username: the part before `@`
/// with everything outside `[a-z0-9]` replaced by `-`.
pub fn sanitize_username(os_username: &str) -> String {
    os_username
        .split('@')
        .next()
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_email_domain() {
        assert_eq!(sanitize_username("john@example.com"), "john");
    }

    #[test]
    fn sanitize_replaces_special_characters() {
        assert_eq!(sanitize_username("john.doe+osio@redhat.com"), "john-doe-osio");
        assert_eq!(sanitize_username("Jane_Doe"), "-ane--oe");
    }

    #[test]
    fn sanitize_keeps_plain_names() {
        assert_eq!(sanitize_username("developer42"), "developer42");
    }
}
