//! SurrealDB implementation of [`TenantRepository`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use provost_core::models::{EnvType, Namespace, NamespaceState, Tenant};
use provost_core::repository::TenantRepository;
use provost_core::{ProvostError, ProvostResult};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::DbError;

/// DB-side tenant row for queries where the UUID is already known.
#[derive(Debug, SurrealValue)]
struct TenantRow {
    email: String,
    profile: String,
    os_username: String,
    ns_base_name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TenantRow {
    fn into_tenant(self, id: Uuid) -> Tenant {
        Tenant {
            id,
            email: self.email,
            profile: self.profile,
            os_username: self.os_username,
            ns_base_name: self.ns_base_name,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// DB-side namespace row including the record id via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct NamespaceRow {
    record_id: String,
    tenant_id: String,
    env_type: String,
    name: String,
    cluster_url: String,
    version: String,
    state: String,
    updated_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl NamespaceRow {
    fn try_into_namespace(self) -> Result<Namespace, DbError> {
        let id = Uuid::parse_str(&self.record_id)
            .map_err(|e| DbError::Migration(format!("invalid namespace UUID: {e}")))?;
        let tenant_id = Uuid::parse_str(&self.tenant_id)
            .map_err(|e| DbError::Migration(format!("invalid tenant UUID: {e}")))?;
        Ok(Namespace {
            id,
            tenant_id,
            env_type: parse_env_type(&self.env_type)?,
            name: self.name,
            cluster_url: self.cluster_url,
            version: self.version,
            state: parse_state(&self.state)?,
            updated_by: self.updated_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Row struct for count queries.
#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

/// Row struct for fleet queries that only need coordinates.
#[derive(Debug, SurrealValue)]
struct OutdatedRow {
    tenant_id: String,
    cluster_url: String,
}

fn parse_env_type(value: &str) -> Result<EnvType, DbError> {
    EnvType::parse(value).map_err(|e| DbError::Migration(e.to_string()))
}

fn parse_state(value: &str) -> Result<NamespaceState, DbError> {
    match value {
        "provisioning" => Ok(NamespaceState::Provisioning),
        "updating" => Ok(NamespaceState::Updating),
        "ready" => Ok(NamespaceState::Ready),
        "failed" => Ok(NamespaceState::Failed),
        other => Err(DbError::Migration(format!("invalid namespace state '{other}'"))),
    }
}

/// SurrealDB implementation of the tenant and namespace repository.
#[derive(Clone)]
pub struct SurrealTenantRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealTenantRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    /// Builds the WHERE clause matching outdated namespaces: any row whose
    /// `updated_by` differs from the current revision or whose version
    /// differs from the mapped version of its envType, optionally
    /// restricted to one cluster.
    fn outdated_filter(
        mapped_versions: &BTreeMap<EnvType, String>,
        updated_by: &str,
        cluster_url: Option<&str>,
    ) -> (String, Vec<(String, String)>) {
        let mut binds = vec![("updated_by".to_string(), updated_by.to_string())];
        let mut clause = String::from("(updated_by != $updated_by");
        for (i, (env_type, version)) in mapped_versions.iter().enumerate() {
            clause.push_str(&format!(
                " OR (env_type = $et_{i} AND version != $v_{i})"
            ));
            binds.push((format!("et_{i}"), env_type.as_str().to_string()));
            binds.push((format!("v_{i}"), version.clone()));
        }
        clause.push(')');
        if let Some(cluster) = cluster_url {
            clause.push_str(" AND cluster_url = $cluster_url");
            binds.push(("cluster_url".to_string(), cluster.to_string()));
        }
        (clause, binds)
    }

    async fn outdated_rows(
        &self,
        mapped_versions: &BTreeMap<EnvType, String>,
        updated_by: &str,
        cluster_url: Option<&str>,
    ) -> Result<Vec<OutdatedRow>, DbError> {
        let (clause, binds) =
            Self::outdated_filter(mapped_versions, updated_by, cluster_url);
        let query = format!(
            "SELECT tenant_id, cluster_url FROM namespaces WHERE {clause} \
             ORDER BY tenant_id"
        );
        let mut builder = self.db.query(query);
        for (key, value) in binds {
            builder = builder.bind((key, value));
        }
        let mut result = builder.await?;
        Ok(result.take(0)?)
    }
}

impl<C: Connection> TenantRepository for SurrealTenantRepository<C> {
    async fn create_tenant(&self, tenant: &Tenant) -> ProvostResult<()> {
        self.db
            .query(
                "CREATE type::record('tenants', $id) SET \
                 email = $email, profile = $profile, \
                 os_username = $os_username, ns_base_name = $ns_base_name",
            )
            .bind(("id", tenant.id.to_string()))
            .bind(("email", tenant.email.clone()))
            .bind(("profile", tenant.profile.clone()))
            .bind(("os_username", tenant.os_username.clone()))
            .bind(("ns_base_name", tenant.ns_base_name.clone()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;
        Ok(())
    }

    async fn save_tenant(&self, tenant: &Tenant) -> ProvostResult<()> {
        self.db
            .query(
                "UPDATE type::record('tenants', $id) SET \
                 email = $email, profile = $profile, \
                 os_username = $os_username, ns_base_name = $ns_base_name, \
                 updated_at = time::now()",
            )
            .bind(("id", tenant.id.to_string()))
            .bind(("email", tenant.email.clone()))
            .bind(("profile", tenant.profile.clone()))
            .bind(("os_username", tenant.os_username.clone()))
            .bind(("ns_base_name", tenant.ns_base_name.clone()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;
        Ok(())
    }

    async fn delete_tenant(&self, id: Uuid) -> ProvostResult<()> {
        self.db
            .query("DELETE type::record('tenants', $id)")
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?;
        Ok(())
    }

    async fn get_tenant(&self, id: Uuid) -> ProvostResult<Tenant> {
        let id_str = id.to_string();
        let mut result = self
            .db
            .query("SELECT * FROM type::record('tenants', $id)")
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<TenantRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or(DbError::NotFound {
            entity: "tenant".into(),
            id: id_str,
        })?;
        Ok(row.into_tenant(id))
    }

    async fn exists(&self, id: Uuid) -> ProvostResult<bool> {
        match self.get_tenant(id).await {
            Ok(_) => Ok(true),
            Err(ProvostError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn exists_with_ns_base_name(&self, ns_base_name: &str) -> ProvostResult<bool> {
        let mut result = self
            .db
            .query(
                "SELECT count() AS total FROM tenants \
                 WHERE ns_base_name = $ns_base_name GROUP ALL",
            )
            .bind(("ns_base_name", ns_base_name.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0) > 0)
    }

    async fn lookup_tenant_by_cluster_and_namespace(
        &self,
        cluster_url: &str,
        name: &str,
    ) -> ProvostResult<Tenant> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM namespaces \
                 WHERE cluster_url = $cluster_url AND name = $name",
            )
            .bind(("cluster_url", cluster_url.to_string()))
            .bind(("name", name.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<NamespaceRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or(DbError::NotFound {
            entity: "namespace".into(),
            id: format!("cluster={cluster_url},name={name}"),
        })?;
        let namespace = row.try_into_namespace()?;
        self.get_tenant(namespace.tenant_id).await
    }

    async fn create_namespace(&self, namespace: &Namespace) -> ProvostResult<()> {
        self.db
            .query(
                "CREATE type::record('namespaces', $id) SET \
                 tenant_id = $tenant_id, env_type = $env_type, \
                 name = $name, cluster_url = $cluster_url, \
                 version = $version, state = $state, \
                 updated_by = $updated_by",
            )
            .bind(("id", namespace.id.to_string()))
            .bind(("tenant_id", namespace.tenant_id.to_string()))
            .bind(("env_type", namespace.env_type.as_str()))
            .bind(("name", namespace.name.clone()))
            .bind(("cluster_url", namespace.cluster_url.clone()))
            .bind(("version", namespace.version.clone()))
            .bind(("state", namespace.state.as_str()))
            .bind(("updated_by", namespace.updated_by.clone()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;
        Ok(())
    }

    async fn save_namespace(&self, namespace: &Namespace) -> ProvostResult<()> {
        self.db
            .query(
                "UPDATE type::record('namespaces', $id) SET \
                 name = $name, cluster_url = $cluster_url, \
                 version = $version, state = $state, \
                 updated_by = $updated_by, updated_at = time::now()",
            )
            .bind(("id", namespace.id.to_string()))
            .bind(("name", namespace.name.clone()))
            .bind(("cluster_url", namespace.cluster_url.clone()))
            .bind(("version", namespace.version.clone()))
            .bind(("state", namespace.state.as_str()))
            .bind(("updated_by", namespace.updated_by.clone()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &Namespace) -> ProvostResult<()> {
        self.db
            .query("DELETE type::record('namespaces', $id)")
            .bind(("id", namespace.id.to_string()))
            .await
            .map_err(DbError::from)?;
        Ok(())
    }

    async fn get_namespaces(&self, tenant_id: Uuid) -> ProvostResult<Vec<Namespace>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM namespaces \
                 WHERE tenant_id = $tenant_id ORDER BY name",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<NamespaceRow> = result.take(0).map_err(DbError::from)?;
        let namespaces = rows
            .into_iter()
            .map(NamespaceRow::try_into_namespace)
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(namespaces)
    }

    async fn namespace_exists(&self, name: &str) -> ProvostResult<bool> {
        let mut result = self
            .db
            .query(
                "SELECT count() AS total FROM namespaces \
                 WHERE name = $name GROUP ALL",
            )
            .bind(("name", name.to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0) > 0)
    }

    async fn tenants_to_update(
        &self,
        mapped_versions: &BTreeMap<EnvType, String>,
        limit: usize,
        updated_by: &str,
        cluster_url: Option<&str>,
    ) -> ProvostResult<Vec<Tenant>> {
        let rows = self
            .outdated_rows(mapped_versions, updated_by, cluster_url)
            .await?;
        let mut seen = std::collections::BTreeSet::new();
        let mut tenants = Vec::new();
        for row in rows {
            if !seen.insert(row.tenant_id.clone()) {
                continue;
            }
            if tenants.len() == limit {
                break;
            }
            let id = Uuid::parse_str(&row.tenant_id)
                .map_err(|e| DbError::Migration(format!("invalid tenant UUID: {e}")))?;
            tenants.push(self.get_tenant(id).await?);
        }
        Ok(tenants)
    }

    async fn outdated_tenant_count(
        &self,
        mapped_versions: &BTreeMap<EnvType, String>,
        updated_by: &str,
        cluster_url: Option<&str>,
    ) -> ProvostResult<u64> {
        let rows = self
            .outdated_rows(mapped_versions, updated_by, cluster_url)
            .await?;
        let distinct: std::collections::BTreeSet<String> =
            rows.into_iter().map(|r| r.tenant_id).collect();
        Ok(distinct.len() as u64)
    }

    async fn clusters_to_update(
        &self,
        mapped_versions: &BTreeMap<EnvType, String>,
        updated_by: &str,
    ) -> ProvostResult<Vec<String>> {
        let rows = self
            .outdated_rows(mapped_versions, updated_by, None)
            .await?;
        let distinct: std::collections::BTreeSet<String> =
            rows.into_iter().map(|r| r.cluster_url).collect();
        Ok(distinct.into_iter().collect())
    }
}
