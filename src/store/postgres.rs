//! Postgres-backed `Store`. Every write that must be durable and
//! observable through the change feed happens inside one transaction:
//! the live row, its `config_history` entry, and the `change_log` event
//! all commit together or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::rbac::Role;

use super::{
    ApiCredential, ChangeAction, ChangeEvent, ConfigEntity, ControllerStatus, EncryptedSecret,
    EntityKind, GroupBinding, HistoryEntry, InstanceStatus, KeyStatus, Namespace,
    NamespaceMember, SigningKey, StaleKey, Store, StoreError, StoreResult, User,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    fn table(kind: EntityKind) -> &'static str {
        match kind {
            EntityKind::Domain => "domains",
            EntityKind::Cluster => "clusters",
        }
    }

    async fn insert_change_log(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        ns: &str,
        kind: &str,
        name: &str,
        action: ChangeAction,
        operator: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"INSERT INTO change_log (namespace, kind, name, action, operator, payload)
               VALUES ($1, $2, $3, $4, $5, $6) RETURNING revision"#,
        )
        .bind(ns)
        .bind(kind)
        .bind(name)
        .bind(action.as_str())
        .bind(operator)
        .bind(payload)
        .fetch_one(&mut **tx)
        .await
    }

    async fn insert_history(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        ns: &str,
        kind: &str,
        name: &str,
        version: i64,
        action: ChangeAction,
        operator: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO config_history (namespace, kind, name, version, action, operator, payload)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(ns)
        .bind(kind)
        .bind(name)
        .bind(version)
        .bind(action.as_str())
        .bind(operator)
        .bind(payload)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Best-effort: keep only the newest 50 history rows for a key.
    /// Failures are logged, never propagated.
    async fn prune_history(&self, ns: &str, kind: &str, name: &str) {
        let result = sqlx::query(
            r#"DELETE FROM config_history
               WHERE id IN (
                   SELECT id FROM config_history
                   WHERE namespace = $1 AND kind = $2 AND name = $3
                   ORDER BY version DESC
                   OFFSET 50
               )"#,
        )
        .bind(ns)
        .bind(kind)
        .bind(name)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(namespace = %ns, kind, name, "history pruning failed: {}", e);
        }
    }
}

#[derive(sqlx::FromRow)]
struct ConfigRow {
    namespace: String,
    name: String,
    payload: serde_json::Value,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConfigRow {
    fn into_entity(self, kind: EntityKind) -> ConfigEntity {
        ConfigEntity {
            namespace: self.namespace,
            kind,
            name: self.name,
            payload: self.payload,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    namespace: String,
    kind: String,
    name: String,
    version: i64,
    action: String,
    operator: String,
    payload: Option<serde_json::Value>,
    timestamp: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = StoreError;

    fn try_from(r: HistoryRow) -> Result<Self, Self::Error> {
        Ok(HistoryEntry {
            id: r.id,
            namespace: r.namespace,
            kind: EntityKind::parse(&r.kind)
                .ok_or_else(|| StoreError::Internal(anyhow::anyhow!("bad kind {}", r.kind)))?,
            name: r.name,
            version: r.version,
            action: ChangeAction::parse(&r.action)
                .ok_or_else(|| StoreError::Internal(anyhow::anyhow!("bad action {}", r.action)))?,
            operator: r.operator,
            payload: r.payload,
            timestamp: r.timestamp,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChangeLogRow {
    revision: i64,
    namespace: String,
    kind: String,
    name: String,
    action: String,
    operator: String,
    payload: Option<serde_json::Value>,
    timestamp: DateTime<Utc>,
}

impl TryFrom<ChangeLogRow> for ChangeEvent {
    type Error = StoreError;

    fn try_from(r: ChangeLogRow) -> Result<Self, Self::Error> {
        Ok(ChangeEvent {
            revision: r.revision,
            namespace: r.namespace,
            kind: r.kind,
            name: r.name,
            action: ChangeAction::parse(&r.action)
                .ok_or_else(|| StoreError::Internal(anyhow::anyhow!("bad action {}", r.action)))?,
            operator: r.operator,
            payload: r.payload,
            timestamp: r.timestamp,
        })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ensure_namespace(&self, name: &str) -> StoreResult<()> {
        sqlx::query("INSERT INTO namespaces (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_namespaces(&self) -> StoreResult<Vec<Namespace>> {
        let rows: Vec<(String, DateTime<Utc>)> =
            sqlx::query_as("SELECT name, created_at FROM namespaces ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(name, created_at)| Namespace { name, created_at })
            .collect())
    }

    async fn namespace_exists(&self, name: &str) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM namespaces WHERE name = $1)")
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn list(&self, ns: &str, kind: EntityKind) -> StoreResult<Vec<ConfigEntity>> {
        let sql = format!(
            "SELECT namespace, name, payload, version, created_at, updated_at FROM {} WHERE namespace = $1 ORDER BY name",
            Self::table(kind)
        );
        let rows = sqlx::query_as::<_, ConfigRow>(&sql)
            .bind(ns)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.into_entity(kind)).collect())
    }

    async fn get(&self, ns: &str, kind: EntityKind, name: &str) -> StoreResult<ConfigEntity> {
        let sql = format!(
            "SELECT namespace, name, payload, version, created_at, updated_at FROM {} WHERE namespace = $1 AND name = $2",
            Self::table(kind)
        );
        let row = sqlx::query_as::<_, ConfigRow>(&sql)
            .bind(ns)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(row.into_entity(kind))
    }

    async fn put(
        &self,
        ns: &str,
        kind: EntityKind,
        name: &str,
        payload: serde_json::Value,
        action: ChangeAction,
        operator: &str,
        expected_version: i64,
    ) -> StoreResult<ConfigEntity> {
        let table = Self::table(kind);
        let mut tx = self.pool.begin().await?;

        let current_version: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT version FROM {table} WHERE namespace = $1 AND name = $2 FOR UPDATE"
        ))
        .bind(ns)
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;

        let next_version = match (current_version, expected_version) {
            (None, 0) => 1,
            (None, _) => {
                return Err(StoreError::Conflict(format!(
                    "{} {} does not exist yet",
                    kind.as_str(),
                    name
                )))
            }
            (Some(v), expected) if v == expected => v + 1,
            (Some(v), _) => {
                return Err(StoreError::Conflict(format!(
                    "version mismatch: current version is {v}"
                )))
            }
        };

        let row: ConfigRow = sqlx::query_as(&format!(
            r#"INSERT INTO {table} (namespace, name, payload, version)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (namespace, name) DO UPDATE SET
                   payload = EXCLUDED.payload,
                   version = EXCLUDED.version,
                   updated_at = now()
               RETURNING namespace, name, payload, version, created_at, updated_at"#
        ))
        .bind(ns)
        .bind(name)
        .bind(&payload)
        .bind(next_version)
        .fetch_one(&mut *tx)
        .await?;

        Self::insert_history(
            &mut tx,
            ns,
            kind.as_str(),
            name,
            next_version,
            action,
            operator,
            Some(&payload),
        )
        .await?;
        Self::insert_change_log(
            &mut tx,
            ns,
            kind.as_str(),
            name,
            action,
            operator,
            Some(&payload),
        )
        .await?;

        tx.commit().await?;
        self.prune_history(ns, kind.as_str(), name).await;

        Ok(row.into_entity(kind))
    }

    async fn delete(
        &self,
        ns: &str,
        kind: EntityKind,
        name: &str,
        operator: &str,
    ) -> StoreResult<i64> {
        let table = Self::table(kind);
        let mut tx = self.pool.begin().await?;

        let existing: Option<(serde_json::Value, i64)> = sqlx::query_as(&format!(
            "SELECT payload, version FROM {table} WHERE namespace = $1 AND name = $2 FOR UPDATE"
        ))
        .bind(ns)
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;

        let (payload, version) = existing.ok_or(StoreError::NotFound)?;
        let next_version = version + 1;

        sqlx::query(&format!("DELETE FROM {table} WHERE namespace = $1 AND name = $2"))
            .bind(ns)
            .bind(name)
            .execute(&mut *tx)
            .await?;

        Self::insert_history(
            &mut tx,
            ns,
            kind.as_str(),
            name,
            next_version,
            ChangeAction::Delete,
            operator,
            Some(&payload),
        )
        .await?;
        Self::insert_change_log(
            &mut tx,
            ns,
            kind.as_str(),
            name,
            ChangeAction::Delete,
            operator,
            None,
        )
        .await?;

        tx.commit().await?;
        self.prune_history(ns, kind.as_str(), name).await;

        Ok(next_version)
    }

    async fn replace_all(
        &self,
        ns: &str,
        domains: Vec<(String, serde_json::Value)>,
        clusters: Vec<(String, serde_json::Value)>,
        operator: &str,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        for (kind, table, incoming) in [
            (EntityKind::Domain, "domains", &domains),
            (EntityKind::Cluster, "clusters", &clusters),
        ] {
            let existing: Vec<String> =
                sqlx::query_scalar(&format!("SELECT name FROM {table} WHERE namespace = $1"))
                    .bind(ns)
                    .fetch_all(&mut *tx)
                    .await?;

            let incoming_names: std::collections::HashSet<&str> =
                incoming.iter().map(|(n, _)| n.as_str()).collect();

            // Rows dropped by the replace still get a `delete` event, so a
            // watcher following the feed never ends up pointed at a name
            // that silently stopped existing.
            for removed in existing.iter().filter(|n| !incoming_names.contains(n.as_str())) {
                Self::insert_change_log(
                    &mut tx,
                    ns,
                    kind.as_str(),
                    removed,
                    ChangeAction::Delete,
                    operator,
                    None,
                )
                .await?;
            }

            sqlx::query(&format!("DELETE FROM {table} WHERE namespace = $1"))
                .bind(ns)
                .execute(&mut *tx)
                .await?;

            for (name, payload) in incoming {
                sqlx::query(&format!(
                    "INSERT INTO {table} (namespace, name, payload, version) VALUES ($1, $2, $3, 1)"
                ))
                .bind(ns)
                .bind(name)
                .bind(payload)
                .execute(&mut *tx)
                .await?;

                Self::insert_history(
                    &mut tx,
                    ns,
                    kind.as_str(),
                    name,
                    1,
                    ChangeAction::Import,
                    operator,
                    Some(payload),
                )
                .await?;
                Self::insert_change_log(
                    &mut tx,
                    ns,
                    kind.as_str(),
                    name,
                    ChangeAction::Import,
                    operator,
                    Some(payload),
                )
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn history(&self, ns: &str, kind: EntityKind, name: &str) -> StoreResult<Vec<HistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"SELECT id, namespace, kind, name, version, action, operator, payload, timestamp
               FROM config_history
               WHERE namespace = $1 AND kind = $2 AND name = $3
               ORDER BY version DESC
               LIMIT 50"#,
        )
        .bind(ns)
        .bind(kind.as_str())
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(HistoryEntry::try_from).collect()
    }

    async fn version(&self, ns: &str, kind: EntityKind, name: &str, v: i64) -> StoreResult<HistoryEntry> {
        let row = sqlx::query_as::<_, HistoryRow>(
            r#"SELECT id, namespace, kind, name, version, action, operator, payload, timestamp
               FROM config_history
               WHERE namespace = $1 AND kind = $2 AND name = $3 AND version = $4"#,
        )
        .bind(ns)
        .bind(kind.as_str())
        .bind(name)
        .bind(v)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;
        HistoryEntry::try_from(row)
    }

    async fn rollback(
        &self,
        ns: &str,
        kind: EntityKind,
        name: &str,
        v: i64,
        operator: &str,
    ) -> StoreResult<ConfigEntity> {
        let entry = self.version(ns, kind, name, v).await?;
        let payload = entry
            .payload
            .ok_or_else(|| StoreError::Conflict(format!("version {v} is a delete marker")))?;

        let current = self.get(ns, kind, name).await.ok();
        let expected_version = current.map(|c| c.version).unwrap_or(0);

        self.put(
            ns,
            kind,
            name,
            payload,
            ChangeAction::Rollback,
            operator,
            expected_version,
        )
        .await
    }

    async fn current_revision(&self, ns: &str) -> StoreResult<i64> {
        let rev: Option<i64> =
            sqlx::query_scalar("SELECT MAX(revision) FROM change_log WHERE namespace = $1")
                .bind(ns)
                .fetch_one(&self.pool)
                .await?;
        Ok(rev.unwrap_or(0))
    }

    async fn watch_from(&self, ns: &str, since: i64) -> StoreResult<(Vec<ChangeEvent>, i64)> {
        let rows = sqlx::query_as::<_, ChangeLogRow>(
            r#"SELECT revision, namespace, kind, name, action, operator, payload, timestamp
               FROM change_log
               WHERE namespace = $1 AND revision > $2
               ORDER BY revision ASC
               LIMIT 100"#,
        )
        .bind(ns)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let max_revision = rows.last().map(|r| r.revision).unwrap_or(0);
        let events = rows
            .into_iter()
            .map(ChangeEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((events, max_revision))
    }

    async fn log_admin_event(
        &self,
        ns: &str,
        action: ChangeAction,
        operator: &str,
        resource: &str,
        payload: Option<serde_json::Value>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO change_log (namespace, kind, name, action, operator, payload)
               VALUES ($1, 'admin', $2, $3, $4, $5)"#,
        )
        .bind(ns)
        .bind(resource)
        .bind(action.as_str())
        .bind(operator)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_audit(&self, ns: &str, limit: i64) -> StoreResult<Vec<ChangeEvent>> {
        let rows = sqlx::query_as::<_, ChangeLogRow>(
            r#"SELECT revision, namespace, kind, name, action, operator, payload, timestamp
               FROM change_log
               WHERE namespace = $1
               ORDER BY revision DESC
               LIMIT $2"#,
        )
        .bind(ns)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ChangeEvent::try_from).collect()
    }

    async fn get_user(&self, sub: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT sub, username, email, name, is_admin, password_hash, must_change_password, last_seen FROM users WHERE sub = $1",
        )
        .bind(sub)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT sub, username, email, name, is_admin, password_hash, must_change_password, last_seen FROM users WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn upsert_oidc_user(
        &self,
        sub: &str,
        username: &str,
        email: &str,
        name: &str,
        is_admin_on_insert: bool,
    ) -> StoreResult<User> {
        // `is_admin` is set only on first insert; ON CONFLICT leaves it alone
        // so an admin demoted out-of-band doesn't get re-promoted on next login.
        let row: UserRow = sqlx::query_as(
            r#"INSERT INTO users (sub, username, email, name, is_admin, last_seen)
               VALUES ($1, $2, $3, $4, $5, now())
               ON CONFLICT (sub) DO UPDATE SET
                   username = EXCLUDED.username,
                   email = EXCLUDED.email,
                   name = EXCLUDED.name,
                   last_seen = now()
               RETURNING sub, username, email, name, is_admin, password_hash, must_change_password, last_seen"#,
        )
        .bind(sub)
        .bind(username)
        .bind(email)
        .bind(name)
        .bind(is_admin_on_insert)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn create_builtin_user(
        &self,
        sub: &str,
        username: &str,
        email: &str,
        name: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> StoreResult<User> {
        let row: UserRow = sqlx::query_as(
            r#"INSERT INTO users (sub, username, email, name, is_admin, password_hash)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING sub, username, email, name, is_admin, password_hash, must_change_password, last_seen"#,
        )
        .bind(sub)
        .bind(username)
        .bind(email)
        .bind(name)
        .bind(is_admin)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(format!("user {email} already exists"))
            }
            _ => StoreError::Database(e),
        })?;
        Ok(row.into())
    }

    async fn set_password(&self, sub: &str, password_hash: &str, must_change_password: bool) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $1, must_change_password = $2 WHERE sub = $3",
        )
        .bind(password_hash)
        .bind(must_change_password)
        .bind(sub)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn touch_last_seen(&self, sub: &str) -> StoreResult<()> {
        sqlx::query("UPDATE users SET last_seen = now() WHERE sub = $1")
            .bind(sub)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT sub, username, email, name, is_admin, password_hash, must_change_password, last_seen FROM users ORDER BY username",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_user(&self, sub: &str) -> StoreResult<()> {
        // namespace_members cascades via FK; group_bindings are keyed by
        // group name, not subject, so they are untouched.
        let result = sqlx::query("DELETE FROM users WHERE sub = $1")
            .bind(sub)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_members(&self, ns: &str) -> StoreResult<Vec<NamespaceMember>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT namespace, sub, role FROM namespace_members WHERE namespace = $1 ORDER BY sub",
        )
        .bind(ns)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(namespace, sub, role)| {
                Ok(NamespaceMember {
                    namespace,
                    sub,
                    role: Role::parse(&role)
                        .ok_or_else(|| StoreError::Internal(anyhow::anyhow!("bad role {role}")))?,
                })
            })
            .collect()
    }

    async fn get_member_role(&self, ns: &str, sub: &str) -> StoreResult<Option<Role>> {
        let role: Option<String> =
            sqlx::query_scalar("SELECT role FROM namespace_members WHERE namespace = $1 AND sub = $2")
                .bind(ns)
                .bind(sub)
                .fetch_optional(&self.pool)
                .await?;
        Ok(role.and_then(|r| Role::parse(&r)))
    }

    async fn upsert_member(&self, ns: &str, sub: &str, role: Role) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO namespace_members (namespace, sub, role) VALUES ($1, $2, $3)
               ON CONFLICT (namespace, sub) DO UPDATE SET role = EXCLUDED.role"#,
        )
        .bind(ns)
        .bind(sub)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_member(&self, ns: &str, sub: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM namespace_members WHERE namespace = $1 AND sub = $2")
            .bind(ns)
            .bind(sub)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_group_bindings(&self, ns: &str) -> StoreResult<Vec<GroupBinding>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"SELECT namespace, "group", role FROM group_bindings WHERE namespace = $1 ORDER BY "group""#,
        )
        .bind(ns)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(namespace, group, role)| {
                Ok(GroupBinding {
                    namespace,
                    group,
                    role: Role::parse(&role)
                        .ok_or_else(|| StoreError::Internal(anyhow::anyhow!("bad role {role}")))?,
                })
            })
            .collect()
    }

    async fn upsert_group_binding(&self, ns: &str, group: &str, role: Role) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO group_bindings (namespace, "group", role) VALUES ($1, $2, $3)
               ON CONFLICT (namespace, "group") DO UPDATE SET role = EXCLUDED.role"#,
        )
        .bind(ns)
        .bind(group)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_group_binding(&self, ns: &str, group: &str) -> StoreResult<()> {
        let result = sqlx::query(r#"DELETE FROM group_bindings WHERE namespace = $1 AND "group" = $2"#)
            .bind(ns)
            .bind(group)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn group_roles_for(&self, ns: &str, groups: &[String]) -> StoreResult<Vec<Role>> {
        if groups.is_empty() {
            return Ok(vec![]);
        }
        let rows: Vec<String> = sqlx::query_scalar(
            r#"SELECT role FROM group_bindings WHERE namespace = $1 AND "group" = ANY($2)"#,
        )
        .bind(ns)
        .bind(groups)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().filter_map(|r| Role::parse(&r)).collect())
    }

    async fn create_credential(
        &self,
        ns: &str,
        access_key: &str,
        encrypted_secret: EncryptedSecret,
        description: &str,
        scopes: Vec<String>,
    ) -> StoreResult<ApiCredential> {
        let row: CredentialRow = sqlx::query_as(
            r#"INSERT INTO api_credentials
                   (namespace, access_key, encrypted_dek, dek_nonce, encrypted_secret, secret_nonce, description, scopes)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING id, namespace, access_key, description, scopes, enabled, created_at, updated_at"#,
        )
        .bind(ns)
        .bind(access_key)
        .bind(&encrypted_secret.encrypted_dek)
        .bind(&encrypted_secret.dek_nonce)
        .bind(&encrypted_secret.encrypted_secret)
        .bind(&encrypted_secret.secret_nonce)
        .bind(description)
        .bind(&scopes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict("access key already exists".to_string())
            }
            _ => StoreError::Database(e),
        })?;
        Ok(row.into())
    }

    async fn get_credential_by_access_key(
        &self,
        access_key: &str,
    ) -> StoreResult<Option<(ApiCredential, EncryptedSecret)>> {
        let row = sqlx::query(
            r#"SELECT id, namespace, access_key, description, scopes, enabled, created_at, updated_at,
                      encrypted_dek, dek_nonce, encrypted_secret, secret_nonce
               FROM api_credentials WHERE access_key = $1 AND enabled = true"#,
        )
        .bind(access_key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let cred = ApiCredential {
            id: row.try_get("id")?,
            namespace: row.try_get("namespace")?,
            access_key: row.try_get("access_key")?,
            description: row.try_get("description")?,
            scopes: row.try_get("scopes")?,
            enabled: row.try_get("enabled")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        };
        let enc = EncryptedSecret {
            encrypted_dek: row.try_get("encrypted_dek")?,
            dek_nonce: row.try_get("dek_nonce")?,
            encrypted_secret: row.try_get("encrypted_secret")?,
            secret_nonce: row.try_get("secret_nonce")?,
        };
        Ok(Some((cred, enc)))
    }

    async fn list_credentials(&self, ns: &str) -> StoreResult<Vec<ApiCredential>> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            "SELECT id, namespace, access_key, description, scopes, enabled, created_at, updated_at FROM api_credentials WHERE namespace = $1 ORDER BY created_at DESC",
        )
        .bind(ns)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_credential(&self, ns: &str, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM api_credentials WHERE namespace = $1 AND id = $2")
            .bind(ns)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn credentials_count(&self, ns: &str) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM api_credentials WHERE namespace = $1")
            .bind(ns)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn active_signing_key(&self) -> StoreResult<Option<SigningKey>> {
        let row = sqlx::query_as::<_, SigningKeyRow>(
            "SELECT kid, secret, status, created_at, expires_at FROM jwt_signing_keys WHERE status = 'active' ORDER BY created_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn valid_signing_keys(&self) -> StoreResult<Vec<SigningKey>> {
        let rows = sqlx::query_as::<_, SigningKeyRow>(
            r#"SELECT kid, secret, status, created_at, expires_at FROM jwt_signing_keys
               WHERE status = 'active' OR (status = 'retired' AND (expires_at IS NULL OR expires_at > now()))"#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_signing_key(&self, kid: &str) -> StoreResult<Option<SigningKey>> {
        let row = sqlx::query_as::<_, SigningKeyRow>(
            "SELECT kid, secret, status, created_at, expires_at FROM jwt_signing_keys WHERE kid = $1",
        )
        .bind(kid)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn insert_signing_key(&self, kid: &str, secret: &[u8]) -> StoreResult<()> {
        sqlx::query("INSERT INTO jwt_signing_keys (kid, secret, status) VALUES ($1, $2, 'active')")
            .bind(kid)
            .bind(secret)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn rotate_signing_keys(&self, grace_secs: i64) -> StoreResult<SigningKey> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE jwt_signing_keys SET status = 'retired', expires_at = now() + ($1 || ' seconds')::INTERVAL WHERE status = 'active'",
        )
        .bind(grace_secs.to_string())
        .execute(&mut *tx)
        .await?;

        let kid = format!("k-{}", hex::encode(rand_bytes::<8>()));
        let secret = rand_bytes::<32>();

        let row: SigningKeyRow = sqlx::query_as(
            r#"INSERT INTO jwt_signing_keys (kid, secret, status) VALUES ($1, $2, 'active')
               RETURNING kid, secret, status, created_at, expires_at"#,
        )
        .bind(&kid)
        .bind(&secret[..])
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM jwt_signing_keys WHERE expires_at < now()")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn upsert_instance_status(&self, ns: &str, id: &str, status: &str, config_revision: i64) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO gateway_instances (namespace, id, status, config_revision, updated_at)
               VALUES ($1, $2, $3, $4, now())
               ON CONFLICT (namespace, id) DO UPDATE SET
                   status = EXCLUDED.status, config_revision = EXCLUDED.config_revision, updated_at = now()"#,
        )
        .bind(ns)
        .bind(id)
        .bind(status)
        .bind(config_revision)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_instance_status(&self, ns: &str) -> StoreResult<Vec<InstanceStatus>> {
        let rows: Vec<(String, String, String, i64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT namespace, id, status, config_revision, updated_at FROM gateway_instances WHERE namespace = $1 ORDER BY id",
        )
        .bind(ns)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(namespace, id, status, config_revision, updated_at)| InstanceStatus {
                namespace,
                id,
                status,
                config_revision,
                updated_at,
            })
            .collect())
    }

    async fn upsert_controller_status(
        &self,
        ns: &str,
        id: &str,
        status: &str,
        config_revision: i64,
        is_leader: bool,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO controller_status (namespace, id, status, config_revision, is_leader, updated_at)
               VALUES ($1, $2, $3, $4, $5, now())
               ON CONFLICT (namespace, id) DO UPDATE SET
                   status = EXCLUDED.status, config_revision = EXCLUDED.config_revision,
                   is_leader = EXCLUDED.is_leader, updated_at = now()"#,
        )
        .bind(ns)
        .bind(id)
        .bind(status)
        .bind(config_revision)
        .bind(is_leader)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_controller_status(&self, ns: &str) -> StoreResult<Vec<ControllerStatus>> {
        let rows: Vec<(String, String, String, i64, bool, DateTime<Utc>)> = sqlx::query_as(
            "SELECT namespace, id, status, config_revision, is_leader, updated_at FROM controller_status WHERE namespace = $1 ORDER BY id",
        )
        .bind(ns)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(namespace, id, status, config_revision, is_leader, updated_at)| ControllerStatus {
                namespace,
                id,
                status,
                config_revision,
                is_leader,
                updated_at,
            })
            .collect())
    }

    async fn mark_stale_instances(&self, threshold_secs: i64) -> StoreResult<Vec<StaleKey>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"UPDATE gateway_instances SET status = 'offline'
               WHERE status != 'offline' AND updated_at < now() - ($1 || ' seconds')::INTERVAL
               RETURNING namespace, id"#,
        )
        .bind(threshold_secs.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_stale_controllers(&self, threshold_secs: i64) -> StoreResult<Vec<StaleKey>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"UPDATE controller_status SET status = 'offline'
               WHERE status != 'offline' AND updated_at < now() - ($1 || ' seconds')::INTERVAL
               RETURNING namespace, id"#,
        )
        .bind(threshold_secs.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

fn rand_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;
    let mut buf = [0u8; N];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

#[derive(sqlx::FromRow)]
struct UserRow {
    sub: String,
    username: String,
    email: String,
    name: String,
    is_admin: bool,
    password_hash: String,
    must_change_password: bool,
    last_seen: Option<DateTime<Utc>>,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        User {
            sub: r.sub,
            username: r.username,
            email: r.email,
            name: r.name,
            is_admin: r.is_admin,
            password_hash: r.password_hash,
            must_change_password: r.must_change_password,
            last_seen: r.last_seen,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    namespace: String,
    access_key: String,
    description: String,
    scopes: Vec<String>,
    enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CredentialRow> for ApiCredential {
    fn from(r: CredentialRow) -> Self {
        ApiCredential {
            id: r.id,
            namespace: r.namespace,
            access_key: r.access_key,
            description: r.description,
            scopes: r.scopes,
            enabled: r.enabled,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SigningKeyRow {
    kid: String,
    secret: Vec<u8>,
    status: String,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<SigningKeyRow> for SigningKey {
    type Error = StoreError;

    fn try_from(r: SigningKeyRow) -> Result<Self, Self::Error> {
        Ok(SigningKey {
            kid: r.kid,
            secret: r.secret,
            status: KeyStatus::parse(&r.status)
                .ok_or_else(|| StoreError::Internal(anyhow::anyhow!("bad status {}", r.status)))?,
            created_at: r.created_at,
            expires_at: r.expires_at,
        })
    }
}
