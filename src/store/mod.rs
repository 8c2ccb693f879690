//! The store abstraction: a single flat interface consumed by every HTTP
//! handler, with one production implementation (`postgres`) and one
//! in-memory test double (`memory`). No inheritance, no hidden state —
//! every method takes the tenant namespace explicitly and returns a typed
//! error whose variants the callers (handlers, `errors::AppError`) know how
//! to translate to HTTP status codes.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rbac::Role;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// `kind ∈ {domain, cluster}` — the only two entity kinds the versioned
/// config store manages (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Domain,
    Cluster,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Domain => "domain",
            EntityKind::Cluster => "cluster",
        }
    }

    pub fn parse(s: &str) -> Option<EntityKind> {
        match s {
            "domain" => Some(EntityKind::Domain),
            "cluster" => Some(EntityKind::Cluster),
            _ => None,
        }
    }
}

/// `action ∈ {create, update, delete, rollback, import}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
    Rollback,
    Import,
}

impl ChangeAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
            ChangeAction::Rollback => "rollback",
            ChangeAction::Import => "import",
        }
    }

    pub fn parse(s: &str) -> Option<ChangeAction> {
        match s {
            "create" => Some(ChangeAction::Create),
            "update" => Some(ChangeAction::Update),
            "delete" => Some(ChangeAction::Delete),
            "rollback" => Some(ChangeAction::Rollback),
            "import" => Some(ChangeAction::Import),
            _ => None,
        }
    }
}

/// A live domain/cluster row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntity {
    pub namespace: String,
    pub kind: EntityKind,
    pub name: String,
    pub payload: serde_json::Value,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A `config_history` row. `payload` is null for a delete marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub namespace: String,
    pub kind: EntityKind,
    pub name: String,
    pub version: i64,
    pub action: ChangeAction,
    pub operator: String,
    pub payload: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// A `change_log` row — the unit the change feed streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub revision: i64,
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub action: ChangeAction,
    pub operator: String,
    pub payload: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub sub: String,
    pub username: String,
    pub email: String,
    pub name: String,
    pub is_admin: bool,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub must_change_password: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceMember {
    pub namespace: String,
    pub sub: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupBinding {
    pub namespace: String,
    pub group: String,
    pub role: Role,
}

/// `(id, namespace, access_key, secret_key, description, scopes, enabled,
/// created_at, updated_at)`. The `secret_key` is never stored in the
/// clear; it is envelope-encrypted (see [`EncryptedSecret`]) the same way
/// `vault::builtin` encrypts upstream credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCredential {
    pub id: uuid::Uuid,
    pub namespace: String,
    pub access_key: String,
    pub description: String,
    pub scopes: Vec<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// AES-256-GCM envelope-encrypted blob: a per-secret DEK, itself
/// encrypted under the process-wide master key (KEK).
#[derive(Debug, Clone)]
pub struct EncryptedSecret {
    pub encrypted_dek: Vec<u8>,
    pub dek_nonce: Vec<u8>,
    pub encrypted_secret: Vec<u8>,
    pub secret_nonce: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Retired,
}

impl KeyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Retired => "retired",
        }
    }

    pub fn parse(s: &str) -> Option<KeyStatus> {
        match s {
            "active" => Some(KeyStatus::Active),
            "retired" => Some(KeyStatus::Retired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningKey {
    pub kid: String,
    #[serde(skip_serializing)]
    pub secret: Vec<u8>,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub namespace: String,
    pub id: String,
    pub status: String,
    pub config_revision: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub namespace: String,
    pub id: String,
    pub status: String,
    pub config_revision: i64,
    pub is_leader: bool,
    pub updated_at: DateTime<Utc>,
}

/// Tenant + component identifier used by `mark_stale_*`.
pub type StaleKey = (String, String);

#[async_trait]
pub trait Store: Send + Sync {
    // -- Namespaces --
    async fn ensure_namespace(&self, name: &str) -> StoreResult<()>;
    async fn list_namespaces(&self) -> StoreResult<Vec<Namespace>>;
    async fn namespace_exists(&self, name: &str) -> StoreResult<bool>;

    // -- Versioned config store (§4.3) --
    async fn list(&self, ns: &str, kind: EntityKind) -> StoreResult<Vec<ConfigEntity>>;
    async fn get(&self, ns: &str, kind: EntityKind, name: &str) -> StoreResult<ConfigEntity>;
    async fn put(
        &self,
        ns: &str,
        kind: EntityKind,
        name: &str,
        payload: serde_json::Value,
        action: ChangeAction,
        operator: &str,
        expected_version: i64,
    ) -> StoreResult<ConfigEntity>;
    async fn delete(
        &self,
        ns: &str,
        kind: EntityKind,
        name: &str,
        operator: &str,
    ) -> StoreResult<i64>;
    async fn replace_all(
        &self,
        ns: &str,
        domains: Vec<(String, serde_json::Value)>,
        clusters: Vec<(String, serde_json::Value)>,
        operator: &str,
    ) -> StoreResult<()>;
    async fn history(
        &self,
        ns: &str,
        kind: EntityKind,
        name: &str,
    ) -> StoreResult<Vec<HistoryEntry>>;
    async fn version(
        &self,
        ns: &str,
        kind: EntityKind,
        name: &str,
        v: i64,
    ) -> StoreResult<HistoryEntry>;
    async fn rollback(
        &self,
        ns: &str,
        kind: EntityKind,
        name: &str,
        v: i64,
        operator: &str,
    ) -> StoreResult<ConfigEntity>;
    async fn current_revision(&self, ns: &str) -> StoreResult<i64>;
    async fn watch_from(&self, ns: &str, since: i64) -> StoreResult<(Vec<ChangeEvent>, i64)>;

    // -- Audit (admin-only, reserved `_global` namespace per §3) --
    async fn log_admin_event(
        &self,
        ns: &str,
        action: ChangeAction,
        operator: &str,
        resource: &str,
        payload: Option<serde_json::Value>,
    ) -> StoreResult<()>;
    async fn list_audit(&self, ns: &str, limit: i64) -> StoreResult<Vec<ChangeEvent>>;

    // -- Users --
    async fn get_user(&self, sub: &str) -> StoreResult<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn upsert_oidc_user(
        &self,
        sub: &str,
        username: &str,
        email: &str,
        name: &str,
        is_admin_on_insert: bool,
    ) -> StoreResult<User>;
    async fn create_builtin_user(
        &self,
        sub: &str,
        username: &str,
        email: &str,
        name: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> StoreResult<User>;
    async fn set_password(
        &self,
        sub: &str,
        password_hash: &str,
        must_change_password: bool,
    ) -> StoreResult<()>;
    async fn touch_last_seen(&self, sub: &str) -> StoreResult<()>;
    async fn list_users(&self) -> StoreResult<Vec<User>>;
    async fn delete_user(&self, sub: &str) -> StoreResult<()>;

    // -- Namespace members & group bindings --
    async fn list_members(&self, ns: &str) -> StoreResult<Vec<NamespaceMember>>;
    async fn get_member_role(&self, ns: &str, sub: &str) -> StoreResult<Option<Role>>;
    async fn upsert_member(&self, ns: &str, sub: &str, role: Role) -> StoreResult<()>;
    async fn remove_member(&self, ns: &str, sub: &str) -> StoreResult<()>;
    async fn list_group_bindings(&self, ns: &str) -> StoreResult<Vec<GroupBinding>>;
    async fn upsert_group_binding(&self, ns: &str, group: &str, role: Role) -> StoreResult<()>;
    async fn remove_group_binding(&self, ns: &str, group: &str) -> StoreResult<()>;
    async fn group_roles_for(&self, ns: &str, groups: &[String]) -> StoreResult<Vec<Role>>;

    // -- API credentials --
    async fn create_credential(
        &self,
        ns: &str,
        access_key: &str,
        encrypted_secret: EncryptedSecret,
        description: &str,
        scopes: Vec<String>,
    ) -> StoreResult<ApiCredential>;
    async fn get_credential_by_access_key(
        &self,
        access_key: &str,
    ) -> StoreResult<Option<(ApiCredential, EncryptedSecret)>>;
    async fn list_credentials(&self, ns: &str) -> StoreResult<Vec<ApiCredential>>;
    async fn delete_credential(&self, ns: &str, id: uuid::Uuid) -> StoreResult<bool>;
    async fn credentials_count(&self, ns: &str) -> StoreResult<i64>;

    // -- JWT signing keys (built-in issuer) --
    async fn active_signing_key(&self) -> StoreResult<Option<SigningKey>>;
    async fn valid_signing_keys(&self) -> StoreResult<Vec<SigningKey>>;
    async fn get_signing_key(&self, kid: &str) -> StoreResult<Option<SigningKey>>;
    async fn insert_signing_key(&self, kid: &str, secret: &[u8]) -> StoreResult<()>;
    async fn rotate_signing_keys(&self, grace_secs: i64) -> StoreResult<SigningKey>;

    // -- Runtime status & reaper --
    async fn upsert_instance_status(
        &self,
        ns: &str,
        id: &str,
        status: &str,
        config_revision: i64,
    ) -> StoreResult<()>;
    async fn list_instance_status(&self, ns: &str) -> StoreResult<Vec<InstanceStatus>>;
    async fn upsert_controller_status(
        &self,
        ns: &str,
        id: &str,
        status: &str,
        config_revision: i64,
        is_leader: bool,
    ) -> StoreResult<()>;
    async fn list_controller_status(&self, ns: &str) -> StoreResult<Vec<ControllerStatus>>;
    async fn mark_stale_instances(&self, threshold_secs: i64) -> StoreResult<Vec<StaleKey>>;
    async fn mark_stale_controllers(&self, threshold_secs: i64) -> StoreResult<Vec<StaleKey>>;
}
