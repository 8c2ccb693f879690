//! In-memory `Store` implementation used by handler and CLI tests so they
//! don't need a live Postgres. Mirrors the transactional guarantees of
//! [`super::postgres::PgStore`] (live row + history + change-log move
//! together) by holding everything behind one mutex and updating all three
//! under a single lock acquisition.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::rbac::Role;

use super::{
    ApiCredential, ChangeAction, ChangeEvent, ConfigEntity, ControllerStatus, EncryptedSecret,
    EntityKind, GroupBinding, HistoryEntry, InstanceStatus, KeyStatus, Namespace,
    NamespaceMember, SigningKey, StaleKey, Store, StoreError, StoreResult, User,
};

#[derive(Default)]
struct Inner {
    namespaces: HashMap<String, Namespace>,
    entities: HashMap<(String, EntityKind, String), ConfigEntity>,
    history: Vec<HistoryEntry>,
    change_log: Vec<ChangeEvent>,
    next_history_id: i64,
    next_revision: i64,
    users: HashMap<String, User>,
    members: HashMap<(String, String), Role>,
    group_bindings: HashMap<(String, String), Role>,
    credentials: HashMap<Uuid, (ApiCredential, EncryptedSecret)>,
    signing_keys: HashMap<String, SigningKey>,
    instances: HashMap<(String, String), InstanceStatus>,
    controllers: HashMap<(String, String), ControllerStatus>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let mut inner = Inner::default();
        for ns in ["default", "_global"] {
            inner.namespaces.insert(
                ns.to_string(),
                Namespace {
                    name: ns.to_string(),
                    created_at: Utc::now(),
                },
            );
        }
        Self {
            inner: Mutex::new(inner),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ensure_namespace(&self, name: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.namespaces.entry(name.to_string()).or_insert(Namespace {
            name: name.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_namespaces(&self) -> StoreResult<Vec<Namespace>> {
        let inner = self.lock();
        let mut out: Vec<_> = inner.namespaces.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn namespace_exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.lock().namespaces.contains_key(name))
    }

    async fn list(&self, ns: &str, kind: EntityKind) -> StoreResult<Vec<ConfigEntity>> {
        let inner = self.lock();
        let mut out: Vec<_> = inner
            .entities
            .iter()
            .filter(|((n, k, _), _)| n == ns && *k == kind)
            .map(|(_, v)| v.clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn get(&self, ns: &str, kind: EntityKind, name: &str) -> StoreResult<ConfigEntity> {
        self.lock()
            .entities
            .get(&(ns.to_string(), kind, name.to_string()))
            .cloned()
            .ok_or(StoreError::NotFound)
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
        let mut inner = self.lock();
        let key = (ns.to_string(), kind, name.to_string());
        let current_version = inner.entities.get(&key).map(|e| e.version);

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

        let now = Utc::now();
        let created_at = inner.entities.get(&key).map(|e| e.created_at).unwrap_or(now);
        let entity = ConfigEntity {
            namespace: ns.to_string(),
            kind,
            name: name.to_string(),
            payload: payload.clone(),
            version: next_version,
            created_at,
            updated_at: now,
        };
        inner.entities.insert(key, entity.clone());

        push_history(&mut inner, ns, kind, name, next_version, action, operator, Some(payload.clone()));
        push_change_log(&mut inner, ns, kind.as_str(), name, action, operator, Some(payload));

        Ok(entity)
    }

    async fn delete(&self, ns: &str, kind: EntityKind, name: &str, operator: &str) -> StoreResult<i64> {
        let mut inner = self.lock();
        let key = (ns.to_string(), kind, name.to_string());
        let existing = inner.entities.remove(&key).ok_or(StoreError::NotFound)?;
        let next_version = existing.version + 1;

        push_history(
            &mut inner,
            ns,
            kind,
            name,
            next_version,
            ChangeAction::Delete,
            operator,
            Some(existing.payload),
        );
        push_change_log(&mut inner, ns, kind.as_str(), name, ChangeAction::Delete, operator, None);

        Ok(next_version)
    }

    async fn replace_all(
        &self,
        ns: &str,
        domains: Vec<(String, serde_json::Value)>,
        clusters: Vec<(String, serde_json::Value)>,
        operator: &str,
    ) -> StoreResult<()> {
        let mut inner = self.lock();

        for (kind, incoming) in [(EntityKind::Domain, domains), (EntityKind::Cluster, clusters)] {
            let existing_names: Vec<String> = inner
                .entities
                .keys()
                .filter(|(n, k, _)| n == ns && *k == kind)
                .map(|(_, _, name)| name.clone())
                .collect();
            let incoming_names: std::collections::HashSet<&str> =
                incoming.iter().map(|(n, _)| n.as_str()).collect();

            for removed in existing_names.iter().filter(|n| !incoming_names.contains(n.as_str())) {
                inner.entities.remove(&(ns.to_string(), kind, removed.clone()));
                push_change_log(&mut inner, ns, kind.as_str(), removed, ChangeAction::Delete, operator, None);
            }

            for (name, payload) in incoming {
                let now = Utc::now();
                let entity = ConfigEntity {
                    namespace: ns.to_string(),
                    kind,
                    name: name.clone(),
                    payload: payload.clone(),
                    version: 1,
                    created_at: now,
                    updated_at: now,
                };
                inner
                    .entities
                    .insert((ns.to_string(), kind, name.clone()), entity);
                push_history(
                    &mut inner,
                    ns,
                    kind,
                    &name,
                    1,
                    ChangeAction::Import,
                    operator,
                    Some(payload.clone()),
                );
                push_change_log(&mut inner, ns, kind.as_str(), &name, ChangeAction::Import, operator, Some(payload));
            }
        }

        Ok(())
    }

    async fn history(&self, ns: &str, kind: EntityKind, name: &str) -> StoreResult<Vec<HistoryEntry>> {
        let inner = self.lock();
        let mut out: Vec<_> = inner
            .history
            .iter()
            .filter(|h| h.namespace == ns && h.kind == kind && h.name == name)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.version.cmp(&a.version));
        out.truncate(50);
        Ok(out)
    }

    async fn version(&self, ns: &str, kind: EntityKind, name: &str, v: i64) -> StoreResult<HistoryEntry> {
        self.lock()
            .history
            .iter()
            .find(|h| h.namespace == ns && h.kind == kind && h.name == name && h.version == v)
            .cloned()
            .ok_or(StoreError::NotFound)
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
        let expected_version = self.get(ns, kind, name).await.map(|e| e.version).unwrap_or(0);
        self.put(ns, kind, name, payload, ChangeAction::Rollback, operator, expected_version)
            .await
    }

    async fn current_revision(&self, ns: &str) -> StoreResult<i64> {
        Ok(self
            .lock()
            .change_log
            .iter()
            .filter(|e| e.namespace == ns)
            .map(|e| e.revision)
            .max()
            .unwrap_or(0))
    }

    async fn watch_from(&self, ns: &str, since: i64) -> StoreResult<(Vec<ChangeEvent>, i64)> {
        let inner = self.lock();
        let mut events: Vec<_> = inner
            .change_log
            .iter()
            .filter(|e| e.namespace == ns && e.revision > since)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.revision);
        events.truncate(100);
        let max_revision = events.last().map(|e| e.revision).unwrap_or(0);
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
        let mut inner = self.lock();
        push_change_log(&mut inner, ns, "admin", resource, action, operator, payload);
        Ok(())
    }

    async fn list_audit(&self, ns: &str, limit: i64) -> StoreResult<Vec<ChangeEvent>> {
        let inner = self.lock();
        let mut out: Vec<_> = inner
            .change_log
            .iter()
            .filter(|e| e.namespace == ns)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.revision.cmp(&a.revision));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn get_user(&self, sub: &str) -> StoreResult<Option<User>> {
        Ok(self.lock().users.get(sub).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn upsert_oidc_user(
        &self,
        sub: &str,
        username: &str,
        email: &str,
        name: &str,
        is_admin_on_insert: bool,
    ) -> StoreResult<User> {
        let mut inner = self.lock();
        let user = inner
            .users
            .entry(sub.to_string())
            .and_modify(|u| {
                u.username = username.to_string();
                u.email = email.to_string();
                u.name = name.to_string();
                u.last_seen = Some(Utc::now());
            })
            .or_insert_with(|| User {
                sub: sub.to_string(),
                username: username.to_string(),
                email: email.to_string(),
                name: name.to_string(),
                is_admin: is_admin_on_insert,
                password_hash: String::new(),
                must_change_password: false,
                last_seen: Some(Utc::now()),
            });
        Ok(user.clone())
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
        let mut inner = self.lock();
        if inner.users.values().any(|u| u.email.eq_ignore_ascii_case(email)) {
            return Err(StoreError::Conflict(format!("user {email} already exists")));
        }
        let user = User {
            sub: sub.to_string(),
            username: username.to_string(),
            email: email.to_string(),
            name: name.to_string(),
            is_admin,
            password_hash: password_hash.to_string(),
            must_change_password: false,
            last_seen: None,
        };
        inner.users.insert(sub.to_string(), user.clone());
        Ok(user)
    }

    async fn set_password(&self, sub: &str, password_hash: &str, must_change_password: bool) -> StoreResult<()> {
        let mut inner = self.lock();
        let user = inner.users.get_mut(sub).ok_or(StoreError::NotFound)?;
        user.password_hash = password_hash.to_string();
        user.must_change_password = must_change_password;
        Ok(())
    }

    async fn touch_last_seen(&self, sub: &str) -> StoreResult<()> {
        if let Some(u) = self.lock().users.get_mut(sub) {
            u.last_seen = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let mut out: Vec<_> = self.lock().users.values().cloned().collect();
        out.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(out)
    }

    async fn delete_user(&self, sub: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.users.remove(sub).is_none() {
            return Err(StoreError::NotFound);
        }
        inner.members.retain(|(_, s), _| s != sub);
        Ok(())
    }

    async fn list_members(&self, ns: &str) -> StoreResult<Vec<NamespaceMember>> {
        let mut out: Vec<_> = self
            .lock()
            .members
            .iter()
            .filter(|((n, _), _)| n == ns)
            .map(|((namespace, sub), role)| NamespaceMember {
                namespace: namespace.clone(),
                sub: sub.clone(),
                role: *role,
            })
            .collect();
        out.sort_by(|a, b| a.sub.cmp(&b.sub));
        Ok(out)
    }

    async fn get_member_role(&self, ns: &str, sub: &str) -> StoreResult<Option<Role>> {
        Ok(self.lock().members.get(&(ns.to_string(), sub.to_string())).copied())
    }

    async fn upsert_member(&self, ns: &str, sub: &str, role: Role) -> StoreResult<()> {
        self.lock().members.insert((ns.to_string(), sub.to_string()), role);
        Ok(())
    }

    async fn remove_member(&self, ns: &str, sub: &str) -> StoreResult<()> {
        self.lock()
            .members
            .remove(&(ns.to_string(), sub.to_string()))
            .ok_or(StoreError::NotFound)?;
        Ok(())
    }

    async fn list_group_bindings(&self, ns: &str) -> StoreResult<Vec<GroupBinding>> {
        let mut out: Vec<_> = self
            .lock()
            .group_bindings
            .iter()
            .filter(|((n, _), _)| n == ns)
            .map(|((namespace, group), role)| GroupBinding {
                namespace: namespace.clone(),
                group: group.clone(),
                role: *role,
            })
            .collect();
        out.sort_by(|a, b| a.group.cmp(&b.group));
        Ok(out)
    }

    async fn upsert_group_binding(&self, ns: &str, group: &str, role: Role) -> StoreResult<()> {
        self.lock()
            .group_bindings
            .insert((ns.to_string(), group.to_string()), role);
        Ok(())
    }

    async fn remove_group_binding(&self, ns: &str, group: &str) -> StoreResult<()> {
        self.lock()
            .group_bindings
            .remove(&(ns.to_string(), group.to_string()))
            .ok_or(StoreError::NotFound)?;
        Ok(())
    }

    async fn group_roles_for(&self, ns: &str, groups: &[String]) -> StoreResult<Vec<Role>> {
        let inner = self.lock();
        Ok(groups
            .iter()
            .filter_map(|g| inner.group_bindings.get(&(ns.to_string(), g.clone())).copied())
            .collect())
    }

    async fn create_credential(
        &self,
        ns: &str,
        access_key: &str,
        encrypted_secret: EncryptedSecret,
        description: &str,
        scopes: Vec<String>,
    ) -> StoreResult<ApiCredential> {
        let mut inner = self.lock();
        if inner
            .credentials
            .values()
            .any(|(c, _)| c.access_key == access_key)
        {
            return Err(StoreError::Conflict("access key already exists".to_string()));
        }
        let now = Utc::now();
        let cred = ApiCredential {
            id: Uuid::new_v4(),
            namespace: ns.to_string(),
            access_key: access_key.to_string(),
            description: description.to_string(),
            scopes,
            enabled: true,
            created_at: now,
            updated_at: now,
        };
        inner.credentials.insert(cred.id, (cred.clone(), encrypted_secret));
        Ok(cred)
    }

    async fn get_credential_by_access_key(
        &self,
        access_key: &str,
    ) -> StoreResult<Option<(ApiCredential, EncryptedSecret)>> {
        Ok(self
            .lock()
            .credentials
            .values()
            .find(|(c, _)| c.access_key == access_key && c.enabled)
            .cloned())
    }

    async fn list_credentials(&self, ns: &str) -> StoreResult<Vec<ApiCredential>> {
        let mut out: Vec<_> = self
            .lock()
            .credentials
            .values()
            .filter(|(c, _)| c.namespace == ns)
            .map(|(c, _)| c.clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn delete_credential(&self, ns: &str, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.lock();
        let matches = inner
            .credentials
            .get(&id)
            .map(|(c, _)| c.namespace == ns)
            .unwrap_or(false);
        if matches {
            inner.credentials.remove(&id);
        }
        Ok(matches)
    }

    async fn credentials_count(&self, ns: &str) -> StoreResult<i64> {
        Ok(self
            .lock()
            .credentials
            .values()
            .filter(|(c, _)| c.namespace == ns)
            .count() as i64)
    }

    async fn active_signing_key(&self) -> StoreResult<Option<SigningKey>> {
        Ok(self
            .lock()
            .signing_keys
            .values()
            .filter(|k| k.status == KeyStatus::Active)
            .max_by_key(|k| k.created_at)
            .cloned())
    }

    async fn valid_signing_keys(&self) -> StoreResult<Vec<SigningKey>> {
        let now = Utc::now();
        Ok(self
            .lock()
            .signing_keys
            .values()
            .filter(|k| {
                k.status == KeyStatus::Active
                    || (k.status == KeyStatus::Retired && k.expires_at.map(|e| e > now).unwrap_or(true))
            })
            .cloned()
            .collect())
    }

    async fn get_signing_key(&self, kid: &str) -> StoreResult<Option<SigningKey>> {
        Ok(self.lock().signing_keys.get(kid).cloned())
    }

    async fn insert_signing_key(&self, kid: &str, secret: &[u8]) -> StoreResult<()> {
        self.lock().signing_keys.insert(
            kid.to_string(),
            SigningKey {
                kid: kid.to_string(),
                secret: secret.to_vec(),
                status: KeyStatus::Active,
                created_at: Utc::now(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn rotate_signing_keys(&self, grace_secs: i64) -> StoreResult<SigningKey> {
        let mut inner = self.lock();
        let now = Utc::now();
        let expires_at = now + chrono::Duration::seconds(grace_secs);

        for key in inner.signing_keys.values_mut() {
            if key.status == KeyStatus::Active {
                key.status = KeyStatus::Retired;
                key.expires_at = Some(expires_at);
            }
        }

        let kid = format!("k-{}", Uuid::new_v4().simple());
        let secret: Vec<u8> = (0..32).map(|_| rand::random::<u8>()).collect();
        let new_key = SigningKey {
            kid: kid.clone(),
            secret,
            status: KeyStatus::Active,
            created_at: now,
            expires_at: None,
        };
        inner.signing_keys.insert(kid, new_key.clone());
        inner.signing_keys.retain(|_, k| k.expires_at.map(|e| e >= now).unwrap_or(true));

        Ok(new_key)
    }

    async fn upsert_instance_status(&self, ns: &str, id: &str, status: &str, config_revision: i64) -> StoreResult<()> {
        self.lock().instances.insert(
            (ns.to_string(), id.to_string()),
            InstanceStatus {
                namespace: ns.to_string(),
                id: id.to_string(),
                status: status.to_string(),
                config_revision,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn list_instance_status(&self, ns: &str) -> StoreResult<Vec<InstanceStatus>> {
        let mut out: Vec<_> = self
            .lock()
            .instances
            .values()
            .filter(|i| i.namespace == ns)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn upsert_controller_status(
        &self,
        ns: &str,
        id: &str,
        status: &str,
        config_revision: i64,
        is_leader: bool,
    ) -> StoreResult<()> {
        self.lock().controllers.insert(
            (ns.to_string(), id.to_string()),
            ControllerStatus {
                namespace: ns.to_string(),
                id: id.to_string(),
                status: status.to_string(),
                config_revision,
                is_leader,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn list_controller_status(&self, ns: &str) -> StoreResult<Vec<ControllerStatus>> {
        let mut out: Vec<_> = self
            .lock()
            .controllers
            .values()
            .filter(|c| c.namespace == ns)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn mark_stale_instances(&self, threshold_secs: i64) -> StoreResult<Vec<StaleKey>> {
        let mut inner = self.lock();
        let cutoff = Utc::now() - chrono::Duration::seconds(threshold_secs);
        let mut marked = vec![];
        for i in inner.instances.values_mut() {
            if i.status != "offline" && i.updated_at < cutoff {
                i.status = "offline".to_string();
                marked.push((i.namespace.clone(), i.id.clone()));
            }
        }
        Ok(marked)
    }

    async fn mark_stale_controllers(&self, threshold_secs: i64) -> StoreResult<Vec<StaleKey>> {
        let mut inner = self.lock();
        let cutoff = Utc::now() - chrono::Duration::seconds(threshold_secs);
        let mut marked = vec![];
        for c in inner.controllers.values_mut() {
            if c.status != "offline" && c.updated_at < cutoff {
                c.status = "offline".to_string();
                marked.push((c.namespace.clone(), c.id.clone()));
            }
        }
        Ok(marked)
    }
}

#[allow(clippy::too_many_arguments)]
fn push_history(
    inner: &mut Inner,
    ns: &str,
    kind: EntityKind,
    name: &str,
    version: i64,
    action: ChangeAction,
    operator: &str,
    payload: Option<serde_json::Value>,
) {
    inner.next_history_id += 1;
    inner.history.push(HistoryEntry {
        id: inner.next_history_id,
        namespace: ns.to_string(),
        kind,
        name: name.to_string(),
        version,
        action,
        operator: operator.to_string(),
        payload,
        timestamp: Utc::now(),
    });
}

#[allow(clippy::too_many_arguments)]
fn push_change_log(
    inner: &mut Inner,
    ns: &str,
    kind: &str,
    name: &str,
    action: ChangeAction,
    operator: &str,
    payload: Option<serde_json::Value>,
) {
    inner.next_revision += 1;
    inner.change_log.push(ChangeEvent {
        revision: inner.next_revision,
        namespace: ns.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        action,
        operator: operator.to_string(),
        payload,
        timestamp: Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let store = MemoryStore::new();
        store.ensure_namespace("default").await.unwrap();
        let entity = store
            .put(
                "default",
                EntityKind::Domain,
                "api.example.com",
                serde_json::json!({"tls": true}),
                ChangeAction::Create,
                "alice",
                0,
            )
            .await
            .unwrap();
        assert_eq!(entity.version, 1);

        let fetched = store.get("default", EntityKind::Domain, "api.example.com").await.unwrap();
        assert_eq!(fetched.payload, serde_json::json!({"tls": true}));
    }

    #[tokio::test]
    async fn put_rejects_stale_expected_version() {
        let store = MemoryStore::new();
        store
            .put(
                "default",
                EntityKind::Domain,
                "a",
                serde_json::json!({}),
                ChangeAction::Create,
                "alice",
                0,
            )
            .await
            .unwrap();

        let err = store
            .put(
                "default",
                EntityKind::Domain,
                "a",
                serde_json::json!({}),
                ChangeAction::Update,
                "alice",
                0,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_then_replace_all_emits_delete_event() {
        let store = MemoryStore::new();
        store
            .put(
                "default",
                EntityKind::Domain,
                "stale.example.com",
                serde_json::json!({}),
                ChangeAction::Create,
                "alice",
                0,
            )
            .await
            .unwrap();

        store
            .replace_all("default", vec![], vec![], "alice")
            .await
            .unwrap();

        let (events, _) = store.watch_from("default", 0).await.unwrap();
        assert!(events.iter().any(|e| e.action == ChangeAction::Delete && e.name == "stale.example.com"));
    }

    #[tokio::test]
    async fn watch_from_returns_only_newer_revisions() {
        let store = MemoryStore::new();
        store
            .put("default", EntityKind::Domain, "a", serde_json::json!({}), ChangeAction::Create, "op", 0)
            .await
            .unwrap();
        let (events, rev1) = store.watch_from("default", 0).await.unwrap();
        assert_eq!(events.len(), 1);

        store
            .put("default", EntityKind::Domain, "b", serde_json::json!({}), ChangeAction::Create, "op", 0)
            .await
            .unwrap();
        let (events2, rev2) = store.watch_from("default", rev1).await.unwrap();
        assert_eq!(events2.len(), 1);
        assert!(rev2 > rev1);
    }

    #[tokio::test]
    async fn rollback_restores_prior_payload_as_new_version() {
        let store = MemoryStore::new();
        store
            .put("default", EntityKind::Domain, "a", serde_json::json!({"v": 1}), ChangeAction::Create, "op", 0)
            .await
            .unwrap();
        store
            .put("default", EntityKind::Domain, "a", serde_json::json!({"v": 2}), ChangeAction::Update, "op", 1)
            .await
            .unwrap();

        let rolled = store.rollback("default", EntityKind::Domain, "a", 1, "op").await.unwrap();
        assert_eq!(rolled.payload, serde_json::json!({"v": 1}));
        assert_eq!(rolled.version, 3);
    }

    #[tokio::test]
    async fn credential_round_trip_preserves_encrypted_fields() {
        let store = MemoryStore::new();
        let enc = EncryptedSecret {
            encrypted_dek: vec![1, 2, 3],
            dek_nonce: vec![4, 5, 6],
            encrypted_secret: vec![7, 8, 9],
            secret_nonce: vec![10, 11, 12],
        };
        let cred = store
            .create_credential("default", "ak-test", enc, "test key", vec!["config:read".into()])
            .await
            .unwrap();

        let (fetched, fetched_enc) = store
            .get_credential_by_access_key(&cred.access_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.id, cred.id);
        assert_eq!(fetched_enc.encrypted_secret, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn mark_stale_instances_flips_status_past_threshold() {
        let store = MemoryStore::new();
        store.upsert_instance_status("default", "gw-1", "online", 5).await.unwrap();

        let marked = store.mark_stale_instances(0).await.unwrap();
        assert_eq!(marked, vec![("default".to_string(), "gw-1".to_string())]);

        let listed = store.list_instance_status("default").await.unwrap();
        assert_eq!(listed[0].status, "offline");
    }
}
