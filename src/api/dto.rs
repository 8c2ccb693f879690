//! Shared request/response shapes used across the `/api/v1` handlers.

use serde::{Deserialize, Serialize};

use crate::store::{ChangeEvent, ConfigEntity, HistoryEntry};

#[derive(Debug, Serialize)]
pub struct ConfigEntityResponse {
    pub name: String,
    pub namespace: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub version: i64,
    /// Same value as `version`, named to match the optimistic-concurrency
    /// field clients send back on the next `PUT`.
    pub resource_version: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<ConfigEntity> for ConfigEntityResponse {
    fn from(e: ConfigEntity) -> Self {
        Self {
            name: e.name,
            namespace: e.namespace,
            kind: e.kind.as_str().to_string(),
            payload: e.payload,
            version: e.version,
            resource_version: e.version,
            created_at: e.created_at,
            updated_at: e.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T: Serialize> {
    pub total: usize,
    #[serde(flatten)]
    pub items: ListItems<T>,
}

/// Flattened so the JSON body reads `{"domains": [...], "total": N}`
/// rather than a generic `{"items": [...]}` — matches S1's literal
/// `{"domains": [], "total": 0}`.
#[derive(Debug, Serialize)]
pub struct ListItems<T: Serialize> {
    #[serde(rename = "domains", skip_serializing_if = "Option::is_none")]
    pub domains: Option<Vec<T>>,
    #[serde(rename = "clusters", skip_serializing_if = "Option::is_none")]
    pub clusters: Option<Vec<T>>,
}

#[derive(Debug, Serialize)]
pub struct HistoryEntryResponse {
    pub version: i64,
    pub action: String,
    pub operator: String,
    pub payload: Option<serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<HistoryEntry> for HistoryEntryResponse {
    fn from(h: HistoryEntry) -> Self {
        Self {
            version: h.version,
            action: h.action.as_str().to_string(),
            operator: h.operator,
            payload: h.payload,
            timestamp: h.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChangeEventResponse {
    pub revision: i64,
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub action: String,
    pub operator: String,
    pub payload: Option<serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<ChangeEvent> for ChangeEventResponse {
    fn from(e: ChangeEvent) -> Self {
        Self {
            revision: e.revision,
            namespace: e.namespace,
            kind: e.kind,
            name: e.name,
            action: e.action.as_str().to_string(),
            operator: e.operator,
            payload: e.payload,
            timestamp: e.timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub version: i64,
}

#[derive(Debug, Deserialize)]
pub struct WatchQuery {
    #[serde(default)]
    pub revision: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceAllRequest {
    #[serde(default)]
    pub domains: Vec<serde_json::Value>,
    #[serde(default)]
    pub clusters: Vec<serde_json::Value>,
}
