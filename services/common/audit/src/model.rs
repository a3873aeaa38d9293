use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuditActor {
    pub id: Option<Uuid>,
    pub name: Option<String>,
}

pub const AUDIT_EVENT_VERSION: i32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    #[default]
    Info,
    Warning,
    Security,
    Compliance,
}

/// Append-only audit record. `before`/`after` carry a JSON snapshot of the
/// mutated resource around the action, when the caller has one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub event_version: i32,
    pub actor: AuditActor,
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub action: String,
    pub occurred_at: DateTime<Utc>,
    pub source_service: String,
    pub severity: AuditSeverity,
    pub before: serde_json::Value,
    pub after: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("producer not configured")]
    NotConfigured,
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("sink error: {0}")]
    Sink(String),
}

pub type AuditResult<T> = Result<T, AuditError>;
