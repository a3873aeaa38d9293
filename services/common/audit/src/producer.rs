use crate::{AuditActor, AuditEvent, AuditResult, AuditSeverity, AUDIT_EVENT_VERSION};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Destination for audit events. The settlement engine emits to a sink but
/// never depends on its availability for correctness; sink failures are
/// counted and logged by the producer, not surfaced to callers.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> AuditResult<()>;
}

/// Sink that writes structured audit lines through `tracing`.
pub struct TracingAuditSink;

#[async_trait::async_trait]
impl AuditSink for TracingAuditSink {
    async fn append(&self, event: &AuditEvent) -> AuditResult<()> {
        tracing::info!(
            target: "audit",
            event_id = %event.event_id,
            actor = ?event.actor.id,
            action = %event.action,
            resource_type = %event.resource_type,
            resource_id = ?event.resource_id,
            "audit event"
        );
        Ok(())
    }
}

/// Sink that drops everything; used when auditing is disabled.
pub struct NoopAuditSink;

#[async_trait::async_trait]
impl AuditSink for NoopAuditSink {
    async fn append(&self, _event: &AuditEvent) -> AuditResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuditSnapshot {
    pub emitted: u64,
    pub dropped: u64,
}

/// Fire-and-forget producer over an [`AuditSink`]. Emission never fails from
/// the caller's perspective; dropped events are counted for the snapshot
/// endpoint.
#[derive(Clone)]
pub struct AuditProducer {
    sink: Arc<dyn AuditSink>,
    source_service: &'static str,
    emitted: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl AuditProducer {
    pub fn new(sink: Arc<dyn AuditSink>, source_service: &'static str) -> Self {
        Self {
            sink,
            source_service,
            emitted: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn emit(
        &self,
        actor: AuditActor,
        resource_type: impl Into<String>,
        resource_id: Option<Uuid>,
        action: impl Into<String>,
        severity: AuditSeverity,
        before: serde_json::Value,
        after: serde_json::Value,
    ) -> AuditEvent {
        let event = AuditEvent {
            event_id: Uuid::new_v4(),
            event_version: AUDIT_EVENT_VERSION,
            actor,
            resource_type: resource_type.into(),
            resource_id,
            action: action.into(),
            occurred_at: Utc::now(),
            source_service: self.source_service.to_string(),
            severity,
            before,
            after,
        };
        match self.sink.append(&event).await {
            Ok(()) => {
                self.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %err, action = %event.action, "audit sink append failed; event dropped");
            }
        }
        event
    }

    pub fn snapshot(&self) -> AuditSnapshot {
        AuditSnapshot {
            emitted: self.emitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuditError;

    struct FailingSink;

    #[async_trait::async_trait]
    impl AuditSink for FailingSink {
        async fn append(&self, _event: &AuditEvent) -> AuditResult<()> {
            Err(AuditError::Sink("down".into()))
        }
    }

    #[tokio::test]
    async fn emit_counts_and_never_errors() {
        let producer = AuditProducer::new(Arc::new(NoopAuditSink), "settlement-service");
        producer
            .emit(
                AuditActor::default(),
                "refund",
                Some(Uuid::new_v4()),
                "refund.completed",
                AuditSeverity::Info,
                serde_json::Value::Null,
                serde_json::json!({"status": "completed"}),
            )
            .await;
        assert_eq!(producer.snapshot().emitted, 1);
        assert_eq!(producer.snapshot().dropped, 0);
    }

    #[tokio::test]
    async fn sink_failure_is_swallowed() {
        let producer = AuditProducer::new(Arc::new(FailingSink), "settlement-service");
        producer
            .emit(
                AuditActor::default(),
                "refund",
                None,
                "refund.completed",
                AuditSeverity::Info,
                serde_json::Value::Null,
                serde_json::Value::Null,
            )
            .await;
        assert_eq!(producer.snapshot().dropped, 1);
    }
}
