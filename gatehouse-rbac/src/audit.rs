//! Audit collaborator
//!
//! Mutations report an [`AuditEvent`] after they commit. Sinks never block the
//! caller and never fail the mutation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use gatehouse_config::{AuditConfig, AuditSinkKind};
use gatehouse_storage::entities::audit_logs;
use gatehouse_storage::sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use gatehouse_storage::EntityStore;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

/// A significant mutation, attributed to the actor that performed it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub actor_id: i32,
    /// Dotted event name such as `role.delete`
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: Value,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(actor_id: i32, action: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            actor_id,
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: None,
            details: Value::Null,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_resource_id(mut self, resource_id: impl ToString) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Fire-and-forget audit destination
#[cfg_attr(test, mockall::automock)]
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits audit events as structured log records
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            target: "gatehouse::audit",
            event_id = %event.event_id,
            actor_id = event.actor_id,
            action = %event.action,
            resource_type = %event.resource_type,
            resource_id = event.resource_id.as_deref().unwrap_or("-"),
            details = %event.details,
            "audit"
        );
    }
}

/// Drops every event; used when auditing is disabled
#[derive(Debug, Default, Clone)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

/// Persists events to the `audit_logs` table on a background task
#[derive(Clone)]
pub struct DatabaseAuditSink {
    connection: DatabaseConnection,
}

impl DatabaseAuditSink {
    pub fn new(store: &EntityStore) -> Self {
        Self {
            connection: store.connection().clone(),
        }
    }

    async fn persist(connection: DatabaseConnection, event: AuditEvent) {
        let action = event.action.clone();
        let model = audit_logs::ActiveModel {
            event_id: Set(event.event_id),
            actor_id: Set(event.actor_id),
            action: Set(event.action),
            resource_type: Set(event.resource_type),
            resource_id: Set(event.resource_id),
            details: Set(event.details),
            created_at: Set(event.occurred_at),
            ..Default::default()
        };

        if let Err(e) = model.insert(&connection).await {
            warn!(action = %action, "Failed to persist audit event: {}", e);
        }
    }
}

impl AuditSink for DatabaseAuditSink {
    fn record(&self, event: AuditEvent) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(Self::persist(self.connection.clone(), event));
            }
            Err(_) => {
                warn!(
                    action = %event.action,
                    "No async runtime available, audit event not persisted"
                );
            }
        }
    }
}

/// Build the sink selected by configuration
pub fn audit_sink_from_config(config: &AuditConfig, store: &EntityStore) -> Arc<dyn AuditSink> {
    if !config.enabled {
        return Arc::new(NoopAuditSink);
    }

    match config.sink {
        AuditSinkKind::Tracing => Arc::new(TracingAuditSink),
        AuditSinkKind::Database => Arc::new(DatabaseAuditSink::new(store)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_storage::entities::AuditLogs;
    use gatehouse_storage::sea_orm::EntityTrait;
    use gatehouse_storage::testing::TestDatabase;
    use serde_json::json;

    #[test]
    fn test_event_builder() {
        let event = AuditEvent::new(7, "role.delete", "role")
            .with_resource_id(42)
            .with_details(json!({ "name": "ops" }));

        assert_eq!(event.actor_id, 7);
        assert_eq!(event.resource_id.as_deref(), Some("42"));
        assert_eq!(event.details["name"], "ops");
    }

    #[tokio::test]
    async fn test_database_sink_persists_event() {
        let db = TestDatabase::new_in_memory().await.unwrap();
        let sink = DatabaseAuditSink::new(&db.store);

        sink.record(AuditEvent::new(1, "menu.delete", "menu").with_resource_id(3));

        let mut rows = Vec::new();
        for _ in 0..50 {
            rows = AuditLogs::find().all(db.store.connection()).await.unwrap();
            if !rows.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, "menu.delete");
        assert_eq!(rows[0].resource_id.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_disabled_audit_writes_nothing() {
        let db = TestDatabase::new_in_memory().await.unwrap();
        let config = AuditConfig {
            enabled: false,
            sink: AuditSinkKind::Database,
        };

        let sink = audit_sink_from_config(&config, &db.store);
        sink.record(AuditEvent::new(1, "role.create", "role"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(AuditLogs::find()
            .all(db.store.connection())
            .await
            .unwrap()
            .is_empty());
    }
}
