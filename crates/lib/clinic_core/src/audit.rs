//! Security audit events.
//!
//! The audit sink is an external collaborator: append-only and
//! fire-and-forget. Sink failures are logged and never fail the operation
//! that produced the event.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};

use crate::uuid::uuidv7;

/// Audit sink errors.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("Audit sink error: {0}")]
    Internal(String),
}

/// Security-relevant actions recorded by the session core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    LoginSuccess,
    LoginFailed,
    LoginBlocked,
    LoginRejected,
    Logout,
    TokenRefreshed,
    RefreshRejected,
    PasswordResetRequested,
    PasswordResetCompleted,
    PasswordResetRejected,
    ApiRateLimitExceeded,
    ApiBlocked,
    ApiUnblocked,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::LoginSuccess => "LOGIN_SUCCESS",
            AuditAction::LoginFailed => "LOGIN_FAILED",
            AuditAction::LoginBlocked => "LOGIN_BLOCKED",
            AuditAction::LoginRejected => "LOGIN_REJECTED",
            AuditAction::Logout => "LOGOUT",
            AuditAction::TokenRefreshed => "TOKEN_REFRESHED",
            AuditAction::RefreshRejected => "REFRESH_REJECTED",
            AuditAction::PasswordResetRequested => "PASSWORD_RESET_REQUESTED",
            AuditAction::PasswordResetCompleted => "PASSWORD_RESET_COMPLETED",
            AuditAction::PasswordResetRejected => "PASSWORD_RESET_REJECTED",
            AuditAction::ApiRateLimitExceeded => "API_RATE_LIMIT_EXCEEDED",
            AuditAction::ApiBlocked => "API_BLOCKED",
            AuditAction::ApiUnblocked => "API_UNBLOCKED",
        }
    }
}

/// A single audit record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub action: AuditAction,
    /// Subject id, when known.
    pub subject_id: Option<String>,
    /// Login name or other caller-supplied identifier.
    pub identifier: Option<String>,
    pub ip: Option<String>,
    pub details: Option<String>,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            subject_id: None,
            identifier: None,
            ip: None,
            details: None,
            at: Utc::now(),
        }
    }

    pub fn subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Append-only audit sink.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Record an event, logging (and swallowing) sink failures.
pub async fn emit(sink: &Arc<dyn AuditSink>, event: AuditEvent) {
    if let Err(e) = sink.record(&event).await {
        warn!(action = event.action.as_str(), "failed to record audit event: {e}");
    }
}

/// Sink that writes audit events to the `audit` tracing target.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        info!(
            target: "audit",
            action = event.action.as_str(),
            subject = event.subject_id.as_deref(),
            identifier = event.identifier.as_deref(),
            ip = event.ip.as_deref(),
            details = event.details.as_deref(),
            "security event"
        );
        Ok(())
    }
}

/// Sink that appends audit events to the `audit_logs` table.
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        sqlx::query(
            "INSERT INTO audit_logs (id, action, resource, user_id, identifier, ip_address, details, created_at) \
             VALUES ($1, $2, 'AUTH', $3::uuid, $4, $5, $6, $7)",
        )
        .bind(uuidv7())
        .bind(event.action.as_str())
        .bind(event.subject_id.as_deref())
        .bind(event.identifier.as_deref())
        .bind(event.ip.as_deref())
        .bind(event.details.as_deref())
        .bind(event.at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Sink that keeps events in memory for assertions.
    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<AuditEvent>>,
    }

    impl RecordingSink {
        pub fn actions(&self) -> Vec<AuditAction> {
            self.events.lock().unwrap().iter().map(|e| e.action).collect()
        }
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    /// Sink that always fails.
    pub struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
            Err(AuditError::Internal("sink offline".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FailingSink, RecordingSink};
    use super::*;

    #[test]
    fn actions_serialize_screaming_snake() {
        let json = serde_json::to_value(AuditAction::LoginBlocked).unwrap();
        assert_eq!(json, "LOGIN_BLOCKED");
        assert_eq!(AuditAction::LoginBlocked.as_str(), "LOGIN_BLOCKED");
    }

    #[tokio::test]
    async fn emit_records_event() {
        let recording = Arc::new(RecordingSink::default());
        let sink: Arc<dyn AuditSink> = recording.clone();
        emit(&sink, AuditEvent::new(AuditAction::Logout).subject("u1")).await;
        assert_eq!(recording.actions(), vec![AuditAction::Logout]);
    }

    #[tokio::test]
    async fn emit_swallows_sink_failures() {
        let sink: Arc<dyn AuditSink> = Arc::new(FailingSink);
        emit(&sink, AuditEvent::new(AuditAction::LoginFailed)).await;
    }
}
