//! Audit notifications for authentication events
//!
//! Login attempts, logouts, refreshes and rejected requests are reported to an
//! [`AuditSink`]. Delivery is best-effort and off the request path: [`AuditNotifier`]
//! swallows sink errors and timeouts after logging them.
//!
//! [`TracingAuditSink`] is the default backend and emits structured events under the
//! `medgate::audit` target for log aggregation.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    #[display("login")]
    Login,
    #[display("logout")]
    Logout,
    #[display("logout_all")]
    LogoutAll,
    #[display("token_refresh")]
    TokenRefresh,
    #[display("unauthorized_access")]
    UnauthorizedAccess,
}

/// Structured audit event
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: AuditEventKind,
    pub subject_id: Option<Uuid>,
    pub ip: Option<IpAddr>,
    pub success: bool,
    /// Internal reason code; never shown to the caller
    pub reason: Option<String>,
}

impl AuditEvent {
    fn new(kind: AuditEventKind, subject_id: Option<Uuid>, success: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            subject_id,
            ip: None,
            success,
            reason: None,
        }
    }

    pub fn login_succeeded(subject_id: Uuid) -> Self {
        Self::new(AuditEventKind::Login, Some(subject_id), true)
    }

    pub fn login_failed(subject_id: Option<Uuid>, reason: &str) -> Self {
        Self::new(AuditEventKind::Login, subject_id, false).with_reason(reason)
    }

    pub fn logout(subject_id: Uuid, complete: bool) -> Self {
        Self::new(AuditEventKind::Logout, Some(subject_id), complete)
    }

    pub fn logout_all(subject_id: Uuid, complete: bool) -> Self {
        Self::new(AuditEventKind::LogoutAll, Some(subject_id), complete)
    }

    pub fn token_refreshed(subject_id: Uuid) -> Self {
        Self::new(AuditEventKind::TokenRefresh, Some(subject_id), true)
    }

    pub fn refresh_failed(subject_id: Option<Uuid>, reason: &str) -> Self {
        Self::new(AuditEventKind::TokenRefresh, subject_id, false).with_reason(reason)
    }

    pub fn unauthorized(subject_id: Option<Uuid>, reason: &str) -> Self {
        Self::new(AuditEventKind::UnauthorizedAccess, subject_id, false).with_reason(reason)
    }

    pub fn with_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.ip = ip;
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }
}

/// Audit delivery failure
#[derive(Debug, thiserror::Error)]
#[error("Audit sink unavailable: {0}")]
pub struct AuditError(pub String);

/// Receiver of audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn notify(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Audit sink that emits `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn notify(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let subject = event.subject_id.map(|id| id.to_string());
        let ip = event.ip.map(|ip| ip.to_string());

        tracing::info!(
            target: "medgate::audit",
            kind = %event.kind,
            subject_id = subject.as_deref().unwrap_or("-"),
            ip = ip.as_deref().unwrap_or("-"),
            success = event.success,
            reason = event.reason.as_deref().unwrap_or("-"),
            timestamp = %event.timestamp.to_rfc3339(),
            "audit event"
        );
        Ok(())
    }
}

/// Default upper bound on a single audit delivery
const DEFAULT_AUDIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Best-effort front for an [`AuditSink`]
///
/// Each event is delivered on its own task, so a slow sink never holds up the request
/// that produced it. [`AuditNotifier::inline`] awaits delivery instead.
#[derive(Clone)]
pub struct AuditNotifier {
    sink: Arc<dyn AuditSink>,
    timeout: Duration,
    detached: bool,
}

impl AuditNotifier {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            timeout: DEFAULT_AUDIT_TIMEOUT,
            detached: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Await each delivery before `notify` returns
    pub fn inline(mut self) -> Self {
        self.detached = false;
        self
    }

    /// Hand `event` to the sink; failures are logged and dropped
    pub async fn notify(&self, event: AuditEvent) {
        if self.detached {
            let sink = self.sink.clone();
            let timeout = self.timeout;
            tokio::spawn(async move { deliver(sink.as_ref(), timeout, event).await });
        } else {
            deliver(self.sink.as_ref(), self.timeout, event).await;
        }
    }
}

async fn deliver(sink: &dyn AuditSink, timeout: Duration, event: AuditEvent) {
    match tokio::time::timeout(timeout, sink.notify(&event)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(error = %err, kind = %event.kind, "audit notification dropped");
        }
        Err(_) => {
            tracing::warn!(kind = %event.kind, timeout = ?timeout, "audit notification timed out");
        }
    }
}

impl Default for AuditNotifier {
    fn default() -> Self {
        Self::new(Arc::new(TracingAuditSink))
    }
}
