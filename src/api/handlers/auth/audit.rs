//! Audit sink abstraction for security-relevant auth outcomes.
//!
//! Every terminal login branch emits exactly one event; renewals only audit
//! on success. The default sink writes structured tracing events, so audit
//! records ride the same pipeline as the rest of the service's telemetry.

use tracing::info;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditOutcome {
    /// Login rejected because the account is locked.
    Blocked,
    /// Login rejected on bad credentials.
    Failed,
    /// Login completed and a credential pair was issued.
    Success,
    /// Login is valid but waiting on a second factor.
    TwoFactorPending,
    /// A refresh token was rotated.
    Renewed,
    /// A refresh token was surrendered.
    Logout,
}

impl AuditOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AuditOutcome::Blocked => "blocked",
            AuditOutcome::Failed => "failed",
            AuditOutcome::Success => "success",
            AuditOutcome::TwoFactorPending => "two_factor_pending",
            AuditOutcome::Renewed => "renewed",
            AuditOutcome::Logout => "logout",
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditRecord {
    pub outcome: AuditOutcome,
    pub email: Option<String>,
    pub user_id: Option<Uuid>,
    pub ip_address: Option<String>,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Default sink: structured tracing events under the `audit` target.
#[derive(Clone, Debug)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        info!(
            target: "audit",
            outcome = record.outcome.as_str(),
            email = record.email.as_deref().unwrap_or("-"),
            user_id = %record.user_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
            ip = record.ip_address.as_deref().unwrap_or("-"),
            "auth event"
        );
    }
}

/// Sink that drops everything.
#[derive(Clone, Debug)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _record: AuditRecord) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_names_are_stable() {
        assert_eq!(AuditOutcome::Blocked.as_str(), "blocked");
        assert_eq!(AuditOutcome::Failed.as_str(), "failed");
        assert_eq!(AuditOutcome::Success.as_str(), "success");
        assert_eq!(AuditOutcome::TwoFactorPending.as_str(), "two_factor_pending");
        assert_eq!(AuditOutcome::Renewed.as_str(), "renewed");
        assert_eq!(AuditOutcome::Logout.as_str(), "logout");
    }

    #[test]
    fn sinks_accept_records() {
        let record = AuditRecord {
            outcome: AuditOutcome::Success,
            email: Some("alice@example.com".to_string()),
            user_id: Some(Uuid::nil()),
            ip_address: None,
        };
        TracingAuditSink.record(record.clone());
        NoopAuditSink.record(record);
    }
}
