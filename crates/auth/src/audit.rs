//! Audit trail of authentication events.
//!
//! Events only ever carry fingerprints of identifiers; the raw values are
//! hashed on the way in.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use warden_core::fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Login,
    TokenVerified,
    TokenRefreshed,
    TokenRevoked,
    SessionsRevoked,
    Lockout,
    RateLimited,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::Login => "login",
            AuditEventType::TokenVerified => "token_verified",
            AuditEventType::TokenRefreshed => "token_refreshed",
            AuditEventType::TokenRevoked => "token_revoked",
            AuditEventType::SessionsRevoked => "sessions_revoked",
            AuditEventType::Lockout => "lockout",
            AuditEventType::RateLimited => "rate_limited",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_id_hash: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent_hash: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, success: bool, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            event_type,
            principal_id_hash: None,
            success,
            ip_hash: None,
            user_agent_hash: None,
            details: BTreeMap::new(),
        }
    }

    pub fn principal(mut self, raw: Option<&str>) -> Self {
        self.principal_id_hash = raw.map(fingerprint);
        self
    }

    pub fn ip(mut self, raw: Option<&str>) -> Self {
        self.ip_hash = raw.map(fingerprint);
        self
    }

    pub fn user_agent(mut self, raw: Option<&str>) -> Self {
        self.user_agent_hash = raw.map(fingerprint);
        self
    }

    /// Free-form context. Never pass secrets or raw identifiers here.
    pub fn detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits events on the `audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let details = serde_json::to_string(&event.details).unwrap_or_default();
        let principal = event.principal_id_hash.as_deref().unwrap_or("");
        let ip = event.ip_hash.as_deref().unwrap_or("");
        let user_agent = event.user_agent_hash.as_deref().unwrap_or("");

        if event.success {
            info!(
                target: "audit",
                event = event.event_type.as_str(),
                success = true,
                principal,
                ip,
                user_agent,
                details = %details,
                at = %event.timestamp
            );
        } else {
            warn!(
                target: "audit",
                event = event.event_type.as_str(),
                success = false,
                principal,
                ip,
                user_agent,
                details = %details,
                at = %event.timestamp
            );
        }
    }
}

/// Keeps events in memory; handy for tests and diagnostics endpoints.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn of_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_hashed_on_the_way_in() {
        let event = AuditEvent::new(AuditEventType::Login, false, Utc::now())
            .principal(Some("alice"))
            .ip(Some("203.0.113.7"))
            .user_agent(None)
            .detail("error", "invalid_credentials");

        assert_eq!(event.principal_id_hash.as_deref(), Some(fingerprint("alice").as_str()));
        assert_eq!(event.user_agent_hash, None);

        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("alice"));
        assert!(!json.contains("203.0.113.7"));
        assert!(json.contains("\"event_type\":\"login\""));
        assert!(!json.contains("user_agent_hash"));
    }

    #[test]
    fn memory_sink_filters_by_type() {
        let sink = MemoryAuditSink::new();
        sink.record(AuditEvent::new(AuditEventType::Login, true, Utc::now()));
        sink.record(AuditEvent::new(AuditEventType::Lockout, false, Utc::now()));
        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.of_type(AuditEventType::Lockout).len(), 1);
    }
}
