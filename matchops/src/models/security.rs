//! Security models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a request is trying to do, supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityValidationContext {
    pub resource: String,
    pub action: String,
}

impl SecurityValidationContext {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }
}

/// Append-only security audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityLogEntry {
    pub timestamp: DateTime<Utc>,

    /// Event name, e.g. `validation_failure`
    pub event: String,

    /// Client address the event is attributed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,

    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Threat,
    Anomaly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Alert raised by the security monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Predicate of a business rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCondition {
    /// Caller's role must equal `role`
    RequireRole { role: String },

    /// Request body must carry a non-null top-level `field`
    RequireField { field: String },

    /// Serialized body must not exceed `limit` bytes
    MaxBodyBytes { limit: usize },

    /// Requests from `client` are refused
    DenyClient { client: String },
}

/// Dynamically loaded rule gating a request beyond authn/authz
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRule {
    pub id: String,

    /// Resource the rule applies to, `*` for all
    pub resource: String,

    /// Action the rule applies to, `*` for all
    pub action: String,

    pub condition: RuleCondition,

    /// Reported when the condition does not hold
    pub message: String,
}

impl BusinessRule {
    pub fn applies_to(&self, resource: &str, action: &str) -> bool {
        (self.resource == "*" || self.resource == resource)
            && (self.action == "*" || self.action == action)
    }
}

/// Live rule learned from an anomaly: the client is refused until expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRestriction {
    pub client: String,
    pub reason: String,
    pub expires_at: DateTime<Utc>,
}

impl ClientRestriction {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
