//! Business rules and live client restrictions

use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::models::security::{BusinessRule, ClientRestriction, RuleCondition};
use crate::security::request::SecurityRequest;

/// Whether `rule` holds for `req`
pub fn rule_holds(rule: &BusinessRule, req: &SecurityRequest) -> bool {
    match &rule.condition {
        RuleCondition::RequireRole { role } => req
            .identity
            .as_ref()
            .is_some_and(|identity| &identity.role == role),
        RuleCondition::RequireField { field } => req
            .body
            .get(field)
            .is_some_and(|value| !value.is_null()),
        RuleCondition::MaxBodyBytes { limit } => req.body.to_string().len() <= *limit,
        RuleCondition::DenyClient { client } => &req.client_ip != client,
    }
}

/// Restrictions learned by the security monitor
#[derive(Default)]
pub struct RuleCache {
    restrictions: RwLock<Vec<ClientRestriction>>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a restriction, replacing any existing one for the same client
    pub fn restrict(&self, restriction: ClientRestriction) {
        let mut restrictions = self.restrictions.write().unwrap_or_else(|e| e.into_inner());
        restrictions.retain(|r| r.client != restriction.client);
        restrictions.push(restriction);
    }

    /// Active restriction of `client`, if any
    pub fn active_for(&self, client: &str, now: DateTime<Utc>) -> Option<ClientRestriction> {
        let restrictions = self.restrictions.read().unwrap_or_else(|e| e.into_inner());
        restrictions
            .iter()
            .find(|r| r.client == client && r.is_active(now))
            .cloned()
    }

    pub fn restrictions(&self) -> Vec<ClientRestriction> {
        self.restrictions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drop expired restrictions, returning how many were removed
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut restrictions = self.restrictions.write().unwrap_or_else(|e| e.into_inner());
        let before = restrictions.len();
        restrictions.retain(|r| r.is_active(now));
        before - restrictions.len()
    }
}
