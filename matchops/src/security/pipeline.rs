//! Request security validation
//!
//! Five checks run on every request: authentication, authorization, rate
//! limit, input validation and business rules. None of them short-circuits
//! another; a failing request is rejected with every reason at once.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::errors::SecurityError;
use crate::models::security::{SecurityLogEntry, SecurityValidationContext};
use crate::security::authn::{extract_bearer_token, TokenVerifier};
use crate::security::authz::PermissionChecker;
use crate::security::rate_limit::RateLimiters;
use crate::security::request::SecurityRequest;
use crate::security::rules::{rule_holds, RuleCache};
use crate::security::sanitize::{sanitize_value, scan_suspicious, PatternMatch};
use crate::store::{RuleStore, SecurityLogStore};

/// Event name of a rejected request in the security log
pub const VALIDATION_FAILURE_EVENT: &str = "validation_failure";

pub const NO_TOKEN_REASON: &str = "No authentication token provided";
pub const UNAUTHORIZED_REASON: &str = "Unauthorized access";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Authentication,
    Authorization,
    RateLimit,
    InputValidation,
    BusinessRules,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Authentication => "authentication",
            CheckKind::Authorization => "authorization",
            CheckKind::RateLimit => "rate_limit",
            CheckKind::InputValidation => "input_validation",
            CheckKind::BusinessRules => "business_rules",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one check
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub check: CheckKind,
    pub passed: bool,
    pub reasons: Vec<String>,
}

impl CheckOutcome {
    fn pass(check: CheckKind) -> Self {
        Self {
            check,
            passed: true,
            reasons: Vec::new(),
        }
    }

    fn from_reasons(check: CheckKind, reasons: Vec<String>) -> Self {
        Self {
            check,
            passed: reasons.is_empty(),
            reasons,
        }
    }
}

/// Outcome of every check for one request
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub outcomes: Vec<CheckOutcome>,
    pub suspicious: Vec<PatternMatch>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    pub fn outcome(&self, check: CheckKind) -> Option<&CheckOutcome> {
        self.outcomes.iter().find(|o| o.check == check)
    }

    /// Every failure reason, in check order
    pub fn reasons(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .flat_map(|o| o.reasons.iter().cloned())
            .collect()
    }
}

/// The per-request validator
pub struct SecurityPipeline {
    tokens: TokenVerifier,
    permissions: Arc<dyn PermissionChecker>,
    limiters: Arc<RateLimiters>,
    rules: Arc<dyn RuleStore>,
    live_rules: Arc<RuleCache>,
    log_store: Arc<dyn SecurityLogStore>,
}

impl SecurityPipeline {
    pub fn new(
        tokens: TokenVerifier,
        permissions: Arc<dyn PermissionChecker>,
        limiters: Arc<RateLimiters>,
        rules: Arc<dyn RuleStore>,
        live_rules: Arc<RuleCache>,
        log_store: Arc<dyn SecurityLogStore>,
    ) -> Self {
        Self {
            tokens,
            permissions,
            limiters,
            rules,
            live_rules,
            log_store,
        }
    }

    pub fn tokens(&self) -> &TokenVerifier {
        &self.tokens
    }

    pub fn limiters(&self) -> &Arc<RateLimiters> {
        &self.limiters
    }

    /// Run all five checks against `req`
    ///
    /// On return `req` carries sanitized input and, when the token verified,
    /// the caller's claims.
    pub async fn validate_request(
        &self,
        req: &mut SecurityRequest,
        context: &SecurityValidationContext,
    ) -> Result<ValidationReport, SecurityError> {
        let authentication = self.check_authentication(req);
        let authorization = self.check_authorization(req, context);
        let rate_limit = self.check_rate_limit(req);
        let (input_validation, suspicious) = self.check_input(req);
        let business_rules = self.check_business_rules(req, context).await;

        let report = ValidationReport {
            outcomes: vec![
                authentication,
                authorization,
                rate_limit,
                input_validation,
                business_rules,
            ],
            suspicious,
        };

        if report.passed() {
            debug!(
                "Request {} {} passed security validation",
                req.method, req.path
            );
            return Ok(report);
        }

        let reasons = report.reasons();
        warn!(
            client = %req.client_ip,
            path = %req.path,
            "Security validation failed: {}",
            reasons.join("; ")
        );
        self.log_failure(req, context, &report).await;

        Err(SecurityError::ValidationFailed { reasons, report })
    }

    /// Report how the request ended; successful auth attempts are refunded
    pub fn record_outcome(&self, req: &SecurityRequest, success: bool) {
        if success {
            self.limiters.for_path(&req.path).refund(&req.client_ip);
        }
    }

    fn check_authentication(&self, req: &mut SecurityRequest) -> CheckOutcome {
        let Some(token) = extract_bearer_token(req) else {
            return CheckOutcome::from_reasons(
                CheckKind::Authentication,
                vec![NO_TOKEN_REASON.to_string()],
            );
        };

        match self.tokens.verify(token) {
            Ok(claims) => {
                req.identity = Some(claims);
                CheckOutcome::pass(CheckKind::Authentication)
            }
            Err(reason) => CheckOutcome::from_reasons(CheckKind::Authentication, vec![reason]),
        }
    }

    fn check_authorization(
        &self,
        req: &SecurityRequest,
        context: &SecurityValidationContext,
    ) -> CheckOutcome {
        if self
            .permissions
            .has_permission(req.identity.as_ref(), &context.resource, &context.action)
        {
            CheckOutcome::pass(CheckKind::Authorization)
        } else {
            CheckOutcome::from_reasons(
                CheckKind::Authorization,
                vec![UNAUTHORIZED_REASON.to_string()],
            )
        }
    }

    fn check_rate_limit(&self, req: &SecurityRequest) -> CheckOutcome {
        let limiter = self.limiters.for_path(&req.path);
        let decision = limiter.hit(&req.client_ip);
        if decision.allowed {
            CheckOutcome::pass(CheckKind::RateLimit)
        } else {
            CheckOutcome::from_reasons(
                CheckKind::RateLimit,
                vec![limiter.config().message.clone()],
            )
        }
    }

    fn check_input(&self, req: &mut SecurityRequest) -> (CheckOutcome, Vec<PatternMatch>) {
        let mut suspicious = Vec::new();
        for (root, value) in [
            ("body", &mut req.body),
            ("query", &mut req.query),
            ("params", &mut req.params),
        ] {
            suspicious.extend(scan_suspicious(value, root));
            *value = sanitize_value(value);
        }

        let reasons = suspicious
            .iter()
            .map(|m| {
                format!(
                    "Suspicious pattern {} ({}) in {}: {}",
                    m.pattern, m.regex, m.path, m.value
                )
            })
            .collect();
        (
            CheckOutcome::from_reasons(CheckKind::InputValidation, reasons),
            suspicious,
        )
    }

    async fn check_business_rules(
        &self,
        req: &SecurityRequest,
        context: &SecurityValidationContext,
    ) -> CheckOutcome {
        let mut reasons = Vec::new();

        if let Some(restriction) = self.live_rules.active_for(&req.client_ip, Utc::now()) {
            reasons.push(format!("Client temporarily restricted: {}", restriction.reason));
        }

        match self
            .rules
            .business_rules(&context.resource, &context.action)
            .await
        {
            Ok(rules) => reasons.extend(
                rules
                    .iter()
                    .filter(|rule| !rule_holds(rule, req))
                    .map(|rule| rule.message.clone()),
            ),
            Err(e) => reasons.push(format!("Business rules unavailable: {}", e)),
        }

        CheckOutcome::from_reasons(CheckKind::BusinessRules, reasons)
    }

    async fn log_failure(
        &self,
        req: &SecurityRequest,
        context: &SecurityValidationContext,
        report: &ValidationReport,
    ) {
        let failures: Vec<_> = report
            .outcomes
            .iter()
            .filter(|o| !o.passed)
            .flat_map(|o| {
                o.reasons
                    .iter()
                    .map(move |reason| json!({ "check": o.check, "reason": reason }))
            })
            .collect();

        let entry = SecurityLogEntry {
            timestamp: Utc::now(),
            event: VALIDATION_FAILURE_EVENT.to_string(),
            client: Some(req.client_ip.clone()),
            details: json!({
                "resource": context.resource,
                "action": context.action,
                "failures": failures,
                "suspicious": report.suspicious,
                "request": req.sanitized_snapshot(),
            }),
        };

        if let Err(e) = self.log_store.append(entry).await {
            warn!("Failed to write security log: {}", e);
        }
    }
}
