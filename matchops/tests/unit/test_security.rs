//! Security pipeline and monitor tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use secrecy::SecretString;
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

use matchops::errors::{OpsError, SecurityError};
use matchops::models::security::{
    AlertType, BusinessRule, RuleCondition, SecurityAlert, SecurityLogEntry,
    SecurityValidationContext, Severity,
};
use matchops::security::authn::{Claims, TokenVerifier};
use matchops::security::authz::{PermissionChecker, RolePermissions};
use matchops::security::monitor::{MonitorSettings, SecurityMonitor, ThreatResponder};
use matchops::security::pipeline::{
    CheckKind, SecurityPipeline, ValidationReport, NO_TOKEN_REASON, UNAUTHORIZED_REASON,
    VALIDATION_FAILURE_EVENT,
};
use matchops::security::rate_limit::{LimiterConfig, RateLimiters};
use matchops::security::request::SecurityRequest;
use matchops::security::rules::RuleCache;
use matchops::store::{MemoryStore, RuleStore, SecurityAlertStore, SecurityLogStore};

const SECRET: &str = "marketplace-test-secret";

// ================================= FAKES ===================================== //

struct SpyPermissions {
    calls: AtomicUsize,
    inner: RolePermissions,
}

impl PermissionChecker for SpyPermissions {
    fn has_permission(&self, identity: Option<&Claims>, resource: &str, action: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.has_permission(identity, resource, action)
    }
}

struct SpyRules {
    calls: AtomicUsize,
    rules: Vec<BusinessRule>,
}

#[async_trait]
impl RuleStore for SpyRules {
    async fn business_rules(
        &self,
        resource: &str,
        action: &str,
    ) -> Result<Vec<BusinessRule>, OpsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .rules
            .iter()
            .filter(|r| r.applies_to(resource, action))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct SpyResponder {
    alerts: Mutex<Vec<SecurityAlert>>,
}

#[async_trait]
impl ThreatResponder for SpyResponder {
    async fn respond(&self, alert: &SecurityAlert) {
        self.alerts.lock().unwrap().push(alert.clone());
    }
}

struct Fixture {
    pipeline: SecurityPipeline,
    tokens: TokenVerifier,
    permissions: Arc<SpyPermissions>,
    rules: Arc<SpyRules>,
    store: Arc<MemoryStore>,
    live_rules: Arc<RuleCache>,
    limiters: Arc<RateLimiters>,
}

fn fixture_with(rules: Vec<BusinessRule>, general: LimiterConfig) -> Fixture {
    let secret = SecretString::from(SECRET.to_string());
    let permissions = Arc::new(SpyPermissions {
        calls: AtomicUsize::new(0),
        inner: RolePermissions::marketplace_defaults(),
    });
    let rules = Arc::new(SpyRules {
        calls: AtomicUsize::new(0),
        rules,
    });
    let store = Arc::new(MemoryStore::new());
    let live_rules = Arc::new(RuleCache::new());
    let limiters = Arc::new(RateLimiters::new(
        "/api/auth",
        LimiterConfig::auth_default(),
        general,
    ));

    let pipeline = SecurityPipeline::new(
        TokenVerifier::new(&secret),
        permissions.clone(),
        limiters.clone(),
        rules.clone(),
        live_rules.clone(),
        store.clone(),
    );

    Fixture {
        pipeline,
        tokens: TokenVerifier::new(&secret),
        permissions,
        rules,
        store,
        live_rules,
        limiters,
    }
}

fn fixture() -> Fixture {
    fixture_with(Vec::new(), LimiterConfig::general_default())
}

impl Fixture {
    fn bearer(&self, role: &str) -> String {
        let token = self
            .tokens
            .issue(&Claims::new(format!("{}-1", role), role, 3600))
            .unwrap();
        format!("Bearer {}", token)
    }

    async fn security_log(&self) -> Vec<SecurityLogEntry> {
        SecurityLogStore::entries_from(self.store.as_ref(), 0)
            .await
            .unwrap()
    }
}

fn bids_create() -> SecurityValidationContext {
    SecurityValidationContext::new("bids", "create")
}

fn rejected(result: Result<ValidationReport, SecurityError>) -> (Vec<String>, ValidationReport) {
    match assert_err!(result) {
        SecurityError::ValidationFailed { reasons, report } => (reasons, report),
        other => panic!("unexpected error: {:?}", other),
    }
}

// ================================= PIPELINE ===================================== //

#[tokio::test]
async fn test_missing_token_still_runs_every_check() {
    let f = fixture();
    let mut req =
        SecurityRequest::new("POST", "/api/bids", "10.0.0.1").with_body(json!({"amount": 250}));

    let result = f.pipeline.validate_request(&mut req, &bids_create()).await;
    let message = result.as_ref().err().map(ToString::to_string).unwrap();
    let (reasons, report) = rejected(result);

    assert_eq!(report.outcomes.len(), 5);
    for check in [
        CheckKind::Authentication,
        CheckKind::Authorization,
        CheckKind::RateLimit,
        CheckKind::InputValidation,
        CheckKind::BusinessRules,
    ] {
        assert!(report.outcome(check).is_some(), "missing {}", check);
    }
    assert!(!report.outcome(CheckKind::Authentication).unwrap().passed);
    assert!(!report.outcome(CheckKind::Authorization).unwrap().passed);
    assert!(report.outcome(CheckKind::RateLimit).unwrap().passed);
    assert!(report.outcome(CheckKind::InputValidation).unwrap().passed);
    assert!(report.outcome(CheckKind::BusinessRules).unwrap().passed);

    // Later checks ran even though authentication failed
    assert_eq!(f.permissions.calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.rules.calls.load(Ordering::SeqCst), 1);

    assert!(message.contains(NO_TOKEN_REASON), "{}", message);
    assert!(message.contains(UNAUTHORIZED_REASON), "{}", message);
    assert_eq!(reasons, vec![NO_TOKEN_REASON, UNAUTHORIZED_REASON]);
    assert_eq!(f.security_log().await.len(), 1);
}

#[tokio::test]
async fn test_valid_token_attaches_claims() {
    let f = fixture();
    let mut req = SecurityRequest::new("POST", "/api/bids", "10.0.0.2")
        .with_header("Authorization", &f.bearer("bidder"))
        .with_body(json!({"amount": 250, "note": "Can start Monday"}));

    let report = assert_ok!(f.pipeline.validate_request(&mut req, &bids_create()).await);
    assert!(report.passed());
    assert!(report.suspicious.is_empty());
    assert_eq!(req.identity.as_ref().map(|c| c.role.as_str()), Some("bidder"));
    assert!(f.security_log().await.is_empty());
}

#[tokio::test]
async fn test_role_without_grant_is_unauthorized() {
    let f = fixture();
    let mut req = SecurityRequest::new("POST", "/api/deployments", "10.0.0.3")
        .with_header("Authorization", &f.bearer("vendor"));

    let (reasons, report) = rejected(
        f.pipeline
            .validate_request(&mut req, &SecurityValidationContext::new("deployments", "create"))
            .await,
    );
    assert!(report.outcome(CheckKind::Authentication).unwrap().passed);
    assert_eq!(reasons, vec![UNAUTHORIZED_REASON]);
}

#[tokio::test]
async fn test_script_tag_is_reported_and_sanitized() {
    let f = fixture();
    let mut req = SecurityRequest::new("POST", "/api/bids", "10.0.0.4")
        .with_header("Authorization", &f.bearer("admin"))
        .with_body(json!({"amount": 250, "note": "<script>x</script>"}));

    let (_, report) = rejected(f.pipeline.validate_request(&mut req, &bids_create()).await);

    let input = report.outcome(CheckKind::InputValidation).unwrap();
    assert!(!input.passed);
    assert!(report
        .suspicious
        .iter()
        .any(|m| m.pattern == "script_tag" && m.path == "body.note"));
    assert!(input.reasons.iter().any(|r| r.contains("script_tag")));

    // The request now carries the sanitized body
    assert_eq!(req.body, json!({"amount": 250, "note": "scriptx/script"}));
}

#[tokio::test]
async fn test_query_values_are_scanned() {
    let f = fixture();
    let mut req = SecurityRequest::new("GET", "/api/projects", "10.0.0.5")
        .with_header("Authorization", &f.bearer("admin"))
        .with_query(json!({"q": "roof' or 1=1"}));

    let (_, report) = rejected(
        f.pipeline
            .validate_request(&mut req, &SecurityValidationContext::new("projects", "read"))
            .await,
    );
    assert!(report
        .suspicious
        .iter()
        .any(|m| m.pattern == "boolean_injection" && m.path == "query.q"));
}

#[tokio::test]
async fn test_auth_limiter_counts_only_failures() {
    let f = fixture();
    let login = SecurityValidationContext::new("auth", "create");

    // Six successful logins in a row are fine
    for _ in 0..6 {
        let mut req = SecurityRequest::new("POST", "/api/auth/login", "10.0.1.1")
            .with_header("Authorization", &f.bearer("admin"));
        assert_ok!(f.pipeline.validate_request(&mut req, &login).await);
        f.pipeline.record_outcome(&req, true);
    }

    // Six failed ones trip the limiter on the sixth
    for attempt in 1..=6 {
        let mut req = SecurityRequest::new("POST", "/api/auth/login", "10.0.1.2")
            .with_header("Authorization", "Bearer not-a-token");
        let (reasons, report) = rejected(f.pipeline.validate_request(&mut req, &login).await);
        let limited = !report.outcome(CheckKind::RateLimit).unwrap().passed;
        assert_eq!(limited, attempt == 6, "attempt {}", attempt);
        if limited {
            assert!(reasons
                .iter()
                .any(|r| r.contains("Too many authentication attempts")));
        }
    }
}

#[tokio::test]
async fn test_failure_log_excludes_credentials() {
    let f = fixture();
    let mut req = SecurityRequest::new("POST", "/api/bids", "10.0.0.6")
        .with_header("Authorization", "Bearer leaked-token-value")
        .with_header("Cookie", "session=leaked-session")
        .with_header("User-Agent", "curl/8.0");
    req.parse_cookies("session=leaked-session");

    rejected(f.pipeline.validate_request(&mut req, &bids_create()).await);

    let log = f.security_log().await;
    assert_eq!(log.len(), 1);
    let entry = &log[0];
    assert_eq!(entry.event, VALIDATION_FAILURE_EVENT);
    assert_eq!(entry.client.as_deref(), Some("10.0.0.6"));

    let text = entry.details.to_string();
    assert!(!text.contains("leaked-token-value"));
    assert!(!text.contains("leaked-session"));
    assert_eq!(entry.details["request"]["headers"]["user-agent"], "curl/8.0");

    let failures = entry.details["failures"].as_array().unwrap();
    assert!(failures.iter().any(|f| f["check"] == "authentication"));
    assert!(failures.iter().any(|f| f["check"] == "authorization"));
}

#[tokio::test]
async fn test_business_rules_and_restrictions() {
    let f = fixture_with(
        vec![BusinessRule {
            id: "bid-needs-amount".to_string(),
            resource: "bids".to_string(),
            action: "create".to_string(),
            condition: RuleCondition::RequireField {
                field: "amount".to_string(),
            },
            message: "A bid must state an amount".to_string(),
        }],
        LimiterConfig::general_default(),
    );

    let mut req = SecurityRequest::new("POST", "/api/bids", "10.0.0.7")
        .with_header("Authorization", &f.bearer("bidder"))
        .with_body(json!({"note": "cheap"}));
    let (reasons, _) = rejected(f.pipeline.validate_request(&mut req, &bids_create()).await);
    assert_eq!(reasons, vec!["A bid must state an amount"]);

    f.live_rules.restrict(matchops::models::security::ClientRestriction {
        client: "10.0.0.7".to_string(),
        reason: "rate_limit_burst".to_string(),
        expires_at: Utc::now() + chrono::TimeDelta::minutes(15),
    });
    let mut req = SecurityRequest::new("POST", "/api/bids", "10.0.0.7")
        .with_header("Authorization", &f.bearer("bidder"))
        .with_body(json!({"amount": 100}));
    let (reasons, _) = rejected(f.pipeline.validate_request(&mut req, &bids_create()).await);
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].contains("Client temporarily restricted"));
}

// ================================= MONITOR ===================================== //

#[tokio::test]
async fn test_monitor_turns_failures_into_alerts_and_restrictions() {
    let f = fixture_with(
        Vec::new(),
        LimiterConfig {
            max: 3,
            ..LimiterConfig::general_default()
        },
    );
    let projects = SecurityValidationContext::new("projects", "read");

    // Brute force against the login route
    for _ in 0..5 {
        let mut req = SecurityRequest::new("POST", "/api/auth/login", "10.0.2.1")
            .with_header("Authorization", "Bearer guessed");
        rejected(
            f.pipeline
                .validate_request(&mut req, &SecurityValidationContext::new("auth", "create"))
                .await,
        );
    }

    // Markup in a project search
    let mut req = SecurityRequest::new("GET", "/api/projects", "10.0.2.2")
        .with_header("Authorization", &f.bearer("admin"))
        .with_query(json!({"q": "<script>x</script>"}));
    rejected(f.pipeline.validate_request(&mut req, &projects).await);

    // Burst over the general limiter
    for _ in 0..4 {
        let mut req = SecurityRequest::new("GET", "/api/projects", "10.0.2.3")
            .with_header("Authorization", &f.bearer("admin"));
        let _ = f.pipeline.validate_request(&mut req, &projects).await;
    }

    let responder = Arc::new(SpyResponder::default());
    let monitor = SecurityMonitor::new(
        f.store.clone(),
        f.store.clone(),
        f.live_rules.clone(),
        f.limiters.clone(),
        responder.clone(),
        MonitorSettings::default(),
    );

    let summary = monitor.tick().await.unwrap().unwrap();
    assert_eq!(summary.entries, 7);
    assert_eq!(summary.threats, 2);
    assert_eq!(summary.anomalies, 1);
    assert_eq!(summary.responses, 1);
    assert_eq!(summary.restrictions_added, 1);

    let alerts = SecurityAlertStore::list(f.store.as_ref()).await.unwrap();
    assert_eq!(alerts.len(), 3);
    let brute_force = alerts
        .iter()
        .find(|a| a.details["kind"] == "brute_force")
        .unwrap();
    assert_eq!(brute_force.alert_type, AlertType::Threat);
    assert_eq!(brute_force.severity, Severity::High);
    assert_eq!(brute_force.details["client"], "10.0.2.1");

    let suspicious = alerts
        .iter()
        .find(|a| a.details["kind"] == "suspicious_input")
        .unwrap();
    assert_eq!(suspicious.severity, Severity::Medium);
    assert_eq!(suspicious.details["client"], "10.0.2.2");

    let anomaly = alerts
        .iter()
        .find(|a| a.alert_type == AlertType::Anomaly)
        .unwrap();
    assert_eq!(anomaly.details["client"], "10.0.2.3");

    let responded = responder.alerts.lock().unwrap().clone();
    assert_eq!(responded.len(), 1);
    assert_eq!(responded[0].id, brute_force.id);

    assert!(f.live_rules.active_for("10.0.2.3", Utc::now()).is_some());
    assert!(f.live_rules.active_for("10.0.2.1", Utc::now()).is_none());

    // Nothing new since the last sweep
    let summary = monitor.tick().await.unwrap().unwrap();
    assert_eq!(summary.entries, 0);
    assert_eq!(summary.threats + summary.anomalies, 0);
    assert_eq!(SecurityAlertStore::list(f.store.as_ref()).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_monitor_ignores_other_events() {
    let f = fixture();
    SecurityLogStore::append(
        f.store.as_ref(),
        SecurityLogEntry {
            timestamp: Utc::now(),
            event: "token_issued".to_string(),
            client: Some("10.0.3.1".to_string()),
            details: Value::Null,
        },
    )
    .await
    .unwrap();

    let monitor = SecurityMonitor::new(
        f.store.clone(),
        f.store.clone(),
        f.live_rules.clone(),
        f.limiters.clone(),
        Arc::new(SpyResponder::default()),
        MonitorSettings::default(),
    );
    let summary = monitor.tick().await.unwrap().unwrap();
    assert_eq!(summary.entries, 1);
    assert_eq!(summary.threats + summary.anomalies, 0);
}
