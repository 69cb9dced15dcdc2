//! HTTP routes behind the security guard

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use secrecy::SecretString;
use serde_json::{json, Value};
use tower::ServiceExt;

use matchops::deploy::backends::{
    Backends, BackupBackend, DependencyAuditor, HealthChecker, Migration, MigrationLoader,
    ReleaseTarget, Verifier,
};
use matchops::deploy::executor::DeploymentService;
use matchops::deploy::fsm::FsmSettings;
use matchops::models::deployment::{BackupDescriptor, DeploymentConfigRecord, Environment};
use matchops::models::security::{AlertType, SecurityAlert, Severity};
use matchops::security::authn::{Claims, TokenVerifier};
use matchops::security::authz::RolePermissions;
use matchops::security::pipeline::SecurityPipeline;
use matchops::security::rate_limit::{LimiterConfig, RateLimiters};
use matchops::security::rules::RuleCache;
use matchops::server::serve::router;
use matchops::server::state::ServerState;
use matchops::store::{MemoryStore, SecurityAlertStore};

const SECRET: &str = "server-test-secret";

/// Every collaborator succeeds
struct Healthy;

#[async_trait]
impl HealthChecker for Healthy {
    async fn check_environment(&self, _environment: Environment) -> Result<(), String> {
        Ok(())
    }
}

#[async_trait]
impl DependencyAuditor for Healthy {
    async fn audit(&self) -> Result<(), String> {
        Ok(())
    }
}

#[async_trait]
impl BackupBackend for Healthy {
    async fn create(
        &self,
        environment: Environment,
        previous_config: Option<DeploymentConfigRecord>,
    ) -> Result<BackupDescriptor, String> {
        let timestamp = Utc::now();
        Ok(BackupDescriptor {
            id: BackupDescriptor::make_id(environment, timestamp),
            environment,
            timestamp,
            location: "/tmp/backups/healthy".to_string(),
            previous_config,
        })
    }

    async fn restore(&self, _backup: &BackupDescriptor) -> Result<(), String> {
        Ok(())
    }
}

#[async_trait]
impl MigrationLoader for Healthy {
    async fn load(&self, _version: &str) -> Result<Vec<Box<dyn Migration>>, String> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl ReleaseTarget for Healthy {
    async fn apply_config(&self, _environment: Environment, _config: &Value) -> Result<(), String> {
        Ok(())
    }

    async fn deploy_code(&self, _environment: Environment, _version: &str) -> Result<(), String> {
        Ok(())
    }

    async fn update_services(&self, _environment: Environment) -> Result<(), String> {
        Ok(())
    }

    async fn clear_caches(&self, _environment: Environment) -> Result<(), String> {
        Ok(())
    }
}

#[async_trait]
impl Verifier for Healthy {
    async fn verify_services(&self, _environment: Environment) -> Result<Value, String> {
        Ok(json!({ "running": true }))
    }

    async fn verify_database(&self, _environment: Environment) -> Result<Value, String> {
        Ok(json!({ "reachable": true }))
    }

    async fn verify_api(&self, _environment: Environment) -> Result<Value, String> {
        Ok(json!({ "status": 200 }))
    }

    async fn verify_performance(&self, _environment: Environment) -> Result<Value, String> {
        Ok(json!({ "response_ms": 12 }))
    }
}

struct TestServer {
    app: Router,
    store: Arc<MemoryStore>,
    tokens: TokenVerifier,
}

fn server_with(general: LimiterConfig) -> TestServer {
    let secret = SecretString::from(SECRET.to_string());
    let store = Arc::new(MemoryStore::new());

    let healthy = Arc::new(Healthy);
    let backends = Backends {
        health: healthy.clone(),
        auditor: healthy.clone(),
        backup: healthy.clone(),
        migrations: healthy.clone(),
        release: healthy.clone(),
        verifier: healthy,
    };
    let deployments = Arc::new(DeploymentService::new(
        backends,
        store.clone(),
        store.clone(),
        FsmSettings::default(),
    ));

    let pipeline = Arc::new(SecurityPipeline::new(
        TokenVerifier::new(&secret),
        Arc::new(RolePermissions::marketplace_defaults()),
        Arc::new(RateLimiters::new(
            "/api/auth",
            LimiterConfig::auth_default(),
            general,
        )),
        store.clone(),
        Arc::new(RuleCache::new()),
        store.clone(),
    ));

    let state = Arc::new(ServerState::new(deployments, pipeline, store.clone()));
    TestServer {
        app: router(state),
        store,
        tokens: TokenVerifier::new(&secret),
    }
}

fn server() -> TestServer {
    server_with(LimiterConfig::general_default())
}

impl TestServer {
    fn bearer(&self, role: &str) -> String {
        let token = self
            .tokens
            .issue(&Claims::new(format!("{}-7", role), role, 3600))
            .unwrap();
        format!("Bearer {}", token)
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}

fn get(uri: &str, client: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri).header("x-forwarded-for", client);
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, client: &str, auth: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("x-forwarded-for", client)
        .header("authorization", auth)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_is_public() {
    let server = server();
    let (status, body) = server.send(get("/health", "10.1.0.1", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "matchops");
}

#[tokio::test]
async fn test_api_without_token_is_unauthorized() {
    let server = server();
    let (status, body) = server
        .send(get("/api/security/alerts", "10.1.0.2", None))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let reasons = body["reasons"].as_array().unwrap();
    assert!(reasons.iter().any(|r| r == "No authentication token provided"));
}

#[tokio::test]
async fn test_role_without_grant_is_forbidden() {
    let server = server();
    let auth = server.bearer("contractor");
    let (status, _) = server
        .send(post_json(
            "/api/deployments",
            "10.1.0.3",
            &auth,
            json!({ "environment": "staging", "version": "1.2.0" }),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_deploys_and_reads_status() {
    let server = server();
    let auth = server.bearer("admin");

    let (status, outcome) = server
        .send(post_json(
            "/api/deployments",
            "10.1.0.4",
            &auth,
            json!({ "environment": "staging", "version": "1.2.0" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", outcome);
    assert_eq!(outcome["environment"], "staging");
    assert_eq!(outcome["version"], "1.2.0");

    let id = outcome["deployment_id"].as_str().unwrap();
    let (status, view) = server
        .send(get(&format!("/api/deployments/{}", id), "10.1.0.4", Some(&auth)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["deployment_id"], id);
    assert_eq!(view["status"], "completed");
    assert!(view["entries"].as_array().unwrap().len() >= 2);
}

#[tokio::test]
async fn test_invalid_release_is_bad_request() {
    let server = server();
    let auth = server.bearer("admin");
    let (status, body) = server
        .send(post_json(
            "/api/deployments",
            "10.1.0.5",
            &auth,
            json!({ "environment": "qa", "version": "1.2.0" }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
}

#[tokio::test]
async fn test_unknown_deployment_is_not_found() {
    let server = server();
    let auth = server.bearer("admin");
    let (status, _) = server
        .send(get("/api/deployments/missing", "10.1.0.6", Some(&auth)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_markup_in_body_is_rejected() {
    let server = server();
    let auth = server.bearer("admin");
    let (status, body) = server
        .send(post_json(
            "/api/deployments",
            "10.1.0.7",
            &auth,
            json!({ "environment": "staging", "version": "<script>alert(1)</script>" }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("script_tag"));
}

#[tokio::test]
async fn test_alerts_are_listed() {
    let server = server();
    SecurityAlertStore::append(
        server.store.as_ref(),
        SecurityAlert {
            id: "alert-1".to_string(),
            timestamp: Utc::now(),
            alert_type: AlertType::Threat,
            severity: Severity::High,
            details: json!({ "kind": "brute_force", "client": "10.9.9.9" }),
        },
    )
    .await
    .unwrap();

    let auth = server.bearer("admin");
    let (status, body) = server
        .send(get("/api/security/alerts", "10.1.0.8", Some(&auth)))
        .await;
    assert_eq!(status, StatusCode::OK);
    let alerts = body.as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["type"], "threat");
    assert_eq!(alerts[0]["severity"], "high");
}

#[tokio::test]
async fn test_rate_limited_client_gets_429() {
    let server = server_with(LimiterConfig {
        max: 2,
        ..LimiterConfig::general_default()
    });
    let auth = server.bearer("admin");

    for _ in 0..2 {
        let (status, _) = server
            .send(get("/api/security/alerts", "10.1.0.9", Some(&auth)))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = server
        .send(get("/api/security/alerts", "10.1.0.9", Some(&auth)))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("Too many requests"));

    // Other clients are unaffected
    let (status, _) = server
        .send(get("/api/security/alerts", "10.1.0.10", Some(&auth)))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_handlers_see_sanitized_path_params() {
    let server = server();
    let auth = server.bearer("admin");
    let (status, body) = server
        .send(get("/api/deployments/abc%3Cdef", "10.1.0.11", Some(&auth)))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let error = body["error"].as_str().unwrap();
    assert_eq!(error, "Deployment abcdef not found");
    assert!(!error.contains('<'));
}
