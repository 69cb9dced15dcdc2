//! HTTP health probes for environment checks and post-deploy verification

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::deploy::backends::{HealthChecker, Verifier};
use crate::errors::OpsError;
use crate::models::deployment::Environment;
use crate::telemetry::sample_host_load;

/// Health endpoints of one environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentEndpoints {
    /// Probed before a release starts
    #[serde(default)]
    pub health_url: Option<String>,

    /// Public API health endpoint
    #[serde(default)]
    pub api_url: Option<String>,

    /// Endpoint reporting database connectivity
    #[serde(default)]
    pub database_url: Option<String>,

    /// Service name to health URL
    #[serde(default)]
    pub services: BTreeMap<String, String>,
}

/// Limits for the performance check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceThresholds {
    #[serde(default = "default_max_api_latency_ms")]
    pub max_api_latency_ms: u64,

    #[serde(default = "default_max_percent")]
    pub max_cpu_percent: f32,

    #[serde(default = "default_max_percent")]
    pub max_memory_percent: f32,
}

fn default_max_api_latency_ms() -> u64 {
    1000
}

fn default_max_percent() -> f32 {
    95.0
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            max_api_latency_ms: default_max_api_latency_ms(),
            max_cpu_percent: default_max_percent(),
            max_memory_percent: default_max_percent(),
        }
    }
}

/// Probes configured endpoints; an unconfigured endpoint passes with a note
pub struct HttpVerifier {
    client: reqwest::Client,
    endpoints: HashMap<Environment, EnvironmentEndpoints>,
    thresholds: PerformanceThresholds,
}

impl HttpVerifier {
    pub fn new(
        endpoints: HashMap<Environment, EnvironmentEndpoints>,
        thresholds: PerformanceThresholds,
        request_timeout: Duration,
    ) -> Result<Self, OpsError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoints,
            thresholds,
        })
    }

    fn endpoints(&self, environment: Environment) -> EnvironmentEndpoints {
        self.endpoints.get(&environment).cloned().unwrap_or_default()
    }

    /// GET `url`, requiring a 2xx; returns the round-trip time
    async fn probe(&self, url: &str) -> Result<Duration, String> {
        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("{} unreachable: {}", url, e))?;
        let elapsed = started.elapsed();

        let status = response.status();
        debug!("Probe {} -> {} in {:?}", url, status, elapsed);
        if !status.is_success() {
            return Err(format!("{} returned {}", url, status));
        }
        Ok(elapsed)
    }

    async fn probe_optional(
        &self,
        what: &str,
        url: Option<&str>,
    ) -> Result<serde_json::Value, String> {
        match url {
            Some(url) => {
                let elapsed = self.probe(url).await?;
                Ok(json!({ "url": url, "latency_ms": elapsed.as_millis() as u64 }))
            }
            None => Ok(json!({ "skipped": format!("no {} endpoint configured", what) })),
        }
    }
}

#[async_trait]
impl HealthChecker for HttpVerifier {
    async fn check_environment(&self, environment: Environment) -> Result<(), String> {
        let endpoints = self.endpoints(environment);
        self.probe_optional("health", endpoints.health_url.as_deref())
            .await
            .map(|_| ())
            .map_err(|e| format!("Environment {} is unhealthy: {}", environment, e))
    }
}

#[async_trait]
impl Verifier for HttpVerifier {
    async fn verify_services(&self, environment: Environment) -> Result<serde_json::Value, String> {
        let endpoints = self.endpoints(environment);
        let probes = endpoints
            .services
            .iter()
            .map(|(name, url)| async move { (name.clone(), self.probe(url).await) });

        let mut healthy = Vec::new();
        let mut failures = Vec::new();
        for (name, result) in join_all(probes).await {
            match result {
                Ok(_) => healthy.push(name),
                Err(e) => failures.push(format!("{} ({})", name, e)),
            }
        }

        if failures.is_empty() {
            Ok(json!({ "healthy": healthy }))
        } else {
            Err(format!("Unhealthy services: {}", failures.join(", ")))
        }
    }

    async fn verify_database(&self, environment: Environment) -> Result<serde_json::Value, String> {
        let endpoints = self.endpoints(environment);
        self.probe_optional("database", endpoints.database_url.as_deref())
            .await
            .map_err(|e| format!("Database check failed: {}", e))
    }

    async fn verify_api(&self, environment: Environment) -> Result<serde_json::Value, String> {
        let endpoints = self.endpoints(environment);
        self.probe_optional("api", endpoints.api_url.as_deref())
            .await
            .map_err(|e| format!("API check failed: {}", e))
    }

    async fn verify_performance(
        &self,
        environment: Environment,
    ) -> Result<serde_json::Value, String> {
        let endpoints = self.endpoints(environment);
        let mut problems = Vec::new();

        let latency_ms = match endpoints.api_url.as_deref() {
            Some(url) => {
                let elapsed = self.probe(url).await?.as_millis() as u64;
                if elapsed > self.thresholds.max_api_latency_ms {
                    problems.push(format!(
                        "API latency {}ms exceeds {}ms",
                        elapsed, self.thresholds.max_api_latency_ms
                    ));
                }
                Some(elapsed)
            }
            None => None,
        };

        let load = sample_host_load().await;
        if load.cpu_usage > self.thresholds.max_cpu_percent {
            problems.push(format!(
                "CPU usage {:.1}% exceeds {:.1}%",
                load.cpu_usage, self.thresholds.max_cpu_percent
            ));
        }
        if load.memory_percent > self.thresholds.max_memory_percent {
            problems.push(format!(
                "Memory usage {:.1}% exceeds {:.1}%",
                load.memory_percent, self.thresholds.max_memory_percent
            ));
        }

        if problems.is_empty() {
            Ok(json!({
                "api_latency_ms": latency_ms,
                "cpu_usage": load.cpu_usage,
                "memory_percent": load.memory_percent,
            }))
        } else {
            Err(format!("Performance check failed: {}", problems.join(", ")))
        }
    }
}
