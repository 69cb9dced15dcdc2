//! Background security monitor
//!
//! Each sweep reads the security log appended since the previous sweep,
//! turns repeated failures into alerts, and restricts clients that burst
//! through the rate limiter.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::OpsError;
use crate::models::security::{
    AlertType, ClientRestriction, SecurityAlert, SecurityLogEntry, Severity,
};
use crate::security::pipeline::{CheckKind, VALIDATION_FAILURE_EVENT};
use crate::security::rate_limit::RateLimiters;
use crate::security::rules::RuleCache;
use crate::store::{SecurityAlertStore, SecurityLogStore};
use crate::utils::generate_uuid;

const UNKNOWN_CLIENT: &str = "unknown";

/// Monitor thresholds
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Time between sweeps
    pub interval: Duration,

    /// Authentication failures per client per sweep that count as brute force
    pub brute_force_threshold: usize,

    /// Suspicious matches per client per sweep that make the threat high severity
    pub suspicious_high_threshold: usize,

    /// Rate-limit rejections per client per sweep that count as an anomaly
    pub rate_limit_anomaly_threshold: usize,

    /// How long an anomalous client stays restricted
    pub restriction_ttl: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            brute_force_threshold: 5,
            suspicious_high_threshold: 3,
            rate_limit_anomaly_threshold: 1,
            restriction_ttl: Duration::from_secs(15 * 60),
        }
    }
}

/// One threat or anomaly attributed to a client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub client: String,

    /// `suspicious_input`, `brute_force` or `rate_limit_burst`
    pub kind: String,

    /// Occurrences seen in the sweep
    pub count: usize,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<Value>,
}

impl Finding {
    fn to_alert(&self, now: DateTime<Utc>) -> SecurityAlert {
        SecurityAlert {
            id: generate_uuid(),
            timestamp: now,
            alert_type: self.alert_type,
            severity: self.severity,
            details: json!({
                "kind": self.kind,
                "client": self.client,
                "count": self.count,
                "samples": self.samples,
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    pub threats: Vec<Finding>,
    pub anomalies: Vec<Finding>,
}

#[derive(Default)]
struct ClientTally {
    auth_failures: usize,
    rate_limited: usize,
    suspicious: Vec<Value>,
}

/// Failed checks named in a `validation_failure` row
fn failed_checks(details: &Value) -> Vec<&str> {
    details
        .get("failures")
        .and_then(Value::as_array)
        .map(|failures| {
            failures
                .iter()
                .filter_map(|f| f.get("check").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

/// Group validation failures by client into threats and anomalies
pub fn analyze(entries: &[SecurityLogEntry], settings: &MonitorSettings) -> Analysis {
    let mut tallies: BTreeMap<String, ClientTally> = BTreeMap::new();

    for entry in entries.iter().filter(|e| e.event == VALIDATION_FAILURE_EVENT) {
        let client = entry
            .client
            .clone()
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());
        let tally = tallies.entry(client).or_default();

        let checks = failed_checks(&entry.details);
        if checks.contains(&CheckKind::Authentication.as_str()) {
            tally.auth_failures += 1;
        }
        if checks.contains(&CheckKind::RateLimit.as_str()) {
            tally.rate_limited += 1;
        }
        if let Some(matches) = entry.details.get("suspicious").and_then(Value::as_array) {
            tally.suspicious.extend(matches.iter().cloned());
        }
    }

    let mut analysis = Analysis::default();
    for (client, tally) in tallies {
        if !tally.suspicious.is_empty() {
            let count = tally.suspicious.len();
            analysis.threats.push(Finding {
                alert_type: AlertType::Threat,
                severity: if count >= settings.suspicious_high_threshold {
                    Severity::High
                } else {
                    Severity::Medium
                },
                client: client.clone(),
                kind: "suspicious_input".to_string(),
                count,
                samples: tally.suspicious,
            });
        }

        if tally.auth_failures >= settings.brute_force_threshold {
            analysis.threats.push(Finding {
                alert_type: AlertType::Threat,
                severity: Severity::High,
                client: client.clone(),
                kind: "brute_force".to_string(),
                count: tally.auth_failures,
                samples: Vec::new(),
            });
        }

        if tally.rate_limited > 0 && tally.rate_limited >= settings.rate_limit_anomaly_threshold {
            analysis.anomalies.push(Finding {
                alert_type: AlertType::Anomaly,
                severity: Severity::Medium,
                client,
                kind: "rate_limit_burst".to_string(),
                count: tally.rate_limited,
                samples: Vec::new(),
            });
        }
    }

    analysis
}

/// Hook for automated response to high-severity threats
#[async_trait]
pub trait ThreatResponder: Send + Sync {
    async fn respond(&self, alert: &SecurityAlert);
}

/// Logs the threat and takes no action
pub struct NoopResponder;

#[async_trait]
impl ThreatResponder for NoopResponder {
    async fn respond(&self, alert: &SecurityAlert) {
        info!(
            alert = %alert.id,
            "High-severity threat recorded, no automated response configured"
        );
    }
}

/// Counts from one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub entries: usize,
    pub threats: usize,
    pub anomalies: usize,
    pub responses: usize,
    pub restrictions_added: usize,
    pub restrictions_expired: usize,
    pub limiter_keys_pruned: usize,
}

pub struct SecurityMonitor {
    log_store: Arc<dyn SecurityLogStore>,
    alert_store: Arc<dyn SecurityAlertStore>,
    live_rules: Arc<RuleCache>,
    limiters: Arc<RateLimiters>,
    responder: Arc<dyn ThreatResponder>,
    settings: MonitorSettings,

    cursor: Mutex<SweepCursor>,
}

/// Position in the security log
///
/// Rows are tracked by append position, not timestamp: a row stamped
/// earlier can land after a later one.
#[derive(Debug)]
struct SweepCursor {
    offset: usize,

    /// Rows older than this are skipped; only set before the first sweep
    not_before: Option<DateTime<Utc>>,
}

impl SecurityMonitor {
    /// The first sweep looks back one interval
    pub fn new(
        log_store: Arc<dyn SecurityLogStore>,
        alert_store: Arc<dyn SecurityAlertStore>,
        live_rules: Arc<RuleCache>,
        limiters: Arc<RateLimiters>,
        responder: Arc<dyn ThreatResponder>,
        settings: MonitorSettings,
    ) -> Self {
        let lookback = TimeDelta::from_std(settings.interval).unwrap_or(TimeDelta::minutes(5));
        Self {
            log_store,
            alert_store,
            live_rules,
            limiters,
            responder,
            cursor: Mutex::new(SweepCursor {
                offset: 0,
                not_before: Some(Utc::now() - lookback),
            }),
            settings,
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Run one sweep
    ///
    /// Returns `None` when another sweep is still running.
    pub async fn tick(&self) -> Result<Option<TickSummary>, OpsError> {
        let Ok(mut cursor) = self.cursor.try_lock() else {
            debug!("Security sweep already running, skipping");
            return Ok(None);
        };

        let now = Utc::now();
        let rows = self.log_store.entries_from(cursor.offset).await?;
        let next_offset = cursor.offset + rows.len();
        let entries: Vec<SecurityLogEntry> = match cursor.not_before {
            Some(not_before) => rows.into_iter().filter(|e| e.timestamp > not_before).collect(),
            None => rows,
        };
        let analysis = analyze(&entries, &self.settings);

        let mut summary = TickSummary {
            entries: entries.len(),
            ..Default::default()
        };

        for finding in &analysis.threats {
            let alert = finding.to_alert(now);
            warn!(
                client = %finding.client,
                severity = ?finding.severity,
                "Security threat detected: {} ({} occurrences)",
                finding.kind,
                finding.count
            );
            self.alert_store.append(alert.clone()).await?;
            summary.threats += 1;

            if alert.severity == Severity::High {
                self.responder.respond(&alert).await;
                summary.responses += 1;
            }
        }

        let ttl = TimeDelta::from_std(self.settings.restriction_ttl)
            .unwrap_or(TimeDelta::minutes(15));
        for finding in &analysis.anomalies {
            warn!(
                client = %finding.client,
                "Security anomaly detected: {} ({} occurrences)",
                finding.kind,
                finding.count
            );
            self.alert_store.append(finding.to_alert(now)).await?;
            summary.anomalies += 1;

            self.live_rules.restrict(ClientRestriction {
                client: finding.client.clone(),
                reason: format!("{} ({} occurrences)", finding.kind, finding.count),
                expires_at: now + ttl,
            });
            summary.restrictions_added += 1;
        }

        summary.restrictions_expired = self.live_rules.purge_expired(now);
        summary.limiter_keys_pruned = self.limiters.prune();

        cursor.offset = next_offset;
        cursor.not_before = None;

        debug!("Security sweep finished: {:?}", summary);
        Ok(Some(summary))
    }
}
