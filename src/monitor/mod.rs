//! Security monitor.
//!
//! Collects [`SecurityAlert`]s from the other components into a bounded,
//! append-only log and detects repeated-failure patterns (brute force,
//! rate-limit abuse, error spikes). Identical `(type, identity)` alerts are suppressed for a
//! cooldown window so a single attacker cannot flood the log.
//!
//! Every emitted alert is also written as an audit event on the `security`
//! tracing target.

mod types;

pub use types::*;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::config::MonitorConfig;
use crate::error::TraversalKind;
use crate::utils::string::log_safe;

/// Window used for the status risk score.
const STATUS_WINDOW: Duration = Duration::from_secs(3600);

/// Upper bound on remembered rejection timestamps.
const MAX_TRACKED_REJECTIONS: usize = 10_000;

/// An identity with more errors than this in its window is suspicious.
const SUSPICIOUS_ERRORS: usize = 5;

/// An identity with more rate-limit blocks than this in its window is
/// suspicious.
const SUSPICIOUS_BLOCKS: usize = 3;

/// Above this many suspicious identities, recommend temporary blocking.
const MANY_SUSPICIOUS: usize = 5;

#[derive(Default)]
struct Counters {
    alerts_emitted: AtomicU64,
    alerts_suppressed: AtomicU64,
    auth_failures: AtomicU64,
    rate_limit_violations: AtomicU64,
    path_violations: AtomicU64,
    command_rejections: AtomicU64,
    session_hijacks: AtomicU64,
    errors: AtomicU64,
}

struct StoredAlert {
    at: Instant,
    alert: SecurityAlert,
}

/// In-memory alert log and pattern detector. Shared as `Arc<SecurityMonitor>`.
pub struct SecurityMonitor {
    config: MonitorConfig,
    alerts: Mutex<VecDeque<StoredAlert>>,
    last_emitted: DashMap<(AlertType, String), Instant>,
    auth_failures: DashMap<String, VecDeque<Instant>>,
    rate_violations: DashMap<String, VecDeque<Instant>>,
    errors: DashMap<String, VecDeque<Instant>>,
    rejections: Mutex<VecDeque<Instant>>,
    counters: Counters,
}

impl SecurityMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            alerts: Mutex::new(VecDeque::new()),
            last_emitted: DashMap::new(),
            auth_failures: DashMap::new(),
            rate_violations: DashMap::new(),
            errors: DashMap::new(),
            rejections: Mutex::new(VecDeque::new()),
            counters: Counters::default(),
        }
    }

    fn suppression_window(&self) -> Duration {
        Duration::from_secs(self.config.suppression_window_secs)
    }

    fn pattern_window(&self) -> Duration {
        Duration::from_secs(self.config.brute_force_window_secs)
    }

    fn error_window(&self) -> Duration {
        Duration::from_secs(self.config.error_window_secs)
    }

    /// Record an alert. Returns `false` when it was suppressed as a duplicate
    /// of a recent alert with the same type and identity.
    pub fn emit(&self, alert: SecurityAlert) -> bool {
        let now = Instant::now();
        let key = (alert.alert_type, alert.identity.clone());
        match self.last_emitted.entry(key) {
            Entry::Occupied(mut entry) => {
                if now.duration_since(*entry.get()) < self.suppression_window() {
                    self.counters
                        .alerts_suppressed
                        .fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                entry.insert(now);
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
            }
        }

        let severity = match alert.severity {
            AlertSeverity::Low | AlertSeverity::Medium => AuditSeverity::Warning,
            AlertSeverity::High | AlertSeverity::Critical => AuditSeverity::Critical,
        };
        log_audit_event(
            AuditCategory::Alert,
            severity,
            alert.alert_type.as_str(),
            &format!(
                "[{}] identity={} {}",
                alert.severity,
                log_safe(&alert.identity),
                alert.message
            ),
            false,
        );

        let mut alerts = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        while alerts.len() >= self.config.max_alerts.max(1) {
            alerts.pop_front();
        }
        alerts.push_back(StoredAlert { at: now, alert });
        self.counters.alerts_emitted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Push `now` onto the identity's window and return the pruned count.
    fn bump(
        &self,
        map: &DashMap<String, VecDeque<Instant>>,
        identity: &str,
        window: Duration,
    ) -> usize {
        let now = Instant::now();
        let mut entry = map.entry(identity.to_string()).or_default();
        while entry
            .front()
            .is_some_and(|&t| now.duration_since(t) >= window)
        {
            entry.pop_front();
        }
        entry.push_back(now);
        entry.len()
    }

    fn note_rejection(&self) {
        let mut rejections = self
            .rejections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if rejections.len() >= MAX_TRACKED_REJECTIONS {
            rejections.pop_front();
        }
        rejections.push_back(Instant::now());
    }

    /// Record a failed authentication. Raises `BruteForce` once the identity
    /// reaches the configured threshold inside the window.
    pub fn record_auth_failure(&self, identity: &str, endpoint: &str) -> bool {
        self.counters.auth_failures.fetch_add(1, Ordering::Relaxed);
        self.note_rejection();
        let count = self.bump(&self.auth_failures, identity, self.pattern_window());
        if count < self.config.brute_force_threshold as usize {
            return false;
        }
        self.emit(
            SecurityAlert::new(
                AlertType::BruteForce,
                AlertSeverity::High,
                identity,
                format!("{} failed attempts on '{}'", count, log_safe(endpoint)),
            )
            .with_details(json!({ "endpoint": log_safe(endpoint), "failures": count })),
        )
    }

    /// Record that a rate limit blocked `identity`. Every block raises a
    /// `RateLimitAbuse` alert; repeated blocks inside the window escalate its
    /// severity once the abuse threshold is reached.
    pub fn record_rate_limit_block(
        &self,
        identity: &str,
        endpoint: &str,
        block: Duration,
    ) -> bool {
        self.counters
            .rate_limit_violations
            .fetch_add(1, Ordering::Relaxed);
        self.note_rejection();
        let count = self.bump(&self.rate_violations, identity, self.pattern_window());
        let severity = if count >= self.config.rate_limit_abuse_threshold as usize {
            AlertSeverity::High
        } else {
            AlertSeverity::Medium
        };
        self.emit(
            SecurityAlert::new(
                AlertType::RateLimitAbuse,
                severity,
                identity,
                format!("blocked on '{}' for {}s", log_safe(endpoint), block.as_secs()),
            )
            .with_details(json!({
                "endpoint": log_safe(endpoint),
                "blocks": count,
                "block_secs": block.as_secs(),
            })),
        )
    }

    /// Record a failed request from `identity`. Raises `ErrorSpike` once the
    /// identity reaches the error threshold inside the error window.
    pub fn record_error(&self, identity: &str, endpoint: &str) -> bool {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        let window = self.error_window();
        let count = self.bump(&self.errors, identity, window);
        if count < self.config.error_threshold.max(1) as usize {
            return false;
        }
        self.emit(
            SecurityAlert::new(
                AlertType::ErrorSpike,
                AlertSeverity::Medium,
                identity,
                format!(
                    "{} errors within {}s, last on '{}'",
                    count,
                    window.as_secs(),
                    log_safe(endpoint)
                ),
            )
            .with_details(json!({
                "endpoint": log_safe(endpoint),
                "errors": count,
                "window_secs": window.as_secs(),
            })),
        )
    }

    /// Record a rejected path. Only hostile rejections raise an alert.
    pub fn record_path_violation(&self, identity: &str, kind: TraversalKind) -> bool {
        self.counters.path_violations.fetch_add(1, Ordering::Relaxed);
        self.note_rejection();
        if !kind.is_hostile() {
            return false;
        }
        let severity = match kind {
            TraversalKind::SymlinkEscape | TraversalKind::BoundaryEscape => AlertSeverity::High,
            _ => AlertSeverity::Medium,
        };
        self.emit(
            SecurityAlert::new(
                AlertType::PathTraversal,
                severity,
                identity,
                format!("path rejected: {}", kind),
            )
            .with_details(json!({ "kind": kind.to_string() })),
        )
    }

    /// Record a rejected command or URL. `hostile` marks injection-shaped input.
    pub fn record_command_rejection(&self, identity: &str, reason: &str, hostile: bool) -> bool {
        self.counters
            .command_rejections
            .fetch_add(1, Ordering::Relaxed);
        self.note_rejection();
        if !hostile {
            return false;
        }
        self.emit(SecurityAlert::new(
            AlertType::SuspiciousRequest,
            AlertSeverity::Medium,
            identity,
            format!("command rejected: {}", log_safe(reason)),
        ))
    }

    /// Record a session whose client fingerprint changed mid-session.
    pub fn record_session_hijack(&self, user_id: &str, session_hint: &str, reason: &str) -> bool {
        self.counters.session_hijacks.fetch_add(1, Ordering::Relaxed);
        self.note_rejection();
        self.emit(
            SecurityAlert::new(
                AlertType::SessionHijack,
                AlertSeverity::Critical,
                user_id,
                format!("possible session hijack: {}", reason),
            )
            .with_details(json!({ "session": session_hint, "reason": reason })),
        )
    }

    /// Most recent alerts, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Vec<SecurityAlert> {
        let alerts = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        alerts
            .iter()
            .rev()
            .take(limit)
            .map(|s| s.alert.clone())
            .collect()
    }

    /// All stored alerts for one identity, oldest first.
    pub fn alerts_for(&self, identity: &str) -> Vec<SecurityAlert> {
        let alerts = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        alerts
            .iter()
            .filter(|s| s.alert.identity == identity)
            .map(|s| s.alert.clone())
            .collect()
    }

    pub fn metrics(&self) -> MonitorMetrics {
        let c = &self.counters;
        MonitorMetrics {
            alerts_emitted: c.alerts_emitted.load(Ordering::Relaxed),
            alerts_suppressed: c.alerts_suppressed.load(Ordering::Relaxed),
            auth_failures: c.auth_failures.load(Ordering::Relaxed),
            rate_limit_violations: c.rate_limit_violations.load(Ordering::Relaxed),
            path_violations: c.path_violations.load(Ordering::Relaxed),
            command_rejections: c.command_rejections.load(Ordering::Relaxed),
            session_hijacks: c.session_hijacks.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
        }
    }

    /// Identities whose live windows cross a suspicion threshold, with
    /// recommendations for the operator.
    pub fn threat_indicators(&self) -> ThreatIndicators {
        let now = Instant::now();
        let live = |times: &VecDeque<Instant>, window: Duration| {
            times
                .iter()
                .filter(|&&t| now.duration_since(t) < window)
                .count()
        };
        let counts = |map: &DashMap<String, VecDeque<Instant>>, window: Duration| {
            map.iter()
                .map(|entry| (entry.key().clone(), live(entry.value(), window)))
                .filter(|(_, n)| *n > 0)
                .collect::<HashMap<String, usize>>()
        };

        let errors = counts(&self.errors, self.error_window());
        let auth = counts(&self.auth_failures, self.pattern_window());
        let blocks = counts(&self.rate_violations, self.pattern_window());
        let brute_force = self.config.brute_force_threshold.max(1) as usize;

        let mut identities: Vec<&String> = errors
            .keys()
            .chain(auth.keys())
            .chain(blocks.keys())
            .collect();
        identities.sort();
        identities.dedup();

        let suspicious: Vec<SuspiciousIdentity> = identities
            .into_iter()
            .map(|identity| SuspiciousIdentity {
                identity: identity.clone(),
                errors: errors.get(identity).copied().unwrap_or(0),
                auth_failures: auth.get(identity).copied().unwrap_or(0),
                rate_limit_blocks: blocks.get(identity).copied().unwrap_or(0),
            })
            .filter(|s| {
                s.errors > SUSPICIOUS_ERRORS
                    || s.auth_failures >= brute_force
                    || s.rate_limit_blocks > SUSPICIOUS_BLOCKS
            })
            .collect();

        let recommendations =
            recommendations(&suspicious, self.config.rate_limit_abuse_threshold);
        ThreatIndicators {
            generated_at: Utc::now(),
            suspicious,
            recommendations,
        }
    }

    /// Risk summary over the last hour: rejections weigh 10, alerts 20.
    pub fn status(&self) -> MonitorStatus {
        let now = Instant::now();
        let recent = |t: &Instant| now.duration_since(*t) < STATUS_WINDOW;

        let recent_rejections = self
            .rejections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|t| recent(t))
            .count();
        let (recent_alerts, stored_alerts) = {
            let alerts = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
            (alerts.iter().filter(|s| recent(&s.at)).count(), alerts.len())
        };

        let risk_score = recent_rejections as u64 * 10 + recent_alerts as u64 * 20;
        MonitorStatus {
            risk_level: RiskLevel::from_score(risk_score),
            risk_score,
            recent_rejections,
            recent_alerts,
            stored_alerts,
            metrics: self.metrics(),
        }
    }

    /// Drop expired suppression entries and empty pattern windows.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let suppression = self.suppression_window();
        self.last_emitted
            .retain(|_, at| now.duration_since(*at) < suppression);
        for (map, window) in [
            (&self.auth_failures, self.pattern_window()),
            (&self.rate_violations, self.pattern_window()),
            (&self.errors, self.error_window()),
        ] {
            map.retain(|_, times| {
                while times
                    .front()
                    .is_some_and(|&t| now.duration_since(t) >= window)
                {
                    times.pop_front();
                }
                !times.is_empty()
            });
        }
        self.rejections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|t| now.duration_since(*t) < STATUS_WINDOW);
    }

    /// Number of identities with live failure windows (for testing).
    #[cfg(test)]
    fn tracked_identities(&self) -> usize {
        self.auth_failures.len() + self.rate_violations.len() + self.errors.len()
    }
}

fn recommendations(suspicious: &[SuspiciousIdentity], abuse_threshold: u32) -> Vec<String> {
    let mut out = Vec::new();
    if suspicious.is_empty() {
        return out;
    }
    out.push("Review access logs for the listed identities".to_string());
    if suspicious.iter().any(|s| s.auth_failures > 0) {
        out.push("Check authentication patterns for credential guessing".to_string());
    }
    if suspicious.len() > MANY_SUSPICIOUS {
        out.push("Consider temporarily blocking the most active identities".to_string());
    }
    if suspicious
        .iter()
        .any(|s| s.rate_limit_blocks >= abuse_threshold.max(1) as usize)
    {
        out.push("Tighten rate limits on the affected endpoints".to_string());
    }
    out
}

impl Default for SecurityMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}
