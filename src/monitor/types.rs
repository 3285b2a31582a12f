//! Alert and status types for the security monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How urgent an alert is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    /// Contribution of one alert of this severity to a risk score.
    pub fn weight(&self) -> u32 {
        match self {
            Self::Low => 10,
            Self::Medium => 20,
            Self::High => 50,
            Self::Critical => 100,
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// What kind of pattern triggered an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    BruteForce,
    SuspiciousRequest,
    RateLimitAbuse,
    ErrorSpike,
    SessionHijack,
    PathTraversal,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BruteForce => "brute_force",
            Self::SuspiciousRequest => "suspicious_request",
            Self::RateLimitAbuse => "rate_limit_abuse",
            Self::ErrorSpike => "error_spike",
            Self::SessionHijack => "session_hijack",
            Self::PathTraversal => "path_traversal",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded security alert. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    /// Client identity (IP, user id, or `"system"`).
    pub identity: String,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
    pub risk_score: u32,
}

impl SecurityAlert {
    pub fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        identity: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_type,
            severity,
            message: message.into(),
            identity: identity.into(),
            timestamp: Utc::now(),
            details: serde_json::Value::Null,
            risk_score: severity.weight(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Coarse risk band derived from recent activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: u64) -> Self {
        match score {
            s if s >= 200 => Self::Critical,
            s if s >= 100 => Self::High,
            s if s >= 50 => Self::Medium,
            s if s >= 20 => Self::Low,
            _ => Self::Minimal,
        }
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorMetrics {
    pub alerts_emitted: u64,
    pub alerts_suppressed: u64,
    pub auth_failures: u64,
    pub rate_limit_violations: u64,
    pub path_violations: u64,
    pub command_rejections: u64,
    pub session_hijacks: u64,
    pub errors: u64,
}

/// Summary returned by [`super::SecurityMonitor::status`].
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub risk_level: RiskLevel,
    pub risk_score: u64,
    pub recent_rejections: usize,
    pub recent_alerts: usize,
    pub stored_alerts: usize,
    pub metrics: MonitorMetrics,
}

/// Recent activity of one identity that crossed a suspicion threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuspiciousIdentity {
    pub identity: String,
    pub errors: usize,
    pub auth_failures: usize,
    pub rate_limit_blocks: usize,
}

/// Snapshot returned by [`super::SecurityMonitor::threat_indicators`].
#[derive(Debug, Clone, Serialize)]
pub struct ThreatIndicators {
    pub generated_at: DateTime<Utc>,
    /// Sorted by identity.
    pub suspicious: Vec<SuspiciousIdentity>,
    pub recommendations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_bands() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Minimal);
        assert_eq!(RiskLevel::from_score(19), RiskLevel::Minimal);
        assert_eq!(RiskLevel::from_score(20), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(50), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(100), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(250), RiskLevel::Critical);
    }

    #[test]
    fn test_alert_serializes_screaming_case() {
        let alert = SecurityAlert::new(
            AlertType::SessionHijack,
            AlertSeverity::Critical,
            "alice",
            "ip changed",
        );
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["alert_type"], "SESSION_HIJACK");
        assert_eq!(json["severity"], "CRITICAL");
        assert_eq!(json["risk_score"], 100);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Critical > AlertSeverity::High);
        assert!(AlertSeverity::Low < AlertSeverity::Medium);
    }
}
