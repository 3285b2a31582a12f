//! Structured audit logging for security-sensitive events.
//!
//! Emits structured `tracing` events on the `security` target with consistent
//! field names so that downstream log aggregators can filter on `audit=true`
//! and query by `category`, `event_type`, `severity`, etc. The logging setup
//! can route this target to a dedicated security log file.

use tracing::{error, info, warn};

/// Tracing target for every security event.
pub const SECURITY_TARGET: &str = "security";

/// Broad category of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditCategory {
    /// Path traversal or symlink escape.
    PathSecurity,
    /// Subprocess allowlist violation or execution event.
    CommandSecurity,
    /// Repository URL rejected.
    UrlSecurity,
    /// Credential or PII redacted from process output.
    OutputRedaction,
    /// Throttling decision.
    RateLimit,
    /// Session lifecycle or hijack attempt.
    SessionSecurity,
    /// Alert raised by the security monitor.
    Alert,
}

impl std::fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PathSecurity => write!(f, "path_security"),
            Self::CommandSecurity => write!(f, "command_security"),
            Self::UrlSecurity => write!(f, "url_security"),
            Self::OutputRedaction => write!(f, "output_redaction"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::SessionSecurity => write!(f, "session_security"),
            Self::Alert => write!(f, "alert"),
        }
    }
}

/// Severity level for audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditSeverity {
    /// Informational: action was noted but not harmful.
    Info,
    /// Warning: action was denied or sanitized, likely a mistake.
    Warning,
    /// Critical: hostile input was blocked.
    Critical,
}

impl std::fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Emit a structured audit event via `tracing`.
///
/// All audit events carry `audit = true` so log pipelines can filter on them.
/// `detail` may contain untrusted input; callers pass it through
/// [`crate::utils::string::log_safe`] first.
pub fn log_audit_event(
    category: AuditCategory,
    severity: AuditSeverity,
    event_type: &str,
    detail: &str,
    blocked: bool,
) {
    match severity {
        AuditSeverity::Info => {
            info!(
                target: "security",
                audit = true,
                category = %category,
                severity = %severity,
                event_type = event_type,
                detail = detail,
                blocked = blocked,
                "audit event"
            );
        }
        AuditSeverity::Warning => {
            warn!(
                target: "security",
                audit = true,
                category = %category,
                severity = %severity,
                event_type = event_type,
                detail = detail,
                blocked = blocked,
                "audit event"
            );
        }
        AuditSeverity::Critical => {
            error!(
                target: "security",
                audit = true,
                category = %category,
                severity = %severity,
                event_type = event_type,
                detail = detail,
                blocked = blocked,
                "audit event"
            );
        }
    }
}
