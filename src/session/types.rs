//! Session types for ArchGuard
//!
//! A session binds an authenticated user to the client fingerprint (IP and
//! user agent) it was created from. Sessions only ever move out of
//! [`SessionState::Active`]; nothing brings them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::utils::string::prefix_chars;

/// Why a session was invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    /// Explicit logout of this session.
    Logout,
    /// Logout of every session of the user.
    LogoutAll,
    /// Evicted to make room under the per-user cap.
    CapEviction,
    /// Presented from a different IP address.
    IpMismatch,
    /// Presented with a different user agent.
    UserAgentMismatch,
}

impl InvalidationReason {
    /// Whether this reason indicates a possible hijack.
    pub fn is_suspicious(&self) -> bool {
        matches!(self, Self::IpMismatch | Self::UserAgentMismatch)
    }
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Logout => write!(f, "logout"),
            Self::LogoutAll => write!(f, "logout_all"),
            Self::CapEviction => write!(f, "cap_eviction"),
            Self::IpMismatch => write!(f, "ip_mismatch"),
            Self::UserAgentMismatch => write!(f, "user_agent_mismatch"),
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Expired,
    Invalidated(InvalidationReason),
}

/// An authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// 64 hex characters (SHA-256).
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    /// Last successful validation.
    pub last_activity: DateTime<Utc>,
    pub ip: String,
    pub user_agent: String,
    pub state: SessionState,
}

impl Session {
    /// Create a new active session.
    ///
    /// # Example
    /// ```
    /// use archguard::session::Session;
    ///
    /// let session = Session::new("abc123", "alice", "10.0.0.1", "curl/8.0");
    /// assert!(session.is_active());
    /// assert_eq!(session.created_at, session.last_activity);
    /// ```
    pub fn new(session_id: &str, user_id: &str, ip: &str, user_agent: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            last_activity: now,
            ip: ip.to_string(),
            user_agent: user_agent.to_string(),
            state: SessionState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Time since the last successful validation.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_activity).to_std().unwrap_or_default()
    }

    /// Whether the idle time exceeds `timeout` at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.idle_for(now) > timeout
    }

    /// Session id prefix for log lines.
    pub fn short_id(&self) -> String {
        prefix_chars(&self.session_id, 8)
    }
}
