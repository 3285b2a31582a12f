//! Session lifecycle management.
//!
//! The [`SessionManager`] owns every session in the process. It enforces the
//! idle timeout, the per-user session cap (evicting the oldest session first),
//! and client-fingerprint consistency: a session presented from a different IP
//! or user agent is invalidated and reported as a possible hijack instead of
//! being refreshed.
//!
//! State lives in two sharded maps. Whenever both are needed the per-user
//! index is locked before the session table, never the other way round.

mod types;

pub use types::{InvalidationReason, Session, SessionState};

use chrono::Utc;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::config::SessionsConfig;
use crate::monitor::SecurityMonitor;
use crate::utils::string::log_safe;

/// Generate a session identifier: SHA-256 over fresh UUID entropy and the
/// creation time, hex encoded.
pub fn generate_session_id() -> String {
    let mut hasher = Sha256::new();
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    hasher.update(
        Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_le_bytes(),
    );
    hex::encode(hasher.finalize())
}

/// Tracks authenticated sessions. Shared as `Arc<SessionManager>`.
pub struct SessionManager {
    timeout: Duration,
    max_per_user: usize,
    bind_ip: bool,
    bind_user_agent: bool,
    sessions: DashMap<String, Session>,
    /// user id -> session ids in creation order
    by_user: DashMap<String, VecDeque<String>>,
    monitor: Option<Arc<SecurityMonitor>>,
}

impl SessionManager {
    pub fn new(config: &SessionsConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_per_user: config.max_sessions_per_user.max(1),
            bind_ip: config.bind_ip,
            bind_user_agent: config.bind_user_agent,
            sessions: DashMap::new(),
            by_user: DashMap::new(),
            monitor: None,
        }
    }

    /// Report hijack attempts to `monitor`.
    pub fn with_monitor(mut self, monitor: Arc<SecurityMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Create a session and return its id. When the user is at the cap, the
    /// oldest session is evicted first.
    pub fn create(&self, user_id: &str, ip: &str, user_agent: &str) -> String {
        let session_id = generate_session_id();
        let now = Utc::now();

        let mut ids = self.by_user.entry(user_id.to_string()).or_default();

        // Drop ids whose sessions are gone or no longer active. Their records
        // are purged below, once no session guard is held.
        let mut stale = Vec::new();
        ids.retain(|id| {
            let keep = match self.sessions.get_mut(id) {
                Some(mut s) if s.is_active() => {
                    if s.is_expired_at(now, self.timeout) {
                        s.state = SessionState::Expired;
                        false
                    } else {
                        true
                    }
                }
                _ => false,
            };
            if !keep {
                stale.push(id.clone());
            }
            keep
        });

        while ids.len() >= self.max_per_user {
            let Some(oldest) = ids.pop_front() else {
                break;
            };
            if let Some(mut s) = self.sessions.get_mut(&oldest) {
                s.state = SessionState::Invalidated(InvalidationReason::CapEviction);
            }
            debug!(
                target: "security",
                user = %log_safe(user_id),
                reason = %InvalidationReason::CapEviction,
                "evicted oldest session to respect per-user cap"
            );
            stale.push(oldest);
        }

        for id in &stale {
            self.sessions.remove(id);
        }

        self.sessions.insert(
            session_id.clone(),
            Session::new(&session_id, user_id, ip, user_agent),
        );
        ids.push_back(session_id.clone());
        drop(ids);

        log_audit_event(
            AuditCategory::SessionSecurity,
            AuditSeverity::Info,
            "session_created",
            &format!("user={} ip={}", log_safe(user_id), log_safe(ip)),
            false,
        );
        session_id
    }

    /// Validate a session presented by a client.
    ///
    /// Returns `None` for unknown, expired and invalidated sessions. A
    /// fingerprint mismatch invalidates the session. On success the idle
    /// timer is refreshed.
    pub fn validate(&self, session_id: &str, ip: &str, user_agent: &str) -> Option<Session> {
        let now = Utc::now();
        let (user_id, short_id, outcome) = {
            let mut session = self.sessions.get_mut(session_id)?;
            if !session.is_active() {
                return None;
            }

            let outcome = if session.is_expired_at(now, self.timeout) {
                session.state = SessionState::Expired;
                Err(None)
            } else if self.bind_ip && session.ip != ip {
                let reason = InvalidationReason::IpMismatch;
                session.state = SessionState::Invalidated(reason);
                Err(Some((reason, format!("expected ip {} got {}", session.ip, ip))))
            } else if self.bind_user_agent && session.user_agent != user_agent {
                let reason = InvalidationReason::UserAgentMismatch;
                session.state = SessionState::Invalidated(reason);
                Err(Some((reason, "user agent changed".to_string())))
            } else {
                session.last_activity = now;
                Ok(session.clone())
            };
            (session.user_id.clone(), session.short_id(), outcome)
        };

        match outcome {
            Ok(session) => Some(session),
            Err(hijack) => {
                self.detach(&user_id, session_id);
                match hijack {
                    None => debug!(
                        target: "security",
                        session = %short_id,
                        "session expired"
                    ),
                    Some((reason, detail)) => {
                        log_audit_event(
                            AuditCategory::SessionSecurity,
                            AuditSeverity::Critical,
                            "session_hijack_attempt",
                            &format!(
                                "user={} session={} reason={} {}",
                                log_safe(&user_id),
                                short_id,
                                reason,
                                log_safe(&detail)
                            ),
                            true,
                        );
                        if let Some(monitor) = &self.monitor {
                            monitor.record_session_hijack(
                                &user_id,
                                &short_id,
                                &reason.to_string(),
                            );
                        }
                    }
                }
                None
            }
        }
    }

    /// Log out one session. Returns `false` if it was not active.
    pub fn invalidate(&self, session_id: &str) -> bool {
        let user_id = {
            let Some(mut session) = self.sessions.get_mut(session_id) else {
                return false;
            };
            if !session.is_active() {
                return false;
            }
            session.state = SessionState::Invalidated(InvalidationReason::Logout);
            session.user_id.clone()
        };
        self.detach(&user_id, session_id);
        log_audit_event(
            AuditCategory::SessionSecurity,
            AuditSeverity::Info,
            "session_invalidated",
            &format!("user={}", log_safe(&user_id)),
            false,
        );
        true
    }

    /// Log out every session of `user_id`. Returns how many were active.
    pub fn invalidate_all(&self, user_id: &str) -> usize {
        let Some((_, ids)) = self.by_user.remove(user_id) else {
            return 0;
        };
        let mut count = 0;
        for id in ids {
            if let Some(mut session) = self.sessions.get_mut(&id) {
                if session.is_active() {
                    session.state = SessionState::Invalidated(InvalidationReason::LogoutAll);
                    count += 1;
                }
            }
        }
        if count > 0 {
            log_audit_event(
                AuditCategory::SessionSecurity,
                AuditSeverity::Info,
                "sessions_invalidated_all",
                &format!("user={} count={}", log_safe(user_id), count),
                false,
            );
        }
        count
    }

    /// Expire idle sessions and purge every non-active record. Returns how
    /// many records were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| {
            if session.is_active() && session.is_expired_at(now, self.timeout) {
                session.state = SessionState::Expired;
            }
            session.is_active()
        });
        let removed = before.saturating_sub(self.sessions.len());

        self.by_user.retain(|_, ids| {
            ids.retain(|id| self.sessions.contains_key(id));
            !ids.is_empty()
        });

        if removed > 0 {
            debug!(target: "security", removed, "purged inactive sessions");
        }
        removed
    }

    /// Snapshot of a session in any state.
    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Active sessions of a user, oldest first.
    pub fn active_sessions(&self, user_id: &str) -> Vec<Session> {
        let ids: Vec<String> = match self.by_user.get(user_id) {
            Some(ids) => ids.iter().cloned().collect(),
            None => return Vec::new(),
        };
        ids.iter()
            .filter_map(|id| self.get(id))
            .filter(Session::is_active)
            .collect()
    }

    /// Total number of active sessions.
    pub fn active_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_active()).count()
    }

    fn detach(&self, user_id: &str, session_id: &str) {
        if let Some(mut ids) = self.by_user.get_mut(user_id) {
            ids.retain(|id| id != session_id);
        }
        self.by_user.remove_if(user_id, |_, ids| ids.is_empty());
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(&SessionsConfig::default())
    }
}
