use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::config::{AttemptCounting, RateLimitConfig};
use crate::error::RateLimitExceeded;
use crate::monitor::SecurityMonitor;
use crate::utils::string::log_safe;

fn prune(timestamps: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    while timestamps
        .front()
        .is_some_and(|&t| now.duration_since(t) >= window)
    {
        timestamps.pop_front();
    }
}

/// Round up to whole seconds, never below one.
fn ceil_secs(d: Duration) -> Duration {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    Duration::from_secs(secs.max(1))
}

/// Sliding-window counter. Every call to [`check`](Self::check) that is
/// allowed counts as one hit.
pub struct SlidingWindowRateLimiter<K = String>
where
    K: Eq + Hash,
{
    limit: u32,
    window: Duration,
    entries: DashMap<K, VecDeque<Instant>>,
}

impl<K: Eq + Hash + Clone> SlidingWindowRateLimiter<K> {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            entries: DashMap::new(),
        }
    }

    /// Returns `Ok` if the hit is allowed, otherwise the time until the
    /// oldest hit leaves the window. A limit of 0 means unlimited.
    pub fn check(&self, key: &K) -> Result<(), RateLimitExceeded> {
        if self.limit == 0 {
            return Ok(());
        }

        let now = Instant::now();
        let mut timestamps = self.entries.entry(key.clone()).or_default();
        prune(&mut timestamps, self.window, now);

        if timestamps.len() >= self.limit as usize {
            let oldest = timestamps.front().copied().unwrap_or(now);
            let remaining = self.window.saturating_sub(now.duration_since(oldest));
            return Err(RateLimitExceeded {
                retry_after: ceil_secs(remaining),
            });
        }

        timestamps.push_back(now);
        Ok(())
    }

    /// Remove keys with no active timestamps (call periodically).
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, timestamps| {
            prune(timestamps, self.window, now);
            !timestamps.is_empty()
        });
    }

    /// Number of tracked keys.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Outcome of [`RateLimiter::is_limited`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub limited: bool,
    /// Whole seconds until the block lifts, when limited.
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    fn allowed() -> Self {
        Self {
            limited: false,
            retry_after: None,
        }
    }

    fn blocked(remaining: Duration) -> Self {
        Self {
            limited: true,
            retry_after: Some(ceil_secs(remaining)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct EndpointRule {
    counting: AttemptCounting,
    window: Duration,
    max_attempts: u32,
    block: Duration,
}

#[derive(Debug, Default)]
struct RateLimitEntry {
    attempts: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

impl RateLimitEntry {
    fn is_idle(&self) -> bool {
        self.attempts.is_empty() && self.blocked_until.is_none()
    }
}

/// Sliding-window throttle keyed by `(identity, endpoint)` with block periods.
///
/// Entries are created on the first counted attempt and pruned lazily on
/// access; an entry whose window is empty and which is not blocked is removed.
/// Each key operation holds one shard lock of the underlying map, so checks
/// and records for the same key are serialized while different keys proceed
/// in parallel.
pub struct RateLimiter {
    defaults: EndpointRule,
    endpoints: HashMap<String, EndpointRule>,
    progressive_delays: Vec<Duration>,
    entries: DashMap<(String, String), RateLimitEntry>,
    monitor: Option<Arc<SecurityMonitor>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let defaults = EndpointRule {
            counting: AttemptCounting::FailuresOnly,
            window: Duration::from_secs(config.window_secs),
            max_attempts: config.max_attempts,
            block: Duration::from_secs(config.block_duration_secs),
        };
        let endpoints = config
            .endpoints
            .iter()
            .map(|(name, ep)| {
                let rule = EndpointRule {
                    counting: ep.counting,
                    window: ep.window_secs.map_or(defaults.window, Duration::from_secs),
                    max_attempts: ep.max_attempts.unwrap_or(defaults.max_attempts),
                    block: ep
                        .block_duration_secs
                        .map_or(defaults.block, Duration::from_secs),
                };
                (name.clone(), rule)
            })
            .collect();

        Self {
            defaults,
            endpoints,
            progressive_delays: config
                .progressive_delays_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            entries: DashMap::new(),
            monitor: None,
        }
    }

    /// Report blocks to `monitor`.
    pub fn with_monitor(mut self, monitor: Arc<SecurityMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    fn rule(&self, endpoint: &str) -> EndpointRule {
        self.endpoints.get(endpoint).copied().unwrap_or(self.defaults)
    }

    fn key(identity: &str, endpoint: &str) -> (String, String) {
        (identity.to_string(), endpoint.to_string())
    }

    /// Decide whether `identity` may proceed on `endpoint`.
    ///
    /// Starts a block period (and raises an alert) when the pruned attempt
    /// count has reached the limit. An expired block resets the window.
    pub fn is_limited(&self, identity: &str, endpoint: &str) -> RateLimitDecision {
        let rule = self.rule(endpoint);
        let key = Self::key(identity, endpoint);
        let now = Instant::now();

        let (decision, started_block) = match self.entries.get_mut(&key) {
            None => return RateLimitDecision::allowed(),
            Some(mut entry) => {
                match entry.blocked_until {
                    Some(until) if until > now => {
                        return RateLimitDecision::blocked(until - now);
                    }
                    Some(_) => {
                        entry.blocked_until = None;
                        entry.attempts.clear();
                    }
                    None => {}
                }
                prune(&mut entry.attempts, rule.window, now);
                if rule.max_attempts > 0 && entry.attempts.len() >= rule.max_attempts as usize {
                    entry.blocked_until = Some(now + rule.block);
                    (RateLimitDecision::blocked(rule.block), true)
                } else {
                    (RateLimitDecision::allowed(), false)
                }
            }
        };

        if started_block {
            log_audit_event(
                AuditCategory::RateLimit,
                AuditSeverity::Warning,
                "rate_limit_block",
                &format!(
                    "identity={} endpoint={} block_secs={}",
                    log_safe(identity),
                    log_safe(endpoint),
                    rule.block.as_secs()
                ),
                true,
            );
            if let Some(monitor) = &self.monitor {
                monitor.record_rate_limit_block(identity, endpoint, rule.block);
            }
        } else {
            self.entries.remove_if(&key, |_, e| e.is_idle());
        }
        decision
    }

    /// Record an attempt. Successful attempts are ignored on endpoints that
    /// only count failures; failed attempts there are also reported to the
    /// monitor for brute-force detection.
    pub fn record_attempt(&self, identity: &str, endpoint: &str, success: bool) {
        let rule = self.rule(endpoint);
        if success && rule.counting == AttemptCounting::FailuresOnly {
            return;
        }

        let now = Instant::now();
        {
            let mut entry = self.entries.entry(Self::key(identity, endpoint)).or_default();
            prune(&mut entry.attempts, rule.window, now);
            entry.attempts.push_back(now);
        }

        if !success && rule.counting == AttemptCounting::FailuresOnly {
            if let Some(monitor) = &self.monitor {
                monitor.record_auth_failure(identity, endpoint);
            }
        }
    }

    /// `is_limited` as a `Result`.
    pub fn check(&self, identity: &str, endpoint: &str) -> Result<(), RateLimitExceeded> {
        let decision = self.is_limited(identity, endpoint);
        match decision.retry_after {
            Some(retry_after) if decision.limited => Err(RateLimitExceeded { retry_after }),
            _ => Ok(()),
        }
    }

    /// Check and, when allowed, record the request as an attempt. Intended
    /// for endpoints that count every request.
    pub fn throttle(&self, identity: &str, endpoint: &str) -> Result<(), RateLimitExceeded> {
        self.check(identity, endpoint)?;
        self.record_attempt(identity, endpoint, true);
        Ok(())
    }

    /// Suggested client delay before the next attempt, growing with the
    /// number of attempts in the window. The last configured step repeats.
    pub fn progressive_delay(&self, identity: &str, endpoint: &str) -> Duration {
        let rule = self.rule(endpoint);
        let now = Instant::now();
        let count = self
            .entries
            .get(&Self::key(identity, endpoint))
            .map(|e| {
                e.attempts
                    .iter()
                    .filter(|&&t| now.duration_since(t) < rule.window)
                    .count()
            })
            .unwrap_or(0);
        match self.progressive_delays.len() {
            0 => Duration::ZERO,
            len => self.progressive_delays[count.min(len - 1)],
        }
    }

    /// Remove idle entries and expired blocks (call periodically).
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|(_, endpoint), entry| {
            let rule = self.endpoints.get(endpoint).copied().unwrap_or(self.defaults);
            if entry.blocked_until.is_some_and(|until| until <= now) {
                entry.blocked_until = None;
                entry.attempts.clear();
            }
            prune(&mut entry.attempts, rule.window, now);
            !entry.is_idle()
        });
    }

    /// Number of live `(identity, endpoint)` entries.
    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointLimitConfig, MonitorConfig};
    use crate::monitor::AlertType;

    fn config(max_attempts: u32, window: u64, block: u64) -> RateLimitConfig {
        RateLimitConfig {
            window_secs: window,
            max_attempts,
            block_duration_secs: block,
            ..RateLimitConfig::default()
        }
    }

    #[test]
    fn test_zero_limit_allows_all() {
        let limiter: SlidingWindowRateLimiter = SlidingWindowRateLimiter::new(0, Duration::from_secs(60));
        for _ in 0..100 {
            assert!(limiter.check(&"a".to_string()).is_ok());
        }
    }

    #[test]
    fn test_window_allows_up_to_limit() {
        let limiter = SlidingWindowRateLimiter::new(3, Duration::from_secs(60));
        let key = "alice".to_string();
        assert!(limiter.check(&key).is_ok());
        assert!(limiter.check(&key).is_ok());
        assert!(limiter.check(&key).is_ok());
        let err = limiter.check(&key).unwrap_err();
        assert!(err.retry_after <= Duration::from_secs(60));
        assert!(err.retry_after >= Duration::from_secs(1));
    }

    #[test]
    fn test_window_keys_independent() {
        let limiter = SlidingWindowRateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check(&"a".to_string()).is_ok());
        assert!(limiter.check(&"b".to_string()).is_ok());
        assert!(limiter.check(&"a".to_string()).is_err());
    }

    #[test]
    fn test_window_expiry_and_sweep() {
        let short = SlidingWindowRateLimiter::new(1, Duration::from_millis(50));
        let key = "a".to_string();
        assert!(short.check(&key).is_ok());
        std::thread::sleep(Duration::from_millis(100));
        assert!(short.check(&key).is_ok());
        std::thread::sleep(Duration::from_millis(100));
        short.sweep();
        assert_eq!(short.entry_count(), 0);
    }

    #[test]
    fn test_unknown_key_not_limited() {
        let limiter = RateLimiter::new(&config(3, 60, 300));
        let d = limiter.is_limited("1.2.3.4", "login");
        assert!(!d.limited);
        assert!(d.retry_after.is_none());
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_blocks_after_max_failures() {
        let limiter = RateLimiter::new(&config(3, 60, 300));
        for _ in 0..3 {
            assert!(!limiter.is_limited("ip", "login").limited);
            limiter.record_attempt("ip", "login", false);
        }
        let d = limiter.is_limited("ip", "login");
        assert!(d.limited);
        assert_eq!(d.retry_after, Some(Duration::from_secs(300)));

        // Still blocked on the next call, with a shrinking retry hint.
        let d = limiter.is_limited("ip", "login");
        assert!(d.limited);
        assert!(d.retry_after.unwrap() <= Duration::from_secs(300));
    }

    #[test]
    fn test_block_expires_and_resets() {
        let limiter = RateLimiter::new(&config(2, 60, 0));
        limiter.record_attempt("ip", "login", false);
        limiter.record_attempt("ip", "login", false);
        assert!(limiter.is_limited("ip", "login").limited);
        std::thread::sleep(Duration::from_millis(20));
        assert!(!limiter.is_limited("ip", "login").limited);
        // Window was reset with the block; the entry is gone.
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_successes_not_counted_for_failure_endpoints() {
        let limiter = RateLimiter::new(&config(2, 60, 300));
        for _ in 0..10 {
            limiter.record_attempt("ip", "login", true);
        }
        assert!(!limiter.is_limited("ip", "login").limited);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_all_counting_endpoint() {
        let mut cfg = config(5, 60, 300);
        cfg.endpoints.insert(
            "api".to_string(),
            EndpointLimitConfig {
                counting: AttemptCounting::All,
                max_attempts: Some(2),
                ..EndpointLimitConfig::default()
            },
        );
        let limiter = RateLimiter::new(&cfg);
        assert!(limiter.throttle("ip", "api").is_ok());
        assert!(limiter.throttle("ip", "api").is_ok());
        let err = limiter.throttle("ip", "api").unwrap_err();
        assert_eq!(err.retry_after, Duration::from_secs(300));
        // Other endpoints keep the default rule.
        assert!(limiter.throttle("ip", "login").is_ok());
    }

    #[test]
    fn test_identities_and_endpoints_independent() {
        let limiter = RateLimiter::new(&config(1, 60, 300));
        limiter.record_attempt("a", "login", false);
        assert!(limiter.is_limited("a", "login").limited);
        assert!(!limiter.is_limited("b", "login").limited);
        assert!(!limiter.is_limited("a", "reset").limited);
    }

    #[test]
    fn test_attempts_leave_window() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            window_secs: 0,
            ..config(1, 0, 300)
        });
        limiter.record_attempt("ip", "login", false);
        assert!(!limiter.is_limited("ip", "login").limited);
    }

    #[test]
    fn test_progressive_delay() {
        let limiter = RateLimiter::new(&config(10, 60, 300));
        assert_eq!(limiter.progressive_delay("ip", "login"), Duration::ZERO);
        limiter.record_attempt("ip", "login", false);
        assert_eq!(limiter.progressive_delay("ip", "login"), Duration::from_secs(1));
        limiter.record_attempt("ip", "login", false);
        limiter.record_attempt("ip", "login", false);
        assert_eq!(limiter.progressive_delay("ip", "login"), Duration::from_secs(4));
        for _ in 0..5 {
            limiter.record_attempt("ip", "login", false);
        }
        assert_eq!(limiter.progressive_delay("ip", "login"), Duration::from_secs(16));
    }

    #[test]
    fn test_block_raises_alert() {
        let monitor = Arc::new(SecurityMonitor::new(MonitorConfig::default()));
        let limiter = RateLimiter::new(&config(1, 60, 300)).with_monitor(monitor.clone());
        limiter.record_attempt("10.0.0.9", "login", false);
        assert!(limiter.is_limited("10.0.0.9", "login").limited);

        let alerts = monitor.alerts_for("10.0.0.9");
        assert!(alerts
            .iter()
            .any(|a| a.alert_type == AlertType::RateLimitAbuse));
        assert_eq!(monitor.metrics().auth_failures, 1);
    }

    #[test]
    fn test_sweep_removes_idle() {
        let limiter = RateLimiter::new(&config(5, 0, 300));
        limiter.record_attempt("ip", "login", false);
        limiter.sweep();
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_concurrent_records_are_all_counted() {
        let limiter = Arc::new(RateLimiter::new(&config(1000, 60, 300)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        limiter.record_attempt("ip", "login", false);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(limiter.progressive_delay("ip", "login"), Duration::from_secs(16));
        let entry = limiter
            .entries
            .get(&("ip".to_string(), "login".to_string()))
            .unwrap();
        assert_eq!(entry.attempts.len(), 400);
    }
}
