//! `SecurityGuard` facade.
//!
//! One instance per process, built from [`Config`]. Every component shares
//! the same immutable [`ValidationPolicy`] and reports to the same
//! [`SecurityMonitor`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{ConfigError, Result};
use crate::gateway::{RateLimitDecision, RateLimiter};
use crate::monitor::SecurityMonitor;
use crate::runtime::{NativeRunner, ProcessRunner};
use crate::security::{
    AllowedExtensions, CommandExecutor, CommandSpec, ExecutionResult, PathResolver,
    RepositoryUrlValidator, ResolvedPath, TrustedDirectory, ValidationPolicy, SYSTEM_IDENTITY,
};
use crate::session::{Session, SessionManager};
use crate::workspace::RepositoryWorkspace;

pub struct SecurityGuard {
    policy: Arc<ValidationPolicy>,
    monitor: Arc<SecurityMonitor>,
    resolver: PathResolver,
    urls: RepositoryUrlValidator,
    executor: Arc<CommandExecutor>,
    limiter: RateLimiter,
    sessions: SessionManager,
}

impl SecurityGuard {
    /// Build a guard that runs commands as native child processes.
    pub fn from_config(config: &Config) -> std::result::Result<Self, ConfigError> {
        Self::with_runner(config, Arc::new(NativeRunner::new()))
    }

    /// Build a guard with a custom process runner.
    pub fn with_runner(
        config: &Config,
        runner: Arc<dyn ProcessRunner>,
    ) -> std::result::Result<Self, ConfigError> {
        let policy = Arc::new(ValidationPolicy::from_config(config)?);
        let monitor = Arc::new(SecurityMonitor::new(config.monitor.clone()));

        Ok(Self {
            resolver: PathResolver::new(policy.clone()).with_monitor(monitor.clone()),
            urls: RepositoryUrlValidator::new(policy.clone()).with_monitor(monitor.clone()),
            executor: Arc::new(
                CommandExecutor::new(policy.clone(), runner).with_monitor(monitor.clone()),
            ),
            limiter: RateLimiter::new(&config.rate_limit).with_monitor(monitor.clone()),
            sessions: SessionManager::new(&config.sessions).with_monitor(monitor.clone()),
            policy,
            monitor,
        })
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    pub fn monitor(&self) -> &Arc<SecurityMonitor> {
        &self.monitor
    }

    pub fn path_resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn url_validator(&self) -> &RepositoryUrlValidator {
        &self.urls
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Resolve `relative_path` under `base_dir`. When `allowed_extensions`
    /// is `None` any extension is accepted.
    pub fn resolve_path(
        &self,
        base_dir: impl AsRef<Path>,
        relative_path: &str,
        allowed_extensions: Option<&AllowedExtensions>,
    ) -> Result<ResolvedPath> {
        self.resolve_path_for(SYSTEM_IDENTITY, base_dir, relative_path, allowed_extensions)
    }

    pub fn resolve_path_for(
        &self,
        identity: &str,
        base_dir: impl AsRef<Path>,
        relative_path: &str,
        allowed_extensions: Option<&AllowedExtensions>,
    ) -> Result<ResolvedPath> {
        let base = TrustedDirectory::new(base_dir)?;
        Ok(self
            .resolver
            .resolve_for(identity, &base, relative_path, allowed_extensions)?)
    }

    /// Validate and run `spec`. A zero `timeout` means the policy default.
    pub async fn execute_command(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
        cwd: Option<&Path>,
    ) -> Result<ExecutionResult> {
        self.execute_command_for(SYSTEM_IDENTITY, spec, timeout, cwd)
            .await
    }

    pub async fn execute_command_for(
        &self,
        identity: &str,
        spec: &CommandSpec,
        timeout: Duration,
        cwd: Option<&Path>,
    ) -> Result<ExecutionResult> {
        Ok(self
            .executor
            .execute_for(identity, spec, timeout, cwd)
            .await?)
    }

    pub fn validate_repository_url(&self, url: &str) -> Result<()> {
        Ok(self.urls.validate(url)?)
    }

    /// Remove any embedded password from `url`.
    pub fn sanitize_repository_url(&self, url: &str) -> Result<String> {
        Ok(self.urls.sanitize(url)?)
    }

    pub fn is_rate_limited(&self, identity: &str, endpoint: &str) -> RateLimitDecision {
        self.limiter.is_limited(identity, endpoint)
    }

    pub fn record_attempt(&self, identity: &str, endpoint: &str, success: bool) {
        self.limiter.record_attempt(identity, endpoint, success);
    }

    pub fn create_session(&self, user_id: &str, ip: &str, user_agent: &str) -> String {
        self.sessions.create(user_id, ip, user_agent)
    }

    pub fn validate_session(&self, session_id: &str, ip: &str, user_agent: &str) -> Option<Session> {
        self.sessions.validate(session_id, ip, user_agent)
    }

    pub fn invalidate_session(&self, session_id: &str) -> bool {
        self.sessions.invalidate(session_id)
    }

    pub fn invalidate_all_sessions(&self, user_id: &str) -> usize {
        self.sessions.invalidate_all(user_id)
    }

    /// Periodic housekeeping for the keyed state.
    pub fn sweep(&self) {
        self.limiter.sweep();
        self.executor.sweep();
        self.sessions.cleanup_expired();
        self.monitor.cleanup();
    }

    /// A workspace over `root`, sharing this guard's policy, monitor and
    /// invocation budget.
    pub fn workspace(&self, root: impl AsRef<Path>) -> Result<RepositoryWorkspace> {
        Ok(RepositoryWorkspace::new(
            TrustedDirectory::new(root)?,
            self.resolver.clone(),
            self.urls.clone(),
            self.executor.clone(),
        ))
    }
}
