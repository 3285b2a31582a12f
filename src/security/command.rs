//! Allowlisted subprocess execution.
//!
//! A [`CommandSpec`] is checked against the policy's binary/subcommand table
//! before anything is spawned. Validation covers the rendered size, the
//! timeout, the argument shape, shell metacharacters in any token, option
//! names, the repository URL argument and a per-identity invocation budget.
//! Only then is an [`Invocation`] handed to the [`ProcessRunner`], with a
//! rebuilt minimal environment. Both output streams are redacted before
//! they are returned.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::config::OptionKind;
use crate::error::{CommandValidationError, SecurityError, UrlValidationError};
use crate::gateway::SlidingWindowRateLimiter;
use crate::monitor::SecurityMonitor;
use crate::runtime::{Invocation, ProcessRunner, RuntimeError};
use crate::security::policy::{CommandPolicy, ValidationPolicy};
use crate::security::redact::OutputSanitizer;
use crate::security::url::RepositoryUrlValidator;
use crate::security::SYSTEM_IDENTITY;
use crate::utils::string::log_safe;

/// Substrings rejected in every token, although nothing is ever run through
/// a shell.
const DANGEROUS_TOKEN_PATTERNS: &[&str] = &[
    "&", "|", ";", "$(", "${", "`", ">", "<", "\n", "\r", "\0",
];

/// Inherited variable values at or above this size are dropped.
const MAX_ENV_VALUE_LEN: usize = 1000;

/// An option on the command line, `--name` or `--name value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOption {
    pub name: String,
    pub value: Option<String>,
}

/// A structured command: never a shell string.
///
/// # Example
///
/// ```
/// use archguard::security::CommandSpec;
///
/// let spec = CommandSpec::git("clone")
///     .option("--depth", "1")
///     .arg("https://github.com/org/repo.git")
///     .arg("repo");
/// assert_eq!(
///     spec.to_argv(),
///     ["git", "clone", "--depth", "1", "https://github.com/org/repo.git", "repo"]
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub binary: String,
    pub subcommand: String,
    pub options: Vec<CommandOption>,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(binary: impl Into<String>, subcommand: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            subcommand: subcommand.into(),
            options: Vec::new(),
            args: Vec::new(),
        }
    }

    pub fn git(subcommand: impl Into<String>) -> Self {
        Self::new("git", subcommand)
    }

    pub fn flag(mut self, name: impl Into<String>) -> Self {
        self.options.push(CommandOption {
            name: name.into(),
            value: None,
        });
        self
    }

    pub fn option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push(CommandOption {
            name: name.into(),
            value: Some(value.into()),
        });
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Parse `binary subcommand [options] [args]` using the policy to tell
    /// flags from value options. `--name=value` is accepted.
    pub fn parse_argv<S: AsRef<str>>(
        argv: &[S],
        policy: &CommandPolicy,
    ) -> Result<Self, CommandValidationError> {
        let mut tokens = argv.iter().map(AsRef::as_ref);
        let binary = tokens.next().ok_or(CommandValidationError::Empty)?;
        let subcommand = tokens.next().unwrap_or_default();
        let mut spec = Self::new(binary, subcommand);
        let rule = policy.rule(binary, subcommand);

        while let Some(token) = tokens.next() {
            if let Some(body) = token.strip_prefix(policy.option_prefix.as_str()) {
                let (name, inline) = match body.split_once('=') {
                    Some((name, value)) => (name, Some(value.to_string())),
                    None => (body, None),
                };
                let name = format!("{}{}", policy.option_prefix, name);
                let kind = rule
                    .and_then(|r| r.options.get(&name))
                    .ok_or_else(|| CommandValidationError::OptionNotAllowed(log_safe(&name)))?;
                let value = match (kind, inline) {
                    (OptionKind::Value, Some(v)) => Some(v),
                    (OptionKind::Value, None) => Some(
                        tokens
                            .next()
                            .ok_or_else(|| CommandValidationError::MissingOptionValue(name.clone()))?
                            .to_string(),
                    ),
                    (OptionKind::Flag, Some(_)) => {
                        return Err(CommandValidationError::UnexpectedOptionValue(name))
                    }
                    (OptionKind::Flag, None) => None,
                };
                spec.options.push(CommandOption { name, value });
            } else {
                spec.args.push(token.to_string());
            }
        }
        Ok(spec)
    }

    /// Argument vector, binary first.
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = vec![self.binary.clone(), self.subcommand.clone()];
        for option in &self.options {
            argv.push(option.name.clone());
            if let Some(value) = &option.value {
                argv.push(value.clone());
            }
        }
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// Outcome of a process that was allowed to run.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// `None` when the process was killed.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub truncated: bool,
    pub duration: Duration,
    /// Number of redactions applied across both streams.
    pub redactions: usize,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Rejections that look like an attack rather than a misconfigured caller.
fn is_hostile(err: &CommandValidationError) -> bool {
    matches!(
        err,
        CommandValidationError::DangerousPattern(_)
            | CommandValidationError::BinaryNotAllowed(_)
            | CommandValidationError::SubcommandNotAllowed { .. }
            | CommandValidationError::ArgumentLooksLikeOption(_)
    )
}

/// Positionals that should be treated as repository URLs.
fn looks_like_url(arg: &str) -> bool {
    arg.contains("://") || (arg.contains('@') && arg.contains(':'))
}

pub struct CommandExecutor {
    policy: Arc<ValidationPolicy>,
    urls: RepositoryUrlValidator,
    runner: Arc<dyn ProcessRunner>,
    sanitizer: OutputSanitizer,
    throttle: SlidingWindowRateLimiter<String>,
    monitor: Option<Arc<SecurityMonitor>>,
}

impl CommandExecutor {
    pub fn new(policy: Arc<ValidationPolicy>, runner: Arc<dyn ProcessRunner>) -> Self {
        let throttle = SlidingWindowRateLimiter::new(
            policy.commands.rate_limit_per_window,
            policy.commands.rate_window,
        );
        Self {
            urls: RepositoryUrlValidator::new(policy.clone()),
            policy,
            runner,
            sanitizer: OutputSanitizer::new(),
            throttle,
            monitor: None,
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<SecurityMonitor>) -> Self {
        self.urls = self.urls.with_monitor(monitor.clone());
        self.monitor = Some(monitor);
        self
    }

    /// Drop invocation budgets whose window has fully elapsed.
    pub fn sweep(&self) {
        self.throttle.sweep();
    }

    /// Identities that currently hold an invocation budget.
    pub fn tracked_identities(&self) -> usize {
        self.throttle.entry_count()
    }

    fn commands(&self) -> &CommandPolicy {
        &self.policy.commands
    }

    /// Validate without running or consuming invocation budget. Returns the
    /// effective timeout.
    pub fn validate(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
    ) -> Result<Duration, CommandValidationError> {
        self.check_shape(SYSTEM_IDENTITY, spec, timeout)
    }

    pub async fn execute(
        &self,
        spec: &CommandSpec,
        timeout: Duration,
        cwd: Option<&Path>,
    ) -> Result<ExecutionResult, SecurityError> {
        self.execute_for(SYSTEM_IDENTITY, spec, timeout, cwd).await
    }

    /// Validate and run `spec` on behalf of `identity`. A zero `timeout`
    /// means the policy default.
    pub async fn execute_for(
        &self,
        identity: &str,
        spec: &CommandSpec,
        timeout: Duration,
        cwd: Option<&Path>,
    ) -> Result<ExecutionResult, SecurityError> {
        let timeout = self.admit(identity, spec, timeout, cwd)?;

        let invocation = Invocation {
            program: spec.binary.clone(),
            args: spec.to_argv().into_iter().skip(1).collect(),
            env: self.child_environment(),
            cwd: cwd.map(Path::to_path_buf),
            timeout,
            max_output_bytes: self.commands().max_output_bytes,
        };
        let rendered = log_safe(&invocation.display());
        debug!(runner = self.runner.name(), command = %rendered, "spawning");

        let raw = self.runner.run(&invocation).await.map_err(|e| match e {
            RuntimeError::Spawn { program, reason } => {
                SecurityError::Spawn(format!("{}: {}", program, reason))
            }
            RuntimeError::Io(msg) => SecurityError::Io(msg),
        })?;

        let (stdout, out_count) = self
            .sanitizer
            .sanitize(&String::from_utf8_lossy(&raw.stdout));
        let (stderr, err_count) = self
            .sanitizer
            .sanitize(&String::from_utf8_lossy(&raw.stderr));
        let redactions = out_count + err_count;
        if redactions > 0 {
            log_audit_event(
                AuditCategory::OutputRedaction,
                AuditSeverity::Info,
                "output_redacted",
                &format!("command={} redactions={}", rendered, redactions),
                false,
            );
        }

        let result = ExecutionResult {
            exit_code: raw.exit_code,
            stdout,
            stderr,
            timed_out: raw.timed_out,
            truncated: raw.truncated,
            duration: raw.duration,
            redactions,
        };

        log_audit_event(
            AuditCategory::CommandSecurity,
            if result.timed_out {
                AuditSeverity::Warning
            } else {
                AuditSeverity::Info
            },
            if result.timed_out {
                "command_timeout"
            } else {
                "command_executed"
            },
            &format!(
                "identity={} command={} exit={:?} duration_ms={}",
                log_safe(identity),
                rendered,
                result.exit_code,
                result.duration.as_millis()
            ),
            false,
        );
        info!(
            command = %rendered,
            exit_code = ?result.exit_code,
            timed_out = result.timed_out,
            "command finished"
        );

        Ok(result)
    }

    /// Full pre-spawn gate: shape, working directory, invocation budget.
    fn admit(
        &self,
        identity: &str,
        spec: &CommandSpec,
        timeout: Duration,
        cwd: Option<&Path>,
    ) -> Result<Duration, CommandValidationError> {
        let outcome = self
            .check_shape(identity, spec, timeout)
            .and_then(|timeout| {
                if let Some(dir) = cwd {
                    if !dir.is_absolute() || !dir.is_dir() {
                        return Err(CommandValidationError::WorkingDirectory(log_safe(
                            &dir.display().to_string(),
                        )));
                    }
                }
                Ok(timeout)
            })
            .and_then(|timeout| {
                self.throttle
                    .check(&identity.to_string())
                    .map(|_| timeout)
                    .map_err(CommandValidationError::from)
            });

        if let Err(err) = &outcome {
            self.report_rejection(identity, spec, err);
        }
        outcome
    }

    fn report_rejection(&self, identity: &str, spec: &CommandSpec, err: &CommandValidationError) {
        if let CommandValidationError::RateLimited(limit) = err {
            log_audit_event(
                AuditCategory::RateLimit,
                AuditSeverity::Warning,
                "command_rate_limited",
                &format!(
                    "identity={} retry_after={}s",
                    log_safe(identity),
                    limit.retry_after.as_secs()
                ),
                true,
            );
            return;
        }

        let hostile = is_hostile(err);
        log_audit_event(
            AuditCategory::CommandSecurity,
            if hostile {
                AuditSeverity::Critical
            } else {
                AuditSeverity::Warning
            },
            "command_rejected",
            &format!(
                "identity={} binary={} subcommand={} reason={}",
                log_safe(identity),
                log_safe(&spec.binary),
                log_safe(&spec.subcommand),
                log_safe(&err.to_string())
            ),
            true,
        );
        // URL rejections were already reported by the URL validator.
        if matches!(err, CommandValidationError::Url(_)) {
            return;
        }
        if let Some(monitor) = &self.monitor {
            monitor.record_command_rejection(identity, &err.to_string(), hostile);
        }
    }

    fn check_shape(
        &self,
        identity: &str,
        spec: &CommandSpec,
        timeout: Duration,
    ) -> Result<Duration, CommandValidationError> {
        let policy = self.commands();

        if spec.binary.trim().is_empty() {
            return Err(CommandValidationError::Empty);
        }
        let argv = spec.to_argv();
        if argv.len() > policy.max_tokens {
            return Err(CommandValidationError::TooManyTokens {
                count: argv.len(),
                max: policy.max_tokens,
            });
        }
        let len = argv.iter().map(String::len).sum::<usize>() + argv.len().saturating_sub(1);
        if len > policy.max_command_length {
            return Err(CommandValidationError::TooLong {
                len,
                max: policy.max_command_length,
            });
        }

        let timeout = if timeout.is_zero() {
            policy.default_timeout
        } else {
            timeout
        };
        if timeout > policy.max_timeout {
            return Err(CommandValidationError::TimeoutTooLarge {
                requested: timeout.as_secs(),
                max: policy.max_timeout.as_secs(),
            });
        }

        if !policy.allows_binary(&spec.binary) {
            return Err(CommandValidationError::BinaryNotAllowed(log_safe(&spec.binary)));
        }
        let rule = policy.rule(&spec.binary, &spec.subcommand).ok_or_else(|| {
            CommandValidationError::SubcommandNotAllowed {
                binary: log_safe(&spec.binary),
                subcommand: log_safe(&spec.subcommand),
            }
        })?;

        let count = spec.args.len();
        if count < rule.min_args || count > rule.max_args {
            return Err(CommandValidationError::ArgumentCount {
                subcommand: spec.subcommand.clone(),
                count,
                min: rule.min_args,
                max: rule.max_args,
            });
        }

        for token in &argv {
            if let Some(pattern) = DANGEROUS_TOKEN_PATTERNS.iter().find(|p| token.contains(*p)) {
                return Err(CommandValidationError::DangerousPattern(
                    pattern.escape_debug().to_string(),
                ));
            }
        }

        for option in &spec.options {
            let kind = rule
                .options
                .get(&option.name)
                .filter(|_| option.name.starts_with(policy.option_prefix.as_str()))
                .ok_or_else(|| CommandValidationError::OptionNotAllowed(log_safe(&option.name)))?;
            match (kind, &option.value) {
                (OptionKind::Flag, Some(_)) => {
                    return Err(CommandValidationError::UnexpectedOptionValue(
                        option.name.clone(),
                    ))
                }
                (OptionKind::Value, None) => {
                    return Err(CommandValidationError::MissingOptionValue(
                        option.name.clone(),
                    ))
                }
                (OptionKind::Value, Some(value)) if value.is_empty() || value.starts_with('-') => {
                    return Err(CommandValidationError::ArgumentLooksLikeOption(log_safe(
                        value,
                    )))
                }
                _ => {}
            }
        }

        for (index, arg) in spec.args.iter().enumerate() {
            if arg.starts_with('-') {
                return Err(CommandValidationError::ArgumentLooksLikeOption(log_safe(arg)));
            }
            if rule.url_argument == Some(index) || looks_like_url(arg) {
                self.urls.validate_for(identity, arg)?;
            }
        }
        if let Some(index) = rule.url_argument {
            if index >= spec.args.len() {
                return Err(CommandValidationError::Url(UrlValidationError::Empty));
            }
        }

        Ok(timeout)
    }

    /// Allowlisted variables from this process plus the fixed settings.
    fn child_environment(&self) -> Vec<(String, String)> {
        let policy = self.commands();
        let mut env: Vec<(String, String)> = policy
            .env_allowlist
            .iter()
            .filter_map(|name| {
                std::env::var(name)
                    .ok()
                    .filter(|v| v.len() < MAX_ENV_VALUE_LEN)
                    .map(|v| (name.clone(), v))
            })
            .collect();
        for (name, value) in &policy.fixed_env {
            env.retain(|(k, _)| k != name);
            env.push((name.clone(), value.clone()));
        }
        env
    }
}
