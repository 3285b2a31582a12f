//! Configuration type definitions for ArchGuard
//!
//! All types implement serde traits for JSON serialization and have sensible
//! defaults, so a partial (or missing) config file is always usable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Main configuration struct for ArchGuard
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Log format, level and destinations
    pub logging: LoggingConfig,
    /// Path resolution rules
    pub paths: PathsConfig,
    /// Repository URL allowlists
    pub urls: UrlsConfig,
    /// Subprocess allowlist and limits
    pub commands: CommandsConfig,
    /// Sliding-window throttling
    pub rate_limit: RateLimitConfig,
    /// Session lifetime and caps
    pub sessions: SessionsConfig,
    /// Security alerting thresholds
    pub monitor: MonitorConfig,
}

// ============================================================================
// Logging
// ============================================================================

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    #[default]
    Component,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    /// Append all events to this file instead of stderr.
    pub file: Option<String>,
    /// Also append `security` target events (JSON lines) to this file.
    pub security_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Component,
            level: "info".to_string(),
            file: None,
            security_file: None,
        }
    }
}

// ============================================================================
// Paths
// ============================================================================

/// Forbidden substrings checked against both the raw and the decoded path.
pub const DEFAULT_FORBIDDEN_PATH_PATTERNS: &[&str] = &[
    "../",
    "..\\",
    "%2e%2e/",
    "%2e%2e\\",
    "%2e%2e%2f",
    "%2e%2e%5c",
    "..%2f",
    "..%5c",
    "%252e%252e/",
    "%252e%252e\\",
    "%252e%252e%252f",
    "%252e%252e%255c",
    "~/",
    "/etc/",
    "/proc/",
    "/sys/",
    "/root/",
];

/// Source, markup and config extensions a documentation pipeline reads.
pub const DEFAULT_CODE_EXTENSIONS: &[&str] = &[
    ".py", ".js", ".jsx", ".ts", ".tsx", ".java", ".cpp", ".c", ".h", ".hpp", ".php", ".rb", ".go",
    ".rs", ".swift", ".kt", ".scala", ".cs", ".vb", ".html", ".htm", ".css", ".scss", ".sass",
    ".less", ".json", ".xml", ".yml", ".yaml", ".md", ".txt", ".sql", ".sh", ".bash", ".zsh",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub max_path_length: usize,
    pub forbidden_patterns: Vec<String>,
    /// Default extension allowlist offered to callers.
    pub allowed_extensions: Vec<String>,
    /// Size ceiling for existing files; `None` disables the check.
    pub max_file_size_bytes: Option<u64>,
    /// Accept `..` segments that never climb above the base after
    /// normalization (`a/../a/file.txt`). Encoded forms stay forbidden.
    pub allow_contained_dot_segments: bool,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            max_path_length: 4096,
            forbidden_patterns: to_strings(DEFAULT_FORBIDDEN_PATH_PATTERNS),
            allowed_extensions: to_strings(DEFAULT_CODE_EXTENSIONS),
            max_file_size_bytes: Some(100 * 1024 * 1024),
            allow_contained_dot_segments: false,
        }
    }
}

// ============================================================================
// URLs
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlsConfig {
    pub allowed_schemes: Vec<String>,
    /// Hosts accepted exactly or as a parent domain.
    pub allowed_domains: Vec<String>,
    pub max_url_length: usize,
    pub max_path_depth: usize,
}

impl Default for UrlsConfig {
    fn default() -> Self {
        Self {
            allowed_schemes: to_strings(&["https", "ssh", "git"]),
            allowed_domains: to_strings(&["github.com", "gitlab.com", "bitbucket.org"]),
            max_url_length: 2000,
            max_path_depth: 10,
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Whether an option is a bare flag or takes a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Flag,
    Value,
}

/// Argument shape of one allowed subcommand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubcommandRule {
    pub min_args: usize,
    pub max_args: usize,
    #[serde(default)]
    pub options: BTreeMap<String, OptionKind>,
    /// Index of the positional argument that must be a repository URL.
    #[serde(default)]
    pub url_argument: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub max_command_length: usize,
    pub max_tokens: usize,
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    /// Per-stream capture limit.
    pub max_output_bytes: usize,
    pub option_prefix: String,
    /// Variables inherited from the parent environment.
    pub env_allowlist: Vec<String>,
    /// Variables always set for spawned processes.
    pub fixed_env: BTreeMap<String, String>,
    /// Invocations allowed per identity within `rate_window_secs`; 0 disables.
    pub rate_limit_per_window: u32,
    pub rate_window_secs: u64,
    /// binary -> subcommand -> rule
    pub allowed: BTreeMap<String, BTreeMap<String, SubcommandRule>>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        let mut fixed_env = BTreeMap::new();
        fixed_env.insert("GIT_TERMINAL_PROMPT".to_string(), "0".to_string());
        fixed_env.insert("GCM_INTERACTIVE".to_string(), "never".to_string());
        fixed_env.insert(
            "GIT_SSH_COMMAND".to_string(),
            "ssh -o BatchMode=yes".to_string(),
        );

        let mut allowed = BTreeMap::new();
        allowed.insert("git".to_string(), default_git_rules());

        Self {
            max_command_length: 1000,
            max_tokens: 32,
            default_timeout_secs: 60,
            max_timeout_secs: 300,
            max_output_bytes: 1024 * 1024,
            option_prefix: "--".to_string(),
            env_allowlist: to_strings(&["PATH", "HOME", "USER", "LANG", "LC_ALL"]),
            fixed_env,
            rate_limit_per_window: 10,
            rate_window_secs: 60,
            allowed,
        }
    }
}

fn default_git_rules() -> BTreeMap<String, SubcommandRule> {
    fn options(entries: &[(&str, OptionKind)]) -> BTreeMap<String, OptionKind> {
        entries
            .iter()
            .map(|(name, kind)| (name.to_string(), *kind))
            .collect()
    }

    let mut rules = BTreeMap::new();
    rules.insert(
        "clone".to_string(),
        SubcommandRule {
            min_args: 1,
            max_args: 2,
            options: options(&[
                ("--depth", OptionKind::Value),
                ("--single-branch", OptionKind::Flag),
                ("--branch", OptionKind::Value),
                ("--origin", OptionKind::Value),
            ]),
            url_argument: Some(0),
        },
    );
    rules.insert(
        "fetch".to_string(),
        SubcommandRule {
            min_args: 0,
            max_args: 1,
            options: options(&[
                ("--depth", OptionKind::Value),
                ("--single-branch", OptionKind::Flag),
                ("--prune", OptionKind::Flag),
            ]),
            url_argument: None,
        },
    );
    rules.insert(
        "pull".to_string(),
        SubcommandRule {
            min_args: 0,
            max_args: 2,
            options: options(&[
                ("--rebase", OptionKind::Flag),
                ("--ff-only", OptionKind::Flag),
            ]),
            url_argument: None,
        },
    );
    rules
}

// ============================================================================
// Rate limiting
// ============================================================================

/// What the limiter counts as an attempt for an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttemptCounting {
    /// Only failed attempts count (authentication-style endpoints).
    #[default]
    FailuresOnly,
    /// Every request counts (generic throttling).
    All,
}

/// Per-endpoint override; unset fields fall back to the section defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct EndpointLimitConfig {
    pub counting: AttemptCounting,
    pub window_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub block_duration_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_attempts: u32,
    pub block_duration_secs: u64,
    /// Suggested client delays indexed by attempt count; the last entry repeats.
    pub progressive_delays_secs: Vec<u64>,
    pub endpoints: BTreeMap<String, EndpointLimitConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_attempts: 5,
            block_duration_secs: 300,
            progressive_delays_secs: vec![0, 1, 2, 4, 8, 16],
            endpoints: BTreeMap::new(),
        }
    }
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Idle timeout measured from the last successful validation.
    pub timeout_secs: u64,
    pub max_sessions_per_user: usize,
    pub bind_ip: bool,
    pub bind_user_agent: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 1800,
            max_sessions_per_user: 5,
            bind_ip: true,
            bind_user_agent: true,
        }
    }
}

// ============================================================================
// Monitoring
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Identical `(type, identity)` alerts inside this window are dropped.
    pub suppression_window_secs: u64,
    pub brute_force_threshold: u32,
    pub brute_force_window_secs: u64,
    pub rate_limit_abuse_threshold: u32,
    /// Errors from one identity within `error_window_secs` that raise an
    /// error spike alert.
    pub error_threshold: u32,
    pub error_window_secs: u64,
    /// Capacity of the in-memory alert log.
    pub max_alerts: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            suppression_window_secs: 300,
            brute_force_threshold: 5,
            brute_force_window_secs: 300,
            rate_limit_abuse_threshold: 3,
            error_threshold: 10,
            error_window_secs: 300,
            max_alerts: 1000,
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
