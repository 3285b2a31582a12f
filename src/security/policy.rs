//! Immutable validation policy.
//!
//! Built once from [`Config`] at startup and shared as `Arc<ValidationPolicy>`.
//! Construction normalizes every list (lower-casing, trimming) and fails fast
//! on malformed entries so a bad config never turns into a silent no-op at
//! request time.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use crate::config::{Config, SubcommandRule};
use crate::error::ConfigError;

static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)*$")
        .expect("domain regex")
});
static SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9+.-]*$").expect("scheme regex"));
static BINARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("binary regex"));
static ENV_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("env name regex"));

/// Schemes that are never acceptable for a repository, whatever the config says.
const NEVER_ALLOWED_SCHEMES: &[&str] = &["javascript", "data", "file", "ftp", "vbscript"];

/// Case-insensitive set of file extensions, each with a leading dot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllowedExtensions(BTreeSet<String>);

impl AllowedExtensions {
    /// Build from entries such as `".rs"`. Entries without a leading dot or
    /// with a path separator are rejected.
    pub fn new<I, S>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for entry in entries {
            let ext = entry.as_ref().trim().to_ascii_lowercase();
            let stem = ext.strip_prefix('.').unwrap_or("");
            if stem.is_empty() || stem.contains(['.', '/', '\\']) {
                return Err(ConfigError::Invalid(format!(
                    "extension '{}' must look like '.ext'",
                    entry.as_ref()
                )));
            }
            set.insert(ext);
        }
        Ok(Self(set))
    }

    /// Parse a comma-separated list (`".rs,.py"`).
    pub fn parse_list(list: &str) -> Result<Self, ConfigError> {
        Self::new(list.split(',').map(str::trim).filter(|s| !s.is_empty()))
    }

    /// Whether `path` carries one of the extensions.
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.0.contains(&format!(".{}", e.to_ascii_lowercase())))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PathPolicy {
    pub max_length: usize,
    /// Lower-cased forbidden substrings.
    pub forbidden_patterns: Vec<String>,
    pub default_extensions: AllowedExtensions,
    pub max_file_size: Option<u64>,
    pub allow_contained_dot_segments: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UrlPolicy {
    pub allowed_schemes: Vec<String>,
    /// Lower-cased, without a trailing dot.
    pub allowed_domains: Vec<String>,
    pub max_length: usize,
    pub max_path_depth: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandPolicy {
    pub max_command_length: usize,
    pub max_tokens: usize,
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    pub max_output_bytes: usize,
    pub option_prefix: String,
    pub env_allowlist: Vec<String>,
    pub fixed_env: Vec<(String, String)>,
    pub rate_limit_per_window: u32,
    pub rate_window: Duration,
    pub table: BTreeMap<String, BTreeMap<String, SubcommandRule>>,
}

impl CommandPolicy {
    /// Look up the rule for `binary subcommand`.
    pub fn rule(&self, binary: &str, subcommand: &str) -> Option<&SubcommandRule> {
        self.table.get(binary).and_then(|subs| subs.get(subcommand))
    }

    pub fn allows_binary(&self, binary: &str) -> bool {
        self.table.contains_key(binary)
    }
}

/// Process-wide validation policy. Never mutated after construction.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationPolicy {
    pub paths: PathPolicy,
    pub urls: UrlPolicy,
    pub commands: CommandPolicy,
}

impl ValidationPolicy {
    /// Build and validate the policy from configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            paths: build_path_policy(config)?,
            urls: build_url_policy(config)?,
            commands: build_command_policy(config)?,
        })
    }
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        // Built-in defaults are covered by `test_default_config_builds`.
        Self::from_config(&Config::default()).unwrap_or_else(|e| {
            unreachable!("built-in default policy is invalid: {}", e)
        })
    }
}

fn invalid(msg: String) -> ConfigError {
    ConfigError::Invalid(msg)
}

fn build_path_policy(config: &Config) -> Result<PathPolicy, ConfigError> {
    let cfg = &config.paths;
    if cfg.max_path_length == 0 {
        return Err(invalid("paths.max_path_length must be > 0".into()));
    }
    let forbidden_patterns: Vec<String> = cfg
        .forbidden_patterns
        .iter()
        .map(|p| p.to_lowercase())
        .collect();
    if let Some(empty) = forbidden_patterns.iter().position(|p| p.is_empty()) {
        return Err(invalid(format!(
            "paths.forbidden_patterns[{}] is empty",
            empty
        )));
    }
    Ok(PathPolicy {
        max_length: cfg.max_path_length,
        forbidden_patterns,
        default_extensions: AllowedExtensions::new(&cfg.allowed_extensions)?,
        max_file_size: cfg.max_file_size_bytes,
        allow_contained_dot_segments: cfg.allow_contained_dot_segments,
    })
}

fn build_url_policy(config: &Config) -> Result<UrlPolicy, ConfigError> {
    let cfg = &config.urls;
    if cfg.allowed_schemes.is_empty() {
        return Err(invalid("urls.allowed_schemes is empty".into()));
    }
    if cfg.allowed_domains.is_empty() {
        return Err(invalid("urls.allowed_domains is empty".into()));
    }
    if cfg.max_url_length == 0 || cfg.max_path_depth == 0 {
        return Err(invalid(
            "urls.max_url_length and urls.max_path_depth must be > 0".into(),
        ));
    }

    let mut allowed_schemes = Vec::new();
    for scheme in &cfg.allowed_schemes {
        let scheme = scheme.trim().to_ascii_lowercase();
        if !SCHEME_RE.is_match(&scheme) || NEVER_ALLOWED_SCHEMES.contains(&scheme.as_str()) {
            return Err(invalid(format!("scheme '{}' is not permitted", scheme)));
        }
        allowed_schemes.push(scheme);
    }

    let mut allowed_domains = Vec::new();
    for domain in &cfg.allowed_domains {
        let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
        if !DOMAIN_RE.is_match(&domain) {
            return Err(invalid(format!("domain '{}' is not a valid host name", domain)));
        }
        allowed_domains.push(domain);
    }

    Ok(UrlPolicy {
        allowed_schemes,
        allowed_domains,
        max_length: cfg.max_url_length,
        max_path_depth: cfg.max_path_depth,
    })
}

fn build_command_policy(config: &Config) -> Result<CommandPolicy, ConfigError> {
    let cfg = &config.commands;
    if cfg.max_timeout_secs == 0 {
        return Err(invalid("commands.max_timeout_secs must be > 0".into()));
    }
    if cfg.default_timeout_secs == 0 || cfg.default_timeout_secs > cfg.max_timeout_secs {
        return Err(invalid(
            "commands.default_timeout_secs must be within 1..=max_timeout_secs".into(),
        ));
    }
    if cfg.max_command_length == 0 || cfg.max_tokens == 0 || cfg.max_output_bytes == 0 {
        return Err(invalid(
            "commands length, token and output limits must be > 0".into(),
        ));
    }
    if cfg.option_prefix.is_empty() {
        return Err(invalid("commands.option_prefix is empty".into()));
    }
    if cfg.rate_limit_per_window > 0 && cfg.rate_window_secs == 0 {
        return Err(invalid("commands.rate_window_secs must be > 0".into()));
    }

    for name in cfg.env_allowlist.iter().chain(cfg.fixed_env.keys()) {
        if !ENV_NAME_RE.is_match(name) {
            return Err(invalid(format!("'{}' is not a valid variable name", name)));
        }
    }

    for (binary, subcommands) in &cfg.allowed {
        if !BINARY_RE.is_match(binary) {
            return Err(invalid(format!(
                "binary '{}' must be a bare program name",
                binary
            )));
        }
        if subcommands.is_empty() {
            return Err(invalid(format!("binary '{}' has no subcommands", binary)));
        }
        for (subcommand, rule) in subcommands {
            let at = format!("commands.allowed.{}.{}", binary, subcommand);
            if !BINARY_RE.is_match(subcommand) {
                return Err(invalid(format!("{}: invalid subcommand name", at)));
            }
            if rule.min_args > rule.max_args {
                return Err(invalid(format!("{}: min_args > max_args", at)));
            }
            if let Some(idx) = rule.url_argument {
                if idx >= rule.max_args {
                    return Err(invalid(format!("{}: url_argument out of range", at)));
                }
            }
            for option in rule.options.keys() {
                let rest = option.strip_prefix(cfg.option_prefix.as_str());
                if !rest.is_some_and(|r| !r.is_empty() && BINARY_RE.is_match(r)) {
                    return Err(invalid(format!(
                        "{}: option '{}' must start with '{}'",
                        at, option, cfg.option_prefix
                    )));
                }
            }
        }
    }

    Ok(CommandPolicy {
        max_command_length: cfg.max_command_length,
        max_tokens: cfg.max_tokens,
        default_timeout: Duration::from_secs(cfg.default_timeout_secs),
        max_timeout: Duration::from_secs(cfg.max_timeout_secs),
        max_output_bytes: cfg.max_output_bytes,
        option_prefix: cfg.option_prefix.clone(),
        env_allowlist: cfg.env_allowlist.clone(),
        fixed_env: cfg
            .fixed_env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        rate_limit_per_window: cfg.rate_limit_per_window,
        rate_window: Duration::from_secs(cfg.rate_window_secs),
        table: cfg.allowed.clone(),
    })
}
