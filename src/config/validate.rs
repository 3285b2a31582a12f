//! Configuration validation with unknown field detection.
//!
//! Two passes: [`validate_config`] looks at the raw JSON for misspelled keys,
//! [`validate_values`] looks at a parsed [`Config`] for values that would
//! weaken the policy or make it unusable.

use serde_json::Value;
use std::collections::HashSet;

use crate::config::Config;

/// Known top-level config field names.
const KNOWN_TOP_LEVEL: &[&str] = &[
    "logging",
    "paths",
    "urls",
    "commands",
    "rate_limit",
    "sessions",
    "monitor",
];

/// Known fields for each section.
const KNOWN_SECTIONS: &[(&str, &[&str])] = &[
    ("logging", &["format", "level", "file", "security_file"]),
    (
        "paths",
        &[
            "max_path_length",
            "forbidden_patterns",
            "allowed_extensions",
            "max_file_size_bytes",
            "allow_contained_dot_segments",
        ],
    ),
    (
        "urls",
        &[
            "allowed_schemes",
            "allowed_domains",
            "max_url_length",
            "max_path_depth",
        ],
    ),
    (
        "commands",
        &[
            "max_command_length",
            "max_tokens",
            "default_timeout_secs",
            "max_timeout_secs",
            "max_output_bytes",
            "option_prefix",
            "env_allowlist",
            "fixed_env",
            "rate_limit_per_window",
            "rate_window_secs",
            "allowed",
        ],
    ),
    (
        "rate_limit",
        &[
            "window_secs",
            "max_attempts",
            "block_duration_secs",
            "progressive_delays_secs",
            "endpoints",
        ],
    ),
    (
        "sessions",
        &[
            "timeout_secs",
            "max_sessions_per_user",
            "bind_ip",
            "bind_user_agent",
        ],
    ),
    (
        "monitor",
        &[
            "suppression_window_secs",
            "brute_force_threshold",
            "brute_force_window_secs",
            "rate_limit_abuse_threshold",
            "error_threshold",
            "error_window_secs",
            "max_alerts",
        ],
    ),
];

/// A validation diagnostic.
#[derive(Debug)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub path: String,
    pub message: String,
}

#[derive(Debug, PartialEq)]
pub enum DiagnosticLevel {
    Ok,
    Warn,
    Error,
}

impl Diagnostic {
    fn new(level: DiagnosticLevel, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            DiagnosticLevel::Ok => "[OK]",
            DiagnosticLevel::Warn => "[WARN]",
            DiagnosticLevel::Error => "[ERROR]",
        };
        if self.path.is_empty() {
            write!(f, "{} {}", prefix, self.message)
        } else {
            write!(f, "{} {}: {}", prefix, self.path, self.message)
        }
    }
}

/// Simple Levenshtein distance for "did you mean?" suggestions.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Suggest the closest known field name (if distance <= 3).
pub fn suggest_field(unknown: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| format!("did you mean '{}'?", k))
}

fn unknown_field(path: String, key: &str, known: &[&str]) -> Diagnostic {
    let msg = match suggest_field(key, known) {
        Some(suggestion) => format!("Unknown field '{}' ({})", key, suggestion),
        None => format!("Unknown field '{}'", key),
    };
    Diagnostic::new(DiagnosticLevel::Error, path, msg)
}

/// Validate a raw JSON config value against known field names.
pub fn validate_config(raw: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match raw.as_object() {
        Some(o) => o,
        None => {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Error,
                "",
                "Config must be a JSON object",
            ));
            return diagnostics;
        }
    };

    diagnostics.push(Diagnostic::new(DiagnosticLevel::Ok, "", "Valid JSON"));

    let known_set: HashSet<&str> = KNOWN_TOP_LEVEL.iter().copied().collect();
    let mut has_unknown = false;
    for key in obj.keys() {
        if !known_set.contains(key.as_str()) {
            has_unknown = true;
            diagnostics.push(unknown_field(key.clone(), key, KNOWN_TOP_LEVEL));
        }
    }

    for (section, known) in KNOWN_SECTIONS {
        let Some(fields) = obj.get(*section).and_then(|v| v.as_object()) else {
            continue;
        };
        let known_set: HashSet<&str> = known.iter().copied().collect();
        for key in fields.keys() {
            if !known_set.contains(key.as_str()) {
                has_unknown = true;
                diagnostics.push(unknown_field(format!("{}.{}", section, key), key, known));
            }
        }
    }

    if !has_unknown {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Ok,
            "",
            "All fields recognized",
        ));
    }

    diagnostics
}

/// Check parsed values for settings that are unusable or weaken the policy.
pub fn validate_values(config: &Config) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    if config.sessions.timeout_secs < 300 {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Warn,
            "sessions.timeout_secs",
            "Below 300s; users will be logged out very frequently",
        ));
    }
    if config.sessions.max_sessions_per_user < 1 {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "sessions.max_sessions_per_user",
            "Must be at least 1",
        ));
    }
    if config.rate_limit.max_attempts < 1 {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "rate_limit.max_attempts",
            "Must be at least 1",
        ));
    }
    if config.rate_limit.window_secs == 0 {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "rate_limit.window_secs",
            "Must be greater than 0",
        ));
    }
    if config.rate_limit.block_duration_secs < 60 {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Warn,
            "rate_limit.block_duration_secs",
            "Below 60s; blocks barely slow down brute force",
        ));
    }
    if config.commands.max_timeout_secs == 0 {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "commands.max_timeout_secs",
            "Must be greater than 0",
        ));
    }
    if config.commands.default_timeout_secs > config.commands.max_timeout_secs {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "commands.default_timeout_secs",
            "Exceeds commands.max_timeout_secs",
        ));
    }
    if config.commands.allowed.is_empty() {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Warn,
            "commands.allowed",
            "Empty; every command will be rejected",
        ));
    }
    if config.urls.allowed_domains.is_empty() {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "urls.allowed_domains",
            "Empty; no repository URL can be accepted",
        ));
    }
    if config
        .urls
        .allowed_schemes
        .iter()
        .any(|s| s.eq_ignore_ascii_case("http"))
    {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Warn,
            "urls.allowed_schemes",
            "Plain http allows repository content to be tampered with in transit",
        ));
    }
    if config.paths.allow_contained_dot_segments {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Warn,
            "paths.allow_contained_dot_segments",
            "Enabled; '..' segments are accepted when they stay inside the base",
        ));
    }
    if config.paths.max_file_size_bytes.is_none() {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Warn,
            "paths.max_file_size_bytes",
            "Unset; files of any size will be read",
        ));
    }

    if let Err(e) = crate::security::ValidationPolicy::from_config(config) {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "",
            format!("Policy cannot be built: {}", e),
        ));
    }

    diagnostics
}
