//! Configuration management for ArchGuard
//!
//! Configuration is loaded from `~/.archguard/config.json` with environment
//! variable overrides. It is read once at startup and turned into an immutable
//! [`crate::security::ValidationPolicy`]; nothing here is global.

mod types;
pub mod validate;

pub use types::*;

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the ArchGuard configuration directory path (~/.archguard)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".archguard")
    }

    /// Returns the path to the config file (~/.archguard/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    /// Environment variables can override config values using the pattern:
    /// `ARCHGUARD_SECTION_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Unparseable numeric values are ignored and the file value is kept.
    fn apply_env_overrides(&mut self) {
        // Logging
        if let Ok(val) = std::env::var("ARCHGUARD_LOGGING_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("ARCHGUARD_LOGGING_FORMAT") {
            match val.to_ascii_lowercase().as_str() {
                "pretty" => self.logging.format = LogFormat::Pretty,
                "component" => self.logging.format = LogFormat::Component,
                "json" => self.logging.format = LogFormat::Json,
                _ => {}
            }
        }
        if let Ok(val) = std::env::var("ARCHGUARD_LOGGING_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("ARCHGUARD_LOGGING_SECURITY_FILE") {
            self.logging.security_file = Some(val);
        }

        // Paths
        if let Ok(val) = std::env::var("ARCHGUARD_PATHS_MAX_FILE_SIZE_BYTES") {
            if let Ok(v) = val.parse() {
                self.paths.max_file_size_bytes = Some(v);
            }
        }
        if let Ok(val) = std::env::var("ARCHGUARD_PATHS_ALLOW_CONTAINED_DOT_SEGMENTS") {
            if let Ok(v) = val.parse() {
                self.paths.allow_contained_dot_segments = v;
            }
        }

        // URLs
        if let Ok(val) = std::env::var("ARCHGUARD_URLS_ALLOWED_DOMAINS") {
            let domains = split_list(&val);
            if !domains.is_empty() {
                self.urls.allowed_domains = domains;
            }
        }

        // Commands
        if let Ok(val) = std::env::var("ARCHGUARD_COMMANDS_MAX_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                self.commands.max_timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("ARCHGUARD_COMMANDS_RATE_LIMIT_PER_WINDOW") {
            if let Ok(v) = val.parse() {
                self.commands.rate_limit_per_window = v;
            }
        }

        // Rate limiting
        if let Ok(val) = std::env::var("ARCHGUARD_RATE_LIMIT_WINDOW_SECS") {
            if let Ok(v) = val.parse() {
                self.rate_limit.window_secs = v;
            }
        }
        if let Ok(val) = std::env::var("ARCHGUARD_RATE_LIMIT_MAX_ATTEMPTS") {
            if let Ok(v) = val.parse() {
                self.rate_limit.max_attempts = v;
            }
        }
        if let Ok(val) = std::env::var("ARCHGUARD_RATE_LIMIT_BLOCK_DURATION_SECS") {
            if let Ok(v) = val.parse() {
                self.rate_limit.block_duration_secs = v;
            }
        }

        // Sessions
        if let Ok(val) = std::env::var("ARCHGUARD_SESSIONS_TIMEOUT_SECS") {
            if let Ok(v) = val.parse() {
                self.sessions.timeout_secs = v;
            }
        }
        if let Ok(val) = std::env::var("ARCHGUARD_SESSIONS_MAX_SESSIONS_PER_USER") {
            if let Ok(v) = val.parse() {
                self.sessions.max_sessions_per_user = v;
            }
        }
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to_path(&Self::path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expand ~ to home directory in a path string
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.sessions.timeout_secs, 1800);
        assert_eq!(config.sessions.max_sessions_per_user, 5);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.rate_limit.max_attempts, 5);
        assert_eq!(config.rate_limit.block_duration_secs, 300);
        assert_eq!(config.urls.max_url_length, 2000);
        assert!(!config.paths.allow_contained_dot_segments);
        assert!(config.commands.allowed["git"].contains_key("clone"));
    }

    #[test]
    fn test_config_partial_json() {
        let json = r#"{"sessions": {"timeout_secs": 600}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.sessions.timeout_secs, 600);
        assert_eq!(config.sessions.max_sessions_per_user, 5);
        assert_eq!(config.urls.allowed_schemes, vec!["https", "ssh", "git"]);
    }

    #[test]
    fn test_command_rule_from_json() {
        let json = r#"{
            "commands": {
                "allowed": {
                    "git": {
                        "status": {"min_args": 0, "max_args": 0, "options": {"--short": "flag"}}
                    }
                }
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let rule = &config.commands.allowed["git"]["status"];
        assert_eq!(rule.options["--short"], OptionKind::Flag);
        assert!(rule.url_argument.is_none());
        // A configured table replaces the default one entirely.
        assert!(!config.commands.allowed["git"].contains_key("clone"));
    }

    #[test]
    fn test_endpoint_counting_from_json() {
        let json = r#"{"rate_limit": {"endpoints": {"api": {"counting": "all", "max_attempts": 100}}}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let api = &config.rate_limit.endpoints["api"];
        assert_eq!(api.counting, AttemptCounting::All);
        assert_eq!(api.max_attempts, Some(100));
        assert!(api.window_secs.is_none());
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_home("~/clones");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join("clones"));
        }
        assert_eq!(expand_home("/srv/clones"), PathBuf::from("/srv/clones"));
        assert_eq!(expand_home("~user"), PathBuf::from("~user"));
    }

    #[test]
    fn test_config_path() {
        let path = Config::path();
        assert!(path.ends_with(".archguard/config.json"));
    }

    #[test]
    fn test_env_override() {
        env::set_var("ARCHGUARD_SESSIONS_TIMEOUT_SECS", "900");
        env::set_var("ARCHGUARD_URLS_ALLOWED_DOMAINS", "git.example.com, github.com");
        env::set_var("ARCHGUARD_RATE_LIMIT_MAX_ATTEMPTS", "not-a-number");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.sessions.timeout_secs, 900);
        assert_eq!(
            config.urls.allowed_domains,
            vec!["git.example.com", "github.com"]
        );
        assert_eq!(config.rate_limit.max_attempts, 5);

        env::remove_var("ARCHGUARD_SESSIONS_TIMEOUT_SECS");
        env::remove_var("ARCHGUARD_URLS_ALLOWED_DOMAINS");
        env::remove_var("ARCHGUARD_RATE_LIMIT_MAX_ATTEMPTS");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.paths.max_file_size_bytes = None;
        config.monitor.max_alerts = 42;
        config.save_to_path(&config_path).unwrap();

        let loaded = Config::load_from_path(&config_path).unwrap();
        assert!(loaded.paths.max_file_size_bytes.is_none());
        assert_eq!(loaded.monitor.max_alerts, 42);
    }

    #[test]
    fn test_load_nonexistent() {
        let path = PathBuf::from("/nonexistent/path/config.json");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.commands.max_timeout_secs, 300);
    }

    #[test]
    fn test_load_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Config::load_from_path(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
