//! Logging initialization for ArchGuard.
//!
//! Supports three formats:
//! - `pretty`: multi-line human-readable output
//! - `component`: `[timestamp] [LEVEL] target message {fields}`, compact and grep-friendly;
//!   use the [`log_component!`] macro to add a `component` field for per-subsystem filtering
//! - `json`: structured JSON lines for log aggregators
//!
//! When `logging.security_file` is set, every event on the `security` target
//! is additionally written there as JSON, whatever the main level is.

use std::fs::{File, OpenOptions};
use std::sync::Mutex;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::fmt::{self, writer::BoxMakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::audit::SECURITY_TARGET;
use crate::config::{expand_home, LogFormat, LoggingConfig};
use crate::error::ConfigError;

fn open_append(path: &str) -> Result<File, ConfigError> {
    let path = expand_home(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Initialize the global tracing subscriber from config.
///
/// Call this once at startup before any tracing events are emitted.
/// `RUST_LOG` wins over `cfg.level` when set. Logs go to stderr unless
/// `cfg.file` is set.
pub fn init_logging(cfg: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    let (writer, ansi) = match &cfg.file {
        Some(path) => (BoxMakeWriter::new(Mutex::new(open_append(path)?)), false),
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let main = match cfg.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_ansi(ansi)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
        LogFormat::Component => fmt::layer()
            .compact()
            .with_target(true)
            .with_ansi(ansi)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
    };

    let security = match &cfg.security_file {
        Some(path) => Some(
            fmt::layer()
                .json()
                .with_writer(Mutex::new(open_append(path)?))
                .with_filter(filter_fn(|meta| meta.target() == SECURITY_TARGET))
                .boxed(),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(main)
        .with(security)
        .try_init()
        .map_err(|e| ConfigError::Invalid(format!("logging already initialized: {}", e)))
}

/// Emit a component-tagged tracing event.
///
/// Works with any tracing level (`trace`, `debug`, `info`, `warn`, `error`).
/// The `component` field makes it easy to grep logs by subsystem:
///
/// ```
/// # use archguard::log_component;
/// log_component!(info, "workspace", "clone finished");
/// log_component!(warn, "cli", "config has warnings", count = 2u64);
///
/// let dest = std::path::Path::new("repos/docs");
/// let exit_code: Option<i32> = None;
/// log_component!(info, "workspace", "clone finished", dest = %dest.display(), exit_code = ?exit_code);
/// ```
///
/// Fields are passed to `tracing` unchanged, so the `%` (Display) and `?`
/// (Debug) sigils work. Do not end the field list with a comma.
#[macro_export]
macro_rules! log_component {
    ($level:ident, $component:expr, $msg:expr) => {
        tracing::$level!(component = $component, $msg)
    };
    ($level:ident, $component:expr, $msg:expr, $($fields:tt)+) => {
        tracing::$level!(component = $component, $($fields)+, $msg)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_logging_config() {
        let cfg = LoggingConfig::default();
        assert_eq!(cfg.format, LogFormat::Component);
        assert_eq!(cfg.level, "info");
        assert!(cfg.file.is_none());
        assert!(cfg.security_file.is_none());
    }

    #[test]
    fn test_log_format_deserialize_json() {
        let cfg: LoggingConfig =
            serde_json::from_str(r#"{"format":"json","level":"debug"}"#).unwrap();
        assert_eq!(cfg.format, LogFormat::Json);
        assert_eq!(cfg.level, "debug");
    }

    #[test]
    fn test_log_format_deserialize_pretty() {
        let cfg: LoggingConfig = serde_json::from_str(r#"{"format":"pretty"}"#).unwrap();
        assert_eq!(cfg.format, LogFormat::Pretty);
        assert_eq!(cfg.level, "info"); // default
    }

    #[test]
    fn test_security_file_roundtrip() {
        let cfg = LoggingConfig {
            format: LogFormat::Json,
            file: None,
            security_file: Some("/var/log/archguard/security.log".to_string()),
            level: "warn".to_string(),
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let restored: LoggingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(
            restored.security_file.as_deref(),
            Some("/var/log/archguard/security.log")
        );
        assert_eq!(restored.level, "warn");
    }

    #[test]
    fn test_log_component_accepts_sigils() {
        let path = std::path::Path::new("repos/docs");
        let code: Option<i32> = Some(128);
        crate::log_component!(info, "workspace", "plain");
        crate::log_component!(debug, "workspace", "one field", success = true);
        crate::log_component!(
            warn,
            "workspace",
            "sigils",
            dest = %path.display(),
            exit_code = ?code,
            attempts = 3u32
        );
    }

    #[test]
    fn test_open_append_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/security.log");
        open_append(path.to_str().unwrap()).unwrap();
        assert!(path.exists());
    }
}
