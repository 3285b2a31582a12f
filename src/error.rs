//! Error types for ArchGuard
//!
//! Every component returns a tagged error describing exactly why an input was
//! denied. The detail is meant for the security log only: callers crossing a
//! trust boundary should surface [`GuardError::public_message`] instead, so a
//! probing client cannot learn internal structure from the rejection text.
//! Uses `thiserror` for `Display` and `Error` implementations.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Message surfaced to untrusted callers for every security denial.
pub const ACCESS_DENIED: &str = "access denied for security reasons";

// ============================================================================
// Path resolution
// ============================================================================

/// Reason a relative path was rejected by the path resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalKind {
    /// Empty where a target is required, too long, or not valid UTF-8 after decoding.
    InvalidInput,
    /// Input still changes under a second percent-decode (double encoding).
    EncodingTrick,
    /// A traversal sequence or sensitive system prefix was found.
    ForbiddenPattern,
    /// Characters outside the path allowlist, or an absolute path.
    InvalidCharacters,
    /// Resolved target is not a descendant of the trusted base.
    BoundaryEscape,
    /// A symlink on the way to the target points outside the trusted base.
    SymlinkEscape,
    /// File extension is not in the caller's allowlist.
    ExtensionNotAllowed,
    /// File is larger than the configured ceiling.
    FileTooLarge,
    /// Target must be an existing regular file and is not.
    NotAFile,
    /// Filesystem error while inspecting the chain.
    Io,
}

impl TraversalKind {
    /// Audit event name for this rejection.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::InvalidInput => "path_invalid_input",
            Self::EncodingTrick => "path_encoding_trick",
            Self::ForbiddenPattern => "path_traversal_attempt",
            Self::InvalidCharacters => "path_invalid_characters",
            Self::BoundaryEscape => "path_boundary_escape",
            Self::SymlinkEscape => "symlink_escape",
            Self::ExtensionNotAllowed => "path_extension_denied",
            Self::FileTooLarge => "path_file_too_large",
            Self::NotAFile => "path_not_a_file",
            Self::Io => "path_io_error",
        }
    }

    /// Whether this rejection indicates hostile input rather than a plain
    /// mistake (missing file, wrong extension).
    pub fn is_hostile(&self) -> bool {
        matches!(
            self,
            Self::EncodingTrick
                | Self::ForbiddenPattern
                | Self::InvalidCharacters
                | Self::BoundaryEscape
                | Self::SymlinkEscape
        )
    }
}

impl fmt::Display for TraversalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidInput => "invalid_input",
            Self::EncodingTrick => "encoding_trick",
            Self::ForbiddenPattern => "forbidden_pattern",
            Self::InvalidCharacters => "invalid_characters",
            Self::BoundaryEscape => "boundary_escape",
            Self::SymlinkEscape => "symlink_escape",
            Self::ExtensionNotAllowed => "extension_not_allowed",
            Self::FileTooLarge => "file_too_large",
            Self::NotAFile => "not_a_file",
            Self::Io => "io",
        };
        f.write_str(name)
    }
}

/// A path was rejected by the resolver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("path rejected ({kind}): {detail}")]
pub struct PathTraversalError {
    pub kind: TraversalKind,
    pub detail: String,
}

impl PathTraversalError {
    pub fn new(kind: TraversalKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

// ============================================================================
// Repository URLs
// ============================================================================

/// A repository URL failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlValidationError {
    #[error("URL is empty")]
    Empty,

    #[error("URL length {len} exceeds maximum {max}")]
    TooLong { len: usize, max: usize },

    #[error("URL contains forbidden pattern '{0}'")]
    ForbiddenPattern(String),

    #[error("URL could not be parsed: {0}")]
    Malformed(String),

    #[error("URL scheme '{0}' is not allowed")]
    SchemeNotAllowed(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("URL host '{0}' is not an allowed domain")]
    DomainNotAllowed(String),

    #[error("URL path is invalid: {0}")]
    InvalidPath(String),

    #[error("URL path depth {depth} exceeds maximum {max}")]
    PathTooDeep { depth: usize, max: usize },

    #[error("URL user name contains invalid characters")]
    InvalidUserInfo,

    #[error("URL embeds a password")]
    EmbeddedPassword,

    #[error("URL scheme '{0}' does not accept a user name")]
    UserNameNotAllowed(String),
}

/// A repository URL could not be rewritten into a log-safe form.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlSanitizationError {
    #[error("URL is empty")]
    Empty,

    #[error("URL length {len} exceeds maximum {max}")]
    TooLong { len: usize, max: usize },

    #[error("URL could not be parsed: {0}")]
    Unparseable(String),
}

// ============================================================================
// Rate limiting
// ============================================================================

/// Caller exceeded a rate limit and must wait before retrying.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("rate limit exceeded, retry after {}s", retry_after.as_secs())]
pub struct RateLimitExceeded {
    pub retry_after: Duration,
}

// ============================================================================
// Command execution
// ============================================================================

/// A command specification violated the policy table. Raised before any
/// process is spawned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandValidationError {
    #[error("command is empty")]
    Empty,

    #[error("command length {len} exceeds maximum {max}")]
    TooLong { len: usize, max: usize },

    #[error("command has {count} tokens, maximum is {max}")]
    TooManyTokens { count: usize, max: usize },

    #[error("binary '{0}' is not allowed")]
    BinaryNotAllowed(String),

    #[error("subcommand '{binary} {subcommand}' is not allowed")]
    SubcommandNotAllowed { binary: String, subcommand: String },

    #[error("'{subcommand}' takes {min}..={max} arguments, got {count}")]
    ArgumentCount {
        subcommand: String,
        count: usize,
        min: usize,
        max: usize,
    },

    #[error("token contains dangerous pattern '{0}'")]
    DangerousPattern(String),

    #[error("option '{0}' is not allowed")]
    OptionNotAllowed(String),

    #[error("option '{0}' requires a value")]
    MissingOptionValue(String),

    #[error("option '{0}' does not take a value")]
    UnexpectedOptionValue(String),

    #[error("argument '{0}' looks like an option")]
    ArgumentLooksLikeOption(String),

    #[error("repository URL rejected: {0}")]
    Url(#[from] UrlValidationError),

    #[error("timeout {requested}s exceeds maximum {max}s")]
    TimeoutTooLarge { requested: u64, max: u64 },

    #[error("working directory rejected: {0}")]
    WorkingDirectory(String),

    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),
}

/// Failure of a guarded command execution.
///
/// Non-zero exit codes and timeouts are not errors; they come back inside
/// [`crate::security::ExecutionResult`].
#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("command validation failed: {0}")]
    Validation(#[from] CommandValidationError),

    #[error("failed to spawn process: {0}")]
    Spawn(String),

    #[error("I/O error while running process: {0}")]
    Io(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration could not be loaded or turned into a policy.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid policy: {0}")]
    Invalid(String),
}

// ============================================================================
// Top-level error
// ============================================================================

/// Error returned by the [`crate::guard::SecurityGuard`] facade.
#[derive(Error, Debug)]
pub enum GuardError {
    #[error(transparent)]
    Path(#[from] PathTraversalError),

    #[error(transparent)]
    Url(#[from] UrlValidationError),

    #[error(transparent)]
    UrlSanitization(#[from] UrlSanitizationError),

    #[error(transparent)]
    Command(#[from] SecurityError),

    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CommandValidationError> for GuardError {
    fn from(err: CommandValidationError) -> Self {
        GuardError::Command(SecurityError::Validation(err))
    }
}

impl GuardError {
    /// Message safe to return to an untrusted caller.
    pub fn public_message(&self) -> String {
        match self.retry_after() {
            Some(wait) => format!("too many requests, retry after {}s", wait.as_secs()),
            None => ACCESS_DENIED.to_string(),
        }
    }

    /// Time the caller must wait, if this is a rate-limit denial.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GuardError::RateLimited(e) => Some(e.retry_after),
            GuardError::Command(SecurityError::Validation(
                CommandValidationError::RateLimited(e),
            )) => Some(e.retry_after),
            _ => None,
        }
    }
}

/// Result type alias for facade operations.
pub type Result<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traversal_kind_display_and_event() {
        assert_eq!(TraversalKind::SymlinkEscape.to_string(), "symlink_escape");
        assert_eq!(TraversalKind::SymlinkEscape.event_type(), "symlink_escape");
        assert_eq!(
            TraversalKind::BoundaryEscape.event_type(),
            "path_boundary_escape"
        );
        assert_ne!(
            TraversalKind::SymlinkEscape.event_type(),
            TraversalKind::BoundaryEscape.event_type()
        );
    }

    #[test]
    fn test_hostile_kinds() {
        assert!(TraversalKind::ForbiddenPattern.is_hostile());
        assert!(TraversalKind::SymlinkEscape.is_hostile());
        assert!(!TraversalKind::NotAFile.is_hostile());
        assert!(!TraversalKind::ExtensionNotAllowed.is_hostile());
    }

    #[test]
    fn test_public_message_hides_detail() {
        let err: GuardError = PathTraversalError::new(
            TraversalKind::ForbiddenPattern,
            "matched '../' in '../../etc/passwd'",
        )
        .into();
        let public = err.public_message();
        assert_eq!(public, ACCESS_DENIED);
        assert!(!public.contains("passwd"));
        assert!(err.to_string().contains("passwd"));
    }

    #[test]
    fn test_public_message_rate_limited() {
        let err: GuardError = RateLimitExceeded {
            retry_after: Duration::from_secs(42),
        }
        .into();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(42)));
        assert!(err.public_message().contains("42"));
    }

    #[test]
    fn test_retry_after_through_command_error() {
        let err: GuardError = CommandValidationError::RateLimited(RateLimitExceeded {
            retry_after: Duration::from_secs(7),
        })
        .into();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_command_error_wraps_url_error() {
        let err: CommandValidationError = UrlValidationError::EmbeddedPassword.into();
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn test_non_rate_limit_has_no_retry() {
        let err: GuardError = UrlValidationError::Empty.into();
        assert!(err.retry_after().is_none());
        assert_eq!(err.public_message(), ACCESS_DENIED);
    }
}
