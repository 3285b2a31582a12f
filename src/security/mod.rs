//! Security module for ArchGuard
//!
//! Validators that stand between untrusted input and the filesystem or a
//! subprocess: path resolution, repository URL checks, the allowlisting
//! command executor and output redaction, all driven by one immutable
//! [`ValidationPolicy`].

pub mod command;
pub mod path;
pub mod policy;
pub mod redact;
pub mod url;

/// Identity used when a caller does not attribute an operation.
pub const SYSTEM_IDENTITY: &str = "system";

pub use command::{CommandExecutor, CommandOption, CommandSpec, ExecutionResult};
pub use path::{PathResolver, ResolvedPath, TrustedDirectory};
pub use policy::{AllowedExtensions, CommandPolicy, PathPolicy, UrlPolicy, ValidationPolicy};
pub use redact::OutputSanitizer;
pub use url::{RepositoryUrlValidator, UrlReport};
