//! ArchGuard - security validation core for repository documentation pipelines
//!
//! Untrusted paths, repository URLs and git invocations pass through
//! [`SecurityGuard`] before they touch the filesystem or spawn a process.
//! Rejections are tagged errors; the detail goes to the `security` log
//! target and callers surface only [`GuardError::public_message`].

pub mod audit;
pub mod config;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod monitor;
pub mod runtime;
pub mod security;
pub mod session;
pub mod utils;
pub mod workspace;

pub use config::Config;
pub use error::{GuardError, Result};
pub use gateway::{RateLimitDecision, RateLimiter};
pub use guard::SecurityGuard;
pub use monitor::{SecurityAlert, SecurityMonitor};
pub use security::{CommandSpec, ExecutionResult, ResolvedPath, ValidationPolicy};
pub use session::{Session, SessionManager};
pub use workspace::{CloneOptions, RepositoryWorkspace};
