//! Process runtime for ArchGuard
//!
//! The command executor never touches `tokio::process` directly. It hands a
//! validated [`Invocation`] to a [`ProcessRunner`]; [`NativeRunner`] is the
//! production implementation and tests substitute counting doubles.

pub mod native;
pub mod types;

pub use native::NativeRunner;
pub use types::{Invocation, ProcessRunner, RawOutput, RuntimeError, RuntimeResult};
