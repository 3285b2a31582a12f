//! Request gating primitives.
//!
//! Throttles callers by `(identity, endpoint)` before they reach the
//! filesystem and process operations guarded by [`crate::security`].

pub mod rate_limit;

pub use rate_limit::{RateLimitDecision, RateLimiter, SlidingWindowRateLimiter};
