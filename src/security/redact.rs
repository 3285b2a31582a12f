//! Credential and PII redaction for subprocess output.
//!
//! Applied to both streams of every command, successful or not, before the
//! text leaves the executor.
//!
//! # Example
//!
//! ```
//! use archguard::security::OutputSanitizer;
//!
//! let sanitizer = OutputSanitizer::new();
//! let (clean, count) = sanitizer.sanitize("fatal: could not reach 10.0.0.7 as alice@example.com");
//! assert_eq!(clean, "fatal: could not reach [REDACTED_IP] as [REDACTED_EMAIL]");
//! assert_eq!(count, 2);
//! ```

use regex::{Captures, Regex};

enum Replacement {
    /// Replace the whole match.
    Fixed(&'static str),
    /// Expand capture groups (`$name`).
    Template(&'static str),
    /// Replace 40-character tokens unless they look like a commit hash.
    TokenUnlessSha,
}

struct RedactionRule {
    name: &'static str,
    regex: Regex,
    replacement: Replacement,
}

/// Redacts known credential shapes and personal data from text.
///
/// Rules run in order; more specific token shapes come before the generic
/// 40-character rule so they keep their descriptive marker.
pub struct OutputSanitizer {
    rules: Vec<RedactionRule>,
}

impl OutputSanitizer {
    #[must_use]
    pub fn new() -> Self {
        let defs: Vec<(&'static str, &'static str, Replacement)> = vec![
            (
                "github_token",
                r"gh[pousr]_[A-Za-z0-9]{36,}",
                Replacement::Fixed("[REDACTED_GITHUB_TOKEN]"),
            ),
            (
                "github_pat",
                r"github_pat_[A-Za-z0-9_]{22,}",
                Replacement::Fixed("[REDACTED_GITHUB_TOKEN]"),
            ),
            (
                "api_key",
                r"sk-[A-Za-z0-9\-]{20,}",
                Replacement::Fixed("[REDACTED_API_KEY]"),
            ),
            (
                "aws_access_key",
                r"AKIA[A-Z0-9]{16}",
                Replacement::Fixed("[REDACTED_API_KEY]"),
            ),
            (
                "bearer_token",
                r"(?i)bearer\s+[A-Za-z0-9._\-]{20,}",
                Replacement::Fixed("Bearer [REDACTED_TOKEN]"),
            ),
            (
                "url_password",
                r"(?P<prefix>[A-Za-z][A-Za-z0-9+.\-]*://[^:@/\s]+):[^@/\s\[]+@",
                Replacement::Template("${prefix}:[REDACTED]@"),
            ),
            (
                "generic_token",
                r"\b[A-Za-z0-9]{40}\b",
                Replacement::TokenUnlessSha,
            ),
            (
                "email",
                r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b",
                Replacement::Fixed("[REDACTED_EMAIL]"),
            ),
            (
                "ipv4",
                r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b",
                Replacement::Fixed("[REDACTED_IP]"),
            ),
            (
                "home_dir",
                r"/home/[^/\s\[][^/\s]*",
                Replacement::Fixed("/home/[REDACTED_USER]"),
            ),
            (
                "users_dir",
                r"/Users/[^/\s\[][^/\s]*",
                Replacement::Fixed("/Users/[REDACTED_USER]"),
            ),
        ];

        let rules = defs
            .into_iter()
            .map(|(name, pattern, replacement)| RedactionRule {
                name,
                regex: Regex::new(pattern).unwrap_or_else(|e| {
                    panic!("BUG: invalid built-in redaction pattern '{name}': {e}")
                }),
                replacement,
            })
            .collect();

        Self { rules }
    }

    /// Redact `input`, returning the cleaned text and the number of
    /// replacements made.
    #[must_use]
    pub fn sanitize(&self, input: &str) -> (String, usize) {
        let mut text = input.to_string();
        let mut count = 0;

        for rule in &self.rules {
            if !rule.regex.is_match(&text) {
                continue;
            }
            let replaced = rule.regex.replace_all(&text, |caps: &Captures| {
                let matched = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                match &rule.replacement {
                    Replacement::Fixed(marker) => {
                        count += 1;
                        (*marker).to_string()
                    }
                    Replacement::Template(template) => {
                        count += 1;
                        let mut out = String::new();
                        caps.expand(template, &mut out);
                        out
                    }
                    Replacement::TokenUnlessSha => {
                        if is_commit_hash(matched) {
                            matched.to_string()
                        } else {
                            count += 1;
                            "[REDACTED_TOKEN]".to_string()
                        }
                    }
                }
            });
            text = replaced.into_owned();
        }

        (text, count)
    }

    /// Names of the rules that match `input`, for diagnostics.
    pub fn matching_rules(&self, input: &str) -> Vec<&'static str> {
        self.rules
            .iter()
            .filter(|r| r.regex.is_match(input))
            .map(|r| r.name)
            .collect()
    }
}

impl Default for OutputSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

fn is_commit_hash(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
