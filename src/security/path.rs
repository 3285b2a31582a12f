//! Path resolution against a trusted base directory.
//!
//! A user-supplied relative path goes through a fixed pipeline before it is
//! turned into a [`ResolvedPath`]: length cap, double-decode detection,
//! control-character stripping, forbidden-pattern scan, character allowlist,
//! lexical normalization, then a component-by-component walk of the
//! filesystem that follows every symlink (dangling ones included) and refuses
//! any link whose target leaves the base.
//!
//! The check and the later open are not atomic. A file swapped for a symlink
//! between the two is not caught here.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::error::{PathTraversalError, TraversalKind};
use crate::monitor::SecurityMonitor;
use crate::security::policy::{AllowedExtensions, ValidationPolicy};
use crate::security::SYSTEM_IDENTITY;
use crate::utils::string::{log_safe, percent_decode};

static PATH_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._/\\-]+$").expect("path charset regex"));

/// Upper bound on symlinks followed while resolving a single path.
const MAX_SYMLINK_HOPS: usize = 40;

/// Patterns that become acceptable when contained dot segments are enabled.
const PLAIN_PARENT_PATTERNS: &[&str] = &["../", "..\\"];

fn reject(kind: TraversalKind, detail: impl Into<String>) -> PathTraversalError {
    PathTraversalError::new(kind, detail)
}

/// An existing directory, canonicalized, that resolution is confined to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedDirectory {
    path: PathBuf,
}

impl TrustedDirectory {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, PathTraversalError> {
        let path = path.as_ref();
        let canonical = path.canonicalize().map_err(|e| {
            reject(
                TraversalKind::Io,
                format!("cannot canonicalize base '{}': {}", path.display(), e),
            )
        })?;
        if !canonical.is_dir() {
            return Err(reject(
                TraversalKind::InvalidInput,
                format!("base '{}' is not a directory", canonical.display()),
            ));
        }
        Ok(Self { path: canonical })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A path that, when it was checked, descended from its trusted base with no
/// symlink in the chain pointing outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    path: PathBuf,
    base: PathBuf,
    exists: bool,
}

impl ResolvedPath {
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Whether the target existed at resolution time.
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Location relative to the base (empty for the base itself).
    pub fn relative(&self) -> &Path {
        self.path.strip_prefix(&self.base).unwrap_or(Path::new(""))
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.path
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Stateless resolver over a shared policy.
#[derive(Clone)]
pub struct PathResolver {
    policy: Arc<ValidationPolicy>,
    monitor: Option<Arc<SecurityMonitor>>,
}

impl PathResolver {
    pub fn new(policy: Arc<ValidationPolicy>) -> Self {
        Self {
            policy,
            monitor: None,
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<SecurityMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Resolve `relative` under `base`. Empty input (or `.`) yields the base.
    pub fn resolve(
        &self,
        base: &TrustedDirectory,
        relative: &str,
        allowed_extensions: Option<&AllowedExtensions>,
    ) -> Result<ResolvedPath, PathTraversalError> {
        self.resolve_for(SYSTEM_IDENTITY, base, relative, allowed_extensions)
    }

    /// Like [`resolve`](Self::resolve), attributing rejections to `identity`.
    pub fn resolve_for(
        &self,
        identity: &str,
        base: &TrustedDirectory,
        relative: &str,
        allowed_extensions: Option<&AllowedExtensions>,
    ) -> Result<ResolvedPath, PathTraversalError> {
        self.audited(identity, relative, || {
            self.check(base, relative, allowed_extensions, false)
        })
    }

    /// Resolve a path that must name something other than the base itself.
    pub fn resolve_non_root(
        &self,
        identity: &str,
        base: &TrustedDirectory,
        relative: &str,
        allowed_extensions: Option<&AllowedExtensions>,
    ) -> Result<ResolvedPath, PathTraversalError> {
        self.audited(identity, relative, || {
            self.check(base, relative, allowed_extensions, true)
        })
    }

    /// Resolve a path that must be an existing regular file.
    pub fn resolve_existing_file(
        &self,
        identity: &str,
        base: &TrustedDirectory,
        relative: &str,
        allowed_extensions: Option<&AllowedExtensions>,
    ) -> Result<ResolvedPath, PathTraversalError> {
        self.audited(identity, relative, || {
            let resolved = self.check(base, relative, allowed_extensions, true)?;
            if !resolved.exists || !resolved.path.is_file() {
                return Err(reject(
                    TraversalKind::NotAFile,
                    format!("'{}' is not an existing file", resolved.relative().display()),
                ));
            }
            Ok(resolved)
        })
    }

    /// The configured extension allowlist, used when a file reader passes
    /// none of its own. `None` when the policy allows every extension.
    pub fn default_extensions(&self) -> Option<&AllowedExtensions> {
        let exts = &self.policy.paths.default_extensions;
        (!exts.is_empty()).then_some(exts)
    }

    pub fn is_safe(&self, base: &TrustedDirectory, relative: &str) -> bool {
        self.resolve(base, relative, None).is_ok()
    }

    /// Read a resolved file, replacing invalid UTF-8. The size ceiling is
    /// checked again against the bytes actually read.
    pub fn read_to_string(&self, resolved: &ResolvedPath) -> Result<String, PathTraversalError> {
        let bytes = fs::read(&resolved.path).map_err(|e| {
            reject(
                TraversalKind::Io,
                format!("read '{}': {}", resolved.relative().display(), e),
            )
        })?;
        if let Some(max) = self.policy.paths.max_file_size {
            if bytes.len() as u64 > max {
                return Err(reject(
                    TraversalKind::FileTooLarge,
                    format!("{} bytes exceeds {}", bytes.len(), max),
                ));
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn audited<F>(&self, identity: &str, input: &str, f: F) -> Result<ResolvedPath, PathTraversalError>
    where
        F: FnOnce() -> Result<ResolvedPath, PathTraversalError>,
    {
        f().map_err(|err| {
            let severity = if err.kind.is_hostile() {
                AuditSeverity::Critical
            } else {
                AuditSeverity::Warning
            };
            log_audit_event(
                AuditCategory::PathSecurity,
                severity,
                err.kind.event_type(),
                &format!(
                    "identity={} input={} {}",
                    log_safe(identity),
                    log_safe(input),
                    log_safe(&err.detail)
                ),
                true,
            );
            if let Some(monitor) = &self.monitor {
                monitor.record_path_violation(identity, err.kind);
            }
            err
        })
    }

    fn check(
        &self,
        base: &TrustedDirectory,
        relative: &str,
        allowed_extensions: Option<&AllowedExtensions>,
        require_target: bool,
    ) -> Result<ResolvedPath, PathTraversalError> {
        let policy = &self.policy.paths;
        let base_path = base.path();

        if relative.len() > policy.max_length {
            return Err(reject(
                TraversalKind::InvalidInput,
                format!("length {} exceeds {}", relative.len(), policy.max_length),
            ));
        }

        let trimmed = relative.trim();
        if trimmed.is_empty() || trimmed == "." {
            return self.base_target(base_path, require_target);
        }

        let decoded = percent_decode(trimmed).ok_or_else(|| {
            reject(TraversalKind::InvalidInput, "decoded path is not valid UTF-8")
        })?;
        match percent_decode(&decoded) {
            Some(again) if again == decoded => {}
            _ => {
                return Err(reject(
                    TraversalKind::EncodingTrick,
                    "path changes under a second decode",
                ))
            }
        }
        let decoded: String = decoded.chars().filter(|c| *c >= ' ').collect();
        let was_encoded = decoded != trimmed;

        let raw_lower = trimmed.to_lowercase();
        let decoded_lower = decoded.to_lowercase();
        for pattern in &policy.forbidden_patterns {
            if policy.allow_contained_dot_segments
                && PLAIN_PARENT_PATTERNS.contains(&pattern.as_str())
            {
                continue;
            }
            if raw_lower.contains(pattern.as_str()) || decoded_lower.contains(pattern.as_str()) {
                return Err(reject(
                    TraversalKind::ForbiddenPattern,
                    format!("matched '{}'", log_safe(pattern)),
                ));
            }
        }

        let has_parent_segment = decoded.split(['/', '\\']).any(|seg| seg == "..");
        if has_parent_segment && (!policy.allow_contained_dot_segments || was_encoded) {
            return Err(reject(
                TraversalKind::ForbiddenPattern,
                "parent directory segment",
            ));
        }

        if decoded.starts_with(['/', '\\']) {
            return Err(reject(TraversalKind::InvalidCharacters, "absolute path"));
        }
        if !PATH_CHARS_RE.is_match(&decoded) {
            return Err(reject(
                TraversalKind::InvalidCharacters,
                "characters outside the path allowlist",
            ));
        }

        let components = normalize_segments(&decoded)?;
        if components.is_empty() {
            return self.base_target(base_path, require_target);
        }

        let (path, exists) = walk(base_path, components)?;

        if !path.starts_with(base_path) {
            return Err(reject(
                TraversalKind::BoundaryEscape,
                format!("'{}' is outside the base", path.display()),
            ));
        }
        if exists {
            let canonical = path
                .canonicalize()
                .map_err(|e| reject(TraversalKind::Io, format!("canonicalize: {}", e)))?;
            if !canonical.starts_with(base_path) {
                return Err(reject(
                    TraversalKind::BoundaryEscape,
                    format!("'{}' is outside the base", canonical.display()),
                ));
            }
        }

        let is_dir = exists && path.is_dir();
        if let Some(extensions) = allowed_extensions {
            if !is_dir && !extensions.matches(&path) {
                return Err(reject(
                    TraversalKind::ExtensionNotAllowed,
                    format!(
                        "'{}' does not carry an allowed extension",
                        path.file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default()
                    ),
                ));
            }
        }

        if let Some(max) = policy.max_file_size.filter(|_| exists && !is_dir) {
            let len = fs::metadata(&path)
                .map_err(|e| reject(TraversalKind::Io, format!("stat: {}", e)))?
                .len();
            if len > max {
                return Err(reject(
                    TraversalKind::FileTooLarge,
                    format!("{} bytes exceeds {}", len, max),
                ));
            }
        }

        Ok(ResolvedPath {
            path,
            base: base_path.to_path_buf(),
            exists,
        })
    }

    fn base_target(
        &self,
        base_path: &Path,
        require_target: bool,
    ) -> Result<ResolvedPath, PathTraversalError> {
        if require_target {
            return Err(reject(
                TraversalKind::InvalidInput,
                "path resolves to the base directory",
            ));
        }
        Ok(ResolvedPath {
            path: base_path.to_path_buf(),
            base: base_path.to_path_buf(),
            exists: true,
        })
    }
}

/// Split on either separator, drop empty and `.` segments, and apply `..`
/// lexically. Climbing above the base is a boundary escape.
fn normalize_segments(input: &str) -> Result<Vec<String>, PathTraversalError> {
    let mut out: Vec<String> = Vec::new();
    for seg in input.split(['/', '\\']) {
        match seg {
            "" | "." => {}
            ".." => {
                if out.pop().is_none() {
                    return Err(reject(
                        TraversalKind::BoundaryEscape,
                        "normalization climbs above the base",
                    ));
                }
            }
            other => out.push(other.to_string()),
        }
    }
    Ok(out)
}

/// Lexically normalize an absolute path (symlink targets).
fn normalize_absolute(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn target_components(target: &Path) -> Vec<OsString> {
    target
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_os_string()),
            Component::ParentDir => Some(OsString::from("..")),
            _ => None,
        })
        .collect()
}

/// Walk `components` from `base`, following symlinks. Returns the final
/// location and whether it exists. Once a component is missing, the rest is
/// joined lexically.
fn walk(base: &Path, components: Vec<String>) -> Result<(PathBuf, bool), PathTraversalError> {
    let mut pending: VecDeque<OsString> = components.into_iter().map(OsString::from).collect();
    let mut current = base.to_path_buf();
    let mut exists = true;
    let mut hops = 0;

    while let Some(component) = pending.pop_front() {
        if component == ".." {
            if current == base {
                return Err(reject(
                    TraversalKind::SymlinkEscape,
                    "symlink target climbs above the base",
                ));
            }
            current.pop();
            continue;
        }

        let candidate = current.join(&component);
        if !exists {
            current = candidate;
            continue;
        }

        match fs::symlink_metadata(&candidate) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(reject(TraversalKind::Io, "too many levels of symlinks"));
                }
                let target = fs::read_link(&candidate)
                    .map_err(|e| reject(TraversalKind::Io, format!("read_link: {}", e)))?;
                let rest = if target.is_absolute() {
                    current = base.to_path_buf();
                    contained_remainder(base, &target).ok_or_else(|| {
                        reject(
                            TraversalKind::SymlinkEscape,
                            format!(
                                "'{}' points outside the base",
                                candidate.strip_prefix(base).unwrap_or(candidate.as_path()).display()
                            ),
                        )
                    })?
                } else {
                    target_components(&target)
                };
                for c in rest.into_iter().rev() {
                    pending.push_front(c);
                }
            }
            Ok(_) => current = candidate,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                exists = false;
                current = candidate;
            }
            Err(_) if !current.is_dir() => {
                // Parent is a regular file, so nothing below it exists.
                exists = false;
                current = candidate;
            }
            Err(e) => return Err(reject(TraversalKind::Io, format!("stat: {}", e))),
        }
    }

    Ok((current, exists))
}

/// Components of an absolute symlink target below `base`, or `None` when the
/// target lies outside it.
fn contained_remainder(base: &Path, target: &Path) -> Option<Vec<OsString>> {
    let normalized = normalize_absolute(target);
    if let Ok(rest) = normalized.strip_prefix(base) {
        return Some(target_components(rest));
    }
    // The target may reach the base through another symlinked prefix.
    let canonical = normalized.canonicalize().ok()?;
    canonical
        .strip_prefix(base)
        .ok()
        .map(target_components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, MonitorConfig};
    use crate::monitor::AlertType;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TrustedDirectory) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(dir.path().join("README.md"), "# readme").unwrap();
        let base = TrustedDirectory::new(dir.path()).unwrap();
        (dir, base)
    }

    fn resolver() -> PathResolver {
        PathResolver::new(Arc::new(ValidationPolicy::default()))
    }

    fn resolver_with(f: impl FnOnce(&mut Config)) -> PathResolver {
        let mut config = Config::default();
        f(&mut config);
        PathResolver::new(Arc::new(ValidationPolicy::from_config(&config).unwrap()))
    }

    fn kind(r: Result<ResolvedPath, PathTraversalError>) -> TraversalKind {
        r.unwrap_err().kind
    }

    #[test]
    fn test_resolves_existing_file() {
        let (_dir, base) = setup();
        let resolved = resolver().resolve(&base, "src/main.rs", None).unwrap();
        assert!(resolved.exists());
        assert!(resolved.as_path().starts_with(base.path()));
        assert_eq!(resolved.relative(), Path::new("src/main.rs"));
    }

    #[test]
    fn test_empty_and_dot_resolve_to_base() {
        let (_dir, base) = setup();
        let r = resolver();
        assert_eq!(r.resolve(&base, "", None).unwrap().as_path(), base.path());
        assert_eq!(r.resolve(&base, "  ", None).unwrap().as_path(), base.path());
        assert_eq!(r.resolve(&base, ".", None).unwrap().as_path(), base.path());
        assert_eq!(
            kind(r.resolve_non_root(SYSTEM_IDENTITY, &base, "", None)),
            TraversalKind::InvalidInput
        );
    }

    #[test]
    fn test_nonexistent_target_is_valid() {
        let (_dir, base) = setup();
        let resolved = resolver().resolve(&base, "src/new/file.rs", None).unwrap();
        assert!(!resolved.exists());
        assert_eq!(resolved.as_path(), base.path().join("src/new/file.rs"));
    }

    #[test]
    fn test_traversal_patterns_rejected() {
        let (_dir, base) = setup();
        let r = resolver();
        for input in [
            "../etc/passwd",
            "src/../../secret",
            "..\\windows",
            "%2e%2e/etc",
            "%2E%2E%2Fetc",
            "..%2fetc",
            "%252e%252e%252fetc",
            "~/.ssh/id_rsa",
            "foo/etc/passwd/../x",
            "..",
            "src/..",
        ] {
            assert!(r.resolve(&base, input, None).is_err(), "{input} should fail");
        }
    }

    #[test]
    fn test_system_prefixes_rejected() {
        let (_dir, base) = setup();
        let r = resolver();
        assert_eq!(
            kind(r.resolve(&base, "/etc/passwd", None)),
            TraversalKind::ForbiddenPattern
        );
        assert_eq!(
            kind(r.resolve(&base, "/proc/self/environ", None)),
            TraversalKind::ForbiddenPattern
        );
    }

    #[test]
    fn test_absolute_path_rejected() {
        let (_dir, base) = setup();
        assert_eq!(
            kind(resolver().resolve(&base, "/tmp/file.txt", None)),
            TraversalKind::InvalidCharacters
        );
    }

    #[test]
    fn test_double_encoding_is_trick() {
        let (_dir, base) = setup();
        // %2561 decodes to %61, which decodes again to 'a'.
        assert_eq!(
            kind(resolver().resolve(&base, "src/%2561.rs", None)),
            TraversalKind::EncodingTrick
        );
    }

    #[test]
    fn test_single_encoding_of_plain_chars_ok() {
        let (_dir, base) = setup();
        let resolved = resolver().resolve(&base, "src/main%2Ers", None).unwrap();
        assert!(resolved.exists());
    }

    #[test]
    fn test_invalid_characters() {
        let (_dir, base) = setup();
        let r = resolver();
        for input in ["src/ma in.rs", "a;b", "file$.txt", "C:\\x", "ünïcode.rs"] {
            assert_eq!(
                kind(r.resolve(&base, input, None)),
                TraversalKind::InvalidCharacters,
                "{input}"
            );
        }
    }

    #[test]
    fn test_control_characters_stripped() {
        let (_dir, base) = setup();
        let resolved = resolver().resolve(&base, "src/ma\u{1}in.rs", None).unwrap();
        assert_eq!(resolved.relative(), Path::new("src/main.rs"));
    }

    #[test]
    fn test_control_character_cannot_hide_traversal() {
        let (_dir, base) = setup();
        assert!(resolver().resolve(&base, "..\u{0}/etc", None).is_err());
    }

    #[test]
    fn test_backslash_is_separator() {
        let (_dir, base) = setup();
        let resolved = resolver().resolve(&base, "src\\main.rs", None).unwrap();
        assert!(resolved.exists());
    }

    #[test]
    fn test_too_long() {
        let (_dir, base) = setup();
        let r = resolver_with(|c| c.paths.max_path_length = 10);
        assert_eq!(
            kind(r.resolve(&base, "aaaaaaaaaaaaaaaa", None)),
            TraversalKind::InvalidInput
        );
    }

    #[test]
    fn test_contained_dot_segments_when_enabled() {
        let (_dir, base) = setup();
        let r = resolver_with(|c| c.paths.allow_contained_dot_segments = true);
        let resolved = r.resolve(&base, "src/../src/main.rs", None).unwrap();
        assert!(resolved.exists());
        assert_eq!(resolved.relative(), Path::new("src/main.rs"));
        assert_eq!(
            kind(r.resolve(&base, "src/../../x", None)),
            TraversalKind::BoundaryEscape
        );
        // Encoded forms stay forbidden.
        assert_eq!(
            kind(r.resolve(&base, "src/%2e%2e/main.rs", None)),
            TraversalKind::ForbiddenPattern
        );
        assert_eq!(
            kind(r.resolve(&base, "src/.%2e/main.rs", None)),
            TraversalKind::ForbiddenPattern
        );
    }

    #[test]
    fn test_extension_filter() {
        let (_dir, base) = setup();
        let r = resolver();
        let exts = AllowedExtensions::parse_list(".RS,.py").unwrap();
        assert!(r.resolve(&base, "src/main.rs", Some(&exts)).is_ok());
        assert_eq!(
            kind(r.resolve(&base, "README.md", Some(&exts))),
            TraversalKind::ExtensionNotAllowed
        );
        // Directories are exempt.
        assert!(r.resolve(&base, "src/nested", Some(&exts)).is_ok());
    }

    #[test]
    fn test_size_ceiling() {
        let (dir, base) = setup();
        fs::write(dir.path().join("big.txt"), vec![b'x'; 64]).unwrap();
        let r = resolver_with(|c| c.paths.max_file_size_bytes = Some(32));
        assert_eq!(
            kind(r.resolve(&base, "big.txt", None)),
            TraversalKind::FileTooLarge
        );
        assert!(r.resolve(&base, "README.md", None).is_ok());
    }

    #[test]
    fn test_resolve_existing_file() {
        let (_dir, base) = setup();
        let r = resolver();
        assert!(r
            .resolve_existing_file(SYSTEM_IDENTITY, &base, "src/main.rs", None)
            .is_ok());
        assert_eq!(
            kind(r.resolve_existing_file(SYSTEM_IDENTITY, &base, "src/missing.rs", None)),
            TraversalKind::NotAFile
        );
        assert_eq!(
            kind(r.resolve_existing_file(SYSTEM_IDENTITY, &base, "src", None)),
            TraversalKind::NotAFile
        );
    }

    #[test]
    fn test_path_below_regular_file_is_missing() {
        let (_dir, base) = setup();
        let resolved = resolver().resolve(&base, "README.md/child", None).unwrap();
        assert!(!resolved.exists());
    }

    #[test]
    fn test_read_to_string_lossy() {
        let (dir, base) = setup();
        fs::write(dir.path().join("bin.txt"), [b'o', b'k', 0xff]).unwrap();
        let r = resolver();
        let resolved = r.resolve(&base, "bin.txt", None).unwrap();
        assert_eq!(r.read_to_string(&resolved).unwrap(), "ok\u{fffd}");
    }

    #[test]
    fn test_trusted_directory_requires_dir() {
        let (dir, _base) = setup();
        assert_eq!(
            TrustedDirectory::new(dir.path().join("README.md"))
                .unwrap_err()
                .kind,
            TraversalKind::InvalidInput
        );
        assert_eq!(
            TrustedDirectory::new(dir.path().join("missing")).unwrap_err().kind,
            TraversalKind::Io
        );
    }

    #[test]
    fn test_is_safe() {
        let (_dir, base) = setup();
        let r = resolver();
        assert!(r.is_safe(&base, "src/main.rs"));
        assert!(!r.is_safe(&base, "../x"));
    }

    #[test]
    fn test_hostile_rejection_raises_alert() {
        let (_dir, base) = setup();
        let monitor = Arc::new(SecurityMonitor::new(MonitorConfig::default()));
        let r = resolver().with_monitor(monitor.clone());
        assert!(r.resolve_for("mallory", &base, "../etc", None).is_err());
        let alerts = monitor.alerts_for("mallory");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::PathTraversal);

        // A wrong extension is a mistake, not an attack.
        let exts = AllowedExtensions::parse_list(".py").unwrap();
        assert!(r.resolve_for("bob", &base, "README.md", Some(&exts)).is_err());
        assert!(monitor.alerts_for("bob").is_empty());
    }

    #[cfg(unix)]
    mod symlinks {
        use super::*;
        use std::os::unix::fs::symlink;

        #[test]
        fn test_symlink_inside_accepted() {
            let (dir, base) = setup();
            symlink(dir.path().join("src"), dir.path().join("code")).unwrap();
            let resolved = resolver().resolve(&base, "code/main.rs", None).unwrap();
            assert!(resolved.exists());
            assert_eq!(resolved.as_path(), base.path().join("src/main.rs"));
        }

        #[test]
        fn test_relative_symlink_inside_accepted() {
            let (dir, base) = setup();
            symlink("../README.md", dir.path().join("src/readme")).unwrap();
            let resolved = resolver().resolve(&base, "src/readme", None).unwrap();
            assert_eq!(resolved.as_path(), base.path().join("README.md"));
        }

        #[test]
        fn test_symlink_outside_rejected() {
            let (dir, base) = setup();
            let outside = TempDir::new().unwrap();
            fs::write(outside.path().join("secret.txt"), "s").unwrap();
            symlink(outside.path(), dir.path().join("escape")).unwrap();
            assert_eq!(
                kind(resolver().resolve(&base, "escape/secret.txt", None)),
                TraversalKind::SymlinkEscape
            );
        }

        #[test]
        fn test_relative_symlink_climbing_out_rejected() {
            let (dir, base) = setup();
            symlink("../../../../etc", dir.path().join("src/up")).unwrap();
            assert_eq!(
                kind(resolver().resolve(&base, "src/up/passwd", None)),
                TraversalKind::SymlinkEscape
            );
        }

        #[test]
        fn test_dangling_symlink_outside_rejected() {
            let (dir, base) = setup();
            symlink("/nonexistent/archguard/target", dir.path().join("dangling")).unwrap();
            assert_eq!(
                kind(resolver().resolve(&base, "dangling", None)),
                TraversalKind::SymlinkEscape
            );
        }

        #[test]
        fn test_dangling_symlink_inside_accepted() {
            let (dir, base) = setup();
            symlink(dir.path().join("later.txt"), dir.path().join("pending")).unwrap();
            let resolved = resolver().resolve(&base, "pending", None).unwrap();
            assert!(!resolved.exists());
            assert_eq!(resolved.as_path(), base.path().join("later.txt"));
        }

        #[test]
        fn test_symlink_loop_is_bounded() {
            let (dir, base) = setup();
            symlink("b", dir.path().join("a")).unwrap();
            symlink("a", dir.path().join("b")).unwrap();
            assert_eq!(kind(resolver().resolve(&base, "a", None)), TraversalKind::Io);
        }
    }
}
