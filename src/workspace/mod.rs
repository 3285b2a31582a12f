//! Repository workspace.
//!
//! Sequences the guarded operations over one trusted clone root: a URL is
//! validated before `git clone` is spawned, and every repository or file
//! name is resolved before anything is opened.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{GuardError, PathTraversalError, Result, TraversalKind};
use crate::log_component;
use crate::security::{
    AllowedExtensions, CommandExecutor, CommandSpec, ExecutionResult, PathResolver,
    RepositoryUrlValidator, ResolvedPath, TrustedDirectory,
};

/// Options for [`RepositoryWorkspace::clone_repository`].
#[derive(Debug, Clone)]
pub struct CloneOptions {
    /// Shallow clone depth; `None` clones full history.
    pub depth: Option<u32>,
    /// Single branch to clone.
    pub branch: Option<String>,
    /// Zero means the policy default.
    pub timeout: Duration,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            depth: Some(1),
            branch: None,
            timeout: Duration::ZERO,
        }
    }
}

/// Result of a clone that was allowed to run.
#[derive(Debug, Clone)]
pub struct CloneOutcome {
    /// Where the repository was (or would have been) cloned.
    pub path: ResolvedPath,
    pub result: ExecutionResult,
}

pub struct RepositoryWorkspace {
    root: TrustedDirectory,
    resolver: PathResolver,
    urls: RepositoryUrlValidator,
    executor: Arc<CommandExecutor>,
}

impl RepositoryWorkspace {
    pub fn new(
        root: TrustedDirectory,
        resolver: PathResolver,
        urls: RepositoryUrlValidator,
        executor: Arc<CommandExecutor>,
    ) -> Self {
        Self {
            root,
            resolver,
            urls,
            executor,
        }
    }

    pub fn root(&self) -> &TrustedDirectory {
        &self.root
    }

    /// Clone `url` into `dest` (relative to the root, must not exist yet).
    pub async fn clone_repository(
        &self,
        identity: &str,
        url: &str,
        dest: &str,
        options: &CloneOptions,
    ) -> Result<CloneOutcome> {
        self.urls.validate_for(identity, url)?;
        let target = self.resolver.resolve_non_root(identity, &self.root, dest, None)?;
        if target.exists() {
            return Err(GuardError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("'{}' already exists", target.relative().display()),
            )));
        }

        let mut spec = CommandSpec::git("clone");
        if let Some(depth) = options.depth {
            spec = spec.option("--depth", depth.to_string());
        }
        if let Some(branch) = &options.branch {
            spec = spec.option("--branch", branch.as_str());
        }
        let spec = spec
            .flag("--single-branch")
            .arg(url)
            .arg(target.relative().to_string_lossy().into_owned());

        let result = self
            .executor
            .execute_for(identity, &spec, options.timeout, Some(self.root.path()))
            .await?;

        log_component!(
            info,
            "workspace",
            "clone finished",
            dest = %target.relative().display(),
            success = result.success()
        );

        // Re-check what git actually created.
        let path = if result.success() {
            self.resolver
                .resolve_for(identity, &self.root, dest, None)?
        } else {
            target
        };
        Ok(CloneOutcome { path, result })
    }

    /// `git fetch [--prune]` inside an existing repository.
    pub async fn fetch(&self, identity: &str, repo: &str, prune: bool) -> Result<ExecutionResult> {
        let dir = self.repository_dir(identity, repo)?;
        let mut spec = CommandSpec::git("fetch");
        if prune {
            spec = spec.flag("--prune");
        }
        Ok(self
            .executor
            .execute_for(identity, &spec, Duration::ZERO, Some(dir.path()))
            .await?)
    }

    /// Read `file` from `repo`. The repository is resolved against the root,
    /// then the file against the repository. Without `extensions` the
    /// policy's default allowlist applies.
    pub fn read_file(
        &self,
        identity: &str,
        repo: &str,
        file: &str,
        extensions: Option<&AllowedExtensions>,
    ) -> Result<String> {
        let dir = self.repository_dir(identity, repo)?;
        let extensions = extensions.or_else(|| self.resolver.default_extensions());
        let resolved = self
            .resolver
            .resolve_existing_file(identity, &dir, file, extensions)?;
        Ok(self.resolver.read_to_string(&resolved)?)
    }

    fn repository_dir(
        &self,
        identity: &str,
        repo: &str,
    ) -> std::result::Result<TrustedDirectory, PathTraversalError> {
        let resolved = self
            .resolver
            .resolve_non_root(identity, &self.root, repo, None)?;
        if !resolved.exists() || !resolved.as_path().is_dir() {
            return Err(PathTraversalError::new(
                TraversalKind::NotAFile,
                format!("'{}' is not a repository directory", resolved.relative().display()),
            ));
        }
        TrustedDirectory::new(resolved.as_path())
    }
}
