//! Read-only checks: path resolution, URL validation, policy dump.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;

use archguard::config::Config;
use archguard::error::GuardError;
use archguard::security::{AllowedExtensions, TrustedDirectory, SYSTEM_IDENTITY};
use archguard::SecurityGuard;

use super::deny;

pub(crate) fn cmd_resolve(
    config: &Config,
    base: &Path,
    path: &str,
    ext: Option<&str>,
    must_exist: bool,
) -> Result<ExitCode> {
    let guard = SecurityGuard::from_config(config)?;
    let extensions = ext.map(AllowedExtensions::parse_list).transpose()?;

    let resolved = if must_exist {
        TrustedDirectory::new(base)
            .map_err(GuardError::from)
            .and_then(|base| {
                let resolver = guard.path_resolver();
                let extensions = extensions.as_ref().or_else(|| resolver.default_extensions());
                resolver
                    .resolve_existing_file(SYSTEM_IDENTITY, &base, path, extensions)
                    .map_err(GuardError::from)
            })
    } else {
        guard.resolve_path(base, path, extensions.as_ref())
    };

    match resolved {
        Ok(resolved) => {
            println!("{}", resolved.as_path().display());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(deny(&e)),
    }
}

pub(crate) fn cmd_check_url(config: &Config, url: &str, json: bool) -> Result<ExitCode> {
    let guard = SecurityGuard::from_config(config)?;
    if json {
        let report = guard.url_validator().inspect(url);
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(if report.valid {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(2)
        });
    }
    match guard.validate_repository_url(url) {
        Ok(()) => {
            println!("[OK] {}", guard.url_validator().sanitize_for_logging(url));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(deny(&e)),
    }
}

pub(crate) fn cmd_sanitize_url(config: &Config, url: &str, for_logging: bool) -> Result<ExitCode> {
    let guard = SecurityGuard::from_config(config)?;
    if for_logging {
        println!("{}", guard.url_validator().sanitize_for_logging(url));
        return Ok(ExitCode::SUCCESS);
    }
    match guard.sanitize_repository_url(url) {
        Ok(clean) => {
            println!("{}", clean);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(deny(&e)),
    }
}

pub(crate) fn cmd_policy(config: &Config) -> Result<ExitCode> {
    let guard = SecurityGuard::from_config(config)?;
    println!("{}", serde_json::to_string_pretty(guard.policy())?);
    Ok(ExitCode::SUCCESS)
}
