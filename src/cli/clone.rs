//! Clone command handler.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;

use archguard::config::Config;
use archguard::log_component;
use archguard::workspace::CloneOptions;
use archguard::SecurityGuard;

use super::deny;

pub(crate) struct CloneArgs {
    pub url: String,
    pub root: PathBuf,
    pub dest: String,
    pub depth: u32,
    pub branch: Option<String>,
    pub timeout: Option<u64>,
}

pub(crate) async fn cmd_clone(config: &Config, args: CloneArgs) -> Result<ExitCode> {
    let guard = SecurityGuard::from_config(config)?;
    let workspace = match guard.workspace(&args.root) {
        Ok(ws) => ws,
        Err(e) => return Ok(deny(&e)),
    };

    let options = CloneOptions {
        depth: (args.depth > 0).then_some(args.depth),
        branch: args.branch,
        timeout: args.timeout.map_or(Duration::ZERO, Duration::from_secs),
    };
    let identity = whoami();

    let outcome = match workspace
        .clone_repository(&identity, &args.url, &args.dest, &options)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => return Ok(deny(&e)),
    };

    let result = &outcome.result;
    if !result.stderr.is_empty() {
        eprint!("{}", result.stderr);
    }
    if result.timed_out {
        eprintln!("error: clone timed out after {}s", result.duration.as_secs());
        return Ok(ExitCode::FAILURE);
    }
    if !result.success() {
        log_component!(warn, "cli", "git clone failed", exit_code = ?result.exit_code);
        eprintln!("error: git exited with {:?}", result.exit_code);
        return Ok(ExitCode::FAILURE);
    }

    println!("Cloned into {}", outcome.path.as_path().display());
    Ok(ExitCode::SUCCESS)
}

/// Attribute CLI operations to the local user.
fn whoami() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.is_empty())
        .map(|u| format!("cli:{}", u))
        .unwrap_or_else(|| "cli".to_string())
}
