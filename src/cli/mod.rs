//! CLI module: command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod check;
pub mod clone;
pub mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

use archguard::config::Config;
use archguard::error::GuardError;
use archguard::log_component;
use archguard::utils::logging::init_logging;

#[derive(Parser)]
#[command(name = "archguard")]
#[command(version)]
#[command(about = "Security validation for repository documentation pipelines", long_about = None)]
struct Cli {
    /// Config file (default: ~/.archguard/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a relative path inside a trusted base directory
    Resolve {
        /// Trusted base directory
        base: PathBuf,
        /// Untrusted relative path
        path: String,
        /// Comma-separated extension allowlist (e.g. ".rs,.py"). With
        /// --must-exist the policy's allowlist is the default.
        #[arg(long, value_name = "LIST")]
        ext: Option<String>,
        /// Require an existing regular file
        #[arg(long)]
        must_exist: bool,
    },
    /// Validate a repository URL
    CheckUrl {
        /// Repository URL
        url: String,
        /// Print the full inspection report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove credentials from a repository URL
    SanitizeUrl {
        /// Repository URL
        url: String,
        /// Mask user info, query and fragment as for log lines
        #[arg(long)]
        for_logging: bool,
    },
    /// Clone a repository into a trusted root
    Clone {
        /// Repository URL
        url: String,
        /// Trusted clone root
        root: PathBuf,
        /// Destination directory, relative to the root
        dest: String,
        /// Shallow clone depth (0 clones full history)
        #[arg(long, default_value_t = 1)]
        depth: u32,
        /// Branch to clone
        #[arg(long)]
        branch: Option<String>,
        /// Timeout in seconds (default from policy)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Print the effective validation policy as JSON
    Policy,
    /// Validate configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Check configuration for errors and warnings
    Check,
}

/// Load the config, honoring `--config` when given.
pub(crate) fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    Ok(match path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    })
}

/// Print the generic denial for `err` and return the failure exit code.
/// The detailed reason is already on the security log.
pub(crate) fn deny(err: &GuardError) -> ExitCode {
    log_component!(debug, "cli", "request denied", reason = %err);
    eprintln!("error: {}", err.public_message());
    ExitCode::from(2)
}

pub async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    // A broken config must not stop `config check` from reporting on it.
    let logging_cfg = load_config(cli.config.as_ref())
        .map(|c| c.logging)
        .unwrap_or_default();
    if let Err(e) = init_logging(&logging_cfg) {
        eprintln!("warning: {}", e);
    }

    let code = match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
            ExitCode::SUCCESS
        }
        Some(Commands::Version) => {
            cmd_version();
            ExitCode::SUCCESS
        }
        Some(Commands::Resolve {
            base,
            path,
            ext,
            must_exist,
        }) => {
            let config = load_config(cli.config.as_ref())?;
            check::cmd_resolve(&config, &base, &path, ext.as_deref(), must_exist)?
        }
        Some(Commands::CheckUrl { url, json }) => {
            let config = load_config(cli.config.as_ref())?;
            check::cmd_check_url(&config, &url, json)?
        }
        Some(Commands::SanitizeUrl { url, for_logging }) => {
            let config = load_config(cli.config.as_ref())?;
            check::cmd_sanitize_url(&config, &url, for_logging)?
        }
        Some(Commands::Clone {
            url,
            root,
            dest,
            depth,
            branch,
            timeout,
        }) => {
            let config = load_config(cli.config.as_ref())?;
            let args = clone::CloneArgs {
                url,
                root,
                dest,
                depth,
                branch,
                timeout,
            };
            clone::cmd_clone(&config, args).await?
        }
        Some(Commands::Policy) => {
            let config = load_config(cli.config.as_ref())?;
            check::cmd_policy(&config)?
        }
        Some(Commands::Config { action }) => config::cmd_config(action, cli.config.as_ref())?,
    };

    Ok(code)
}

/// Display version information
fn cmd_version() {
    println!("archguard {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Security validation for repository documentation pipelines");
}
