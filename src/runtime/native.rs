//! Native runner
//!
//! Spawns the program directly (no shell) with a cleared environment, in its
//! own process group so a timeout can take down every descendant.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::warn;

use super::types::{Invocation, ProcessRunner, RawOutput, RuntimeError, RuntimeResult};

/// How long to wait for the output pipes to close after a kill.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default)]
pub struct NativeRunner;

impl NativeRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for NativeRunner {
    fn name(&self) -> &str {
        "native"
    }

    async fn run(&self, invocation: &Invocation) -> RuntimeResult<RawOutput> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .env_clear()
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &invocation.cwd {
            cmd.current_dir(cwd);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| RuntimeError::Spawn {
            program: invocation.program.clone(),
            reason: e.to_string(),
        })?;
        let pid = child.id();

        let cap = invocation.max_output_bytes;
        let stdout = tokio::spawn(read_capped(child.stdout.take(), cap));
        let stderr = tokio::spawn(read_capped(child.stderr.take(), cap));

        let (status, timed_out) = match tokio::time::timeout(invocation.timeout, child.wait()).await
        {
            Ok(Ok(status)) => (Some(status), false),
            Ok(Err(e)) => return Err(RuntimeError::Io(e.to_string())),
            Err(_) => {
                kill_process_group(pid);
                let _ = child.kill().await;
                warn!(
                    program = %invocation.program,
                    timeout_secs = invocation.timeout.as_secs(),
                    "process timed out, killed its group"
                );
                (child.wait().await.ok(), true)
            }
        };

        let (stdout, out_truncated) = join_reader(stdout).await;
        let (stderr, err_truncated) = join_reader(stderr).await;

        Ok(RawOutput {
            exit_code: status.and_then(|s| s.code()),
            stdout,
            stderr,
            truncated: out_truncated || err_truncated,
            timed_out,
            duration: started.elapsed(),
        })
    }
}

/// Read a pipe to EOF keeping at most `cap` bytes. The rest is drained so
/// the child never blocks on a full pipe.
async fn read_capped(pipe: Option<impl AsyncRead + Unpin>, cap: usize) -> (Vec<u8>, bool) {
    let Some(mut pipe) = pipe else {
        return (Vec::new(), false);
    };
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                if n > room {
                    truncated = true;
                }
                kept.extend(chunk.iter().take(n.min(room)));
            }
        }
    }
    (kept, truncated)
}

/// A descendant that left the group can hold the pipe open; give up after a
/// grace period.
async fn join_reader(handle: tokio::task::JoinHandle<(Vec<u8>, bool)>) -> (Vec<u8>, bool) {
    let abort = handle.abort_handle();
    match tokio::time::timeout(DRAIN_GRACE, handle).await {
        Ok(Ok(output)) => output,
        Ok(Err(_)) => (Vec::new(), false),
        Err(_) => {
            abort.abort();
            (Vec::new(), true)
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // The child called setpgid(0, 0), so its pid is the group id.
    let _ = unsafe { libc::killpg(pid, libc::SIGKILL) };
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn invocation(program: &str, args: &[&str]) -> Invocation {
        Invocation {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: vec![("PATH".into(), "/usr/bin:/bin".into())],
            cwd: None,
            timeout: Duration::from_secs(10),
            max_output_bytes: 1024,
        }
    }

    #[tokio::test]
    async fn test_native_runner_name() {
        assert_eq!(NativeRunner::new().name(), "native");
    }

    #[tokio::test]
    async fn test_runs_without_shell() {
        let out = NativeRunner::new()
            .run(&invocation("echo", &["hello", "$(id)"]))
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(0));
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hello $(id)");
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn test_environment_is_cleared() {
        std::env::set_var("ARCHGUARD_RUNNER_TEST_SECRET", "leak");
        let out = NativeRunner::new().run(&invocation("env", &[])).await.unwrap();
        let env = String::from_utf8_lossy(&out.stdout);
        assert!(!env.contains("ARCHGUARD_RUNNER_TEST_SECRET"));
        assert!(env.contains("PATH=/usr/bin:/bin"));
    }

    #[tokio::test]
    async fn test_exit_code_reported() {
        let out = NativeRunner::new()
            .run(&invocation("sh", &["-c", "exit 42"]))
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(42));
    }

    #[tokio::test]
    async fn test_timeout_kills_group() {
        let mut inv = invocation("sh", &["-c", "sleep 30 & sleep 30"]);
        inv.timeout = Duration::from_millis(200);
        let started = Instant::now();
        let out = NativeRunner::new().run(&inv).await.unwrap();
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let mut inv = invocation("sh", &["-c", "yes | head -c 100000"]);
        inv.max_output_bytes = 64;
        let out = NativeRunner::new().run(&inv).await.unwrap();
        assert_eq!(out.stdout.len(), 64);
        assert!(out.truncated);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let err = NativeRunner::new()
            .run(&invocation("/nonexistent/archguard-binary", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn { .. }));
    }
}
