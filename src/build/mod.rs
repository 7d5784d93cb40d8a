//! Build capability - runs framework build commands
//!
//! A build is an external subprocess: shell command, working directory,
//! extra environment, wall-clock timeout. The runner guarantees the
//! child is killed when the timeout fires, and drains stdout/stderr on
//! separate threads so a chatty build can never deadlock on a full pipe
//! buffer.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{CaravelError, CaravelResult};

/// Captured result of a finished build subprocess
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl BuildOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last `lines` lines of combined output, for failure records
    pub fn tail(&self, lines: usize) -> String {
        let combined = format!("{}\n{}", self.stdout, self.stderr);
        let all: Vec<&str> = combined.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Capability for running build commands
pub trait BuildRunner: Send + Sync {
    /// Run `command` under a shell in `working_dir` with `env` overlaid
    ///
    /// Returns the captured output for any exit status; errs only when
    /// the process could not be spawned or exceeded `timeout`.
    fn run(
        &self,
        command: &str,
        working_dir: &Path,
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> CaravelResult<BuildOutput>;
}

/// Production runner over std::process
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessBuildRunner;

impl ProcessBuildRunner {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

impl BuildRunner for ProcessBuildRunner {
    fn run(
        &self,
        command: &str,
        working_dir: &Path,
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> CaravelResult<BuildOutput> {
        info!(command, dir = %working_dir.display(), "running build");

        let mut child = shell_command(command)
            .current_dir(working_dir)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                CaravelError::Io(std::io::Error::other(format!(
                    "could not spawn build command '{command}': {e}"
                )))
            })?;

        // Drain both pipes on their own threads; waiting first would
        // deadlock once the child fills a pipe buffer.
        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();
        let stdout_thread = std::thread::spawn(move || read_to_string_lossy(stdout_handle));
        let stderr_thread = std::thread::spawn(move || read_to_string_lossy(stderr_handle));

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_thread.join();
                    let _ = stderr_thread.join();
                    return Err(CaravelError::BuildTimeout {
                        command: command.to_string(),
                        seconds: timeout.as_secs(),
                    });
                }
                None => std::thread::sleep(Duration::from_millis(50)),
            }
        };

        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();
        let exit_code = status.code().unwrap_or(-1);
        debug!(exit_code, "build finished");

        Ok(BuildOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

fn read_to_string_lossy<R: Read>(handle: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut reader) = handle {
        let _ = reader.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Test double returning canned results without spawning processes
#[derive(Debug, Clone, Default)]
pub struct ScriptedBuildRunner {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ScriptedBuildRunner {
    pub fn succeeding() -> Self {
        Self {
            exit_code: 0,
            stdout: "build ok\n".to_string(),
            stderr: String::new(),
        }
    }

    pub fn failing(code: i32, stderr: &str) -> Self {
        Self {
            exit_code: code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

impl BuildRunner for ScriptedBuildRunner {
    fn run(
        &self,
        _command: &str,
        _working_dir: &Path,
        _env: &BTreeMap<String, String>,
        _timeout: Duration,
    ) -> CaravelResult<BuildOutput> {
        Ok(BuildOutput {
            exit_code: self.exit_code,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[cfg(unix)]
    #[test]
    fn run_captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let out = ProcessBuildRunner::new()
            .run("echo built", dir.path(), &no_env(), Duration::from_secs(10))
            .unwrap();

        assert!(out.success());
        assert_eq!(out.stdout.trim(), "built");
    }

    #[cfg(unix)]
    #[test]
    fn run_reports_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let out = ProcessBuildRunner::new()
            .run(
                "echo broken >&2; exit 3",
                dir.path(),
                &no_env(),
                Duration::from_secs(10),
            )
            .unwrap();

        assert!(!out.success());
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr.trim(), "broken");
    }

    #[cfg(unix)]
    #[test]
    fn run_passes_environment() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = BTreeMap::new();
        env.insert("DEPLOY_TARGET".to_string(), "production".to_string());

        let out = ProcessBuildRunner::new()
            .run(
                "echo $DEPLOY_TARGET",
                dir.path(),
                &env,
                Duration::from_secs(10),
            )
            .unwrap();

        assert_eq!(out.stdout.trim(), "production");
    }

    #[cfg(unix)]
    #[test]
    fn run_kills_on_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let err = ProcessBuildRunner::new()
            .run("sleep 30", dir.path(), &no_env(), Duration::from_millis(300))
            .unwrap_err();

        assert!(matches!(err, CaravelError::BuildTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn tail_returns_last_lines() {
        let out = BuildOutput {
            exit_code: 1,
            stdout: "one\ntwo\nthree\n".to_string(),
            stderr: "err\n".to_string(),
        };
        assert_eq!(out.tail(2), "three\nerr");
    }

    #[test]
    fn scripted_runner_returns_canned_output() {
        let runner = ScriptedBuildRunner::failing(2, "boom");
        let dir = tempfile::tempdir().unwrap();
        let out = runner
            .run("anything", dir.path(), &no_env(), Duration::from_secs(1))
            .unwrap();
        assert_eq!(out.exit_code, 2);
        assert_eq!(out.stderr, "boom");
    }
}
