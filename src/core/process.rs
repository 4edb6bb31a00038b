/// External tool invocation
///
/// Dump and load tools (pg_dump, the structured-data dump task) are spawned
/// as plain subprocesses with a discrete argument vector. Nothing here goes
/// through a shell, so settings-derived values like database credentials
/// cannot inject into a command line.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time;
use tracing::debug;

use crate::error::ProcessError;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run a command to completion, capturing stdout/stderr.
    ///
    /// Fails with `ProcessError::Launch` if the executable cannot be
    /// spawned, `ProcessError::Exit` on a non-zero status, and
    /// `ProcessError::Timeout` if it outlives the configured timeout
    /// (the subprocess is killed in that case).
    pub async fn run(
        &self,
        program: &str,
        args: &[String],
        envs: &[(String, String)],
    ) -> Result<CommandOutput, ProcessError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program, arg_count = args.len(), "spawning subprocess");

        let child = cmd.spawn().map_err(|source| ProcessError::Launch {
            program: program.to_string(),
            source,
        })?;

        // kill_on_drop reaps the child when the timed-out future is dropped
        let output = match time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ProcessError::Launch {
                program: program.to_string(),
                source,
            })?,
            Err(_) => {
                return Err(ProcessError::Timeout {
                    program: program.to_string(),
                    timeout: self.timeout,
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            return Err(ProcessError::Exit {
                program: program.to_string(),
                code,
                stderr,
            });
        }

        Ok(CommandOutput {
            status: code,
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ProcessRunner {
        ProcessRunner::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn captures_stdout_on_success() {
        let output = runner()
            .run("echo", &["hello".to_string()], &[])
            .await
            .unwrap();
        assert_eq!(output.status, 0);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn passes_environment_overrides() {
        let output = runner()
            .run(
                "sh",
                &["-c".to_string(), "printf %s \"$EXCLUDE\"".to_string()],
                &[("EXCLUDE".to_string(), "users,ar_internal_metadata".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(output.stdout, "users,ar_internal_metadata");
    }

    #[tokio::test]
    async fn reports_nonzero_exit_with_stderr() {
        let err = runner()
            .run(
                "sh",
                &["-c".to_string(), "echo boom >&2; exit 3".to_string()],
                &[],
            )
            .await
            .unwrap_err();
        match err {
            ProcessError::Exit { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr.trim(), "boom");
            }
            other => panic!("expected Exit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn reports_launch_failure_for_missing_binary() {
        let err = runner()
            .run("envault-no-such-binary", &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Launch { .. }));
    }

    #[tokio::test]
    async fn kills_subprocess_on_timeout() {
        let err = ProcessRunner::new(Duration::from_millis(100))
            .run("sleep", &["30".to_string()], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
    }
}
