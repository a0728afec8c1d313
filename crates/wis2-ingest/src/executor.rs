//! Post-processing command execution

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::CommandError;

/// Runs an external command with a bounded lifetime
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `program` with `args`, waiting at most `timeout`.
    ///
    /// # Errors
    /// No arguments, spawn failure, non-zero exit, or timeout.
    async fn execute(&self, program: &str, args: &[String], timeout: Duration) -> Result<(), CommandError>;
}

/// Runs commands as child processes.
///
/// The child is killed if the timeout elapses or the wait is abandoned.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptExecutor;

#[async_trait]
impl Executor for ScriptExecutor {
    async fn execute(&self, program: &str, args: &[String], timeout: Duration) -> Result<(), CommandError> {
        if args.is_empty() {
            return Err(CommandError::NoArgs(program.to_string()));
        }

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: program.to_string(),
                source,
            })?;

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                debug!(program = %program, "Command succeeded");
                Ok(())
            },
            Ok(Ok(status)) => Err(CommandError::Exit {
                program: program.to_string(),
                status: status.to_string(),
            }),
            Ok(Err(source)) => Err(CommandError::Wait {
                program: program.to_string(),
                source,
            }),
            Err(_) => {
                // reap so no zombie is left behind
                let _ = child.kill().await;
                Err(CommandError::TimedOut {
                    program: program.to_string(),
                    timeout,
                })
            },
        }
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_success() {
        let result = ScriptExecutor
            .execute("true", &args(&["topic", "/path"]), Duration::from_secs(10))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let err = ScriptExecutor
            .execute("false", &args(&["topic", "/path"]), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Exit { .. }));
    }

    #[tokio::test]
    async fn test_no_args() {
        let err = ScriptExecutor
            .execute("true", &[], Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NoArgs(_)));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let err = ScriptExecutor
            .execute("/definitely/not/here", &args(&["x"]), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let started = std::time::Instant::now();
        let err = ScriptExecutor
            .execute("sleep", &args(&["30"]), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_receives_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let script = format!("printf '%s %s' \"$0\" \"$1\" > {}", out.display());
        ScriptExecutor
            .execute("sh", &args(&["-c", &script, "a/b", "/data/f"]), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "a/b /data/f");
    }
}
