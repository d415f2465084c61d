//! Running external media tools with a deadline.
//!
//! Children are spawned with `kill_on_drop`, so a request that times out or
//! is cancelled never leaves a stray ffmpeg behind.

use std::{
    ffi::OsStr,
    io::ErrorKind,
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("required command {0} not found, make sure it is installed and on $PATH")]
    NotFound(String),
    #[error("cannot run command {0} due to permissions on the binary")]
    PermissionDenied(String),
    #[error("{0} timed out after {1:?}")]
    Timeout(String, Duration),
    #[error("{command} failed with {status}: {stderr}")]
    Status {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{0} produced no output")]
    EmptyOutput(String),
    #[error("output is not in faststart layout")]
    NotFaststart,
    #[error("could not parse {0} output")]
    Parse(String, #[source] serde_json::Error),
    #[error("process I/O error")]
    Other(#[source] std::io::Error),
}

/// An external program and how long it may run.
#[derive(Debug, Clone)]
pub struct Tool {
    pub program: String,
    pub timeout: Duration,
}

impl Tool {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Run to completion and return stdout.
    #[tracing::instrument(skip(self, args), fields(command = %self.program))]
    pub async fn run<T>(&self, args: &[T]) -> Result<Vec<u8>, ProcessError>
    where
        T: AsRef<OsStr>,
    {
        let start = Instant::now();
        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ProcessError::NotFound(self.program.clone()),
                ErrorKind::PermissionDenied => ProcessError::PermissionDenied(self.program.clone()),
                _ => ProcessError::Other(e),
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProcessError::Timeout(self.program.clone(), self.timeout))?
            .map_err(ProcessError::Other)?;

        tracing::debug!(
            duration_ms = start.elapsed().as_millis() as u64,
            status = %output.status,
            "process finished"
        );

        if !output.status.success() {
            return Err(ProcessError::Status {
                command: self.program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let tool = Tool::new("sh", Duration::from_secs(5));
        let out = tool.run(&["-c", "printf hello"]).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_status_error() {
        let tool = Tool::new("sh", Duration::from_secs(5));
        let err = tool.run(&["-c", "echo broken >&2; exit 3"]).await.unwrap_err();
        match err {
            ProcessError::Status { status, stderr, .. } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_not_found() {
        let tool = Tool::new("definitely-not-a-real-binary-4c1f", Duration::from_secs(5));
        let err = tool.run::<&str>(&[]).await.unwrap_err();
        assert!(matches!(err, ProcessError::NotFound(_)));
    }

    #[tokio::test]
    async fn stuck_process_times_out() {
        let tool = Tool::new("sleep", Duration::from_millis(100));
        let start = Instant::now();
        let err = tool.run(&["5"]).await.unwrap_err();
        assert!(matches!(err, ProcessError::Timeout(_, _)));
        assert!(start.elapsed() < Duration::from_secs(4));
    }
}
