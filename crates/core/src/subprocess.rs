//! Timeout-wrapped subprocess execution, shared by every crate that shells
//! out to a host binary (StateFS's `btrfs`/`mount`/`cp` backends, the WSL
//! mount precondition's `findmnt`/`systemctl`).

use std::process::Output;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

pub const BTRFS_TIMEOUT: Duration = Duration::from_secs(30);
pub const MOUNT_TIMEOUT: Duration = Duration::from_secs(15);
pub const COPY_TIMEOUT: Duration = Duration::from_secs(120);
pub const FINDMNT_TIMEOUT: Duration = Duration::from_secs(5);
pub const SYSTEMCTL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SubprocessError {
    #[error("timed out after {0:?} running {1}")]
    Timeout(Duration, String),
    #[error("failed to spawn {0}: {1}")]
    Spawn(String, std::io::Error),
    #[error("{0} exited with {1}: {2}")]
    NonZeroExit(String, std::process::ExitStatus, String),
}

/// Runs `cmd` to completion, enforcing `timeout`, and returns its stdout as
/// a `String` on success. On a non-zero exit, the error carries stderr.
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    label: &str,
) -> Result<String, SubprocessError> {
    let output: Output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| SubprocessError::Timeout(timeout, label.to_string()))?
        .map_err(|e| SubprocessError::Spawn(label.to_string(), e))?;

    if !output.status.success() {
        return Err(SubprocessError::NonZeroExit(
            label.to_string(),
            output.status,
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn succeeds_on_zero_exit() {
        let mut cmd = Command::new("true");
        cmd.kill_on_drop(true);
        let out = run_with_timeout(cmd, Duration::from_secs(5), "true").await;
        assert!(out.is_ok());
    }

    #[tokio::test]
    async fn surfaces_non_zero_exit() {
        let mut cmd = Command::new("false");
        cmd.kill_on_drop(true);
        let err = run_with_timeout(cmd, Duration::from_secs(5), "false")
            .await
            .unwrap_err();
        assert!(matches!(err, SubprocessError::NonZeroExit(..)));
    }

    #[tokio::test]
    async fn times_out_on_slow_command() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        cmd.kill_on_drop(true);
        let err = run_with_timeout(cmd, Duration::from_millis(50), "sleep")
            .await
            .unwrap_err();
        assert!(matches!(err, SubprocessError::Timeout(..)));
    }
}
