//! Shell commands for the service controller.
//!
//! The child is spawned with `kill_on_drop(true)`, so when the timeout drops
//! the pending wait the command is killed instead of left running.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::ServiceError;

/// Characters of each stream kept for the log.
const LOGGED_OUTPUT_CHARS: usize = 512;

/// Exit status and an excerpt of what the command printed.
#[derive(Debug)]
pub struct CommandOutput {
    /// `-1` when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Run `<shell> -c "<command>"` to completion or until `timeout`.
pub async fn run_shell(
    shell: &str,
    command: &str,
    timeout: Duration,
) -> Result<CommandOutput, ServiceError> {
    let child = Command::new(shell)
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ServiceError::SpawnFailed(e.to_string()))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ServiceError::Timeout)?
        .map_err(|e| ServiceError::ProcessFailed(e.to_string()))?;

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: excerpt(&output.stdout),
        stderr: excerpt(&output.stderr),
    })
}

fn excerpt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    match text.char_indices().nth(LOGGED_OUTPUT_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exit_code_and_output() {
        let out = run_shell("/bin/sh", "echo stopped; echo oops >&2; exit 3", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout, "stopped");
        assert_eq!(out.stderr, "oops");
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = run_shell("/bin/sh", "sleep 5", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Timeout));
    }

    #[tokio::test]
    async fn test_missing_shell() {
        let err = run_shell("/nonexistent/shell", "true", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::SpawnFailed(_)));
    }

    #[test]
    fn test_excerpt_shortens_long_output() {
        let long = "a".repeat(2000);
        let short = excerpt(long.as_bytes());
        assert_eq!(short.len(), LOGGED_OUTPUT_CHARS + 3);
        assert!(short.ends_with("..."));
        assert_eq!(excerpt(b"  active\n"), "active");
    }
}
