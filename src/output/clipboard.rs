//! Clipboard text output
//!
//! Pipes text into wl-copy (Wayland) or xclip (X11).

use super::is_wayland;
use crate::error::OutputError;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Copy text to the session clipboard
pub async fn copy(text: &str) -> Result<(), OutputError> {
    if is_wayland() {
        which::which("wl-copy").map_err(|_| OutputError::ToolNotFound {
            tool: "wl-copy",
            package: "wl-clipboard",
        })?;
        run_with_stdin("wl-copy", &[], text).await
    } else {
        which::which("xclip").map_err(|_| OutputError::ToolNotFound {
            tool: "xclip",
            package: "xclip",
        })?;
        run_with_stdin("xclip", &["-selection", "clipboard"], text).await
    }
}

/// Spawn a command and feed text on stdin
async fn run_with_stdin(
    program: &'static str,
    args: &[&str],
    text: &str,
) -> Result<(), OutputError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| OutputError::CommandFailed(program, e.to_string()))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(text.as_bytes())
            .await
            .map_err(|e| OutputError::WriteFailed(e.to_string()))?;
        // Close stdin to signal EOF
        drop(stdin);
    }

    let status = child
        .wait()
        .await
        .map_err(|e| OutputError::CommandFailed(program, e.to_string()))?;

    if !status.success() {
        return Err(OutputError::CommandFailed(
            program,
            format!("exit status {}", status),
        ));
    }

    tracing::debug!("Text copied via {} ({} chars)", program, text.chars().count());
    Ok(())
}
