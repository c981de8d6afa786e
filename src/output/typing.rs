//! Simulated keyboard output
//!
//! Types text into the focused window via wtype (Wayland) or xdotool (X11),
//! and provides key-combo injection for voice command actions.

use super::is_wayland;
use crate::error::OutputError;
use std::process::Stdio;
use tokio::process::Command;

/// Type text into the focused window
pub async fn type_text(text: &str) -> Result<(), OutputError> {
    if is_wayland() {
        which::which("wtype").map_err(|_| OutputError::ToolNotFound {
            tool: "wtype",
            package: "wtype",
        })?;
        run("wtype", &["--", text]).await
    } else {
        which::which("xdotool").map_err(|_| OutputError::ToolNotFound {
            tool: "xdotool",
            package: "xdotool",
        })?;
        run("xdotool", &["type", "--", text]).await
    }
}

/// Press a key combination, e.g. "Return" or "ctrl+z"
pub async fn press_keys(combo: &str) -> Result<(), OutputError> {
    if is_wayland() {
        which::which("wtype").map_err(|_| OutputError::ToolNotFound {
            tool: "wtype",
            package: "wtype",
        })?;
        // wtype takes modifiers and key separately: ctrl+z ->
        // wtype -M ctrl -k z -m ctrl
        let parts: Vec<&str> = combo.split('+').collect();
        let (mods, key) = match parts.split_last() {
            Some((key, mods)) => (mods.to_vec(), *key),
            None => (Vec::new(), combo),
        };
        let mut args: Vec<String> = Vec::new();
        for m in &mods {
            args.push("-M".to_string());
            args.push((*m).to_string());
        }
        args.push("-k".to_string());
        args.push(key.to_string());
        for m in mods.iter().rev() {
            args.push("-m".to_string());
            args.push((*m).to_string());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run("wtype", &arg_refs).await
    } else {
        which::which("xdotool").map_err(|_| OutputError::ToolNotFound {
            tool: "xdotool",
            package: "xdotool",
        })?;
        run("xdotool", &["key", combo]).await
    }
}

async fn run(program: &'static str, args: &[&str]) -> Result<(), OutputError> {
    let output = Command::new(program)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| OutputError::CommandFailed(program, e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OutputError::CommandFailed(program, stderr.to_string()));
    }
    Ok(())
}
