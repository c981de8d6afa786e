//! Text output module
//!
//! Emits the final transcript to stdout, the clipboard, or the focused
//! window via simulated typing. Clipboard and typing shell out to the
//! session-appropriate tool (Wayland: wl-copy/wtype, X11: xclip/xdotool).

pub mod clipboard;
pub mod typing;

use crate::error::OutputError;
use serde::{Deserialize, Serialize};

/// Output mode selection
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Copy to clipboard
    #[default]
    Clipboard,
    /// Print to stdout
    Stdout,
    /// Simulate keyboard input at the cursor position
    Type,
}

/// Whether the session is running under Wayland
pub(crate) fn is_wayland() -> bool {
    std::env::var_os("WAYLAND_DISPLAY").is_some()
}

/// Emit text according to the selected mode
pub async fn emit(text: &str, mode: OutputMode) -> Result<(), OutputError> {
    match mode {
        OutputMode::Stdout => {
            println!("{}", text);
            Ok(())
        }
        OutputMode::Clipboard => {
            clipboard::copy(&format!("{}\n", text)).await?;
            eprintln!("  Copied to clipboard.");
            Ok(())
        }
        OutputMode::Type => {
            typing::type_text(&format!("{}\n", text)).await?;
            eprintln!("  Typed into focused window.");
            Ok(())
        }
    }
}
