//! Voice command matching and dispatch
//!
//! Transcripts are matched against configured trigger phrases before polish
//! and output. Actions are strings of the form `keys:<combo>`, `shell:<cmd>`
//! or `text:<literal>`, combinable with `|`:
//!
//! ```toml
//! [commands.map]
//! "send it" = "keys:Return"
//! "wipe line" = "keys:ctrl+a|keys:BackSpace"
//! "commit everything" = "shell:git add -A && git commit"
//! ```

use crate::error::OutputError;
use crate::output::typing;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Trailing punctuation STT engines like to append
static TRAILING_PUNCT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[。，！？、；：.!?,;:\s]+$").unwrap()
});

/// Match a transcript against the command map.
///
/// Exact matches win; fuzzy matching (normalized similarity above
/// `fuzzy_threshold`) only applies when the threshold is positive.
/// Returns the matched trigger and its action string.
pub fn match_command<'a>(
    text: &str,
    command_map: &'a HashMap<String, String>,
    fuzzy_threshold: f64,
) -> Option<(&'a str, &'a str)> {
    if command_map.is_empty() || text.trim().is_empty() {
        return None;
    }

    let normalized = TRAILING_PUNCT.replace(text.trim(), "").to_string();
    if normalized.is_empty() {
        return None;
    }

    if let Some((trigger, action)) = command_map.get_key_value(&normalized) {
        return Some((trigger.as_str(), action.as_str()));
    }

    if fuzzy_threshold > 0.0 {
        let mut best: Option<(&str, &str)> = None;
        let mut best_ratio = 0.0;
        for (trigger, action) in command_map {
            let ratio = strsim::normalized_levenshtein(&normalized, trigger);
            if ratio > best_ratio {
                best_ratio = ratio;
                best = Some((trigger.as_str(), action.as_str()));
            }
        }
        if best_ratio >= fuzzy_threshold {
            return best;
        }
    }

    None
}

/// Execute an action string: `|`-separated steps of `keys:`, `shell:`, `text:`
pub async fn run_action(action: &str) -> Result<(), OutputError> {
    for step in action.split('|') {
        let step = step.trim();
        if let Some(combo) = step.strip_prefix("keys:") {
            typing::press_keys(combo).await?;
        } else if let Some(command) = step.strip_prefix("shell:") {
            let status = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .status()
                .await
                .map_err(|e| OutputError::CommandFailed("sh", e.to_string()))?;
            if !status.success() {
                return Err(OutputError::CommandFailed(
                    "sh",
                    format!("'{}' exited with {}", command, status),
                ));
            }
        } else if let Some(text) = step.strip_prefix("text:") {
            typing::type_text(text).await?;
        } else {
            return Err(OutputError::CommandFailed(
                "action",
                format!("unknown action step: '{}'", step),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_exact_match() {
        let cmd_map = map(&[("send it", "keys:Return"), ("undo that", "keys:ctrl+z")]);
        assert_eq!(
            match_command("send it", &cmd_map, 0.0),
            Some(("send it", "keys:Return"))
        );
        assert_eq!(
            match_command("undo that", &cmd_map, 0.0),
            Some(("undo that", "keys:ctrl+z"))
        );
    }

    #[test]
    fn test_no_match() {
        let cmd_map = map(&[("send it", "keys:Return")]);
        assert_eq!(match_command("lovely weather today", &cmd_map, 0.0), None);
    }

    #[test]
    fn test_strip_whitespace_and_trailing_punctuation() {
        let cmd_map = map(&[("send it", "keys:Return"), ("发送", "keys:Return")]);
        assert!(match_command("  send it  ", &cmd_map, 0.0).is_some());
        assert!(match_command("send it.", &cmd_map, 0.0).is_some());
        assert!(match_command("send it!", &cmd_map, 0.0).is_some());
        assert!(match_command("send it,", &cmd_map, 0.0).is_some());
        assert!(match_command("发送。", &cmd_map, 0.0).is_some());
        assert!(match_command("发送！", &cmd_map, 0.0).is_some());
    }

    #[test]
    fn test_empty_text_and_empty_map() {
        let cmd_map = map(&[("send it", "keys:Return")]);
        assert_eq!(match_command("", &cmd_map, 0.0), None);
        assert_eq!(match_command("   ", &cmd_map, 0.0), None);
        assert_eq!(match_command("send it", &HashMap::new(), 0.0), None);
    }

    #[test]
    fn test_fuzzy_match_similar() {
        let cmd_map = map(&[("undo that", "keys:ctrl+z")]);
        assert_eq!(
            match_command("undo hat", &cmd_map, 0.5),
            Some(("undo that", "keys:ctrl+z"))
        );
    }

    #[test]
    fn test_fuzzy_below_threshold() {
        let cmd_map = map(&[("undo that", "keys:ctrl+z")]);
        assert_eq!(match_command("lovely weather", &cmd_map, 0.8), None);
    }

    #[test]
    fn test_fuzzy_disabled_by_default() {
        let cmd_map = map(&[("undo that", "keys:ctrl+z")]);
        assert_eq!(match_command("undo hat", &cmd_map, 0.0), None);
    }

    #[test]
    fn test_exact_match_takes_priority_over_fuzzy() {
        let cmd_map = map(&[
            ("send it", "keys:Return"),
            ("send it now", "keys:ctrl+Return"),
        ]);
        assert_eq!(
            match_command("send it", &cmd_map, 0.5),
            Some(("send it", "keys:Return"))
        );
    }

    #[test]
    fn test_combo_and_typed_actions_pass_through() {
        let cmd_map = map(&[
            ("wipe line", "keys:ctrl+a|keys:BackSpace"),
            ("my email", "text:user@example.com"),
            ("commit everything", "shell:git add -A && git commit"),
        ]);
        assert_eq!(
            match_command("wipe line", &cmd_map, 0.0),
            Some(("wipe line", "keys:ctrl+a|keys:BackSpace"))
        );
        assert_eq!(
            match_command("my email", &cmd_map, 0.0),
            Some(("my email", "text:user@example.com"))
        );
        assert_eq!(
            match_command("commit everything", &cmd_map, 0.0),
            Some(("commit everything", "shell:git add -A && git commit"))
        );
    }
}
