//! SenseVoice speech-to-text via a persistent helper process
//!
//! The SenseVoice model runs in an external helper (typically a small Python
//! program wrapping FunASR) so the daemon stays free of its runtime. The
//! helper is spawned once, loads the model, answers requests over a pipe
//! protocol and is killed on unload:
//!
//! 1. Helper starts with `--model` / `--device` arguments, loads the model
//! 2. Helper writes "READY\n" to stdout
//! 3. Per request: `[u32 sample_count (LE)][u32 sample_rate (LE)][f32 samples (LE)...]`
//!    on stdin, one JSON line `{"ok": bool, "text"?, "error"?}` on stdout
//! 4. On unload the helper is terminated, releasing model memory

use super::SttEngine;
use crate::config::{SenseVoiceConfig, SttConfig};
use crate::error::SttError;
use regex::Regex;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{LazyLock, Mutex};

/// Ready signal printed by the helper once the model is loaded
const READY_SIGNAL: &str = "READY";

/// SenseVoice emits rich-transcription markers like `<|zh|>` and `<|Speech|>`
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<\|[^|]+\|>").unwrap()
});

/// Response line from the helper process
#[derive(Debug, serde::Deserialize)]
struct HelperResponse {
    ok: bool,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// A running helper with the model resident
#[derive(Debug)]
struct Helper {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// SenseVoice engine delegating to a persistent helper process
#[derive(Debug)]
pub struct SenseVoiceEngine {
    config: SenseVoiceConfig,
    language: String,
    helper: Mutex<Option<Helper>>,
}

impl SenseVoiceEngine {
    pub fn new(config: &SttConfig) -> Result<Self, SttError> {
        if config.sensevoice.command.trim().is_empty() {
            return Err(SttError::ConfigError(
                "stt.sensevoice.command is required for the sensevoice backend".to_string(),
            ));
        }
        Ok(Self {
            config: config.sensevoice.clone(),
            language: config.language.clone(),
            helper: Mutex::new(None),
        })
    }

    /// Spawn the helper and wait for it to report the model loaded
    fn spawn_helper(&self) -> Result<Helper, SttError> {
        tracing::info!(
            "Starting SenseVoice helper: {} (model: {}, device: {})",
            self.config.command,
            self.config.model,
            self.config.device
        );
        let start = std::time::Instant::now();

        let mut child = Command::new(&self.config.command)
            .arg("--model")
            .arg(&self.config.model)
            .arg("--device")
            .arg(&self.config.device)
            .arg("--language")
            .arg(&self.language)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                SttError::InitFailed(format!(
                    "Failed to spawn '{}': {}",
                    self.config.command, e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SttError::InitFailed("Helper stdin not available".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SttError::InitFailed("Helper stdout not available".to_string()))?;
        let mut stdout = BufReader::new(stdout);

        let mut ready_line = String::new();
        stdout
            .read_line(&mut ready_line)
            .map_err(|e| SttError::InitFailed(format!("Failed to read READY signal: {}", e)))?;

        if ready_line.trim() != READY_SIGNAL {
            // The helper may have reported a load failure as JSON instead.
            if let Ok(response) = serde_json::from_str::<HelperResponse>(&ready_line) {
                if let Some(error) = response.error {
                    return Err(SttError::InitFailed(error));
                }
            }
            return Err(SttError::InitFailed(format!(
                "Helper failed to load model (got: {:?})",
                ready_line.trim()
            )));
        }

        tracing::info!(
            "SenseVoice helper ready in {:.2}s",
            start.elapsed().as_secs_f32()
        );

        Ok(Helper {
            child,
            stdin,
            stdout,
        })
    }

    fn send_request(
        helper: &mut Helper,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<HelperResponse, SttError> {
        let count = samples.len() as u32;
        helper
            .stdin
            .write_all(&count.to_le_bytes())
            .and_then(|_| helper.stdin.write_all(&sample_rate.to_le_bytes()))
            .map_err(|e| SttError::InferenceFailed(format!("Failed to write header: {}", e)))?;

        let mut bytes = Vec::with_capacity(samples.len() * 4);
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        helper
            .stdin
            .write_all(&bytes)
            .and_then(|_| helper.stdin.flush())
            .map_err(|e| SttError::InferenceFailed(format!("Failed to write audio: {}", e)))?;

        let mut line = String::new();
        helper
            .stdout
            .read_line(&mut line)
            .map_err(|e| SttError::InferenceFailed(format!("Failed to read response: {}", e)))?;

        serde_json::from_str(&line).map_err(|e| {
            SttError::InferenceFailed(format!(
                "Failed to parse helper response: {} (output: {:?})",
                e, line
            ))
        })
    }
}

impl SttEngine for SenseVoiceEngine {
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, SttError> {
        if samples.is_empty() {
            return Err(SttError::AudioFormat("Empty audio buffer".to_string()));
        }

        let mut guard = self.helper.lock().unwrap();
        if guard.is_none() {
            *guard = Some(self.spawn_helper()?);
        }
        let helper = match guard.as_mut() {
            Some(helper) => helper,
            None => return Err(SttError::InitFailed("helper spawn failed".to_string())),
        };

        match Self::send_request(helper, samples, sample_rate) {
            Ok(response) => {
                if response.ok {
                    let text = response.text.unwrap_or_default();
                    Ok(strip_rich_tags(&text))
                } else {
                    Err(SttError::InferenceFailed(
                        response
                            .error
                            .unwrap_or_else(|| "Unknown helper error".to_string()),
                    ))
                }
            }
            Err(e) => {
                // Pipe broke or garbage arrived; drop the helper so the next
                // request spawns a fresh one.
                if let Some(mut helper) = guard.take() {
                    let _ = helper.child.kill();
                    let _ = helper.child.wait();
                }
                Err(e)
            }
        }
    }

    fn unload(&self) {
        let mut guard = self.helper.lock().unwrap();
        if let Some(mut helper) = guard.take() {
            tracing::info!("Stopping SenseVoice helper");
            let _ = helper.child.kill();
            let _ = helper.child.wait();
        }
    }
}

/// Strip SenseVoice rich-transcription markers (`<|zh|>`, `<|NEUTRAL|>`, ...)
fn strip_rich_tags(text: &str) -> String {
    TAG_RE.replace_all(text, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_rich_tags() {
        let raw = "<|zh|><|NEUTRAL|><|Speech|>hello world<|/Speech|>";
        assert_eq!(strip_rich_tags(raw), "hello world");
    }

    #[test]
    fn test_strip_rich_tags_plain_text_untouched() {
        assert_eq!(strip_rich_tags("  plain text "), "plain text");
    }

    #[test]
    fn test_helper_response_parsing() {
        let ok: HelperResponse =
            serde_json::from_str(r#"{"ok": true, "text": "hi"}"#).unwrap();
        assert!(ok.ok);
        assert_eq!(ok.text.as_deref(), Some("hi"));

        let err: HelperResponse =
            serde_json::from_str(r#"{"ok": false, "error": "cuda OOM"}"#).unwrap();
        assert!(!err.ok);
        assert_eq!(err.error.as_deref(), Some("cuda OOM"));
    }

    #[test]
    fn test_empty_command_is_config_error() {
        let mut config = SttConfig::default();
        config.sensevoice.command = "  ".to_string();
        let err = SenseVoiceEngine::new(&config).unwrap_err();
        assert!(matches!(err, SttError::ConfigError(_)));
    }
}
