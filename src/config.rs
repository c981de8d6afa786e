//! Configuration loading and types for voxd
//!
//! Configuration is loaded in layers:
//! 1. Built-in defaults
//! 2. Config file (~/.config/voxd/config.toml)
//! 3. Environment variables (VOXD_*)
//! 4. CLI arguments (highest priority)

use crate::error::VoxdError;
use crate::output::OutputMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = r#"# Voxd Configuration
#
# Location: ~/.config/voxd/config.toml
# All settings can be overridden via CLI flags

[audio]
# Audio input device ("default" uses system default)
# List devices with: voxd devices
device = "default"

# Sample rate in Hz (whisper expects 16000)
sample_rate = 16000

# Fallback silence threshold (mean absolute amplitude). Normally the
# threshold is measured from ambient noise at the start of each recording.
silence_threshold = 0.15

# Seconds of sustained silence (after speech) that stop the recording
silence_duration = 2.0

# Maximum recording duration in seconds (safety limit)
max_duration_secs = 120

[stt]
# Transcription backend: "whisper" (local), "sensevoice" (local helper), "cloud"
backend = "whisper"

# Language code ("en", "zh", ...) or "auto" for auto-detection
language = "auto"

[stt.whisper]
# Model name (tiny, base, small, medium, large-v3, large-v3-turbo)
# or absolute path to a ggml .bin file
model = "small"

# Translate non-English speech to English
translate = false

# Number of CPU threads for inference (omit for auto-detection)
# threads = 4

[stt.sensevoice]
# Helper command implementing the sensevoice pipe protocol
command = "voxd-sense-worker"
model = "iic/SenseVoiceSmall"
device = "cuda:0"

[stt.cloud]
api_base = "https://api.openai.com/v1"
# api_key = "" (or set OPENAI_API_KEY)
model = "whisper-1"
timeout_secs = 30

[llm]
# Polish raw transcripts with an OpenAI-compatible chat model
enabled = false
model = "qwen2.5:3b-instruct"
api_base = "http://localhost:11434/v1"
# api_key = ""
# proxy = ""

# Route long transcripts to a different model
# long_model = "qwen2.5:7b-instruct"
long_threshold = 400

[daemon]
# Transcribe via the resident daemon when it is reachable
enabled = true

# Minutes of inactivity before the daemon unloads the model
idle_timeout = 10

[output]
# Output mode: "clipboard", "stdout", or "type"
mode = "clipboard"

# [commands]
# Voice commands: transcript matched against triggers before polish/output.
# Actions: "keys:<key combo>", "shell:<command>", "text:<literal>", joined by "|"
# enabled = true
# fuzzy_threshold = 0.0
# [commands.map]
# "send it" = "keys:Return"
# "undo that" = "keys:ctrl+z"
"#;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub stt: SttConfig,
    pub llm: LlmConfig,
    pub daemon: DaemonConfig,
    pub output: OutputConfig,
    pub commands: CommandsConfig,
}

/// Audio capture configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name, or "default"
    pub device: String,

    /// Sample rate in Hz (whisper expects 16000)
    pub sample_rate: u32,

    /// Fallback silence threshold when noise measurement fails
    pub silence_threshold: f32,

    /// Seconds of sustained silence (after speech) that stop the recording
    pub silence_duration: f32,

    /// Maximum recording duration in seconds (safety limit)
    pub max_duration_secs: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            sample_rate: 16000,
            silence_threshold: 0.15,
            silence_duration: 2.0,
            max_duration_secs: 120,
        }
    }
}

/// Speech-to-text configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SttConfig {
    /// Backend identifier: "whisper", "sensevoice" or "cloud"
    pub backend: String,

    /// Language code (en, zh, auto, ...)
    pub language: String,

    pub whisper: WhisperConfig,
    pub sensevoice: SenseVoiceConfig,
    pub cloud: CloudConfig,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            backend: "whisper".to_string(),
            language: "auto".to_string(),
            whisper: WhisperConfig::default(),
            sensevoice: SenseVoiceConfig::default(),
            cloud: CloudConfig::default(),
        }
    }
}

/// Local whisper.cpp backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WhisperConfig {
    /// Model name (tiny, base, small, ...) or absolute path to a .bin file
    pub model: String,

    /// Translate to English if source language is not English
    pub translate: bool,

    /// Number of threads for inference (None = auto-detect)
    pub threads: Option<usize>,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model: "small".to_string(),
            translate: false,
            threads: None,
        }
    }
}

/// SenseVoice helper-process backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SenseVoiceConfig {
    /// Helper command implementing the pipe protocol
    pub command: String,
    pub model: String,
    pub device: String,
}

impl Default for SenseVoiceConfig {
    fn default() -> Self {
        Self {
            command: "voxd-sense-worker".to_string(),
            model: "iic/SenseVoiceSmall".to_string(),
            device: "cuda:0".to_string(),
        }
    }
}

/// Cloud transcription backend configuration (OpenAI-compatible)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CloudConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "whisper-1".to_string(),
            timeout_secs: 30,
        }
    }
}

/// LLM polish configuration (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub model: String,
    pub api_base: String,
    pub api_key: String,
    pub proxy: String,

    /// Optional model used for transcripts longer than `long_threshold` chars
    pub long_model: Option<String>,
    pub long_threshold: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "qwen2.5:3b-instruct".to_string(),
            api_base: "http://localhost:11434/v1".to_string(),
            api_key: String::new(),
            proxy: String::new(),
            long_model: None,
            long_threshold: 400,
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Prefer the resident daemon for transcription when reachable
    pub enabled: bool,

    /// Minutes of inactivity before the loaded model is released
    pub idle_timeout: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_timeout: 10,
        }
    }
}

/// Text output configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub mode: OutputMode,
}

/// Voice command configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub enabled: bool,

    /// Similarity threshold (0..1) for fuzzy matching; 0 = exact only
    pub fuzzy_threshold: f64,

    /// Trigger phrase -> action string
    pub map: HashMap<String, String>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fuzzy_threshold: 0.0,
            map: HashMap::new(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "voxd")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the runtime directory for ephemeral files (socket)
    pub fn runtime_dir() -> PathBuf {
        std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
            .join("voxd")
    }

    /// Get the data directory path (history, daemon log)
    pub fn data_dir() -> PathBuf {
        directories::ProjectDirs::from("", "", "voxd")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Idle timeout as a duration (configured in minutes)
    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.daemon.idle_timeout * 60)
    }
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(path: Option<&Path>) -> Result<Config, VoxdError> {
    let mut config = Config::default();

    let config_path = path.map(PathBuf::from).or_else(Config::default_path);

    if let Some(ref path) = config_path {
        if path.exists() {
            tracing::debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)
                .map_err(|e| VoxdError::Config(format!("Failed to read config: {}", e)))?;

            config = toml::from_str(&contents)
                .map_err(|e| VoxdError::Config(format!("Invalid config: {}", e)))?;
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
        }
    }

    // Override from environment variables
    if let Ok(backend) = std::env::var("VOXD_STT_BACKEND") {
        config.stt.backend = backend;
    }
    if let Ok(model) = std::env::var("VOXD_WHISPER_MODEL") {
        config.stt.whisper.model = model;
    }
    if let Ok(mode) = std::env::var("VOXD_OUTPUT_MODE") {
        config.output.mode = match mode.to_lowercase().as_str() {
            "stdout" => OutputMode::Stdout,
            "type" => OutputMode::Type,
            _ => OutputMode::Clipboard,
        };
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.stt.backend, "whisper");
        assert_eq!(config.stt.language, "auto");
        assert_eq!(config.daemon.idle_timeout, 10);
        assert!(config.daemon.enabled);
        assert!(!config.llm.enabled);
        assert_eq!(config.output.mode, OutputMode::Clipboard);
        assert!(!config.commands.enabled);
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
            [audio]
            device = "pipewire"
            sample_rate = 16000
            silence_duration = 1.5

            [stt]
            backend = "cloud"
            language = "en"

            [stt.cloud]
            api_base = "http://gpu-box:8080/v1"
            model = "whisper-large"

            [daemon]
            idle_timeout = 30

            [output]
            mode = "type"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.audio.device, "pipewire");
        assert_eq!(config.audio.silence_duration, 1.5);
        assert_eq!(config.stt.backend, "cloud");
        assert_eq!(config.stt.cloud.api_base, "http://gpu-box:8080/v1");
        assert_eq!(config.stt.cloud.model, "whisper-large");
        assert_eq!(config.daemon.idle_timeout, 30);
        assert_eq!(config.output.mode, OutputMode::Type);
        // Untouched sections fall back to defaults
        assert_eq!(config.stt.whisper.model, "small");
        assert_eq!(config.audio.max_duration_secs, 120);
    }

    #[test]
    fn test_parse_commands_section() {
        let toml_str = r#"
            [commands]
            enabled = true
            fuzzy_threshold = 0.7

            [commands.map]
            "send it" = "keys:Return"
            "sign off" = "text:Best regards"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.commands.enabled);
        assert_eq!(config.commands.fuzzy_threshold, 0.7);
        assert_eq!(
            config.commands.map.get("send it").map(String::as_str),
            Some("keys:Return")
        );
    }

    #[test]
    fn test_default_config_template_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.stt.backend, "whisper");
        assert_eq!(config.llm.long_threshold, 400);
    }

    #[test]
    fn test_idle_timeout_minutes_to_duration() {
        let mut config = Config::default();
        config.daemon.idle_timeout = 2;
        assert_eq!(config.idle_timeout(), std::time::Duration::from_secs(120));
    }
}
