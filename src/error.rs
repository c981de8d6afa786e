//! Error types for voxd
//!
//! Uses thiserror for ergonomic error definitions with clear messages
//! that guide users toward fixing common issues.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the voxd application
#[derive(Error, Debug)]
pub enum VoxdError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Audio capture error: {0}")]
    Audio(#[from] AudioError),

    #[error("Transcription error: {0}")]
    Stt(#[from] SttError),

    #[error("Daemon error: {0}")]
    Daemon(#[from] DaemonError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Text polish error: {0}")]
    Polish(#[from] PolishError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to audio capture
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio connection failed: {0}")]
    Connection(String),

    #[error("Audio device not found: '{0}'. List devices with: voxd devices")]
    DeviceNotFound(String),

    #[error("No audio was captured. Check your microphone.")]
    EmptyRecording,

    #[error("Audio stream error: {0}")]
    StreamError(String),

    #[error("Audio file error: {0}")]
    FileError(String),
}

/// Errors related to speech-to-text transcription
#[derive(Error, Debug)]
pub enum SttError {
    #[error("Unknown STT backend: '{0}'. Valid backends: whisper, sensevoice, cloud")]
    UnknownBackend(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Engine initialization failed: {0}")]
    InitFailed(String),

    #[error("Transcription failed: {0}")]
    InferenceFailed(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Remote server error: {0}")]
    RemoteError(String),
}

/// Errors related to the transcription daemon and its wire protocol
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("A daemon is already running ({0})")]
    AlreadyRunning(PathBuf),

    #[error("Peer closed the connection before the full frame arrived")]
    TruncatedMessage,

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Daemon unreachable: {0}")]
    Unreachable(String),

    #[error("Daemon reported an error: {0}")]
    Remote(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to text output
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("'{tool}' not found in PATH. Install {package} via your package manager.")]
    ToolNotFound {
        tool: &'static str,
        package: &'static str,
    },

    #[error("{0} exited with error: {1}")]
    CommandFailed(&'static str, String),

    #[error("Output write failed: {0}")]
    WriteFailed(String),
}

/// Errors related to LLM text polishing
#[derive(Error, Debug)]
pub enum PolishError {
    #[error("LLM request failed: {0}")]
    Network(String),

    #[error("LLM API error: {0}")]
    Api(String),
}

/// Result type alias using VoxdError
pub type Result<T> = std::result::Result<T, VoxdError>;
