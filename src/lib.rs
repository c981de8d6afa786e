//! Voxd: voice dictation for Linux with a resident speech-to-text daemon
//!
//! This library provides the core functionality for:
//! - Capturing microphone audio via cpal with ambient-noise-calibrated
//!   silence detection
//! - Transcribing speech through pluggable engines (local whisper.cpp,
//!   a SenseVoice helper process, or an OpenAI-compatible cloud API)
//! - A resident daemon that keeps the model loaded, serves framed requests
//!   over a per-user Unix socket and unloads the model after an idle period
//! - Optional LLM polishing of raw transcripts
//! - Emitting results to the clipboard, stdout or simulated typing
//!
//! # Architecture
//!
//! ```text
//!   voxd record ──▶ audio capture ──▶ transcription ──▶ polish ──▶ output
//!                                        │
//!                          daemon reachable? ──yes──▶ Unix socket ──▶ resident engine
//!                                        │
//!                                        no──▶ in-process engine (one-shot load)
//! ```

pub mod audio;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod history;
pub mod output;
pub mod polish;
pub mod stt;

pub use config::Config;
pub use daemon::{DaemonClient, DaemonServer};
pub use error::{Result, VoxdError};
