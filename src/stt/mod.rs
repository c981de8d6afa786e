//! Speech-to-text transcription module
//!
//! Provides transcription via:
//! - Local whisper.cpp inference (whisper-rs crate)
//! - Local SenseVoice inference through a persistent helper process
//! - Remote OpenAI-compatible transcription API

pub mod cloud;
pub mod sense;
pub mod whisper;

use crate::config::SttConfig;
use crate::error::SttError;
use std::sync::Arc;

/// Trait for speech-to-text implementations.
///
/// Engines lazy-load their model on the first `transcribe` call and must be
/// safely callable again after `unload` (the model re-initializes).
pub trait SttEngine: Send + Sync + std::fmt::Debug {
    /// Transcribe mono f32 audio samples to text
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, SttError>;

    /// Release the loaded model and any accelerator memory. No-op when
    /// nothing is loaded.
    fn unload(&self);
}

/// Factory function to create an engine for the configured backend
pub fn create_engine(config: &SttConfig) -> Result<Arc<dyn SttEngine>, SttError> {
    let backend = config.backend.to_lowercase();
    tracing::info!("Creating STT engine: backend={}", backend);

    match backend.as_str() {
        "whisper" => Ok(Arc::new(whisper::WhisperEngine::new(config)?)),
        "sensevoice" => Ok(Arc::new(sense::SenseVoiceEngine::new(config)?)),
        "cloud" => Ok(Arc::new(cloud::CloudEngine::new(config)?)),
        other => Err(SttError::UnknownBackend(other.to_string())),
    }
}
