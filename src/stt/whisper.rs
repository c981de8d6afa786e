//! Whisper-based speech-to-text transcription
//!
//! Uses whisper.cpp via the whisper-rs crate for fast, local transcription.
//! The model is loaded lazily on the first transcribe call and dropped on
//! unload; a later call loads it again.

use super::SttEngine;
use crate::audio;
use crate::config::{Config, SttConfig, WhisperConfig};
use crate::error::SttError;
use std::path::PathBuf;
use std::sync::Mutex;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

/// Sample rate whisper.cpp expects
const WHISPER_SAMPLE_RATE: u32 = 16000;

/// Whisper-based engine
#[derive(Debug)]
pub struct WhisperEngine {
    /// Lazily loaded whisper context (holds the model)
    ctx: Mutex<Option<WhisperContext>>,
    model: String,
    language: String,
    translate: bool,
    threads: usize,
}

impl WhisperEngine {
    pub fn new(config: &SttConfig) -> Result<Self, SttError> {
        let wc: &WhisperConfig = &config.whisper;
        // Resolve eagerly so a missing model is reported at construction,
        // not on the first request.
        resolve_model_path(&wc.model)?;

        let threads = wc.threads.unwrap_or_else(|| num_cpus::get().min(4));

        Ok(Self {
            ctx: Mutex::new(None),
            model: wc.model.clone(),
            language: config.language.clone(),
            translate: wc.translate,
            threads,
        })
    }

    /// Load the model if it is not resident yet
    fn load(
        &self,
        guard: &mut Option<WhisperContext>,
    ) -> Result<(), SttError> {
        if guard.is_some() {
            return Ok(());
        }

        let model_path = resolve_model_path(&self.model)?;
        tracing::info!("Loading whisper model from {:?}", model_path);
        let start = std::time::Instant::now();

        let ctx = WhisperContext::new_with_params(
            model_path
                .to_str()
                .ok_or_else(|| SttError::ModelNotFound("Invalid path".to_string()))?,
            WhisperContextParameters::default(),
        )
        .map_err(|e| SttError::InitFailed(e.to_string()))?;

        tracing::info!("Model loaded in {:.2}s", start.elapsed().as_secs_f32());
        *guard = Some(ctx);
        Ok(())
    }
}

impl SttEngine for WhisperEngine {
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, SttError> {
        if samples.is_empty() {
            return Err(SttError::AudioFormat("Empty audio buffer".to_string()));
        }

        let resampled;
        let samples = if sample_rate != WHISPER_SAMPLE_RATE {
            resampled = audio::resample(samples, sample_rate, WHISPER_SAMPLE_RATE);
            &resampled[..]
        } else {
            samples
        };

        let duration_secs = samples.len() as f32 / WHISPER_SAMPLE_RATE as f32;
        tracing::debug!(
            "Transcribing {:.2}s of audio ({} samples)",
            duration_secs,
            samples.len()
        );

        let mut guard = self.ctx.lock().unwrap();
        self.load(&mut *guard)?;
        let ctx = match guard.as_ref() {
            Some(ctx) => ctx,
            None => return Err(SttError::InitFailed("model load failed".to_string())),
        };

        let start = std::time::Instant::now();

        let mut state = ctx
            .create_state()
            .map_err(|e| SttError::InferenceFailed(e.to_string()))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

        if self.language == "auto" {
            params.set_language(None);
        } else {
            params.set_language(Some(&self.language));
        }

        params.set_translate(self.translate);
        params.set_n_threads(self.threads as i32);

        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        params.set_suppress_blank(true);
        params.set_suppress_nst(true);

        // For short recordings, use single segment mode
        if duration_secs < 30.0 {
            params.set_single_segment(true);
        }

        state
            .full(params, samples)
            .map_err(|e| SttError::InferenceFailed(e.to_string()))?;

        let mut text = String::new();
        for segment in state.as_iter() {
            text.push_str(
                segment
                    .to_str()
                    .map_err(|e| SttError::InferenceFailed(e.to_string()))?,
            );
        }

        let result = text.trim().to_string();
        tracing::info!(
            "Transcription completed in {:.2}s ({} chars)",
            start.elapsed().as_secs_f32(),
            result.chars().count()
        );

        Ok(result)
    }

    fn unload(&self) {
        let mut guard = self.ctx.lock().unwrap();
        if guard.take().is_some() {
            tracing::info!("Whisper model released");
        }
    }
}

/// Resolve model name to file path
fn resolve_model_path(model: &str) -> Result<PathBuf, SttError> {
    // If it's already an absolute path, use it directly
    let path = PathBuf::from(model);
    if path.is_absolute() && path.exists() {
        return Ok(path);
    }

    let model_filename = match model {
        "tiny" => "ggml-tiny.bin",
        "tiny.en" => "ggml-tiny.en.bin",
        "base" => "ggml-base.bin",
        "base.en" => "ggml-base.en.bin",
        "small" => "ggml-small.bin",
        "small.en" => "ggml-small.en.bin",
        "medium" => "ggml-medium.bin",
        "medium.en" => "ggml-medium.en.bin",
        "large" | "large-v1" => "ggml-large-v1.bin",
        "large-v2" => "ggml-large-v2.bin",
        "large-v3" => "ggml-large-v3.bin",
        "large-v3-turbo" => "ggml-large-v3-turbo.bin",
        other if other.ends_with(".bin") => other,
        other => {
            return Err(SttError::ModelNotFound(format!(
                "Unknown model: '{}'. Valid models: tiny, base, small, medium, large-v3, large-v3-turbo",
                other
            )));
        }
    };

    let models_dir = Config::data_dir().join("models");
    let model_path = models_dir.join(model_filename);
    if model_path.exists() {
        return Ok(model_path);
    }

    // Also check the current directory and ./models/
    let cwd_path = PathBuf::from(model_filename);
    if cwd_path.exists() {
        return Ok(cwd_path);
    }
    let local_models_path = PathBuf::from("models").join(model_filename);
    if local_models_path.exists() {
        return Ok(local_models_path);
    }

    Err(SttError::ModelNotFound(format!(
        "Model '{}' not found. Looked in:\n  - {}\n  - {}\n  - {}\n\nDownload from: https://huggingface.co/ggerganov/whisper.cpp/tree/main",
        model,
        model_path.display(),
        cwd_path.display(),
        local_models_path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_name_is_rejected() {
        let err = resolve_model_path("humongous").unwrap_err();
        assert!(matches!(err, SttError::ModelNotFound(_)));
    }

    #[test]
    fn test_missing_model_reports_search_paths() {
        let err = resolve_model_path("tiny").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("ggml-tiny.bin"));
        assert!(msg.contains("huggingface.co"));
    }
}
