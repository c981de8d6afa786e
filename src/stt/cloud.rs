//! Remote speech-to-text transcription via OpenAI-compatible API
//!
//! Sends WAV-encoded audio to `/v1/audio/transcriptions` on an
//! OpenAI-compatible endpoint (OpenAI, whisper.cpp server, vLLM, ...).
//! Stateless: unload is a no-op.

use super::SttEngine;
use crate::config::{CloudConfig, SttConfig};
use crate::error::SttError;
use std::io::Cursor;
use std::time::Duration;

/// Cloud engine using an OpenAI-compatible transcription endpoint
#[derive(Debug)]
pub struct CloudEngine {
    api_base: String,
    model: String,
    language: String,
    api_key: String,
    timeout: Duration,
}

impl CloudEngine {
    pub fn new(config: &SttConfig) -> Result<Self, SttError> {
        let cc: &CloudConfig = &config.cloud;

        if !cc.api_base.starts_with("http://") && !cc.api_base.starts_with("https://") {
            return Err(SttError::ConfigError(format!(
                "stt.cloud.api_base must start with http:// or https://, got: {}",
                cc.api_base
            )));
        }

        let api_key = if cc.api_key.is_empty() {
            std::env::var("OPENAI_API_KEY").unwrap_or_default()
        } else {
            cc.api_key.clone()
        };
        if api_key.is_empty() {
            return Err(SttError::ConfigError(
                "cloud backend requires stt.cloud.api_key or OPENAI_API_KEY".to_string(),
            ));
        }

        Ok(Self {
            api_base: cc.api_base.trim_end_matches('/').to_string(),
            model: cc.model.clone(),
            language: config.language.clone(),
            api_key,
            timeout: Duration::from_secs(cc.timeout_secs),
        })
    }

    /// Build the multipart form body for the API request
    fn build_multipart_body(&self, wav_data: &[u8]) -> (String, Vec<u8>) {
        let boundary = format!(
            "----VoxdBoundary{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        );

        let mut body = Vec::new();

        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"file\"; filename=\"audio.wav\"\r\n",
        );
        body.extend_from_slice(b"Content-Type: audio/wav\r\n\r\n");
        body.extend_from_slice(wav_data);
        body.extend_from_slice(b"\r\n");

        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"model\"\r\n\r\n");
        body.extend_from_slice(self.model.as_bytes());
        body.extend_from_slice(b"\r\n");

        if self.language != "auto" {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            body.extend_from_slice(
                b"Content-Disposition: form-data; name=\"language\"\r\n\r\n",
            );
            body.extend_from_slice(self.language.as_bytes());
            body.extend_from_slice(b"\r\n");
        }

        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"response_format\"\r\n\r\n",
        );
        body.extend_from_slice(b"json\r\n");

        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

        (boundary, body)
    }
}

impl SttEngine for CloudEngine {
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, SttError> {
        if samples.is_empty() {
            return Err(SttError::AudioFormat("Empty audio buffer".into()));
        }

        let duration_secs = samples.len() as f32 / sample_rate as f32;
        tracing::debug!(
            "Sending {:.2}s of audio to {} ({} samples)",
            duration_secs,
            self.api_base,
            samples.len()
        );

        let start = std::time::Instant::now();

        let wav_data = encode_wav(samples, sample_rate)?;
        let (boundary, body) = self.build_multipart_body(&wav_data);

        let url = format!("{}/audio/transcriptions", self.api_base);

        let response = ureq::post(&url)
            .timeout(self.timeout)
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_bytes(&body)
            .map_err(|e| match e {
                ureq::Error::Status(code, resp) => {
                    let body = resp.into_string().unwrap_or_default();
                    SttError::RemoteError(format!("Server returned {}: {}", code, body))
                }
                ureq::Error::Transport(t) => {
                    SttError::NetworkError(format!("Request failed: {}", t))
                }
            })?;

        let json: serde_json::Value = response
            .into_json()
            .map_err(|e| SttError::RemoteError(format!("Failed to parse response: {}", e)))?;

        let text = json
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                SttError::RemoteError(format!("Response missing 'text' field: {}", json))
            })?
            .trim()
            .to_string();

        tracing::info!(
            "Remote transcription completed in {:.2}s",
            start.elapsed().as_secs_f32()
        );

        Ok(text)
    }

    fn unload(&self) {
        // Nothing resident.
    }
}

/// Encode f32 samples as 16-bit PCM WAV
fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, SttError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut buffer = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut buffer, spec)
        .map_err(|e| SttError::AudioFormat(format!("Failed to create WAV writer: {}", e)))?;

    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let scaled = (clamped * i16::MAX as f32) as i16;
        writer
            .write_sample(scaled)
            .map_err(|e| SttError::AudioFormat(format!("Failed to write sample: {}", e)))?;
    }

    writer
        .finalize()
        .map_err(|e| SttError::AudioFormat(format!("Failed to finalize WAV: {}", e)))?;

    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(api_base: &str) -> SttConfig {
        let mut config = SttConfig::default();
        config.cloud.api_base = api_base.to_string();
        config.cloud.api_key = "sk-test".to_string();
        config
    }

    #[test]
    fn test_rejects_non_http_endpoint() {
        let err = CloudEngine::new(&test_config("gpu-box:8080")).unwrap_err();
        assert!(matches!(err, SttError::ConfigError(_)));
    }

    #[test]
    fn test_trailing_slash_is_normalized() {
        let engine = CloudEngine::new(&test_config("http://localhost:8080/v1/")).unwrap();
        assert_eq!(engine.api_base, "http://localhost:8080/v1");
    }

    #[test]
    fn test_encode_wav_is_parseable() {
        let samples = vec![0.0f32, 0.5, -0.5, 1.0, -1.0];
        let wav = encode_wav(&samples, 16000).unwrap();

        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), samples.len() as u32);
    }

    #[test]
    fn test_multipart_body_contains_fields() {
        let engine = CloudEngine::new(&test_config("http://localhost:8080/v1")).unwrap();
        let (boundary, body) = engine.build_multipart_body(b"RIFFdata");
        let body_str = String::from_utf8_lossy(&body);

        assert!(body_str.contains(&boundary));
        assert!(body_str.contains("name=\"file\""));
        assert!(body_str.contains("name=\"model\""));
        assert!(body_str.contains("whisper-1"));
        assert!(body_str.ends_with(&format!("--{}--\r\n", boundary)));
    }

    #[test]
    fn test_auto_language_omits_language_field() {
        let engine = CloudEngine::new(&test_config("http://localhost:8080/v1")).unwrap();
        let (_, body) = engine.build_multipart_body(b"RIFF");
        assert!(!String::from_utf8_lossy(&body).contains("name=\"language\""));
    }
}
