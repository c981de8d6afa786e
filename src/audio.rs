//! Microphone recording with silence detection
//!
//! Uses cpal for cross-platform audio input (PipeWire, PulseAudio, ALSA).
//! The first ~0.5s of the stream measures the ambient noise floor; after
//! that, recording continues until the user presses Enter or sustained
//! silence follows detected speech. A max-duration limit acts as a safety
//! net.

use crate::config::AudioConfig;
use crate::error::AudioError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Ambient noise is measured over this many seconds at the start
const NOISE_MEASURE_SECS: f32 = 0.5;

/// Threshold = noise floor * this factor
const NOISE_MULTIPLIER: f32 = 1.5;

/// Silence gate: tracks speech/silence over the sample stream and decides
/// when the recording should stop.
struct SilenceGate {
    threshold: f32,
    max_silent_samples: usize,
    silent_samples: usize,
    has_speech: bool,
}

impl SilenceGate {
    fn new(threshold: f32, max_silent_samples: usize) -> Self {
        Self {
            threshold,
            max_silent_samples,
            silent_samples: 0,
            has_speech: false,
        }
    }

    /// Feed one chunk of samples; returns true when the recording should stop
    fn feed(&mut self, chunk: &[f32]) -> bool {
        if chunk.is_empty() {
            return false;
        }
        let volume = chunk.iter().map(|s| s.abs()).sum::<f32>() / chunk.len() as f32;
        if volume < self.threshold {
            self.silent_samples += chunk.len();
            self.has_speech && self.silent_samples >= self.max_silent_samples
        } else {
            self.silent_samples = 0;
            self.has_speech = true;
            false
        }
    }
}

/// State shared with the audio callback
struct CaptureState {
    /// Samples collected during the noise-measurement window
    noise_samples: Vec<f32>,
    /// Recorded samples (post-measurement)
    samples: Vec<f32>,
    /// Created once the noise floor is known
    gate: Option<SilenceGate>,
}

/// Record from the microphone until Enter, silence timeout or max duration.
///
/// Returns mono f32 samples at `config.sample_rate`. Blocking; run under
/// `spawn_blocking` from async contexts.
pub fn record(config: &AudioConfig) -> Result<Vec<f32>, AudioError> {
    let host = cpal::default_host();
    let device = if config.device == "default" {
        host.default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("default".to_string()))?
    } else {
        find_input_device(&host, &config.device)?
    };

    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
    tracing::info!("Recording from device: {}", device_name);

    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::Connection(e.to_string()))?;
    let source_rate = supported.sample_rate().0;
    let source_channels = supported.channels() as usize;
    let sample_format = supported.sample_format();
    let target_rate = config.sample_rate;

    tracing::debug!(
        "Device config: {} Hz, {} channel(s), format: {:?}",
        source_rate,
        source_channels,
        sample_format
    );

    let stream_config = cpal::StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let noise_len = (NOISE_MEASURE_SECS * target_rate as f32) as usize;
    let max_silent = (config.silence_duration * target_rate as f32) as usize;
    let fallback_threshold = config.silence_threshold;

    let state = Arc::new(Mutex::new(CaptureState {
        noise_samples: Vec::with_capacity(noise_len),
        samples: Vec::new(),
        gate: None,
    }));
    let stop = Arc::new(AtomicBool::new(false));

    let err_fn = |err| tracing::error!("Audio stream error: {}", err);

    let params = StreamParams {
        state: Arc::clone(&state),
        stop: Arc::clone(&stop),
        source_rate,
        target_rate,
        source_channels,
        noise_len,
        max_silent,
        fallback_threshold,
    };

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, params, err_fn),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, params, err_fn),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, params, err_fn),
        format => {
            return Err(AudioError::StreamError(format!(
                "Unsupported sample format: {:?}",
                format
            )))
        }
    }?;

    stream
        .play()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    // Enter stops the recording early.
    let stop_for_stdin = Arc::clone(&stop);
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        stop_for_stdin.store(true, Ordering::SeqCst);
    });

    eprintln!("  Recording... (press Enter to stop, or pause to auto-stop)");

    let max_duration = Duration::from_secs(config.max_duration_secs as u64);
    let started = Instant::now();
    while !stop.load(Ordering::SeqCst) {
        if started.elapsed() > max_duration {
            tracing::warn!(
                "Recording limit reached ({}s), stopping",
                config.max_duration_secs
            );
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    drop(stream);

    let state = state.lock().unwrap();
    tracing::info!(
        "Recording stopped: {} samples ({:.1}s)",
        state.samples.len(),
        state.samples.len() as f32 / target_rate as f32
    );

    Ok(state.samples.clone())
}

struct StreamParams {
    state: Arc<Mutex<CaptureState>>,
    stop: Arc<AtomicBool>,
    source_rate: u32,
    target_rate: u32,
    source_channels: usize,
    noise_len: usize,
    max_silent: usize,
    fallback_threshold: f32,
}

/// Build an input stream for a specific sample type
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    params: StreamParams,
    err_fn: impl Fn(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let StreamParams {
        state,
        stop,
        source_rate,
        target_rate,
        source_channels,
        noise_len,
        max_silent,
        fallback_threshold,
    } = params;

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Convert to f32 and mix to mono
                let mono: Vec<f32> = data
                    .chunks(source_channels)
                    .map(|frame| {
                        let sum: f32 = frame
                            .iter()
                            .map(|&s| <f32 as cpal::FromSample<T>>::from_sample_(s))
                            .sum();
                        sum / source_channels as f32
                    })
                    .collect();

                let chunk = if source_rate != target_rate {
                    resample(&mono, source_rate, target_rate)
                } else {
                    mono
                };

                let mut state = match state.lock() {
                    Ok(state) => state,
                    Err(_) => return,
                };

                if state.gate.is_none() {
                    // Still measuring the ambient noise floor.
                    state.noise_samples.extend_from_slice(&chunk);
                    if state.noise_samples.len() >= noise_len {
                        let noise = state.noise_samples.iter().map(|s| s.abs()).sum::<f32>()
                            / state.noise_samples.len() as f32;
                        let threshold = if noise > 0.0 {
                            noise * NOISE_MULTIPLIER
                        } else {
                            fallback_threshold
                        };
                        tracing::debug!(
                            "Noise floor: {:.4}, silence threshold: {:.4}",
                            noise,
                            threshold
                        );
                        state.gate = Some(SilenceGate::new(threshold, max_silent));
                    }
                    return;
                }

                state.samples.extend_from_slice(&chunk);
                if let Some(gate) = state.gate.as_mut() {
                    if gate.feed(&chunk) {
                        stop.store(true, Ordering::SeqCst);
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    Ok(stream)
}

/// Find an input device by name (exact, then case-insensitive substring)
fn find_input_device(host: &cpal::Host, name: &str) -> Result<cpal::Device, AudioError> {
    let devices: Vec<cpal::Device> = host
        .input_devices()
        .map_err(|e| AudioError::Connection(e.to_string()))?
        .collect();

    let search = name.to_lowercase();
    for device in devices {
        if let Ok(device_name) = device.name() {
            if device_name == name || device_name.to_lowercase().contains(&search) {
                return Ok(device);
            }
        }
    }
    Err(AudioError::DeviceNotFound(name.to_string()))
}

/// List audio input devices, marking the system default
pub fn list_devices() -> Result<String, AudioError> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok());

    let mut lines = Vec::new();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::Connection(e.to_string()))?;
    for (i, device) in devices.enumerate() {
        if let Ok(name) = device.name() {
            let marker = if Some(&name) == default_name.as_ref() {
                " *"
            } else {
                ""
            };
            lines.push(format!("  [{}] {}{}", i, name, marker));
        }
    }

    if lines.is_empty() {
        return Ok("No audio input devices found".to_string());
    }
    Ok(format!(
        "Audio input devices:\n{}\n\n  * = system default",
        lines.join("\n")
    ))
}

/// Linear interpolation resampling
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx = src_idx.floor() as usize;
        let frac = (src_idx - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else {
            samples.get(idx).copied().unwrap_or(0.0)
        };

        output.push(sample);
    }

    output
}

/// Load a WAV file as mono f32 at the requested rate
pub fn load_wav(path: &std::path::Path, target_rate: u32) -> Result<Vec<f32>, AudioError> {
    let reader =
        hound::WavReader::open(path).map_err(|e| AudioError::FileError(e.to_string()))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .filter_map(|s| s.ok())
                .map(|s| s as f32 / max_val)
                .collect()
        }
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .filter_map(|s| s.ok())
            .collect(),
    };

    let mono: Vec<f32> = if spec.channels > 1 {
        samples
            .chunks(spec.channels as usize)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    } else {
        samples
    };

    Ok(resample(&mono, spec.sample_rate, target_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_same_rate() {
        let samples = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn test_resample_downsample() {
        let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let result = resample(&samples, 48000, 16000);
        // 3:1 ratio, so 8 samples -> ~3 samples
        assert!(result.len() >= 2 && result.len() <= 4);
    }

    #[test]
    fn test_resample_upsample() {
        let samples = vec![1.0, 2.0];
        assert_eq!(resample(&samples, 8000, 16000).len(), 4);
    }

    #[test]
    fn test_resample_empty() {
        assert!(resample(&[], 48000, 16000).is_empty());
    }

    #[test]
    fn test_gate_ignores_silence_before_speech() {
        let mut gate = SilenceGate::new(0.1, 100);
        let silence = vec![0.0f32; 500];
        // No speech yet, so silence never stops the recording.
        assert!(!gate.feed(&silence));
        assert!(!gate.feed(&silence));
    }

    #[test]
    fn test_gate_stops_after_speech_then_silence() {
        let mut gate = SilenceGate::new(0.1, 100);
        let speech = vec![0.5f32; 50];
        let silence = vec![0.0f32; 60];

        assert!(!gate.feed(&speech));
        assert!(!gate.feed(&silence)); // 60 silent samples, below 100
        assert!(gate.feed(&silence)); // 120 silent samples, stop
    }

    #[test]
    fn test_gate_speech_resets_silence_counter() {
        let mut gate = SilenceGate::new(0.1, 100);
        let speech = vec![0.5f32; 50];
        let silence = vec![0.0f32; 60];

        assert!(!gate.feed(&speech));
        assert!(!gate.feed(&silence));
        assert!(!gate.feed(&speech)); // counter resets
        assert!(!gate.feed(&silence));
        assert!(gate.feed(&silence));
    }

    #[test]
    fn test_load_wav_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..160 {
            let sample = ((i as f32 / 160.0) * 2.0 - 1.0) * 0.5;
            writer
                .write_sample((sample * i16::MAX as f32) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();

        let samples = load_wav(&path, 16000).unwrap();
        assert_eq!(samples.len(), 160);
        assert!(samples.iter().all(|s| s.abs() <= 0.51));
    }
}
