//! Wire protocol for the transcription daemon
//!
//! Every message is a frame: 4-byte big-endian length prefix followed by a
//! UTF-8 JSON payload. A transcription request appends raw little-endian f32
//! mono PCM after its header frame; the client signals end-of-audio by
//! closing its write side.

use crate::config::Config;
use crate::error::DaemonError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame; headers and responses are tiny,
/// this guards against garbage length prefixes.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Well-known socket path for the current user's daemon
pub fn socket_path() -> PathBuf {
    Config::runtime_dir().join("stt.sock")
}

/// Request header sent by clients.
///
/// `cmd` selects a control command (`ping`, `status`, `shutdown`); when absent
/// the request is a transcription job and `sample_rate` describes the PCM
/// payload that follows (defaulting to 16000 when omitted).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestHeader {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

impl RequestHeader {
    pub fn command(cmd: impl Into<String>) -> Self {
        Self {
            cmd: Some(cmd.into()),
            sample_rate: None,
        }
    }

    pub fn transcribe(sample_rate: u32) -> Self {
        Self {
            cmd: None,
            sample_rate: Some(sample_rate),
        }
    }
}

/// Response sent by the daemon. Unset fields are omitted from the JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_loaded: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_seconds: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

impl Response {
    pub fn pong() -> Self {
        Self {
            ok: true,
            msg: Some("pong".to_string()),
            ..Default::default()
        }
    }

    pub fn status(model_loaded: bool, idle_seconds: f64, backend: &str) -> Self {
        Self {
            ok: true,
            model_loaded: Some(model_loaded),
            // One decimal place, matching what `daemon status` displays
            idle_seconds: Some((idle_seconds * 10.0).round() / 10.0),
            backend: Some(backend.to_string()),
            ..Default::default()
        }
    }

    pub fn shutting_down() -> Self {
        Self {
            ok: true,
            msg: Some("shutting down".to_string()),
            ..Default::default()
        }
    }

    pub fn text(text: String) -> Self {
        Self {
            ok: true,
            text: Some(text),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Write one length-prefixed frame
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), DaemonError>
where
    W: AsyncWrite + Unpin,
{
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Write unframed bytes (the PCM payload of a transcription request)
pub async fn write_raw<W>(writer: &mut W, bytes: &[u8]) -> Result<(), DaemonError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame, looping until the declared length is
/// satisfied. Peer close before that is a `TruncatedMessage` error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, DaemonError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    read_exact_or_truncated(reader, &mut len_buf).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(DaemonError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    read_exact_or_truncated(reader, &mut payload).await?;
    Ok(payload)
}

async fn read_exact_or_truncated<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), DaemonError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(DaemonError::TruncatedMessage)
        }
        Err(e) => Err(e.into()),
    }
}

/// Serialize and write a JSON message as one frame
pub async fn write_json<W, T>(writer: &mut W, value: &T) -> Result<(), DaemonError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload =
        serde_json::to_vec(value).map_err(|e| DaemonError::Protocol(e.to_string()))?;
    write_frame(writer, &payload).await
}

/// Read one frame and deserialize it as JSON
pub async fn read_json<R, T>(reader: &mut R) -> Result<T, DaemonError>
where
    R: AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let payload = read_frame(reader).await?;
    serde_json::from_slice(&payload).map_err(|e| DaemonError::Protocol(e.to_string()))
}

/// Encode f32 samples as little-endian bytes for the wire
pub fn samples_to_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Decode little-endian bytes back into f32 samples.
/// A trailing partial sample (fewer than 4 bytes) is discarded.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let payload = b"hello frames".to_vec();
        write_frame(&mut client, &payload).await.unwrap();

        let received = read_frame(&mut server).await.unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_header_round_trip_exact() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let header = RequestHeader::transcribe(44100);
        write_json(&mut client, &header).await.unwrap();

        let received: RequestHeader = read_json(&mut server).await.unwrap();
        assert_eq!(received.sample_rate, Some(44100));
        assert!(received.cmd.is_none());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        // Declare 100 bytes but deliver only 3, then close the write side.
        client.write_all(&100u32.to_be_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, DaemonError::TruncatedMessage));
    }

    #[tokio::test]
    async fn test_clean_eof_before_any_frame() {
        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, DaemonError::TruncatedMessage));
    }

    #[test]
    fn test_pcm_codec_round_trip() {
        let samples = vec![0.0f32, 1.0, -1.0, 0.5, -0.25, f32::MIN_POSITIVE];
        let bytes = samples_to_bytes(&samples);
        assert_eq!(bytes.len(), samples.len() * 4);
        assert_eq!(bytes_to_samples(&bytes), samples);
    }

    #[test]
    fn test_pcm_decode_discards_partial_tail() {
        let mut bytes = samples_to_bytes(&[1.0f32, 2.0]);
        bytes.extend_from_slice(&[0x01, 0x02]);
        assert_eq!(bytes_to_samples(&bytes), vec![1.0, 2.0]);
    }

    #[test]
    fn test_response_json_omits_unset_fields() {
        let json = serde_json::to_string(&Response::pong()).unwrap();
        assert_eq!(json, r#"{"ok":true,"msg":"pong"}"#);

        let json = serde_json::to_string(&Response::error("no audio received")).unwrap();
        assert_eq!(json, r#"{"ok":false,"error":"no audio received"}"#);
    }

    #[test]
    fn test_status_response_shape() {
        let resp = Response::status(false, 0.04, "whisper");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["model_loaded"], false);
        assert_eq!(json["idle_seconds"], 0.0);
        assert_eq!(json["backend"], "whisper");
        assert!(json.get("text").is_none());
    }

    #[test]
    fn test_header_tolerates_unknown_fields() {
        let header: RequestHeader =
            serde_json::from_str(r#"{"cmd":"ping","future_field":42}"#).unwrap();
        assert_eq!(header.cmd.as_deref(), Some("ping"));
    }

    #[test]
    fn test_socket_path_under_runtime_dir() {
        let path = socket_path();
        assert!(path.ends_with("voxd/stt.sock"));
    }
}
