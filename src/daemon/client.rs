//! Client helper for the transcription daemon
//!
//! Thin wrapper used by the CLI commands as an alternative to loading the
//! engine in-process. Control commands use a short timeout; transcription uses
//! a long one to tolerate first-load model warmup. Callers are expected to
//! treat an unreachable daemon as routine and fall back to direct
//! transcription.

use crate::daemon::protocol::{self, RequestHeader, Response};
use crate::error::DaemonError;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

/// Timeout for control commands (ping/status/shutdown)
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for transcription jobs; generous because the first request may
/// also pay the model load cost
const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for the resident transcription daemon
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self {
            socket_path: protocol::socket_path(),
        }
    }
}

impl DaemonClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Send one control command and read the response
    pub async fn send_command(&self, cmd: &str) -> Result<Response, DaemonError> {
        let socket_path = self.socket_path.clone();
        let cmd = cmd.to_string();

        tokio::time::timeout(CONTROL_TIMEOUT, async move {
            let mut stream = UnixStream::connect(&socket_path)
                .await
                .map_err(|e| DaemonError::Unreachable(e.to_string()))?;

            protocol::write_json(&mut stream, &RequestHeader::command(cmd)).await?;
            // Half-close the write side so the server sees end-of-request.
            stream.shutdown().await?;

            protocol::read_json::<_, Response>(&mut stream).await
        })
        .await
        .map_err(|_| DaemonError::Unreachable("control command timed out".to_string()))?
    }

    /// Check whether the daemon is reachable
    pub async fn ping(&self) -> bool {
        matches!(self.send_command("ping").await, Ok(resp) if resp.ok)
    }

    /// Fetch daemon status, or None when it is not running
    pub async fn status(&self) -> Option<Response> {
        self.send_command("status").await.ok()
    }

    /// Ask the daemon to shut down; true when it acknowledged
    pub async fn shutdown(&self) -> bool {
        matches!(self.send_command("shutdown").await, Ok(resp) if resp.ok)
    }

    /// Transcribe audio via the daemon.
    ///
    /// Returns the server-reported error message when the daemon answers
    /// `{ok: false}`.
    pub async fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<String, DaemonError> {
        let socket_path = self.socket_path.clone();
        let audio_bytes = protocol::samples_to_bytes(samples);

        let response = tokio::time::timeout(TRANSCRIBE_TIMEOUT, async move {
            let mut stream = UnixStream::connect(&socket_path)
                .await
                .map_err(|e| DaemonError::Unreachable(e.to_string()))?;

            protocol::write_json(&mut stream, &RequestHeader::transcribe(sample_rate)).await?;
            protocol::write_raw(&mut stream, &audio_bytes).await?;
            // End-of-audio is signalled by closing the write side.
            stream.shutdown().await?;

            protocol::read_json::<_, Response>(&mut stream).await
        })
        .await
        .map_err(|_| DaemonError::Unreachable("transcription timed out".to_string()))??;

        if !response.ok {
            return Err(DaemonError::Remote(
                response.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(response.text.unwrap_or_default())
    }
}
