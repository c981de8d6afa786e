//! Resident transcription daemon
//!
//! Keeps an STT engine loaded in memory and serves framed requests from
//! short-lived client processes over a Unix domain socket. Connections are
//! handled one at a time; the idle supervisor is the only concurrent accessor
//! of the session state, and both sides go through one mutex. The lock guards
//! bookkeeping and the load/unload transitions, never the inference call
//! itself.

use crate::config::{Config, SttConfig};
use crate::daemon::protocol::{self, RequestHeader, Response};
use crate::error::{DaemonError, SttError};
use crate::stt::{self, SttEngine};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};

/// Bounded accept wait so the running flag is re-checked between accepts
const ACCEPT_POLL: Duration = Duration::from_secs(1);

/// Idle supervisor period
const SUPERVISOR_TICK: Duration = Duration::from_secs(30);

/// One short block of silence used to force deferred engine initialization
const WARMUP_SAMPLES: usize = 1600;

/// Constructor for the configured engine; swappable in tests
pub type EngineFactory =
    dyn Fn(&SttConfig) -> Result<Arc<dyn SttEngine>, SttError> + Send + Sync;

/// The daemon's single mutable record of engine and activity status
struct SessionState {
    engine: Option<Arc<dyn SttEngine>>,
    engine_loaded: bool,
    last_active: Instant,
    running: bool,
}

impl SessionState {
    fn new() -> Self {
        Self {
            engine: None,
            engine_loaded: false,
            last_active: Instant::now(),
            running: false,
        }
    }
}

/// Resident transcription daemon server
pub struct DaemonServer {
    config: Config,
    socket_path: PathBuf,
    idle_timeout: Duration,
    supervisor_tick: Duration,
    state: Arc<Mutex<SessionState>>,
    factory: Arc<EngineFactory>,
}

impl DaemonServer {
    /// Create a server with the default socket path and engine factory
    pub fn new(config: Config) -> Self {
        let factory: Arc<EngineFactory> = Arc::new(stt::create_engine);
        Self::build(config, factory)
    }

    /// Create a server with a custom engine factory (used by tests)
    pub fn with_engine_factory<F>(config: Config, factory: F) -> Self
    where
        F: Fn(&SttConfig) -> Result<Arc<dyn SttEngine>, SttError> + Send + Sync + 'static,
    {
        let factory: Arc<EngineFactory> = Arc::new(factory);
        Self::build(config, factory)
    }

    fn build(config: Config, factory: Arc<EngineFactory>) -> Self {
        let idle_timeout = config.idle_timeout();
        Self {
            config,
            socket_path: protocol::socket_path(),
            idle_timeout,
            supervisor_tick: SUPERVISOR_TICK,
            state: Arc::new(Mutex::new(SessionState::new())),
            factory,
        }
    }

    /// Override the socket path (used by tests)
    pub fn at_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Override the idle timeout (normally derived from the config)
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Override the supervisor tick period (used by tests)
    pub fn with_supervisor_tick(mut self, tick: Duration) -> Self {
        self.supervisor_tick = tick;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Flip the running flag; the accept loop exits at its next check
    fn stop(&self) {
        self.state.lock().unwrap().running = false;
    }

    /// Run the daemon until shutdown is requested
    pub async fn run(self) -> Result<(), DaemonError> {
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        reclaim_stale_socket(&self.socket_path).await?;

        let listener = UnixListener::bind(&self.socket_path)?;
        {
            let mut state = self.state.lock().unwrap();
            state.running = true;
            state.last_active = Instant::now();
        }

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let supervisor = self.spawn_idle_supervisor();

        tracing::info!("Daemon listening on {:?}", self.socket_path);
        tracing::info!("STT backend: {}", self.config.stt.backend);
        tracing::info!("Idle timeout: {} minutes", self.config.daemon.idle_timeout);

        loop {
            if !self.state.lock().unwrap().running {
                break;
            }

            tokio::select! {
                accepted = tokio::time::timeout(ACCEPT_POLL, listener.accept()) => {
                    match accepted {
                        Ok(Ok((stream, _addr))) => {
                            // One connection at a time; a request is handled to
                            // completion before the next accept.
                            if let Err(e) = self.handle_connection(stream).await {
                                tracing::warn!("Connection error: {}", e);
                            }
                        }
                        Ok(Err(e)) => {
                            tracing::error!("Accept error: {}", e);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                        // Poll expired with nothing to accept; loop re-checks
                        // the running flag.
                        Err(_) => {}
                    }
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, shutting down...");
                    self.stop();
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, shutting down...");
                    self.stop();
                }
            }
        }

        // Drain: close the listener, remove the socket file, release the model.
        drop(listener);
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove socket file: {}", e);
            }
        }
        let state = Arc::clone(&self.state);
        let _ = tokio::task::spawn_blocking(move || unload_engine(&state)).await;
        supervisor.abort();

        tracing::info!("Daemon stopped");
        Ok(())
    }

    /// Handle one client connection: one request frame, one response frame.
    async fn handle_connection(&self, mut stream: UnixStream) -> Result<(), DaemonError> {
        let header: RequestHeader = match protocol::read_json(&mut stream).await {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!("Malformed request header: {}", e);
                // Best effort; the peer may already be gone.
                let _ =
                    protocol::write_json(&mut stream, &Response::error(e.to_string())).await;
                return Ok(());
            }
        };

        match header.cmd.as_deref() {
            Some("ping") => protocol::write_json(&mut stream, &Response::pong()).await,
            Some("status") => {
                let (loaded, idle) = {
                    let state = self.state.lock().unwrap();
                    (state.engine_loaded, state.last_active.elapsed().as_secs_f64())
                };
                let response = Response::status(loaded, idle, &self.config.stt.backend);
                protocol::write_json(&mut stream, &response).await
            }
            Some("shutdown") => {
                let result =
                    protocol::write_json(&mut stream, &Response::shutting_down()).await;
                tracing::info!("Shutdown requested by client");
                self.stop();
                result
            }
            // Unknown commands degrade to the transcription path rather than
            // failing at the framing layer.
            _ => self.handle_transcription(stream, header).await,
        }
    }

    /// Transcription job: the PCM payload follows the header frame and ends
    /// when the client closes its write side.
    async fn handle_transcription(
        &self,
        mut stream: UnixStream,
        header: RequestHeader,
    ) -> Result<(), DaemonError> {
        let mut audio_bytes = Vec::new();
        stream.read_to_end(&mut audio_bytes).await?;

        let samples = protocol::bytes_to_samples(&audio_bytes);
        if samples.is_empty() {
            return protocol::write_json(&mut stream, &Response::error("no audio received"))
                .await;
        }

        let sample_rate = header.sample_rate.unwrap_or(16000);
        tracing::debug!(
            "Transcription job: {} samples at {} Hz ({:.2}s)",
            samples.len(),
            sample_rate,
            samples.len() as f32 / sample_rate as f32
        );

        let state = Arc::clone(&self.state);
        let factory = Arc::clone(&self.factory);
        let stt_config = self.config.stt.clone();
        let warmup_rate = self.config.audio.sample_rate;

        let result = tokio::task::spawn_blocking(move || {
            let engine = ensure_engine(&state, &*factory, &stt_config, warmup_rate)?;
            engine.transcribe(&samples, sample_rate)
        })
        .await;

        let response = match result {
            Ok(Ok(text)) => Response::text(text),
            Ok(Err(e)) => {
                tracing::error!("Transcription failed: {}", e);
                Response::error(e.to_string())
            }
            Err(e) => {
                tracing::error!("Transcription task failed: {}", e);
                Response::error(format!("internal error: {}", e))
            }
        };

        protocol::write_json(&mut stream, &response).await
    }

    /// Background task unloading the engine after the idle timeout
    fn spawn_idle_supervisor(&self) -> tokio::task::JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let idle_timeout = self.idle_timeout;
        let tick = self.supervisor_tick;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            // The first tick completes immediately; skip it.
            interval.tick().await;
            loop {
                interval.tick().await;

                let (running, loaded, idle) = {
                    let state = state.lock().unwrap();
                    (state.running, state.engine_loaded, state.last_active.elapsed())
                };
                if !running {
                    break;
                }
                if loaded && idle >= idle_timeout {
                    tracing::info!(
                        "Idle for {:.0}s, releasing the model",
                        idle.as_secs_f32()
                    );
                    let state = Arc::clone(&state);
                    let _ = tokio::task::spawn_blocking(move || unload_engine(&state)).await;
                }
            }
        })
    }
}

/// Ensure the engine exists and is warm; touches the activity clock.
///
/// Idempotent: the engine is constructed at most once and warmed at most once.
/// The warmup inference on a short block of silence forces any deferred model
/// initialization to happen here rather than on the first real request. If
/// construction or warmup fails the error surfaces to the caller and the next
/// request retries from whatever state was left behind.
fn ensure_engine(
    state: &Mutex<SessionState>,
    factory: &EngineFactory,
    stt_config: &SttConfig,
    warmup_rate: u32,
) -> Result<Arc<dyn SttEngine>, SttError> {
    let mut state = state.lock().unwrap();

    if state.engine.is_none() {
        state.engine = Some(factory(stt_config)?);
    }
    let engine = match state.engine.as_ref() {
        Some(engine) => Arc::clone(engine),
        None => return Err(SttError::InitFailed("engine construction failed".into())),
    };

    if !state.engine_loaded {
        tracing::info!("Loading STT model (warmup inference)...");
        let silence = vec![0.0f32; WARMUP_SAMPLES];
        engine.transcribe(&silence, warmup_rate)?;
        state.engine_loaded = true;
        tracing::info!("Model loaded");
    }

    state.last_active = Instant::now();
    Ok(engine)
}

/// Release the engine if it is loaded. Safe to call when already unloaded.
fn unload_engine(state: &Mutex<SessionState>) {
    let mut state = state.lock().unwrap();
    if state.engine_loaded {
        if let Some(engine) = state.engine.take() {
            engine.unload();
        }
        state.engine_loaded = false;
        tracing::info!("Model unloaded");
    }
}

/// Reclaim the well-known socket path at startup.
///
/// A reachable socket means another daemon is live: fatal. Connection refused
/// means a stale leftover from a crash: delete and proceed. The path vanishing
/// between check and connect is fine. Two daemons racing through this check
/// simultaneously is an accepted limitation for a single-user local utility.
async fn reclaim_stale_socket(path: &Path) -> Result<(), DaemonError> {
    if !path.exists() {
        return Ok(());
    }

    match UnixStream::connect(path).await {
        Ok(_) => Err(DaemonError::AlreadyRunning(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            tracing::warn!("Removing stale socket {:?}", path);
            std::fs::remove_file(path)?;
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct CountingEngine {
        transcriptions: AtomicUsize,
        unloads: AtomicUsize,
    }

    impl CountingEngine {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                transcriptions: AtomicUsize::new(0),
                unloads: AtomicUsize::new(0),
            })
        }
    }

    impl SttEngine for CountingEngine {
        fn transcribe(&self, _samples: &[f32], _sample_rate: u32) -> Result<String, SttError> {
            self.transcriptions.fetch_add(1, Ordering::SeqCst);
            Ok(String::new())
        }

        fn unload(&self) {
            self.unloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fresh_state() -> Mutex<SessionState> {
        Mutex::new(SessionState::new())
    }

    #[test]
    fn test_ensure_engine_constructs_and_warms_once() {
        let engine = CountingEngine::new();
        let constructed = Arc::new(AtomicUsize::new(0));
        let state = fresh_state();
        let stt_config = SttConfig::default();

        let engine_for_factory = Arc::clone(&engine);
        let constructed_in_factory = Arc::clone(&constructed);
        let factory = move |_: &SttConfig| {
            constructed_in_factory.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::clone(&engine_for_factory) as Arc<dyn SttEngine>)
        };

        ensure_engine(&state, &factory, &stt_config, 16000).unwrap();
        ensure_engine(&state, &factory, &stt_config, 16000).unwrap();

        // One construction, one warmup inference across both calls.
        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        assert_eq!(engine.transcriptions.load(Ordering::SeqCst), 1);
        assert!(state.lock().unwrap().engine_loaded);
    }

    #[test]
    fn test_ensure_engine_touches_activity_clock() {
        let engine = CountingEngine::new();
        let state = fresh_state();
        let before = state.lock().unwrap().last_active;
        std::thread::sleep(Duration::from_millis(5));

        let factory =
            move |_: &SttConfig| Ok(Arc::clone(&engine) as Arc<dyn SttEngine>);
        ensure_engine(&state, &factory, &SttConfig::default(), 16000).unwrap();

        assert!(state.lock().unwrap().last_active > before);
    }

    #[test]
    fn test_factory_failure_leaves_engine_unloaded_and_retries() {
        let state = fresh_state();
        let factory = |_: &SttConfig| -> Result<Arc<dyn SttEngine>, SttError> {
            Err(SttError::InitFailed("no model".into()))
        };

        assert!(ensure_engine(&state, &factory, &SttConfig::default(), 16000).is_err());
        assert!(!state.lock().unwrap().engine_loaded);

        // The next request retries the load from scratch.
        assert!(ensure_engine(&state, &factory, &SttConfig::default(), 16000).is_err());
    }

    #[test]
    fn test_unload_is_noop_when_nothing_loaded() {
        let state = fresh_state();
        unload_engine(&state);
        assert!(!state.lock().unwrap().engine_loaded);
    }

    #[test]
    fn test_unload_releases_loaded_engine() {
        let engine = CountingEngine::new();
        let state = fresh_state();
        {
            let mut s = state.lock().unwrap();
            s.engine = Some(Arc::clone(&engine) as Arc<dyn SttEngine>);
            s.engine_loaded = true;
        }

        unload_engine(&state);

        assert_eq!(engine.unloads.load(Ordering::SeqCst), 1);
        let s = state.lock().unwrap();
        assert!(!s.engine_loaded);
        assert!(s.engine.is_none());

        // Calling again is a no-op.
        drop(s);
        unload_engine(&state);
        assert_eq!(engine.unloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_idle_expiry_condition() {
        let state = fresh_state();
        {
            let mut s = state.lock().unwrap();
            s.engine_loaded = true;
            s.last_active = Instant::now();
        }
        let idle_timeout = Duration::from_millis(30);

        let idle = state.lock().unwrap().last_active.elapsed();
        assert!(idle < idle_timeout);

        std::thread::sleep(Duration::from_millis(40));
        let idle = state.lock().unwrap().last_active.elapsed();
        assert!(idle >= idle_timeout);
    }
}
