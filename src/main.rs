//! Voxd - voice dictation for Linux
//!
//! Run `voxd record` (or plain `voxd`) to dictate once.
//! Run `voxd daemon start` to keep the model resident between dictations.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing_subscriber::EnvFilter;

use voxd::config::{self, Config};
use voxd::daemon::{DaemonClient, DaemonServer};
use voxd::output::OutputMode;
use voxd::{audio, commands, history, output, polish, stt};

#[derive(Parser)]
#[command(name = "voxd")]
#[command(author, version, about = "Voice dictation with a resident speech-to-text daemon")]
#[command(long_about = "
Voxd records from the microphone, transcribes with a pluggable STT backend
(local whisper.cpp, SenseVoice, or a cloud API), optionally polishes the
transcript with an LLM, and emits the result to the clipboard, stdout, or
the focused window.

Start the daemon (`voxd daemon start`) to keep the model loaded in memory;
`voxd record` then transcribes through it and falls back to a one-shot
in-process engine when the daemon is not running.
")]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record, transcribe, polish and output (default)
    Record {
        /// Skip LLM polishing, output the raw transcript
        #[arg(long)]
        raw: bool,

        /// Output mode: clipboard, stdout or type
        #[arg(short, long, value_name = "MODE")]
        output: Option<String>,
    },

    /// Transcribe a WAV file and print the text
    Transcribe {
        /// Path to audio file
        file: PathBuf,
    },

    /// List audio input devices
    Devices,

    /// Show current configuration
    Config,

    /// Manage the resident transcription daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the daemon (keeps the STT model resident)
    Start {
        /// Run in the foreground (suitable for systemd)
        #[arg(short, long)]
        foreground: bool,
    },

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("voxd={},warn", log_level))),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = config::load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Record {
        raw: false,
        output: None,
    }) {
        Commands::Record { raw, output } => {
            run_record(&config, raw, output.as_deref()).await?;
        }

        Commands::Transcribe { file } => {
            run_transcribe_file(&config, &file).await?;
        }

        Commands::Devices => {
            println!("{}", audio::list_devices()?);
        }

        Commands::Config => {
            show_config(&config);
        }

        Commands::Daemon { action } => match action {
            DaemonAction::Start { foreground } => {
                if foreground {
                    DaemonServer::new(config).run().await?;
                } else {
                    spawn_daemon_background(cli.config.as_deref())?;
                }
            }
            DaemonAction::Stop => {
                if DaemonClient::default().shutdown().await {
                    println!("Daemon stopped");
                } else {
                    eprintln!("Daemon not running or unreachable");
                    std::process::exit(1);
                }
            }
            DaemonAction::Status => {
                run_daemon_status().await;
            }
        },
    }

    Ok(())
}

/// Record once: capture, transcribe, optionally polish, output
async fn run_record(
    config: &Config,
    raw: bool,
    output_override: Option<&str>,
) -> anyhow::Result<()> {
    let mode = match output_override {
        None => config.output.mode,
        Some("clipboard") => OutputMode::Clipboard,
        Some("stdout") => OutputMode::Stdout,
        Some("type") => OutputMode::Type,
        Some(other) => {
            anyhow::bail!("unknown output mode '{}' (clipboard, stdout, type)", other)
        }
    };

    let audio_config = config.audio.clone();
    let samples = tokio::task::spawn_blocking(move || audio::record(&audio_config)).await??;
    if samples.is_empty() {
        anyhow::bail!("no audio captured");
    }

    eprintln!("  Transcribing...");
    let text = transcribe_samples(config, samples).await?;
    let text = text.trim().to_string();
    if text.is_empty() {
        anyhow::bail!("no speech recognized");
    }
    eprintln!("  Transcript: {}", text);

    // Voice commands short-circuit polish and output.
    if config.commands.enabled {
        if let Some((trigger, action)) = commands::match_command(
            &text,
            &config.commands.map,
            config.commands.fuzzy_threshold,
        ) {
            eprintln!("  Voice command: {} -> {}", trigger, action);
            commands::run_action(action).await?;
            return Ok(());
        }
    }

    let final_text = if !raw && config.llm.enabled {
        eprintln!("  Polishing...");
        let llm_config = config.llm.clone();
        let raw_text = text.clone();
        let to_polish = text.clone();
        match tokio::task::spawn_blocking(move || polish::polish_text(&to_polish, &llm_config))
            .await?
        {
            Ok(polished) => {
                if let Err(e) = history::append(&history::history_path(), &raw_text, &polished)
                {
                    tracing::warn!("Failed to record history: {}", e);
                }
                polished
            }
            Err(e) => {
                tracing::warn!("Polish failed ({}), using raw transcript", e);
                text
            }
        }
    } else {
        text
    };

    output::emit(&final_text, mode).await?;
    Ok(())
}

/// Transcribe samples, preferring the daemon and falling back to a one-shot
/// in-process engine when it is unreachable.
async fn transcribe_samples(config: &Config, samples: Vec<f32>) -> anyhow::Result<String> {
    let sample_rate = config.audio.sample_rate;

    if config.daemon.enabled {
        match DaemonClient::default().transcribe(&samples, sample_rate).await {
            Ok(text) => return Ok(text),
            Err(e) => {
                tracing::warn!("Daemon unavailable ({}), transcribing in-process", e);
            }
        }
    }

    let engine = stt::create_engine(&config.stt)?;
    let text =
        tokio::task::spawn_blocking(move || engine.transcribe(&samples, sample_rate)).await??;
    Ok(text)
}

/// Transcribe a WAV file and print the result
async fn run_transcribe_file(config: &Config, path: &Path) -> anyhow::Result<()> {
    let samples = audio::load_wav(path, config.audio.sample_rate)?;
    if samples.is_empty() {
        anyhow::bail!("audio file contains no samples");
    }
    tracing::info!(
        "Transcribing {:.2}s of audio from {:?}",
        samples.len() as f32 / config.audio.sample_rate as f32,
        path
    );

    let text = transcribe_samples(config, samples).await?;
    println!("{}", text);
    Ok(())
}

/// Respawn ourselves detached as the daemon process
fn spawn_daemon_background(config_path: Option<&Path>) -> anyhow::Result<()> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe()?;
    let log_dir = Config::data_dir();
    std::fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join("daemon.log");
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let log_err = log.try_clone()?;

    let mut cmd = std::process::Command::new(exe);
    cmd.args(["daemon", "start", "--foreground"]);
    if let Some(path) = config_path {
        cmd.arg("--config").arg(path);
    }
    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .process_group(0)
        .spawn()?;

    println!("Daemon started (PID: {})", child.id());
    println!("Log: {}", log_path.display());
    Ok(())
}

/// Print daemon status, exiting non-zero when it is not running
async fn run_daemon_status() {
    match DaemonClient::default().status().await {
        Some(status) => {
            println!("Daemon running");
            println!("  STT backend: {}", status.backend.as_deref().unwrap_or("?"));
            let loaded = status.model_loaded.unwrap_or(false);
            println!(
                "  Model: {}",
                if loaded {
                    "loaded"
                } else {
                    "not loaded (idle unloaded)"
                }
            );
            println!("  Idle: {:.0} seconds", status.idle_seconds.unwrap_or(0.0));
        }
        None => {
            eprintln!("Daemon not running");
            std::process::exit(1);
        }
    }
}

/// Show current configuration
fn show_config(config: &Config) {
    println!(
        "Config file: {:?}",
        config::Config::default_path().unwrap_or_else(|| PathBuf::from("(unknown)"))
    );
    println!();

    println!("[audio]");
    println!("  device = {:?}", config.audio.device);
    println!("  sample_rate = {}", config.audio.sample_rate);
    println!("  silence_threshold = {}", config.audio.silence_threshold);
    println!("  silence_duration = {}", config.audio.silence_duration);
    println!("  max_duration_secs = {}", config.audio.max_duration_secs);

    println!("\n[stt]");
    println!("  backend = {:?}", config.stt.backend);
    println!("  language = {:?}", config.stt.language);
    match config.stt.backend.as_str() {
        "whisper" => {
            println!("  [stt.whisper]");
            println!("    model = {:?}", config.stt.whisper.model);
            println!("    translate = {}", config.stt.whisper.translate);
            if let Some(threads) = config.stt.whisper.threads {
                println!("    threads = {}", threads);
            }
        }
        "sensevoice" => {
            println!("  [stt.sensevoice]");
            println!("    command = {:?}", config.stt.sensevoice.command);
            println!("    model = {:?}", config.stt.sensevoice.model);
            println!("    device = {:?}", config.stt.sensevoice.device);
        }
        "cloud" => {
            println!("  [stt.cloud]");
            println!("    api_base = {:?}", config.stt.cloud.api_base);
            println!("    model = {:?}", config.stt.cloud.model);
            println!(
                "    api_key = {}",
                if config.stt.cloud.api_key.is_empty() {
                    "(not set)"
                } else {
                    "***"
                }
            );
        }
        _ => {}
    }

    println!("\n[llm]");
    println!("  enabled = {}", config.llm.enabled);
    println!("  model = {:?}", config.llm.model);
    println!("  api_base = {:?}", config.llm.api_base);
    println!(
        "  api_key = {}",
        if config.llm.api_key.is_empty() {
            "(not set)"
        } else {
            "***"
        }
    );
    if !config.llm.proxy.is_empty() {
        println!("  proxy = {:?}", config.llm.proxy);
    }
    if let Some(ref long_model) = config.llm.long_model {
        println!("  long_model = {:?}", long_model);
        println!("  long_threshold = {}", config.llm.long_threshold);
    }

    println!("\n[daemon]");
    println!("  enabled = {}", config.daemon.enabled);
    println!("  idle_timeout = {} minutes", config.daemon.idle_timeout);

    println!("\n[output]");
    println!("  mode = {:?}", config.output.mode);

    if config.commands.enabled {
        println!("\n[commands]");
        println!("  fuzzy_threshold = {}", config.commands.fuzzy_threshold);
        println!("  {} trigger(s) configured", config.commands.map.len());
    }
}
