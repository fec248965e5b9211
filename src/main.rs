use anyhow::{Context, Result};
use callstream::audio::{CaptureDevice, FileCaptureDevice, PlaybackDevice, WavFilePlaybackDevice};
use callstream::{
    create_router, AppState, Config, ConnectionState, ControllerHandle, HttpAssociator,
    StreamController, WebSocketTransport,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "callstream", version, about = "Real-time audio streaming for the call console")]
struct Cli {
    /// Config file, extension optional
    #[arg(short, long, default_value = "config/callstream")]
    config: String,

    /// Stream this audio file instead of the microphone
    #[arg(long, global = true)]
    input: Option<PathBuf>,

    /// Save responses as WAV files here instead of playing them
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,
    /// Connect right away and stream until Ctrl-C
    Call,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("callstream v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Media stream origin: {}{}", cfg.stream.origin, cfg.stream.path);

    let mut controller = StreamController::new(
        cfg.stream_config(),
        capture_device(cli.input.as_deref())?,
        Box::new(WebSocketTransport::new()),
        playback_device(cli.output_dir.as_deref()),
    );

    if cfg.stream.knowledge_base_id.is_some() {
        let associator = HttpAssociator::new(cfg.api_base())?;
        controller = controller.with_associator(Arc::new(associator));
    }

    let handle = controller.spawn();
    tokio::spawn(handle.clone().release_on_error());

    match cli.command {
        Command::Serve => serve(&cfg, handle).await,
        Command::Call => call(handle).await,
    }
}

async fn serve(cfg: &Config, handle: ControllerHandle) -> Result<()> {
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Control API listening on {}", addr);

    axum::serve(listener, create_router(AppState::new(handle.clone())))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    handle.disconnect().await?;
    Ok(())
}

async fn call(handle: ControllerHandle) -> Result<()> {
    if let Err(e) = handle.connect().await {
        if let Err(release) = handle.disconnect().await {
            warn!("Release after failed connect did not complete: {}", release);
        }
        return Err(e).context("Failed to connect");
    }

    let status = handle.current_status();
    info!(
        "Call running on stream {}, press Ctrl-C to hang up",
        status.stream_id.unwrap_or_default()
    );

    let mut updates = handle.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Hanging up");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                if updates.borrow_and_update().state == ConnectionState::Disconnected {
                    info!("Call ended by peer");
                    break;
                }
            }
        }
    }

    handle.disconnect().await?;
    Ok(())
}

fn capture_device(input: Option<&Path>) -> Result<Box<dyn CaptureDevice>> {
    match input {
        Some(path) => Ok(Box::new(FileCaptureDevice::new(path))),
        None => default_capture_device(),
    }
}

fn playback_device(output_dir: Option<&Path>) -> Box<dyn PlaybackDevice> {
    match output_dir {
        Some(dir) => Box::new(WavFilePlaybackDevice::new(dir)),
        None => default_playback_device(),
    }
}

#[cfg(feature = "cpal")]
fn default_capture_device() -> Result<Box<dyn CaptureDevice>> {
    Ok(Box::new(callstream::audio::CpalCaptureDevice::new()))
}

#[cfg(not(feature = "cpal"))]
fn default_capture_device() -> Result<Box<dyn CaptureDevice>> {
    anyhow::bail!("No microphone support in this build: pass --input <file> or enable the `cpal` feature")
}

#[cfg(feature = "cpal")]
fn default_playback_device() -> Box<dyn PlaybackDevice> {
    Box::new(callstream::audio::CpalPlaybackDevice::new())
}

#[cfg(not(feature = "cpal"))]
fn default_playback_device() -> Box<dyn PlaybackDevice> {
    Box::new(WavFilePlaybackDevice::new("responses"))
}
