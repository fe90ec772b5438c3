//! Live Audio Streamer
//!
//! Registers a topic with the control plane, captures the input device and
//! pipes mono s16le PCM into an encoder that sends RTP to the ingest port.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rtp_ingest_streamer::{
    audio::{list_input_devices, CaptureSource, CaptureStopper, DeviceCapture, RawPcmFileSource},
    config::{Overrides, StreamerConfig},
    constants::MIN_SAMPLE_RATE,
    encoder::{EncoderInvocation, EncoderLauncher, ProcessLauncher},
    error::ConfigError,
    exit_codes,
    network::registration::RegistrationClient,
    pipeline::{Lifecycle, PipelineState, StreamingSession},
    protocol::{MediaKind, StreamRegistration},
    Error,
};

#[derive(Parser, Debug)]
#[command(name = "streamer", version, about = "Stream live audio to an RTP ingest endpoint")]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print available input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Input device name
    #[arg(short, long)]
    device: Option<String>,

    /// Topic to register
    #[arg(short, long)]
    topic: Option<String>,

    /// Control plane base URL
    #[arg(long)]
    server_url: Option<String>,

    #[arg(long, env = "STREAMER_DEVICE_ID")]
    device_id: Option<String>,

    #[arg(long, env = "STREAMER_DEVICE_TOKEN", hide_env_values = true)]
    device_token: Option<String>,

    /// Stream a raw mono s16le file instead of a capture device
    #[arg(long, requires = "sample_rate")]
    pcm_file: Option<PathBuf>,

    /// Sample rate of --pcm-file
    #[arg(long, value_parser = clap::value_parser!(u32).range(MIN_SAMPLE_RATE as i64..))]
    sample_rate: Option<u32>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            server_url: self.server_url.clone(),
            device_id: self.device_id.clone(),
            device_token: self.device_token.clone(),
            topic: self.topic.clone(),
            media_kind: None,
            capture_device: self.device.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(Args::parse()).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{:#}", e);
            let code = e
                .downcast_ref::<Error>()
                .map(Error::exit_code)
                .unwrap_or(exit_codes::RUNTIME);
            ExitCode::from(code)
        }
    }
}

async fn run(args: Args) -> Result<u8> {
    if args.list_devices {
        print_devices();
        return Ok(exit_codes::CLEAN);
    }

    let mut config = StreamerConfig::load(args.config.as_deref()).map_err(Error::from)?;
    config.apply(args.overrides());
    config.validate().map_err(Error::from)?;
    if config.stream.media_kind != MediaKind::Audio {
        return Err(Error::from(ConfigError::Invalid {
            field: "stream.media_kind",
            reason: "live capture only carries audio; use `playback` for video files".into(),
        })
        .into());
    }

    tracing::info!("Starting live audio streamer");

    let mut lifecycle = Lifecycle::new();
    lifecycle
        .advance(PipelineState::Registering)
        .context("Lifecycle out of order")?;

    let registration = match register(&config).await {
        Ok(registration) => registration,
        Err(e) => {
            lifecycle.fail();
            return Err(e);
        }
    };

    match &args.pcm_file {
        Some(path) => {
            // `requires` guarantees the rate is present
            let sample_rate = args.sample_rate.unwrap_or_default();
            let source = RawPcmFileSource::open(path, sample_rate)
                .map_err(Error::from)
                .with_context(|| format!("Failed to open {}", path.display()));
            let source = fail_on_err(&mut lifecycle, source)?;
            tracing::info!("Streaming raw PCM from {}", path.display());
            let stopper = source.stopper();
            stream(lifecycle, &config, registration, source, stopper, true).await
        }
        None => {
            let source = DeviceCapture::open(config.capture.device.as_deref()).map_err(Error::from);
            let source = fail_on_err(&mut lifecycle, source)?;
            tracing::info!("Capturing from {}", source.device_name());
            let stopper = source.stopper();
            stream(lifecycle, &config, registration, source, stopper, false).await
        }
    }
}

async fn register(config: &StreamerConfig) -> Result<StreamRegistration> {
    let client = RegistrationClient::from_config(&config.control).map_err(Error::from)?;
    tracing::info!(
        "Registering topic '{}' with {}",
        config.stream.topic,
        client.url()
    );
    let registration = client
        .register(&config.stream.topic, MediaKind::Audio)
        .await
        .map_err(Error::from)?;
    tracing::info!(
        "Registered: ssrc={} rtp_port={}",
        registration.ssrc,
        registration.rtp_port
    );
    Ok(registration)
}

/// Spawn the encoder and drive the session until it ends
async fn stream<S>(
    mut lifecycle: Lifecycle,
    config: &StreamerConfig,
    registration: StreamRegistration,
    mut source: S,
    stopper: CaptureStopper,
    realtime: bool,
) -> Result<u8>
where
    S: CaptureSource + Send + 'static,
{
    let invocation =
        EncoderInvocation::for_capture(&config.encoder, registration, source.format(), realtime);
    tracing::info!(
        "Encoder: {} -> {}",
        invocation.program,
        invocation.destination
    );

    let launcher = ProcessLauncher::new(Duration::from_millis(config.encoder.shutdown_grace_ms));
    let encoder = match launcher.spawn(&invocation) {
        Ok(encoder) => encoder,
        Err(e) => {
            source.close();
            lifecycle.fail();
            return Err(Error::from(e).into());
        }
    };

    let session = StreamingSession::with_lifecycle(lifecycle, source, encoder)
        .context("Lifecycle out of order")?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping");
            stopper.stop();
        }
    });

    let report = tokio::task::spawn_blocking(move || session.run())
        .await
        .context("Streaming thread panicked")?;

    tracing::info!(
        "Session ended: {:?} ({} frames written, {} skipped)",
        report.end,
        report.stats.frames_written,
        report.stats.frames_skipped
    );
    Ok(report.exit_code())
}

fn fail_on_err<T>(lifecycle: &mut Lifecycle, result: Result<T, impl Into<anyhow::Error>>) -> Result<T> {
    result.map_err(|e| {
        lifecycle.fail();
        e.into()
    })
}

fn print_devices() {
    println!("\n=== Available Input Devices ===");
    let devices = list_input_devices();
    if devices.is_empty() {
        println!("  (none)");
    }
    for device in &devices {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}", device.name, default_marker);
        if let Some(rate) = device.sample_rate {
            println!("    Sample rate: {} Hz", rate);
        }
        if let Some(channels) = device.channels {
            println!("    Channels: {}", channels);
        }
    }
    println!();
}
