//! Media File Playback
//!
//! Registers a topic (or targets a fixed port) and has the encoder read a
//! media file at its native rate and send it as RTP.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rtp_ingest_streamer::{
    config::{Overrides, StreamerConfig},
    encoder::{EncoderInvocation, EncoderLauncher, ProcessLauncher, StreamTarget},
    error::ConfigError,
    exit_codes,
    network::registration::RegistrationClient,
    pipeline::{run_playback, Lifecycle, PipelineState},
    protocol::{MediaKind, RegisterRequest},
    Error,
};

const STOP_POLL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "playback", version, about = "Stream a media file to an RTP ingest endpoint")]
struct Args {
    /// Media file to stream
    #[arg(short, long)]
    media: PathBuf,

    /// Which track of the file to send
    #[arg(short, long)]
    kind: Option<MediaKind>,

    /// Register without a media type
    #[arg(long)]
    untyped: bool,

    /// Skip registration and send to this `host:port`
    #[arg(long, conflicts_with = "untyped")]
    destination: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

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
    let mut config = StreamerConfig::load(args.config.as_deref()).map_err(Error::from)?;
    config.apply(Overrides {
        server_url: args.server_url.clone(),
        device_id: args.device_id.clone(),
        device_token: args.device_token.clone(),
        topic: args.topic.clone(),
        media_kind: args.kind,
        capture_device: None,
    });

    let static_port = match &args.destination {
        Some(destination) => {
            let (host, port) = parse_destination(destination).map_err(Error::from)?;
            config.encoder.rtp_host = host;
            config.validate_encoder().map_err(Error::from)?;
            Some(port)
        }
        None => {
            config.validate().map_err(Error::from)?;
            None
        }
    };

    if !args.media.is_file() {
        return Err(Error::from(ConfigError::Invalid {
            field: "media",
            reason: format!("{} is not a readable file", args.media.display()),
        })
        .into());
    }

    let kind = config.stream.media_kind;
    tracing::info!("Starting {} playback of {}", kind, args.media.display());

    let mut lifecycle = Lifecycle::new();
    lifecycle
        .advance(PipelineState::Registering)
        .context("Lifecycle out of order")?;

    let target = match static_port {
        Some(port) => {
            tracing::info!(
                "Skipping registration, sending to {}:{}",
                config.encoder.rtp_host,
                port
            );
            StreamTarget::unregistered(port)
        }
        None => match register(&config, kind, args.untyped).await {
            Ok(target) => target,
            Err(e) => {
                lifecycle.fail();
                return Err(e);
            }
        },
    };

    let invocation = EncoderInvocation::for_media_file(&config.encoder, kind, &args.media, target);
    tracing::info!(
        "Encoder: {} -> {}",
        invocation.program,
        invocation.destination
    );

    let launcher = ProcessLauncher::new(Duration::from_millis(config.encoder.shutdown_grace_ms));
    let encoder = match launcher.spawn(&invocation) {
        Ok(encoder) => encoder,
        Err(e) => {
            lifecycle.fail();
            return Err(Error::from(e).into());
        }
    };
    lifecycle
        .advance(PipelineState::Capturing)
        .context("Lifecycle out of order")?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_on_signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping");
            stop_on_signal.store(true, Ordering::SeqCst);
        }
    });

    let report = tokio::task::spawn_blocking(move || run_playback(encoder, &stop, STOP_POLL))
        .await
        .context("Playback thread panicked")?;

    let _ = lifecycle.advance(PipelineState::Terminating);
    let _ = lifecycle.advance(PipelineState::Closed);

    tracing::info!("Playback ended: {:?}", report.end);
    Ok(report.exit_code())
}

/// Split `host:port`, keeping IPv6 brackets intact
fn parse_destination(value: &str) -> Result<(String, u16), ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        field: "destination",
        reason: format!("`{value}`: {reason}"),
    };
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| invalid("expected host:port"))?;
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    let port = port
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| invalid("port must be 1-65535"))?;
    Ok((host.to_string(), port))
}

async fn register(config: &StreamerConfig, kind: MediaKind, untyped: bool) -> Result<StreamTarget> {
    let client = RegistrationClient::from_config(&config.control).map_err(Error::from)?;
    let request = if untyped {
        RegisterRequest::untyped(&config.stream.topic)
    } else {
        RegisterRequest::new(&config.stream.topic, kind)
    };
    tracing::info!(
        "Registering topic '{}' with {}",
        request.topic,
        client.url()
    );

    let registration = client.send(&request).await.map_err(Error::from)?;
    tracing::info!(
        "Registered: ssrc={} rtp_port={}",
        registration.ssrc,
        registration.rtp_port
    );
    Ok(registration.into())
}
