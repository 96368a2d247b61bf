//! Process entry point: wires Settings → Decoder → Operator → Publisher
//! fan-out → Sinks and runs until the detector connection is closed.

use clap::Parser;
use mimalloc::MiMalloc;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use xps_pipeline::decoder::{Decoder, FrameSource, TcpFrameSource};
use xps_pipeline::operator::Operator;
use xps_pipeline::publisher::PublisherFanout;
use xps_pipeline::settings::Settings;
use xps_pipeline::sinks::websocket;
#[cfg(feature = "storage_hdf5")]
use xps_pipeline::sinks::archive;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "xps-pipeline", about = "Real-time XPS detector streaming pipeline")]
struct Cli {
    /// Path to a TOML settings file, layered under compiled-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override `Settings::log_level` regardless of the config file.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref().and_then(|p| p.to_str()))?;
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }
    xps_pipeline::tracing_init::init_from_settings(&settings)
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    info!(?settings.source, "starting xps-pipeline");

    let (decoder_tx, decoder_rx) = mpsc::channel(256);
    let (publish_tx, publish_rx) = mpsc::channel(settings.publisher.capacity);

    let mut fanout = PublisherFanout::new();
    let ws_queue = fanout.subscribe(settings.publisher.capacity);
    #[cfg(feature = "storage_hdf5")]
    let archive_queue = fanout.subscribe(settings.archive.queue_capacity);

    let operator = Operator::new(settings.processing.clone(), publish_tx);
    tokio::spawn(async move {
        if let Err(e) = operator.run(decoder_rx).await {
            error!(error = %e, "operator exited");
        }
    });
    tokio::spawn(fanout.run(publish_rx));

    let ws_bind: SocketAddr = format!("{}:{}", settings.websocket.bind_address, settings.websocket.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid websocket bind address: {e}"))?;
    tokio::spawn(async move {
        if let Err(e) = websocket::serve(ws_bind, ws_queue).await {
            error!(error = %e, "websocket sink exited");
        }
    });

    #[cfg(feature = "storage_hdf5")]
    {
        let root_path = PathBuf::from(settings.archive.root_path.clone());
        tokio::spawn(archive::run(root_path, archive_queue));
    }

    run_source(&settings, decoder_tx).await
}

/// Connects to the detector's framed byte source and feeds the decoder,
/// reconnecting with a short backoff if the connection drops.
async fn run_source(settings: &Settings, decoder_tx: mpsc::Sender<xps_pipeline::messages::Message>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", settings.source.address, settings.source.port);
    loop {
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                info!(%addr, "connected to detector source");
                let mut source = TcpFrameSource::new(stream);
                let mut decoder = Decoder::new();
                if let Err(e) = pump(&mut source, &mut decoder, &decoder_tx).await {
                    warn!(error = %e, "detector connection ended, reconnecting");
                }
            }
            Err(e) => {
                warn!(%addr, error = %e, "failed to connect to detector source, retrying");
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn pump(
    source: &mut impl FrameSource,
    decoder: &mut Decoder,
    decoder_tx: &mpsc::Sender<xps_pipeline::messages::Message>,
) -> std::io::Result<()> {
    while let Some(frame_bytes) = source.next_frame().await? {
        match decoder.accept(&frame_bytes) {
            Ok(Some(msg)) => {
                if decoder_tx.send(msg).await.is_err() {
                    warn!("operator inbox closed, stopping source pump");
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "skipping malformed frame"),
        }
    }
    Ok(())
}
