use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use vitals_capture::capture::{list_cameras, FfmpegCamera};
use vitals_capture::config::CaptureConfig;
use vitals_capture::history::{HistoryClient, HistoryRange};
use vitals_capture::recorder::{CaptureController, SessionSettings, SessionState};
use vitals_capture::upload::HttpPredictionClient;

#[derive(Parser)]
#[command(name = "vitals-capture")]
#[command(about = "Record a short facial video and estimate blood pressure")]
#[command(version)]
struct Cli {
    /// Config file (default: ./vitals-capture.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record once and print the prediction as JSON
    Measure,

    /// Print stored readings as JSON
    History {
        /// 1day, 7days, 1month or 3months
        #[arg(short, long, default_value_t = HistoryRange::default())]
        range: HistoryRange,
    },

    /// Check that the prediction service is up
    Health,

    /// List available cameras
    Cameras,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vitals_capture::init_tracing();

    let cli = Cli::parse();
    let config = CaptureConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Measure => measure(&config).await,
        Commands::History { range } => history(&config, range).await,
        Commands::Health => health(&config).await,
        Commands::Cameras => {
            for camera in list_cameras() {
                println!("{}\t{}", camera.id, camera.name);
            }
            Ok(())
        }
    }
}

async fn measure(config: &CaptureConfig) -> anyhow::Result<()> {
    let camera = FfmpegCamera::new(&config.camera.input_format, &config.camera.device)
        .with_rear_device(config.camera.rear_device.clone())
        .with_ffmpeg(&config.camera.ffmpeg)
        .with_fragment_bytes(config.camera.fragment_bytes);
    let service = HttpPredictionClient::new(&config.service)?;

    let mut controller = CaptureController::new(
        Arc::new(camera),
        Arc::new(service),
        SessionSettings::from(config),
    );
    let handle = controller.handle();
    let mut updates = handle.subscribe();

    let printer = tokio::spawn(async move {
        let mut last_state = None;
        loop {
            let snapshot = match updates.recv().await {
                Ok(snapshot) => snapshot,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if snapshot.state == SessionState::Recording {
                eprintln!("Recording... {}s", snapshot.countdown_seconds);
            } else if last_state != Some(snapshot.state) {
                eprintln!("{}", snapshot.status_text);
            }
            if snapshot.state.is_terminal() {
                break;
            }
            last_state = Some(snapshot.state);
        }
    });

    handle.start();
    controller.settle_in(SessionState::Recording).await;
    if controller.state() == SessionState::Recording {
        tracing::info!(
            "Recording for {}s from {}",
            config.countdown_seconds,
            config.camera.device
        );
    }
    controller.settle().await;
    let _ = printer.await;

    let snapshot = handle.snapshot();
    match snapshot.state {
        SessionState::Results => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        _ => match snapshot.error {
            Some(error) => bail!("{} ({})", error.message, error.detail),
            None => bail!("session ended in {:?}", snapshot.state),
        },
    }
}

async fn history(config: &CaptureConfig, range: HistoryRange) -> anyhow::Result<()> {
    let client = HistoryClient::new(&config.service)?;
    let readings = client.fetch(range).await?;
    println!("{}", serde_json::to_string_pretty(&readings)?);
    Ok(())
}

async fn health(config: &CaptureConfig) -> anyhow::Result<()> {
    let client = HttpPredictionClient::new(&config.service)?;
    if client.health().await? {
        println!("healthy");
        Ok(())
    } else {
        bail!("prediction service at {} is not healthy", config.service.base_url)
    }
}
