//! Command-line entry point.
//!
//! Runs one configured experiment against the simulated camera backend and
//! reports progress on the terminal. Useful for exercising the pipeline
//! end-to-end without hardware attached.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vlips_capture::camera::mock::MockCamera;
use vlips_capture::camera::Camera;
use vlips_capture::config::Settings;
use vlips_capture::experiment::{self, Experiment, ExperimentEvent};
use vlips_capture::storage::ImageSaver;

#[derive(Parser, Debug)]
#[command(name = "vlips-capture", version, about = "Still-image sampling pipeline")]
struct Cli {
    /// Path to a TOML settings file.
    #[arg(long)]
    config: Option<String>,

    /// Override the configured sample count.
    #[arg(long)]
    samples: Option<u32>,

    /// List attached cameras and exit.
    #[arg(long)]
    list_cameras: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::new(cli.config.as_deref())?;
    if let Some(samples) = cli.samples {
        settings.capture.samples = samples;
    }
    settings.validate()?;

    let mut camera = Camera::new(Box::new(MockCamera::simulated()));

    if cli.list_cameras {
        for features in camera.inventory() {
            println!(
                "camera {}: level {:?}, facing {:?}",
                features.id, features.hardware_level, features.lens_facing
            );
        }
        return Ok(());
    }

    tracing::info!(
        started_at = %chrono::Utc::now().format("%Y-%m-%d_%H-%M-%S"),
        tag = %settings.capture.tag,
        kind = ?settings.capture.experiment,
        output = %settings.session_folder().display(),
        "sampling session starting"
    );

    camera.open().await?;
    camera.start_preview().await?;

    let (saver, saver_task) = ImageSaver::spawn();
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let experiment = Experiment::new(&settings, event_tx);

    let finish_alert = settings.capture.finish_alert;
    let total = settings.capture.samples;
    let infinite = settings.capture.infinite;
    let display = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                ExperimentEvent::IterationComplete(iteration) => {
                    if infinite {
                        tracing::info!(progress = iteration + 1, "iteration complete");
                    } else {
                        tracing::info!(progress = %format!("{}/{}", iteration + 1, total), "iteration complete");
                    }
                }
                ExperimentEvent::ExperimentComplete => {
                    if finish_alert {
                        tracing::warn!("experiment complete");
                    } else {
                        tracing::info!("experiment complete");
                    }
                }
            }
        }
    });

    let handle = experiment::spawn(experiment, camera, saver.clone());
    let outcome = handle.join().await;

    saver.flush().await?;
    drop(saver);
    let _ = saver_task.await;
    let _ = display.await;

    outcome?;
    Ok(())
}
