//! Buffer accounting under forced write failures.
//!
//! The device hands out a bounded pool of image buffers; a frame that is
//! never released starves acquisition. These tests force every persistence
//! write to fail and check that the acquire/release counts still balance.

use std::path::Path;
use tempfile::TempDir;
use tokio::sync::mpsc;
use vlips_capture::camera::mock::MockCamera;
use vlips_capture::camera::Camera;
use vlips_capture::config::Settings;
use vlips_capture::experiment::{self, Experiment, ExperimentKind};
use vlips_capture::storage::ImageSaver;

/// Creates an output root whose session folder is blocked by a plain file,
/// so every directory creation under it fails.
fn blocked_output_root(dir: &TempDir) -> std::path::PathBuf {
    let root = dir.path().join("out");
    std::fs::create_dir_all(root.join("lab")).unwrap();
    std::fs::write(root.join("lab").join("50"), b"occupied").unwrap();
    root
}

fn settings_for(output_root: &Path, kind: ExperimentKind, samples: u32) -> Settings {
    let mut settings = Settings::new(None).expect("default settings");
    settings.capture.tag = "lab".to_string();
    settings.capture.distance_cm = 50;
    settings.capture.samples = samples;
    settings.capture.infinite = false;
    settings.capture.burst_length = 3;
    settings.capture.experiment = kind;
    settings.storage.output_root = output_root.to_path_buf();
    settings
}

async fn run_to_completion(settings: &Settings, backend: MockCamera) -> (usize, usize) {
    let ledger = backend.ledger();
    let mut camera = Camera::new(Box::new(backend));
    camera.open().await.expect("open");
    camera.start_preview().await.expect("preview");

    let (saver, saver_task) = ImageSaver::spawn();
    let (event_tx, _event_rx) = mpsc::unbounded_channel();

    let handle = experiment::spawn(Experiment::new(settings, event_tx), camera, saver.clone());
    handle.join().await.expect("experiment");
    saver.flush().await.expect("flush");
    drop(saver);
    saver_task.await.unwrap();

    (ledger.acquired(), ledger.released())
}

#[tokio::test]
async fn single_take_releases_every_buffer_when_writes_fail() {
    let dir = TempDir::new().unwrap();
    let root = blocked_output_root(&dir);
    let settings = settings_for(&root, ExperimentKind::SingleTake, 4);

    let (acquired, released) = run_to_completion(&settings, MockCamera::simulated()).await;
    assert_eq!(acquired, 4);
    assert_eq!(released, 4);
}

#[tokio::test]
async fn double_take_burst_releases_every_buffer_when_writes_fail() {
    let dir = TempDir::new().unwrap();
    let root = blocked_output_root(&dir);
    let settings = settings_for(&root, ExperimentKind::DoubleTakeBurst, 2);

    let (acquired, released) = run_to_completion(&settings, MockCamera::simulated()).await;
    // Per iteration: one contour frame plus a burst of three.
    assert_eq!(acquired, 8);
    assert_eq!(released, 8);
}

#[tokio::test]
async fn successful_writes_release_buffers_too() {
    let dir = TempDir::new().unwrap();
    let settings = settings_for(dir.path(), ExperimentKind::Burst, 2);

    let (acquired, released) = run_to_completion(&settings, MockCamera::simulated()).await;
    assert_eq!(acquired, 6);
    assert_eq!(released, 6);
}
