//! Experiment orchestration.
//!
//! An experiment is one configured sampling session: a loop of capture
//! iterations of a fixed shape, each persisting its frames with computed
//! metadata and reporting progress to the caller's event sink. Four shapes
//! exist, combining single shots, paired shots and bursts.
//!
//! Only one experiment may run per camera at a time; the scheduler does not
//! guard against overlap itself, callers check [`ExperimentHandle::is_finished`]
//! before starting another.

use crate::camera::{Camera, PreviewMode};
use crate::config::Settings;
use crate::error::{AppResult, CaptureError};
use crate::metadata::{self, ShotMetadata};
use crate::storage::{ImageSaver, SaveJob};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The shape of one sampling iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentKind {
    /// One marker shot per iteration.
    SingleTake,
    /// A contour shot followed by a marker shot per iteration.
    DoubleTake,
    /// One marker burst per iteration.
    Burst,
    /// A contour shot followed by a marker burst per iteration.
    DoubleTakeBurst,
}

/// What a persisted sample contains; first component of its file name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleType {
    /// Marker-exposure shot.
    Barcode,
    /// Contour-exposure shot.
    Contour,
}

impl SampleType {
    /// File-name prefix for this sample type.
    pub fn as_str(self) -> &'static str {
        match self {
            SampleType::Barcode => "barcode",
            SampleType::Contour => "contour",
        }
    }
}

/// Progress notifications for the display sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExperimentEvent {
    /// Iteration `i` finished (0-based).
    IterationComplete(u32),
    /// No further iteration notifications will arrive.
    ExperimentComplete,
}

/// Zero-padded sample identifier.
///
/// For a run of `samples` the identifier of 0-based `index` is padded to the
/// width of the largest index: `sample_id(12, 0) == "00"`,
/// `sample_id(1, 0) == "0"`.
pub fn sample_id(samples: usize, index: usize) -> String {
    let width = samples.saturating_sub(1).to_string().len();
    format!("{index:0width$}")
}

/// Cooperative stop flag for a running experiment.
///
/// Takes effect at the next iteration boundary; a capture already in flight
/// always runs to completion.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    /// Requests the experiment to stop at the next iteration boundary.
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One configured sampling session.
pub struct Experiment {
    kind: ExperimentKind,
    samples: u32,
    infinite: bool,
    burst_length: usize,
    session_folder: PathBuf,
    settings: Settings,
    display_rotation: u32,
    abort: AbortHandle,
    events: mpsc::UnboundedSender<ExperimentEvent>,
}

impl Experiment {
    /// Builds an experiment from session configuration. `events` is the
    /// display sink's channel.
    pub fn new(settings: &Settings, events: mpsc::UnboundedSender<ExperimentEvent>) -> Self {
        Self {
            kind: settings.capture.experiment,
            samples: settings.capture.samples,
            infinite: settings.capture.infinite,
            burst_length: settings.capture.burst_length,
            session_folder: settings.session_folder(),
            settings: settings.clone(),
            display_rotation: 0,
            abort: AbortHandle::default(),
            events,
        }
    }

    /// Sets the host display rotation used for orientation metadata.
    pub fn with_display_rotation(mut self, degrees: u32) -> Self {
        self.display_rotation = degrees;
        self
    }

    /// Flag for stopping this experiment from another task.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Runs the sampling loop to completion.
    ///
    /// Whatever happens inside the loop, the prior preview mode is restored,
    /// the live preview resumes, and the sink receives its final
    /// [`ExperimentEvent::ExperimentComplete`].
    pub async fn run(&self, camera: &Camera, saver: &ImageSaver) -> AppResult<()> {
        tracing::info!(kind = ?self.kind, samples = self.samples, infinite = self.infinite, "experiment started");

        let prior_mode = camera.preview_mode();
        camera.set_burst_length(self.burst_length);

        let result = self.run_loop(camera, saver).await;

        if let Err(err) = camera.set_preview_mode(prior_mode) {
            tracing::warn!(error = %err, "could not restore prior preview mode");
        }
        if let Err(err) = camera.start_preview().await {
            tracing::warn!(error = %err, "could not resume preview after experiment");
        }
        let _ = self.events.send(ExperimentEvent::ExperimentComplete);

        match &result {
            Ok(()) => tracing::info!("experiment finished"),
            Err(err) => tracing::error!(error = %err, "experiment stopped on error"),
        }
        result
    }

    async fn run_loop(&self, camera: &Camera, saver: &ImageSaver) -> AppResult<()> {
        // Kinds without per-capture mode switches settle on marker exposure
        // once, up front.
        match self.kind {
            ExperimentKind::SingleTake | ExperimentKind::Burst => {
                camera.set_preview_mode(PreviewMode::Marker)?;
            }
            ExperimentKind::DoubleTake | ExperimentKind::DoubleTakeBurst => {}
        }

        let mut iteration: u32 = 0;
        while self.should_continue(iteration) {
            if self.abort.is_aborted() {
                tracing::info!(iteration, "experiment aborted");
                break;
            }

            self.step(camera, saver, iteration).await?;
            let _ = self
                .events
                .send(ExperimentEvent::IterationComplete(iteration));
            iteration += 1;
        }
        Ok(())
    }

    fn should_continue(&self, iteration: u32) -> bool {
        self.infinite || iteration < self.samples
    }

    async fn step(&self, camera: &Camera, saver: &ImageSaver, iteration: u32) -> AppResult<()> {
        match self.kind {
            ExperimentKind::SingleTake => {
                let barcode = camera.take_picture().await?;
                saver.enqueue(SaveJob {
                    image: barcode,
                    folder: self.session_folder.clone(),
                    sample_type: SampleType::Barcode,
                    sample_id: self.iteration_id(iteration),
                    metadata: self.shot_metadata(camera),
                });
            }
            ExperimentKind::DoubleTake => {
                camera.set_preview_mode(PreviewMode::Contour)?;
                let contour = camera.take_picture().await?;
                camera.set_preview_mode(PreviewMode::Marker)?;
                let barcode = camera.take_picture().await?;

                saver.enqueue(SaveJob {
                    image: contour,
                    folder: self.session_folder.clone(),
                    sample_type: SampleType::Contour,
                    sample_id: self.iteration_id(iteration),
                    metadata: self.shot_metadata(camera),
                });
                saver.enqueue(SaveJob {
                    image: barcode,
                    folder: self.session_folder.clone(),
                    sample_type: SampleType::Barcode,
                    sample_id: self.iteration_id(iteration),
                    metadata: self.shot_metadata(camera),
                });
            }
            ExperimentKind::Burst => {
                let burst = camera.take_burst().await?;
                saver.enqueue_batch(
                    burst,
                    self.iteration_folder(iteration),
                    self.shot_metadata(camera),
                );
            }
            ExperimentKind::DoubleTakeBurst => {
                camera.set_preview_mode(PreviewMode::Contour)?;
                let contour = camera.take_picture().await?;
                camera.set_preview_mode(PreviewMode::Marker)?;
                let burst = camera.take_burst().await?;

                // The contour shot of this kind carries no sample id; only
                // the per-iteration folder distinguishes it.
                saver.enqueue(SaveJob {
                    image: contour,
                    folder: self.iteration_folder(iteration),
                    sample_type: SampleType::Contour,
                    sample_id: String::new(),
                    metadata: self.shot_metadata(camera),
                });
                saver.enqueue_batch(
                    burst,
                    self.iteration_folder(iteration),
                    self.shot_metadata(camera),
                );
            }
        }
        Ok(())
    }

    fn iteration_id(&self, iteration: u32) -> String {
        sample_id(self.samples as usize, iteration as usize)
    }

    fn iteration_folder(&self, iteration: u32) -> PathBuf {
        self.session_folder.join(iteration.to_string())
    }

    fn shot_metadata(&self, camera: &Camera) -> ShotMetadata {
        metadata::compose(
            camera.characteristics(),
            &self.settings,
            camera.last_exposure(),
            self.display_rotation,
        )
    }
}

/// A running experiment and its camera session.
pub struct ExperimentHandle {
    abort: AbortHandle,
    task: JoinHandle<AppResult<()>>,
}

/// Starts an experiment on its own task.
///
/// The task owns the camera for the duration of the run and closes it when
/// the loop ends, tearing the session worker down with it.
pub fn spawn(experiment: Experiment, mut camera: Camera, saver: ImageSaver) -> ExperimentHandle {
    let abort = experiment.abort_handle();
    let task = tokio::spawn(async move {
        let result = experiment.run(&camera, &saver).await;
        camera.close().await;
        result
    });
    ExperimentHandle { abort, task }
}

impl ExperimentHandle {
    /// Requests a stop at the next iteration boundary. In-flight hardware
    /// requests finish naturally.
    pub fn stop(&self) {
        self.abort.abort();
    }

    /// Whether the experiment task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the experiment task and returns the loop's outcome.
    pub async fn join(self) -> AppResult<()> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(CaptureError::DeviceNotReady(format!(
                "experiment task failed: {err}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_id_padding() {
        assert_eq!(sample_id(12, 0), "00");
        assert_eq!(sample_id(12, 11), "11");
        assert_eq!(sample_id(1, 0), "0");
        assert_eq!(sample_id(100, 7), "07");
        assert_eq!(sample_id(101, 7), "007");
    }

    #[test]
    fn test_sample_type_prefixes() {
        assert_eq!(SampleType::Barcode.as_str(), "barcode");
        assert_eq!(SampleType::Contour.as_str(), "contour");
    }

    #[test]
    fn test_abort_handle_is_shared() {
        let handle = AbortHandle::default();
        let clone = handle.clone();
        assert!(!clone.is_aborted());
        handle.abort();
        assert!(clone.is_aborted());
    }

    #[test]
    fn test_experiment_kind_config_names() {
        let kind: ExperimentKind = serde_json::from_str("\"double_take_burst\"").unwrap();
        assert_eq!(kind, ExperimentKind::DoubleTakeBurst);
        let kind: ExperimentKind = serde_json::from_str("\"single_take\"").unwrap();
        assert_eq!(kind, ExperimentKind::SingleTake);
    }
}
