//! Device handle and per-session capture worker.
//!
//! [`Camera`] owns the open/close lifecycle of one imaging device and exposes
//! the two asynchronous operations the rest of the pipeline needs: begin the
//! live preview stream, and capture a single frame or a burst. All device
//! events and capture sequencing run on one background worker task per open
//! session, so results are processed strictly in emission order and two
//! capture requests can never race on the same device.

pub mod backend;
pub mod features;
pub mod image;
pub mod mock;
pub mod state;

use crate::error::{AppResult, CaptureError};
use crate::metadata::ExposureReadout;
use backend::{
    AutoFocusState, CameraBackend, CaptureRequest, Characteristics, ConvergenceResult,
    DeviceEvent, ExposureControl, FocusMode, RequestIntent,
};
use features::CameraFeatures;
use image::{BurstBatch, RawImage};
use state::{CaptureState, StateAction};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

/// Bounded wait for the exclusive open/close permit.
const OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// Depth of the worker command queue.
const COMMAND_QUEUE_DEPTH: usize = 16;

/// Burst length applied until the scheduler configures one.
const DEFAULT_BURST_LENGTH: usize = 10;

/// Fixed exposure time for contour preview mode, nanoseconds.
const CONTOUR_EXPOSURE_NS: i64 = 10_000_000;

/// Make/model pairs whose marker-mode exposure must not be derived from the
/// advertised ranges: (make, model, exposure_ns, sensitivity).
const MARKER_EXPOSURE_QUIRKS: &[(&str, &str, i64, u32)] = &[("HUAWEI", "ELE-L29", 100_000, 50)];

/// Exposure profile applied to every subsequent request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PreviewMode {
    /// Device-metered exposure.
    #[default]
    Default,
    /// Short, bright-spot exposure for marker detection.
    Marker,
    /// Longer exposure for contour extraction.
    Contour,
}

/// Result of one capture operation.
#[derive(Debug)]
pub enum CaptureOutcome {
    /// One frame from a single-shot request.
    Single(RawImage),
    /// The complete, ordered batch from a burst request.
    Burst(BurstBatch),
}

#[derive(Clone, Copy, Debug)]
struct CaptureTuning {
    preview_mode: PreviewMode,
    burst_length: usize,
    last_exposure: ExposureReadout,
}

enum CameraCommand {
    StartPreview {
        reply: oneshot::Sender<AppResult<()>>,
    },
    TakePicture {
        burst: bool,
        reply: oneshot::Sender<AppResult<CaptureOutcome>>,
    },
    Shutdown {
        reply: oneshot::Sender<Box<dyn CameraBackend>>,
    },
}

struct WorkerHandle {
    commands: mpsc::Sender<CameraCommand>,
    task: JoinHandle<()>,
}

/// Handle to one imaging device.
pub struct Camera {
    open_lock: Arc<Semaphore>,
    backend: Option<Box<dyn CameraBackend>>,
    worker: Option<WorkerHandle>,
    characteristics: Characteristics,
    inventory: Vec<CameraFeatures>,
    tuning: Arc<Mutex<CaptureTuning>>,
    focus_tx: Arc<watch::Sender<Option<AutoFocusState>>>,
    focus_rx: watch::Receiver<Option<AutoFocusState>>,
}

impl Camera {
    /// Wraps a backend. Characteristics are read once, here, and treated as
    /// immutable for the life of the handle.
    pub fn new(backend: Box<dyn CameraBackend>) -> Self {
        let characteristics = backend.characteristics().clone();
        let inventory = backend.inventory();
        let (focus_tx, focus_rx) = watch::channel(None);
        Self {
            open_lock: Arc::new(Semaphore::new(1)),
            backend: Some(backend),
            worker: None,
            characteristics,
            inventory,
            tuning: Arc::new(Mutex::new(CaptureTuning {
                preview_mode: PreviewMode::Default,
                burst_length: DEFAULT_BURST_LENGTH,
                last_exposure: ExposureReadout::default(),
            })),
            focus_tx: Arc::new(focus_tx),
            focus_rx,
        }
    }

    /// Static characteristics of the wrapped device.
    pub fn characteristics(&self) -> &Characteristics {
        &self.characteristics
    }

    /// All cameras visible to the host, as reported at construction.
    pub fn inventory(&self) -> &[CameraFeatures] {
        &self.inventory
    }

    /// Preferred still-capture size.
    pub fn capture_size(&self) -> (u32, u32) {
        self.characteristics.capture_size()
    }

    /// Sensor mounting rotation in degrees.
    pub fn sensor_orientation(&self) -> u32 {
        self.characteristics.sensor_orientation
    }

    /// Whether a session worker is currently running.
    pub fn is_open(&self) -> bool {
        self.worker.is_some()
    }

    /// Observes auto-focus state changes seen while previewing.
    pub fn focus_updates(&self) -> watch::Receiver<Option<AutoFocusState>> {
        self.focus_rx.clone()
    }

    /// Acquires the device and starts the session worker.
    ///
    /// Bounded by [`OPEN_TIMEOUT`]; failing to win the open permit in that
    /// window is an error rather than an indefinite block. Opening an
    /// already-open handle is a no-op. A denied host permission abandons the
    /// attempt quietly: it is logged and the handle stays closed.
    pub async fn open(&mut self) -> AppResult<()> {
        let permit = match timeout(OPEN_TIMEOUT, Arc::clone(&self.open_lock).acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            _ => {
                return Err(CaptureError::OpenFailed(
                    "timed out waiting for the open permit".to_string(),
                ))
            }
        };

        if self.worker.is_some() {
            drop(permit);
            return Ok(());
        }

        let mut backend = match self.backend.take() {
            Some(backend) => backend,
            None => {
                return Err(CaptureError::OpenFailed(
                    "device is no longer attached to this handle".to_string(),
                ))
            }
        };

        match backend.connect().await {
            Ok(()) => {}
            Err(CaptureError::AccessDenied(reason)) => {
                tracing::warn!(%reason, "camera open abandoned");
                self.backend = Some(backend);
                return Ok(());
            }
            Err(err) => {
                self.backend = Some(backend);
                return Err(err);
            }
        }

        let events = match backend.take_events() {
            Some(events) => events,
            None => {
                backend.disconnect().await;
                self.backend = Some(backend);
                return Err(CaptureError::OpenFailed(
                    "device event stream unavailable".to_string(),
                ));
            }
        };

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let worker = CameraWorker {
            backend,
            characteristics: self.characteristics.clone(),
            tuning: Arc::clone(&self.tuning),
            state: CaptureState::Previewing,
            pending: None,
            focus_tx: Arc::clone(&self.focus_tx),
            previous_focus: None,
        };
        let task = tokio::spawn(worker.run(command_rx, events));
        self.worker = Some(WorkerHandle {
            commands: command_tx,
            task,
        });

        drop(permit);
        Ok(())
    }

    /// Stops the worker and releases every session resource.
    ///
    /// Idempotent and infallible: closing a closed handle does nothing, and
    /// release is best-effort even when earlier steps went wrong.
    pub async fn close(&mut self) {
        // A stuck permit must not prevent resource release; proceed anyway
        // once the wait expires.
        let permit = timeout(OPEN_TIMEOUT, Arc::clone(&self.open_lock).acquire_owned())
            .await
            .ok()
            .and_then(Result::ok);

        if let Some(worker) = self.worker.take() {
            let (reply_tx, reply_rx) = oneshot::channel();
            if worker
                .commands
                .send(CameraCommand::Shutdown { reply: reply_tx })
                .await
                .is_ok()
            {
                if let Ok(backend) = reply_rx.await {
                    self.backend = Some(backend);
                }
            }
            let _ = worker.task.await;
        }

        drop(permit);
    }

    /// Installs the repeating preview request.
    pub async fn start_preview(&self) -> AppResult<()> {
        let worker = self.running_worker()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        worker
            .commands
            .send(CameraCommand::StartPreview { reply: reply_tx })
            .await
            .map_err(|_| worker_gone())?;
        reply_rx.await.map_err(|_| worker_gone())?
    }

    /// Captures one frame, driving focus/exposure convergence first.
    pub async fn take_picture(&self) -> AppResult<RawImage> {
        match self.capture(false).await? {
            CaptureOutcome::Single(image) => Ok(image),
            CaptureOutcome::Burst(batch) => {
                drop(batch);
                Err(CaptureError::DeviceNotReady(
                    "unexpected burst result for a single capture".to_string(),
                ))
            }
        }
    }

    /// Captures a full burst, delivered complete and in arrival order.
    pub async fn take_burst(&self) -> AppResult<BurstBatch> {
        match self.capture(true).await? {
            CaptureOutcome::Burst(batch) => Ok(batch),
            CaptureOutcome::Single(image) => {
                image.release();
                Err(CaptureError::DeviceNotReady(
                    "unexpected single result for a burst capture".to_string(),
                ))
            }
        }
    }

    /// Switches the exposure profile applied to subsequent requests.
    ///
    /// Validation is eager: a mode that needs manual exposure controls fails
    /// here, not at the next capture, when the device lacks them.
    pub fn set_preview_mode(&self, mode: PreviewMode) -> AppResult<()> {
        if mode != PreviewMode::Default {
            if self.characteristics.exposure_time_range_ns.is_none() {
                return Err(CaptureError::ControlUnsupported(
                    "sensor exposure time cannot be adjusted".to_string(),
                ));
            }
            if self.characteristics.sensitivity_range.is_none() {
                return Err(CaptureError::ControlUnsupported(
                    "sensor sensitivity cannot be adjusted".to_string(),
                ));
            }
        }

        let mut tuning = self.lock_tuning();
        tuning.preview_mode = mode;
        if let Some(readout) = manual_exposure_for(mode, &self.characteristics) {
            tuning.last_exposure = readout;
        }
        Ok(())
    }

    /// Exposure profile currently applied.
    pub fn preview_mode(&self) -> PreviewMode {
        self.lock_tuning().preview_mode
    }

    /// Configures the number of frames per burst.
    pub fn set_burst_length(&self, frames: usize) {
        self.lock_tuning().burst_length = frames.max(1);
    }

    /// Number of frames per burst.
    pub fn burst_length(&self) -> usize {
        self.lock_tuning().burst_length
    }

    /// The manual exposure parameters most recently applied to the sensor.
    pub fn last_exposure(&self) -> ExposureReadout {
        self.lock_tuning().last_exposure
    }

    async fn capture(&self, burst: bool) -> AppResult<CaptureOutcome> {
        let worker = self.running_worker()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        worker
            .commands
            .send(CameraCommand::TakePicture {
                burst,
                reply: reply_tx,
            })
            .await
            .map_err(|_| worker_gone())?;
        reply_rx.await.map_err(|_| worker_gone())?
    }

    fn running_worker(&self) -> AppResult<&WorkerHandle> {
        self.worker
            .as_ref()
            .ok_or_else(|| CaptureError::DeviceNotReady("camera device not open".to_string()))
    }

    fn lock_tuning(&self) -> MutexGuard<'_, CaptureTuning> {
        match self.tuning.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn worker_gone() -> CaptureError {
    CaptureError::DeviceNotReady("capture worker is gone".to_string())
}

/// Derives the manual exposure parameters for a preview mode, when the mode
/// uses manual exposure and the device can express it.
fn manual_exposure_for(
    mode: PreviewMode,
    characteristics: &Characteristics,
) -> Option<ExposureReadout> {
    match mode {
        PreviewMode::Default => None,
        PreviewMode::Marker => {
            for (make, model, exposure_ns, sensitivity) in MARKER_EXPOSURE_QUIRKS {
                if characteristics.make == *make && characteristics.model == *model {
                    return Some(ExposureReadout {
                        exposure_ns: *exposure_ns,
                        sensitivity: *sensitivity,
                    });
                }
            }
            let (min_exposure, _) = characteristics.exposure_time_range_ns?;
            let (_, max_sensitivity) = characteristics.sensitivity_range?;
            Some(ExposureReadout {
                exposure_ns: min_exposure,
                sensitivity: max_sensitivity,
            })
        }
        PreviewMode::Contour => {
            characteristics.exposure_time_range_ns?;
            let (min_sensitivity, _) = characteristics.sensitivity_range?;
            Some(ExposureReadout {
                exposure_ns: CONTOUR_EXPOSURE_NS,
                sensitivity: min_sensitivity,
            })
        }
    }
}

struct PendingCapture {
    burst: bool,
    batch: BurstBatch,
    reply: oneshot::Sender<AppResult<CaptureOutcome>>,
}

/// Background worker owning the backend for one open session.
///
/// All device results and capture sequencing run here, on one task, which is
/// what guarantees in-order processing and a single request in flight.
struct CameraWorker {
    backend: Box<dyn CameraBackend>,
    characteristics: Characteristics,
    tuning: Arc<Mutex<CaptureTuning>>,
    state: CaptureState,
    pending: Option<PendingCapture>,
    focus_tx: Arc<watch::Sender<Option<AutoFocusState>>>,
    previous_focus: Option<AutoFocusState>,
}

impl CameraWorker {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<CameraCommand>,
        mut events: mpsc::UnboundedReceiver<DeviceEvent>,
    ) {
        let mut events_open = true;

        let shutdown_reply = 'session: loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(CameraCommand::StartPreview { reply }) => {
                        let result = self.start_preview().await;
                        let _ = reply.send(result);
                    }
                    Some(CameraCommand::TakePicture { burst, reply }) => {
                        self.begin_capture(burst, reply).await;
                    }
                    Some(CameraCommand::Shutdown { reply }) => break 'session Some(reply),
                    None => break 'session None,
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        events_open = false;
                        self.fail_pending(CaptureError::DeviceNotReady(
                            "device event stream closed".to_string(),
                        ));
                    }
                },
            }
        };

        self.fail_pending(CaptureError::DeviceNotReady("camera closed".to_string()));
        let _ = self.backend.stop_repeating().await;
        self.backend.disconnect().await;
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(self.backend);
        }
    }

    async fn start_preview(&mut self) -> AppResult<()> {
        self.state = CaptureState::Previewing;
        let request = self.base_request(RequestIntent::Preview);
        self.backend.set_repeating_request(request).await
    }

    async fn begin_capture(
        &mut self,
        burst: bool,
        reply: oneshot::Sender<AppResult<CaptureOutcome>>,
    ) {
        if self.pending.is_some() {
            let _ = reply.send(Err(CaptureError::DeviceNotReady(
                "a capture is already in flight".to_string(),
            )));
            return;
        }

        let capacity = if burst { self.snapshot().burst_length } else { 1 };
        self.pending = Some(PendingCapture {
            burst,
            batch: BurstBatch::with_capacity(capacity),
            reply,
        });
        self.state = CaptureState::WaitingFocusLock;

        // With continuous auto-focus the lens is already tracking; no
        // one-shot sweep needed, the next result settles the state.
        let mut request = self.base_request(RequestIntent::Preview);
        request.focus_trigger = !self.characteristics.continuous_autofocus;
        if let Err(err) = self.backend.submit(vec![request]).await {
            self.state = CaptureState::Previewing;
            self.fail_pending(err);
        }
    }

    async fn handle_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Result(result) => self.handle_result(result).await,
            DeviceEvent::Image(image) => self.handle_image(image).await,
        }
    }

    async fn handle_result(&mut self, result: ConvergenceResult) {
        if self.state == CaptureState::Previewing {
            if result.auto_focus != self.previous_focus {
                self.previous_focus = result.auto_focus;
                let _ = self.focus_tx.send(result.auto_focus);
            }
            return;
        }

        match self.state.on_result(&result) {
            StateAction::None => {}
            StateAction::RunPrecapture => {
                let mut request = self.base_request(RequestIntent::Preview);
                request.precapture_trigger = true;
                if let Err(err) = self.backend.submit(vec![request]).await {
                    self.state = CaptureState::Previewing;
                    self.fail_pending(err);
                }
            }
            StateAction::Capture => {
                if let Err(err) = self.issue_final_capture().await {
                    self.fail_pending(err);
                    self.resume_preview().await;
                }
            }
        }
    }

    async fn handle_image(&mut self, image: RawImage) {
        let Some(pending) = self.pending.as_mut() else {
            tracing::warn!("frame arrived with no capture in flight; releasing");
            image.release();
            return;
        };

        if let Err(extra) = pending.batch.push(image) {
            tracing::warn!("frame arrived past burst capacity; releasing");
            extra.release();
            return;
        }

        if pending.batch.is_full() {
            // Delivery unregisters the sink: later frames find no pending
            // capture and are released on arrival.
            if let Some(pending) = self.pending.take() {
                let outcome = if pending.burst {
                    Ok(CaptureOutcome::Burst(pending.batch))
                } else {
                    match pending.batch.into_images().pop() {
                        Some(image) => Ok(CaptureOutcome::Single(image)),
                        None => Err(CaptureError::DeviceNotReady(
                            "device delivered an empty capture".to_string(),
                        )),
                    }
                };
                let _ = pending.reply.send(outcome);
            }
            self.resume_preview().await;
        }
    }

    async fn issue_final_capture(&mut self) -> AppResult<()> {
        let count = match &self.pending {
            Some(pending) => pending.batch.capacity(),
            None => return Ok(()),
        };
        self.backend.stop_repeating().await?;
        let request = self.base_request(RequestIntent::StillCapture);
        self.backend.submit(vec![request; count]).await
    }

    async fn resume_preview(&mut self) {
        self.state = CaptureState::Previewing;
        let request = self.base_request(RequestIntent::Preview);
        if let Err(err) = self.backend.set_repeating_request(request).await {
            tracing::error!(error = %err, "failed to resume preview after capture");
        }
    }

    fn fail_pending(&mut self, err: CaptureError) {
        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(Err(err));
        }
    }

    fn snapshot(&self) -> CaptureTuning {
        match self.tuning.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn base_request(&self, intent: RequestIntent) -> CaptureRequest {
        let tuning = self.snapshot();
        let focus_mode = if self.characteristics.continuous_autofocus {
            FocusMode::ContinuousPicture
        } else {
            FocusMode::Auto
        };
        let exposure = match tuning.preview_mode {
            PreviewMode::Default => ExposureControl::Auto,
            PreviewMode::Marker | PreviewMode::Contour => ExposureControl::Manual {
                exposure_ns: tuning.last_exposure.exposure_ns,
                sensitivity: tuning.last_exposure.sensitivity,
            },
        };
        CaptureRequest {
            intent,
            focus_mode,
            focus_trigger: false,
            precapture_trigger: false,
            exposure,
            auto_white_balance: self.characteristics.auto_white_balance,
        }
    }
}
