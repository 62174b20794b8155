//! Simulated camera backend.
//!
//! Provides a hardware-free [`CameraBackend`] for tests and the demo binary.
//! Convergence behavior is scripted: a queue of [`ConvergenceResult`]s is
//! played back first, then a configurable steady-state result repeats for as
//! long as a preview request is installed. Still submissions synthesize small
//! JPEG frames and account them on a shared [`BufferLedger`].

use crate::camera::backend::{
    AutoExposureState, AutoFocusState, CameraBackend, CaptureRequest, Characteristics,
    ConvergenceResult, DeviceEvent, RequestIntent,
};
use crate::camera::features::{CameraFeatures, HardwareLevel, LensFacing};
use crate::camera::image::{BufferLedger, ImageFormat, RawImage};
use crate::error::{AppResult, CaptureError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, Duration};

/// Interval between steady-state convergence results while previewing.
const RESULT_INTERVAL: Duration = Duration::from_millis(2);

/// Nominal frame interval used for synthetic device timestamps.
const FRAME_INTERVAL_NS: i64 = 33_000_000;

/// Simulated camera device.
pub struct MockCamera {
    characteristics: Characteristics,
    ledger: Arc<BufferLedger>,
    script: Arc<Mutex<VecDeque<ConvergenceResult>>>,
    steady: ConvergenceResult,
    events_tx: Option<mpsc::UnboundedSender<DeviceEvent>>,
    events_rx: Option<mpsc::UnboundedReceiver<DeviceEvent>>,
    emitter_live: Option<Arc<AtomicBool>>,
    connected: bool,
    frame_counter: i64,
    deny_access: bool,
    fail_session_config: bool,
}

impl MockCamera {
    /// A well-behaved back camera with manual exposure controls.
    pub fn simulated() -> Self {
        Self::with_characteristics(Characteristics {
            make: "ACME".to_string(),
            model: "SIM-1".to_string(),
            sensor_orientation: 90,
            lens_facing: LensFacing::Back,
            hardware_level: HardwareLevel::Full,
            continuous_autofocus: true,
            auto_exposure: true,
            auto_white_balance: true,
            exposure_time_range_ns: Some((100_000, 1_000_000_000)),
            sensitivity_range: Some((50, 3200)),
            focal_lengths_mm: vec![4.39],
            capture_sizes: vec![(1920, 1080), (4000, 3000), (640, 480)],
        })
    }

    /// A camera around explicit characteristics.
    pub fn with_characteristics(characteristics: Characteristics) -> Self {
        Self {
            characteristics,
            ledger: BufferLedger::new(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            steady: ConvergenceResult {
                auto_focus: Some(AutoFocusState::FocusedLocked),
                auto_exposure: Some(AutoExposureState::Converged),
            },
            events_tx: None,
            events_rx: None,
            emitter_live: None,
            connected: false,
            frame_counter: 0,
            deny_access: false,
            fail_session_config: false,
        }
    }

    /// Queues convergence results played back before the steady state.
    pub fn with_convergence_script(self, results: Vec<ConvergenceResult>) -> Self {
        {
            let script = Arc::clone(&self.script);
            // The camera is not shared yet, so the lock cannot be contended.
            if let Ok(mut queue) = script.try_lock() {
                queue.extend(results);
            };
        }
        self
    }

    /// Simulates a device that never reports focus state.
    pub fn without_focus_reporting(mut self) -> Self {
        self.steady.auto_focus = None;
        self
    }

    /// Simulates a device with fixed exposure hardware (no manual ranges).
    pub fn without_manual_exposure(mut self) -> Self {
        self.characteristics.exposure_time_range_ns = None;
        self.characteristics.sensitivity_range = None;
        self
    }

    /// Makes `connect` fail the way a denied host permission does.
    pub fn deny_access(mut self) -> Self {
        self.deny_access = true;
        self
    }

    /// Makes session configuration fail on the next repeating request.
    pub fn fail_session_configuration(mut self) -> Self {
        self.fail_session_config = true;
        self
    }

    /// Buffer accounting shared with every frame this camera hands out.
    pub fn ledger(&self) -> Arc<BufferLedger> {
        Arc::clone(&self.ledger)
    }

    fn stop_emitter(&mut self) {
        if let Some(live) = self.emitter_live.take() {
            live.store(false, Ordering::SeqCst);
        }
    }

    async fn next_result(&self) -> ConvergenceResult {
        self.script.lock().await.pop_front().unwrap_or(self.steady)
    }

    fn synth_frame(&mut self) -> RawImage {
        self.frame_counter += 1;
        let (width, height) = self.characteristics.capture_size();

        // A tiny JPEG-shaped payload: SOI marker, a recognizable body, EOI.
        let mut data = vec![0xFF, 0xD8];
        data.extend_from_slice(&self.frame_counter.to_be_bytes());
        data.extend(std::iter::repeat(0xA5).take(64));
        data.extend_from_slice(&[0xFF, 0xD9]);

        self.ledger.record_acquire();
        RawImage::new(
            data,
            width,
            height,
            ImageFormat::Jpeg,
            self.frame_counter * FRAME_INTERVAL_NS,
            Arc::clone(&self.ledger),
        )
    }
}

#[async_trait]
impl CameraBackend for MockCamera {
    fn characteristics(&self) -> &Characteristics {
        &self.characteristics
    }

    fn inventory(&self) -> Vec<CameraFeatures> {
        vec![CameraFeatures {
            id: "0".to_string(),
            hardware_level: Some(self.characteristics.hardware_level),
            lens_facing: Some(self.characteristics.lens_facing),
        }]
    }

    async fn connect(&mut self) -> AppResult<()> {
        if self.deny_access {
            return Err(CaptureError::AccessDenied(
                "host refused camera access".to_string(),
            ));
        }
        if self.connected {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.events_tx = Some(tx);
        self.events_rx = Some(rx);
        self.connected = true;
        tracing::debug!(model = %self.characteristics.model, "mock camera connected");
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.stop_emitter();
        self.events_tx = None;
        self.connected = false;
        tracing::debug!(model = %self.characteristics.model, "mock camera disconnected");
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<DeviceEvent>> {
        self.events_rx.take()
    }

    async fn set_repeating_request(&mut self, _request: CaptureRequest) -> AppResult<()> {
        if !self.connected {
            return Err(CaptureError::DeviceNotReady(
                "set_repeating_request before connect".to_string(),
            ));
        }
        if self.fail_session_config {
            return Err(CaptureError::SessionConfigFailed(
                "simulated session configuration failure".to_string(),
            ));
        }

        // Replace any previous emission loop with a fresh one.
        self.stop_emitter();
        let live = Arc::new(AtomicBool::new(true));
        self.emitter_live = Some(Arc::clone(&live));

        let tx = match &self.events_tx {
            Some(tx) => tx.clone(),
            None => {
                return Err(CaptureError::DeviceNotReady(
                    "event stream unavailable".to_string(),
                ))
            }
        };
        let steady = self.steady;

        // The repeating stream replays only the steady-state result; scripted
        // results are reserved for trigger submissions so their order stays
        // deterministic.
        tokio::spawn(async move {
            while live.load(Ordering::SeqCst) {
                sleep(RESULT_INTERVAL).await;
                if !live.load(Ordering::SeqCst) {
                    break;
                }
                if tx.send(DeviceEvent::Result(steady)).is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    async fn stop_repeating(&mut self) -> AppResult<()> {
        self.stop_emitter();
        Ok(())
    }

    async fn submit(&mut self, requests: Vec<CaptureRequest>) -> AppResult<()> {
        if !self.connected {
            return Err(CaptureError::DeviceNotReady("submit before connect".to_string()));
        }

        for request in requests {
            match request.intent {
                RequestIntent::Preview => {
                    // Trigger requests answer promptly with the next scripted
                    // result, independent of the repeating stream's cadence.
                    let result = self.next_result().await;
                    if let Some(tx) = &self.events_tx {
                        let _ = tx.send(DeviceEvent::Result(result));
                    }
                }
                RequestIntent::StillCapture => {
                    let frame = self.synth_frame();
                    if let Some(tx) = &self.events_tx {
                        if tx.send(DeviceEvent::Image(frame)).is_err() {
                            tracing::warn!("no consumer for mock frame");
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn still_request() -> CaptureRequest {
        CaptureRequest {
            intent: RequestIntent::StillCapture,
            focus_mode: crate::camera::backend::FocusMode::ContinuousPicture,
            focus_trigger: false,
            precapture_trigger: false,
            exposure: crate::camera::backend::ExposureControl::Auto,
            auto_white_balance: true,
        }
    }

    #[tokio::test]
    async fn test_connect_is_reentrant() {
        let mut camera = MockCamera::simulated();
        camera.connect().await.unwrap();
        camera.connect().await.unwrap();
        assert!(camera.take_events().is_some());
        assert!(camera.take_events().is_none());
    }

    #[tokio::test]
    async fn test_denied_access_surfaces() {
        let mut camera = MockCamera::simulated().deny_access();
        let err = camera.connect().await.unwrap_err();
        assert!(matches!(err, CaptureError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn test_still_submission_delivers_accounted_frames() {
        let mut camera = MockCamera::simulated();
        let ledger = camera.ledger();
        camera.connect().await.unwrap();
        let mut events = camera.take_events().unwrap();

        camera
            .submit(vec![still_request(), still_request(), still_request()])
            .await
            .unwrap();

        let mut timestamps = Vec::new();
        for _ in 0..3 {
            match events.recv().await.unwrap() {
                DeviceEvent::Image(image) => {
                    assert!(image.bytes().starts_with(&[0xFF, 0xD8]));
                    timestamps.push(image.timestamp_ns());
                    image.release();
                }
                DeviceEvent::Result(_) => panic!("unexpected result event"),
            }
        }

        // Frames arrive in capture order.
        assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ledger.acquired(), 3);
        assert_eq!(ledger.released(), 3);
    }

    #[tokio::test]
    async fn test_session_config_failure_injection() {
        let mut camera = MockCamera::simulated().fail_session_configuration();
        camera.connect().await.unwrap();
        let err = camera
            .set_repeating_request(still_request())
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::SessionConfigFailed(_)));
    }
}
