//! The device collaborator: raw control surface of the imaging hardware.
//!
//! Everything the pipeline asks of the physical device goes through the
//! [`CameraBackend`] trait: install a repeating preview request, submit still
//! captures, and deliver asynchronous results/frames back on one ordered
//! event stream. The capture state machine and the device handle live on top
//! of this trait; the in-tree [`MockCamera`](super::mock::MockCamera)
//! implements it for tests and the demo binary.

use crate::camera::features::{CameraFeatures, HardwareLevel, LensFacing};
use crate::camera::image::RawImage;
use crate::error::AppResult;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Auto-focus status reported with a device result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoFocusState {
    /// Auto-focus idle; no sweep in progress.
    Inactive,
    /// Sweep in progress, lens still moving.
    Scanning,
    /// Sweep done, subject in focus.
    FocusedLocked,
    /// Sweep done, lock held without achieving focus.
    NotFocusedLocked,
}

/// Auto-exposure status reported with a device result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoExposureState {
    /// Auto-exposure idle.
    Inactive,
    /// Metering still adjusting.
    Searching,
    /// Exposure stable and usable.
    Converged,
    /// Pre-capture metering sequence running.
    Precapture,
}

/// One convergence snapshot emitted by the device for an in-flight request.
///
/// Either field may be absent: devices without the corresponding control
/// simply never report it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConvergenceResult {
    /// Auto-focus status, when the device reports one.
    pub auto_focus: Option<AutoFocusState>,
    /// Auto-exposure status, when the device reports one.
    pub auto_exposure: Option<AutoExposureState>,
}

/// What a capture request is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestIntent {
    /// Streaming/convergence frame; output not retained.
    Preview,
    /// Final exposure; output delivered as a frame.
    StillCapture,
}

/// Focus mode applied to a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FocusMode {
    /// One-shot sweep on trigger.
    Auto,
    /// Continuous refocusing tuned for stills.
    ContinuousPicture,
}

/// Exposure control applied to a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExposureControl {
    /// Device meters on its own.
    Auto,
    /// Fixed exposure time and sensitivity.
    Manual {
        /// Exposure time in nanoseconds.
        exposure_ns: i64,
        /// Sensor sensitivity (ISO).
        sensitivity: u32,
    },
}

/// Immutable description of one exposure, consumed by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Purpose of the request.
    pub intent: RequestIntent,
    /// Focus mode to apply.
    pub focus_mode: FocusMode,
    /// Fire a one-shot focus sweep with this request.
    pub focus_trigger: bool,
    /// Fire the pre-capture metering sequence with this request.
    pub precapture_trigger: bool,
    /// Exposure control to apply.
    pub exposure: ExposureControl,
    /// Enable automatic white balance.
    pub auto_white_balance: bool,
}

/// Asynchronous notification from the device.
///
/// For one session these arrive strictly in emission order.
#[derive(Debug)]
pub enum DeviceEvent {
    /// Convergence snapshot for an in-flight request.
    Result(ConvergenceResult),
    /// A still frame became available.
    Image(RawImage),
}

/// Static description of one camera, read once at handle construction.
#[derive(Clone, Debug)]
pub struct Characteristics {
    /// Vendor string as reported by the host.
    pub make: String,
    /// Model string as reported by the host.
    pub model: String,
    /// Mounting rotation of the sensor relative to the device, degrees.
    pub sensor_orientation: u32,
    /// Which way the lens points.
    pub lens_facing: LensFacing,
    /// Advertised implementation completeness.
    pub hardware_level: HardwareLevel,
    /// Continuous auto-focus available.
    pub continuous_autofocus: bool,
    /// Auto-exposure available.
    pub auto_exposure: bool,
    /// Automatic white balance available.
    pub auto_white_balance: bool,
    /// Supported manual exposure time range in nanoseconds, if adjustable.
    pub exposure_time_range_ns: Option<(i64, i64)>,
    /// Supported manual sensitivity range, if adjustable.
    pub sensitivity_range: Option<(u32, u32)>,
    /// Available lens focal lengths in millimeters.
    pub focal_lengths_mm: Vec<f64>,
    /// Supported still-capture sizes (width, height).
    pub capture_sizes: Vec<(u32, u32)>,
}

impl Characteristics {
    /// The preferred still-capture size: the largest available area.
    pub fn capture_size(&self) -> (u32, u32) {
        self.capture_sizes
            .iter()
            .copied()
            .max_by_key(|(w, h)| u64::from(*w) * u64::from(*h))
            .unwrap_or((0, 0))
    }
}

/// Raw asynchronous control surface of one imaging device.
///
/// Implementations must deliver [`DeviceEvent`]s for a session in emission
/// order and account every handed-out frame on their buffer ledger.
#[async_trait]
pub trait CameraBackend: Send + Sync + 'static {
    /// Static characteristics of this device.
    fn characteristics(&self) -> &Characteristics;

    /// Enumerates all cameras visible to the host.
    fn inventory(&self) -> Vec<CameraFeatures>;

    /// Acquires the physical device.
    async fn connect(&mut self) -> AppResult<()>;

    /// Releases the physical device. Idempotent.
    async fn disconnect(&mut self);

    /// Takes the device event stream. Yields `None` after the stream has
    /// already been taken or before `connect`.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<DeviceEvent>>;

    /// Installs the repeating preview request.
    async fn set_repeating_request(&mut self, request: CaptureRequest) -> AppResult<()>;

    /// Stops the repeating preview request.
    async fn stop_repeating(&mut self) -> AppResult<()>;

    /// Submits a batch of still/convergence requests. Results and frames
    /// arrive on the event stream.
    async fn submit(&mut self, requests: Vec<CaptureRequest>) -> AppResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_size_picks_largest_area() {
        let characteristics = Characteristics {
            make: "ACME".into(),
            model: "SIM-1".into(),
            sensor_orientation: 90,
            lens_facing: LensFacing::Back,
            hardware_level: HardwareLevel::Full,
            continuous_autofocus: true,
            auto_exposure: true,
            auto_white_balance: true,
            exposure_time_range_ns: Some((100_000, 1_000_000_000)),
            sensitivity_range: Some((50, 3200)),
            focal_lengths_mm: vec![4.39],
            capture_sizes: vec![(640, 480), (4000, 3000), (1920, 1080)],
        };
        assert_eq!(characteristics.capture_size(), (4000, 3000));
    }
}
