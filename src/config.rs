//! Session configuration, read once per sampling session.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment overrides with the `VLIPS` prefix (e.g.
//! `VLIPS_CAPTURE__SAMPLES=20`). After deserialization, [`Settings::validate`]
//! catches values that parse fine but are semantically wrong.

use crate::error::{AppResult, CaptureError};
use crate::experiment::ExperimentKind;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level settings for one sampling session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Capture-session parameters.
    pub capture: CaptureSettings,
    /// Where persisted samples land.
    pub storage: StorageSettings,
    /// Beacon identity carried into per-shot metadata.
    pub beacon: BeaconSettings,
}

/// Parameters of the capture loop itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureSettings {
    /// Free-text tag naming the session; first path component under the
    /// output root.
    pub tag: String,
    /// Distance from camera to subject, in centimeters.
    pub distance_cm: u32,
    /// Target iteration count. Ignored when `infinite` is set.
    pub samples: u32,
    /// Run until stopped instead of for `samples` iterations.
    pub infinite: bool,
    /// Number of frames per burst capture.
    pub burst_length: usize,
    /// Which experiment shape to run.
    pub experiment: ExperimentKind,
    /// Emit an alert when the experiment completes.
    pub finish_alert: bool,
}

/// Storage layout settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSettings {
    /// Root directory for persisted samples.
    pub output_root: PathBuf,
}

/// Beacon parameters of the positioning deployment under test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BeaconSettings {
    /// Numeric beacon identifier, recorded in each shot's description tag.
    pub code: u32,
    /// Expected message header emitted by the beacon.
    pub message_header: String,
    /// Expected message length in symbols.
    pub message_length: u32,
}

impl Settings {
    /// Loads settings from defaults, an optional TOML file and the
    /// environment.
    pub fn new(config_path: Option<&str>) -> AppResult<Self> {
        let mut builder = Config::builder()
            .set_default("capture.tag", "session")?
            .set_default("capture.distance_cm", 50)?
            .set_default("capture.samples", 10)?
            .set_default("capture.infinite", false)?
            .set_default("capture.burst_length", 10)?
            .set_default("capture.experiment", "single_take")?
            .set_default("capture.finish_alert", true)?
            .set_default("storage.output_root", "samples")?
            .set_default("beacon.code", 0)?
            .set_default("beacon.message_header", "")?
            .set_default("beacon.message_length", 0)?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        let settings: Settings = builder
            .add_source(Environment::with_prefix("VLIPS").separator("__"))
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    /// Checks values the type system cannot.
    pub fn validate(&self) -> AppResult<()> {
        if self.capture.tag.is_empty() {
            return Err(CaptureError::Configuration(
                "capture.tag cannot be empty".to_string(),
            ));
        }
        if !self.capture.infinite && self.capture.samples == 0 {
            return Err(CaptureError::Configuration(
                "capture.samples must be at least 1 for a finite run".to_string(),
            ));
        }
        if self.capture.burst_length == 0 {
            return Err(CaptureError::Configuration(
                "capture.burst_length must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Folder for this session's samples: `<output_root>/<tag>/<distance>`.
    pub fn session_folder(&self) -> PathBuf {
        self.storage
            .output_root
            .join(&self.capture.tag)
            .join(self.capture.distance_cm.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_load_and_validate() {
        let settings = Settings::new(None).unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.capture.samples, 10);
        assert_eq!(settings.capture.experiment, ExperimentKind::SingleTake);
        assert!(!settings.capture.infinite);
    }

    #[test]
    fn test_zero_samples_rejected() {
        let mut settings = Settings::new(None).unwrap();
        settings.capture.samples = 0;
        assert!(settings.validate().is_err());

        // An endless run does not care about the sample count.
        settings.capture.infinite = true;
        settings.validate().unwrap();
    }

    #[test]
    fn test_zero_burst_rejected() {
        let mut settings = Settings::new(None).unwrap();
        settings.capture.burst_length = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_session_folder_layout() {
        let mut settings = Settings::new(None).unwrap();
        settings.storage.output_root = PathBuf::from("/data");
        settings.capture.tag = "hall".into();
        settings.capture.distance_cm = 120;
        assert_eq!(settings.session_folder(), PathBuf::from("/data/hall/120"));
    }
}
