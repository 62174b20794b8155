//! Per-shot descriptive metadata.
//!
//! Every persisted sample carries a small map of string tags describing how
//! the shot was taken: image orientation, device make/model, focal length,
//! subject distance, and the manual exposure parameters in effect. The map is
//! computed fresh for each shot by [`compose`], is immutable once produced,
//! and is serialized next to the image payload by the persistence worker.

use crate::camera::backend::Characteristics;
use crate::camera::features::LensFacing;
use crate::config::Settings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Software tag stamped into every shot.
pub const SOFTWARE_TAG: &str = "vlips";

const FOCAL_LENGTH_DENOMINATOR: i64 = 10_000;

/// The eight standard image orientation codes, plus `Undefined`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExifOrientation {
    /// Orientation could not be derived from the rotation/mirror inputs.
    Undefined,
    /// Row 0 top, column 0 left.
    Normal,
    /// Mirrored along the vertical axis.
    FlipHorizontal,
    /// Rotated 180 degrees.
    Rotate180,
    /// Mirrored along the horizontal axis.
    FlipVertical,
    /// Mirrored then rotated 90 degrees clockwise.
    Transpose,
    /// Rotated 90 degrees clockwise.
    Rotate90,
    /// Mirrored then rotated 270 degrees clockwise.
    Transverse,
    /// Rotated 270 degrees clockwise.
    Rotate270,
}

impl ExifOrientation {
    /// Numeric orientation code as written into the tag map.
    pub fn code(self) -> u16 {
        match self {
            ExifOrientation::Undefined => 0,
            ExifOrientation::Normal => 1,
            ExifOrientation::FlipHorizontal => 2,
            ExifOrientation::Rotate180 => 3,
            ExifOrientation::FlipVertical => 4,
            ExifOrientation::Transpose => 5,
            ExifOrientation::Rotate90 => 6,
            ExifOrientation::Transverse => 7,
            ExifOrientation::Rotate270 => 8,
        }
    }
}

/// Maps a total rotation and mirror flag to an orientation code.
///
/// Known quirk: 270 degrees mirrored maps to Transverse, not Rotate270.
/// Kept as-is for compatibility with previously captured data sets.
pub fn orientation_code(rotation_degrees: u32, mirrored: bool) -> ExifOrientation {
    match (rotation_degrees, mirrored) {
        (0, false) => ExifOrientation::Normal,
        (0, true) => ExifOrientation::FlipHorizontal,
        (180, false) => ExifOrientation::Rotate180,
        (180, true) => ExifOrientation::FlipVertical,
        (270, true) => ExifOrientation::Transverse,
        (90, false) => ExifOrientation::Rotate90,
        (90, true) => ExifOrientation::Transpose,
        (270, false) => ExifOrientation::Transverse,
        _ => ExifOrientation::Undefined,
    }
}

/// Exposure parameters last applied to the sensor, as reported by the device
/// handle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExposureReadout {
    /// Sensor exposure time in nanoseconds.
    pub exposure_ns: i64,
    /// Sensor sensitivity (ISO).
    pub sensitivity: u32,
}

/// Immutable tag map attached to one persisted shot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShotMetadata {
    #[serde(flatten)]
    tags: BTreeMap<String, String>,
}

impl ShotMetadata {
    /// Looks up a single tag value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Iterates over all tags in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of tags present.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// True when no tags are present.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Computes the tag map for one shot.
///
/// Pure function of the device characteristics, the session configuration,
/// the last-used exposure parameters, and the host display rotation. The
/// orientation input is the sum of display rotation and sensor orientation,
/// passed to the mapping without normalization.
pub fn compose(
    characteristics: &Characteristics,
    settings: &Settings,
    exposure: ExposureReadout,
    display_rotation: u32,
) -> ShotMetadata {
    let mirrored = characteristics.lens_facing == LensFacing::Front;
    let orientation = orientation_code(
        display_rotation + characteristics.sensor_orientation,
        mirrored,
    );

    let focal_length_mm = characteristics.focal_lengths_mm.first().copied().unwrap_or(0.0);
    let focal_numerator = (focal_length_mm * FOCAL_LENGTH_DENOMINATOR as f64).round() as i64;
    let subject_distance_m = f64::from(settings.capture.distance_cm) / 100.0;
    let exposure_s = exposure.exposure_ns as f64 * 1e-9;

    let mut tags = BTreeMap::new();
    tags.insert("Orientation".to_string(), orientation.code().to_string());
    tags.insert("Make".to_string(), title_case(&characteristics.make));
    tags.insert("Model".to_string(), title_case(&characteristics.model));
    tags.insert("Software".to_string(), SOFTWARE_TAG.to_string());
    tags.insert(
        "FocalLength".to_string(),
        format!("{focal_numerator}/{FOCAL_LENGTH_DENOMINATOR}"),
    );
    tags.insert("SubjectDistance".to_string(), subject_distance_m.to_string());
    tags.insert("ExposureTime".to_string(), exposure_s.to_string());
    tags.insert("ISOSpeed".to_string(), exposure.sensitivity.to_string());
    tags.insert(
        "ImageDescription".to_string(),
        format!("Beacon Code: {}", settings.beacon.code),
    );

    ShotMetadata { tags }
}

/// Lowercases a vendor string, then capitalizes its first character.
fn title_case(value: &str) -> String {
    let lowered = value.to_lowercase();
    let mut chars = lowered.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => lowered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::features::HardwareLevel;
    use crate::config::Settings;

    fn test_characteristics() -> Characteristics {
        Characteristics {
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
            capture_sizes: vec![(4000, 3000)],
        }
    }

    #[test]
    fn test_orientation_table() {
        assert_eq!(orientation_code(0, false), ExifOrientation::Normal);
        assert_eq!(orientation_code(0, true), ExifOrientation::FlipHorizontal);
        assert_eq!(orientation_code(180, false), ExifOrientation::Rotate180);
        assert_eq!(orientation_code(180, true), ExifOrientation::FlipVertical);
        assert_eq!(orientation_code(90, false), ExifOrientation::Rotate90);
        assert_eq!(orientation_code(90, true), ExifOrientation::Transpose);
        assert_eq!(orientation_code(270, false), ExifOrientation::Transverse);
        assert_eq!(orientation_code(45, false), ExifOrientation::Undefined);
        assert_eq!(orientation_code(360, false), ExifOrientation::Undefined);
    }

    #[test]
    fn test_orientation_270_mirrored_quirk() {
        // Pinned: this input yields Transverse, never Rotate270.
        assert_eq!(orientation_code(270, true), ExifOrientation::Transverse);
    }

    #[test]
    fn test_compose_tags() {
        let characteristics = test_characteristics();
        let mut settings = Settings::new(None).unwrap();
        settings.capture.distance_cm = 50;
        settings.beacon.code = 7;

        let exposure = ExposureReadout {
            exposure_ns: 10_000_000,
            sensitivity: 100,
        };
        let metadata = compose(&characteristics, &settings, exposure, 0);

        assert_eq!(metadata.get("Software"), Some(SOFTWARE_TAG));
        assert_eq!(metadata.get("SubjectDistance"), Some("0.5"));
        assert_eq!(metadata.get("ExposureTime"), Some("0.01"));
        assert_eq!(metadata.get("ISOSpeed"), Some("100"));
        assert_eq!(metadata.get("ImageDescription"), Some("Beacon Code: 7"));
        assert_eq!(metadata.len(), 9);
    }

    #[test]
    fn test_make_model_are_title_cased() {
        let characteristics = test_characteristics();
        let settings = Settings::new(None).unwrap();

        let metadata = compose(&characteristics, &settings, ExposureReadout::default(), 0);
        let make = metadata.get("Make").unwrap();
        assert!(make.chars().next().unwrap().is_uppercase());
        assert!(make.chars().skip(1).all(|c| !c.is_uppercase()));
    }

    #[test]
    fn test_focal_length_rational() {
        let characteristics = test_characteristics();
        let settings = Settings::new(None).unwrap();

        let metadata = compose(&characteristics, &settings, ExposureReadout::default(), 0);
        let focal = metadata.get("FocalLength").unwrap();
        assert!(focal.ends_with("/10000"));
    }
}
