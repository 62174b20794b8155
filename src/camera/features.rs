//! Static capability descriptors for attached cameras.
//!
//! Hardware level and lens facing arrive from the host as small integers;
//! both directions of the mapping go through fixed tables built into the
//! binary, treated as immutable configuration data.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Host-advertised implementation completeness of a camera.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HardwareLevel {
    /// Baseline feature set.
    Limited,
    /// Full manual control support.
    Full,
    /// Compatibility shim over a deprecated driver stack.
    Legacy,
    /// Full plus extended per-frame control.
    Three,
    /// Externally attached device.
    External,
}

const HARDWARE_LEVEL_TABLE: &[(i32, HardwareLevel)] = &[
    (0, HardwareLevel::Limited),
    (1, HardwareLevel::Full),
    (2, HardwareLevel::Legacy),
    (3, HardwareLevel::Three),
    (4, HardwareLevel::External),
];

impl HardwareLevel {
    /// Resolves a host integer id to a variant.
    pub fn from_id(id: i32) -> Option<Self> {
        HARDWARE_LEVEL_TABLE
            .iter()
            .find(|(table_id, _)| *table_id == id)
            .map(|(_, level)| *level)
    }

    /// The host integer id for this variant.
    pub fn id(self) -> i32 {
        // The table is total over the variants, so the lookup cannot miss.
        HARDWARE_LEVEL_TABLE
            .iter()
            .find(|(_, level)| *level == self)
            .map(|(id, _)| *id)
            .unwrap_or(-1)
    }
}

/// Which way a camera's lens points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LensFacing {
    /// Same side as the display; images are mirrored.
    Front,
    /// Opposite side of the display.
    Back,
    /// Externally attached, orientation unknown.
    External,
}

const LENS_FACING_TABLE: &[(i32, LensFacing)] = &[
    (0, LensFacing::Front),
    (1, LensFacing::Back),
    (2, LensFacing::External),
];

impl LensFacing {
    /// Resolves a host integer id to a variant.
    pub fn from_id(id: i32) -> Option<Self> {
        LENS_FACING_TABLE
            .iter()
            .find(|(table_id, _)| *table_id == id)
            .map(|(_, facing)| *facing)
    }

    /// The host integer id for this variant.
    pub fn id(self) -> i32 {
        LENS_FACING_TABLE
            .iter()
            .find(|(_, facing)| *facing == self)
            .map(|(id, _)| *id)
            .unwrap_or(-1)
    }
}

impl fmt::Display for LensFacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LensFacing::Front => write!(f, "Front"),
            LensFacing::Back => write!(f, "Back"),
            LensFacing::External => write!(f, "External"),
        }
    }
}

/// Inventory record for one attached camera.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraFeatures {
    /// Host identifier of the camera.
    pub id: String,
    /// Hardware level, when the host reports a known id.
    pub hardware_level: Option<HardwareLevel>,
    /// Lens facing, when the host reports a known id.
    pub lens_facing: Option<LensFacing>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_level_roundtrip() {
        for id in 0..5 {
            let level = HardwareLevel::from_id(id).unwrap();
            assert_eq!(level.id(), id);
        }
        assert_eq!(HardwareLevel::from_id(99), None);
    }

    #[test]
    fn test_lens_facing_roundtrip() {
        for id in 0..3 {
            let facing = LensFacing::from_id(id).unwrap();
            assert_eq!(facing.id(), id);
        }
        assert_eq!(LensFacing::from_id(-1), None);
    }
}
