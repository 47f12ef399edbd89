use serde::{Deserialize, Serialize};

use crate::OffsetRecord;

/// Offset in the units the actuator consumes: metres and radians.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadOffset {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl From<&OffsetRecord> for HeadOffset {
    fn from(record: &OffsetRecord) -> Self {
        Self {
            x: record.x_mm / 1000.0,
            y: record.y_mm / 1000.0,
            z: record.z_mm / 1000.0,
            roll: record.roll_rad,
            pitch: record.pitch_rad,
            yaw: record.yaw_rad,
        }
    }
}

/// Routes engine records to actuator offsets, filtering out noise-level
/// motion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetMapping {
    deadband_rad: f64,
}

impl OffsetMapping {
    pub fn new(deadband_rad: f64) -> Self {
        Self {
            deadband_rad: deadband_rad.abs(),
        }
    }

    pub fn deadband(&self) -> f64 {
        self.deadband_rad
    }

    /// Only the rotational components are compared against the deadband;
    /// translation alone never moves the head.
    pub fn passes(&self, record: &OffsetRecord) -> bool {
        [record.roll_rad, record.pitch_rad, record.yaw_rad]
            .iter()
            .any(|angle| angle.abs() > self.deadband_rad)
    }

    pub fn map(&self, record: &OffsetRecord) -> Option<HeadOffset> {
        self.passes(record).then(|| HeadOffset::from(record))
    }
}
