//! Head actuator abstraction and the tiered strategy used to push offsets to
//! it.
//!
//! Robots differ in what their SDK exposes. [`PoseActuator`] therefore models
//! every operation as an optional capability that defaults to
//! [`WobbleError::Unsupported`], and [`ActuatorAdapter`] walks the available
//! strategies in priority order until one succeeds.

mod simulated;

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{HeadOffset, Result, WobbleError};

pub use simulated::SimulatedHead;

/// Absolute head pose: translation in metres, rotation in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl HeadPose {
    /// Component-wise sum of the pose and an offset.
    pub fn offset_by(&self, offset: &HeadOffset) -> Self {
        Self {
            x: self.x + offset.x,
            y: self.y + offset.y,
            z: self.z + offset.z,
            roll: self.roll + offset.roll,
            pitch: self.pitch + offset.pitch,
            yaw: self.yaw + offset.yaw,
        }
    }

    pub fn joint(&self, joint: NeckJoint) -> f64 {
        match joint {
            NeckJoint::Roll => self.roll,
            NeckJoint::Pitch => self.pitch,
            NeckJoint::Yaw => self.yaw,
        }
    }

    pub fn set_joint(&mut self, joint: NeckJoint, value: f64) {
        match joint {
            NeckJoint::Roll => self.roll = value,
            NeckJoint::Pitch => self.pitch = value,
            NeckJoint::Yaw => self.yaw = value,
        }
    }
}

/// Rotational joints of the neck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NeckJoint {
    Roll,
    Pitch,
    Yaw,
}

impl NeckJoint {
    pub const ALL: [NeckJoint; 3] = [NeckJoint::Roll, NeckJoint::Pitch, NeckJoint::Yaw];

    fn delta(self, offset: &HeadOffset) -> f64 {
        match self {
            NeckJoint::Roll => offset.roll,
            NeckJoint::Pitch => offset.pitch,
            NeckJoint::Yaw => offset.yaw,
        }
    }
}

/// Connection to a physical (or simulated) head.
///
/// Every method is an optional capability; the default implementation
/// reports it as unsupported. Implementations are shared with the rest of the
/// application and may fail at any time.
pub trait PoseActuator: Send + Sync {
    fn current_pose(&self) -> Result<HeadPose> {
        Err(WobbleError::Unsupported("current_pose"))
    }

    /// Composes `offset` onto `base` using the robot's own kinematics.
    fn compose_pose(&self, _base: &HeadPose, _offset: &HeadOffset) -> Result<HeadPose> {
        Err(WobbleError::Unsupported("compose_pose"))
    }

    /// Sets the pose target immediately.
    fn set_target(&self, _pose: &HeadPose) -> Result<()> {
        Err(WobbleError::Unsupported("set_target"))
    }

    /// Moves to `pose` over `duration`.
    fn goto_pose(&self, _pose: &HeadPose, _duration: Duration) -> Result<()> {
        Err(WobbleError::Unsupported("goto_pose"))
    }

    fn joint_position(&self, _joint: NeckJoint) -> Result<f64> {
        Err(WobbleError::Unsupported("joint_position"))
    }

    fn set_joint_goal(&self, _joint: NeckJoint, _goal: f64) -> Result<()> {
        Err(WobbleError::Unsupported("set_joint_goal"))
    }
}

/// Strategies for applying an offset, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Compose with the live pose and submit a single target.
    Compose,
    /// Add the offset to the live pose and issue a short move.
    Goto,
    /// Write per-joint goals relative to each joint's present position.
    Joints,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Compose, Tier::Goto, Tier::Joints];

    fn index(self) -> usize {
        match self {
            Tier::Compose => 0,
            Tier::Goto => 1,
            Tier::Joints => 2,
        }
    }
}

/// Capability-probed strategy chain over a [`PoseActuator`].
///
/// A tier that reports `Unsupported` is skipped on later hops until
/// [`ActuatorAdapter::reprobe`] is called. Any other failure falls through to
/// the next tier for this hop only.
pub struct ActuatorAdapter {
    actuator: Arc<dyn PoseActuator>,
    move_duration: Duration,
    unavailable: [AtomicBool; 3],
}

impl ActuatorAdapter {
    /// `move_duration` is the length of the tier-2 move, normally one hop.
    pub fn new(actuator: Arc<dyn PoseActuator>, move_duration: Duration) -> Self {
        Self {
            actuator,
            move_duration,
            unavailable: Default::default(),
        }
    }

    pub fn actuator(&self) -> &dyn PoseActuator {
        self.actuator.as_ref()
    }

    pub fn is_available(&self, tier: Tier) -> bool {
        !self.unavailable[tier.index()].load(Ordering::Relaxed)
    }

    /// Forgets which tiers were found unsupported.
    pub fn reprobe(&self) {
        for flag in &self.unavailable {
            flag.store(false, Ordering::Relaxed);
        }
    }

    /// Applies `offset` with the first tier that succeeds. Returns `None` when
    /// every tier failed or none is available, in which case nothing moved.
    pub fn apply(&self, offset: &HeadOffset) -> Option<Tier> {
        for tier in Tier::ALL {
            if !self.is_available(tier) {
                continue;
            }

            match self.try_tier(tier, offset) {
                Ok(()) => return Some(tier),
                Err(err) if err.is_unsupported() => {
                    tracing::debug!(?tier, error = %err, "actuator tier unsupported, disabling");
                    self.unavailable[tier.index()].store(true, Ordering::Relaxed);
                }
                Err(err) => {
                    tracing::warn!(?tier, error = %err, "actuator tier failed, falling through");
                }
            }
        }

        None
    }

    fn try_tier(&self, tier: Tier, offset: &HeadOffset) -> Result<()> {
        let actuator = self.actuator();
        match tier {
            Tier::Compose => {
                let current = actuator.current_pose()?;
                let target = actuator.compose_pose(&current, offset)?;
                actuator.set_target(&target)
            }
            Tier::Goto => {
                let target = actuator.current_pose()?.offset_by(offset);
                actuator.goto_pose(&target, self.move_duration)
            }
            Tier::Joints => self.write_joints(offset),
        }
    }

    fn write_joints(&self, offset: &HeadOffset) -> Result<()> {
        let actuator = self.actuator();
        let mut written = 0;
        let mut first_error = None;

        for joint in NeckJoint::ALL {
            let result = actuator
                .joint_position(joint)
                .and_then(|present| actuator.set_joint_goal(joint, present + joint.delta(offset)));
            match result {
                Ok(()) => written += 1,
                Err(err) => {
                    if !err.is_unsupported() {
                        tracing::warn!(?joint, error = %err, "joint write failed");
                    }
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) if written == 0 => Err(err),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for ActuatorAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let available: Vec<Tier> = Tier::ALL
            .into_iter()
            .filter(|tier| self.is_available(*tier))
            .collect();
        f.debug_struct("ActuatorAdapter")
            .field("move_duration", &self.move_duration)
            .field("available", &available)
            .finish()
    }
}
