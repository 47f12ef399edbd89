use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard,
    },
    time::Duration,
};

use crate::{HeadOffset, Result};

use super::{HeadPose, NeckJoint, PoseActuator};

/// In-memory head that accepts every capability and tracks the resulting
/// pose. Useful for dry runs without hardware.
#[derive(Debug, Default)]
pub struct SimulatedHead {
    pose: Mutex<HeadPose>,
    commands: AtomicU64,
}

impl SimulatedHead {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pose(pose: HeadPose) -> Self {
        Self {
            pose: Mutex::new(pose),
            commands: AtomicU64::new(0),
        }
    }

    pub fn pose(&self) -> HeadPose {
        *self.lock()
    }

    /// Number of movement commands received so far.
    pub fn commands(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, HeadPose> {
        self.pose.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, pose: HeadPose) {
        *self.lock() = pose;
        self.commands.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            roll = pose.roll,
            pitch = pose.pitch,
            yaw = pose.yaw,
            "simulated head moved"
        );
    }
}

impl PoseActuator for SimulatedHead {
    fn current_pose(&self) -> Result<HeadPose> {
        Ok(self.pose())
    }

    fn compose_pose(&self, base: &HeadPose, offset: &HeadOffset) -> Result<HeadPose> {
        Ok(base.offset_by(offset))
    }

    fn set_target(&self, pose: &HeadPose) -> Result<()> {
        self.record(*pose);
        Ok(())
    }

    fn goto_pose(&self, pose: &HeadPose, _duration: Duration) -> Result<()> {
        self.record(*pose);
        Ok(())
    }

    fn joint_position(&self, joint: NeckJoint) -> Result<f64> {
        Ok(self.pose().joint(joint))
    }

    fn set_joint_goal(&self, joint: NeckJoint, goal: f64) -> Result<()> {
        let mut pose = self.pose();
        pose.set_joint(joint, goal);
        self.record(pose);
        Ok(())
    }
}
