use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
    time::Duration,
};

use crate::{HeadPose, PoseActuator};

/// Remembers the head's resting pose and brings the head back to it.
#[derive(Debug, Default)]
pub struct BasePoseGuard {
    pose: Mutex<Option<HeadPose>>,
    displaced: AtomicBool,
}

impl BasePoseGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads and stores the actuator's current pose. Failure clears the stored
    /// pose, which disables restoration.
    pub fn capture(&self, actuator: &dyn PoseActuator) -> Option<HeadPose> {
        let captured = match actuator.current_pose() {
            Ok(pose) => {
                tracing::debug!(?pose, "captured base pose");
                Some(pose)
            }
            Err(err) if err.is_unsupported() => {
                tracing::info!("actuator cannot report its pose, base pose restoration disabled");
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to capture base pose");
                None
            }
        };

        *self.lock() = captured;
        self.displaced.store(false, Ordering::SeqCst);
        captured
    }

    pub fn base_pose(&self) -> Option<HeadPose> {
        *self.lock()
    }

    /// Records that an offset reached the actuator since the last restore.
    pub fn mark_displaced(&self) {
        self.displaced.store(true, Ordering::SeqCst);
    }

    pub fn is_displaced(&self) -> bool {
        self.displaced.load(Ordering::SeqCst)
    }

    /// Moves the head back to the captured pose if it was displaced. Returns
    /// `true` when a command was accepted. A rejected restore leaves the head
    /// marked displaced so the next call tries again.
    pub fn restore(&self, actuator: &dyn PoseActuator, duration: Duration) -> bool {
        if !self.is_displaced() {
            return false;
        }
        let Some(base) = self.base_pose() else {
            self.displaced.store(false, Ordering::SeqCst);
            return false;
        };

        let result = actuator.goto_pose(&base, duration).or_else(|err| {
            if !err.is_unsupported() {
                tracing::warn!(error = %err, "timed move to base pose failed, setting target");
            }
            actuator.set_target(&base)
        });

        match result {
            Ok(()) => {
                self.displaced.store(false, Ordering::SeqCst);
                tracing::debug!("restored base pose");
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not restore base pose");
                false
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<HeadPose>> {
        self.pose.lock().unwrap_or_else(|e| e.into_inner())
    }
}
