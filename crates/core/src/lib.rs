//! Core library for the head wobbler.
//!
//! Speech audio streamed to a desktop robot is turned into small head
//! movements that stay in sync with what is being said. Each module owns one
//! piece of that pipeline: decoding and queueing audio, turning it into
//! per-hop offsets, timing those hops, and pushing them to whatever actuator
//! capabilities the robot exposes.

pub mod actuator;
pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod guard;
pub mod mapping;
pub mod scheduler;
pub mod timeline;

#[cfg(test)]
mod testing;

pub use actuator::{ActuatorAdapter, HeadPose, NeckJoint, PoseActuator, SimulatedHead, Tier};
pub use analysis::{EnvelopeEngine, OffsetRecord, SwayEngine, HOP_MS};
pub use audio::{decode_pcm16, encode_pcm16, AudioChunk, IngestQueue};
pub use config::{AppConfig, AudioConfig, SchedulerConfig};
pub use error::{Result, WobbleError};
pub use guard::BasePoseGuard;
pub use mapping::{HeadOffset, OffsetMapping};
pub use scheduler::{MovementScheduler, SchedulerState, SchedulerStats};
pub use timeline::{Clock, HopSchedule, ManualClock, MonotonicClock};
