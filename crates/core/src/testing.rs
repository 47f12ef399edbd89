//! Fakes shared by the unit tests.

use std::{
    collections::{HashSet, VecDeque},
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use crate::{
    Clock, EnvelopeEngine, HeadOffset, HeadPose, ManualClock, MonotonicClock, NeckJoint,
    OffsetRecord, PoseActuator, Result, WobbleError,
};

/// Callback run from inside a fake, usually to pause the calling thread.
pub struct Hook(Mutex<Box<dyn FnMut() + Send>>);

impl Hook {
    pub fn new(hook: impl FnMut() + Send + 'static) -> Self {
        Self(Mutex::new(Box::new(hook)))
    }

    fn call(&self) {
        let mut hook = self.0.lock().unwrap();
        (*hook)();
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Hook")
    }
}

/// Manual clock that runs a hook every time something sleeps on it, before
/// time jumps to the deadline.
#[derive(Debug)]
pub struct HookedClock {
    inner: ManualClock,
    on_sleep: Hook,
}

impl HookedClock {
    pub fn new(on_sleep: impl FnMut() + Send + 'static) -> Self {
        Self {
            inner: ManualClock::new(),
            on_sleep: Hook::new(on_sleep),
        }
    }
}

impl Clock for HookedClock {
    fn now(&self) -> Instant {
        self.inner.now()
    }

    fn sleep_until(&self, deadline: Instant) {
        self.on_sleep.call();
        self.inner.sleep_until(deadline);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Target(HeadPose),
    Goto(HeadPose, Duration),
    Joint(NeckJoint, f64),
}

/// Actuator that records every accepted command with the clock time it
/// arrived at. Capabilities can be removed entirely (`Unsupported`) or made to
/// fail with a regular error by name.
#[derive(Debug)]
pub struct RecordingActuator {
    pose_capable: bool,
    joint_capable: bool,
    clock: Arc<dyn Clock>,
    pose: Mutex<HeadPose>,
    failing: Mutex<HashSet<String>>,
    log: Mutex<Vec<(Instant, Command)>>,
    pose_reads: AtomicUsize,
    on_command: Option<Hook>,
}

impl RecordingActuator {
    fn build(pose_capable: bool, joint_capable: bool) -> Self {
        Self {
            pose_capable,
            joint_capable,
            clock: Arc::new(MonotonicClock),
            pose: Mutex::new(HeadPose::default()),
            failing: Mutex::new(HashSet::new()),
            log: Mutex::new(Vec::new()),
            pose_reads: AtomicUsize::new(0),
            on_command: None,
        }
    }

    pub fn full() -> Self {
        Self::build(true, true)
    }

    pub fn joints_only() -> Self {
        Self::build(false, true)
    }

    pub fn none() -> Self {
        Self::build(false, false)
    }

    pub fn clocked(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs `hook` whenever a command is accepted, before it is recorded.
    pub fn on_command(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_command = Some(Hook::new(hook));
        self
    }

    /// Makes the named capability fail. Joint writes can be targeted
    /// individually as `set_joint_goal:<Joint>`.
    pub fn fail(&self, capability: &str) {
        self.failing.lock().unwrap().insert(capability.to_string());
    }

    pub fn recover(&self, capability: &str) {
        self.failing.lock().unwrap().remove(capability);
    }

    pub fn set_pose(&self, pose: HeadPose) {
        *self.pose.lock().unwrap() = pose;
    }

    pub fn commands(&self) -> Vec<Command> {
        self.log.lock().unwrap().iter().map(|(_, c)| *c).collect()
    }

    pub fn timed_commands(&self) -> Vec<(Instant, Command)> {
        self.log.lock().unwrap().clone()
    }

    pub fn pose_reads(&self) -> usize {
        self.pose_reads.load(Ordering::SeqCst)
    }

    fn check(&self, capable: bool, name: &'static str) -> Result<()> {
        if !capable {
            return Err(WobbleError::Unsupported(name));
        }
        if self.failing.lock().unwrap().contains(name) {
            return Err(WobbleError::Actuator(format!("{name} failed")));
        }
        Ok(())
    }

    fn push(&self, command: Command) {
        if let Some(hook) = &self.on_command {
            hook.call();
        }
        self.log.lock().unwrap().push((self.clock.now(), command));
    }
}

impl PoseActuator for RecordingActuator {
    fn current_pose(&self) -> Result<HeadPose> {
        self.pose_reads.fetch_add(1, Ordering::SeqCst);
        self.check(self.pose_capable, "current_pose")?;
        Ok(*self.pose.lock().unwrap())
    }

    fn compose_pose(&self, base: &HeadPose, offset: &HeadOffset) -> Result<HeadPose> {
        self.check(self.pose_capable, "compose_pose")?;
        Ok(base.offset_by(offset))
    }

    fn set_target(&self, pose: &HeadPose) -> Result<()> {
        self.check(self.pose_capable, "set_target")?;
        *self.pose.lock().unwrap() = *pose;
        self.push(Command::Target(*pose));
        Ok(())
    }

    fn goto_pose(&self, pose: &HeadPose, duration: Duration) -> Result<()> {
        self.check(self.pose_capable, "goto_pose")?;
        *self.pose.lock().unwrap() = *pose;
        self.push(Command::Goto(*pose, duration));
        Ok(())
    }

    fn joint_position(&self, joint: NeckJoint) -> Result<f64> {
        self.check(self.joint_capable, "joint_position")?;
        Ok(self.pose.lock().unwrap().joint(joint))
    }

    fn set_joint_goal(&self, joint: NeckJoint, goal: f64) -> Result<()> {
        self.check(self.joint_capable, "set_joint_goal")?;
        if self
            .failing
            .lock()
            .unwrap()
            .contains(&format!("set_joint_goal:{joint:?}"))
        {
            return Err(WobbleError::Actuator(format!("{joint:?} goal rejected")));
        }
        self.pose.lock().unwrap().set_joint(joint, goal);
        self.push(Command::Joint(joint, goal));
        Ok(())
    }
}

pub enum Step {
    Records(Vec<OffsetRecord>),
    Fail,
}

type FeedHook = Box<dyn FnMut() + Send>;

/// Engine that replays a fixed script, one step per `feed` call, and returns
/// no records once the script is exhausted.
pub struct ScriptedEngine {
    hop: Duration,
    steps: VecDeque<Step>,
    on_feed: Option<FeedHook>,
    feeds: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub fn new(hop: Duration, steps: Vec<Step>) -> Self {
        Self {
            hop,
            steps: steps.into(),
            on_feed: None,
            feeds: Arc::new(AtomicUsize::new(0)),
            resets: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Runs `hook` at the start of every `feed`, before records are returned.
    pub fn on_feed(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_feed = Some(Box::new(hook));
        self
    }

    pub fn feed_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.feeds)
    }

    pub fn reset_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.resets)
    }
}

impl EnvelopeEngine for ScriptedEngine {
    fn hop_duration(&self) -> Duration {
        self.hop
    }

    fn feed(&mut self, _samples: &[i16], _sample_rate: u32) -> Result<Vec<OffsetRecord>> {
        self.feeds.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.on_feed.as_mut() {
            hook();
        }
        match self.steps.pop_front() {
            Some(Step::Records(records)) => Ok(records),
            Some(Step::Fail) => Err(WobbleError::Engine("scripted failure".into())),
            None => Ok(Vec::new()),
        }
    }

    fn reset(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Record that rotates only around the roll axis.
pub fn roll(radians: f64) -> OffsetRecord {
    OffsetRecord {
        roll_rad: radians,
        ..Default::default()
    }
}
