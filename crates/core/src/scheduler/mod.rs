//! Real-time scheduler that turns speech audio into timed head offsets.
//!
//! Producers call [`MovementScheduler::feed`] from any thread. A dedicated
//! dispatch thread drains the queue, runs the envelope engine, and releases
//! one offset per hop at `anchor + latency + hop * n`. Cancellation works by
//! generation: [`MovementScheduler::reset`] bumps a counter and every queued
//! chunk or in-flight batch carrying an older value is dropped before it can
//! reach the actuator.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    audio::{decode_pcm16, AudioChunk, IngestQueue},
    ActuatorAdapter, AppConfig, BasePoseGuard, Clock, EnvelopeEngine, HeadPose, HopSchedule,
    MonotonicClock, OffsetMapping, OffsetRecord, PoseActuator, Result,
};

/// Timing state shared between producers and the dispatch thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerState {
    pub generation: u64,
    /// Clock time of the first chunk processed in this generation.
    pub base_timestamp: Option<Instant>,
    /// Hops applied, suppressed or dropped since `base_timestamp`.
    pub hops_done: u64,
    pub speaking: bool,
}

/// Counters accumulated over the scheduler's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub chunks_processed: u64,
    pub stale_chunks: u64,
    pub engine_errors: u64,
    pub decode_errors: u64,
    pub hops_applied: u64,
    pub hops_dropped: u64,
    pub hops_suppressed: u64,
    pub hops_failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    chunks_processed: AtomicU64,
    stale_chunks: AtomicU64,
    engine_errors: AtomicU64,
    decode_errors: AtomicU64,
    hops_applied: AtomicU64,
    hops_dropped: AtomicU64,
    hops_suppressed: AtomicU64,
    hops_failed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SchedulerStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        SchedulerStats {
            chunks_processed: load(&self.chunks_processed),
            stale_chunks: load(&self.stale_chunks),
            engine_errors: load(&self.engine_errors),
            decode_errors: load(&self.decode_errors),
            hops_applied: load(&self.hops_applied),
            hops_dropped: load(&self.hops_dropped),
            hops_suppressed: load(&self.hops_suppressed),
            hops_failed: load(&self.hops_failed),
        }
    }
}

/// Drives a head actuator from a live stream of speech audio.
///
/// All methods take `&self`; share the scheduler behind an [`Arc`] to feed it
/// from several threads. Dropping the scheduler stops it.
pub struct MovementScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    schedule: HopSchedule,
    mapping: OffsetMapping,
    poll_interval: Duration,
    restore_duration: Duration,
    sample_rate: u32,
    clock: Arc<dyn Clock>,
    state: Mutex<SchedulerState>,
    engine: Mutex<Box<dyn EnvelopeEngine>>,
    queue: IngestQueue,
    adapter: ActuatorAdapter,
    guard: BasePoseGuard,
    stop: AtomicBool,
    counters: Counters,
}

enum HopOutcome {
    Applied,
    Suppressed,
    Failed,
}

impl MovementScheduler {
    pub fn new(
        config: &AppConfig,
        engine: Box<dyn EnvelopeEngine>,
        actuator: Arc<dyn PoseActuator>,
    ) -> Self {
        Self::with_clock(config, engine, actuator, Arc::new(MonotonicClock))
    }

    pub fn with_clock(
        config: &AppConfig,
        engine: Box<dyn EnvelopeEngine>,
        actuator: Arc<dyn PoseActuator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let hop = engine.hop_duration();
        let shared = Shared {
            schedule: HopSchedule::new(hop, config.scheduler.latency()),
            mapping: OffsetMapping::new(config.scheduler.deadband_rad),
            poll_interval: config.scheduler.poll_interval(),
            restore_duration: config.scheduler.restore_duration(),
            sample_rate: config.audio.sample_rate,
            clock,
            state: Mutex::new(SchedulerState {
                generation: 0,
                base_timestamp: None,
                hops_done: 0,
                speaking: true,
            }),
            engine: Mutex::new(engine),
            queue: IngestQueue::new(),
            adapter: ActuatorAdapter::new(actuator, hop),
            guard: BasePoseGuard::new(),
            stop: AtomicBool::new(false),
            counters: Counters::default(),
        };

        Self {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
        }
    }

    /// Captures the base pose and spawns the dispatch thread. Does nothing if
    /// the scheduler is already running. The first chunk processed afterwards
    /// anchors a fresh hop schedule.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.lock_worker();
        if worker.is_some() {
            tracing::warn!("head wobbler already running");
            return Ok(());
        }

        let shared = &self.shared;
        shared.adapter.reprobe();
        shared.guard.capture(shared.adapter.actuator());
        {
            // A restart keeps the generation but never the old anchor.
            let mut state = shared.lock_state();
            state.base_timestamp = None;
            state.hops_done = 0;
        }
        shared.stop.store(false, Ordering::SeqCst);

        let runner = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name("head-wobbler".into())
            .spawn(move || runner.run())?;
        *worker = Some(handle);

        tracing::info!(
            hop_ms = shared.schedule.hop().as_millis() as u64,
            latency_ms = shared.schedule.latency().as_millis() as u64,
            "head wobbler started"
        );
        Ok(())
    }

    /// Stops and joins the dispatch thread, then returns the head to its base
    /// pose. Calling it again, or on a scheduler that never started, is a
    /// no-op.
    pub fn stop(&self) {
        // Held until the thread is joined so a concurrent `start` cannot
        // clear the stop flag under the exiting thread.
        let mut worker = self.lock_worker();
        let Some(handle) = worker.take() else {
            return;
        };

        self.shared.stop.store(true, Ordering::SeqCst);
        if handle.join().is_err() {
            tracing::error!("head wobbler dispatch thread panicked");
        }
        self.shared.restore_base_pose();
        drop(worker);
        tracing::info!("head wobbler stopped");
    }

    /// Abandons all queued and in-flight motion and starts a new generation.
    ///
    /// Safe to call from any thread at any time. Motion already handed to the
    /// actuator is not interrupted, but no further hop of the old generation
    /// is issued once the new generation is visible.
    pub fn reset(&self) {
        let shared = &self.shared;
        let generation = {
            let mut state = shared.lock_state();
            state.generation += 1;
            state.base_timestamp = None;
            state.hops_done = 0;
            state.speaking = false;
            state.generation
        };

        let drained = shared.queue.drain();
        shared.lock_engine().reset();
        shared.restore_base_pose();

        tracing::debug!(generation, drained, "head wobbler reset");
    }

    /// Allows or suppresses actuation without touching the hop schedule.
    pub fn set_speaking(&self, speaking: bool) {
        self.shared.lock_state().speaking = speaking;
    }

    /// Queues a base64 PCM16 audio delta. Malformed input is logged and
    /// dropped.
    pub fn feed(&self, encoded: &str) {
        match decode_pcm16(encoded) {
            Ok(samples) => self.feed_samples(samples, self.shared.sample_rate),
            Err(err) => {
                Counters::bump(&self.shared.counters.decode_errors, 1);
                tracing::warn!(error = %err, "dropping malformed audio chunk");
            }
        }
    }

    /// Queues already decoded samples, tagged with the current generation.
    pub fn feed_samples(&self, samples: Vec<i16>, sample_rate: u32) {
        let generation = self.shared.lock_state().generation;
        self.shared.queue.push(AudioChunk {
            generation,
            sample_rate,
            samples,
        });
    }

    pub fn state(&self) -> SchedulerState {
        *self.shared.lock_state()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.counters.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.lock_worker().is_some()
    }

    pub fn hop_duration(&self) -> Duration {
        self.shared.schedule.hop()
    }

    pub fn base_pose(&self) -> Option<HeadPose> {
        self.shared.guard.base_pose()
    }

    /// Chunks fed but not yet fully dispatched or discarded.
    pub fn pending_chunks(&self) -> usize {
        self.shared.queue.pending()
    }

    /// Blocks until all fed chunks have been handled. Returns `false` on
    /// timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.shared.queue.wait_idle(timeout)
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for MovementScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for MovementScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MovementScheduler")
            .field("schedule", &self.shared.schedule)
            .field("state", &self.state())
            .field("pending", &self.pending_chunks())
            .field("adapter", &self.shared.adapter)
            .finish()
    }
}

impl Shared {
    fn run(&self) {
        tracing::debug!("dispatch thread started");

        while !self.stop.load(Ordering::SeqCst) {
            let Some(chunk) = self.queue.pop_timeout(self.poll_interval) else {
                continue;
            };

            let generation = chunk.generation;
            if panic::catch_unwind(AssertUnwindSafe(|| self.process(chunk))).is_err() {
                tracing::error!(generation, "panic while dispatching chunk, skipping it");
            }
            self.queue.ack();
        }

        tracing::debug!("dispatch thread finished");
    }

    fn process(&self, chunk: AudioChunk) {
        let generation = chunk.generation;
        // `reset` bumps the generation before it resets the engine, so
        // checking under the engine lock keeps stale audio out of it.
        let mut engine = self.lock_engine();
        {
            let mut state = self.lock_state();
            if state.generation != generation {
                Counters::bump(&self.counters.stale_chunks, 1);
                tracing::trace!(generation, current = state.generation, "skipping stale chunk");
                return;
            }
            if state.base_timestamp.is_none() {
                state.base_timestamp = Some(self.clock.now());
                tracing::debug!(generation, "anchored hop schedule");
            }
        }

        let result = engine.feed(&chunk.samples, chunk.sample_rate);
        drop(engine);
        let records = match result {
            Ok(records) => records,
            Err(err) => {
                Counters::bump(&self.counters.engine_errors, 1);
                tracing::warn!(generation, error = %err, "envelope engine rejected chunk");
                return;
            }
        };

        Counters::bump(&self.counters.chunks_processed, 1);
        self.dispatch(generation, &records);
    }

    fn dispatch(&self, generation: u64, records: &[OffsetRecord]) {
        let mut index = 0;

        while index < records.len() {
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
            let Some((anchor, hops_done)) = self.slot(generation) else {
                return;
            };

            let deadline = self.schedule.deadline(anchor, hops_done);
            let now = self.clock.now();

            // The last record of a batch is never dropped.
            let remaining = (records.len() - index) as u64;
            let lag = self.schedule.lag_hops(deadline, now);
            let dropped = lag.min(remaining - 1);
            if dropped > 0 {
                if !self.advance(generation, dropped) {
                    return;
                }
                Counters::bump(&self.counters.hops_dropped, dropped);
                tracing::debug!(generation, lag, dropped, "behind schedule, dropping hops");
                index += dropped as usize;
                continue;
            }

            if deadline > now {
                self.clock.sleep_until(deadline);
                if self.stop.load(Ordering::SeqCst) {
                    return;
                }
            }

            let Some(speaking) = self.speaking_in(generation) else {
                return;
            };

            let outcome = self.apply(speaking, &records[index]);
            if !self.advance(generation, 1) {
                return;
            }
            let counter = match outcome {
                HopOutcome::Applied => &self.counters.hops_applied,
                HopOutcome::Suppressed => &self.counters.hops_suppressed,
                HopOutcome::Failed => &self.counters.hops_failed,
            };
            Counters::bump(counter, 1);
            index += 1;
        }
    }

    fn apply(&self, speaking: bool, record: &OffsetRecord) -> HopOutcome {
        if !speaking {
            return HopOutcome::Suppressed;
        }
        let Some(offset) = self.mapping.map(record) else {
            return HopOutcome::Suppressed;
        };

        match self.adapter.apply(&offset) {
            Some(_) => {
                self.guard.mark_displaced();
                HopOutcome::Applied
            }
            None => HopOutcome::Failed,
        }
    }

    /// Anchor and hop counter, if `generation` is still current.
    fn slot(&self, generation: u64) -> Option<(Instant, u64)> {
        let state = self.lock_state();
        if state.generation != generation {
            return None;
        }
        state.base_timestamp.map(|anchor| (anchor, state.hops_done))
    }

    fn speaking_in(&self, generation: u64) -> Option<bool> {
        let state = self.lock_state();
        (state.generation == generation).then_some(state.speaking)
    }

    /// Adds `hops` to the counter unless a reset has started a new
    /// generation in the meantime.
    fn advance(&self, generation: u64, hops: u64) -> bool {
        let mut state = self.lock_state();
        if state.generation != generation {
            return false;
        }
        state.hops_done += hops;
        true
    }

    fn restore_base_pose(&self) {
        self.guard
            .restore(self.adapter.actuator(), self.restore_duration);
    }

    // The state is plain data, so a panic while it was held cannot leave it
    // half-updated.
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_engine(&self) -> MutexGuard<'_, Box<dyn EnvelopeEngine>> {
        self.engine.lock().unwrap_or_else(|e| e.into_inner())
    }
}
