use std::{
    fmt,
    sync::Mutex,
    time::{Duration, Instant},
};

/// Source of monotonic time for the dispatch loop.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;

    /// Blocks the calling thread until `deadline` has passed.
    fn sleep_until(&self, deadline: Instant);
}

/// Wall clock backed by [`Instant`] and real thread sleeps.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) {
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

/// Clock that only moves when told to. Sleeping jumps straight to the
/// deadline, which makes hop timing exactly reproducible in tests.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    /// The instant this clock reported before it was ever advanced.
    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// Time elapsed since [`ManualClock::origin`].
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn advance(&self, delta: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep_until(&self, deadline: Instant) {
        let target = deadline.saturating_duration_since(self.origin);
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        if target > *elapsed {
            *elapsed = target;
        }
    }
}

/// Deadline arithmetic for one epoch of hops.
///
/// Hop `n` is due at `anchor + latency + n * hop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopSchedule {
    hop: Duration,
    latency: Duration,
}

impl HopSchedule {
    /// A zero hop is bumped to one nanosecond to keep the lag division defined.
    pub fn new(hop: Duration, latency: Duration) -> Self {
        Self {
            hop: hop.max(Duration::from_nanos(1)),
            latency,
        }
    }

    pub fn hop(&self) -> Duration {
        self.hop
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub fn deadline(&self, anchor: Instant, hops_done: u64) -> Instant {
        let offset = self.hop.as_nanos().saturating_mul(u128::from(hops_done));
        let offset = Duration::from_nanos(u64::try_from(offset).unwrap_or(u64::MAX));
        anchor + self.latency + offset
    }

    /// Number of whole hops `now` is behind `deadline`. Zero unless the
    /// deadline was missed by at least one full hop.
    pub fn lag_hops(&self, deadline: Instant, now: Instant) -> u64 {
        let behind = now.saturating_duration_since(deadline);
        if behind < self.hop {
            return 0;
        }
        u64::try_from(behind.as_nanos() / self.hop.as_nanos()).unwrap_or(u64::MAX)
    }
}
