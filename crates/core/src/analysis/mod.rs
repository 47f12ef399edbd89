use std::{collections::VecDeque, f64::consts::TAU, fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Result, WobbleError};

/// Hop granularity of [`SwayEngine`].
pub const HOP_MS: u64 = 10;
const FRAME_MS: u64 = 20;

const SENS_DB_OFFSET: f64 = 4.0;
const VAD_DB_ON: f64 = -35.0;
const VAD_DB_OFF: f64 = -45.0;
const VAD_ATTACK_MS: f64 = 40.0;
const VAD_RELEASE_MS: f64 = 250.0;
const LOUDNESS_DB_LOW: f64 = -46.0;
const LOUDNESS_DB_HIGH: f64 = -18.0;
const LOUDNESS_GAMMA: f64 = 0.9;
const SWAY_ATTACK_MS: f64 = 50.0;
const SWAY_RELEASE_MS: f64 = 250.0;

/// Head offset for one hop as produced by an envelope engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OffsetRecord {
    pub x_mm: f64,
    pub y_mm: f64,
    pub z_mm: f64,
    pub roll_rad: f64,
    pub pitch_rad: f64,
    pub yaw_rad: f64,
}

/// Turns a stream of speech samples into one [`OffsetRecord`] per hop.
///
/// Implementations keep state across calls, so a hop may straddle two chunks.
/// A failed `feed` must leave that state as it was before the call.
pub trait EnvelopeEngine: Send {
    /// Time covered by each record returned from [`EnvelopeEngine::feed`].
    fn hop_duration(&self) -> Duration;

    fn feed(&mut self, samples: &[i16], sample_rate: u32) -> Result<Vec<OffsetRecord>>;

    /// Forgets all accumulated audio and motion state.
    fn reset(&mut self);
}

#[derive(Debug, Clone, Copy)]
struct Oscillator {
    hz: f64,
    amplitude: f64,
    phase: f64,
}

impl Oscillator {
    const fn new(hz: f64, amplitude: f64, phase: f64) -> Self {
        Self { hz, amplitude, phase }
    }

    fn at(&self, t: f64, envelope: f64) -> f64 {
        self.amplitude * envelope * (TAU * self.hz * t + self.phase).sin()
    }
}

const PITCH: Oscillator = Oscillator::new(2.2, 0.0785, 0.0);
const YAW: Oscillator = Oscillator::new(0.6, 0.1309, 0.9);
const ROLL: Oscillator = Oscillator::new(1.3, 0.0393, 2.1);
const X_MM: Oscillator = Oscillator::new(0.35, 4.5, 0.4);
const Y_MM: Oscillator = Oscillator::new(0.45, 3.75, 1.7);
const Z_MM: Oscillator = Oscillator::new(0.25, 2.25, 2.9);

/// Loudness-driven sway generator.
///
/// Each hop measures the RMS level of the most recent frame, gates it with a
/// hysteresis voice detector, and scales a set of slow oscillators by the
/// smoothed loudness. Silence yields all-zero records.
pub struct SwayEngine {
    sample_rate: Option<u32>,
    window: VecDeque<f64>,
    since_hop: usize,
    voiced: bool,
    gate_ms: f64,
    envelope: f64,
    t: f64,
}

impl Default for SwayEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SwayEngine {
    pub fn new() -> Self {
        Self {
            sample_rate: None,
            window: VecDeque::new(),
            since_hop: 0,
            voiced: false,
            gate_ms: 0.0,
            envelope: 0.0,
            t: 0.0,
        }
    }

    /// Smoothed loudness in `[0, 1]` after the last emitted hop.
    pub fn envelope(&self) -> f64 {
        self.envelope
    }

    fn step(&mut self) -> OffsetRecord {
        let hop_s = HOP_MS as f64 / 1000.0;
        let db = level_db(&self.window) + SENS_DB_OFFSET;

        self.update_gate(db);
        let target = if self.voiced { loudness(db) } else { 0.0 };
        let tau_ms = if target > self.envelope {
            SWAY_ATTACK_MS
        } else {
            SWAY_RELEASE_MS
        };
        let coeff = 1.0 - (-(HOP_MS as f64) / tau_ms).exp();
        self.envelope += (target - self.envelope) * coeff;
        if self.envelope < 1e-6 {
            self.envelope = 0.0;
        }

        self.t += hop_s;
        let (t, env) = (self.t, self.envelope);
        OffsetRecord {
            x_mm: X_MM.at(t, env),
            y_mm: Y_MM.at(t, env),
            z_mm: Z_MM.at(t, env),
            roll_rad: ROLL.at(t, env),
            pitch_rad: PITCH.at(t, env),
            yaw_rad: YAW.at(t, env),
        }
    }

    fn update_gate(&mut self, db: f64) {
        let hop = HOP_MS as f64;
        if self.voiced {
            if db < VAD_DB_OFF {
                self.gate_ms += hop;
                if self.gate_ms >= VAD_RELEASE_MS {
                    self.voiced = false;
                    self.gate_ms = 0.0;
                }
            } else {
                self.gate_ms = 0.0;
            }
        } else if db > VAD_DB_ON {
            self.gate_ms += hop;
            if self.gate_ms >= VAD_ATTACK_MS {
                self.voiced = true;
                self.gate_ms = 0.0;
            }
        } else {
            self.gate_ms = 0.0;
        }
    }
}

impl EnvelopeEngine for SwayEngine {
    fn hop_duration(&self) -> Duration {
        Duration::from_millis(HOP_MS)
    }

    fn feed(&mut self, samples: &[i16], sample_rate: u32) -> Result<Vec<OffsetRecord>> {
        if sample_rate == 0 {
            return Err(WobbleError::InvalidInput("sample rate must be positive"));
        }
        if samples.is_empty() {
            return Ok(Vec::new());
        }

        if self.sample_rate != Some(sample_rate) {
            if self.sample_rate.is_some() {
                tracing::debug!(sample_rate, "sample rate changed, clearing frame window");
            }
            self.sample_rate = Some(sample_rate);
            self.window.clear();
            self.since_hop = 0;
        }

        let per_ms = f64::from(sample_rate) / 1000.0;
        let hop_samples = ((per_ms * HOP_MS as f64) as usize).max(1);
        let frame_samples = ((per_ms * FRAME_MS as f64) as usize).max(hop_samples);

        let mut records = Vec::with_capacity((self.since_hop + samples.len()) / hop_samples);
        for &sample in samples {
            if self.window.len() == frame_samples {
                self.window.pop_front();
            }
            self.window.push_back(f64::from(sample) / 32_768.0);
            self.since_hop += 1;
            if self.since_hop == hop_samples {
                self.since_hop = 0;
                records.push(self.step());
            }
        }

        Ok(records)
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

impl fmt::Debug for SwayEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwayEngine")
            .field("sample_rate", &self.sample_rate)
            .field("window", &self.window.len())
            .field("since_hop", &self.since_hop)
            .field("voiced", &self.voiced)
            .field("envelope", &self.envelope)
            .finish()
    }
}

fn level_db(window: &VecDeque<f64>) -> f64 {
    if window.is_empty() {
        return f64::NEG_INFINITY;
    }
    let sum: f64 = window.iter().map(|s| s * s).sum();
    let rms = (sum / window.len() as f64).sqrt();
    20.0 * (rms + 1e-12).log10()
}

fn loudness(db: f64) -> f64 {
    let normalised = (db - LOUDNESS_DB_LOW) / (LOUDNESS_DB_HIGH - LOUDNESS_DB_LOW);
    normalised.clamp(0.0, 1.0).powf(LOUDNESS_GAMMA)
}
