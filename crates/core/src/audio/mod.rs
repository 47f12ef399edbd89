use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::{Result, WobbleError};

/// A block of mono PCM16 speech tagged with the generation that was current
/// when it was fed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub generation: u64,
    pub sample_rate: u32,
    pub samples: Vec<i16>,
}

/// Decodes a base64 payload of little-endian PCM16 samples, the format used by
/// realtime speech APIs for audio deltas.
pub fn decode_pcm16(encoded: &str) -> Result<Vec<i16>> {
    let bytes = STANDARD.decode(encoded.trim())?;
    if bytes.len() % 2 != 0 {
        return Err(WobbleError::InvalidInput(
            "pcm16 payload has an odd number of bytes",
        ));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Inverse of [`decode_pcm16`].
pub fn encode_pcm16(samples: &[i16]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    STANDARD.encode(bytes)
}

/// Unbounded multi-producer FIFO of audio chunks.
///
/// Every pushed chunk counts as pending until it is acknowledged, either by
/// the consumer after processing or by [`IngestQueue::drain`].
#[derive(Debug, Clone)]
pub struct IngestQueue {
    tx: Sender<AudioChunk>,
    rx: Receiver<AudioChunk>,
    pending: Arc<Pending>,
}

/// Unacknowledged chunk count, signalled whenever it drops to zero.
#[derive(Debug, Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for IngestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            pending: Arc::new(Pending::default()),
        }
    }

    pub fn push(&self, chunk: AudioChunk) {
        *self.pending.lock() += 1;
        // Both ends live in `self`, so the channel cannot be disconnected.
        if self.tx.send(chunk).is_err() {
            self.ack();
        }
    }

    /// Waits up to `timeout` for the next chunk.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<AudioChunk> {
        match self.rx.recv_timeout(timeout) {
            Ok(chunk) => Some(chunk),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Marks one popped chunk as fully handled.
    pub fn ack(&self) {
        let mut count = self.pending.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.pending.idle.notify_all();
        }
    }

    /// Discards and acknowledges every queued chunk, returning how many were
    /// removed.
    pub fn drain(&self) -> usize {
        let mut drained = 0;
        while self.rx.try_recv().is_ok() {
            self.ack();
            drained += 1;
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Chunks pushed but not yet acknowledged, including one being processed.
    pub fn pending(&self) -> usize {
        *self.pending.lock()
    }

    /// Blocks until every pushed chunk has been acknowledged. Returns `false`
    /// if the timeout elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.pending.lock();
        while *count > 0 {
            let Some(left) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            count = match self.pending.idle.wait_timeout(count, left) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}
