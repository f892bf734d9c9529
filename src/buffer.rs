//! Time-windowed accumulation of note events between flushes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::codec;
use crate::envelope;
use crate::error::Result;
use crate::events::NoteEvent;

/// Batch length at which the overflow observer fires.
pub const DEFAULT_MAX_BATCH_LEN: usize = 65000;

/// Wall-clock source in milliseconds since the Unix epoch.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::Relaxed);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

/// Notified synchronously from inside an append once the batch is full.
pub trait OverflowObserver {
    fn on_overflow(&mut self, pending: usize);
}

impl<F: FnMut(usize)> OverflowObserver for F {
    fn on_overflow(&mut self, pending: usize) {
        self(pending)
    }
}

/// Result of an append. `Overflow` means the caller should flush now;
/// the buffer never drops or truncates on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Append {
    Buffered,
    Overflow { pending: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub batches: u64,
    pub events: u64,
    pub bytes: u64,
}

pub struct NoteBuffer<C: Clock = SystemClock> {
    clock: C,
    base_time: Option<u64>,
    notes: Vec<NoteEvent>,
    max_len: usize,
    observer: Option<Box<dyn OverflowObserver + Send>>,
    stats: FlushStats,
}

impl NoteBuffer<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for NoteBuffer<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> NoteBuffer<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            base_time: None,
            notes: Vec::new(),
            max_len: DEFAULT_MAX_BATCH_LEN,
            observer: None,
            stats: FlushStats::default(),
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn with_observer(mut self, observer: impl OverflowObserver + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn base_time(&self) -> Option<u64> {
        self.base_time
    }

    pub fn notes(&self) -> &[NoteEvent] {
        &self.notes
    }

    pub fn stats(&self) -> FlushStats {
        self.stats
    }

    /// `velocity` is normalized to `[0, 1]` and scaled to `0..=127`.
    pub fn start_note(&mut self, note: u8, velocity: f32) -> Append {
        let velocity = (velocity * 127.0).round().clamp(0.0, u8::MAX as f32) as u8;
        self.add_note(note, velocity)
    }

    pub fn stop_note(&mut self, note: u8) -> Append {
        self.add_note(note, 0)
    }

    fn add_note(&mut self, note: u8, velocity: u8) -> Append {
        let now = self.clock.now_ms();
        let base = *self.base_time.get_or_insert(now);
        // only the low byte is kept on the wire
        let delay = now.wrapping_sub(base) as u8;

        self.notes.push(NoteEvent {
            note,
            delay,
            velocity,
        });

        let pending = self.notes.len();
        if pending < self.max_len {
            return Append::Buffered;
        }

        warn!(pending, "note buffer reached its limit, requesting emergency flush");
        if let Some(observer) = self.observer.as_mut() {
            observer.on_overflow(pending);
        }
        Append::Overflow { pending }
    }

    /// Serializes and clears the batch, returning the base64 payload.
    /// `None` when nothing is buffered.
    pub fn flush_payload(&mut self, server_time_offset: i64) -> Option<String> {
        let base = self.base_time.take()?;
        if self.notes.is_empty() {
            return None;
        }
        let notes = std::mem::take(&mut self.notes);

        let timestamp = base.wrapping_add_signed(server_time_offset) & codec::MAX_TIMESTAMP;
        let payload = codec::encode_base64(timestamp, &notes);

        let bytes = codec::encoded_len(notes.len());
        self.stats.batches += 1;
        self.stats.events += notes.len() as u64;
        self.stats.bytes += bytes as u64;
        debug!(events = notes.len(), bytes, timestamp, "flushed note batch");

        Some(payload)
    }

    /// Like [`flush_payload`](Self::flush_payload) but wrapped in the
    /// transport envelope.
    pub fn flush(&mut self, server_time_offset: i64) -> Result<Option<String>> {
        self.flush_payload(server_time_offset)
            .map(|payload| envelope::to_envelope(&payload))
            .transpose()
    }
}
