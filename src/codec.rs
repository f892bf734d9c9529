//! Binary wire format for note batches.
//!
//! A batch is a 6-byte little-endian timestamp followed by one 3-byte
//! `(note, delay, velocity)` group per event:
//!
//! ```text
//! 0      6      9      12
//! | ts48 | ev 0 | ev 1 | ...
//! ```
//!
//! The binary form travels base64-encoded (standard alphabet, padded).

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::events::NoteEvent;

pub const HEADER_SIZE: usize = 6;
pub const EVENT_SIZE: usize = 3;
pub const MAX_TIMESTAMP: u64 = (1 << 48) - 1;

/// A decoded batch: base timestamp plus events in playback order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteBatch {
    pub timestamp: u64,
    pub notes: Vec<NoteEvent>,
}

impl NoteBatch {
    /// Absolute play time of each event, with the sender's server offset removed.
    pub fn schedule(&self, server_time_offset: i64) -> impl Iterator<Item = (i64, NoteEvent)> + '_ {
        let base = self.timestamp as i64 - server_time_offset;
        self.notes
            .iter()
            .map(move |note| (base + note.delay as i64, *note))
    }
}

pub fn encoded_len(events: usize) -> usize {
    HEADER_SIZE + EVENT_SIZE * events
}

/// Serializes a batch. Only the low 48 bits of `timestamp` are kept.
pub fn encode_batch(timestamp: u64, notes: &[NoteEvent]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(notes.len()));
    write_u48(&mut buf, timestamp);
    for note in notes {
        buf.push(note.note);
        buf.push(note.delay);
        buf.push(note.velocity);
    }
    buf
}

/// Parses a batch. A trailing partial group of 1 or 2 bytes is ignored.
pub fn decode_batch(bytes: &[u8]) -> Result<NoteBatch> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::MalformedPayload { len: bytes.len() });
    }

    let (header, body) = bytes.split_at(HEADER_SIZE);
    let notes = body
        .chunks_exact(EVENT_SIZE)
        .map(|group| NoteEvent::new(group[0], group[1], group[2]))
        .collect();

    Ok(NoteBatch {
        timestamp: read_u48(header),
        notes,
    })
}

pub fn encode_base64(timestamp: u64, notes: &[NoteEvent]) -> String {
    STANDARD.encode(encode_batch(timestamp, notes))
}

/// Inverse of [`encode_base64`], used on the receiving side.
pub fn decode(payload: &str) -> Result<NoteBatch> {
    let bytes = STANDARD.decode(payload.trim())?;
    decode_batch(&bytes)
}

fn write_u48(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes()[..HEADER_SIZE]);
}

fn read_u48(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw[..HEADER_SIZE].copy_from_slice(&bytes[..HEADER_SIZE]);
    u64::from_le_bytes(raw)
}
