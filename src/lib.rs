//! Compact binary encoding of timestamped note events for realtime
//! collaboration transports.
//!
//! Note on/off events accumulate in a [`NoteBuffer`] with millisecond delays
//! relative to the batch's first event. A flush serializes the batch as a
//! 48-bit little-endian timestamp followed by `(note, delay, velocity)` byte
//! triples, base64-encodes it and wraps it in the transport envelope.
//! [`codec::decode`] reverses the payload on the receiving side.

pub mod buffer;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod events;
pub mod relay;

pub use buffer::{Append, Clock, FlushStats, ManualClock, NoteBuffer, OverflowObserver, SystemClock};
pub use codec::{NoteBatch, decode, encode_base64};
pub use config::RelayConfig;
pub use error::{Error, Result};
pub use events::{KeyMap, MidiMessage, NoteEvent, key_name};
pub use relay::{RelayHandle, RelayIntake, spawn_relay, spawn_relay_with_clock};
