use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;

/// One entry of a batch. `delay` is milliseconds since the batch base
/// timestamp, not since the previous event. A `velocity` of 0 is a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub note: u8,
    pub delay: u8,
    pub velocity: u8,
}

impl NoteEvent {
    pub fn new(note: u8, delay: u8, velocity: u8) -> Self {
        Self {
            note,
            delay,
            velocity,
        }
    }

    pub fn is_release(&self) -> bool {
        self.velocity == 0
    }

    pub fn message(&self) -> MidiMessage {
        if self.is_release() {
            MidiMessage::NoteOff { pitch: self.note }
        } else {
            MidiMessage::NoteOn {
                pitch: self.note,
                velocity: self.velocity,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { pitch: u8, velocity: u8 },
    NoteOff { pitch: u8 },
}

impl MidiMessage {
    /// Decodes a short message packed as `status | note << 8 | velocity << 16`.
    /// Anything other than note on/off yields `None`.
    pub fn from_packed(word: u32) -> Option<Self> {
        let status = (word & 0xFF) as u8;
        let pitch = ((word >> 8) & 0xFF) as u8;
        let velocity = ((word >> 16) & 0xFF) as u8;
        Self::from_parts(status, pitch, velocity)
    }

    pub fn from_bytes(msg: &[u8]) -> Option<Self> {
        match msg {
            [status, pitch, velocity, ..] => Self::from_parts(*status, *pitch, *velocity),
            [status, pitch] if status & 0xF0 == NOTE_OFF => Some(Self::NoteOff { pitch: *pitch }),
            _ => None,
        }
    }

    /// Parses a line of hex bytes such as `90 3C 7F`.
    pub fn parse_hex(line: &str) -> Result<Option<Self>> {
        let bytes = line
            .split_whitespace()
            .map(|tok| u8::from_str_radix(tok.trim_start_matches("0x"), 16))
            .collect::<std::result::Result<Vec<u8>, _>>()
            .map_err(|_| Error::InvalidMidiLine(line.to_string()))?;
        if bytes.is_empty() {
            return Err(Error::InvalidMidiLine(line.to_string()));
        }
        Ok(Self::from_bytes(&bytes))
    }

    fn from_parts(status: u8, pitch: u8, velocity: u8) -> Option<Self> {
        match status & 0xF0 {
            NOTE_ON if velocity == 0 => Some(Self::NoteOff { pitch }),
            NOTE_ON => Some(Self::NoteOn { pitch, velocity }),
            NOTE_OFF => Some(Self::NoteOff { pitch }),
            _ => None,
        }
    }

    pub fn pitch(&self) -> u8 {
        match self {
            Self::NoteOn { pitch, .. } | Self::NoteOff { pitch } => *pitch,
        }
    }
}

const BARE_NOTES: [&str; 12] = [
    "c", "cs", "d", "ds", "e", "f", "fs", "g", "gs", "a", "as", "b",
];

/// Number of named piano keys, `a-1` through `c7`.
pub const KEY_COUNT: u8 = 88;

/// Maps MIDI note numbers onto remote key ids: `note - key_offset + transpose`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMap {
    pub key_offset: i32,
    pub transpose: i32,
}

impl Default for KeyMap {
    fn default() -> Self {
        Self {
            key_offset: 9,
            transpose: -12,
        }
    }
}

impl KeyMap {
    pub fn new(key_offset: i32, transpose: i32) -> Self {
        Self {
            key_offset,
            transpose,
        }
    }

    /// Returns `None` when the key would fall outside a byte.
    pub fn key_for(&self, midi_note: u8) -> Option<u8> {
        let key = midi_note as i32 - self.key_offset + self.transpose;
        u8::try_from(key).ok()
    }
}

/// Piano key name for a key id, e.g. `0 -> "a-1"`, `3 -> "c0"`, `87 -> "c7"`.
pub fn key_name(key: u8) -> Option<String> {
    match key {
        0 => Some("a-1".to_string()),
        1 => Some("as-1".to_string()),
        2 => Some("b-1".to_string()),
        k if k < KEY_COUNT => {
            let idx = (k - 3) as usize;
            Some(format!("{}{}", BARE_NOTES[idx % 12], idx / 12))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_note_on_with_zero_velocity_is_release() {
        assert_eq!(
            MidiMessage::from_packed(0x00_3C_90),
            Some(MidiMessage::NoteOff { pitch: 60 })
        );
        assert_eq!(
            MidiMessage::from_packed(0x64_3C_91),
            Some(MidiMessage::NoteOn {
                pitch: 60,
                velocity: 100
            })
        );
        assert_eq!(
            MidiMessage::from_packed(0x40_3C_83),
            Some(MidiMessage::NoteOff { pitch: 60 })
        );
    }

    #[test]
    fn non_note_messages_are_ignored() {
        assert_eq!(MidiMessage::from_packed(0x7F_07_B0), None);
        assert_eq!(MidiMessage::from_bytes(&[0xE0, 0x00, 0x40]), None);
        assert_eq!(MidiMessage::from_bytes(&[0x90]), None);
    }

    #[test]
    fn hex_lines_parse() {
        assert_eq!(
            MidiMessage::parse_hex("90 3C 7F").unwrap(),
            Some(MidiMessage::NoteOn {
                pitch: 60,
                velocity: 127
            })
        );
        assert_eq!(
            MidiMessage::parse_hex("0x80 0x3c 0x00").unwrap(),
            Some(MidiMessage::NoteOff { pitch: 60 })
        );
        assert_eq!(MidiMessage::parse_hex("B0 07 40").unwrap(), None);
        assert!(matches!(
            MidiMessage::parse_hex("90 zz 7F"),
            Err(Error::InvalidMidiLine(_))
        ));
        assert!(MidiMessage::parse_hex("   ").is_err());
    }

    #[test]
    fn key_map_applies_offset_and_transpose() {
        let map = KeyMap::default();
        // A1 (MIDI 33) is the lowest key after transposing down an octave
        assert_eq!(map.key_for(33), Some(12));
        assert_eq!(map.key_for(21), Some(0));
        assert_eq!(map.key_for(20), None);
        assert_eq!(KeyMap::new(0, 0).key_for(255), Some(255));
    }

    #[test]
    fn key_names_cover_the_piano() {
        assert_eq!(key_name(0).as_deref(), Some("a-1"));
        assert_eq!(key_name(2).as_deref(), Some("b-1"));
        assert_eq!(key_name(3).as_deref(), Some("c0"));
        assert_eq!(key_name(15).as_deref(), Some("c1"));
        assert_eq!(key_name(86).as_deref(), Some("b6"));
        assert_eq!(key_name(87).as_deref(), Some("c7"));
        assert_eq!(key_name(88), None);
    }

    #[test]
    fn decoded_event_maps_back_to_message() {
        assert_eq!(
            NoteEvent::new(40, 3, 0).message(),
            MidiMessage::NoteOff { pitch: 40 }
        );
        assert_eq!(
            NoteEvent::new(40, 3, 90).message(),
            MidiMessage::NoteOn {
                pitch: 40,
                velocity: 90
            }
        );
    }
}
