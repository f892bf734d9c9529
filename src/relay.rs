//! Drives a shared [`NoteBuffer`] from two sides: producer threads push MIDI
//! as it arrives while a flusher thread drains the batch on a fixed interval.
//! All buffer access goes through one mutex, so an overflow flush on the
//! producer side never races a periodic flush.

use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::buffer::{Append, Clock, FlushStats, NoteBuffer, SystemClock};
use crate::config::RelayConfig;
use crate::events::{KeyMap, MidiMessage, key_name};

#[derive(Debug, Clone, Copy)]
enum RelayCommand {
    Flush,
    Shutdown,
}

/// Cloneable producer side of a relay, safe to hand to worker threads.
pub struct RelayIntake<C: Clock = SystemClock> {
    buffer: Arc<Mutex<NoteBuffer<C>>>,
    outbound_tx: Sender<String>,
    note_count: Arc<AtomicU64>,
    keys: KeyMap,
    min_velocity: u8,
    server_time_offset: i64,
}

impl<C: Clock> Clone for RelayIntake<C> {
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer.clone(),
            outbound_tx: self.outbound_tx.clone(),
            note_count: self.note_count.clone(),
            keys: self.keys,
            min_velocity: self.min_velocity,
            server_time_offset: self.server_time_offset,
        }
    }
}

impl<C: Clock> RelayIntake<C> {
    /// Accepts a packed `status | note << 8 | velocity << 16` word.
    pub fn push_packed(&self, word: u32) -> bool {
        match MidiMessage::from_packed(word) {
            Some(message) => self.push_message(message),
            None => false,
        }
    }

    /// Returns whether the message made it into the buffer.
    pub fn push_message(&self, message: MidiMessage) -> bool {
        let Some(key) = self.keys.key_for(message.pitch()) else {
            debug!(pitch = message.pitch(), "note outside key range, dropped");
            return false;
        };

        if let MidiMessage::NoteOn { velocity, .. } = message {
            if velocity < self.min_velocity {
                return false;
            }
        }

        let mut buffer = self.buffer.lock();
        let append = match message {
            MidiMessage::NoteOn { velocity, .. } => {
                self.note_count.fetch_add(1, Ordering::Relaxed);
                buffer.start_note(key, velocity as f32 / 127.0)
            }
            MidiMessage::NoteOff { .. } => buffer.stop_note(key),
        };

        if let Append::Overflow { pending } = append {
            warn!(
                pending,
                key = key_name(key).as_deref().unwrap_or("?"),
                "emergency flush due to max buffer length"
            );
            flush_into(&mut buffer, self.server_time_offset, &self.outbound_tx);
        }
        true
    }
}

pub struct RelayHandle<C: Clock = SystemClock> {
    intake: RelayIntake<C>,
    command_tx: Sender<RelayCommand>,
    outbound_rx: Receiver<String>,
    flusher: Option<JoinHandle<()>>,
}

pub fn spawn_relay(config: &RelayConfig) -> RelayHandle {
    spawn_relay_with_clock(config, SystemClock)
}

pub fn spawn_relay_with_clock<C>(config: &RelayConfig, clock: C) -> RelayHandle<C>
where
    C: Clock + Send + 'static,
{
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (outbound_tx, outbound_rx) = crossbeam::channel::unbounded();

    let buffer = NoteBuffer::with_clock(clock).with_max_len(config.max_batch_len);
    let intake = RelayIntake {
        buffer: Arc::new(Mutex::new(buffer)),
        outbound_tx,
        note_count: Arc::new(AtomicU64::new(0)),
        keys: config.key_map(),
        min_velocity: config.min_velocity,
        server_time_offset: config.server_time_offset_ms,
    };

    let flusher_intake = intake.clone();
    let interval = config.flush_interval();
    let flusher = std::thread::spawn(move || {
        flusher_thread(flusher_intake, command_rx, interval);
    });

    info!(
        interval_ms = interval.as_millis() as u64,
        offset_ms = config.server_time_offset_ms,
        "relay started"
    );

    RelayHandle {
        intake,
        command_tx,
        outbound_rx,
        flusher: Some(flusher),
    }
}

impl<C: Clock> RelayHandle<C> {
    pub fn intake(&self) -> RelayIntake<C> {
        self.intake.clone()
    }

    pub fn push_packed(&self, word: u32) -> bool {
        self.intake.push_packed(word)
    }

    pub fn push_message(&self, message: MidiMessage) -> bool {
        self.intake.push_message(message)
    }

    /// Envelopes ready to be sent, in flush order.
    pub fn outbound(&self) -> &Receiver<String> {
        &self.outbound_rx
    }

    /// Asks the flusher for an out-of-cycle flush.
    pub fn flush_now(&self) {
        let _ = self.command_tx.send(RelayCommand::Flush);
    }

    pub fn stats(&self) -> FlushStats {
        self.intake.buffer.lock().stats()
    }

    /// Final flush, then returns every envelope not yet received.
    pub fn shutdown(mut self) -> Vec<String> {
        self.stop();
        self.outbound_rx.try_iter().collect()
    }

    fn stop(&mut self) {
        if let Some(flusher) = self.flusher.take() {
            let _ = self.command_tx.send(RelayCommand::Shutdown);
            if flusher.join().is_err() {
                error!("relay flusher thread panicked");
            }
            info!("relay stopped");
        }
    }
}

impl<C: Clock> Drop for RelayHandle<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn flusher_thread<C: Clock>(
    intake: RelayIntake<C>,
    command_rx: Receiver<RelayCommand>,
    interval: Duration,
) {
    let ticker = crossbeam::channel::tick(interval);
    let rate_ticker = crossbeam::channel::tick(Duration::from_secs(1));

    let flush = || {
        let mut buffer = intake.buffer.lock();
        flush_into(&mut buffer, intake.server_time_offset, &intake.outbound_tx);
    };

    loop {
        crossbeam::select! {
            recv(ticker) -> _ => flush(),
            recv(rate_ticker) -> _ => {
                let notes = intake.note_count.swap(0, Ordering::Relaxed);
                if notes > 0 {
                    info!(notes_per_second = notes, "note rate");
                }
            }
            recv(command_rx) -> command => match command {
                Ok(RelayCommand::Flush) => flush(),
                Ok(RelayCommand::Shutdown) | Err(_) => {
                    flush();
                    break;
                }
            },
        }
    }
}

fn flush_into<C: Clock>(buffer: &mut NoteBuffer<C>, offset: i64, outbound_tx: &Sender<String>) {
    match buffer.flush(offset) {
        Ok(Some(envelope)) => {
            if outbound_tx.send(envelope).is_err() {
                warn!("outbound channel closed, envelope dropped");
            }
        }
        Ok(None) => {}
        Err(e) => error!("failed to build envelope: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ManualClock;
    use crate::codec;
    use crate::envelope;

    fn quiet_config() -> RelayConfig {
        RelayConfig {
            flush_interval_ms: 60_000,
            ..RelayConfig::default()
        }
    }

    fn decode_envelope(text: &str) -> codec::NoteBatch {
        let payloads = envelope::parse_payloads(text).unwrap();
        assert_eq!(payloads.len(), 1);
        codec::decode(&payloads[0]).unwrap()
    }

    #[test]
    fn shutdown_flushes_pending_notes() {
        let clock = ManualClock::new(1_000);
        let relay = spawn_relay_with_clock(&quiet_config(), clock.clone());

        // MIDI 60 -> key 39 with the default mapping
        assert!(relay.push_packed(0x7F_3C_90));
        clock.advance(50);
        assert!(relay.push_packed(0x00_3C_80));

        let sent = relay.shutdown();
        assert_eq!(sent.len(), 1);
        let batch = decode_envelope(&sent[0]);
        assert_eq!(batch.timestamp, 1_000);
        assert_eq!(
            batch.notes,
            vec![
                crate::NoteEvent::new(39, 0, 127),
                crate::NoteEvent::new(39, 50, 0),
            ]
        );
    }

    #[test]
    fn flush_now_delivers_envelope() {
        let relay = spawn_relay_with_clock(&quiet_config(), ManualClock::new(0));
        assert!(relay.push_message(MidiMessage::NoteOn {
            pitch: 70,
            velocity: 64
        }));
        relay.flush_now();

        let msg = relay
            .outbound()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(decode_envelope(&msg).notes.len(), 1);
        assert_eq!(relay.stats().batches, 1);
        assert!(relay.shutdown().is_empty());
    }

    #[test]
    fn quiet_and_out_of_range_notes_are_dropped() {
        let config = RelayConfig {
            min_velocity: 5,
            ..quiet_config()
        };
        let relay = spawn_relay_with_clock(&config, ManualClock::new(0));
        assert!(!relay.push_message(MidiMessage::NoteOn {
            pitch: 60,
            velocity: 4
        }));
        assert!(!relay.push_message(MidiMessage::NoteOff { pitch: 3 }));
        assert!(!relay.push_packed(0x40_07_B0));
        assert!(relay.push_message(MidiMessage::NoteOff { pitch: 60 }));
        assert_eq!(relay.shutdown().len(), 1);
    }

    #[test]
    fn overflow_flushes_immediately_from_producer() {
        let config = RelayConfig {
            max_batch_len: 3,
            ..quiet_config()
        };
        let relay = spawn_relay_with_clock(&config, ManualClock::new(0));
        let intake = relay.intake();

        let worker = std::thread::spawn(move || {
            for pitch in 40..44 {
                intake.push_message(MidiMessage::NoteOn {
                    pitch,
                    velocity: 100,
                });
            }
        });
        worker.join().unwrap();

        let first = relay
            .outbound()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(decode_envelope(&first).notes.len(), 3);

        let rest = relay.shutdown();
        assert_eq!(rest.len(), 1);
        assert_eq!(decode_envelope(&rest[0]).notes.len(), 1);
    }

    #[test]
    fn periodic_flush_applies_server_offset() {
        let config = RelayConfig {
            flush_interval_ms: 10,
            server_time_offset_ms: 5_000,
            ..RelayConfig::default()
        };
        let relay = spawn_relay_with_clock(&config, ManualClock::new(2_000));
        relay.push_message(MidiMessage::NoteOn {
            pitch: 60,
            velocity: 127,
        });

        let msg = relay
            .outbound()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(decode_envelope(&msg).timestamp, 7_000);
    }
}
