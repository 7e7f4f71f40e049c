// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Converts MIDI files into command streams. The conversion walks the song
//! tick by tick, collects everything that happens at each instant into an
//! event, then fits the events onto the six tone voices and two noise
//! generators of the chip pair.

pub mod allocator;
pub mod percussion;

use std::error::Error;
use std::fs::{self, File};
use std::mem;
use std::path::Path;
use std::time::Duration;

use midly::{Format, MidiMessage, Smf};
use nodi::timers::Ticker;
use nodi::{MidiEvent, Sheet, Timer};
use tracing::{debug, info, span, Level};

use crate::command::{self, Command};
use crate::encoder::allocator::{Allocator, ChannelMap, GRACE, GRACE_PRIORITY};
use crate::encoder::percussion::Hit;
use crate::tuning;

/// The 1-based MIDI channel reserved for percussion.
pub const PERCUSSION_CHANNEL: u8 = 10;

/// A note-off event this close to the following event is postponed and
/// folded into it, so releases just shy of a new onset don't cost a command
/// word and a near-zero delay of their own.
const MERGE_WINDOW: Duration = Duration::from_millis(10);

/// Conversion settings for one run of the encoder.
pub struct Settings {
    /// Channels processed first and protected from preemption, in order.
    pub priority_channels: Vec<u8>,
    /// Channels dropped entirely.
    pub exclude_channels: Vec<u8>,
    /// Rescale velocities against the loudest one in the song.
    pub normalize_velocity: bool,
    /// Minimum age before a note may be preempted.
    pub grace: Duration,
    /// Minimum age before a priority-channel note may preempt.
    pub grace_priority: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            priority_channels: Vec::new(),
            exclude_channels: Vec::new(),
            normalize_velocity: false,
            grace: GRACE,
            grace_priority: GRACE_PRIORITY,
        }
    }
}

/// Converts a MIDI file into a command stream file.
pub fn encode_file(infile: &Path, outfile: &Path, settings: &Settings) -> Result<(), Box<dyn Error>> {
    let span = span!(Level::INFO, "encode song");
    let _enter = span.enter();

    let buf: Vec<u8> = fs::read(infile)?;
    let smf = Smf::parse(&buf)?;
    let words = encode_smf(&smf, settings)?;

    let mut file = File::create(outfile)?;
    command::write_stream(&mut file, &words)?;

    info!(
        infile = crate::util::filename_display(infile),
        outfile = crate::util::filename_display(outfile),
        words = words.len(),
        "Encoded song."
    );
    Ok(())
}

/// Converts a parsed MIDI file into command words.
pub fn encode_smf(smf: &Smf, settings: &Settings) -> Result<Vec<u16>, Box<dyn Error>> {
    let mut ticker = Ticker::try_from(smf.header.timing)?;
    let sheet = match smf.header.format {
        Format::SingleTrack | Format::Sequential => Sheet::sequential(&smf.tracks),
        Format::Parallel => Sheet::parallel(&smf.tracks),
    };

    let census = take_census(&sheet);
    let map = ChannelMap::new(
        &census.channels,
        &settings.priority_channels,
        &settings.exclude_channels,
    );
    let mut encoder = Encoder::new(
        Allocator::with_grace(map, settings.grace, settings.grace_priority),
        settings.normalize_velocity,
        census.max_velocity,
    );

    // The walk mirrors live playback: empty moments accumulate into the
    // tick counter and turn into a logged delay at the next busy moment.
    let mut counter = 0u32;
    for moment in sheet.iter() {
        if !moment.is_empty() {
            let delay = ticker.sleep_duration(counter);
            if !delay.is_zero() {
                encoder.log_delay(delay);
            }
            counter = 0;
            for event in &moment.events {
                match event {
                    nodi::Event::Tempo(tempo) => ticker.change_tempo(*tempo),
                    nodi::Event::Midi(midi_event) => encoder.log_midi(*midi_event),
                    _ => (),
                }
            }
        }
        counter += 1;
    }

    Ok(encoder.finish())
}

/// What the song contains: the melodic channels present and the loudest
/// velocity anywhere, gathered before conversion starts.
struct Census {
    channels: Vec<u8>,
    max_velocity: u8,
}

fn take_census(sheet: &Sheet) -> Census {
    let mut channels: Vec<u8> = Vec::new();
    let mut max_velocity = 0u8;
    for moment in sheet.iter() {
        for event in &moment.events {
            if let nodi::Event::Midi(midi_event) = event {
                if let MidiMessage::NoteOn { vel, .. } = midi_event.message {
                    if vel.as_int() == 0 {
                        continue;
                    }
                    max_velocity = max_velocity.max(vel.as_int());
                    let channel = midi_event.channel.as_int() + 1;
                    if channel != PERCUSSION_CHANNEL && !channels.contains(&channel) {
                        channels.push(channel);
                    }
                }
            }
        }
    }
    channels.sort_unstable();
    Census {
        channels,
        max_velocity,
    }
}

/// A note beginning at some instant.
struct NoteOn {
    pitch: u8,
    channel: u8,
    velocity: u8,
}

/// A note ending at some instant.
struct NoteOff {
    pitch: u8,
    channel: u8,
}

/// Everything that happens at one instant of the song: the silence before
/// it, the notes that begin, the notes that end and the drum hits.
struct Event {
    delay: Duration,
    notes_on: Vec<NoteOn>,
    notes_off: Vec<NoteOff>,
    hits: Vec<Hit>,
}

impl Event {
    fn new(delay: Duration) -> Event {
        Event {
            delay,
            notes_on: Vec::new(),
            notes_off: Vec::new(),
            hits: Vec::new(),
        }
    }

    /// True if nothing is attached to this instant yet.
    fn is_delay_only(&self) -> bool {
        self.notes_on.is_empty() && self.notes_off.is_empty() && self.hits.is_empty()
    }

    /// True if this instant only ends notes.
    fn is_notes_off_only(&self) -> bool {
        !self.notes_off.is_empty() && self.notes_on.is_empty() && self.hits.is_empty()
    }

    /// Folds a postponed note-off event into this one: its silence happens
    /// first, so its delay is absorbed and its releases move to this
    /// instant. Only note-off-only events may be postponed.
    fn merge(&mut self, pending: Event) {
        assert!(
            pending.notes_on.is_empty() && pending.hits.is_empty(),
            "merged a pending event that starts notes"
        );
        self.delay += pending.delay;
        self.notes_off.extend(pending.notes_off);
    }
}

/// Builds the event log from a MIDI walk, then emits command words from it.
struct Encoder {
    events: Vec<Event>,
    allocator: Allocator,
    normalize: bool,
    max_velocity: u8,
}

impl Encoder {
    fn new(allocator: Allocator, normalize: bool, max_velocity: u8) -> Encoder {
        Encoder {
            events: Vec::new(),
            allocator,
            normalize,
            max_velocity,
        }
    }

    /// Logs silence. Consecutive delays collapse into one event, so any run
    /// of quiet moments costs a single delay no matter how it was sliced.
    fn log_delay(&mut self, delay: Duration) {
        match self.events.last_mut() {
            Some(event) if event.is_delay_only() => event.delay += delay,
            _ => self.events.push(Event::new(delay)),
        }
    }

    fn log_midi(&mut self, midi_event: MidiEvent) {
        let channel = midi_event.channel.as_int() + 1;
        match midi_event.message {
            MidiMessage::NoteOn { key, vel } => {
                // Note-ons with zero velocity are releases.
                if vel.as_int() == 0 {
                    self.log_note_off(key.as_int(), channel);
                } else {
                    self.log_note_on(key.as_int(), channel, vel.as_int());
                }
            }
            MidiMessage::NoteOff { key, .. } => self.log_note_off(key.as_int(), channel),
            _ => (),
        }
    }

    fn log_note_on(&mut self, pitch: u8, channel: u8, velocity: u8) {
        if channel == PERCUSSION_CHANNEL {
            self.current_event().hits.push(Hit {
                note: pitch,
                velocity,
            });
            return;
        }
        if !self.allocator.channel_map().contains(channel) {
            debug!(
                pitch = pitch,
                channel = channel,
                "Dropping note on excluded channel."
            );
            return;
        }
        self.current_event().notes_on.push(NoteOn {
            pitch,
            channel,
            velocity,
        });
    }

    fn log_note_off(&mut self, pitch: u8, channel: u8) {
        // Percussion is one-shot; its note-offs mean nothing.
        if channel == PERCUSSION_CHANNEL || !self.allocator.channel_map().contains(channel) {
            return;
        }
        self.current_event().notes_off.push(NoteOff { pitch, channel });
    }

    fn current_event(&mut self) -> &mut Event {
        if self.events.is_empty() {
            self.events.push(Event::new(Duration::ZERO));
        }
        self.events.last_mut().expect("events cannot be empty")
    }

    /// The emit phase. Note-off-only events are postponed: when the next
    /// event follows within the merge window they fold together, otherwise
    /// the postponed event is written on its own.
    fn finish(mut self) -> Vec<u16> {
        let mut words = Vec::new();
        let mut clock = Duration::ZERO;
        let mut pending: Option<Event> = None;

        for mut event in mem::take(&mut self.events) {
            if let Some(pending_event) = pending.take() {
                if event.delay < MERGE_WINDOW {
                    event.merge(pending_event);
                } else {
                    self.write_event(&mut words, &mut clock, pending_event);
                }
            }

            if event.is_notes_off_only() {
                pending = Some(event);
            } else {
                self.write_event(&mut words, &mut clock, event);
            }
        }
        if let Some(pending_event) = pending {
            self.write_event(&mut words, &mut clock, pending_event);
        }

        words
    }

    fn write_event(&mut self, words: &mut Vec<u16>, clock: &mut Duration, event: Event) {
        *clock += event.delay;
        command::push_delay(words, event.delay);

        // Releases are resolved first so a voice freed at this instant can
        // be taken over by a note starting at it.
        let mut off_mask = 0u8;
        for off in &event.notes_off {
            off_mask |= self.allocator.release(off.pitch, off.channel, *clock);
        }

        let mut notes_on = event.notes_on;
        notes_on.sort_by_key(|note| self.allocator.channel_map().sort_key(note.channel));
        for note in notes_on {
            match self.allocator.place(note.pitch, note.channel, *clock) {
                Some(voice) => {
                    let attenuation =
                        tuning::velocity_to_attenuation(self.scaled(note.velocity));
                    words.push(
                        Command::NoteOn {
                            voice,
                            attenuation,
                            note: note.pitch,
                        }
                        .to_word(),
                    );
                    // The voice restarts here, so it must not be released.
                    off_mask &= !(1 << voice);
                }
                None => debug!(
                    pitch = note.pitch,
                    channel = note.channel,
                    "Dropping note; no voice available."
                ),
            }
        }

        let hits: Vec<Hit> = event
            .hits
            .iter()
            .map(|hit| Hit {
                note: hit.note,
                velocity: self.scaled(hit.velocity),
            })
            .collect();
        for noise in percussion::map_hits(&hits) {
            words.push(
                Command::NoiseOn {
                    side: noise.side,
                    sustain: noise.profile.sustain,
                    attenuation: noise.attenuation,
                    control: noise.profile.control,
                }
                .to_word(),
            );
        }

        if off_mask != 0 {
            words.push(Command::NotesOff { voices: off_mask }.to_word());
        }
    }

    fn scaled(&self, velocity: u8) -> u8 {
        if self.normalize {
            tuning::scale_velocity(velocity, self.max_velocity)
        } else {
            velocity
        }
    }
}
