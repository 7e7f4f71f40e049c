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

//! The command stream wire format. Each command is one 16-bit big-endian
//! word; the two most significant bits select the command:
//!
//! ```text
//! note-on    0 0 V V V A A A A N N N N N N N
//! noise-on   0 1 S M M M A A A A 0 0 0 T T T
//! delay      1 0 D D D D D D D D D D D D D D
//! notes-off  1 1 0 0 0 0 0 0 B B B B B B B B
//! ```

use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::psg::Side;

/// The longest delay a single command word can carry, in milliseconds.
pub const MAX_DELAY_MS: u16 = 0x3FFF;

const TAG_NOISE_ON: u16 = 0x4000;
const TAG_DELAY: u16 = 0x8000;
const TAG_NOTES_OFF: u16 = 0xC000;
const NOISE_SIDE_BIT: u16 = 1 << 13;

/// A single playback command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Starts a tone voice sounding at the given pitch and attenuation.
    NoteOn { voice: u8, attenuation: u8, note: u8 },
    /// Starts a side's noise generator with the given control register,
    /// attenuation and decay sustain mask.
    NoiseOn {
        side: Side,
        sustain: u8,
        attenuation: u8,
        control: u8,
    },
    /// Pauses interpretation for the given number of milliseconds.
    Delay { milliseconds: u16 },
    /// Begins the release of every voice whose bit is set in the mask.
    NotesOff { voices: u8 },
}

impl Command {
    /// Encodes the command as a wire word. Out-of-range fields are clamped
    /// to their maximum rather than masked, so an oversized value can never
    /// corrupt a neighboring field.
    pub fn to_word(&self) -> u16 {
        match *self {
            Command::NoteOn {
                voice,
                attenuation,
                note,
            } => {
                u16::from(voice.min(7)) << 11
                    | u16::from(attenuation.min(15)) << 7
                    | u16::from(note.min(127))
            }
            Command::NoiseOn {
                side,
                sustain,
                attenuation,
                control,
            } => {
                let side_bit = match side {
                    Side::Left => 0,
                    Side::Right => NOISE_SIDE_BIT,
                };
                TAG_NOISE_ON
                    | side_bit
                    | u16::from(sustain.min(7)) << 10
                    | u16::from(attenuation.min(15)) << 6
                    | u16::from(control.min(7))
            }
            Command::Delay { milliseconds } => TAG_DELAY | milliseconds.min(MAX_DELAY_MS),
            Command::NotesOff { voices } => TAG_NOTES_OFF | u16::from(voices),
        }
    }

    /// Decodes a wire word. The two tag bits cover all four commands, so
    /// every 16-bit word decodes to something.
    pub fn from_word(word: u16) -> Command {
        match word >> 14 {
            0b00 => Command::NoteOn {
                voice: ((word >> 11) & 0x7) as u8,
                attenuation: ((word >> 7) & 0xF) as u8,
                note: (word & 0x7F) as u8,
            },
            0b01 => Command::NoiseOn {
                side: if word & NOISE_SIDE_BIT == 0 {
                    Side::Left
                } else {
                    Side::Right
                },
                sustain: ((word >> 10) & 0x7) as u8,
                attenuation: ((word >> 6) & 0xF) as u8,
                control: (word & 0x7) as u8,
            },
            0b10 => Command::Delay {
                milliseconds: word & MAX_DELAY_MS,
            },
            _ => Command::NotesOff {
                voices: (word & 0xFF) as u8,
            },
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Command::NoteOn {
                voice,
                attenuation,
                note,
            } => write!(
                f,
                "note-on voice={} attenuation={} note={}",
                voice, attenuation, note
            ),
            Command::NoiseOn {
                side,
                sustain,
                attenuation,
                control,
            } => write!(
                f,
                "noise-on side={} sustain={:03b} attenuation={} control={:03b}",
                side, sustain, attenuation, control
            ),
            Command::Delay { milliseconds } => write!(f, "delay {}ms", milliseconds),
            Command::NotesOff { voices } => write!(f, "notes-off voices={:08b}", voices),
        }
    }
}

/// Appends the delay words for the given duration, rounded to the nearest
/// millisecond. Delays too long for one word are split into repeated
/// maximum-length words plus a remainder. Zero-length delays emit nothing.
pub fn push_delay(words: &mut Vec<u16>, delay: Duration) {
    let mut remaining = (delay.as_secs_f64() * 1000.0).round() as u64;
    while remaining > u64::from(MAX_DELAY_MS) {
        words.push(
            Command::Delay {
                milliseconds: MAX_DELAY_MS,
            }
            .to_word(),
        );
        remaining -= u64::from(MAX_DELAY_MS);
    }
    if remaining > 0 {
        words.push(
            Command::Delay {
                milliseconds: remaining as u16,
            }
            .to_word(),
        );
    }
}

/// Typed error for command stream decode failures so callers can distinguish
/// transport problems from a malformed stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("error reading command stream: {0}")]
    Io(#[from] io::Error),
    #[error("command stream length {0} is odd; the final word is truncated")]
    TruncatedWord(usize),
}

/// Decodes a complete command stream from raw big-endian bytes.
pub fn decode_stream(bytes: &[u8]) -> Result<Vec<Command>, StreamError> {
    if bytes.len() % 2 != 0 {
        return Err(StreamError::TruncatedWord(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| Command::from_word(u16::from_be_bytes([pair[0], pair[1]])))
        .collect())
}

/// Reads and decodes a complete command stream.
pub fn read_stream<R: Read>(reader: &mut R) -> Result<Vec<Command>, StreamError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    decode_stream(&bytes)
}

/// Writes command words as big-endian bytes.
pub fn write_stream<W: Write>(writer: &mut W, words: &[u16]) -> io::Result<()> {
    for word in words {
        writer.write_all(&word.to_be_bytes())?;
    }
    Ok(())
}
