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

//! Conversions between MIDI note/velocity values and the registers of the
//! sound generator chips: 10-bit frequency counters and 4-bit attenuation
//! levels.

/// Oscillator frequency driving the sound generator chips, in Hz. Frequency
/// registers computed here are only correct for boards clocked at this rate.
pub const CLOCK_HZ: u32 = 1_200_000;

/// The largest value a 10-bit chip frequency register can hold.
pub const MAX_FREQUENCY_REGISTER: u16 = 0x3FF;

/// The attenuation level at which a voice is fully silent.
pub const SILENCE: u8 = 15;

/// Converts a MIDI note to the chip frequency register producing its pitch.
/// The chips divide the clock by 32 times the register value, so low notes
/// overflow the 10-bit register; those are folded up an octave at a time
/// until they fit.
pub fn note_to_frequency_register(note: u8) -> u16 {
    let mut note = u16::from(note.min(127));
    let mut register = frequency_register(note);
    while register > MAX_FREQUENCY_REGISTER {
        note += 12;
        register = frequency_register(note);
    }
    register
}

/// The raw equal-temperament register value for a note, unbounded.
fn frequency_register(note: u16) -> u16 {
    let octaves_from_a440 = (f64::from(note) - 69.0) / 12.0;
    let frequency = 440.0 * octaves_from_a440.exp2();
    (f64::from(CLOCK_HZ) / (32.0 * frequency)).round() as u16
}

/// Builds the full note-to-register lookup table. The playback engine keeps
/// this precomputed so note-on handling stays off the floating point unit.
pub fn note_register_table() -> [u16; 128] {
    let mut table = [0u16; 128];
    for (note, register) in table.iter_mut().enumerate() {
        *register = note_to_frequency_register(note as u8);
    }
    table
}

/// Quantizes a MIDI velocity into one of four attack attenuation levels:
/// 9, 6, 3 or 0 (full volume).
pub fn velocity_to_attenuation(velocity: u8) -> u8 {
    9 - 3 * (velocity.min(127) / 32)
}

/// Rescales a velocity against the loudest velocity in the song, so quietly
/// sequenced material still reaches the top attenuation bands. A zero
/// maximum leaves the velocity untouched.
pub fn scale_velocity(velocity: u8, max_velocity: u8) -> u8 {
    if max_velocity == 0 {
        return velocity;
    }
    ((u16::from(velocity) * 127 / u16::from(max_velocity)).min(127)) as u8
}

/// The attenuation floor a sounding voice decays to before holding: louder
/// attacks settle louder. Beyond the four attack bands this extends linearly
/// and clamps at silence.
pub fn release_target(attenuation: u8) -> u8 {
    (8 + attenuation * 2 / 3).min(SILENCE)
}
