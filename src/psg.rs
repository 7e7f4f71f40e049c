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
use std::any::Any;
use std::{error::Error, fmt, sync::Arc};

pub mod console;
pub mod mock;

/// Total voice count across the stereo pair of chips. Each chip contributes
/// three tone voices and one noise generator.
pub const NUM_VOICES: usize = 8;

/// The stereo side a chip sits on. Voices 0-3 belong to the left chip,
/// voices 4-7 to the right.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// The side whose chip owns the given voice.
    pub fn of_voice(voice: u8) -> Side {
        if voice < 4 {
            Side::Left
        } else {
            Side::Right
        }
    }

    /// The other side of the stereo pair.
    pub fn opposite(&self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// The tone voices on this side's chip.
    pub fn tone_voices(&self) -> [u8; 3] {
        match self {
            Side::Left => [0, 1, 2],
            Side::Right => [4, 5, 6],
        }
    }

    /// The noise generator voice on this side's chip.
    pub fn noise_voice(&self) -> u8 {
        match self {
            Side::Left => 3,
            Side::Right => 7,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// A device driving the stereo pair of sound generator chips. Voices are
/// addressed by their global index. Register writes cannot fail once the
/// device exists, so these are infallible.
pub trait Device: Any + fmt::Display + std::marker::Send + std::marker::Sync {
    /// Sets the 10-bit frequency register of a tone voice.
    fn set_frequency(&self, voice: u8, register: u16);

    /// Sets the 4-bit attenuation level of a voice (0 loudest, 15 silent).
    fn set_attenuation(&self, voice: u8, level: u8);

    /// Sets the 3-bit noise control register of a noise voice.
    fn set_noise(&self, voice: u8, control: u8);

    /// Drives every voice on both chips fully silent.
    fn silence_all(&self);

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<mock::Device>, Box<dyn Error>>;
}

/// Gets a device with the given name.
pub fn get_device(name: &str) -> Result<Arc<dyn Device>, Box<dyn Error>> {
    if name.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(name)));
    }
    if name == "console" {
        return Ok(Arc::new(console::Device::get(name)));
    }

    Err(format!("unknown sound device '{}'", name).into())
}
