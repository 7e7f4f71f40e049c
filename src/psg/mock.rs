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
#[cfg(test)]
use std::error::Error;
use std::{fmt, sync::Arc};

use parking_lot::Mutex;

/// A single register write recorded by the mock device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Call {
    Frequency { voice: u8, register: u16 },
    Attenuation { voice: u8, level: u8 },
    Noise { voice: u8, control: u8 },
    SilenceAll,
}

/// A mock device. Doesn't drive any hardware; records every register write
/// in order so tests can assert on the exact chip traffic.
#[derive(Clone)]
pub struct Device {
    name: String,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns all register writes seen so far, in order.
    #[cfg(test)]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Forgets all recorded register writes.
    #[cfg(test)]
    pub fn reset(&self) {
        self.calls.lock().clear();
    }

    /// The most recent attenuation written to the given voice, if any.
    #[cfg(test)]
    pub fn last_attenuation(&self, voice: u8) -> Option<u8> {
        self.calls.lock().iter().rev().find_map(|call| match call {
            Call::Attenuation { voice: v, level } if *v == voice => Some(*level),
            Call::SilenceAll => Some(crate::tuning::SILENCE),
            _ => None,
        })
    }
}

impl super::Device for Device {
    fn set_frequency(&self, voice: u8, register: u16) {
        self.calls.lock().push(Call::Frequency { voice, register });
    }

    fn set_attenuation(&self, voice: u8, level: u8) {
        self.calls.lock().push(Call::Attenuation { voice, level });
    }

    fn set_noise(&self, voice: u8, control: u8) {
        self.calls.lock().push(Call::Noise { voice, control });
    }

    fn silence_all(&self) {
        self.calls.lock().push(Call::SilenceAll);
    }

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<Device>, Box<dyn Error>> {
        Ok(Arc::new(self.clone()))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}
