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
use std::fmt;
#[cfg(test)]
use std::{error::Error, sync::Arc};

use tracing::debug;

/// A device that logs register writes instead of driving hardware. Useful
/// for dry runs of a command stream on machines without the chips attached.
pub struct Device {
    name: String,
}

impl Device {
    /// Gets the given console device.
    pub fn get(name: &str) -> Device {
        Device {
            name: name.to_string(),
        }
    }
}

impl super::Device for Device {
    fn set_frequency(&self, voice: u8, register: u16) {
        debug!(voice = voice, register = register, "Frequency write.");
    }

    fn set_attenuation(&self, voice: u8, level: u8) {
        debug!(voice = voice, level = level, "Attenuation write.");
    }

    fn set_noise(&self, voice: u8, control: u8) {
        debug!(voice = voice, control = control, "Noise write.");
    }

    fn silence_all(&self) {
        debug!("Silencing all voices.");
    }

    #[cfg(test)]
    fn to_mock(&self) -> Result<Arc<super::mock::Device>, Box<dyn Error>> {
        Err("not a mock".into())
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Console)", self.name)
    }
}
