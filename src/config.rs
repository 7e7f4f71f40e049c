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
use std::error::Error;
use std::path::Path;
use std::time::Duration;

use config::{Config, File};
use duration_string::DurationString;
use serde::Deserialize;

use crate::encoder::allocator::{GRACE, GRACE_PRIORITY};
use crate::encoder::Settings;

/// A YAML conversion profile for a song. Everything is optional; an absent
/// field falls back to the encoder default.
#[derive(Deserialize, Clone, Default)]
pub struct Profile {
    /// Channels processed first and protected from preemption, in order.
    priority_channels: Option<Vec<u8>>,
    /// Channels dropped entirely.
    exclude_channels: Option<Vec<u8>>,
    /// Rescale velocities against the loudest one in the song.
    normalize_velocity: Option<bool>,
    /// Minimum sounding time before a note may be preempted, e.g. 150ms.
    preempt_grace: Option<String>,
    /// The threshold used instead when the incoming note is on a priority
    /// channel, e.g. 75ms.
    preempt_grace_priority: Option<String>,
}

impl Profile {
    /// Deserializes a file from the path into a profile.
    pub fn deserialize(path: &Path) -> Result<Profile, Box<dyn Error>> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Profile>()?)
    }

    /// Returns the priority channels from the profile.
    pub fn priority_channels(&self) -> Vec<u8> {
        self.priority_channels.clone().unwrap_or_default()
    }

    /// Returns the excluded channels from the profile.
    pub fn exclude_channels(&self) -> Vec<u8> {
        self.exclude_channels.clone().unwrap_or_default()
    }

    /// Returns whether velocities should be rescaled.
    pub fn normalize_velocity(&self) -> bool {
        self.normalize_velocity.unwrap_or(false)
    }

    /// Returns the preemption grace threshold from the profile.
    pub fn preempt_grace(&self) -> Result<Duration, Box<dyn Error>> {
        match &self.preempt_grace {
            Some(grace) => Ok(DurationString::from_string(grace.clone())?.into()),
            None => Ok(GRACE),
        }
    }

    /// Returns the priority-channel preemption grace threshold from the profile.
    pub fn preempt_grace_priority(&self) -> Result<Duration, Box<dyn Error>> {
        match &self.preempt_grace_priority {
            Some(grace) => Ok(DurationString::from_string(grace.clone())?.into()),
            None => Ok(GRACE_PRIORITY),
        }
    }

    /// Converts the profile into encoder settings.
    pub fn to_settings(&self) -> Result<Settings, Box<dyn Error>> {
        Ok(Settings {
            priority_channels: self.priority_channels(),
            exclude_channels: self.exclude_channels(),
            normalize_velocity: self.normalize_velocity(),
            grace: self.preempt_grace()?,
            grace_priority: self.preempt_grace_priority()?,
        })
    }
}
