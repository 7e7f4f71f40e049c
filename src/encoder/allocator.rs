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
use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::psg::{Side, NUM_VOICES};

/// How long a note must have sounded before a priority-channel note may
/// preempt it.
pub const GRACE_PRIORITY: Duration = Duration::from_millis(75);

/// How long a note must have sounded before any other note may preempt it.
pub const GRACE: Duration = Duration::from_millis(150);

#[derive(Clone, Copy)]
struct ChannelEntry {
    sort_key: usize,
    side: Side,
    priority: bool,
}

/// Per-song channel handling, derived once from the channels present in the
/// input: the order note-ons are processed in, which channels are dropped
/// entirely, and which side of the stereo pair each channel prefers.
pub struct ChannelMap {
    entries: HashMap<u8, ChannelEntry>,
}

impl ChannelMap {
    /// Builds the map. Priority channels come first in their given order,
    /// the remaining present channels follow in ascending order, and
    /// excluded channels are removed. Sides alternate left, right, left down
    /// the resulting order, so the busiest channels land on their own chips.
    pub fn new(present: &[u8], priority: &[u8], excluded: &[u8]) -> ChannelMap {
        let mut ordered: Vec<(u8, bool)> = Vec::new();
        for channel in priority {
            if present.contains(channel) && !ordered.iter().any(|(ch, _)| ch == channel) {
                ordered.push((*channel, true));
            }
        }
        let mut remaining: Vec<u8> = present
            .iter()
            .copied()
            .filter(|ch| !ordered.iter().any(|(o, _)| o == ch))
            .collect();
        remaining.sort_unstable();
        remaining.dedup();
        ordered.extend(remaining.into_iter().map(|ch| (ch, false)));
        ordered.retain(|(ch, _)| !excluded.contains(ch));

        let mut entries = HashMap::new();
        for (sort_key, (channel, priority)) in ordered.into_iter().enumerate() {
            let side = if sort_key % 2 == 0 {
                Side::Left
            } else {
                Side::Right
            };
            entries.insert(
                channel,
                ChannelEntry {
                    sort_key,
                    side,
                    priority,
                },
            );
        }
        ChannelMap { entries }
    }

    /// Returns true if notes on this channel should be kept.
    pub fn contains(&self, channel: u8) -> bool {
        self.entries.contains_key(&channel)
    }

    /// The position of this channel in note-on processing order.
    pub fn sort_key(&self, channel: u8) -> Option<usize> {
        self.entries.get(&channel).map(|entry| entry.sort_key)
    }

    /// The side of the stereo pair this channel prefers.
    pub fn preferred_side(&self, channel: u8) -> Option<Side> {
        self.entries.get(&channel).map(|entry| entry.side)
    }

    /// Returns true if this channel's notes are never preempted.
    pub fn is_priority(&self, channel: u8) -> bool {
        self.entries
            .get(&channel)
            .map(|entry| entry.priority)
            .unwrap_or(false)
    }
}

/// A note currently occupying a voice slot.
#[derive(Clone, Copy)]
struct Held {
    pitch: u8,
    channel: u8,
    started_at: Duration,
}

/// One voice slot. Slots are reused in place; released_at survives clearing
/// so recency comparisons keep working after a note ends.
#[derive(Clone, Copy)]
struct Slot {
    holding: Option<Held>,
    released_at: Duration,
}

impl Default for Slot {
    fn default() -> Self {
        Slot {
            holding: None,
            released_at: Duration::ZERO,
        }
    }
}

/// Fits note-ons into the six tone voices. Slot indices are global voice
/// indices; the noise lanes (3 and 7) never hold a note.
pub struct Allocator {
    slots: [Slot; NUM_VOICES],
    map: ChannelMap,
    grace: Duration,
    grace_priority: Duration,
}

impl Allocator {
    /// Creates an allocator with the default preemption grace thresholds.
    pub fn new(map: ChannelMap) -> Allocator {
        Allocator::with_grace(map, GRACE, GRACE_PRIORITY)
    }

    /// Creates an allocator with specific preemption grace thresholds.
    pub fn with_grace(map: ChannelMap, grace: Duration, grace_priority: Duration) -> Allocator {
        Allocator {
            slots: [Slot::default(); NUM_VOICES],
            map,
            grace,
            grace_priority,
        }
    }

    /// The channel map this allocator was built from.
    pub fn channel_map(&self) -> &ChannelMap {
        &self.map
    }

    /// Finds a voice for a note starting at the given song time. Tries the
    /// preferred side's least recently used free voice, then the other
    /// side's, then preemption of a long-sounding non-priority note. Returns
    /// None when the note has to be dropped.
    pub fn place(&mut self, pitch: u8, channel: u8, at: Duration) -> Option<u8> {
        let side = self.map.preferred_side(channel)?;

        let voice = self
            .lru_free(side)
            .or_else(|| self.lru_free(side.opposite()))
            .or_else(|| self.preempt(channel, at));

        if let Some(voice) = voice {
            self.slots[voice as usize].holding = Some(Held {
                pitch,
                channel,
                started_at: at,
            });
        }
        voice
    }

    /// Releases the named note. Returns a mask of voices that fell silent;
    /// zero if the note was dropped earlier or its channel is unmapped.
    pub fn release(&mut self, pitch: u8, channel: u8, at: Duration) -> u8 {
        for (voice, slot) in self.slots.iter_mut().enumerate() {
            if let Some(held) = slot.holding {
                if held.pitch == pitch && held.channel == channel {
                    slot.holding = None;
                    slot.released_at = at;
                    return 1 << voice;
                }
            }
        }
        0
    }

    /// The least recently used free tone voice on a side, if any. Ties go to
    /// the lowest voice index.
    fn lru_free(&self, side: Side) -> Option<u8> {
        side.tone_voices()
            .iter()
            .filter(|&&voice| self.slots[voice as usize].holding.is_none())
            .min_by_key(|&&voice| self.slots[voice as usize].released_at)
            .copied()
    }

    /// Picks a voice to preempt for a note on the given channel, or None if
    /// every sounding note is protected. Only notes that are neither on a
    /// priority channel nor younger than the applicable grace threshold are
    /// eligible; the oldest onset among them loses its voice.
    fn preempt(&self, channel: u8, at: Duration) -> Option<u8> {
        let grace = if self.map.is_priority(channel) {
            self.grace_priority
        } else {
            self.grace
        };

        let (voice, held) = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(voice, slot)| slot.holding.map(|held| (voice as u8, held)))
            .filter(|(_, held)| !self.map.is_priority(held.channel))
            .filter(|(_, held)| at.saturating_sub(held.started_at) > grace)
            .min_by_key(|(_, held)| held.started_at)?;

        debug!(
            voice = voice,
            pitch = held.pitch,
            channel = held.channel,
            "Preempting a sounding note."
        );
        Some(voice)
    }
}
