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
use crate::psg::Side;
use crate::tuning;

/// A drum-channel note-on captured at one instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hit {
    pub note: u8,
    pub velocity: u8,
}

/// How one group of drum notes sounds on a noise generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoiseProfile {
    /// The chip noise control register: feedback bit plus 2-bit shift rate.
    pub control: u8,
    /// Attenuation added on top of the hit's velocity attenuation.
    pub attenuation: u8,
    /// Decay sustain mask; higher masks ring out longer.
    pub sustain: u8,
}

/// The noise event chosen for one side of the stereo pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoiseEvent {
    pub side: Side,
    pub profile: NoiseProfile,
    pub attenuation: u8,
}

struct ProfileEntry {
    notes: &'static [u8],
    profile: NoiseProfile,
}

const fn entry(notes: &'static [u8], control: u8, attenuation: u8, sustain: u8) -> ProfileEntry {
    ProfileEntry {
        notes,
        profile: NoiseProfile {
            control,
            attenuation,
            sustain,
        },
    }
}

// General MIDI drum notes, grouped by the noise timbre that approximates
// them. Within one side the first matching group wins, so the groups are
// ordered by how much a pattern suffers when the sound goes missing.
const LEFT_PROFILES: &[ProfileEntry] = &[
    // Bass drums.
    entry(&[35, 36], 0b110, 0, 0b000),
    // Low toms.
    entry(&[41, 43, 45], 0b010, 2, 0b000),
    // High toms.
    entry(&[47, 48, 50], 0b001, 2, 0b000),
];

const RIGHT_PROFILES: &[ProfileEntry] = &[
    // Snares.
    entry(&[38, 40], 0b101, 1, 0b001),
    // Crash, splash and china cymbals.
    entry(&[49, 57, 55, 52], 0b100, 3, 0b111),
    // Open hi-hat.
    entry(&[46], 0b100, 4, 0b011),
    // Closed and pedal hi-hat.
    entry(&[42, 44], 0b100, 5, 0b000),
    // Ride cymbals and bell.
    entry(&[51, 53, 59], 0b100, 4, 0b011),
];

/// Selects at most one noise event per side for the drum hits at one
/// instant. Each chip has a single noise generator, so when several groups
/// match on the same side the highest-priority group plays and the rest are
/// discarded, as are hits matching no group at all. The loudest hit within
/// the winning group sets the velocity attenuation.
pub fn map_hits(hits: &[Hit]) -> Vec<NoiseEvent> {
    let mut events = Vec::with_capacity(2);
    for (side, profiles) in [
        (Side::Left, LEFT_PROFILES),
        (Side::Right, RIGHT_PROFILES),
    ] {
        if let Some(event) = map_side(side, profiles, hits) {
            events.push(event);
        }
    }
    events
}

fn map_side(side: Side, profiles: &[ProfileEntry], hits: &[Hit]) -> Option<NoiseEvent> {
    for entry in profiles {
        let velocity = hits
            .iter()
            .filter(|hit| entry.notes.contains(&hit.note))
            .map(|hit| hit.velocity)
            .max();
        if let Some(velocity) = velocity {
            return Some(NoiseEvent {
                side,
                profile: entry.profile,
                attenuation: (entry.profile.attenuation + tuning::velocity_to_attenuation(velocity))
                    .min(tuning::SILENCE),
            });
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    fn hit(note: u8, velocity: u8) -> Hit {
        Hit { note, velocity }
    }

    #[test]
    fn test_bass_drum_maps_left() {
        let events = map_hits(&[hit(36, 100)]);

        assert_eq!(1, events.len());
        assert_eq!(Side::Left, events[0].side);
        assert_eq!(0b110, events[0].profile.control);
        // Full-velocity kick sounds at the profile's base attenuation.
        assert_eq!(0, events[0].attenuation);
    }

    #[test]
    fn test_snare_maps_right() {
        let events = map_hits(&[hit(38, 100)]);

        assert_eq!(1, events.len());
        assert_eq!(Side::Right, events[0].side);
        assert_eq!(0b101, events[0].profile.control);
        assert_eq!(1, events[0].attenuation);
    }

    #[test]
    fn test_kick_and_snare_take_both_sides() {
        let events = map_hits(&[hit(36, 100), hit(38, 100)]);

        assert_eq!(2, events.len());
        assert_eq!(Side::Left, events[0].side);
        assert_eq!(Side::Right, events[1].side);
    }

    #[test]
    fn test_same_side_collisions_keep_the_higher_priority_group() {
        // Kick and low tom both want the left generator; the kick wins.
        let events = map_hits(&[hit(45, 100), hit(36, 100)]);
        assert_eq!(1, events.len());
        assert_eq!(0b110, events[0].profile.control);

        // Crash beats the closed hi-hat on the right.
        let events = map_hits(&[hit(42, 100), hit(49, 100)]);
        assert_eq!(1, events.len());
        assert_eq!(0b100, events[0].profile.control);
        assert_eq!(0b111, events[0].profile.sustain);
    }

    #[test]
    fn test_loudest_matching_hit_sets_the_velocity() {
        // Two snares at one instant: the louder one decides.
        let events = map_hits(&[hit(38, 20), hit(40, 100)]);

        assert_eq!(1, events.len());
        assert_eq!(1, events[0].attenuation);
    }

    #[test]
    fn test_quiet_hits_attenuate() {
        // Quiet closed hi-hat: base 5 plus the quietest velocity band.
        let events = map_hits(&[hit(42, 10)]);

        assert_eq!(1, events.len());
        assert_eq!(14, events[0].attenuation);
    }

    #[test]
    fn test_unmatched_hits_are_discarded() {
        // Hand clap and cowbell have no noise approximation.
        assert!(map_hits(&[hit(39, 100), hit(56, 100)]).is_empty());
        assert!(map_hits(&[]).is_empty());
    }
}
