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
use chiptrack::encoder::{self, Settings};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::hint::black_box;

/// Builds a song with quarter notes on each of the given channels plus a
/// kick/snare backbeat on the percussion channel.
fn generate_test_song(measures: usize, channels: &[u8]) -> Smf<'static> {
    let mut smf = Smf::new(Header::new(
        Format::SingleTrack,
        Timing::Metrical(u15::from(480)),
    ));
    let mut track = vec![TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::from(500_000))),
    }];

    let mut delta = u28::from(0);
    for measure in 0..measures {
        for beat in 0..4 {
            for (i, &channel) in channels.iter().enumerate() {
                track.push(TrackEvent {
                    delta,
                    kind: TrackEventKind::Midi {
                        channel: u4::from(channel - 1),
                        message: MidiMessage::NoteOn {
                            key: u7::from(pitch(measure, beat, i)),
                            vel: u7::from(64 + 10 * (i as u8 % 6)),
                        },
                    },
                });
                delta = u28::from(0);
            }
            track.push(TrackEvent {
                delta,
                kind: TrackEventKind::Midi {
                    channel: u4::from(9),
                    message: MidiMessage::NoteOn {
                        key: u7::from(if beat % 2 == 0 { 36 } else { 38 }),
                        vel: u7::from(100),
                    },
                },
            });

            // Release everything half a beat later.
            delta = u28::from(240);
            for (i, &channel) in channels.iter().enumerate() {
                track.push(TrackEvent {
                    delta,
                    kind: TrackEventKind::Midi {
                        channel: u4::from(channel - 1),
                        message: MidiMessage::NoteOff {
                            key: u7::from(pitch(measure, beat, i)),
                            vel: u7::from(0),
                        },
                    },
                });
                delta = u28::from(0);
            }
            delta = u28::from(240);
        }
    }

    track.push(TrackEvent {
        delta,
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    smf.tracks.push(track);
    smf
}

fn pitch(measure: usize, beat: usize, voice: usize) -> u8 {
    48 + ((measure * 4 + beat + voice * 5) % 24) as u8
}

fn benchmark_song_length(c: &mut Criterion) {
    let mut group = c.benchmark_group("song_length");

    for measures in [16, 64, 256] {
        let smf = generate_test_song(measures, &[1, 2, 3]);
        let settings = Settings::default();

        group.bench_function(BenchmarkId::new("measures", measures), |b| {
            b.iter(|| {
                let words = encoder::encode_smf(black_box(&smf), &settings)
                    .expect("error encoding");
                black_box(words)
            })
        });
    }

    group.finish();
}

fn benchmark_voice_pressure(c: &mut Criterion) {
    let mut group = c.benchmark_group("voice_pressure");

    // More simultaneous channels than voices forces the allocator through
    // spill-over and preemption on every beat.
    let channel_tests = vec![
        ("4_channels", vec![1u8, 2, 3, 4]),
        ("8_channels", vec![1u8, 2, 3, 4, 5, 6, 7, 8]),
        ("12_channels", vec![1u8, 2, 3, 4, 5, 6, 7, 8, 9, 11, 12, 13]),
    ];

    for (name, channels) in channel_tests {
        let smf = generate_test_song(64, &channels);
        let settings = Settings::default();

        group.bench_function(name, |b| {
            b.iter(|| {
                let words = encoder::encode_smf(black_box(&smf), &settings)
                    .expect("error encoding");
                black_box(words)
            })
        });
    }

    group.finish();
}

fn benchmark_settings(c: &mut Criterion) {
    let mut group = c.benchmark_group("settings");

    let smf = generate_test_song(64, &[1, 2, 3, 4, 5]);

    let setting_tests = vec![
        ("defaults", Settings::default()),
        (
            "normalized",
            Settings {
                normalize_velocity: true,
                ..Settings::default()
            },
        ),
        (
            "priority_and_excluded",
            Settings {
                priority_channels: vec![2, 4],
                exclude_channels: vec![5],
                ..Settings::default()
            },
        ),
    ];

    for (name, settings) in setting_tests {
        group.bench_function(name, |b| {
            b.iter(|| {
                let words = encoder::encode_smf(black_box(&smf), &settings)
                    .expect("error encoding");
                black_box(words)
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_song_length,
    benchmark_voice_pressure,
    benchmark_settings
);
criterion_main!(benches);
