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

//! Plays command streams on a sound device in real time, stepping the decay
//! envelopes of all eight voices on a fixed tick.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use spin_sleep;
use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{error, info, span, warn, Level};

use crate::command::{self, Command, StreamError};
use crate::playsync::CancelHandle;
use crate::psg::{Device, NUM_VOICES};
use crate::tuning::{self, SILENCE};
use crate::util;

/// Envelope steps per second.
const TICK_HZ: u64 = 50;

/// Time between envelope steps.
const TICK_DURATION: Duration = Duration::from_millis(1000 / TICK_HZ);

/// The longest the player waits at the end of a stream for releasing
/// voices to reach silence.
const DRAIN_LIMIT: Duration = Duration::from_secs(3);

/// Default priority for the envelope tick thread when CHIPTRACK_THREAD_PRIORITY is unset.
const DEFAULT_TICK_THREAD_PRIORITY: u8 = 70;

/// Errors raised while playing a command stream.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("error reading song file: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// The envelope state of one voice. Attenuation climbs toward the target
/// one step per eligible tick; the sustain mask thins out the eligible
/// ticks, so 0b111 slows the climb to every eighth tick.
#[derive(Clone, Copy)]
struct VoiceState {
    attenuation: u8,
    target: u8,
    sustain_mask: u8,
}

impl Default for VoiceState {
    fn default() -> Self {
        VoiceState {
            attenuation: SILENCE,
            target: SILENCE,
            sustain_mask: 0,
        }
    }
}

/// Plays command streams on a sound device.
pub struct Player {
    device: Arc<dyn Device>,
    registers: [u16; 128],
}

impl Player {
    /// Creates a player for the given device.
    pub fn new(device: Arc<dyn Device>) -> Player {
        Player {
            device,
            registers: tuning::note_register_table(),
        }
    }

    /// Plays a command stream file.
    pub fn play_file(&self, path: &Path, cancel_handle: CancelHandle) -> Result<(), PlayerError> {
        let span = span!(Level::INFO, "play song");
        let _enter = span.enter();

        let mut file = File::open(path)?;
        let commands = command::read_stream(&mut file)?;

        info!(
            file = util::filename_display(path),
            device = %self.device,
            commands = commands.len(),
            "Playing song."
        );
        self.play(&commands, cancel_handle)
    }

    /// Plays the given commands, pacing delays against a wall-clock
    /// schedule. Returns once the stream has sounded out or the handle is
    /// cancelled; either way the chips end up silent.
    pub fn play(
        &self,
        commands: &[Command],
        cancel_handle: CancelHandle,
    ) -> Result<(), PlayerError> {
        let voices = Arc::new(Mutex::new([VoiceState::default(); NUM_VOICES]));
        let stop = Arc::new(AtomicBool::new(false));

        self.device.silence_all();
        let _guard = StopGuard {
            stop: stop.clone(),
            handle: Some(self.start_envelope_thread(voices.clone(), stop.clone())),
            device: self.device.clone(),
        };

        let start = Instant::now();
        let mut next_deadline = Instant::now();
        for command in commands {
            match *command {
                Command::NoteOn {
                    voice,
                    attenuation,
                    note,
                } => self.note_on(&voices, voice, attenuation, note),
                Command::NoiseOn {
                    side,
                    sustain,
                    attenuation,
                    control,
                } => self.noise_on(&voices, side.noise_voice(), sustain, attenuation, control),
                Command::Delay { milliseconds } => {
                    next_deadline += Duration::from_millis(u64::from(milliseconds));
                    // If the schedule slipped behind the wall clock, restart
                    // it from now instead of bursting through the backlog.
                    let now = Instant::now();
                    if next_deadline < now {
                        next_deadline = now;
                    }
                    if cancel_handle.wait_deadline(next_deadline) {
                        info!("Playback cancelled.");
                        return Ok(());
                    }
                }
                Command::NotesOff { voices: mask } => Player::notes_off(&voices, mask),
            }
        }

        self.drain(&voices, &cancel_handle);
        info!(
            elapsed = util::duration_minutes_seconds(start.elapsed()),
            "Finished playing."
        );
        Ok(())
    }

    /// Starts a tone voice. Pitch lands before level so the voice never
    /// sounds the previous pitch at the new level.
    fn note_on(
        &self,
        voices: &Mutex<[VoiceState; NUM_VOICES]>,
        voice: u8,
        attenuation: u8,
        note: u8,
    ) {
        let mut voices = voices.lock();
        self.device
            .set_frequency(voice, self.registers[usize::from(note.min(127))]);
        self.device.set_attenuation(voice, attenuation);
        voices[voice as usize] = VoiceState {
            attenuation,
            target: tuning::release_target(attenuation),
            sustain_mask: 0,
        };
    }

    /// Fires a noise generator. Noise is one-shot: it starts decaying
    /// toward silence immediately, slowed by its sustain mask.
    fn noise_on(
        &self,
        voices: &Mutex<[VoiceState; NUM_VOICES]>,
        voice: u8,
        sustain: u8,
        attenuation: u8,
        control: u8,
    ) {
        let mut voices = voices.lock();
        self.device.set_noise(voice, control);
        self.device.set_attenuation(voice, attenuation);
        voices[voice as usize] = VoiceState {
            attenuation,
            target: SILENCE,
            sustain_mask: sustain,
        };
    }

    /// Sends the masked voices into release. Their envelopes head for
    /// silence from wherever they are; no register write happens until the
    /// next tick.
    fn notes_off(voices: &Mutex<[VoiceState; NUM_VOICES]>, mask: u8) {
        let mut voices = voices.lock();
        for (voice, state) in voices.iter_mut().enumerate() {
            if mask & (1 << voice) != 0 {
                state.target = SILENCE;
            }
        }
    }

    /// Starts the envelope thread. It owns the tick schedule and steps
    /// every voice toward its target until stopped.
    fn start_envelope_thread(
        &self,
        voices: Arc<Mutex<[VoiceState; NUM_VOICES]>>,
        stop: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let device = self.device.clone();
        thread::spawn(move || {
            configure_tick_thread_priority();

            let mut counter = 0u8;
            let mut last_time = Instant::now();
            loop {
                if stop.load(Ordering::Relaxed) {
                    return;
                }
                Player::advance_envelopes(&voices, counter, device.as_ref());
                counter = (counter + 1) & 0b111;

                last_time += TICK_DURATION;
                spin_sleep::sleep(last_time - Instant::now());
            }
        })
    }

    /// Steps every envelope once. A voice moves only when it's louder than
    /// its target and the tick counter lines up with its sustain mask.
    fn advance_envelopes(
        voices: &Mutex<[VoiceState; NUM_VOICES]>,
        counter: u8,
        device: &dyn Device,
    ) {
        let mut voices = voices.lock();
        for (voice, state) in voices.iter_mut().enumerate() {
            if state.attenuation < state.target && counter & state.sustain_mask == 0 {
                state.attenuation += 1;
                device.set_attenuation(voice as u8, state.attenuation);
            }
        }
    }

    /// Lets releasing voices ring out. Everything still sounding goes into
    /// release first; the wait ends when all voices reach silence, the
    /// handle is cancelled, or the drain limit passes.
    fn drain(&self, voices: &Mutex<[VoiceState; NUM_VOICES]>, cancel_handle: &CancelHandle) {
        Player::notes_off(voices, u8::MAX);

        let limit = Instant::now() + DRAIN_LIMIT;
        loop {
            if voices
                .lock()
                .iter()
                .all(|state| state.attenuation == SILENCE)
            {
                return;
            }
            let next = Instant::now() + TICK_DURATION;
            if next > limit || cancel_handle.wait_deadline(next) {
                return;
            }
        }
    }
}

/// Stops the envelope thread and silences the chips when a play ends, no
/// matter how it ends.
struct StopGuard {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    device: Arc<dyn Device>,
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Error joining envelope thread.");
            }
        }
        self.device.silence_all();
    }
}

/// Reads CHIPTRACK_THREAD_PRIORITY (0-99) once when the tick thread starts.
fn tick_thread_priority() -> ThreadPriorityValue {
    std::env::var("CHIPTRACK_THREAD_PRIORITY")
        .ok()
        .and_then(|v| {
            let n = v.parse::<u8>().ok()?;
            (n < 100).then(|| ThreadPriorityValue::try_from(n).ok())?
        })
        .unwrap_or_else(|| ThreadPriorityValue::try_from(DEFAULT_TICK_THREAD_PRIORITY).unwrap())
}

/// Raises the current thread's priority so envelope ticks keep their
/// schedule under load.
fn configure_tick_thread_priority() {
    let priority = ThreadPriority::Crossplatform(tick_thread_priority());
    if let Err(e) = set_current_thread_priority(priority) {
        warn!(error = %e, "Failed to raise envelope tick thread priority");
    }
}

#[cfg(test)]
mod test {
    use crate::psg::{self, mock::Call, Side};

    use super::*;

    fn mock_device() -> (Arc<dyn Device>, Arc<psg::mock::Device>) {
        let device = psg::get_device("mock-player").expect("error getting device");
        let mock = device.to_mock().expect("error getting mock");
        (device, mock)
    }

    #[test]
    fn test_advance_envelopes() {
        let (device, mock) = mock_device();
        let voices = Mutex::new([VoiceState::default(); NUM_VOICES]);
        voices.lock()[0] = VoiceState {
            attenuation: 12,
            target: 14,
            sustain_mask: 0,
        };
        voices.lock()[7] = VoiceState {
            attenuation: 0,
            target: SILENCE,
            sustain_mask: 0b111,
        };

        Player::advance_envelopes(&voices, 0, device.as_ref());
        assert_eq!(Some(13), mock.last_attenuation(0));
        assert_eq!(Some(1), mock.last_attenuation(7));

        // Ticks 1 through 7: voice 0 reaches its target and stops; voice 7
        // is gated by its sustain mask and doesn't move.
        for counter in 1..8 {
            Player::advance_envelopes(&voices, counter, device.as_ref());
        }
        assert_eq!(Some(14), mock.last_attenuation(0));
        assert_eq!(Some(1), mock.last_attenuation(7));

        // The counter wraps and voice 7 steps again.
        Player::advance_envelopes(&voices, 0, device.as_ref());
        assert_eq!(Some(14), mock.last_attenuation(0));
        assert_eq!(Some(2), mock.last_attenuation(7));
    }

    #[test]
    fn test_notes_off_sets_targets() {
        let voices = Mutex::new([VoiceState::default(); NUM_VOICES]);
        voices.lock()[1] = VoiceState {
            attenuation: 3,
            target: 10,
            sustain_mask: 0,
        };
        voices.lock()[5] = VoiceState {
            attenuation: 0,
            target: 8,
            sustain_mask: 0,
        };

        Player::notes_off(&voices, 0b0000_0010);

        assert_eq!(SILENCE, voices.lock()[1].target);
        assert_eq!(8, voices.lock()[5].target);
    }

    #[test]
    fn test_play_sounds_and_releases() {
        let (device, mock) = mock_device();
        let player = Player::new(device);

        player
            .play(
                &[
                    Command::NoteOn {
                        voice: 0,
                        attenuation: 9,
                        note: 69,
                    },
                    Command::Delay { milliseconds: 50 },
                    Command::NotesOff {
                        voices: 0b0000_0001,
                    },
                ],
                CancelHandle::new(),
            )
            .expect("error playing");

        let calls = mock.calls();
        let frequency = calls
            .iter()
            .position(|call| {
                matches!(
                    call,
                    Call::Frequency {
                        voice: 0,
                        register: 85
                    }
                )
            })
            .expect("no frequency write");
        let attenuation = calls
            .iter()
            .position(|call| matches!(call, Call::Attenuation { voice: 0, level: 9 }))
            .expect("no attenuation write");
        assert!(frequency < attenuation);

        // The guard silenced everything on the way out.
        assert_eq!(Some(&Call::SilenceAll), calls.last());
        assert_eq!(Some(SILENCE), mock.last_attenuation(0));
    }

    #[test]
    fn test_play_noise() {
        let (device, mock) = mock_device();

        Player::new(device)
            .play(
                &[Command::NoiseOn {
                    side: Side::Right,
                    sustain: 0b011,
                    attenuation: 12,
                    control: 0b101,
                }],
                CancelHandle::new(),
            )
            .expect("error playing");

        let calls = mock.calls();
        assert!(calls.contains(&Call::Noise {
            voice: 7,
            control: 0b101
        }));
        assert_eq!(Some(SILENCE), mock.last_attenuation(7));
    }

    #[test]
    fn test_play_cancelled() {
        let (device, mock) = mock_device();
        let player = Player::new(device);
        let cancel_handle = CancelHandle::new();
        cancel_handle.cancel();

        let start = Instant::now();
        player
            .play(
                &[
                    Command::NoteOn {
                        voice: 0,
                        attenuation: 0,
                        note: 60,
                    },
                    Command::Delay {
                        milliseconds: 10_000,
                    },
                    Command::NoteOn {
                        voice: 1,
                        attenuation: 0,
                        note: 64,
                    },
                ],
                cancel_handle,
            )
            .expect("error playing");

        // The ten second delay was skipped, and the note after it never
        // sounded.
        assert!(start.elapsed() < Duration::from_secs(5));
        let calls = mock.calls();
        assert!(!calls
            .iter()
            .any(|call| matches!(call, Call::Frequency { voice: 1, .. })));
        assert_eq!(Some(&Call::SilenceAll), calls.last());
    }

    #[test]
    fn test_envelope_decays_during_playback() {
        let (device, mock) = mock_device();
        let player = Player::new(device);
        let cancel_handle = CancelHandle::new();

        let play_handle = cancel_handle.clone();
        let join = thread::spawn(move || {
            player.play(
                &[
                    Command::NoteOn {
                        voice: 0,
                        attenuation: 9,
                        note: 60,
                    },
                    Command::Delay {
                        milliseconds: 10_000,
                    },
                ],
                play_handle,
            )
        });

        // The tick thread walks attenuation 9 up to its hold level of 14
        // while the delay is still running.
        crate::test::eventually(
            || mock.last_attenuation(0) == Some(14),
            "voice 0 never decayed to its hold level",
        );

        cancel_handle.cancel();
        join.join()
            .expect("error joining play thread")
            .expect("error playing");
    }

    #[test]
    fn test_play_file() {
        let dir = tempfile::tempdir().expect("error creating temp dir");
        let path = dir.path().join("song.psg");
        let words = vec![
            Command::NoteOn {
                voice: 2,
                attenuation: 0,
                note: 60,
            }
            .to_word(),
            Command::Delay { milliseconds: 30 }.to_word(),
        ];
        let mut file = File::create(&path).expect("error creating file");
        command::write_stream(&mut file, &words).expect("error writing stream");
        drop(file);

        let (device, mock) = mock_device();
        Player::new(device)
            .play_file(&path, CancelHandle::new())
            .expect("error playing");

        assert!(mock
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Frequency { voice: 2, .. })));
    }

    #[test]
    fn test_play_file_missing() {
        let (device, _) = mock_device();

        let result = Player::new(device).play_file(
            Path::new("/nonexistent/song.psg"),
            CancelHandle::new(),
        );

        assert!(matches!(result, Err(PlayerError::Io(_))));
    }

    #[test]
    fn test_play_file_truncated() {
        let dir = tempfile::tempdir().expect("error creating temp dir");
        let path = dir.path().join("song.psg");
        std::fs::write(&path, [0x80u8, 0x01, 0xC0]).expect("error writing file");

        let (device, _) = mock_device();
        let result = Player::new(device).play_file(&path, CancelHandle::new());

        assert!(matches!(
            result,
            Err(PlayerError::Stream(StreamError::TruncatedWord(3)))
        ));
    }
}
