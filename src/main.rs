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
use chiptrack::config::Profile;
use chiptrack::encoder;
use chiptrack::player::Player;
use chiptrack::playsync::CancelHandle;
use chiptrack::{command, psg};
use clap::{crate_version, Parser, Subcommand};
use std::error::Error;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A MIDI to SN76489 converter and player."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Converts a MIDI file into a PSG command stream.
    Encode {
        /// The path to the MIDI file to convert.
        midi_path: String,
        /// The path to write the command stream to.
        out_path: String,
        /// The path to a conversion profile.
        #[arg[short, long]]
        profile: Option<String>,
        /// The channels to place first and protect from preemption. Should be a
        /// comma separated list of MIDI channels. For example, 4,2.
        #[arg[long]]
        priority_channels: Option<String>,
        /// The channels to drop entirely. Should be a comma separated list of
        /// MIDI channels. For example, 10,16.
        #[arg[long]]
        exclude_channels: Option<String>,
        /// Rescale velocities against the loudest one in the song.
        #[arg[short, long]]
        normalize_velocity: bool,
    },
    /// Plays a command stream through a PSG device.
    Play {
        /// The path to the command stream.
        stream_path: String,
        /// The device name to play through.
        #[arg[short, long, default_value = "console"]]
        device_name: String,
    },
    /// Prints the commands in a stream to stdout.
    Dump {
        /// The path to the command stream.
        stream_path: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Encode {
            midi_path,
            out_path,
            profile,
            priority_channels,
            exclude_channels,
            normalize_velocity,
        } => {
            let profile = match profile {
                Some(profile_path) => Profile::deserialize(&PathBuf::from(profile_path))?,
                None => Profile::default(),
            };

            let mut settings = profile.to_settings()?;
            if let Some(channels) = priority_channels {
                settings.priority_channels = parse_channels(&channels)?;
            }
            if let Some(channels) = exclude_channels {
                settings.exclude_channels = parse_channels(&channels)?;
            }
            if normalize_velocity {
                settings.normalize_velocity = true;
            }

            encoder::encode_file(
                &PathBuf::from(midi_path),
                &PathBuf::from(out_path),
                &settings,
            )?;
        }
        Commands::Play {
            stream_path,
            device_name,
        } => {
            let device = psg::get_device(&device_name)?;
            let player = Player::new(device);
            let cancel_handle = CancelHandle::new();

            let ctrl_c_handle = cancel_handle.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c_handle.cancel();
                }
            });

            tokio::task::spawn_blocking(move || {
                player.play_file(Path::new(&stream_path), cancel_handle)
            })
            .await??;
        }
        Commands::Dump { stream_path } => {
            let mut file = File::open(&stream_path)?;
            let commands = command::read_stream(&mut file)?;

            for command in commands {
                println!("{}", command);
            }
        }
    }

    Ok(())
}

/// Parses a comma separated list of MIDI channels.
fn parse_channels(list: &str) -> Result<Vec<u8>, Box<dyn Error>> {
    list.split(',')
        .map(|channel| Ok(channel.trim().parse::<u8>()?))
        .collect()
}
