// SPDX-License-Identifier: MPL-2.0

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "prism")]
#[command(about = "Camera preview and recording pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the encoder elements available on this machine
    Encoders,

    /// Record the camera to an MP4 file without a preview window
    Record {
        /// Recording duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Output file path (default: ~/Videos/prism/video_TIMESTAMP.mp4)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Record an audio track
        #[arg(short, long)]
        audio: bool,

        /// Double the video bitrate
        #[arg(long)]
        hd: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=prism=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Encoders => cli::list_encoders(),
        Commands::Record {
            duration,
            output,
            audio,
            hd,
        } => cli::record(duration, output, audio, hd),
    }
}
