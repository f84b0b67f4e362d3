//! `storyreel` CLI - render narration scripts into videos

mod cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use storyreel::SubtitleFormat;

#[derive(Parser)]
#[command(name = "storyreel")]
#[command(about = "Turn a narration script into a captioned video")]
#[command(version)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline for a script
    Render(cmd::render::RenderArgs),

    /// Allocate a total duration across scene texts
    Timing {
        /// Total duration in milliseconds
        #[arg(long)]
        total_ms: u64,

        /// Minimum duration per scene
        #[arg(long, default_value = "1200")]
        min_ms: u64,

        /// One argument per scene
        #[arg(required = true)]
        texts: Vec<String>,
    },

    /// Print captions for a script timed over a total duration
    Captions {
        /// Script file (.json or plain text)
        script: PathBuf,

        /// Total duration in milliseconds
        #[arg(long)]
        total_ms: u64,

        /// Minimum duration per caption
        #[arg(long, default_value = "1200")]
        min_ms: u64,

        /// Caption format (srt, vtt)
        #[arg(short, long, default_value = "srt")]
        format: SubtitleFormat,
    },

    /// Check that ffmpeg and ffprobe can be run
    Doctor {
        /// Config file (default: ~/.config/storyreel/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match cli.command {
        Commands::Render(args) => cmd::render::cmd_render(args).await?,
        Commands::Timing {
            total_ms,
            min_ms,
            texts,
        } => cmd::timing::cmd_timing(total_ms, min_ms, &texts),
        Commands::Captions {
            script,
            total_ms,
            min_ms,
            format,
        } => cmd::captions::cmd_captions(&script, total_ms, min_ms, format).await?,
        Commands::Doctor { config } => cmd::doctor::cmd_doctor(config.as_deref()).await?,
    }

    Ok(())
}
