//! LiveCap command-line host.
//!
//! Thin shell over `livecap-core`: argument parsing, logging setup, and
//! stdout formatting live here; every pipeline decision lives in the core.
//! Exit code is 0 on success and 1 on any unrecovered error.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "livecap", version, about = "Real-time speech transcription")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print resolved paths, devices, and registered components.
    Info {
        /// Emit machine-readable JSON instead of text.
        #[arg(long)]
        as_json: bool,
        /// Fail unless the demux binary resolves.
        #[arg(long)]
        ensure_demux: bool,
    },
    /// List capture devices.
    Devices,
    /// List registered engines.
    Engines,
    /// List registered translators.
    Translators,
    /// Transcribe a file, or stream from a microphone with --realtime.
    Transcribe(commands::TranscribeArgs),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Info {
            as_json,
            ensure_demux,
        } => commands::info(as_json, ensure_demux),
        Command::Devices => commands::devices(),
        Command::Engines => commands::engines(),
        Command::Translators => commands::translators(),
        Command::Transcribe(args) => commands::transcribe(args),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
