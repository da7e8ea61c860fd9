use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use gpuwire_core::WireConfig;
use gpuwire_dump::{decode_capture, Direction, DumpOptions};

#[derive(Debug, Parser)]
#[command(
    name = "gpuwire-dump",
    about = "Decode a captured gpuwire transport stream and print every record."
)]
struct Args {
    /// Capture file (bytes exactly as written to the transport)
    path: PathBuf,

    /// Decode server → client returns instead of client → server commands
    #[arg(long, action = clap::ArgAction::SetTrue)]
    returns: bool,

    /// The capture holds bare records without chunk framing
    #[arg(long, action = clap::ArgAction::SetTrue)]
    raw: bool,

    /// Override the reassembly limit (defaults to GPUWIRE_MAX_MESSAGE_BYTES or the built-in default)
    #[arg(long, value_name = "BYTES")]
    max_message_bytes: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = WireConfig::from_env().context("reading GPUWIRE_* configuration")?;
    if let Some(max) = args.max_message_bytes {
        config.max_message_bytes = max;
        config.chunk_size = config.chunk_size.min(max);
    }
    let opts = DumpOptions {
        direction: if args.returns {
            Direction::Returns
        } else {
            Direction::Commands
        },
        raw: args.raw,
        limits: config.transport_limits(),
    };

    let capture = std::fs::read(&args.path).with_context(|| format!("reading {}", args.path.display()))?;
    tracing::debug!(bytes = capture.len(), ?opts, "decoding capture");

    let records = decode_capture(&capture, &opts).with_context(|| format!("decoding {}", args.path.display()))?;
    for record in &records {
        println!("{record}");
    }
    println!("{} records", records.len());
    Ok(())
}
