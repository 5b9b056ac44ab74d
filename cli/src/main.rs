use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use rtpa_sv_core::iec61850_90_5::header::{FrameHeader, HeaderContext};
use rtpa_sv_core::{ChannelPublisher, Decoder, DecoderOptions};

#[derive(Debug, Parser)]
#[command(name = "rtpa-sv")]
#[command(about = "Decode IEC 61850-90-5 sampled-value captures", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Decode every frame in a capture and print the published events as JSON lines.
    #[command(arg_required_else_help = true)]
    Decode {
        #[command(flatten)]
        input: InputArgs,
        /// JSON file with decoder options.
        #[arg(long)]
        options: Option<PathBuf>,
        /// openPDC-style connection string applied after the options file.
        #[arg(long)]
        connection_string: Option<String>,
        /// Directory searched for <identity>.etr definition files.
        #[arg(long)]
        etr_dir: Option<PathBuf>,
        /// Pretty-print each event.
        #[arg(long)]
        pretty: bool,
    },
    /// Print the decoded header of every frame in a capture.
    #[command(arg_required_else_help = true)]
    Headers {
        #[command(flatten)]
        input: InputArgs,
    },
}

#[derive(Debug, Args)]
struct InputArgs {
    /// Capture of back-to-back frames.
    file: PathBuf,
    /// The file holds hexadecimal text instead of raw bytes.
    #[arg(long)]
    hex: bool,
}

fn read_hex(path: &Path) -> Result<Vec<u8>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let digits: Vec<u8> = content
        .bytes()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        bail!("{} holds an odd number of hex digits", path.display());
    }
    digits
        .chunks(2)
        .map(|pair| -> Result<u8> {
            let text = std::str::from_utf8(pair)?;
            u8::from_str_radix(text, 16).with_context(|| format!("invalid hex byte '{}'", text))
        })
        .collect()
}

fn read_input(input: &InputArgs) -> Result<Vec<u8>> {
    if input.hex {
        read_hex(&input.file)
    } else {
        fs::read(&input.file).with_context(|| format!("reading {}", input.file.display()))
    }
}

fn load_options(
    options: Option<PathBuf>,
    connection_string: Option<String>,
    etr_dir: Option<PathBuf>,
) -> Result<DecoderOptions> {
    let mut decoder_options = match options {
        Some(path) => {
            let json = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            DecoderOptions::from_json(&json)?
        }
        None => DecoderOptions::default(),
    };
    if let Some(connection_string) = connection_string {
        decoder_options.apply_connection_string(&connection_string)?;
    }
    if etr_dir.is_some() {
        decoder_options.configuration_directory = etr_dir;
    }
    Ok(decoder_options)
}

fn decode(buffer: &[u8], options: DecoderOptions, pretty: bool) -> Result<()> {
    let (sender, receiver) = channel();
    let decoder = Decoder::new(options, Arc::new(ChannelPublisher::new(sender)));

    let mut offset = 0;
    let mut frames = 0;
    while offset < buffer.len() {
        let summary = match decoder.decode(buffer, offset, buffer.len() - offset) {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Stopping at offset {}: {}", offset, e);
                break;
            }
        };
        for event in receiver.try_iter() {
            let line = if pretty {
                serde_json::to_string_pretty(&event)?
            } else {
                serde_json::to_string(&event)?
            };
            println!("{}", line);
        }
        if summary.bytes_consumed == 0 {
            break;
        }
        offset += summary.bytes_consumed;
        frames += 1;
    }

    info!(
        "Decoded {} frame(s), {} of {} bytes, {} configuration(s) cached",
        frames,
        offset.min(buffer.len()),
        buffer.len(),
        decoder.resolver().len()
    );
    Ok(())
}

fn headers(buffer: &[u8]) -> Result<()> {
    let ctx = HeaderContext {
        tolerate_signature_failures: true,
        ..HeaderContext::default()
    };
    let mut offset = 0;
    while offset < buffer.len() {
        let header = FrameHeader::decode(buffer, offset, buffer.len() - offset, &ctx)
            .with_context(|| format!("decoding header at offset {}", offset))?;
        println!("{}", serde_json::to_string(&header)?);
        if header.frame_length == 0 {
            break;
        }
        offset += header.frame_length;
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Cli::parse();

    match args.command {
        Commands::Decode {
            input,
            options,
            connection_string,
            etr_dir,
            pretty,
        } => {
            let buffer = read_input(&input)?;
            let options = load_options(options, connection_string, etr_dir)?;
            decode(&buffer, options, pretty)
        }
        Commands::Headers { input } => headers(&read_input(&input)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_hex_ignores_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.hex");
        fs::write(&path, "AA 01\n00 10\r\n").unwrap();
        assert_eq!(read_hex(&path).unwrap(), vec![0xAA, 0x01, 0x00, 0x10]);

        fs::write(&path, "AA0").unwrap();
        assert!(read_hex(&path).is_err());
        fs::write(&path, "ZZ").unwrap();
        assert!(read_hex(&path).is_err());
    }

    #[test]
    fn test_connection_string_overrides_options_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        fs::write(&path, r#"{"guess_configuration": false, "default_sample_rate": 60}"#).unwrap();

        let options = load_options(
            Some(path),
            Some("guessConfiguration=true".to_string()),
            Some(dir.path().to_path_buf()),
        )
        .unwrap();
        assert!(options.guess_configuration);
        assert_eq!(options.default_sample_rate, 60);
        assert_eq!(options.configuration_directory.as_deref(), Some(dir.path()));
    }
}
