//! bgmix - Mix a recording over a looping background track.
//!
//! Lays the primary recording over the secondary one, which loops for the
//! whole output under a two-trapezoid gain envelope, and writes the result as
//! 16-bit PCM WAV.
//!
//! # Usage
//!
//! ```bash
//! bgmix voice.wav music.wav                     # writes mixed_audio.wav
//! bgmix voice.wav music.wav -c mono --preview   # mono mix, play before export
//! bgmix voice.wav music.wav --min-db -30 --save-envelope
//! ```
//!
//! Envelope settings are read from `envelope_settings.json` (or `--envelope
//! PATH`) before mixing; missing or unreadable settings fall back to defaults.

use anyhow::{anyhow, bail, Context, Result};
use bgmix::audio::{decode_wav_file, PreviewPlayer, DEFAULT_EXPORT_FILENAME};
use bgmix::mix::{
    EnvelopeSpec, MixRequest, MixingPipeline, OutputChannelMode, PipelineConfig,
    ResampleQuality, TrackSlot, Volume,
};
use bgmix::settings::{load_or_default, EnvelopeStore, JsonFileStore, DEFAULT_SETTINGS_FILE};
use std::path::PathBuf;
use std::str::FromStr;

const USAGE: &str = "\
bgmix - Mix a recording over a looping background track

Usage: bgmix [OPTIONS] <PRIMARY.wav> <SECONDARY.wav>

Options:
  -o, --output PATH          Output WAV file (default: mixed_audio.wav)
  -c, --channels MODE        auto, mono or stereo (default: auto)
  --primary-volume DB        Primary track volume, -60..12 (default: 0)
  --secondary-volume DB      Secondary track volume, -60..12 (default: 0)
  --envelope PATH            Envelope settings file (default: envelope_settings.json)
  --save-envelope            Save the effective envelope back to the settings file
  --fade-in1 S, --sustain1 S, --fade-out1 S
                             Opening trapezoid timing in seconds
  --fade-in2 S, --sustain2 S, --fade-out2 S
                             Closing trapezoid timing in seconds
  --max-db DB, --min-db DB   Envelope levels
  -r, --rate HZ              Mixing sample rate (default: 44100)
  --fast                     Use fast polynomial resampling instead of sinc
  -p, --preview              Play the mix before exporting
  -h, --help                 Print this help message";

/// Command-line options for the application.
struct CliOptions {
    primary: PathBuf,
    secondary: PathBuf,
    output: PathBuf,
    settings: PathBuf,
    save_settings: bool,
    request: MixRequest,
    /// Envelope fields given on the command line, applied over the saved ones.
    envelope_overrides: Vec<(String, f64)>,
    config: PipelineConfig,
    preview: bool,
}

impl CliOptions {
    /// Parses command-line arguments.
    fn parse() -> Result<Self> {
        let mut args = std::env::args().skip(1);
        let mut positional: Vec<PathBuf> = Vec::new();
        let mut output = PathBuf::from(DEFAULT_EXPORT_FILENAME);
        let mut settings = PathBuf::from(DEFAULT_SETTINGS_FILE);
        let mut save_settings = false;
        let mut request = MixRequest::default();
        let mut envelope_overrides = Vec::new();
        let mut config = PipelineConfig::default();
        let mut preview = false;

        while let Some(arg) = args.next() {
            let mut value = |name: &str| {
                args.next()
                    .ok_or_else(|| anyhow!("{} requires a value", name))
            };
            match arg.as_str() {
                "-o" | "--output" => output = PathBuf::from(value(&arg)?),
                "-c" | "--channels" => {
                    request.channel_mode = OutputChannelMode::from_str(&value(&arg)?)?
                }
                "--primary-volume" => request.primary_volume = parse_volume(&arg, &value(&arg)?)?,
                "--secondary-volume" => {
                    request.secondary_volume = parse_volume(&arg, &value(&arg)?)?
                }
                "--envelope" => settings = PathBuf::from(value(&arg)?),
                "--save-envelope" => save_settings = true,
                "--fade-in1" | "--sustain1" | "--fade-out1" | "--fade-in2" | "--sustain2"
                | "--fade-out2" | "--max-db" | "--min-db" => {
                    let number = parse_number(&arg, &value(&arg)?)?;
                    envelope_overrides.push((arg.trim_start_matches("--").to_string(), number));
                }
                "-r" | "--rate" => {
                    let raw = value(&arg)?;
                    config.mixing_rate = raw
                        .parse()
                        .ok()
                        .filter(|&rate| rate > 0)
                        .ok_or_else(|| anyhow!("invalid sample rate: {}", raw))?;
                }
                "--fast" => config.quality = ResampleQuality::Fast,
                "-p" | "--preview" => preview = true,
                "-h" | "--help" => {
                    eprintln!("{}", USAGE);
                    std::process::exit(0);
                }
                other if other.starts_with('-') => {
                    bail!("Unknown option: {}\nUse --help for usage information", other)
                }
                other => positional.push(PathBuf::from(other)),
            }
        }

        let [primary, secondary]: [PathBuf; 2] = positional.try_into().map_err(|_| {
            anyhow!("Expected exactly two input files (primary and secondary)\n\n{}", USAGE)
        })?;

        Ok(Self {
            primary,
            secondary,
            output,
            settings,
            save_settings,
            request,
            envelope_overrides,
            config,
            preview,
        })
    }
}

fn parse_number(name: &str, raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| anyhow!("{} expects a number, got '{}'", name, raw))
}

fn parse_volume(name: &str, raw: &str) -> Result<Volume> {
    let db: i32 = raw
        .parse()
        .map_err(|_| anyhow!("{} expects whole decibels, got '{}'", name, raw))?;
    Ok(Volume::from_db(db)?)
}

/// Applies `--fade-in1`-style overrides to a loaded envelope.
fn apply_overrides(mut envelope: EnvelopeSpec, overrides: &[(String, f64)]) -> EnvelopeSpec {
    for (field, value) in overrides {
        let slot = match field.as_str() {
            "fade-in1" => &mut envelope.fade_in1,
            "sustain1" => &mut envelope.sustain1,
            "fade-out1" => &mut envelope.fade_out1,
            "fade-in2" => &mut envelope.fade_in2,
            "sustain2" => &mut envelope.sustain2,
            "fade-out2" => &mut envelope.fade_out2,
            "max-db" => &mut envelope.max_db,
            "min-db" => &mut envelope.min_db,
            _ => continue,
        };
        *slot = *value;
    }
    envelope
}

/// Main entry point.
fn main() -> Result<()> {
    // Parse CLI options first (before logging setup)
    let cli = CliOptions::parse()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Envelope is read fresh from the store, then adjusted by the command line.
    let store = JsonFileStore::new(&cli.settings);
    let envelope = apply_overrides(load_or_default(&store), &cli.envelope_overrides);
    envelope.validate().context("Invalid envelope settings")?;
    if cli.save_settings {
        store
            .save(&envelope)
            .with_context(|| format!("Failed to save settings: {}", cli.settings.display()))?;
        eprintln!("Saved envelope settings to {}", cli.settings.display());
    }
    let request = MixRequest {
        envelope,
        ..cli.request
    };

    let pipeline = MixingPipeline::new(cli.config);
    for (slot, path) in [
        (TrackSlot::Primary, &cli.primary),
        (TrackSlot::Secondary, &cli.secondary),
    ] {
        let buffer = decode_wav_file(path)
            .with_context(|| format!("Failed to load {} track: {}", slot, path.display()))?;
        eprintln!("{:<9} {}: {}", slot, path.display(), buffer.info());
        pipeline.load_track(slot, buffer);
    }

    let result = pipeline.mix(&request).context("Mixing failed")?;
    eprintln!("{:<9} {}", "mix", result.info());

    if cli.preview {
        let mut player = PreviewPlayer::new().context("Failed to initialize preview")?;
        eprintln!("Playing preview...");
        player.play(result.buffer())?;
        player.wait();
    }

    pipeline
        .export_to(&cli.output)
        .with_context(|| format!("Failed to export mix: {}", cli.output.display()))?;
    eprintln!("Exported to {}", cli.output.display());

    Ok(())
}
