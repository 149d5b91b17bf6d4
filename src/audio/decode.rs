//! WAV file decoding.
//!
//! Loads uncompressed WAV files into [`SampleBuffer`]s. Integer PCM is scaled
//! to [-1.0, 1.0) by `1 / 2^(bits - 1)`; float PCM is passed through as-is.

use crate::audio::SampleBuffer;
use crate::error::{MixError, Result};
use hound::{SampleFormat, WavReader};
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Decodes a WAV file from disk.
///
/// # Errors
///
/// Returns error if the file cannot be opened, is not a supported WAV
/// variant, or contains no channels.
pub fn decode_wav_file<P: AsRef<Path>>(path: P) -> Result<SampleBuffer> {
    let reader = WavReader::open(path.as_ref())?;
    debug!("Decoding {}", path.as_ref().display());
    decode(reader)
}

/// Decodes WAV data from any reader (e.g. an in-memory byte slice).
pub fn decode_wav<R: Read>(source: R) -> Result<SampleBuffer> {
    decode(WavReader::new(source)?)
}

fn decode<R: Read>(mut reader: WavReader<R>) -> Result<SampleBuffer> {
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => {
            if spec.bits_per_sample != 32 {
                return Err(MixError::Decode(format!(
                    "unsupported float width: {} bits",
                    spec.bits_per_sample
                )));
            }
            reader.samples::<f32>().collect::<std::result::Result<_, _>>()?
        }
        SampleFormat::Int => {
            if !(8..=32).contains(&spec.bits_per_sample) {
                return Err(MixError::Decode(format!(
                    "unsupported integer width: {} bits",
                    spec.bits_per_sample
                )));
            }
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    debug!(
        "Decoded {} samples: {} Hz, {} channel(s), {} bit {:?}",
        interleaved.len(),
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample,
        spec.sample_format
    );

    SampleBuffer::from_interleaved(spec.sample_rate, spec.channels as usize, &interleaved)
        .map_err(|e| MixError::Decode(e.to_string()))
}
