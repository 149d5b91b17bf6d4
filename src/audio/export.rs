//! Audio export functionality.
//!
//! Serializes a [`SampleBuffer`] into a canonical 16-bit PCM WAV stream:
//! a 44-byte RIFF header followed by interleaved little-endian samples.

use crate::audio::SampleBuffer;
use crate::error::{MixError, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// File name used when the caller does not choose one.
pub const DEFAULT_EXPORT_FILENAME: &str = "mixed_audio.wav";

/// Size of the canonical RIFF/WAVE header preceding the sample data.
pub const WAV_HEADER_LEN: usize = 44;

const BITS_PER_SAMPLE: u16 = 16;

/// Converts a float sample to PCM16.
///
/// The sample is clamped to [-1, 1]; negative values scale by 32768 and
/// non-negative values by 32767, then truncate toward zero.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Encodes a buffer as a 16-bit PCM WAV byte stream.
///
/// # Errors
///
/// Returns [`MixError::Encoding`] if:
/// - the buffer has more than two channels
/// - a channel's length disagrees with the frame count
/// - the data would not fit in a 32-bit RIFF size field
pub fn encode_wav(buffer: &SampleBuffer) -> Result<Vec<u8>> {
    let channel_count = buffer.channel_count();
    if !(1..=2).contains(&channel_count) {
        return Err(MixError::Encoding(format!(
            "unsupported channel count for PCM16 export: {}",
            channel_count
        )));
    }

    let frames = buffer.frame_count();
    if let Some(bad) = buffer.channels().iter().position(|c| c.len() != frames) {
        return Err(MixError::Encoding(format!(
            "channel {} has {} samples, expected {}",
            bad,
            buffer.channels()[bad].len(),
            frames
        )));
    }

    let block_align = channel_count * (BITS_PER_SAMPLE as usize / 8);
    let data_len = frames
        .checked_mul(block_align)
        .filter(|&len| len <= (u32::MAX as usize) - 36)
        .ok_or_else(|| MixError::Encoding(format!("{} frames exceed WAV size limit", frames)))?;

    let spec = WavSpec {
        channels: channel_count as u16,
        sample_rate: buffer.sample_rate(),
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(WAV_HEADER_LEN + data_len));
    {
        let mut writer = WavWriter::new(&mut cursor, spec).map_err(encoding_error)?;
        {
            let mut samples = writer.get_i16_writer((frames * channel_count) as u32);
            for i in 0..frames {
                for channel in buffer.channels() {
                    samples.write_sample(sample_to_i16(channel[i]));
                }
            }
            samples.flush().map_err(encoding_error)?;
        }
        writer.finalize().map_err(encoding_error)?;
    }

    let bytes = cursor.into_inner();
    debug!(
        "Encoded {} frames ({} ch, {} Hz) into {} bytes",
        frames,
        channel_count,
        buffer.sample_rate(),
        bytes.len()
    );
    Ok(bytes)
}

/// Encodes a buffer and writes it to a WAV file.
///
/// # Arguments
///
/// * `buffer` - The audio to export
/// * `output_path` - Path for the output WAV file
pub fn export_to_wav<P: AsRef<Path>>(buffer: &SampleBuffer, output_path: P) -> Result<()> {
    let bytes = encode_wav(buffer)?;
    fs::write(output_path.as_ref(), bytes)?;
    debug!("Wrote {}", output_path.as_ref().display());
    Ok(())
}

fn encoding_error(e: hound::Error) -> MixError {
    MixError::Encoding(e.to_string())
}
