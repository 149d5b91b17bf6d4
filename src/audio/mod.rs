//! Audio I/O around the mixing engine.
//!
//! This module provides the sample buffer type and the edges of the pipeline:
//! - Decoding WAV files into sample buffers
//! - Encoding sample buffers as 16-bit PCM WAV
//! - Preview playback through the default output device

pub mod buffer;
pub mod decode;
pub mod export;
pub mod playback;

pub use buffer::{format_time, SampleBuffer, TrackInfo};
pub use decode::{decode_wav, decode_wav_file};
pub use export::{encode_wav, export_to_wav, sample_to_i16, DEFAULT_EXPORT_FILENAME, WAV_HEADER_LEN};
pub use playback::{PlaybackState, PreviewPlayer};
