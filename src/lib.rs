//! bgmix - Background-music mixing engine.
//!
//! Lays a foreground recording over a looping background track whose level
//! follows a two-trapezoid envelope, then exports 16-bit PCM WAV.

pub mod audio;
pub mod error;
pub mod mix;
pub mod settings;

// Re-export commonly used types
pub use audio::{decode_wav_file, encode_wav, export_to_wav, SampleBuffer};
pub use error::{MixError, Result};
pub use mix::{
    EnvelopeSpec, MixRequest, MixResult, MixingPipeline, OutputChannelMode, PipelineConfig,
    TrackSlot, Volume,
};
pub use settings::{EnvelopeStore, JsonFileStore};
