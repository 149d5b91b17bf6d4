//! Mixing engine.
//!
//! Combines a foreground recording with a looping background recording under
//! a two-trapezoid gain envelope. It provides:
//! - dB/linear volume conversion
//! - The envelope calculator
//! - Sample-rate conversion to a shared mixing rate
//! - The channel mixer (downmix/upmix, looping)
//! - A pipeline that owns the latest successful mix

pub mod envelope;
pub mod mixer;
pub mod pipeline;
pub mod resample;
pub mod volume;

pub use envelope::{envelope_gain, EnvelopeSpec};
pub use mixer::{mix, render, MixLayout, OutputChannelMode};
pub use pipeline::{MixRequest, MixResult, MixingPipeline, PipelineConfig, TrackSlot};
pub use resample::{resample, ResampleQuality};
pub use volume::{db_to_gain, Volume, MAX_VOLUME_DB, MIN_VOLUME_DB};
