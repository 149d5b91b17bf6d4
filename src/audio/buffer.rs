//! Decoded, planar audio data.
//!
//! A [`SampleBuffer`] is the unit of exchange between the decoder, the mixer
//! and the encoder. It is immutable once built: every constructor validates
//! the shape, so downstream code can index channels freely.

use crate::error::{MixError, Result};
use std::fmt;

/// Immutable planar audio buffer.
///
/// Samples are nominally in [-1.0, 1.0] but are not clamped; mixing may
/// produce values outside that range and the encoder clamps on output.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl SampleBuffer {
    /// Builds a buffer from per-channel sample vectors.
    ///
    /// # Errors
    ///
    /// Returns [`MixError::InvalidInput`] if:
    /// - `sample_rate` is zero
    /// - no channel is given
    /// - the channels do not all have the same length
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self> {
        if sample_rate == 0 {
            return Err(MixError::InvalidInput(
                "sample rate must be positive".into(),
            ));
        }
        let Some(first) = channels.first() else {
            return Err(MixError::InvalidInput(
                "buffer must have at least one channel".into(),
            ));
        };
        let frames = first.len();
        if let Some(bad) = channels.iter().position(|c| c.len() != frames) {
            return Err(MixError::InvalidInput(format!(
                "channel {} has {} frames, expected {}",
                bad,
                channels[bad].len(),
                frames
            )));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    /// Builds a single-channel buffer.
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Result<Self> {
        Self::new(sample_rate, vec![samples])
    }

    /// Builds a buffer by splitting interleaved (frame-major) samples.
    ///
    /// Trailing samples that do not form a complete frame are dropped.
    pub fn from_interleaved(sample_rate: u32, channel_count: usize, samples: &[f32]) -> Result<Self> {
        if channel_count == 0 {
            return Err(MixError::InvalidInput(
                "buffer must have at least one channel".into(),
            ));
        }
        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        Self::new(sample_rate, channels)
    }

    /// A buffer of `frames` zero samples.
    pub fn silence(sample_rate: u32, channel_count: usize, frames: usize) -> Result<Self> {
        Self::new(sample_rate, vec![vec![0.0; frames]; channel_count])
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of channels (always at least 1).
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        self.channels[0].len()
    }

    /// Returns true if the buffer holds no frames.
    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Samples of one channel, or None if out of range.
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// All channels, in order.
    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Per-frame average across all channels.
    pub fn downmix(&self) -> Vec<f32> {
        if self.channel_count() == 1 {
            return self.channels[0].clone();
        }
        let scale = 1.0 / self.channel_count() as f32;
        (0..self.frame_count())
            .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() * scale)
            .collect()
    }

    /// Samples in frame-major, channel-minor order.
    pub fn to_interleaved(&self) -> Vec<f32> {
        let channel_count = self.channel_count();
        let mut out = Vec::with_capacity(self.frame_count() * channel_count);
        for i in 0..self.frame_count() {
            out.extend(self.channels.iter().map(|c| c[i]));
        }
        out
    }

    /// Summary used for display.
    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            duration: self.duration(),
            sample_rate: self.sample_rate,
            channel_count: self.channel_count(),
            frame_count: self.frame_count(),
        }
    }
}

/// Display-oriented description of a loaded track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackInfo {
    /// Duration in seconds.
    pub duration: f64,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channel_count: usize,
    /// Number of frames.
    pub frame_count: usize,
}

impl TrackInfo {
    /// Estimated bitrate in kbps, assuming 16-bit samples.
    pub fn estimated_bitrate_kbps(&self) -> u32 {
        if self.duration <= 0.0 {
            return 0;
        }
        let bits = (self.frame_count * self.channel_count * 16) as f64;
        (bits / (self.duration * 1000.0)).round() as u32
    }

    /// "mono", "stereo", or "N channels".
    pub fn channel_label(&self) -> String {
        match self.channel_count {
            1 => "mono".to_string(),
            2 => "stereo".to_string(),
            n => format!("{} channels", n),
        }
    }
}

impl fmt::Display for TrackInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {} Hz, ~{} kbps, {}",
            format_time(self.duration),
            self.sample_rate,
            self.estimated_bitrate_kbps(),
            self.channel_label()
        )
    }
}

/// Formats seconds as `m:ss.mmm`.
///
/// # Examples
///
/// ```
/// use bgmix::audio::format_time;
///
/// assert_eq!(format_time(83.25), "1:23.250");
/// ```
pub fn format_time(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let minutes = (seconds / 60.0).floor() as u64;
    let remaining = (seconds % 60.0).floor() as u64;
    let millis = ((seconds % 1.0) * 1000.0).floor() as u64;
    format!("{}:{:02}.{:03}", minutes, remaining, millis)
}
