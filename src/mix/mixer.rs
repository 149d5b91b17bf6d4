//! Channel mixer: foreground over a looping, enveloped background.
//!
//! The output timeline is `opening trapezoid + foreground + closing trapezoid`.
//! The foreground starts once the opening trapezoid has played and is never
//! looped; the background loops from frame 0 for the whole output and is
//! scaled by the envelope.

use super::envelope::EnvelopeSpec;
use crate::audio::SampleBuffer;
use crate::error::{MixError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// How the number of output channels is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputChannelMode {
    /// As many channels as the wider input (at most stereo).
    #[default]
    Auto,
    /// Downmix everything to one channel.
    Mono,
    /// Two channels; mono inputs are duplicated.
    Stereo,
}

impl OutputChannelMode {
    /// Resolves the mode to a concrete channel count for the given inputs.
    pub fn resolve(self, primary: &SampleBuffer, secondary: &SampleBuffer) -> usize {
        match self {
            OutputChannelMode::Mono => 1,
            OutputChannelMode::Stereo => 2,
            OutputChannelMode::Auto => primary
                .channel_count()
                .max(secondary.channel_count())
                .min(2),
        }
    }
}

impl fmt::Display for OutputChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputChannelMode::Auto => "auto",
            OutputChannelMode::Mono => "mono",
            OutputChannelMode::Stereo => "stereo",
        };
        f.write_str(name)
    }
}

impl FromStr for OutputChannelMode {
    type Err = MixError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(OutputChannelMode::Auto),
            "mono" => Ok(OutputChannelMode::Mono),
            "stereo" => Ok(OutputChannelMode::Stereo),
            other => Err(MixError::InvalidInput(format!(
                "unknown channel mode '{}' (expected auto, mono or stereo)",
                other
            ))),
        }
    }
}

/// Frame layout of a mix, derived from the inputs and the envelope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixLayout {
    /// Shared sample rate of both inputs and the output.
    pub sample_rate: u32,
    /// Output length in seconds.
    pub total_duration: f64,
    /// Output length in frames, `ceil(total_duration * sample_rate)`.
    pub frame_count: usize,
    /// Output channel count.
    pub channel_count: usize,
    /// Frame at which the foreground starts.
    pub start_offset: usize,
}

impl MixLayout {
    /// Computes the layout for mixing `primary` with the given envelope.
    pub fn new(
        primary: &SampleBuffer,
        secondary: &SampleBuffer,
        envelope: &EnvelopeSpec,
        mode: OutputChannelMode,
    ) -> Self {
        let rate = primary.sample_rate() as f64;
        let start = envelope.start_duration();
        let total_duration = primary.duration() + start + envelope.end_duration();
        Self {
            sample_rate: primary.sample_rate(),
            total_duration,
            frame_count: (total_duration * rate).ceil() as usize,
            channel_count: mode.resolve(primary, secondary),
            start_offset: (start * rate).ceil() as usize,
        }
    }
}

/// Mixes the foreground (`primary`) over the looping background (`secondary`).
///
/// Both buffers must already share a sample rate. `primary_gain` and
/// `secondary_gain` are linear multipliers (see [`super::Volume::gain`]).
/// No clipping is applied; the encoder clamps on export.
///
/// # Errors
///
/// Returns [`MixError::InvalidInput`] if:
/// - either buffer has no frames
/// - the sample rates differ
/// - the envelope is invalid
pub fn mix(
    primary: &SampleBuffer,
    secondary: &SampleBuffer,
    envelope: &EnvelopeSpec,
    primary_gain: f64,
    secondary_gain: f64,
    mode: OutputChannelMode,
) -> Result<SampleBuffer> {
    let layout = MixLayout::new(primary, secondary, envelope, mode);
    render(primary, secondary, envelope, &layout, primary_gain, secondary_gain)
}

/// Like [`mix`], but with a layout the caller already computed.
///
/// # Errors
///
/// Same as [`mix`], plus [`MixError::InvalidInput`] if `layout` was not
/// computed for these inputs.
pub fn render(
    primary: &SampleBuffer,
    secondary: &SampleBuffer,
    envelope: &EnvelopeSpec,
    layout: &MixLayout,
    primary_gain: f64,
    secondary_gain: f64,
) -> Result<SampleBuffer> {
    if primary.is_empty() {
        return Err(MixError::InvalidInput("primary track has no frames".into()));
    }
    if secondary.is_empty() {
        return Err(MixError::InvalidInput(
            "secondary track has no frames".into(),
        ));
    }
    if primary.sample_rate() != secondary.sample_rate() {
        return Err(MixError::InvalidInput(format!(
            "sample rates differ: {} Hz vs {} Hz",
            primary.sample_rate(),
            secondary.sample_rate()
        )));
    }
    envelope.validate()?;
    if layout.sample_rate != primary.sample_rate() || layout.channel_count == 0 {
        return Err(MixError::InvalidInput(
            "mix layout does not match the inputs".into(),
        ));
    }

    let rate = layout.sample_rate as f64;

    // The envelope only depends on time, so evaluate it once for all channels.
    let gains: Vec<f32> = (0..layout.frame_count)
        .into_par_iter()
        .map(|i| (envelope.gain(i as f64 / rate, layout.total_duration) * secondary_gain) as f32)
        .collect();

    let primary_gain = primary_gain as f32;
    let channels: Vec<Vec<f32>> = (0..layout.channel_count)
        .into_par_iter()
        .map(|c| {
            let fg = source_channel(primary, c, layout.channel_count);
            let bg = source_channel(secondary, c, layout.channel_count);
            mix_channel(&fg, &bg, &gains, primary_gain, layout.start_offset)
        })
        .collect();

    SampleBuffer::new(layout.sample_rate, channels)
}

/// Picks the samples feeding output channel `channel`.
///
/// Mono output averages all input channels; otherwise the matching input
/// channel is used, falling back to channel 0 when the input is narrower.
fn source_channel(buffer: &SampleBuffer, channel: usize, output_channels: usize) -> Cow<'_, [f32]> {
    if output_channels == 1 {
        return Cow::Owned(buffer.downmix());
    }
    let samples = buffer
        .channel(channel)
        .unwrap_or_else(|| buffer.channels()[0].as_slice());
    Cow::Borrowed(samples)
}

fn mix_channel(
    fg: &[f32],
    bg: &[f32],
    bg_gains: &[f32],
    fg_gain: f32,
    start_offset: usize,
) -> Vec<f32> {
    bg_gains
        .iter()
        .enumerate()
        .map(|(i, &gain)| {
            let fg_sample = i
                .checked_sub(start_offset)
                .and_then(|j| fg.get(j))
                .map_or(0.0, |&s| s * fg_gain);
            fg_sample + bg[i % bg.len()] * gain
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mix::volume::db_to_gain;

    fn flat_envelope(db: f64) -> EnvelopeSpec {
        EnvelopeSpec {
            fade_in1: 0.0,
            sustain1: 0.0,
            fade_out1: 0.0,
            fade_in2: 0.0,
            sustain2: 0.0,
            fade_out2: 0.0,
            max_db: db,
            min_db: db,
        }
    }

    #[test]
    fn test_channel_mode_resolution() {
        let mono = SampleBuffer::silence(44100, 1, 4).unwrap();
        let stereo = SampleBuffer::silence(44100, 2, 4).unwrap();
        let surround = SampleBuffer::silence(44100, 6, 4).unwrap();
        assert_eq!(OutputChannelMode::Auto.resolve(&mono, &mono), 1);
        assert_eq!(OutputChannelMode::Auto.resolve(&mono, &stereo), 2);
        assert_eq!(OutputChannelMode::Auto.resolve(&surround, &mono), 2);
        assert_eq!(OutputChannelMode::Mono.resolve(&stereo, &stereo), 1);
        assert_eq!(OutputChannelMode::Stereo.resolve(&mono, &mono), 2);
    }

    #[test]
    fn test_channel_mode_parse() {
        assert_eq!("Stereo".parse::<OutputChannelMode>().unwrap(), OutputChannelMode::Stereo);
        assert_eq!(OutputChannelMode::Mono.to_string(), "mono");
        assert!("quad".parse::<OutputChannelMode>().is_err());
    }

    #[test]
    fn test_default_envelope_scenario() {
        let primary = SampleBuffer::silence(44100, 1, 88200).unwrap();
        let secondary = SampleBuffer::mono(44100, vec![1.0; 22050]).unwrap();
        let envelope = EnvelopeSpec::default();
        let secondary_gain = 0.5;

        let out = mix(
            &primary,
            &secondary,
            &envelope,
            1.0,
            secondary_gain,
            OutputChannelMode::Auto,
        )
        .unwrap();

        let total = 2.0 + envelope.start_duration() + envelope.end_duration();
        assert!((total - 10.1).abs() < 1e-12);
        let expected_frames = (total * 44100.0).ceil() as usize;
        assert_eq!(out.frame_count(), expected_frames);
        assert_eq!(out.channel_count(), 1);
        assert_eq!(out.sample_rate(), 44100);
        // Background loops about twenty times over the output
        assert_eq!(expected_frames / 22050, 20);

        let first = out.channel(0).unwrap()[0];
        let min_gain = 10f64.powf(-24.0 / 20.0);
        assert!((first as f64 - min_gain * secondary_gain).abs() < 1e-6);
        assert!((min_gain - 0.0631).abs() < 1e-4);
    }

    #[test]
    fn test_primary_starts_after_opening_trapezoid() {
        let rate = 64;
        let primary = SampleBuffer::mono(rate, vec![0.25; 100]).unwrap();
        let secondary = SampleBuffer::mono(rate, vec![0.0; 7]).unwrap();
        let envelope = EnvelopeSpec {
            fade_in1: 0.25,
            sustain1: 0.5,
            fade_out1: 0.25,
            ..flat_envelope(0.0)
        };

        let out = mix(&primary, &secondary, &envelope, 2.0, 1.0, OutputChannelMode::Mono).unwrap();
        let layout = MixLayout::new(&primary, &secondary, &envelope, OutputChannelMode::Mono);
        assert_eq!(layout.start_offset, 64);

        let samples = out.channel(0).unwrap();
        let offset = layout.start_offset;
        assert_eq!(samples[offset - 1], 0.0);
        assert_eq!(samples[offset], 0.5);
        assert_eq!(samples[offset + 99], 0.5);
        assert_eq!(samples.len(), offset + 100);
    }

    #[test]
    fn test_secondary_is_periodic() {
        let rate = 800;
        let primary = SampleBuffer::silence(rate, 1, 1600).unwrap();
        let pattern: Vec<f32> = (0..37).map(|i| (i as f32 * 0.1).sin()).collect();
        let secondary = SampleBuffer::mono(rate, pattern).unwrap();
        let envelope = flat_envelope(-6.0);

        let out = mix(&primary, &secondary, &envelope, 1.0, 1.0, OutputChannelMode::Auto).unwrap();
        let samples = out.channel(0).unwrap();
        for i in 0..samples.len() - 37 {
            assert_eq!(samples[i], samples[i + 37]);
        }
    }

    #[test]
    fn test_stereo_downmix() {
        let rate = 100;
        let primary = SampleBuffer::new(rate, vec![vec![0.2, 0.4, 0.6], vec![0.0, 0.2, 0.2]]).unwrap();
        let secondary = SampleBuffer::new(rate, vec![vec![1.0, -1.0], vec![0.5, 0.5]]).unwrap();
        let envelope = EnvelopeSpec {
            fade_in1: 0.02,
            ..flat_envelope(0.0)
        };
        let envelope = EnvelopeSpec {
            min_db: -12.0,
            ..envelope
        };
        let (pv, sv) = (db_to_gain(-3.0), db_to_gain(3.0));

        let out = mix(&primary, &secondary, &envelope, pv, sv, OutputChannelMode::Mono).unwrap();
        let samples = out.channel(0).unwrap();
        let layout = MixLayout::new(&primary, &secondary, &envelope, OutputChannelMode::Mono);
        assert_eq!(samples.len(), layout.frame_count);

        let fg = [0.1, 0.3, 0.4];
        let bg = [0.75, -0.25];
        for (i, &value) in samples.iter().enumerate() {
            let t = i as f64 / rate as f64;
            let fg_part = i
                .checked_sub(layout.start_offset)
                .and_then(|j| fg.get(j))
                .map_or(0.0, |&s| pv * s);
            let expected = fg_part + sv * envelope.gain(t, layout.total_duration) * bg[i % 2];
            assert!((value as f64 - expected).abs() < 1e-5, "frame {}", i);
        }
    }

    #[test]
    fn test_mono_sources_fill_stereo_output() {
        let rate = 100;
        let primary = SampleBuffer::mono(rate, vec![0.5; 10]).unwrap();
        let secondary = SampleBuffer::new(rate, vec![vec![0.1; 4], vec![-0.1; 4]]).unwrap();
        let out = mix(
            &primary,
            &secondary,
            &flat_envelope(0.0),
            1.0,
            1.0,
            OutputChannelMode::Stereo,
        )
        .unwrap();
        let left = out.channel(0).unwrap();
        let right = out.channel(1).unwrap();
        assert!((left[0] - 0.6).abs() < 1e-6);
        assert!((right[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_sums_are_not_clipped() {
        let primary = SampleBuffer::mono(100, vec![0.9; 5]).unwrap();
        let secondary = SampleBuffer::mono(100, vec![0.9; 5]).unwrap();
        let out = mix(
            &primary,
            &secondary,
            &flat_envelope(0.0),
            1.0,
            1.0,
            OutputChannelMode::Auto,
        )
        .unwrap();
        assert!(out.channel(0).unwrap().iter().all(|&s| (s - 1.8).abs() < 1e-6));
    }

    #[test]
    fn test_rejects_empty_secondary() {
        let primary = SampleBuffer::mono(100, vec![0.1; 5]).unwrap();
        let empty = SampleBuffer::mono(100, Vec::new()).unwrap();
        let result = mix(
            &primary,
            &empty,
            &EnvelopeSpec::default(),
            1.0,
            1.0,
            OutputChannelMode::Auto,
        );
        assert!(matches!(result, Err(MixError::InvalidInput(_))));
    }

    #[test]
    fn test_render_uses_given_layout() {
        let primary = SampleBuffer::mono(100, vec![0.1; 30]).unwrap();
        let secondary = SampleBuffer::new(100, vec![vec![0.2; 4], vec![0.3; 4]]).unwrap();
        let envelope = EnvelopeSpec {
            fade_in1: 0.1,
            ..flat_envelope(0.0)
        };
        let layout = MixLayout::new(&primary, &secondary, &envelope, OutputChannelMode::Auto);

        let out = render(&primary, &secondary, &envelope, &layout, 1.0, 1.0).unwrap();
        assert_eq!(out.frame_count(), layout.frame_count);
        assert_eq!(out.channel_count(), layout.channel_count);
        assert_eq!(
            out,
            mix(&primary, &secondary, &envelope, 1.0, 1.0, OutputChannelMode::Auto).unwrap()
        );

        let foreign = MixLayout {
            sample_rate: 200,
            ..layout
        };
        assert!(matches!(
            render(&primary, &secondary, &envelope, &foreign, 1.0, 1.0),
            Err(MixError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rejects_rate_mismatch() {
        let primary = SampleBuffer::mono(44100, vec![0.1; 5]).unwrap();
        let secondary = SampleBuffer::mono(48000, vec![0.1; 5]).unwrap();
        let result = mix(
            &primary,
            &secondary,
            &EnvelopeSpec::default(),
            1.0,
            1.0,
            OutputChannelMode::Auto,
        );
        assert!(matches!(result, Err(MixError::InvalidInput(_))));
    }
}
