//! Sample-rate conversion using rubato.
//!
//! Both tracks are brought to a common mixing rate before they are combined.
//! The default algorithm is band-limited windowed-sinc interpolation
//! (Blackman-Harris window, 256 taps); a cheaper septic-polynomial mode is
//! available for quick previews.
//!
//! The output is trimmed so that its length is exactly
//! `round(frames * target / source)`: the resampler's startup delay is
//! measured from an impulse response and dropped, and its tail is flushed,
//! so duration is preserved to within one sample period and content stays
//! where it was in time.

use crate::audio::SampleBuffer;
use crate::error::{MixError, Result};
use rubato::{
    FastFixedIn, PolynomialDegree, Resampler as RubatoResampler, SincFixedIn,
    SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Input frames fed to rubato per call.
const CHUNK_SIZE: usize = 1024;

/// Interpolation algorithm used for rate conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleQuality {
    /// Windowed-sinc interpolation.
    #[default]
    Sinc,
    /// Septic polynomial interpolation.
    Fast,
}

/// Converts `buffer` to `target_rate`.
///
/// Returns a copy of the input when the rates already match.
///
/// # Errors
///
/// Returns [`MixError::Resampling`] if `target_rate` is zero, the buffer has
/// no frames, or rubato fails.
pub fn resample(
    buffer: &SampleBuffer,
    target_rate: u32,
    quality: ResampleQuality,
) -> Result<SampleBuffer> {
    if target_rate == 0 {
        return Err(MixError::Resampling(
            "target sample rate must be positive".into(),
        ));
    }
    if buffer.is_empty() {
        return Err(MixError::Resampling(
            "cannot resample a buffer with no frames".into(),
        ));
    }
    if buffer.sample_rate() == target_rate {
        debug!("Sample rate already at {}Hz, skipping resample", target_rate);
        return Ok(buffer.clone());
    }

    let ratio = target_rate as f64 / buffer.sample_rate() as f64;
    let channel_count = buffer.channel_count();
    let expected_frames = (buffer.frame_count() as f64 * ratio).round() as usize;

    debug!(
        "Resampling {} frames from {}Hz to {}Hz ({} channels, {:?})",
        buffer.frame_count(),
        buffer.sample_rate(),
        target_rate,
        channel_count,
        quality
    );

    let channels = match quality {
        ResampleQuality::Sinc => convert(
            |channels| {
                SincFixedIn::<f32>::new(ratio, 1.0, sinc_parameters(), CHUNK_SIZE, channels)
                    .map_err(construction_error)
            },
            buffer.channels(),
            ratio,
            expected_frames,
        )?,
        ResampleQuality::Fast => convert(
            |channels| {
                FastFixedIn::<f32>::new(
                    ratio,
                    1.0,
                    PolynomialDegree::Septic,
                    CHUNK_SIZE,
                    channels,
                )
                .map_err(construction_error)
            },
            buffer.channels(),
            ratio,
            expected_frames,
        )?,
    };

    let output = SampleBuffer::new(target_rate, channels)?;
    debug!(
        "Resampling completed: {:.4}s -> {:.4}s ({} frames)",
        buffer.duration(),
        output.duration(),
        output.frame_count()
    );
    Ok(output)
}

fn sinc_parameters() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

fn construction_error(e: impl std::fmt::Display) -> MixError {
    MixError::Resampling(format!("Failed to create resampler: {}", e))
}

/// Converts every channel of `input`, with the resampler's startup delay
/// removed and the output cut to exactly `expected_frames`.
///
/// `build` creates a resampler for the given channel count. The delay is
/// measured on a separate single-channel instance: `output_delay()` is not
/// reliable for every rubato resampler (the sinc one reports half its filter
/// length although its output is already centred).
fn convert<R, F>(
    build: F,
    input: &[Vec<f32>],
    ratio: f64,
    expected_frames: usize,
) -> Result<Vec<Vec<f32>>>
where
    R: RubatoResampler<f32>,
    F: Fn(usize) -> Result<R>,
{
    let delay = measure_delay(build(1)?, ratio)?;
    debug!("Resampler delay: {} frames", delay);

    let mut output = drive(build(input.len())?, input, delay + expected_frames)?;
    for channel in output.iter_mut() {
        channel.drain(..delay.min(channel.len()));
        channel.resize(expected_frames, 0.0);
    }
    Ok(output)
}

/// Finds the startup delay in output frames by locating the peak of an
/// impulse response.
fn measure_delay<R: RubatoResampler<f32>>(resampler: R, ratio: f64) -> Result<usize> {
    let impulse_at = CHUNK_SIZE / 2;
    let mut impulse = vec![0.0f32; 2 * CHUNK_SIZE];
    impulse[impulse_at] = 1.0;

    let reach = resampler.output_delay() + (impulse.len() as f64 * ratio).ceil() as usize;
    let response = drive(resampler, std::slice::from_ref(&impulse), reach)?;
    let response = &response[0];

    let peak = response
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
        .map_or(0, |(i, _)| i);

    // Parabolic fit through the peak and its neighbours for the sub-frame
    // position; matters when the ratio is not an integer.
    let mut position = peak as f64;
    if peak > 0 && peak + 1 < response.len() {
        let (left, centre, right) = (
            response[peak - 1] as f64,
            response[peak] as f64,
            response[peak + 1] as f64,
        );
        let curvature = left - 2.0 * centre + right;
        if curvature.abs() > f64::EPSILON {
            position += 0.5 * (left - right) / curvature;
        }
    }

    Ok((position - impulse_at as f64 * ratio).round().max(0.0) as usize)
}

/// Feeds all of `input` through `resampler` and flushes its tail until at
/// least `wanted` frames are out (or it stops producing).
fn drive<R: RubatoResampler<f32>>(
    mut resampler: R,
    input: &[Vec<f32>],
    wanted: usize,
) -> Result<Vec<Vec<f32>>> {
    let frames = input[0].len();
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(wanted); input.len()];

    let mut position = 0;
    while position + resampler.input_frames_next() <= frames {
        let end = position + resampler.input_frames_next();
        let chunk: Vec<&[f32]> = input.iter().map(|c| &c[position..end]).collect();
        let produced = resampler
            .process(&chunk, None)
            .map_err(|e| MixError::Resampling(e.to_string()))?;
        append(&mut output, produced);
        position = end;
    }

    if position < frames {
        let chunk: Vec<&[f32]> = input.iter().map(|c| &c[position..]).collect();
        let produced = resampler
            .process_partial(Some(chunk.as_slice()), None)
            .map_err(|e| MixError::Resampling(e.to_string()))?;
        append(&mut output, produced);
    }

    while output[0].len() < wanted {
        let produced = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| MixError::Resampling(e.to_string()))?;
        if produced[0].is_empty() {
            break;
        }
        append(&mut output, produced);
    }
    Ok(output)
}

fn append(output: &mut [Vec<f32>], produced: Vec<Vec<f32>>) {
    for (channel, samples) in output.iter_mut().zip(produced) {
        channel.extend_from_slice(&samples);
    }
}
