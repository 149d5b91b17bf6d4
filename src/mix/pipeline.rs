//! Mixing pipeline.
//!
//! Owns the two loaded tracks and the most recent successful mix. Loading a
//! track starts its conversion to the mixing rate on its own thread, so the
//! caller is not blocked while the user is still adjusting settings. A mix
//! waits for any conversion still in flight, then runs the channel mixer.
//! Conversions do not run on the rayon pool, so a mix may be requested from
//! a rayon worker without waiting on work queued behind itself.
//!
//! Invariants:
//! - At most one mix runs at a time; a concurrent request fails with
//!   [`MixError::Busy`].
//! - The stored [`MixResult`] is only replaced by a complete, successful mix.
//! - Replacing a track while its previous conversion is pending discards that
//!   conversion's output.

use super::envelope::EnvelopeSpec;
use super::mixer::{self, OutputChannelMode};
use super::resample::{resample, ResampleQuality};
use super::volume::Volume;
use crate::audio::{encode_wav, export_to_wav, SampleBuffer, TrackInfo};
use crate::error::{MixError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;
use tracing::{debug, info, warn};

/// Default mixing rate (44.1 kHz).
pub const DEFAULT_MIXING_RATE: u32 = 44100;

/// Pipeline settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Rate both tracks are converted to before mixing.
    pub mixing_rate: u32,
    /// Resampling algorithm.
    pub quality: ResampleQuality,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mixing_rate: DEFAULT_MIXING_RATE,
            quality: ResampleQuality::default(),
        }
    }
}

/// Which of the two inputs a track is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSlot {
    /// Foreground recording, played once.
    Primary,
    /// Background recording, looped under the envelope.
    Secondary,
}

impl TrackSlot {
    fn index(self) -> usize {
        match self {
            TrackSlot::Primary => 0,
            TrackSlot::Secondary => 1,
        }
    }
}

impl fmt::Display for TrackSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackSlot::Primary => f.pad("primary"),
            TrackSlot::Secondary => f.pad("secondary"),
        }
    }
}

/// Per-invocation mix parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MixRequest {
    pub envelope: EnvelopeSpec,
    pub primary_volume: Volume,
    pub secondary_volume: Volume,
    pub channel_mode: OutputChannelMode,
}

/// A completed mix.
#[derive(Debug, Clone, PartialEq)]
pub struct MixResult {
    buffer: SampleBuffer,
}

impl MixResult {
    /// The mixed audio, for preview playback.
    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.buffer.duration()
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.buffer.sample_rate()
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.buffer.channel_count()
    }

    /// Display summary.
    pub fn info(&self) -> TrackInfo {
        self.buffer.info()
    }

    /// Encodes the mix as 16-bit PCM WAV bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_wav(&self.buffer)
    }
}

/// State of one input slot.
#[derive(Default)]
struct TrackState {
    /// Bumped every time the slot is reloaded.
    generation: u64,
    /// The track as loaded.
    source: Option<Arc<SampleBuffer>>,
    /// The track at the mixing rate, once available.
    ready: Option<Arc<SampleBuffer>>,
    /// Conversion running in the background.
    pending: Option<Receiver<Result<SampleBuffer>>>,
}

/// Clears the in-flight flag when a mix ends, however it ends.
struct MixGuard<'a>(&'a AtomicBool);

impl Drop for MixGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Orchestrates resampling, mixing and export for a pair of tracks.
pub struct MixingPipeline {
    config: PipelineConfig,
    tracks: [Mutex<TrackState>; 2],
    result: RwLock<Option<Arc<MixResult>>>,
    mixing: AtomicBool,
}

impl MixingPipeline {
    /// Creates an empty pipeline.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            tracks: Default::default(),
            result: RwLock::new(None),
            mixing: AtomicBool::new(false),
        }
    }

    /// Returns the pipeline settings.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Loads a track into `slot`, replacing whatever was there.
    ///
    /// If the track is not at the mixing rate, its conversion starts in the
    /// background and is awaited by the next [`mix`](Self::mix).
    pub fn load_track(&self, slot: TrackSlot, buffer: SampleBuffer) {
        let rate = self.config.mixing_rate;
        let quality = self.config.quality;
        let buffer = Arc::new(buffer);

        let mut state = self.track(slot);
        state.generation += 1;
        state.source = Some(Arc::clone(&buffer));
        // Dropping the old receiver orphans any conversion still running.
        state.pending = None;
        state.ready = None;

        debug!(
            "Loaded {} track (generation {}): {}",
            slot,
            state.generation,
            buffer.info()
        );

        if buffer.is_empty() || buffer.sample_rate() == rate {
            state.ready = Some(buffer);
            return;
        }

        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name(format!("bgmix-resample-{}", slot))
            .spawn(move || {
                // The receiver is gone if the slot was reloaded meanwhile.
                let _ = tx.send(resample(&buffer, rate, quality));
            });
        match spawned {
            Ok(_) => state.pending = Some(rx),
            // Leaving the slot unconverted makes the next mix convert it.
            Err(e) => warn!("Failed to start {} track conversion: {}", slot, e),
        }
    }

    /// Returns true if a track has been loaded into `slot`.
    pub fn has_track(&self, slot: TrackSlot) -> bool {
        self.track(slot).source.is_some()
    }

    /// Returns the most recent successful mix, if any.
    pub fn result(&self) -> Option<Arc<MixResult>> {
        self.result
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mixes the loaded tracks.
    ///
    /// On success the new result replaces the stored one and is returned.
    /// On failure the stored result is left as it was.
    ///
    /// # Errors
    ///
    /// - [`MixError::Busy`] if another mix is running
    /// - [`MixError::InvalidInput`] if a track is missing or empty, or the
    ///   envelope is invalid
    /// - [`MixError::Resampling`] if a track could not be converted
    pub fn mix(&self, request: &MixRequest) -> Result<Arc<MixResult>> {
        let _guard = self.begin_mix()?;

        let outcome = self.run_mix(request);
        match outcome {
            Ok(result) => {
                let result = Arc::new(result);
                *self.result.write().unwrap_or_else(PoisonError::into_inner) =
                    Some(Arc::clone(&result));
                Ok(result)
            }
            Err(e) => {
                warn!("Mix failed: {}", e);
                Err(e)
            }
        }
    }

    /// Encodes the current result as WAV bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.result().ok_or(MixError::NoMixResult)?.encode()
    }

    /// Writes the current result to a WAV file.
    pub fn export_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let result = self.result().ok_or(MixError::NoMixResult)?;
        export_to_wav(result.buffer(), path.as_ref())?;
        info!(
            "Exported {:.3}s mix to {}",
            result.duration(),
            path.as_ref().display()
        );
        Ok(())
    }

    fn begin_mix(&self) -> Result<MixGuard<'_>> {
        self.mixing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| MixError::Busy)?;
        Ok(MixGuard(&self.mixing))
    }

    fn run_mix(&self, request: &MixRequest) -> Result<MixResult> {
        request.envelope.validate()?;

        let primary = self.ready_track(TrackSlot::Primary)?;
        let secondary = self.ready_track(TrackSlot::Secondary)?;

        info!(
            "Mixing: primary {} Hz, secondary {} Hz, mixing rate {} Hz",
            primary.sample_rate(),
            secondary.sample_rate(),
            self.config.mixing_rate
        );

        let envelope = &request.envelope;
        let layout =
            mixer::MixLayout::new(&primary, &secondary, envelope, request.channel_mode);
        debug!(
            "Output buffer: main {:.3}s + start envelope {:.3}s + end envelope {:.3}s = {:.3}s ({} frames, {} ch)",
            primary.duration(),
            envelope.start_duration(),
            envelope.end_duration(),
            layout.total_duration,
            layout.frame_count,
            layout.channel_count
        );

        let buffer = mixer::render(
            &primary,
            &secondary,
            envelope,
            &layout,
            request.primary_volume.gain(),
            request.secondary_volume.gain(),
        )?;

        info!(
            "Mixed buffer created: {:.3}s, {} ch, {} Hz",
            buffer.duration(),
            buffer.channel_count(),
            buffer.sample_rate()
        );
        Ok(MixResult { buffer })
    }

    /// Returns `slot`'s track at the mixing rate, waiting for a pending
    /// conversion if needed.
    fn ready_track(&self, slot: TrackSlot) -> Result<Arc<SampleBuffer>> {
        loop {
            let (generation, converted) = {
                let mut state = self.track(slot);
                if let Some(ready) = &state.ready {
                    return Ok(Arc::clone(ready));
                }
                let generation = state.generation;
                match state.pending.take() {
                    Some(rx) => {
                        drop(state);
                        debug!("Waiting for {} track conversion", slot);
                        let converted = rx.recv().map_err(|_| {
                            MixError::Resampling(format!(
                                "{} track conversion was interrupted",
                                slot
                            ))
                        })?;
                        (generation, converted)
                    }
                    None => {
                        // No conversion running: the last one failed or never
                        // started. Convert here, without holding the slot.
                        let source = state.source.clone().ok_or_else(|| {
                            MixError::InvalidInput(format!("no {} track loaded", slot))
                        })?;
                        drop(state);
                        debug!("Converting {} track", slot);
                        (
                            generation,
                            resample(&source, self.config.mixing_rate, self.config.quality),
                        )
                    }
                }
            };

            let mut state = self.track(slot);
            if state.generation != generation {
                debug!("Discarding stale {} track conversion", slot);
                continue;
            }
            let converted = Arc::new(converted?);
            state.ready = Some(Arc::clone(&converted));
            return Ok(converted);
        }
    }

    fn track(&self, slot: TrackSlot) -> MutexGuard<'_, TrackState> {
        self.tracks[slot.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MixingPipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::WAV_HEADER_LEN;

    fn tone(rate: u32, channels: usize, frames: usize, value: f32) -> SampleBuffer {
        SampleBuffer::new(rate, vec![vec![value; frames]; channels]).unwrap()
    }

    fn short_envelope() -> EnvelopeSpec {
        EnvelopeSpec {
            fade_in1: 0.01,
            sustain1: 0.02,
            fade_out1: 0.02,
            fade_in2: 0.01,
            sustain2: 0.01,
            fade_out2: 0.01,
            max_db: 0.0,
            min_db: -24.0,
        }
    }

    fn request() -> MixRequest {
        MixRequest {
            envelope: short_envelope(),
            ..MixRequest::default()
        }
    }

    #[test]
    fn test_mix_at_native_rate() {
        let pipeline = MixingPipeline::default();
        pipeline.load_track(TrackSlot::Primary, tone(44100, 1, 4410, 0.1));
        pipeline.load_track(TrackSlot::Secondary, tone(44100, 2, 1000, 0.2));

        let result = pipeline.mix(&request()).unwrap();
        assert_eq!(result.sample_rate(), 44100);
        assert_eq!(result.channel_count(), 2);
        assert!((result.duration() - (0.1 + 0.05 + 0.03)).abs() < 2.0 / 44100.0);
        assert_eq!(pipeline.result().unwrap(), result);
    }

    #[test]
    fn test_inputs_are_normalized_to_mixing_rate() {
        let pipeline = MixingPipeline::new(PipelineConfig {
            mixing_rate: 48000,
            quality: ResampleQuality::Fast,
        });
        pipeline.load_track(TrackSlot::Primary, tone(22050, 1, 22050, 0.1));
        pipeline.load_track(TrackSlot::Secondary, tone(44100, 1, 4410, 0.2));

        let result = pipeline.mix(&request()).unwrap();
        assert_eq!(result.sample_rate(), 48000);
        assert!((result.duration() - 1.08).abs() < 2.0 / 48000.0);
    }

    #[test]
    fn test_missing_track_is_invalid_input() {
        let pipeline = MixingPipeline::default();
        pipeline.load_track(TrackSlot::Primary, tone(44100, 1, 100, 0.1));
        assert!(!pipeline.has_track(TrackSlot::Secondary));
        assert!(matches!(
            pipeline.mix(&request()),
            Err(MixError::InvalidInput(_))
        ));
        assert!(pipeline.result().is_none());
    }

    #[test]
    fn test_failed_mix_keeps_previous_result() {
        let pipeline = MixingPipeline::default();
        pipeline.load_track(TrackSlot::Primary, tone(44100, 1, 441, 0.1));
        pipeline.load_track(TrackSlot::Secondary, tone(44100, 1, 100, 0.2));
        let first = pipeline.mix(&request()).unwrap();

        pipeline.load_track(TrackSlot::Secondary, SampleBuffer::mono(44100, Vec::new()).unwrap());
        assert!(matches!(
            pipeline.mix(&request()),
            Err(MixError::InvalidInput(_))
        ));
        assert_eq!(pipeline.result().unwrap(), first);

        let bad_envelope = MixRequest {
            envelope: EnvelopeSpec {
                min_db: 6.0,
                ..short_envelope()
            },
            ..request()
        };
        assert!(pipeline.mix(&bad_envelope).is_err());
        assert_eq!(pipeline.result().unwrap(), first);
    }

    #[test]
    fn test_concurrent_mix_is_rejected() {
        let pipeline = MixingPipeline::default();
        pipeline.load_track(TrackSlot::Primary, tone(44100, 1, 100, 0.1));
        pipeline.load_track(TrackSlot::Secondary, tone(44100, 1, 100, 0.2));

        let guard = pipeline.begin_mix().unwrap();
        assert!(matches!(pipeline.mix(&request()), Err(MixError::Busy)));
        drop(guard);
        assert!(pipeline.mix(&request()).is_ok());
    }

    #[test]
    fn test_reloaded_track_discards_pending_conversion() {
        let pipeline = MixingPipeline::default();
        // Needs conversion; superseded before the mix looks at it.
        pipeline.load_track(TrackSlot::Primary, tone(22050, 1, 22050 * 3, 0.3));
        pipeline.load_track(TrackSlot::Primary, tone(44100, 1, 4410, 0.1));
        pipeline.load_track(TrackSlot::Secondary, tone(44100, 1, 100, 0.0));

        let result = pipeline.mix(&request()).unwrap();
        assert!((result.duration() - 0.18).abs() < 2.0 / 44100.0);
    }

    /// Replaces whatever conversion `slot` has with one the test controls.
    fn stub_conversion(
        pipeline: &MixingPipeline,
        slot: TrackSlot,
    ) -> mpsc::Sender<Result<SampleBuffer>> {
        let (tx, rx) = mpsc::channel();
        let mut state = pipeline.track(slot);
        state.ready = None;
        state.pending = Some(rx);
        tx
    }

    #[test]
    fn test_reload_while_mix_waits_discards_conversion() {
        let pipeline = MixingPipeline::default();
        pipeline.load_track(TrackSlot::Primary, tone(22050, 1, 2205, 0.3));
        pipeline.load_track(TrackSlot::Secondary, tone(44100, 1, 100, 0.0));
        let tx = stub_conversion(&pipeline, TrackSlot::Primary);

        thread::scope(|scope| {
            let mixing = scope.spawn(|| pipeline.mix(&request()));

            // Wait until the mix has picked up the conversion and is blocked on it.
            while pipeline.track(TrackSlot::Primary).pending.is_some() {
                thread::yield_now();
            }
            pipeline.load_track(TrackSlot::Primary, tone(44100, 1, 4410, 0.1));
            // Stale output from the replaced track arrives after the reload.
            tx.send(Ok(tone(44100, 1, 44100, 0.3))).unwrap();

            let result = mixing.join().unwrap().unwrap();
            assert!((result.duration() - 0.18).abs() < 2.0 / 44100.0);
        });
    }

    #[test]
    fn test_failed_conversion_is_retried_by_next_mix() {
        let pipeline = MixingPipeline::new(PipelineConfig {
            mixing_rate: 44100,
            quality: ResampleQuality::Fast,
        });
        pipeline.load_track(TrackSlot::Primary, tone(22050, 1, 2205, 0.1));
        pipeline.load_track(TrackSlot::Secondary, tone(44100, 1, 100, 0.0));
        let tx = stub_conversion(&pipeline, TrackSlot::Primary);
        tx.send(Err(MixError::Resampling("device lost".into()))).unwrap();

        assert!(matches!(
            pipeline.mix(&request()),
            Err(MixError::Resampling(_))
        ));
        assert!(pipeline.result().is_none());

        let result = pipeline.mix(&request()).unwrap();
        assert!((result.duration() - 0.18).abs() < 2.0 / 44100.0);
        assert!(pipeline.has_track(TrackSlot::Primary));
    }

    #[test]
    fn test_retried_conversion_does_not_hold_slot() {
        let pipeline = MixingPipeline::default();
        // Long enough that the retry is still running when the slot is reloaded.
        pipeline.load_track(TrackSlot::Primary, tone(22050, 1, 22050 * 5, 0.3));
        pipeline.load_track(TrackSlot::Secondary, tone(44100, 1, 100, 0.0));
        {
            let mut state = pipeline.track(TrackSlot::Primary);
            state.pending = None;
            state.ready = None;
        }

        thread::scope(|scope| {
            let mixing = scope.spawn(|| pipeline.mix(&request()));
            while !pipeline.mixing.load(Ordering::Acquire) {
                thread::yield_now();
            }
            // Neither call may wait for the retried conversion.
            assert!(pipeline.has_track(TrackSlot::Primary));
            pipeline.load_track(TrackSlot::Primary, tone(44100, 1, 4410, 0.1));

            let result = mixing.join().unwrap().unwrap();
            assert!((result.duration() - 0.18).abs() < 2.0 / 44100.0);
        });
    }

    #[test]
    fn test_export_requires_result() {
        let pipeline = MixingPipeline::default();
        assert!(matches!(pipeline.encode(), Err(MixError::NoMixResult)));

        pipeline.load_track(TrackSlot::Primary, tone(44100, 1, 441, 0.1));
        pipeline.load_track(TrackSlot::Secondary, tone(44100, 1, 100, 0.2));
        let result = pipeline.mix(&request()).unwrap();

        let bytes = pipeline.encode().unwrap();
        assert_eq!(bytes.len(), WAV_HEADER_LEN + result.buffer().frame_count() * 2);
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: MixRequest =
            serde_json::from_str(r#"{"secondary_volume": -12, "channel_mode": "mono"}"#).unwrap();
        assert_eq!(request.secondary_volume.db(), -12);
        assert_eq!(request.channel_mode, OutputChannelMode::Mono);
        assert_eq!(request.envelope, EnvelopeSpec::default());
    }
}
