//! Preview playback of mixed audio.
//!
//! Plays a [`SampleBuffer`] through the default output device using rodio.
//! The player keeps the output stream alive for as long as it exists.

use crate::audio::SampleBuffer;
use crate::error::{MixError, Result};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::time::Duration;

/// Represents the current playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Not playing, position reset to start.
    Stopped,
    /// Currently playing.
    Playing,
    /// Paused at current position.
    Paused,
}

/// Plays mix previews on the default output device.
pub struct PreviewPlayer {
    /// Audio output stream (must be kept alive).
    _stream: OutputStream,
    /// Audio output handle for creating sinks.
    stream_handle: OutputStreamHandle,
    /// Queue currently holding the preview.
    sink: Sink,
}

impl PreviewPlayer {
    /// Opens the default output device.
    ///
    /// # Errors
    ///
    /// Returns [`MixError::Playback`] if no output device is available.
    pub fn new() -> Result<Self> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| MixError::Playback(format!("Failed to open audio output: {}", e)))?;
        let sink = Self::new_sink(&stream_handle)?;
        Ok(Self {
            _stream: stream,
            stream_handle,
            sink,
        })
    }

    fn new_sink(handle: &OutputStreamHandle) -> Result<Sink> {
        Sink::try_new(handle)
            .map_err(|e| MixError::Playback(format!("Failed to start audio playback: {}", e)))
    }

    /// Starts playing `buffer` from the beginning, replacing any preview
    /// already queued.
    pub fn play(&mut self, buffer: &SampleBuffer) -> Result<()> {
        self.stop()?;
        let source = SamplesBuffer::new(
            buffer.channel_count() as u16,
            buffer.sample_rate(),
            buffer.to_interleaved(),
        );
        self.sink.append(source);
        self.sink.play();
        Ok(())
    }

    /// Pauses playback at the current position.
    pub fn pause(&self) {
        self.sink.pause();
    }

    /// Resumes a paused preview.
    pub fn resume(&self) {
        self.sink.play();
    }

    /// Stops playback and discards the queued preview.
    pub fn stop(&mut self) -> Result<()> {
        self.sink.stop();
        self.sink = Self::new_sink(&self.stream_handle)?;
        Ok(())
    }

    /// Returns the current playback state.
    pub fn state(&self) -> PlaybackState {
        if self.sink.empty() {
            PlaybackState::Stopped
        } else if self.sink.is_paused() {
            PlaybackState::Paused
        } else {
            PlaybackState::Playing
        }
    }

    /// Blocks until the preview has finished playing.
    pub fn wait(&self) {
        self.sink.sleep_until_end();
    }

    /// Blocks for at most `timeout` or until the preview ends.
    pub fn wait_timeout(&self, timeout: Duration) {
        let step = Duration::from_millis(20);
        let mut waited = Duration::ZERO;
        while waited < timeout && self.state() != PlaybackState::Stopped {
            std::thread::sleep(step);
            waited += step;
        }
    }
}
