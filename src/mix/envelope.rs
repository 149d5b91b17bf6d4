//! Background-track gain envelope.
//!
//! The envelope is two trapezoids bracketing the foreground recording: the
//! opening one (attack, sustain, release) plays before the foreground starts,
//! the closing one is anchored to the end of the mix. Between them the
//! background sits at `min_db`.
//!
//! ```text
//!  max   /‾‾‾‾\                         /‾‾‾‾\
//!       /      \                       /      \
//!  min /        \_____________________/        \____
//!     0   fi1 s1  fo1                end  fi2 s2 fo2
//! ```
//!
//! Ramps are linear in gain, not in dB.

use super::volume::db_to_gain;
use crate::error::{MixError, Result};
use serde::{Deserialize, Serialize};

/// Timing and level parameters for the background envelope.
///
/// Durations are in seconds, levels in dB. Field names on disk match the
/// settings format used by earlier releases.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeSpec {
    #[serde(rename = "fadeInTime1")]
    pub fade_in1: f64,
    #[serde(rename = "sustainTime1")]
    pub sustain1: f64,
    #[serde(rename = "fadeOutTime1")]
    pub fade_out1: f64,
    #[serde(rename = "fadeInTime2")]
    pub fade_in2: f64,
    #[serde(rename = "sustainTime2")]
    pub sustain2: f64,
    #[serde(rename = "fadeOutTime2")]
    pub fade_out2: f64,
    /// Level of the sustain plateaus.
    pub max_db: f64,
    /// Level everywhere outside the trapezoids.
    pub min_db: f64,
}

impl Default for EnvelopeSpec {
    fn default() -> Self {
        Self {
            fade_in1: 0.1,
            sustain1: 2.0,
            fade_out1: 3.0,
            fade_in2: 0.5,
            sustain2: 2.0,
            fade_out2: 0.5,
            max_db: 0.0,
            min_db: -24.0,
        }
    }
}

impl EnvelopeSpec {
    /// Checks that all durations are finite and non-negative and that
    /// `min_db <= max_db`.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("fadeInTime1", self.fade_in1),
            ("sustainTime1", self.sustain1),
            ("fadeOutTime1", self.fade_out1),
            ("fadeInTime2", self.fade_in2),
            ("sustainTime2", self.sustain2),
            ("fadeOutTime2", self.fade_out2),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(MixError::InvalidInput(format!(
                    "{} must be a non-negative number of seconds, got {}",
                    name, value
                )));
            }
        }
        if self.max_db.is_nan() || self.min_db.is_nan() {
            return Err(MixError::InvalidInput("envelope levels must be numbers".into()));
        }
        if self.min_db > self.max_db {
            return Err(MixError::InvalidInput(format!(
                "minDb ({}) exceeds maxDb ({})",
                self.min_db, self.max_db
            )));
        }
        Ok(())
    }

    /// Length of the opening trapezoid in seconds.
    pub fn start_duration(&self) -> f64 {
        self.fade_in1 + self.sustain1 + self.fade_out1
    }

    /// Length of the closing trapezoid in seconds.
    pub fn end_duration(&self) -> f64 {
        self.fade_in2 + self.sustain2 + self.fade_out2
    }

    /// Linear gain of the sustain plateaus.
    pub fn max_gain(&self) -> f64 {
        10f64.powf(self.max_db / 20.0)
    }

    /// Linear gain of the floor; exactly 0 at or below -60 dB.
    pub fn min_gain(&self) -> f64 {
        db_to_gain(self.min_db)
    }

    /// Evaluates the envelope at `time` seconds into a mix of `total_duration`.
    ///
    /// See [`envelope_gain`].
    pub fn gain(&self, time: f64, total_duration: f64) -> f64 {
        envelope_gain(time, total_duration, self)
    }
}

/// Evaluates the envelope at `time` seconds into a mix of `total_duration`.
///
/// Stages are tested in timeline order and the first match wins. The opening
/// trapezoid is always tested before the closing one, so when the mix is too
/// short for both to fit, the opening trapezoid takes precedence wherever the
/// two overlap. Zero-length stages never match.
pub fn envelope_gain(time: f64, total_duration: f64, spec: &EnvelopeSpec) -> f64 {
    let max_gain = spec.max_gain();
    let min_gain = spec.min_gain();

    // Opening trapezoid
    let attack1_end = spec.fade_in1;
    let sustain1_end = attack1_end + spec.sustain1;
    let release1_end = sustain1_end + spec.fade_out1;
    if time < attack1_end {
        return ramp(min_gain, max_gain, time / spec.fade_in1);
    }
    if time < sustain1_end {
        return max_gain;
    }
    if time < release1_end {
        return ramp(max_gain, min_gain, (time - sustain1_end) / spec.fade_out1);
    }

    // Closing trapezoid
    let end_time = total_duration - spec.end_duration();
    if time >= end_time {
        let attack2_end = end_time + spec.fade_in2;
        let sustain2_end = attack2_end + spec.sustain2;
        let release2_end = sustain2_end + spec.fade_out2;
        if time < attack2_end {
            return ramp(min_gain, max_gain, (time - end_time) / spec.fade_in2);
        }
        if time < sustain2_end {
            return max_gain;
        }
        if time < release2_end {
            return ramp(max_gain, min_gain, (time - sustain2_end) / spec.fade_out2);
        }
    }

    min_gain
}

#[inline]
fn ramp(from: f64, to: f64, fraction: f64) -> f64 {
    from + (to - from) * fraction
}
