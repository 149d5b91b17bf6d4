//! Track volume in decibels.

use crate::error::{MixError, Result};
use serde::{Deserialize, Serialize};

/// Lowest selectable volume; at or below this level a track is silent.
pub const MIN_VOLUME_DB: i32 = -60;

/// Highest selectable volume.
pub const MAX_VOLUME_DB: i32 = 12;

/// Converts decibels to a linear gain multiplier.
///
/// Anything at or below [`MIN_VOLUME_DB`] maps to exactly 0.
///
/// # Examples
///
/// ```
/// use bgmix::mix::db_to_gain;
///
/// assert_eq!(db_to_gain(0.0), 1.0);
/// assert_eq!(db_to_gain(-60.0), 0.0);
/// ```
pub fn db_to_gain(db: f64) -> f64 {
    if db <= MIN_VOLUME_DB as f64 {
        0.0
    } else {
        10f64.powf(db / 20.0)
    }
}

/// A per-track volume setting in whole decibels, within [-60, 12].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Volume(i32);

impl Volume {
    /// Unity gain.
    pub const UNITY: Volume = Volume(0);

    /// Silence.
    pub const MUTE: Volume = Volume(MIN_VOLUME_DB);

    /// Creates a volume from a dB value.
    ///
    /// # Errors
    ///
    /// Returns [`MixError::InvalidInput`] if `db` is outside [-60, 12].
    pub fn from_db(db: i32) -> Result<Self> {
        if !(MIN_VOLUME_DB..=MAX_VOLUME_DB).contains(&db) {
            return Err(MixError::InvalidInput(format!(
                "volume {} dB outside [{}, {}]",
                db, MIN_VOLUME_DB, MAX_VOLUME_DB
            )));
        }
        Ok(Self(db))
    }

    /// The setting in dB.
    pub fn db(self) -> i32 {
        self.0
    }

    /// The linear multiplier for this setting.
    pub fn gain(self) -> f64 {
        db_to_gain(self.0 as f64)
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::UNITY
    }
}

impl TryFrom<i32> for Volume {
    type Error = MixError;

    fn try_from(db: i32) -> Result<Self> {
        Self::from_db(db)
    }
}

impl From<Volume> for i32 {
    fn from(volume: Volume) -> Self {
        volume.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_to_gain() {
        assert_eq!(db_to_gain(-60.0), 0.0);
        assert_eq!(db_to_gain(-75.0), 0.0);
        assert_eq!(db_to_gain(0.0), 1.0);
        assert!((db_to_gain(12.0) - 3.981).abs() < 1e-3);
        assert!((db_to_gain(-6.0) - 0.501).abs() < 1e-3);
    }

    #[test]
    fn test_volume_range() {
        assert!(Volume::from_db(-60).is_ok());
        assert!(Volume::from_db(12).is_ok());
        assert!(matches!(Volume::from_db(13), Err(MixError::InvalidInput(_))));
        assert!(matches!(Volume::from_db(-61), Err(MixError::InvalidInput(_))));
        assert_eq!(Volume::MUTE.gain(), 0.0);
        assert_eq!(Volume::default().gain(), 1.0);
    }

    #[test]
    fn test_volume_serde() {
        let volume: Volume = serde_json::from_str("-12").unwrap();
        assert_eq!(volume.db(), -12);
        assert_eq!(serde_json::to_string(&volume).unwrap(), "-12");
        assert!(serde_json::from_str::<Volume>("40").is_err());
    }
}
