//! Envelope settings persistence.
//!
//! The engine never reads settings itself: callers load an [`EnvelopeSpec`]
//! through an [`EnvelopeStore`] before each mix and pass it in, so the
//! envelope used is always the latest saved one.

use crate::error::{MixError, Result};
use crate::mix::EnvelopeSpec;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Default settings file name.
pub const DEFAULT_SETTINGS_FILE: &str = "envelope_settings.json";

/// Somewhere envelope settings can be loaded from and saved to.
pub trait EnvelopeStore {
    /// Loads the saved envelope.
    ///
    /// # Errors
    ///
    /// Returns error if nothing is saved or the saved data is unreadable.
    fn load(&self) -> Result<EnvelopeSpec>;

    /// Saves `spec`, replacing any previous settings.
    fn save(&self, spec: &EnvelopeSpec) -> Result<()>;
}

/// Loads the saved envelope, falling back to the defaults on any error.
pub fn load_or_default(store: &dyn EnvelopeStore) -> EnvelopeSpec {
    match store.load().and_then(|spec| spec.validate().map(|_| spec)) {
        Ok(spec) => {
            debug!("Settings loaded: {:?}", spec);
            spec
        }
        Err(e) => {
            warn!("Failed to load envelope settings, using defaults: {}", e);
            EnvelopeSpec::default()
        }
    }
}

/// Stores settings as pretty-printed JSON in a file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Creates a store backed by `path`. The file need not exist yet.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EnvelopeStore for JsonFileStore {
    fn load(&self) -> Result<EnvelopeSpec> {
        let json = fs::read_to_string(&self.path)?;
        serde_json::from_str(&json).map_err(|e| {
            MixError::Settings(format!("{}: {}", self.path.display(), e))
        })
    }

    fn save(&self, spec: &EnvelopeSpec) -> Result<()> {
        let json = serde_json::to_string_pretty(spec)
            .map_err(|e| MixError::Settings(e.to_string()))?;
        fs::write(&self.path, json)?;
        debug!("Settings saved to {}", self.path.display());
        Ok(())
    }
}

/// Keeps settings in memory; useful for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    spec: Mutex<Option<EnvelopeSpec>>,
}

impl MemoryStore {
    /// Creates a store already holding `spec`.
    pub fn with_spec(spec: EnvelopeSpec) -> Self {
        Self {
            spec: Mutex::new(Some(spec)),
        }
    }
}

impl EnvelopeStore for MemoryStore {
    fn load(&self) -> Result<EnvelopeSpec> {
        self.spec
            .lock()
            .map_err(|_| MixError::Settings("settings lock poisoned".into()))?
            .ok_or_else(|| MixError::Settings("no settings saved".into()))
    }

    fn save(&self, spec: &EnvelopeSpec) -> Result<()> {
        *self
            .spec
            .lock()
            .map_err(|_| MixError::Settings("settings lock poisoned".into()))? = Some(*spec);
        Ok(())
    }
}
