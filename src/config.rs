//! Runtime settings for the recognition pipeline.

use std::{path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    gesture::Thresholds,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub preprocess: PreprocessConfig,
    pub recognition: RecognitionConfig,
    pub interpret: InterpretConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Samples averaged per point key.
    pub smoothing_window: usize,
    /// Entries below this visibility are dropped by filtering.
    pub visibility_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Wrist samples retained per side for wave/circle detection.
    pub history_size: usize,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpretConfig {
    pub mappings_file: PathBuf,
    pub callback_timeout_secs: u64,
    /// Bound of the action dispatcher queue.
    pub dispatch_queue: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            smoothing_window: 5,
            visibility_threshold: 0.5,
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            history_size: 15,
            thresholds: Thresholds::default(),
        }
    }
}

impl Default for InterpretConfig {
    fn default() -> Self {
        Self {
            mappings_file: PathBuf::from("configs/mappings.yaml"),
            callback_timeout_secs: 5,
            dispatch_queue: 32,
        }
    }
}

impl InterpretConfig {
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Self = toml::from_str(&content)?;
        settings.validate()?;
        log::info!("loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Returns the first out-of-range field as `Error::Config`.
    pub fn validate(&self) -> Result<()> {
        if self.preprocess.smoothing_window == 0 {
            return Err(Error::Config(
                "preprocess.smoothing_window must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.preprocess.visibility_threshold) {
            return Err(Error::Config(format!(
                "preprocess.visibility_threshold must be in [0, 1], got {}",
                self.preprocess.visibility_threshold
            )));
        }
        let circle_window = self.recognition.thresholds.circle_window;
        if self.recognition.history_size < circle_window {
            return Err(Error::Config(format!(
                "recognition.history_size must be at least {circle_window}, got {}",
                self.recognition.history_size
            )));
        }
        if circle_window < 2 {
            return Err(Error::Config(
                "recognition.thresholds.circle_window must be at least 2".to_string(),
            ));
        }
        if self.recognition.thresholds.fallback_shoulder_width <= 0.0 {
            return Err(Error::Config(
                "recognition.thresholds.fallback_shoulder_width must be positive".to_string(),
            ));
        }
        if self.interpret.callback_timeout_secs == 0 {
            return Err(Error::Config(
                "interpret.callback_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.interpret.dispatch_queue == 0 {
            return Err(Error::Config(
                "interpret.dispatch_queue must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
