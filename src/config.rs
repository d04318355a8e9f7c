//! Configuration surface for the capture → transcription pipeline.
//!
//! Parsed from TOML; every field has a default so a partial (or missing)
//! file still yields a working configuration.

use crate::defaults;
use crate::error::{NotulaError, Result};
use crate::queue::OverflowPolicy;
use crate::stt::engine::BackendKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub transcription: TranscriptionConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
}

/// Audio capture and segmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name; `None` uses the system default.
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Hard cap on segment length in seconds.
    pub chunk_duration_secs: f64,
    /// RMS below this counts as candidate-silence for segmentation timing.
    pub silence_threshold: f32,
    /// Trailing silence before the buffer is flushed, in seconds.
    pub silence_duration_secs: f64,
    /// Buffers shorter than this are discarded at flush, in seconds.
    pub min_audio_duration_secs: f64,
    /// Content-acceptance RMS floor; falls back to `silence_threshold`
    /// when unset.
    pub noise_gate_threshold: Option<f32>,
}

/// Transcription engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Which backend to construct at startup.
    pub backend: BackendKind,
    /// Model file for the native backend.
    pub model_path: PathBuf,
    /// Program name of the reference CLI backend.
    pub cli_program: String,
    /// Model name passed to the reference CLI backend.
    pub cli_model: String,
    /// Language code, or "auto" for detection.
    pub language: String,
    pub beam_size: u32,
    pub temperature: f32,
    /// Inference threads for the native backend (None = auto-detect).
    pub threads: Option<usize>,
}

/// Artifact storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory receiving `audio_YYYYMMDD_HHMMSS.wav` segments.
    pub output_dir: PathBuf,
}

/// Segment queue configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
            chunk_duration_secs: defaults::CHUNK_DURATION_SECS,
            silence_threshold: defaults::SILENCE_THRESHOLD,
            silence_duration_secs: defaults::SILENCE_DURATION_SECS,
            min_audio_duration_secs: defaults::MIN_AUDIO_DURATION_SECS,
            noise_gate_threshold: Some(defaults::NOISE_GATE_THRESHOLD),
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            model_path: PathBuf::from(defaults::DEFAULT_MODEL_PATH),
            cli_program: defaults::DEFAULT_CLI_PROGRAM.to_string(),
            cli_model: defaults::DEFAULT_CLI_MODEL.to_string(),
            language: defaults::AUTO_LANGUAGE.to_string(),
            beam_size: defaults::DEFAULT_BEAM_SIZE,
            temperature: defaults::DEFAULT_TEMPERATURE,
            threads: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::SEGMENT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::Block,
        }
    }
}

impl AudioConfig {
    /// The RMS floor used for content acceptance: the configured noise
    /// gate, or the silence threshold when no gate is set.
    pub fn effective_noise_gate(&self) -> f32 {
        self.noise_gate_threshold.unwrap_or(self.silence_threshold)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file
    /// doesn't exist. Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Ok(Self::default())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - NOTULA_MODEL → transcription.model_path
    /// - NOTULA_LANGUAGE → transcription.language
    /// - NOTULA_AUDIO_DEVICE → audio.device
    /// - NOTULA_OUTPUT_DIR → storage.output_dir
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(model) = std::env::var("NOTULA_MODEL")
            && !model.is_empty()
        {
            self.transcription.model_path = PathBuf::from(model);
        }
        if let Ok(language) = std::env::var("NOTULA_LANGUAGE")
            && !language.is_empty()
        {
            self.transcription.language = language;
        }
        if let Ok(device) = std::env::var("NOTULA_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }
        if let Ok(dir) = std::env::var("NOTULA_OUTPUT_DIR")
            && !dir.is_empty()
        {
            self.storage.output_dir = PathBuf::from(dir);
        }
        self
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> NotulaError {
            NotulaError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            }
        }

        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be positive"));
        }
        if self.audio.channels == 0 {
            return Err(invalid("audio.channels", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.audio.silence_threshold) {
            return Err(invalid(
                "audio.silence_threshold",
                "must be between 0.0 and 1.0",
            ));
        }
        if let Some(gate) = self.audio.noise_gate_threshold
            && !(0.0..=1.0).contains(&gate)
        {
            return Err(invalid(
                "audio.noise_gate_threshold",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.audio.silence_duration_secs <= 0.0 {
            return Err(invalid("audio.silence_duration_secs", "must be positive"));
        }
        if self.audio.chunk_duration_secs <= 0.0 {
            return Err(invalid("audio.chunk_duration_secs", "must be positive"));
        }
        if self.audio.min_audio_duration_secs >= self.audio.chunk_duration_secs {
            return Err(invalid(
                "audio.min_audio_duration_secs",
                "must be shorter than chunk_duration_secs",
            ));
        }
        if self.transcription.beam_size == 0 {
            return Err(invalid("transcription.beam_size", "must be at least 1"));
        }
        if self.queue.capacity == 0 {
            return Err(invalid("queue.capacity", "must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_audio_values_match_constants() {
        let audio = AudioConfig::default();
        assert_eq!(audio.sample_rate, 16_000);
        assert_eq!(audio.channels, 1);
        assert_eq!(audio.chunk_duration_secs, 300.0);
        assert_eq!(audio.silence_threshold, 0.02);
        assert_eq!(audio.silence_duration_secs, 5.0);
        assert_eq!(audio.min_audio_duration_secs, 3.0);
        assert_eq!(audio.noise_gate_threshold, Some(0.015));
    }

    #[test]
    fn effective_noise_gate_falls_back_to_silence_threshold() {
        let mut audio = AudioConfig::default();
        assert_eq!(audio.effective_noise_gate(), 0.015);

        audio.noise_gate_threshold = None;
        assert_eq!(audio.effective_noise_gate(), audio.silence_threshold);
    }

    #[test]
    fn load_parses_partial_toml_with_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[audio]\nsilence_threshold = 0.05\n\n[transcription]\nlanguage = \"de\"\n"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.audio.silence_threshold, 0.05);
        assert_eq!(config.transcription.language, "de");
        // Unspecified fields keep defaults
        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.queue.capacity, defaults::SEGMENT_QUEUE_CAPACITY);
    }

    #[test]
    fn load_rejects_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not valid toml [[[").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn load_or_default_returns_defaults_for_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/notula.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_or_default_propagates_parse_errors() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "audio = \"not a table\"").unwrap();
        assert!(Config::load_or_default(file.path()).is_err());
    }

    #[test]
    fn validate_rejects_zero_sample_rate() {
        let mut config = Config::default();
        config.audio.sample_rate = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sample_rate"));
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.audio.silence_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_min_duration_above_chunk_cap() {
        let mut config = Config::default();
        config.audio.min_audio_duration_secs = 400.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_queue_capacity() {
        let mut config = Config::default();
        config.queue.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn overflow_policy_parses_from_toml() {
        let config: Config = toml::from_str("[queue]\noverflow = \"drop-oldest\"\n").unwrap();
        assert_eq!(config.queue.overflow, OverflowPolicy::DropOldest);
    }

    #[test]
    fn backend_kind_parses_from_toml() {
        let config: Config = toml::from_str("[transcription]\nbackend = \"reference\"\n").unwrap();
        assert_eq!(config.transcription.backend, BackendKind::Reference);
    }
}
