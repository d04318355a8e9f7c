//! Speech-engine capability boundary.
//!
//! The worker is polymorphic over the concrete engine: a fast native
//! whisper.cpp backend and a reference CLI backend expose the same
//! contract and are selected exactly once at startup via the factory.

use crate::config::TranscriptionConfig;
use crate::defaults;
use crate::error::{NotulaError, Result};
use crate::segment::SegmentTiming;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// What a backend returns for one audio file.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    /// Ordered sub-segments with timing and per-segment confidence.
    pub segments: Vec<SegmentTiming>,
    /// Detected (or forced) language code.
    pub language: String,
    /// Backend confidence in the detected language.
    pub language_probability: f64,
}

impl EngineOutput {
    /// Sub-segment texts joined into one trimmed string.
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Trait for speech-to-text engines.
///
/// Implementations block for the duration of the model call and may fail
/// on I/O or inference errors. `language` of `None` requests automatic
/// detection.
pub trait SpeechEngine: Send {
    /// Transcribe the audio file at `path`.
    fn transcribe(
        &self,
        path: &Path,
        language: Option<&str>,
        beam_size: u32,
        temperature: f32,
    ) -> Result<EngineOutput>;

    /// Short name of the backend, for logs and statistics.
    fn name(&self) -> &'static str;
}

/// Which backend the factory should construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Native when available, otherwise the reference CLI.
    #[default]
    Auto,
    /// whisper-rs / whisper.cpp in-process.
    Native,
    /// The openai-whisper command-line tool.
    Reference,
}

/// Build the configured engine.
///
/// Selection happens once; the returned engine is fixed for the worker's
/// lifetime. Construction failures (missing model file, unavailable CLI)
/// propagate so the pipeline start can fail cleanly instead of starting
/// half-wired.
pub fn create_engine(config: &TranscriptionConfig) -> Result<Box<dyn SpeechEngine>> {
    match config.backend {
        BackendKind::Native => create_native(config),
        BackendKind::Reference => create_reference(config),
        BackendKind::Auto => {
            match create_native(config) {
                Ok(engine) => Ok(engine),
                Err(native_err) => {
                    tracing::debug!(
                        error = %native_err,
                        "native backend unavailable; trying reference CLI"
                    );
                    create_reference(config).map_err(|_| native_err)
                }
            }
        }
    }
}

#[cfg(feature = "whisper")]
fn create_native(config: &TranscriptionConfig) -> Result<Box<dyn SpeechEngine>> {
    let engine = crate::stt::whisper::WhisperRsEngine::new(
        config.model_path.clone(),
        config.threads,
    )?;
    Ok(Box::new(engine))
}

#[cfg(not(feature = "whisper"))]
fn create_native(_config: &TranscriptionConfig) -> Result<Box<dyn SpeechEngine>> {
    Err(NotulaError::BackendUnavailable {
        backend: "native (built without the whisper feature)".to_string(),
    })
}

fn create_reference(config: &TranscriptionConfig) -> Result<Box<dyn SpeechEngine>> {
    let engine = crate::stt::whisper_cli::WhisperCliEngine::new(
        &config.cli_program,
        &config.cli_model,
    )?;
    Ok(Box::new(engine))
}

/// Languages commonly accepted by both backends, plus "auto".
pub fn supported_languages() -> &'static [&'static str] {
    &[
        defaults::AUTO_LANGUAGE,
        "en", "es", "fr", "de", "it", "pt", "ru", "ja", "ko", "zh", "ar", "hi", "tr", "pl", "nl",
        "sv", "da", "no", "fi",
    ]
}

/// Mock engine for testing.
///
/// Returns a configured transcript and records every path it was asked to
/// transcribe, so tests can assert ordering.
pub struct MockEngine {
    text: String,
    language: String,
    should_fail: bool,
    calls: Arc<Mutex<Vec<std::path::PathBuf>>>,
}

impl MockEngine {
    /// Create a mock returning a fixed transcript.
    pub fn new() -> Self {
        Self {
            text: "mock transcription".to_string(),
            language: "en".to_string(),
            should_fail: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Configure the transcript the mock returns.
    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    /// Configure the detected language.
    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    /// Configure the mock to fail on transcribe.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Handle on the recorded call order.
    pub fn call_log(&self) -> Arc<Mutex<Vec<std::path::PathBuf>>> {
        Arc::clone(&self.calls)
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechEngine for MockEngine {
    fn transcribe(
        &self,
        path: &Path,
        _language: Option<&str>,
        _beam_size: u32,
        _temperature: f32,
    ) -> Result<EngineOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(path.to_path_buf());
        }
        if self.should_fail {
            return Err(NotulaError::Transcription {
                message: "mock transcription failure".to_string(),
            });
        }
        Ok(EngineOutput {
            segments: vec![SegmentTiming {
                start: 0.0,
                end: 1.0,
                text: self.text.clone(),
                avg_logprob: -0.1,
            }],
            language: self.language.clone(),
            language_probability: 0.99,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
