//! Reference backend: the openai-whisper command-line tool.
//!
//! Slower than the native backend but needs no model file management: the
//! CLI resolves models by name. Each call shells out with JSON output and
//! parses the sidecar file the tool writes next to the audio.

use crate::error::{NotulaError, Result};
use crate::segment::SegmentTiming;
use crate::stt::engine::{EngineOutput, SpeechEngine};
use serde::Deserialize;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Engine that invokes the reference `whisper` CLI per segment.
#[derive(Debug, Clone)]
pub struct WhisperCliEngine {
    program: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct CliTranscript {
    #[serde(default)]
    segments: Vec<CliSegment>,
    #[serde(default)]
    language: String,
}

#[derive(Debug, Deserialize)]
struct CliSegment {
    #[serde(default)]
    start: f64,
    #[serde(default)]
    end: f64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    avg_logprob: f64,
}

impl WhisperCliEngine {
    /// Probe the CLI and prepare an engine using `model` by name.
    ///
    /// # Errors
    /// `NotulaError::BackendUnavailable` when the program cannot be run.
    pub fn new(program: &str, model: &str) -> Result<Self> {
        let probe = Command::new(program)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match probe {
            Ok(status) if status.success() => {
                debug!(program, model, "reference whisper CLI available");
                Ok(Self {
                    program: program.to_string(),
                    model: model.to_string(),
                })
            }
            Ok(status) => Err(NotulaError::BackendUnavailable {
                backend: format!("{} (exit status {})", program, status),
            }),
            Err(e) => Err(NotulaError::BackendUnavailable {
                backend: format!("{} ({})", program, e),
            }),
        }
    }

    /// Model name handed to the CLI.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn sidecar_path(audio_path: &Path) -> std::path::PathBuf {
        let stem = audio_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        audio_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{stem}.json"))
    }
}

impl SpeechEngine for WhisperCliEngine {
    fn transcribe(
        &self,
        path: &Path,
        language: Option<&str>,
        beam_size: u32,
        temperature: f32,
    ) -> Result<EngineOutput> {
        let output_dir = path.parent().unwrap_or_else(|| Path::new("."));

        let mut command = Command::new(&self.program);
        command
            .arg(path)
            .args(["--model", &self.model])
            .args(["--output_format", "json"])
            .arg("--output_dir")
            .arg(output_dir)
            .args(["--beam_size", &beam_size.to_string()])
            .args(["--temperature", &temperature.to_string()])
            .args(["--verbose", "False"]);
        if let Some(lang) = language {
            command.args(["--language", lang]);
        }

        let output = command
            .stdout(Stdio::null())
            .output()
            .map_err(|e| NotulaError::Transcription {
                message: format!("Failed to run {}: {}", self.program, e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NotulaError::Transcription {
                message: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    stderr.lines().last().unwrap_or("")
                ),
            });
        }

        let sidecar = Self::sidecar_path(path);
        let json = std::fs::read_to_string(&sidecar).map_err(|e| NotulaError::Transcription {
            message: format!("Missing CLI output {}: {}", sidecar.display(), e),
        })?;
        // The sidecar is scratch output; remove it whether parsing works or not
        let _ = std::fs::remove_file(&sidecar);

        let transcript: CliTranscript =
            serde_json::from_str(&json).map_err(|e| NotulaError::Transcription {
                message: format!("Failed to parse CLI output: {}", e),
            })?;

        let segments = transcript
            .segments
            .into_iter()
            .map(|s| SegmentTiming {
                start: s.start,
                end: s.end,
                text: s.text,
                avg_logprob: s.avg_logprob,
            })
            .collect();

        Ok(EngineOutput {
            segments,
            language: transcript.language,
            // The reference tool does not report one; mirror its own
            // convention of treating the detected language as certain.
            language_probability: 1.0,
        })
    }

    fn name(&self) -> &'static str {
        "whisper-cli"
    }
}
