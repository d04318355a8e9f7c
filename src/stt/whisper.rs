//! Native whisper.cpp backend via whisper-rs.
//!
//! The fast path: the GGML model is loaded once at startup and reused for
//! every segment. Requires cmake at build time; GPU acceleration comes
//! from the `cuda`/`vulkan`/`hipblas`/`openblas` features.

use crate::audio::wav;
use crate::defaults;
use crate::error::{NotulaError, Result};
use crate::segment::SegmentTiming;
use crate::stt::engine::{EngineOutput, SpeechEngine};
use std::path::{Path, PathBuf};
use std::sync::Once;
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters,
    install_logging_hooks,
};

static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Sample rate whisper.cpp expects; input at other rates is resampled.
const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// In-process Whisper engine.
///
/// The context itself is not shared: the transcription worker serializes
/// all calls behind its own engine lock, so one state per call suffices.
pub struct WhisperRsEngine {
    context: WhisperContext,
    model_name: String,
    threads: Option<usize>,
}

impl std::fmt::Debug for WhisperRsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperRsEngine")
            .field("model_name", &self.model_name)
            .field("threads", &self.threads)
            .field("context", &"<WhisperContext>")
            .finish()
    }
}

impl WhisperRsEngine {
    /// Load the model at `model_path`.
    ///
    /// # Errors
    /// `NotulaError::TranscriptionModelNotFound` when the file is missing,
    /// `NotulaError::Transcription` when whisper.cpp rejects it.
    pub fn new(model_path: PathBuf, threads: Option<usize>) -> Result<Self> {
        // Route whisper.cpp's chatty logging through the hooks once
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !model_path.exists() {
            return Err(NotulaError::TranscriptionModelNotFound {
                path: model_path.to_string_lossy().to_string(),
            });
        }

        let model_name = model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let mut context_params = WhisperContextParameters::default();
        // Fused attention kernels; also avoids the standalone softmax CUDA
        // kernel that crashes on Blackwell GPUs with older ggml.
        context_params.flash_attn(true);
        let context = WhisperContext::new_with_params(
            model_path
                .to_str()
                .ok_or_else(|| NotulaError::Transcription {
                    message: "Invalid UTF-8 in model path".to_string(),
                })?,
            context_params,
        )
        .map_err(|e| NotulaError::Transcription {
            message: format!("Failed to load Whisper model: {}", e),
        })?;

        tracing::info!(
            model = %model_name,
            gpu = defaults::gpu_backend(),
            "native whisper backend ready"
        );

        Ok(Self {
            context,
            model_name,
            threads,
        })
    }

    /// Name of the loaded model file, without extension.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl SpeechEngine for WhisperRsEngine {
    fn transcribe(
        &self,
        path: &Path,
        language: Option<&str>,
        beam_size: u32,
        temperature: f32,
    ) -> Result<EngineOutput> {
        let audio = wav::read_wav_resampled(path, WHISPER_SAMPLE_RATE)?;

        let mut state = self
            .context
            .create_state()
            .map_err(|e| NotulaError::Transcription {
                message: format!("Failed to create Whisper state: {}", e),
            })?;

        let mut params = if beam_size > 1 {
            FullParams::new(SamplingStrategy::BeamSearch {
                beam_size: beam_size as i32,
                patience: -1.0,
            })
        } else {
            FullParams::new(SamplingStrategy::Greedy { best_of: 1 })
        };

        match language {
            Some(lang) if lang != defaults::AUTO_LANGUAGE => {
                params.set_language(Some(lang));
                params.set_detect_language(false);
            }
            _ => {
                params.set_language(None);
                params.set_detect_language(true);
            }
        }

        params.set_temperature(temperature);
        if let Some(threads) = self.threads {
            params.set_n_threads(threads as i32);
        }

        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_translate(false);

        state
            .full(params, &audio)
            .map_err(|e| NotulaError::Transcription {
                message: format!("Whisper inference failed: {}", e),
            })?;

        let lang_id = state.full_lang_id_from_state();
        let detected = whisper_rs::get_lang_str(lang_id).unwrap_or("").to_string();

        let mut segments = Vec::new();
        let mut confidence_sum = 0.0_f64;
        for segment in state.as_iter() {
            // whisper.cpp reports timestamps in centiseconds and exposes no
            // per-segment average logprob; derive one from the no-speech
            // probability so both backends fill the same field.
            let speech_probability = (1.0 - segment.no_speech_probability() as f64).max(1e-6);
            confidence_sum += speech_probability;
            segments.push(SegmentTiming {
                start: segment.start_timestamp() as f64 / 100.0,
                end: segment.end_timestamp() as f64 / 100.0,
                text: segment.to_string(),
                avg_logprob: speech_probability.ln(),
            });
        }

        let language_probability = if segments.is_empty() {
            0.0
        } else {
            (confidence_sum / segments.len() as f64).clamp(0.0, 1.0)
        };

        Ok(EngineOutput {
            segments,
            language: detected,
            language_probability,
        })
    }

    fn name(&self) -> &'static str {
        "whisper-rs"
    }
}
