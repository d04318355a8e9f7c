//! Default tuning constants for notula.
//!
//! Shared across configuration types so the same numbers are not
//! duplicated in several `Default` impls.

use std::time::Duration;

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard for speech recognition and provides a good balance
/// between quality and computational efficiency for voice applications.
pub const SAMPLE_RATE: u32 = 16_000;

/// Default number of input channels. Multi-channel input is mixed down to
/// mono before it enters the segment buffer.
pub const CHANNELS: u16 = 1;

/// Hard cap on segment length in seconds, independent of silence behavior.
///
/// 300s (5 minutes) keeps worst-case segments small enough that a single
/// transcription call stays bounded.
pub const CHUNK_DURATION_SECS: f64 = 300.0;

/// RMS threshold below which a frame counts as candidate-silence for
/// segmentation timing (0.0 to 1.0 on normalized samples).
pub const SILENCE_THRESHOLD: f32 = 0.02;

/// Trailing silence in seconds before the current buffer is flushed.
///
/// 5 seconds keeps natural pauses inside one segment instead of splitting
/// mid-sentence.
pub const SILENCE_DURATION_SECS: f64 = 5.0;

/// Minimum segment duration in seconds; shorter buffers are discarded.
pub const MIN_AUDIO_DURATION_SECS: f64 = 3.0;

/// Content-acceptance RMS floor, set below the silence threshold so that
/// quiet but meaningful segments survive while effectively-empty ones do
/// not.
pub const NOISE_GATE_THRESHOLD: f32 = 0.015;

/// Minimum fraction of 100ms sub-chunks that must exceed the noise gate
/// for a segment to be kept.
pub const MIN_CONTENT_RATIO: f32 = 0.10;

/// Sub-chunk length used for the content-ratio analysis, in milliseconds.
pub const CONTENT_CHUNK_MS: u32 = 100;

/// Polling interval of the capture control loop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the bounded channel carrying frames out of the audio
/// callback. The callback never blocks; overruns are counted and logged.
pub const FRAME_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the bounded segment queue between capture and transcription.
pub const SEGMENT_QUEUE_CAPACITY: usize = 32;

/// How long a Block-policy enqueue waits before giving up on a full queue.
pub const QUEUE_BLOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the typed event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the drain queues holding completed segments and results for
/// consumers that poll instead of subscribing to events.
pub const DRAIN_QUEUE_CAPACITY: usize = 64;

/// Number of recent per-frame RMS readings kept for diagnostics.
pub const LEVEL_HISTORY_CAPACITY: usize = 100;

/// Interval between audio-level debug log lines.
pub const LEVEL_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// How long the transcription worker blocks waiting for a segment before
/// re-checking its stop flag.
pub const QUEUE_RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Bound on waiting for the capture control thread to join at shutdown.
pub const CAPTURE_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on waiting for the transcription worker to join at shutdown.
/// A worker still inside a model call after this is detached, not killed.
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum automatic restart attempts after the input stream dies mid-run.
pub const MAX_STREAM_RESTARTS: u32 = 5;

/// Base delay for exponential restart backoff (doubles per attempt).
pub const RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Subdirectory of the output dir where audio that failed transcription is
/// quarantined for offline retry.
pub const FAILED_DIR: &str = "failed";

/// Default Whisper model file for the native backend.
pub const DEFAULT_MODEL_PATH: &str = "models/ggml-base.bin";

/// Default model name passed to the reference CLI backend.
pub const DEFAULT_CLI_MODEL: &str = "base";

/// Default program name of the reference CLI backend.
pub const DEFAULT_CLI_PROGRAM: &str = "whisper";

/// Language value that triggers automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";

/// Default beam size for decoding.
pub const DEFAULT_BEAM_SIZE: u32 = 5;

/// Default sampling temperature for decoding.
pub const DEFAULT_TEMPERATURE: f32 = 0.0;

/// Report the GPU backend compiled into this build.
///
/// Returns a human-readable name based on the compile-time feature flags.
/// Only one GPU backend can be active at a time; if none is enabled,
/// returns "CPU".
pub fn gpu_backend() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA"
    } else if cfg!(feature = "vulkan") {
        "Vulkan"
    } else if cfg!(feature = "hipblas") {
        "HipBLAS (AMD)"
    } else if cfg!(feature = "openblas") {
        "OpenBLAS"
    } else {
        "CPU"
    }
}
