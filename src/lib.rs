//! notula - continuous microphone transcription
//!
//! Samples a microphone continuously, groups the incoming audio into
//! utterance-sized segments using silence detection, and hands finished
//! segments to a Whisper transcription worker through a bounded queue.
//! The surrounding layers (configuration loading, scheduling, summaries,
//! upload, dashboards) consume this crate through [`Pipeline`] and its
//! event stream.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod capture;
pub mod config;
pub mod defaults;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod queue;
pub mod segment;
pub mod stt;

// Core capability traits (source → segment → transcribe)
pub use audio::source::{AudioFrame, AudioSource, MockAudioSource};
pub use stt::engine::{BackendKind, EngineOutput, MockEngine, SpeechEngine};

// Pipeline
pub use capture::{CaptureController, RestartPolicy};
pub use pipeline::Pipeline;
pub use stt::worker::{TranscriptionWorker, WorkerOptions, WorkerStats};

// Data model
pub use audio::level::AudioLevels;
pub use events::{EventBus, PipelineEvent};
pub use segment::{AudioSegment, SegmentTiming, TranscriptionResult};

// Error handling
pub use error::{NotulaError, Result};

// Config
pub use config::{AudioConfig, Config, QueueConfig, StorageConfig, TranscriptionConfig};
pub use queue::OverflowPolicy;

#[cfg(feature = "cpal-audio")]
pub use audio::device::{InputDevice, list_input_devices, test_device};
#[cfg(feature = "cpal-audio")]
pub use audio::source::CpalAudioSource;

/// Build version string from the crate metadata.
pub fn version_string() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
