//! Speech-to-text backends and the transcription worker.

pub mod engine;
#[cfg(feature = "whisper")]
pub mod whisper;
pub mod whisper_cli;
pub mod worker;
