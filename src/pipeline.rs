//! Lifecycle glue: wires capture, queue, worker, and events together.
//!
//! Start order: transcription backend first (its failure aborts the start
//! with nothing running), then the worker, then capture. Stop order:
//! capture joins and performs the late flush, then the worker joins, then
//! leftover queue entries are cleared.

use crate::audio::level::AudioLevels;
use crate::audio::segmenter::SegmenterConfig;
use crate::audio::source::AudioSource;
use crate::capture::CaptureController;
use crate::config::Config;
use crate::defaults;
use crate::error::{NotulaError, Result};
use crate::events::{EventBus, PipelineEvent};
use crate::queue::SegmentQueue;
use crate::segment::{AudioSegment, TranscriptionResult};
use crate::stt::engine::SpeechEngine;
use crate::stt::worker::{TranscriptionWorker, WorkerOptions, WorkerStats};
use crossbeam_channel::Receiver;
use std::path::Path;
use tracing::{info, warn};

/// The capture → segmentation → transcription pipeline.
pub struct Pipeline {
    config: Config,
    events: EventBus,
    queue: SegmentQueue,
    capture: CaptureController,
    worker: Option<TranscriptionWorker>,
    running: bool,
}

impl Pipeline {
    /// Validate the configuration and assemble the (stopped) pipeline.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new();
        let queue = SegmentQueue::new(config.queue.capacity, config.queue.overflow);
        let capture = CaptureController::new(
            SegmenterConfig::from_config(&config.audio, &config.storage),
            queue.clone(),
            events.clone(),
        );

        Ok(Self {
            config,
            events,
            queue,
            capture,
            worker: None,
            running: false,
        })
    }

    /// The configuration the pipeline was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start against the configured input device and backend.
    #[cfg(feature = "cpal-audio")]
    pub fn start(&mut self) -> Result<()> {
        let source = crate::audio::source::CpalAudioSource::new(&self.config.audio)?;
        let engine = crate::stt::engine::create_engine(&self.config.transcription)?;
        self.start_with(Box::new(source), engine)
    }

    /// Start with an injected source and engine.
    ///
    /// Either failure leaves nothing running: the worker is only spawned
    /// after the engine exists, and is stopped again if capture cannot
    /// open its stream.
    pub fn start_with(
        &mut self,
        source: Box<dyn AudioSource>,
        engine: Box<dyn SpeechEngine>,
    ) -> Result<()> {
        if self.running {
            warn!("pipeline already running");
            return Ok(());
        }

        std::fs::create_dir_all(&self.config.storage.output_dir)?;

        info!(backend = engine.name(), "transcription backend initialized");
        let mut worker = TranscriptionWorker::spawn(
            engine,
            self.queue.clone(),
            self.events.clone(),
            WorkerOptions {
                language: self.config.transcription.language.clone(),
                beam_size: self.config.transcription.beam_size,
                temperature: self.config.transcription.temperature,
                failed_dir: self.config.storage.output_dir.join(defaults::FAILED_DIR),
            },
        );

        if let Err(e) = self.capture.start(source) {
            worker.stop();
            return Err(e);
        }

        self.worker = Some(worker);
        self.running = true;
        info!("pipeline started");
        Ok(())
    }

    /// Stop both loops, flush the remainder, and clear the queues.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;

        self.capture.stop();

        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }

        self.queue.clear();
        info!("pipeline stopped");
    }

    /// Stop ingesting frames without tearing down the stream.
    pub fn pause(&self) {
        self.capture.pause();
    }

    /// Resume ingesting frames.
    pub fn resume(&self) {
        self.capture.resume();
    }

    /// True while started and not paused.
    pub fn is_recording(&self) -> bool {
        self.running && self.capture.is_recording()
    }

    /// Subscribe to segment/transcription/failure events.
    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.events.receiver()
    }

    /// Drain segments completed since the last call.
    pub fn completed_segments(&self) -> Vec<AudioSegment> {
        self.capture.completed_segments()
    }

    /// Drain transcription results completed since the last call.
    pub fn completed_transcriptions(&self) -> Vec<TranscriptionResult> {
        self.worker
            .as_ref()
            .map(|w| w.completed_transcriptions())
            .unwrap_or_default()
    }

    /// Diagnostics snapshot of recent input levels.
    pub fn audio_levels(&self) -> AudioLevels {
        self.capture.audio_levels()
    }

    /// Worker statistics, when the pipeline has been started.
    pub fn stats(&self) -> Option<WorkerStats> {
        self.worker.as_ref().map(|w| w.stats())
    }

    /// Transcribe an arbitrary file synchronously through the running
    /// worker's engine.
    pub fn transcribe_file(&self, path: &Path) -> Result<TranscriptionResult> {
        let worker = self.worker.as_ref().ok_or_else(|| NotulaError::Other(
            "pipeline is not running".to_string(),
        ))?;
        worker.transcribe_file(path)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
