//! Silence-driven segmentation state machine.
//!
//! Accumulates mono samples since the last flush and decides when (and
//! whether) the buffer becomes a persisted [`AudioSegment`]:
//! - trailing silence of at least `silence_duration` flushes the buffer,
//!   with the trailing-silence run trimmed off the artifact
//! - `chunk_duration` is a hard cap regardless of silence
//! - an explicit shutdown flush persists whatever remains
//!
//! A flushed buffer is discarded without producing an artifact when it is
//! shorter than `min_audio_duration` or fails the content checks (overall
//! RMS under the noise gate, or too few 100ms sub-chunks above it).

use crate::audio::level::rms;
use crate::audio::wav;
use crate::config::{AudioConfig, StorageConfig};
use crate::defaults;
use crate::error::Result;
use crate::segment::AudioSegment;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Real system clock using `std::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Current phase of the segmentation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Buffer empty; nothing recorded since the last flush.
    Idle,
    /// Buffer non-empty with audio detected recently.
    Accumulating,
    /// Buffer non-empty; below-threshold frames counting toward a flush.
    TrailingSilence,
}

/// Why a flush was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The buffer reached the hard duration cap.
    MaxDuration,
    /// Trailing silence exceeded the configured duration.
    Silence,
    /// Explicit stop/shutdown request.
    Shutdown,
}

/// Outcome of a flush.
#[derive(Debug)]
pub enum FlushOutcome {
    /// Nothing was buffered.
    Empty,
    /// Buffer discarded: shorter than the minimum duration.
    TooShort { duration_secs: f64 },
    /// Buffer discarded: failed the content checks.
    LowContent {
        duration_secs: f64,
        content_ratio: f32,
    },
    /// Buffer persisted as a segment.
    Flushed(AudioSegment),
}

/// Tuning for the segmentation state machine.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    pub sample_rate: u32,
    pub chunk_duration: Duration,
    pub silence_duration: Duration,
    pub min_audio_duration: Duration,
    pub silence_threshold: f32,
    pub noise_gate_threshold: f32,
    pub output_dir: PathBuf,
}

impl SegmenterConfig {
    /// Builds segmenter tuning from the parsed configuration surface.
    pub fn from_config(audio: &AudioConfig, storage: &StorageConfig) -> Self {
        Self {
            sample_rate: audio.sample_rate,
            chunk_duration: Duration::from_secs_f64(audio.chunk_duration_secs),
            silence_duration: Duration::from_secs_f64(audio.silence_duration_secs),
            min_audio_duration: Duration::from_secs_f64(audio.min_audio_duration_secs),
            silence_threshold: audio.silence_threshold,
            noise_gate_threshold: audio.effective_noise_gate(),
            output_dir: storage.output_dir.clone(),
        }
    }
}

/// Fraction of fixed-size sub-chunks whose RMS exceeds `threshold`.
///
/// A single loud click cannot validate an otherwise-silent buffer: it only
/// lifts the one sub-chunk it lands in.
pub fn content_ratio(samples: &[f32], sample_rate: u32, threshold: f32) -> f32 {
    let chunk_size = (sample_rate * defaults::CONTENT_CHUNK_MS / 1000) as usize;
    if chunk_size == 0 || samples.is_empty() {
        return 0.0;
    }

    let mut above = 0usize;
    let mut total = 0usize;
    for chunk in samples.chunks(chunk_size) {
        if rms(chunk) > threshold {
            above += 1;
        }
        total += 1;
    }

    above as f32 / total as f32
}

struct Inner {
    samples: Vec<f32>,
    started_at: Option<Instant>,
    silence_started: Option<Instant>,
    last_audio: Option<Instant>,
    /// Buffer length at the instant the current silence run began; the
    /// samples past this point are trailing silence.
    silence_mark: Option<usize>,
}

/// The segmentation state machine.
///
/// Thread-safe: the capture control loop appends and scores frames while
/// the shutdown path performs the final flush. The buffer swap on flush
/// holds the lock only for the pointer exchange; content analysis and
/// file I/O run on the retired buffer outside the lock.
pub struct SegmentAccumulator<C: Clock = SystemClock> {
    config: SegmenterConfig,
    inner: Mutex<Inner>,
    clock: C,
}

impl SegmentAccumulator<SystemClock> {
    /// Creates an accumulator using the system clock.
    pub fn new(config: SegmenterConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> SegmentAccumulator<C> {
    /// Creates an accumulator with the given clock (for deterministic
    /// tests).
    pub fn with_clock(config: SegmenterConfig, clock: C) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                samples: Vec::new(),
                started_at: None,
                silence_started: None,
                last_audio: None,
                silence_mark: None,
            }),
            clock,
        }
    }

    /// The configuration this accumulator was built with.
    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Score one frame's RMS against the silence threshold.
    ///
    /// Call before [`Self::push_frame`] for the same frame so the silence
    /// mark excludes the first silent frame itself.
    pub fn observe_level(&self, level: f32) {
        let now = self.clock.now();
        let mut inner = self.lock_inner();

        if level > self.config.silence_threshold {
            inner.silence_started = None;
            inner.silence_mark = None;
            inner.last_audio = Some(now);
        } else if inner.silence_started.is_none() {
            inner.silence_started = Some(now);
            inner.silence_mark = Some(inner.samples.len());
        }
    }

    /// Append one frame of mono samples to the active buffer.
    pub fn push_frame(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let now = self.clock.now();
        let mut inner = self.lock_inner();
        if inner.samples.is_empty() {
            inner.started_at = Some(now);
        }
        inner.samples.extend_from_slice(samples);
    }

    /// Current state of the machine.
    pub fn state(&self) -> SegmentState {
        let inner = self.lock_inner();
        if inner.samples.is_empty() {
            SegmentState::Idle
        } else if inner.silence_started.is_some() {
            SegmentState::TrailingSilence
        } else {
            SegmentState::Accumulating
        }
    }

    /// Seconds of audio currently buffered.
    pub fn buffered_secs(&self) -> f64 {
        let inner = self.lock_inner();
        inner.samples.len() as f64 / self.config.sample_rate as f64
    }

    /// Check the duration-cap and trailing-silence flush conditions.
    pub fn should_flush(&self) -> Option<FlushTrigger> {
        let now = self.clock.now();
        let inner = self.lock_inner();

        if inner.samples.is_empty() {
            return None;
        }

        if let Some(started) = inner.started_at
            && now.duration_since(started) >= self.config.chunk_duration
        {
            return Some(FlushTrigger::MaxDuration);
        }

        if let (Some(silence_started), Some(_)) = (inner.silence_started, inner.last_audio)
            && now.duration_since(silence_started) >= self.config.silence_duration
        {
            return Some(FlushTrigger::Silence);
        }

        None
    }

    /// Flush the active buffer.
    ///
    /// The buffer and silence state are cleared whatever the outcome. A
    /// silence-triggered flush trims the trailing-silence run off the
    /// artifact. Encoding failures clean up the partial file and surface
    /// as `NotulaError::WavEncode`; the buffer is still gone.
    pub fn flush(&self, trigger: FlushTrigger) -> Result<FlushOutcome> {
        let (mut samples, silence_mark) = {
            let mut inner = self.lock_inner();
            let samples = std::mem::take(&mut inner.samples);
            let mark = inner.silence_mark.take();
            inner.started_at = None;
            inner.silence_started = None;
            inner.last_audio = None;
            (samples, mark)
        };

        if trigger == FlushTrigger::Silence
            && let Some(mark) = silence_mark
        {
            samples.truncate(mark);
        }

        if samples.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        let duration_secs = samples.len() as f64 / self.config.sample_rate as f64;

        if duration_secs < self.config.min_audio_duration.as_secs_f64() {
            debug!(
                duration_secs,
                ?trigger,
                "discarding short audio segment"
            );
            return Ok(FlushOutcome::TooShort { duration_secs });
        }

        let overall = rms(&samples);
        let ratio = content_ratio(&samples, self.config.sample_rate, self.config.noise_gate_threshold);
        if overall < self.config.noise_gate_threshold || ratio < defaults::MIN_CONTENT_RATIO {
            debug!(
                duration_secs,
                overall_rms = overall,
                content_ratio = ratio,
                "discarding low-content audio segment"
            );
            return Ok(FlushOutcome::LowContent {
                duration_secs,
                content_ratio: ratio,
            });
        }

        let completed = chrono::Local::now();
        let filename = format!("audio_{}.wav", completed.format("%Y%m%d_%H%M%S"));
        let file_path = self.config.output_dir.join(filename);

        wav::write_wav(&file_path, &samples, self.config.sample_rate)?;

        let segment = AudioSegment {
            file_path: file_path.clone(),
            start_time: completed
                - chrono::Duration::milliseconds((duration_secs * 1000.0) as i64),
            end_time: completed,
            duration_secs,
            sample_rate: self.config.sample_rate,
        };

        info!(
            path = %file_path.display(),
            duration_secs,
            ?trigger,
            "audio segment saved"
        );

        Ok(FlushOutcome::Flushed(segment))
    }

    /// Drop the buffer and silence state without producing anything.
    pub fn clear(&self) {
        let mut inner = self.lock_inner();
        inner.samples.clear();
        inner.started_at = None;
        inner.silence_started = None;
        inner.last_audio = None;
        inner.silence_mark = None;
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panic mid-append; the samples are still
        // coherent, so recover the guard and continue.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
