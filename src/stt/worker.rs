//! Single-consumer transcription worker.
//!
//! Pulls finalized segments off the queue in FIFO order, runs the engine
//! behind a lock so only one inference is in flight, publishes results,
//! and keeps aggregate statistics. The worker owns each segment's backing
//! file from dequeue onward: deleted after success, quarantined under
//! `failed/` after an engine error.

use crate::defaults;
use crate::error::{NotulaError, Result};
use crate::events::{EventBus, PipelineEvent};
use crate::queue::{DrainQueue, SegmentQueue};
use crate::segment::{AudioSegment, TranscriptionResult};
use crate::stt::engine::SpeechEngine;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Decoding options applied to every segment.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Language code, or "auto" for detection.
    pub language: String,
    pub beam_size: u32,
    pub temperature: f32,
    /// Where audio that failed transcription is moved.
    pub failed_dir: PathBuf,
}

/// Aggregate processing statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerStats {
    pub total_processed: u64,
    pub total_processing: Duration,
    pub average_processing: Duration,
    pub queue_depth: usize,
    pub backend: &'static str,
}

#[derive(Default)]
struct StatsInner {
    total_processed: u64,
    total_processing: Duration,
}

/// Handle to the running worker thread.
pub struct TranscriptionWorker {
    engine: Arc<Mutex<Box<dyn SpeechEngine>>>,
    backend: &'static str,
    options: WorkerOptions,
    queue: SegmentQueue,
    results: DrainQueue<TranscriptionResult>,
    stats: Arc<Mutex<StatsInner>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TranscriptionWorker {
    /// Spawn the consumer thread over `queue`.
    pub fn spawn(
        engine: Box<dyn SpeechEngine>,
        queue: SegmentQueue,
        events: EventBus,
        options: WorkerOptions,
    ) -> Self {
        let backend = engine.name();
        let engine = Arc::new(Mutex::new(engine));
        let results = DrainQueue::new(defaults::DRAIN_QUEUE_CAPACITY);
        let stats = Arc::new(Mutex::new(StatsInner::default()));
        let running = Arc::new(AtomicBool::new(true));

        let thread = {
            let engine = Arc::clone(&engine);
            let consumer = queue.consumer();
            let results = results.clone();
            let stats = Arc::clone(&stats);
            let running = Arc::clone(&running);
            let options = options.clone();
            thread::spawn(move || {
                debug!(backend, "transcription worker started");
                while running.load(Ordering::SeqCst) {
                    match consumer.recv_timeout(defaults::QUEUE_RECV_TIMEOUT) {
                        Ok(segment) => {
                            process_segment(
                                &engine, &segment, &options, &results, &events, &stats,
                            );
                        }
                        Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!(backend, "transcription worker stopped");
            })
        };

        Self {
            engine,
            backend,
            options,
            queue,
            results,
            stats,
            running,
            thread: Some(thread),
        }
    }

    /// Backend name selected at startup.
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Drain all results completed since the last call, oldest first.
    pub fn completed_transcriptions(&self) -> Vec<TranscriptionResult> {
        self.results.drain()
    }

    /// Snapshot of the aggregate statistics.
    pub fn stats(&self) -> WorkerStats {
        let inner = self
            .stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let average = if inner.total_processed > 0 {
            inner.total_processing / inner.total_processed as u32
        } else {
            Duration::ZERO
        };
        WorkerStats {
            total_processed: inner.total_processed,
            total_processing: inner.total_processing,
            average_processing: average,
            queue_depth: self.queue.len(),
            backend: self.backend,
        }
    }

    /// Transcribe an arbitrary file synchronously, outside the queue.
    ///
    /// Shares the engine lock with the worker loop, so the call waits for
    /// any in-flight segment to finish. The file is left in place.
    pub fn transcribe_file(&self, path: &Path) -> Result<TranscriptionResult> {
        if !path.exists() {
            return Err(NotulaError::Transcription {
                message: format!("audio file not found: {}", path.display()),
            });
        }

        let started = Instant::now();
        let output = {
            let engine = self
                .engine
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            engine.transcribe(
                path,
                language_hint(&self.options.language),
                self.options.beam_size,
                self.options.temperature,
            )?
        };

        let completed_at = chrono::Local::now();
        Ok(TranscriptionResult {
            segment: AudioSegment {
                file_path: path.to_path_buf(),
                start_time: completed_at,
                end_time: completed_at,
                duration_secs: 0.0,
                sample_rate: defaults::SAMPLE_RATE,
            },
            text: output.full_text(),
            language: output.language.clone(),
            language_probability: output.language_probability,
            timings: output.segments,
            processing_time: started.elapsed(),
            completed_at,
        })
    }

    /// Signal the loop to stop and wait for it, bounded.
    ///
    /// A worker still blocked inside a model call after the timeout is
    /// detached; the call cannot be cancelled mid-flight.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        let Some(handle) = self.thread.take() else {
            return;
        };

        let deadline = Instant::now() + defaults::WORKER_JOIN_TIMEOUT;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("transcription worker did not stop in time; abandoning thread");
                return;
            }
            thread::sleep(Duration::from_millis(50));
        }
        if handle.join().is_err() {
            error!("transcription worker thread panicked");
        }
    }
}

impl Drop for TranscriptionWorker {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn language_hint(language: &str) -> Option<&str> {
    if language == defaults::AUTO_LANGUAGE {
        None
    } else {
        Some(language)
    }
}

fn process_segment(
    engine: &Arc<Mutex<Box<dyn SpeechEngine>>>,
    segment: &AudioSegment,
    options: &WorkerOptions,
    results: &DrainQueue<TranscriptionResult>,
    events: &EventBus,
    stats: &Arc<Mutex<StatsInner>>,
) {
    if !segment.file_path.exists() {
        debug!(
            path = %segment.file_path.display(),
            "audio file gone before transcription; skipping"
        );
        return;
    }

    let started = Instant::now();
    let outcome = {
        let engine = engine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        engine.transcribe(
            &segment.file_path,
            language_hint(&options.language),
            options.beam_size,
            options.temperature,
        )
    };
    let processing_time = started.elapsed();

    match outcome {
        Ok(output) => {
            let result = TranscriptionResult {
                segment: segment.clone(),
                text: output.full_text(),
                language: output.language.clone(),
                language_probability: output.language_probability,
                timings: output.segments,
                processing_time,
                completed_at: chrono::Local::now(),
            };

            info!(
                path = %segment.file_path.display(),
                chars = result.text.len(),
                elapsed_ms = processing_time.as_millis() as u64,
                "segment transcribed"
            );

            if let Err(e) = std::fs::remove_file(&segment.file_path) {
                warn!(
                    path = %segment.file_path.display(),
                    error = %e,
                    "failed to remove transcribed audio file"
                );
            }

            {
                let mut inner = stats
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                inner.total_processed += 1;
                inner.total_processing += processing_time;
            }

            results.push(result.clone());
            events.publish(PipelineEvent::TranscriptionReady(Box::new(result)));
        }
        Err(e) => {
            error!(
                path = %segment.file_path.display(),
                error = %e,
                "transcription failed; quarantining audio file"
            );
            quarantine(&segment.file_path, &options.failed_dir);
        }
    }
}

/// Move a failed segment's audio into the quarantine directory.
fn quarantine(path: &Path, failed_dir: &Path) {
    if let Err(e) = std::fs::create_dir_all(failed_dir) {
        warn!(dir = %failed_dir.display(), error = %e, "cannot create quarantine dir");
        return;
    }
    let Some(filename) = path.file_name() else {
        return;
    };
    let target = failed_dir.join(filename);
    if let Err(e) = std::fs::rename(path, &target) {
        warn!(
            from = %path.display(),
            to = %target.display(),
            error = %e,
            "failed to quarantine audio file"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::OverflowPolicy;
    use crate::stt::engine::MockEngine;
    use chrono::Local;
    use tempfile::tempdir;

    fn default_options(dir: &Path) -> WorkerOptions {
        WorkerOptions {
            language: "auto".to_string(),
            beam_size: 5,
            temperature: 0.0,
            failed_dir: dir.join(defaults::FAILED_DIR),
        }
    }

    fn file_backed_segment(dir: &Path, name: &str) -> AudioSegment {
        let path = dir.join(format!("{name}.wav"));
        crate::audio::wav::write_wav(&path, &vec![0.1; 16_000], 16_000).unwrap();
        let now = Local::now();
        AudioSegment {
            file_path: path,
            start_time: now,
            end_time: now,
            duration_secs: 1.0,
            sample_rate: 16_000,
        }
    }

    fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    #[test]
    fn transcribes_segments_in_fifo_order() {
        let dir = tempdir().unwrap();
        let engine = MockEngine::new().with_text("ordered");
        let call_log = engine.call_log();

        let queue = SegmentQueue::new(16, OverflowPolicy::Block);
        let events = EventBus::new();
        let mut worker = TranscriptionWorker::spawn(
            Box::new(engine),
            queue.clone(),
            events,
            default_options(dir.path()),
        );

        let mut expected = Vec::new();
        for i in 0..5 {
            let segment = file_backed_segment(dir.path(), &format!("seg{i}"));
            expected.push(segment.file_path.clone());
            queue.push(segment).unwrap();
        }

        assert!(wait_until(
            || call_log.lock().unwrap().len() == 5,
            Duration::from_secs(5)
        ));
        assert_eq!(*call_log.lock().unwrap(), expected);

        worker.stop();
    }

    #[test]
    fn successful_transcription_deletes_audio_and_publishes() {
        let dir = tempdir().unwrap();
        let queue = SegmentQueue::new(4, OverflowPolicy::Block);
        let events = EventBus::new();
        let event_rx = events.receiver();
        let mut worker = TranscriptionWorker::spawn(
            Box::new(MockEngine::new().with_text("hello")),
            queue.clone(),
            events,
            default_options(dir.path()),
        );

        let segment = file_backed_segment(dir.path(), "done");
        let path = segment.file_path.clone();
        queue.push(segment).unwrap();

        let event = event_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let PipelineEvent::TranscriptionReady(result) = event else {
            panic!("expected TranscriptionReady");
        };
        assert_eq!(result.text, "hello");
        assert_eq!(result.language, "en");
        assert!(!path.exists(), "audio should be deleted after success");

        let drained = worker.completed_transcriptions();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].text, "hello");

        let stats = worker.stats();
        assert_eq!(stats.total_processed, 1);
        assert_eq!(stats.backend, "mock");

        worker.stop();
    }

    #[test]
    fn failed_transcription_quarantines_audio() {
        let dir = tempdir().unwrap();
        let queue = SegmentQueue::new(4, OverflowPolicy::Block);
        let mut worker = TranscriptionWorker::spawn(
            Box::new(MockEngine::new().with_failure()),
            queue.clone(),
            EventBus::new(),
            default_options(dir.path()),
        );

        let segment = file_backed_segment(dir.path(), "broken");
        let original = segment.file_path.clone();
        let quarantined = dir.path().join(defaults::FAILED_DIR).join("broken.wav");
        queue.push(segment).unwrap();

        assert!(wait_until(|| quarantined.exists(), Duration::from_secs(5)));
        assert!(!original.exists());

        // No result was published for the failed segment
        assert!(worker.completed_transcriptions().is_empty());
        assert_eq!(worker.stats().total_processed, 0);

        worker.stop();
    }

    #[test]
    fn missing_file_is_skipped_without_error() {
        let dir = tempdir().unwrap();
        let engine = MockEngine::new();
        let call_log = engine.call_log();
        let queue = SegmentQueue::new(4, OverflowPolicy::Block);
        let mut worker = TranscriptionWorker::spawn(
            Box::new(engine),
            queue.clone(),
            EventBus::new(),
            default_options(dir.path()),
        );

        let now = Local::now();
        queue
            .push(AudioSegment {
                file_path: dir.path().join("vanished.wav"),
                start_time: now,
                end_time: now,
                duration_secs: 1.0,
                sample_rate: 16_000,
            })
            .unwrap();

        // Follow with a real segment to prove the loop kept going
        let real = file_backed_segment(dir.path(), "alive");
        queue.push(real).unwrap();

        assert!(wait_until(
            || call_log.lock().unwrap().len() == 1,
            Duration::from_secs(5)
        ));
        let calls = call_log.lock().unwrap();
        assert!(calls[0].to_string_lossy().contains("alive"));
        drop(calls);

        worker.stop();
    }

    #[test]
    fn transcribe_file_works_outside_the_queue() {
        let dir = tempdir().unwrap();
        let queue = SegmentQueue::new(4, OverflowPolicy::Block);
        let mut worker = TranscriptionWorker::spawn(
            Box::new(MockEngine::new().with_text("one-shot")),
            queue,
            EventBus::new(),
            default_options(dir.path()),
        );

        let path = dir.path().join("oneshot.wav");
        crate::audio::wav::write_wav(&path, &vec![0.1; 16_000], 16_000).unwrap();

        let result = worker.transcribe_file(&path).unwrap();
        assert_eq!(result.text, "one-shot");
        assert!(path.exists(), "one-shot transcription leaves the file");

        worker.stop();
    }

    #[test]
    fn transcribe_file_rejects_missing_path() {
        let dir = tempdir().unwrap();
        let queue = SegmentQueue::new(4, OverflowPolicy::Block);
        let mut worker = TranscriptionWorker::spawn(
            Box::new(MockEngine::new()),
            queue,
            EventBus::new(),
            default_options(dir.path()),
        );

        let result = worker.transcribe_file(Path::new("/nonexistent/x.wav"));
        assert!(matches!(result, Err(NotulaError::Transcription { .. })));

        worker.stop();
    }

    #[test]
    fn stats_average_covers_processed_segments() {
        let dir = tempdir().unwrap();
        let queue = SegmentQueue::new(8, OverflowPolicy::Block);
        let mut worker = TranscriptionWorker::spawn(
            Box::new(MockEngine::new()),
            queue.clone(),
            EventBus::new(),
            default_options(dir.path()),
        );

        for i in 0..3 {
            queue
                .push(file_backed_segment(dir.path(), &format!("s{i}")))
                .unwrap();
        }

        assert!(wait_until(
            || worker.stats().total_processed == 3,
            Duration::from_secs(5)
        ));
        let stats = worker.stats();
        assert!(stats.average_processing <= stats.total_processing);
        assert_eq!(stats.queue_depth, 0);

        worker.stop();
    }

    #[test]
    fn stop_joins_the_worker_thread() {
        let dir = tempdir().unwrap();
        let queue = SegmentQueue::new(4, OverflowPolicy::Block);
        let mut worker = TranscriptionWorker::spawn(
            Box::new(MockEngine::new()),
            queue,
            EventBus::new(),
            default_options(dir.path()),
        );

        worker.stop();
        assert!(worker.thread.is_none());
    }
}
