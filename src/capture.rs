//! Capture controller: bridges the real-time audio source to the
//! segmentation state machine.
//!
//! The audio callback only mixes to mono and hands frames to a bounded
//! channel. Everything else (RMS scoring, buffer appends, flush checks,
//! file I/O) happens on a control thread that polls every ~100ms, so the
//! callback path never blocks on locks held for file writes.
//!
//! A stream that dies mid-run is restarted with exponential backoff; when
//! the attempts are exhausted a `CaptureFailed` event is published and
//! only the capture loop ends. Already-queued segments still drain
//! through the transcription worker.

use crate::audio::level::{AudioLevels, LevelRing, rms};
use crate::audio::segmenter::{FlushOutcome, FlushTrigger, SegmentAccumulator, SegmenterConfig};
use crate::audio::source::AudioSource;
use crate::defaults;
use crate::error::Result;
use crate::events::{EventBus, PipelineEvent};
use crate::queue::{DrainQueue, SegmentQueue};
use crate::segment::AudioSegment;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How the control loop reacts to a stream that dies mid-run.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    /// Attempts before giving up and publishing `CaptureFailed`.
    pub max_attempts: u32,
    /// Base delay; doubles per attempt.
    pub backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_STREAM_RESTARTS,
            backoff: defaults::RESTART_BACKOFF,
        }
    }
}

/// Drives an [`AudioSource`], feeds the accumulator, and runs the
/// periodic flush-trigger check.
pub struct CaptureController {
    accumulator: Arc<SegmentAccumulator>,
    levels: Arc<Mutex<LevelRing>>,
    silence_threshold: f32,
    queue: SegmentQueue,
    events: EventBus,
    completed: DrainQueue<AudioSegment>,
    restart_policy: RestartPolicy,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureController {
    /// Creates a controller around a fresh accumulator.
    pub fn new(config: SegmenterConfig, queue: SegmentQueue, events: EventBus) -> Self {
        let silence_threshold = config.silence_threshold;
        Self {
            accumulator: Arc::new(SegmentAccumulator::new(config)),
            levels: Arc::new(Mutex::new(LevelRing::new(defaults::LEVEL_HISTORY_CAPACITY))),
            silence_threshold,
            queue,
            events,
            completed: DrainQueue::new(defaults::DRAIN_QUEUE_CAPACITY),
            restart_policy: RestartPolicy::default(),
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Override how stream failures are retried.
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// Open the source and start the control loop.
    ///
    /// A device that cannot be opened fails here, before any thread is
    /// spawned.
    pub fn start(&mut self, mut source: Box<dyn AudioSource>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            warn!("capture already running");
            return Ok(());
        }

        let frames = source.start()?;

        let config = self.accumulator.config();
        info!(
            sample_rate = config.sample_rate,
            silence_threshold = config.silence_threshold,
            silence_duration_secs = config.silence_duration.as_secs_f64(),
            min_audio_duration_secs = config.min_audio_duration.as_secs_f64(),
            chunk_duration_secs = config.chunk_duration.as_secs_f64(),
            "audio capture started"
        );

        self.running.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);

        let loop_ctx = LoopContext {
            accumulator: Arc::clone(&self.accumulator),
            levels: Arc::clone(&self.levels),
            silence_threshold: self.silence_threshold,
            queue: self.queue.clone(),
            events: self.events.clone(),
            completed: self.completed.clone(),
            restart_policy: self.restart_policy,
            running: Arc::clone(&self.running),
            paused: Arc::clone(&self.paused),
        };

        self.thread = Some(thread::spawn(move || {
            control_loop(source, frames, loop_ctx);
        }));

        Ok(())
    }

    /// Stop the control loop, join it (bounded), and flush what remains.
    ///
    /// The late flush runs here, outside the stopped thread, so shutdown
    /// never races the control loop over the buffer.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.thread.take() {
            let deadline = Instant::now() + defaults::CAPTURE_JOIN_TIMEOUT;
            loop {
                if handle.is_finished() {
                    if handle.join().is_err() {
                        error!("capture control thread panicked");
                    }
                    break;
                }
                if Instant::now() >= deadline {
                    warn!("capture control thread did not stop in time; detaching");
                    break;
                }
                thread::sleep(Duration::from_millis(50));
            }
        }

        flush_and_dispatch(
            &self.accumulator,
            FlushTrigger::Shutdown,
            &self.queue,
            &self.events,
            &self.completed,
        );

        info!("audio capture stopped");
    }

    /// Stop ingesting frames without tearing down the stream.
    ///
    /// Frames delivered while paused are dropped; buffered silence and
    /// duration timers keep running.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("audio capture paused");
    }

    /// Resume ingesting frames.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("audio capture resumed");
    }

    /// True while started and not paused.
    pub fn is_recording(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.paused.load(Ordering::SeqCst)
    }

    /// Diagnostics snapshot of recent input levels.
    pub fn audio_levels(&self) -> AudioLevels {
        self.levels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .snapshot(self.silence_threshold)
    }

    /// Drain segments completed since the last call, oldest first.
    pub fn completed_segments(&self) -> Vec<AudioSegment> {
        self.completed.drain()
    }

    /// Drop everything buffered without producing a segment.
    pub fn clear_buffer(&self) {
        self.accumulator.clear();
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

struct LoopContext {
    accumulator: Arc<SegmentAccumulator>,
    levels: Arc<Mutex<LevelRing>>,
    silence_threshold: f32,
    queue: SegmentQueue,
    events: EventBus,
    completed: DrainQueue<AudioSegment>,
    restart_policy: RestartPolicy,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

fn control_loop(
    mut source: Box<dyn AudioSource>,
    mut frames: crossbeam_channel::Receiver<crate::audio::source::AudioFrame>,
    ctx: LoopContext,
) {
    let mut last_level_log = Instant::now();
    let mut restarts = 0u32;

    while ctx.running.load(Ordering::SeqCst) {
        let mut disconnected = false;

        loop {
            match frames.try_recv() {
                Ok(frame) => {
                    if ctx.paused.load(Ordering::SeqCst) {
                        continue;
                    }
                    let level = rms(&frame.samples);
                    ctx.accumulator.observe_level(level);
                    ctx.accumulator.push_frame(&frame.samples);
                    ctx.levels
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push(level);
                }
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }

        if last_level_log.elapsed() >= defaults::LEVEL_LOG_INTERVAL {
            let snapshot = ctx
                .levels
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .snapshot(ctx.silence_threshold);
            debug!(
                current = snapshot.current,
                average = snapshot.average,
                maximum = snapshot.maximum,
                threshold = snapshot.threshold,
                overruns = source.overrun_count(),
                "audio levels"
            );
            last_level_log = Instant::now();
        }

        if let Some(trigger) = ctx.accumulator.should_flush() {
            flush_and_dispatch(
                &ctx.accumulator,
                trigger,
                &ctx.queue,
                &ctx.events,
                &ctx.completed,
            );
        }

        if disconnected || !source.healthy() {
            if restarts >= ctx.restart_policy.max_attempts {
                let message = "audio stream failed and restart attempts are exhausted";
                error!("{}", message);
                ctx.events.publish(PipelineEvent::CaptureFailed {
                    message: message.to_string(),
                });
                break;
            }
            restarts += 1;
            let delay = ctx.restart_policy.backoff * 2u32.saturating_pow(restarts - 1);
            warn!(
                attempt = restarts,
                delay_ms = delay.as_millis() as u64,
                "audio stream failed; restarting"
            );
            let _ = source.stop();
            thread::sleep(delay);
            match source.start() {
                Ok(new_frames) => {
                    frames = new_frames;
                    debug!("audio stream restarted");
                }
                Err(e) => {
                    warn!(error = %e, "audio stream restart failed");
                }
            }
            continue;
        }

        thread::sleep(defaults::POLL_INTERVAL);
    }

    if let Err(e) = source.stop() {
        warn!(error = %e, "failed to stop audio source");
    }
    debug!("capture control loop ended");
}

/// Flush the accumulator and route a kept segment to the queue, the
/// completed drain, and the event bus.
fn flush_and_dispatch(
    accumulator: &SegmentAccumulator,
    trigger: FlushTrigger,
    queue: &SegmentQueue,
    events: &EventBus,
    completed: &DrainQueue<AudioSegment>,
) {
    match accumulator.flush(trigger) {
        Ok(FlushOutcome::Flushed(segment)) => {
            // Enqueue first: a segment the queue had to drop must not be
            // announced, its file is already gone.
            if queue.push(segment.clone()).is_ok() {
                completed.push(segment.clone());
                events.publish(PipelineEvent::SegmentReady(segment));
            }
        }
        Ok(FlushOutcome::Empty)
        | Ok(FlushOutcome::TooShort { .. })
        | Ok(FlushOutcome::LowContent { .. }) => {}
        Err(e) => {
            // Encoding failure: the partial file is already cleaned up and
            // the buffer is gone; the segment is dropped without an event.
            warn!(error = %e, "failed to persist flushed segment");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::{AudioFrame, MockAudioSource};
    use crate::queue::OverflowPolicy;
    use tempfile::tempdir;

    const RATE: u32 = 16_000;
    const FRAME: usize = 1_600;

    fn fast_config(dir: &std::path::Path) -> SegmenterConfig {
        SegmenterConfig {
            sample_rate: RATE,
            chunk_duration: Duration::from_secs(300),
            silence_duration: Duration::from_millis(300),
            min_audio_duration: Duration::from_millis(200),
            silence_threshold: 0.02,
            noise_gate_threshold: 0.015,
            output_dir: dir.to_path_buf(),
        }
    }

    fn controller(dir: &std::path::Path) -> (CaptureController, SegmentQueue, EventBus) {
        let queue = SegmentQueue::new(16, OverflowPolicy::Block);
        let events = EventBus::new();
        let controller = CaptureController::new(fast_config(dir), queue.clone(), events.clone());
        (controller, queue, events)
    }

    fn loud_frame() -> AudioFrame {
        AudioFrame::new(vec![0.1; FRAME])
    }

    fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        condition()
    }

    #[test]
    fn start_failure_propagates_without_thread() {
        let dir = tempdir().unwrap();
        let (mut controller, _queue, _events) = controller(dir.path());

        let result = controller.start(Box::new(MockAudioSource::new().with_start_failure()));
        assert!(result.is_err());
        assert!(!controller.is_recording());
        assert!(controller.thread.is_none());
    }

    #[test]
    fn ingests_frames_and_reports_levels() {
        let dir = tempdir().unwrap();
        let (mut controller, _queue, _events) = controller(dir.path());

        let source = MockAudioSource::new();
        let sender = source.frame_sender();
        controller.start(Box::new(source)).unwrap();
        assert!(controller.is_recording());

        for _ in 0..3 {
            sender.send(loud_frame()).unwrap();
        }

        assert!(wait_until(
            || controller.audio_levels().sample_count == 3,
            Duration::from_secs(2)
        ));
        let levels = controller.audio_levels();
        assert!((levels.current - 0.1).abs() < 1e-6);
        assert_eq!(levels.threshold, 0.02);

        controller.stop();
    }

    #[test]
    fn silence_flush_emits_segment_and_event() {
        let dir = tempdir().unwrap();
        let (mut controller, queue, events) = controller(dir.path());
        let event_rx = events.receiver();

        let source = MockAudioSource::new();
        let sender = source.frame_sender();
        controller.start(Box::new(source)).unwrap();

        // 1s of audio, then silence long enough to trip the 300ms window
        for _ in 0..10 {
            sender.send(loud_frame()).unwrap();
        }
        sender.send(AudioFrame::new(vec![0.0; FRAME])).unwrap();

        let event = event_rx.recv_timeout(Duration::from_secs(3)).unwrap();
        let PipelineEvent::SegmentReady(segment) = event else {
            panic!("expected SegmentReady");
        };
        assert!(segment.file_path.exists());
        assert!((segment.duration_secs - 1.0).abs() <= 0.2);

        // Same segment is queued and available through the drain
        assert_eq!(queue.len(), 1);
        let drained = controller.completed_segments();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].file_path, segment.file_path);

        controller.stop();
    }

    #[test]
    fn paused_frames_do_not_reach_the_buffer() {
        let dir = tempdir().unwrap();
        let (mut controller, _queue, events) = controller(dir.path());
        let event_rx = events.receiver();

        let source = MockAudioSource::new();
        let sender = source.frame_sender();
        controller.start(Box::new(source)).unwrap();

        // Half a second of audio, then pause and inject frames that must
        // be dropped, then resume with another half second.
        for _ in 0..5 {
            sender.send(loud_frame()).unwrap();
        }
        assert!(wait_until(
            || controller.audio_levels().sample_count >= 5,
            Duration::from_secs(2)
        ));

        controller.pause();
        assert!(!controller.is_recording());
        for _ in 0..20 {
            sender.send(loud_frame()).unwrap();
        }
        // Give the loop a chance to drain (and drop) the paused frames
        thread::sleep(Duration::from_millis(300));

        controller.resume();
        for _ in 0..5 {
            sender.send(loud_frame()).unwrap();
        }
        sender.send(AudioFrame::new(vec![0.0; FRAME])).unwrap();

        let event = event_rx.recv_timeout(Duration::from_secs(3)).unwrap();
        let PipelineEvent::SegmentReady(segment) = event else {
            panic!("expected SegmentReady");
        };
        // 10 ingested frames = 1.0s; the 20 paused frames would have
        // pushed this to 3.0s
        assert!(
            segment.duration_secs <= 1.5,
            "paused frames leaked into the segment: {}s",
            segment.duration_secs
        );

        controller.stop();
    }

    #[test]
    fn stop_performs_exactly_one_final_flush() {
        let dir = tempdir().unwrap();
        let (mut controller, queue, events) = controller(dir.path());
        let event_rx = events.receiver();

        let source = MockAudioSource::new();
        let sender = source.frame_sender();
        controller.start(Box::new(source)).unwrap();

        // 2.0s of valid audio, then stop mid-accumulation
        for _ in 0..20 {
            sender.send(loud_frame()).unwrap();
        }
        assert!(wait_until(
            || controller.audio_levels().sample_count >= 20,
            Duration::from_secs(2)
        ));

        controller.stop();

        let event = event_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        let PipelineEvent::SegmentReady(segment) = event else {
            panic!("expected SegmentReady");
        };
        assert!((segment.duration_secs - 2.0).abs() < 0.2);
        assert_eq!(queue.len(), 1);
        assert!(event_rx.try_recv().is_err(), "only one flush expected");
    }

    #[test]
    fn stop_with_empty_buffer_emits_nothing() {
        let dir = tempdir().unwrap();
        let (mut controller, queue, events) = controller(dir.path());
        let event_rx = events.receiver();

        controller.start(Box::new(MockAudioSource::new())).unwrap();
        controller.stop();

        assert!(event_rx.try_recv().is_err());
        assert!(queue.is_empty());
    }

    #[test]
    fn double_start_is_harmless() {
        let dir = tempdir().unwrap();
        let (mut controller, _queue, _events) = controller(dir.path());

        controller.start(Box::new(MockAudioSource::new())).unwrap();
        assert!(controller.start(Box::new(MockAudioSource::new())).is_ok());

        controller.stop();
    }

    #[test]
    fn capture_failure_event_after_stream_death() {
        let dir = tempdir().unwrap();
        let queue = SegmentQueue::new(16, OverflowPolicy::Block);
        let events = EventBus::new();
        let mut controller = CaptureController::new(fast_config(dir.path()), queue, events.clone())
            .with_restart_policy(RestartPolicy {
                max_attempts: 2,
                backoff: Duration::from_millis(50),
            });
        let event_rx = events.receiver();

        let source = MockAudioSource::new();
        let health = source.health_flag();
        controller.start(Box::new(source)).unwrap();

        // Kill the stream; every restart hands back the same dead flag, so
        // the supervisor exhausts its attempts and gives up.
        health.store(false, Ordering::SeqCst);

        let event = event_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, PipelineEvent::CaptureFailed { .. }));

        controller.stop();
    }
}
