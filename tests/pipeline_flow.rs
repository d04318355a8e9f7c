//! End-to-end pipeline tests with injected source and engine.
//!
//! Drives the full capture → segmentation → queue → transcription flow
//! without audio hardware or a Whisper model.

use notula::audio::source::AudioFrame;
use notula::{Config, MockAudioSource, MockEngine, Pipeline, PipelineEvent};
use std::time::Duration;

const RATE: u32 = 16_000;
const FRAME: usize = 1_600; // 100ms

fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.storage.output_dir = dir.join("recordings");
    config.audio.silence_duration_secs = 0.3;
    config.audio.min_audio_duration_secs = 0.2;
    config
}

fn loud_frame() -> AudioFrame {
    AudioFrame::new(vec![0.1; FRAME])
}

fn silence_frame() -> AudioFrame {
    AudioFrame::new(vec![0.0; FRAME])
}

#[test]
fn utterance_flows_from_frames_to_transcription() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::new(test_config(dir.path())).unwrap();
    let events = pipeline.events();

    let source = MockAudioSource::new();
    let sender = source.frame_sender();
    pipeline
        .start_with(
            Box::new(source),
            Box::new(MockEngine::new().with_text("the quick brown fox")),
        )
        .unwrap();

    // One second of speech, then a silent frame to start the timer
    for _ in 0..10 {
        sender.send(loud_frame()).unwrap();
    }
    sender.send(silence_frame()).unwrap();

    let segment = match events.recv_timeout(Duration::from_secs(5)).unwrap() {
        PipelineEvent::SegmentReady(segment) => segment,
        other => panic!("expected SegmentReady first, got {:?}", other),
    };
    assert_eq!(segment.sample_rate, RATE);
    assert!((segment.duration_secs - 1.0).abs() <= 0.2);
    assert!(
        segment
            .file_path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("audio_")
    );

    let result = match events.recv_timeout(Duration::from_secs(5)).unwrap() {
        PipelineEvent::TranscriptionReady(result) => result,
        other => panic!("expected TranscriptionReady, got {:?}", other),
    };
    assert_eq!(result.text, "the quick brown fox");
    assert_eq!(result.segment.file_path, segment.file_path);
    assert!(
        !segment.file_path.exists(),
        "audio file should be deleted after transcription"
    );

    let stats = pipeline.stats().unwrap();
    assert_eq!(stats.total_processed, 1);

    pipeline.stop();
}

#[test]
fn segments_are_transcribed_in_capture_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::new(test_config(dir.path())).unwrap();
    let events = pipeline.events();

    let engine = MockEngine::new();
    let call_log = engine.call_log();
    let source = MockAudioSource::new();
    let sender = source.frame_sender();
    pipeline
        .start_with(Box::new(source), Box::new(engine))
        .unwrap();

    let mut segment_paths = Vec::new();
    for _ in 0..3 {
        for _ in 0..5 {
            sender.send(loud_frame()).unwrap();
        }
        sender.send(silence_frame()).unwrap();

        // Wait for this utterance's segment before producing the next,
        // and keep flushes in distinct seconds so filenames differ.
        loop {
            let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
            if let PipelineEvent::SegmentReady(segment) = event {
                segment_paths.push(segment.file_path);
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(1100));
    }

    assert_eq!(segment_paths.len(), 3);
    assert_eq!(
        segment_paths.iter().collect::<std::collections::HashSet<_>>().len(),
        3,
        "segment files should be distinct"
    );

    // The worker saw them in exactly the flush order
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while call_log.lock().unwrap().len() < 3 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(*call_log.lock().unwrap(), segment_paths);

    pipeline.stop();
}

#[test]
fn stop_flushes_remaining_audio() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::new(test_config(dir.path())).unwrap();
    let events = pipeline.events();

    let source = MockAudioSource::new();
    let sender = source.frame_sender();
    pipeline
        .start_with(Box::new(source), Box::new(MockEngine::new()))
        .unwrap();

    // 2.0s of valid audio, never any silence, then stop
    for _ in 0..20 {
        sender.send(loud_frame()).unwrap();
    }
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while pipeline.audio_levels().sample_count < 20 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }

    pipeline.stop();

    let mut segment_events = 0;
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::SegmentReady(segment) = event {
            segment_events += 1;
            assert!((segment.duration_secs - 2.0).abs() <= 0.2);
        }
    }
    assert_eq!(segment_events, 1, "exactly one final flush expected");
}

#[test]
fn short_noise_produces_no_segment() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.audio.min_audio_duration_secs = 3.0;
    let mut pipeline = Pipeline::new(config).unwrap();
    let events = pipeline.events();

    let source = MockAudioSource::new();
    let sender = source.frame_sender();
    pipeline
        .start_with(Box::new(source), Box::new(MockEngine::new()))
        .unwrap();

    // Half a second of noise, well under the 3s minimum
    for _ in 0..5 {
        sender.send(loud_frame()).unwrap();
    }
    sender.send(silence_frame()).unwrap();
    std::thread::sleep(Duration::from_millis(800));

    pipeline.stop();

    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, PipelineEvent::SegmentReady(_)),
            "short buffer must not become a segment"
        );
    }
    let recordings = dir.path().join("recordings");
    assert_eq!(std::fs::read_dir(&recordings).unwrap().count(), 0);
}

#[test]
fn paused_audio_is_not_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::new(test_config(dir.path())).unwrap();
    let events = pipeline.events();

    let source = MockAudioSource::new();
    let sender = source.frame_sender();
    pipeline
        .start_with(Box::new(source), Box::new(MockEngine::new()))
        .unwrap();

    for _ in 0..5 {
        sender.send(loud_frame()).unwrap();
    }
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while pipeline.audio_levels().sample_count < 5 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }

    pipeline.pause();
    for _ in 0..20 {
        sender.send(loud_frame()).unwrap();
    }
    std::thread::sleep(Duration::from_millis(300));
    pipeline.resume();

    for _ in 0..5 {
        sender.send(loud_frame()).unwrap();
    }
    sender.send(silence_frame()).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let mut kept = None;
    while std::time::Instant::now() < deadline {
        if let Ok(PipelineEvent::SegmentReady(segment)) =
            events.recv_timeout(Duration::from_millis(100))
        {
            kept = Some(segment);
            break;
        }
    }

    let segment = kept.expect("a segment should still be produced");
    assert!(
        segment.duration_secs <= 1.5,
        "paused frames leaked into the segment: {}s",
        segment.duration_secs
    );

    pipeline.stop();
}
