//! Finalized artifact types flowing from capture to transcription.

use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::time::Duration;

/// A finalized, persisted unit of audio handed to transcription.
///
/// Created only when a flushed buffer passes the duration and content
/// checks. The backing WAV file is owned by whoever holds the record last:
/// the transcription worker deletes it after a successful transcription
/// and quarantines it after a failed one.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    /// Path of the backing WAV file.
    pub file_path: PathBuf,
    /// Wall-clock time of the first sample.
    pub start_time: DateTime<Local>,
    /// Wall-clock time of the last sample.
    pub end_time: DateTime<Local>,
    /// Length in seconds (sample count / sample rate).
    pub duration_secs: f64,
    /// Sample rate of the encoded audio.
    pub sample_rate: u32,
}

/// Timing of one engine-produced sub-segment within an [`AudioSegment`].
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentTiming {
    /// Start offset in seconds, relative to the segment.
    pub start: f64,
    /// End offset in seconds, relative to the segment.
    pub end: f64,
    /// Text of this sub-segment.
    pub text: String,
    /// Average log-probability reported by the engine for this sub-segment.
    pub avg_logprob: f64,
}

/// Result of transcribing one [`AudioSegment`].
///
/// Produced exactly once per consumed segment that was not discarded
/// upstream.
#[derive(Debug, Clone)]
pub struct TranscriptionResult {
    /// The segment this result belongs to.
    pub segment: AudioSegment,
    /// Full transcribed text, sub-segments joined and trimmed.
    pub text: String,
    /// Detected (or configured) language code.
    pub language: String,
    /// Engine confidence in the detected language.
    pub language_probability: f64,
    /// Per-sub-segment timing list from the engine.
    pub timings: Vec<SegmentTiming>,
    /// How long the engine invocation took.
    pub processing_time: Duration,
    /// When the transcription completed.
    pub completed_at: DateTime<Local>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_segment(duration_secs: f64) -> AudioSegment {
        let end = Local::now();
        let start = end - chrono::Duration::milliseconds((duration_secs * 1000.0) as i64);
        AudioSegment {
            file_path: PathBuf::from("/tmp/audio_20260101_120000.wav"),
            start_time: start,
            end_time: end,
            duration_secs,
            sample_rate: 16_000,
        }
    }

    #[test]
    fn segment_times_are_ordered() {
        let segment = make_segment(4.0);
        assert!(segment.start_time < segment.end_time);
        let span = segment.end_time - segment.start_time;
        assert_eq!(span.num_milliseconds(), 4000);
    }

    #[test]
    fn segment_is_cloneable() {
        let segment = make_segment(1.5);
        let copy = segment.clone();
        assert_eq!(segment, copy);
    }

    #[test]
    fn result_carries_timings_in_order() {
        let result = TranscriptionResult {
            segment: make_segment(2.0),
            text: "hello world".to_string(),
            language: "en".to_string(),
            language_probability: 0.98,
            timings: vec![
                SegmentTiming {
                    start: 0.0,
                    end: 1.0,
                    text: "hello".to_string(),
                    avg_logprob: -0.2,
                },
                SegmentTiming {
                    start: 1.0,
                    end: 2.0,
                    text: "world".to_string(),
                    avg_logprob: -0.3,
                },
            ],
            processing_time: Duration::from_millis(250),
            completed_at: Local::now(),
        };
        assert!(result.timings.windows(2).all(|w| w[0].end <= w[1].start));
    }
}
