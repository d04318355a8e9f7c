//! Frame-delivering audio sources.
//!
//! An [`AudioSource`] pushes fixed-size mono frames through a bounded
//! channel from its capture callback. The callback side never blocks: when
//! the channel is full the frame is counted as an overrun and dropped.

use crate::error::Result;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// One block of mono samples as delivered by the capture callback.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Normalized samples in [-1.0, 1.0], already mixed down to mono.
    pub samples: Vec<f32>,
    /// When the callback delivered this block.
    pub captured_at: Instant,
}

impl AudioFrame {
    /// Creates a frame stamped with the current instant.
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            captured_at: Instant::now(),
        }
    }
}

/// Trait for audio input sources.
///
/// This trait allows swapping implementations (real audio device vs mock).
pub trait AudioSource: Send {
    /// Open the underlying stream and begin delivering frames.
    ///
    /// # Returns
    /// The receiving end of the frame channel. Dropping the receiver does
    /// not stop the stream; call [`AudioSource::stop`] for that.
    fn start(&mut self) -> Result<Receiver<AudioFrame>>;

    /// Stop delivering frames and release the stream.
    fn stop(&mut self) -> Result<()>;

    /// Returns false once the stream has reported a fatal error and frame
    /// delivery cannot be expected to continue.
    fn healthy(&self) -> bool {
        true
    }

    /// Number of frames dropped because the outgoing channel was full.
    fn overrun_count(&self) -> u64 {
        0
    }
}

/// Mix interleaved multi-channel samples down to mono by arithmetic mean.
pub fn mix_to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(feature = "cpal-audio")]
pub use cpal_source::CpalAudioSource;

#[cfg(feature = "cpal-audio")]
mod cpal_source {
    use super::*;
    use crate::audio::device::{find_input_device, with_suppressed_stderr};
    use crate::config::AudioConfig;
    use crate::defaults;
    use crate::error::NotulaError;
    use cpal::traits::{DeviceTrait, StreamTrait};
    use crossbeam_channel::{Sender, bounded};

    /// Wrapper for cpal::Stream to make it Send.
    ///
    /// SAFETY: The stream is only accessed from the thread that owns the
    /// `CpalAudioSource`; start/stop are called synchronously and the
    /// handle never crosses thread boundaries concurrently.
    struct SendableStream(cpal::Stream);

    unsafe impl Send for SendableStream {}

    /// Real audio capture implementation using CPAL.
    ///
    /// Opens the configured device at the configured rate and channel
    /// count, mixes multi-channel input down to mono inside the callback,
    /// and forwards frames through a bounded channel. Tries an f32 stream
    /// first, then falls back to i16 with software conversion.
    pub struct CpalAudioSource {
        device: cpal::Device,
        sample_rate: u32,
        channels: u16,
        stream: Option<SendableStream>,
        failed: Arc<AtomicBool>,
        overruns: Arc<AtomicU64>,
    }

    impl CpalAudioSource {
        /// Resolve the configured device and prepare a source.
        ///
        /// # Errors
        /// Returns `NotulaError::AudioDeviceNotFound` when the configured
        /// device does not exist.
        pub fn new(config: &AudioConfig) -> Result<Self> {
            let device = find_input_device(config.device.as_deref())?;
            Ok(Self {
                device,
                sample_rate: config.sample_rate,
                channels: config.channels,
                stream: None,
                failed: Arc::new(AtomicBool::new(false)),
                overruns: Arc::new(AtomicU64::new(0)),
            })
        }

        fn build_stream(&self, tx: Sender<AudioFrame>) -> Result<cpal::Stream> {
            let stream_config = cpal::StreamConfig {
                channels: self.channels,
                sample_rate: cpal::SampleRate(self.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let channels = self.channels as usize;

            let failed = Arc::clone(&self.failed);
            let err_callback = move |err| {
                tracing::error!("audio stream error: {}", err);
                failed.store(true, Ordering::SeqCst);
            };

            // Preferred: f32 input, the format the buffer keeps natively
            let overruns = Arc::clone(&self.overruns);
            let f32_tx = tx.clone();
            let f32_attempt = with_suppressed_stderr(|| {
                self.device.build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let frame = AudioFrame::new(mix_to_mono(data, channels));
                        if f32_tx.try_send(frame).is_err() {
                            overruns.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_callback.clone(),
                    None,
                )
            });
            if let Ok(stream) = f32_attempt {
                return Ok(stream);
            }

            // Fallback: i16 input with software conversion
            let overruns = Arc::clone(&self.overruns);
            with_suppressed_stderr(|| {
                self.device.build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let float_data: Vec<f32> =
                            data.iter().map(|&s| s as f32 / 32768.0).collect();
                        let frame = AudioFrame::new(mix_to_mono(&float_data, channels));
                        if tx.try_send(frame).is_err() {
                            overruns.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_callback,
                    None,
                )
            })
            .map_err(|e| NotulaError::AudioCapture {
                message: format!("Failed to build input stream: {}", e),
            })
        }
    }

    impl AudioSource for CpalAudioSource {
        fn start(&mut self) -> Result<Receiver<AudioFrame>> {
            let (tx, rx) = bounded(defaults::FRAME_CHANNEL_CAPACITY);

            self.failed.store(false, Ordering::SeqCst);
            let stream = self.build_stream(tx)?;
            stream.play().map_err(|e| NotulaError::AudioCapture {
                message: format!("Failed to start audio stream: {}", e),
            })?;

            self.stream = Some(SendableStream(stream));
            Ok(rx)
        }

        fn stop(&mut self) -> Result<()> {
            if let Some(sendable) = self.stream.take() {
                sendable.0.pause().map_err(|e| NotulaError::AudioCapture {
                    message: format!("Failed to stop audio stream: {}", e),
                })?;
            }
            Ok(())
        }

        fn healthy(&self) -> bool {
            !self.failed.load(Ordering::SeqCst)
        }

        fn overrun_count(&self) -> u64 {
            self.overruns.load(Ordering::Relaxed)
        }
    }
}

/// Mock audio source for testing.
///
/// Frames are injected from the test through the paired sender; the source
/// just hands out the receiving end on `start`.
pub struct MockAudioSource {
    tx: crossbeam_channel::Sender<AudioFrame>,
    rx: Receiver<AudioFrame>,
    started: bool,
    healthy: Arc<AtomicBool>,
    should_fail_start: bool,
}

impl MockAudioSource {
    /// Create a mock with a generous frame buffer.
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1024);
        Self {
            tx,
            rx,
            started: false,
            healthy: Arc::new(AtomicBool::new(true)),
            should_fail_start: false,
        }
    }

    /// Configure the mock to fail on start.
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Sender half used by tests to inject frames.
    pub fn frame_sender(&self) -> crossbeam_channel::Sender<AudioFrame> {
        self.tx.clone()
    }

    /// Flag handle used by tests to simulate a dying stream.
    pub fn health_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.healthy)
    }

    /// Whether `start` has been called (and `stop` has not).
    pub fn is_started(&self) -> bool {
        self.started
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<Receiver<AudioFrame>> {
        if self.should_fail_start {
            return Err(crate::error::NotulaError::AudioCapture {
                message: "mock start failure".to_string(),
            });
        }
        self.started = true;
        Ok(self.rx.clone())
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        Ok(())
    }

    fn healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
