//! Audio capture, level measurement, WAV persistence, and segmentation.

#[cfg(feature = "cpal-audio")]
pub mod device;
pub mod level;
pub mod segmenter;
pub mod source;
pub mod wav;
