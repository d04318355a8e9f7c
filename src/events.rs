//! Typed pipeline events.
//!
//! Completion notification is a bounded channel of typed events rather
//! than closures invoked on the producing thread: consumers subscribe to
//! the receiving end and observe events in the order each producer
//! published them.

use crate::defaults;
use crate::segment::{AudioSegment, TranscriptionResult};
use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::warn;

/// Events published by the capture and transcription sides.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A segment passed the flush checks and was persisted and enqueued.
    SegmentReady(AudioSegment),
    /// A segment was transcribed and its result published.
    TranscriptionReady(Box<TranscriptionResult>),
    /// The capture loop gave up after exhausting stream restarts.
    CaptureFailed { message: String },
}

/// Bounded fan-in channel for [`PipelineEvent`]s.
///
/// Publishing never blocks: when the channel is full the event is dropped
/// with a warning, since events are a notification stream, not the data
/// path (segments and results also travel through their own queues).
#[derive(Clone)]
pub struct EventBus {
    tx: Sender<PipelineEvent>,
    rx: Receiver<PipelineEvent>,
}

impl EventBus {
    /// Creates a bus with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(defaults::EVENT_CHANNEL_CAPACITY)
    }

    /// Creates a bus retaining up to `capacity` undelivered events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }

    /// Publish an event; drops it with a warning when the bus is full.
    pub fn publish(&self, event: PipelineEvent) {
        if let Err(crossbeam_channel::TrySendError::Full(dropped)) = self.tx.try_send(event) {
            warn!(?dropped, "event channel full; dropping event");
        }
    }

    /// The receiving end for the subscriber.
    pub fn receiver(&self) -> Receiver<PipelineEvent> {
        self.rx.clone()
    }

    /// Number of undelivered events.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns true when no events are pending.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
