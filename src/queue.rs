//! Bounded hand-off queues between the capture and transcription sides.
//!
//! The segment queue is deliberately bounded: a transcription backlog must
//! surface as an explicit overflow decision instead of unbounded memory
//! growth. The policy is a configuration knob.

use crate::defaults;
use crate::error::{NotulaError, Result};
use crate::segment::AudioSegment;
use crossbeam_channel::{Receiver, Sender, bounded};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// What to do when a segment arrives and the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Block the producer (with a generous timeout) until space frees up.
    #[default]
    Block,
    /// Evict the oldest queued segment to make room for the new one.
    DropOldest,
    /// Refuse the new segment.
    Reject,
}

/// FIFO queue carrying finalized segments to the single consumer.
///
/// Cloning shares the same underlying channel; producers push through any
/// clone, the worker consumes through [`SegmentQueue::consumer`].
#[derive(Clone)]
pub struct SegmentQueue {
    tx: Sender<AudioSegment>,
    rx: Receiver<AudioSegment>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl SegmentQueue {
    /// Creates a queue with the given capacity and overflow policy.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            policy,
        }
    }

    /// Enqueue a segment, applying the overflow policy when full.
    ///
    /// A segment that cannot be queued (Reject, DropOldest eviction, or a
    /// Block timeout) has its backing WAV deleted so no orphan files pile
    /// up on disk.
    pub fn push(&self, segment: AudioSegment) -> Result<()> {
        match self.policy {
            OverflowPolicy::Block => {
                match self
                    .tx
                    .send_timeout(segment, defaults::QUEUE_BLOCK_TIMEOUT)
                {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        let segment = err.into_inner();
                        warn!(
                            path = %segment.file_path.display(),
                            "segment queue blocked too long; dropping segment"
                        );
                        discard_segment(&segment);
                        Err(NotulaError::QueueFull {
                            capacity: self.capacity,
                        })
                    }
                }
            }
            OverflowPolicy::DropOldest => {
                let mut segment = segment;
                loop {
                    match self.tx.try_send(segment) {
                        Ok(()) => return Ok(()),
                        Err(crossbeam_channel::TrySendError::Full(returned)) => {
                            if let Ok(evicted) = self.rx.try_recv() {
                                warn!(
                                    path = %evicted.file_path.display(),
                                    "segment queue full; evicting oldest segment"
                                );
                                discard_segment(&evicted);
                            }
                            segment = returned;
                        }
                        Err(crossbeam_channel::TrySendError::Disconnected(returned)) => {
                            discard_segment(&returned);
                            return Err(NotulaError::QueueFull {
                                capacity: self.capacity,
                            });
                        }
                    }
                }
            }
            OverflowPolicy::Reject => match self.tx.try_send(segment) {
                Ok(()) => Ok(()),
                Err(err) => {
                    let segment = err.into_inner();
                    warn!(
                        path = %segment.file_path.display(),
                        "segment queue full; rejecting segment"
                    );
                    discard_segment(&segment);
                    Err(NotulaError::QueueFull {
                        capacity: self.capacity,
                    })
                }
            },
        }
    }

    /// The consuming end for the transcription worker.
    pub fn consumer(&self) -> Receiver<AudioSegment> {
        self.rx.clone()
    }

    /// Number of segments currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns true when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Drop everything still queued, deleting the backing files.
    pub fn clear(&self) {
        while let Ok(segment) = self.rx.try_recv() {
            discard_segment(&segment);
        }
    }
}

/// Remove the backing file of a segment that will never be transcribed.
fn discard_segment(segment: &AudioSegment) {
    if segment.file_path.exists()
        && let Err(e) = std::fs::remove_file(&segment.file_path)
    {
        warn!(
            path = %segment.file_path.display(),
            error = %e,
            "failed to remove dropped segment file"
        );
    }
}

/// Bounded holding queue for poll-style consumers.
///
/// Producers push with drop-oldest semantics so a consumer that never
/// drains cannot grow memory without bound; `drain` hands back everything
/// currently held, in insertion order.
#[derive(Clone)]
pub struct DrainQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> DrainQueue<T> {
    /// Creates a holding queue retaining up to `capacity` items.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }

    /// Add an item, evicting the oldest when full.
    pub fn push(&self, item: T) {
        let mut item = item;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return,
                Err(crossbeam_channel::TrySendError::Full(returned)) => {
                    let _ = self.rx.try_recv();
                    item = returned;
                }
                Err(crossbeam_channel::TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Take everything currently held, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    /// Number of items currently held.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns true when nothing is held.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
