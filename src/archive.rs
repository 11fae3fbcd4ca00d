//! Frame allocation seam and the default bounded archive.

use crate::types::{Format, StreamKind};
use crate::{EndpointError, Result};
use crossbeam_channel::{Receiver, Sender};
use std::time::SystemTime;

/// Metadata stamped on every delivered frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMetadata {
    pub stream: StreamKind,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Device timestamp (video) or host milliseconds since start (motion).
    pub timestamp: f64,
    pub frame_counter: u64,
    /// Host wall-clock time at which the frame was published.
    pub system_time: SystemTime,
}

/// A frame handed out by a [`FrameArchive`].
///
/// Dropping the frame releases it back to the archive it came from.
pub struct Frame {
    data: Vec<u8>,
    metadata: FrameMetadata,
    _slot: SlotToken,
}

impl Frame {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn metadata(&self) -> &FrameMetadata {
        &self.metadata
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Frame memory pool the endpoint allocates from.
pub trait FrameArchive: Send + Sync {
    /// Allocate a zeroed frame of `size` bytes, or fail with
    /// [`EndpointError::OutOfFrameMemory`] when the pool is exhausted.
    fn allocate(&self, size: usize, metadata: FrameMetadata) -> Result<Frame>;
}

/// Returns its slot to the archive when the owning frame is dropped.
struct SlotToken {
    release: Sender<()>,
}

impl Drop for SlotToken {
    fn drop(&mut self) {
        // The archive may already be gone; nothing to return to then.
        let _ = self.release.try_send(());
    }
}

/// Archive allowing at most `capacity` frames to be alive at once.
pub struct BoundedArchive {
    capacity: usize,
    free: Receiver<()>,
    release: Sender<()>,
}

impl BoundedArchive {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (release, free) = crossbeam_channel::bounded(capacity);
        for _ in 0..capacity {
            // Cannot fail: the channel was sized for exactly this many slots.
            let _ = release.try_send(());
        }
        Self {
            capacity,
            free,
            release,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of frames currently alive.
    pub fn outstanding(&self) -> usize {
        self.capacity - self.free.len()
    }
}

impl FrameArchive for BoundedArchive {
    fn allocate(&self, size: usize, metadata: FrameMetadata) -> Result<Frame> {
        self.free
            .try_recv()
            .map_err(|_| EndpointError::OutOfFrameMemory)?;

        Ok(Frame {
            data: vec![0u8; size],
            metadata,
            _slot: SlotToken {
                release: self.release.clone(),
            },
        })
    }
}
