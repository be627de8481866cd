//! One-shot screenshots into shared-memory segments.

use glimpse_core::{Error, FrameDescriptor, now_unix_ns};
use glimpse_shm::layout::{self, required_segment_len};
use glimpse_shm::{Mapping, Segment, SegmentManager};
use tracing::debug;

use crate::CaptureSource;

/// A captured frame together with the segment and mapping that back it.
///
/// The descriptor never outlives the mapping: both are owned here, and the
/// pixel accessor borrows from the screenshot. Dropping a screenshot
/// detaches and (via `Segment`'s cleanup) releases the backing segment
/// unless it was created through a caller-managed `SegmentManager` handle
/// and destroyed explicitly.
pub struct Screenshot {
    segment: Segment,
    mapping: Mapping,
    descriptor: FrameDescriptor,
}

impl Screenshot {
    /// Descriptor of the most recent frame in this screenshot's segment.
    pub fn descriptor(&self) -> &FrameDescriptor {
        &self.descriptor
    }

    /// The segment's exchangeable key, for out-of-band delivery to a
    /// consumer process.
    pub fn key(&self) -> &str {
        self.segment.key()
    }

    /// The backing segment.
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// The producer-side mapping.
    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    /// Pixel bytes of the captured frame.
    pub fn pixels(&self) -> &[u8] {
        // SAFETY: this process is the sole producer for the segment, and
        // consumers only read; the descriptor's range was validated at
        // publish time.
        unsafe { &self.mapping.as_slice()[self.descriptor.data_offset..][..self.descriptor.data_len] }
    }

    /// Capture a fresh frame into this screenshot's existing segment,
    /// replacing the descriptor. Fails like [`capture_into`] if the new
    /// geometry no longer fits.
    pub fn recapture<S: CaptureSource>(&mut self, source: &mut S) -> Result<&FrameDescriptor, Error> {
        self.recapture_at(source, now_unix_ns())
    }

    /// As [`recapture`](Self::recapture), with a caller-supplied timestamp
    /// (streaming loops use this to keep per-session timestamps
    /// non-decreasing across clock steps).
    pub fn recapture_at<S: CaptureSource>(
        &mut self,
        source: &mut S,
        timestamp_ns: u64,
    ) -> Result<&FrameDescriptor, Error> {
        self.descriptor = capture_into_at(source, &self.mapping, timestamp_ns)?;
        Ok(&self.descriptor)
    }

    /// Detach and destroy the backing segment.
    pub fn release(self, manager: &SegmentManager) -> Result<(), Error> {
        let Screenshot {
            segment, mapping, ..
        } = self;
        mapping.detach()?;
        manager.destroy(&segment)
    }
}

/// Perform a single screen capture into a newly allocated segment.
///
/// The segment is sized exactly for the captured geometry. Fails with
/// `CaptureUnavailable` if the platform capture surface cannot be acquired.
pub fn capture_once<S: CaptureSource>(
    manager: &SegmentManager,
    source: &mut S,
) -> Result<Screenshot, Error> {
    capture_once_at(manager, source, now_unix_ns())
}

/// As [`capture_once`], with a caller-supplied timestamp.
pub fn capture_once_at<S: CaptureSource>(
    manager: &SegmentManager,
    source: &mut S,
    timestamp_ns: u64,
) -> Result<Screenshot, Error> {
    let geometry = source.geometry()?;
    geometry.validate()?;

    let segment = manager.create(required_segment_len(&geometry))?;
    let mapping = segment.attach()?;
    layout::init_segment(&mapping)?;

    let descriptor = layout::publish_frame(&mapping, &geometry, timestamp_ns, |dst| {
        source.capture(&geometry, dst)
    })?;
    debug!(
        key = %segment.key(),
        width = geometry.width,
        height = geometry.height,
        format = %geometry.format,
        "captured screenshot"
    );
    Ok(Screenshot {
        segment,
        mapping,
        descriptor,
    })
}

/// Zero-copy capture into a caller-provided pre-attached segment.
///
/// The target's capacity is checked before any pixel is written; a too-small
/// segment fails with `ResourceExhausted` carrying the required size, and no
/// caller-visible state changes. A blank (never-written) segment gets its
/// frame header initialized on first use.
pub fn capture_into<S: CaptureSource>(
    source: &mut S,
    mapping: &Mapping,
) -> Result<FrameDescriptor, Error> {
    capture_into_at(source, mapping, now_unix_ns())
}

/// As [`capture_into`], with a caller-supplied timestamp.
pub fn capture_into_at<S: CaptureSource>(
    source: &mut S,
    mapping: &Mapping,
    timestamp_ns: u64,
) -> Result<FrameDescriptor, Error> {
    let geometry = source.geometry()?;
    geometry.validate()?;

    let required = required_segment_len(&geometry);
    if required > mapping.len() {
        return Err(Error::ResourceExhausted {
            what: format!(
                "capture target {} ({} bytes) too small for {}x{} frame",
                mapping.key(),
                mapping.len(),
                geometry.width,
                geometry.height
            ),
            required: Some(required),
        });
    }
    layout::ensure_header(mapping)?;
    layout::publish_frame(mapping, &geometry, timestamp_ns, |dst| {
        source.capture(&geometry, dst)
    })
}
