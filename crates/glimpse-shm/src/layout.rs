//! Frame segment memory layout.
//!
//! Every frame segment starts with a 128-byte header followed by pixel
//! data:
//!
//! ```text
//! +--------------------------------------------------------------+
//! | FRAME HEADER (128 bytes)                                     |
//! |   magic: "GLMFRAME", layout version, flags                   |
//! |   seq (seqlock word: odd while a frame write is in progress) |
//! |   width, height, bytes_per_row, format (FourCC)              |
//! |   frame_len, timestamp_ns                                    |
//! +--------------------------------------------------------------+
//! | PIXEL DATA (bytes_per_row * height bytes)                    |
//! +--------------------------------------------------------------+
//! ```
//!
//! The shared region is deliberately lock-free: the producer never takes a
//! lock on the capture path. Consumers detect torn reads via the seqlock —
//! read `seq` (retry while odd), copy the payload, re-read `seq`, and accept
//! only if both reads match.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering, fence};

use glimpse_core::{Error, FrameDescriptor, FrameGeometry, PixelFormat};

use crate::map::Mapping;

/// Magic bytes identifying a glimpse frame segment.
pub const FRAME_MAGIC: [u8; 8] = *b"GLMFRAME";

/// Current layout version.
pub const LAYOUT_VERSION: u32 = 1;

/// Byte offset of pixel data; equals the header size.
pub const FRAME_DATA_OFFSET: usize = 128;

/// Attempts a reader makes against a write-in-progress seqlock before
/// reporting the writer as stalled.
const TORN_READ_RETRIES: usize = 256;

/// Frame header at the start of a frame segment (128 bytes).
///
/// All fields mutated after initialization are atomics; plain fields are
/// written once by the creating process before the key is shared.
#[repr(C, align(64))]
pub struct FrameHeader {
    /// Magic bytes: "GLMFRAME".
    pub magic: [u8; 8],
    /// Layout version.
    pub version: u32,
    /// Reserved.
    pub flags: u32,

    /// Seqlock word. Zero means no frame published yet; odd means a write
    /// is in progress; each published frame lands on the next even value.
    pub seq: AtomicU64,

    /// Frame width in pixels.
    pub width: AtomicU32,
    /// Frame height in pixels.
    pub height: AtomicU32,
    /// Bytes per row.
    pub bytes_per_row: AtomicU32,
    /// Pixel format FourCC, packed little-endian.
    pub format: AtomicU32,

    /// Pixel payload length in bytes.
    pub frame_len: AtomicU64,
    /// Capture timestamp, nanoseconds since the Unix epoch.
    pub timestamp_ns: AtomicU64,

    /// Padding to 128 bytes.
    pub _pad: [u8; 72],
}

const _: () = assert!(core::mem::size_of::<FrameHeader>() == FRAME_DATA_OFFSET);
const _: () = assert!(core::mem::align_of::<FrameHeader>() == 64);

impl FrameHeader {
    /// Initialize a fresh header. Must happen before the segment's key is
    /// handed to any other process.
    pub fn init(&mut self) {
        self.magic = FRAME_MAGIC;
        self.version = LAYOUT_VERSION;
        self.flags = 0;
        self.seq = AtomicU64::new(0);
        self.width = AtomicU32::new(0);
        self.height = AtomicU32::new(0);
        self.bytes_per_row = AtomicU32::new(0);
        self.format = AtomicU32::new(0);
        self.frame_len = AtomicU64::new(0);
        self.timestamp_ns = AtomicU64::new(0);
        self._pad = [0; 72];
    }

    /// Validate magic and version.
    pub fn validate(&self) -> Result<(), Error> {
        if self.magic != FRAME_MAGIC {
            return Err(Error::InvalidArgument("segment is not a frame segment"));
        }
        if self.version != LAYOUT_VERSION {
            return Err(Error::InvalidArgument("unsupported frame layout version"));
        }
        Ok(())
    }
}

/// Total segment length needed to hold one frame of the given geometry.
pub const fn required_segment_len(geometry: &FrameGeometry) -> usize {
    FRAME_DATA_OFFSET + geometry.frame_len()
}

/// Borrow the header of a mapped frame segment.
pub fn header(mapping: &Mapping) -> Result<&FrameHeader, Error> {
    if mapping.len() < FRAME_DATA_OFFSET {
        return Err(Error::InvalidArgument("segment too small for frame header"));
    }
    // SAFETY: mmap returns page-aligned addresses (>= 64-byte alignment)
    // and the length check above covers the header; all mutable fields are
    // atomics.
    Ok(unsafe { &*(mapping.base() as *const FrameHeader) })
}

/// Initialize the header of a freshly created segment.
///
/// The caller must be the only process holding the segment; the key must
/// not have been shared yet.
pub fn init_segment(mapping: &Mapping) -> Result<(), Error> {
    if mapping.len() < FRAME_DATA_OFFSET {
        return Err(Error::InvalidArgument("segment too small for frame header"));
    }
    // SAFETY: exclusive access per the function contract; alignment as in
    // `header`.
    let hdr = unsafe { &mut *(mapping.base() as *mut FrameHeader) };
    hdr.init();
    Ok(())
}

/// Validate an existing header, initializing a blank segment on first use.
///
/// Accepts either an already-initialized frame segment or an all-zero
/// region (a caller-provided segment that has not carried a frame yet).
pub fn ensure_header(mapping: &Mapping) -> Result<(), Error> {
    let hdr = header(mapping)?;
    if hdr.magic == [0u8; 8] && hdr.version == 0 {
        init_segment(mapping)
    } else {
        hdr.validate()
    }
}

/// Publish one frame into a mapped segment under the seqlock.
///
/// Checks capacity before any byte is written: a too-small segment fails
/// with `ResourceExhausted` carrying the required size, leaving the segment
/// contents untouched. `fill` writes the pixel payload; if it fails, the
/// seqlock is restored so consumers still observe the previous frame.
pub fn publish_frame<F>(
    mapping: &Mapping,
    geometry: &FrameGeometry,
    timestamp_ns: u64,
    fill: F,
) -> Result<FrameDescriptor, Error>
where
    F: FnOnce(&mut [u8]) -> Result<(), Error>,
{
    geometry.validate()?;
    let hdr = header(mapping)?;
    hdr.validate()?;

    let frame_len = geometry.frame_len();
    let required = required_segment_len(geometry);
    if required > mapping.len() {
        return Err(Error::ResourceExhausted {
            what: format!(
                "segment {} ({} bytes) too small for {}x{} frame",
                mapping.key(),
                mapping.len(),
                geometry.width,
                geometry.height
            ),
            required: Some(required),
        });
    }

    let seq0 = hdr.seq.load(Ordering::Relaxed);
    debug_assert_eq!(seq0 & 1, 0, "publish_frame is single-producer");
    hdr.seq.store(seq0 + 1, Ordering::Relaxed);
    fence(Ordering::Release);

    // SAFETY: capacity checked above; this process is the sole producer
    // while seq is odd, and consumers reading concurrently will observe the
    // odd seq and retry.
    let data =
        unsafe { std::slice::from_raw_parts_mut(mapping.base().add(FRAME_DATA_OFFSET), frame_len) };
    if let Err(e) = fill(data) {
        // Roll the seqlock back to the previous frame; partially written
        // pixels are never observable as a published frame.
        hdr.seq.store(seq0, Ordering::Release);
        return Err(e);
    }

    hdr.width.store(geometry.width, Ordering::Relaxed);
    hdr.height.store(geometry.height, Ordering::Relaxed);
    hdr.bytes_per_row.store(geometry.bytes_per_row, Ordering::Relaxed);
    hdr.format.store(geometry.format.to_u32(), Ordering::Relaxed);
    hdr.frame_len.store(frame_len as u64, Ordering::Relaxed);
    hdr.timestamp_ns.store(timestamp_ns, Ordering::Relaxed);

    let seq = seq0 + 2;
    fence(Ordering::Release);
    hdr.seq.store(seq, Ordering::Release);

    Ok(FrameDescriptor {
        geometry: *geometry,
        data_offset: FRAME_DATA_OFFSET,
        data_len: frame_len,
        seq,
        timestamp_ns,
    })
}

/// A consistent copy of the latest published frame.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub descriptor: FrameDescriptor,
    pub pixels: Vec<u8>,
}

/// Read the latest published frame, retrying bounded times on torn reads.
///
/// Fails with `InvalidState` if no frame has been published yet, or if the
/// writer appears stalled mid-frame (e.g. the producer died while the
/// seqlock was odd). Callers streaming at a fixed rate simply retry on the
/// next frame.
pub fn read_snapshot(mapping: &Mapping) -> Result<FrameSnapshot, Error> {
    let hdr = header(mapping)?;
    hdr.validate()?;

    for _ in 0..TORN_READ_RETRIES {
        let seq1 = hdr.seq.load(Ordering::Acquire);
        if seq1 == 0 {
            return Err(Error::InvalidState(
                "no frame has been published into this segment",
            ));
        }
        if seq1 & 1 == 1 {
            std::thread::yield_now();
            continue;
        }

        let geometry = FrameGeometry {
            width: hdr.width.load(Ordering::Relaxed),
            height: hdr.height.load(Ordering::Relaxed),
            bytes_per_row: hdr.bytes_per_row.load(Ordering::Relaxed),
            format: PixelFormat::from_u32(hdr.format.load(Ordering::Relaxed)),
        };
        let frame_len = hdr.frame_len.load(Ordering::Relaxed) as usize;
        let timestamp_ns = hdr.timestamp_ns.load(Ordering::Relaxed);
        if frame_len != geometry.frame_len() || FRAME_DATA_OFFSET + frame_len > mapping.len() {
            // Racing a writer that is changing geometry; retry.
            std::thread::yield_now();
            continue;
        }

        let mut pixels = vec![0u8; frame_len];
        // SAFETY: bounds checked against the mapping above; a concurrent
        // writer is detected by the seq re-read below and the copy
        // discarded.
        unsafe {
            std::ptr::copy_nonoverlapping(
                mapping.base().add(FRAME_DATA_OFFSET),
                pixels.as_mut_ptr(),
                frame_len,
            );
        }
        fence(Ordering::Acquire);
        let seq2 = hdr.seq.load(Ordering::Relaxed);
        if seq1 == seq2 {
            return Ok(FrameSnapshot {
                descriptor: FrameDescriptor {
                    geometry,
                    data_offset: FRAME_DATA_OFFSET,
                    data_len: frame_len,
                    seq: seq1,
                    timestamp_ns,
                },
                pixels,
            });
        }
    }

    Err(Error::InvalidState(
        "torn frame read: writer active or stalled mid-frame",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentManager;
    use glimpse_core::ErrorKind;

    fn test_geometry() -> FrameGeometry {
        FrameGeometry {
            width: 16,
            height: 8,
            bytes_per_row: 64,
            format: PixelFormat::BGRA8888,
        }
    }

    fn frame_segment(len: usize) -> (SegmentManager, crate::segment::Segment, Mapping) {
        let mgr = SegmentManager::new();
        let seg = mgr.create(len).unwrap();
        let mapping = seg.attach().unwrap();
        init_segment(&mapping).unwrap();
        (mgr, seg, mapping)
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(core::mem::size_of::<FrameHeader>(), 128);
        assert_eq!(core::mem::size_of::<FrameHeader>(), FRAME_DATA_OFFSET);
    }

    #[test]
    fn test_publish_and_read_round_trip() {
        let geom = test_geometry();
        let (_mgr, _seg, mapping) = frame_segment(required_segment_len(&geom));

        let desc = publish_frame(&mapping, &geom, 42, |dst| {
            for (i, b) in dst.iter_mut().enumerate() {
                *b = (i % 251) as u8;
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(desc.seq, 2);
        assert_eq!(desc.data_len, geom.frame_len());

        let snap = read_snapshot(&mapping).unwrap();
        assert_eq!(snap.descriptor, desc);
        assert!(snap.pixels.iter().enumerate().all(|(i, b)| *b == (i % 251) as u8));
    }

    #[test]
    fn test_publish_into_undersized_segment() {
        let geom = test_geometry();
        let (_mgr, _seg, mapping) = frame_segment(FRAME_DATA_OFFSET + 16);

        let err = publish_frame(&mapping, &geom, 0, |_| unreachable!("must not write")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(err.required_size(), Some(required_segment_len(&geom)));

        // Nothing was published.
        assert_eq!(header(&mapping).unwrap().seq.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_failed_fill_restores_previous_frame() {
        let geom = test_geometry();
        let (_mgr, _seg, mapping) = frame_segment(required_segment_len(&geom));

        publish_frame(&mapping, &geom, 1, |dst| {
            dst.fill(7);
            Ok(())
        })
        .unwrap();

        let err = publish_frame(&mapping, &geom, 2, |dst| {
            dst[0] = 99; // partial write before the failure
            Err(Error::CaptureUnavailable("display went away".into()))
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CaptureUnavailable);

        // The previous frame is still the published one.
        let snap = read_snapshot(&mapping).unwrap();
        assert_eq!(snap.descriptor.seq, 2);
        assert_eq!(snap.descriptor.timestamp_ns, 1);
    }

    #[test]
    fn test_read_before_any_publish() {
        let (_mgr, _seg, mapping) = frame_segment(4096);
        let err = read_snapshot(&mapping).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_stalled_writer_reports_invalid_state() {
        let geom = test_geometry();
        let (_mgr, _seg, mapping) = frame_segment(required_segment_len(&geom));
        publish_frame(&mapping, &geom, 0, |dst| {
            dst.fill(0);
            Ok(())
        })
        .unwrap();

        // Simulate a producer that died mid-frame.
        header(&mapping).unwrap().seq.store(3, Ordering::Release);
        let err = read_snapshot(&mapping).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_garbage_header_is_rejected() {
        let mgr = SegmentManager::new();
        let seg = mgr.create(4096).unwrap();
        let mapping = seg.attach().unwrap();
        // SAFETY: sole owner in a single-process test.
        unsafe {
            mapping.base().write_bytes(0xFF, 64);
        }
        assert_eq!(
            ensure_header(&mapping).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn test_ensure_header_initializes_blank_segment() {
        let mgr = SegmentManager::new();
        let seg = mgr.create(4096).unwrap();
        let mapping = seg.attach().unwrap();
        ensure_header(&mapping).unwrap();
        assert_eq!(header(&mapping).unwrap().magic, FRAME_MAGIC);
        // Idempotent on an initialized segment.
        ensure_header(&mapping).unwrap();
    }
}
