//! Deterministic synthetic capture source.
//!
//! Produces a gradient test pattern with the frame counter mixed into every
//! pixel, so two processes (or a test and its forked child) can validate
//! pixel-exact delivery without a real display. Also the capture source of
//! choice for headless producers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use glimpse_core::{Error, FrameGeometry, PixelFormat};

use crate::CaptureSource;

/// Synthetic BGRA capture source with externally adjustable geometry.
pub struct PatternSource {
    /// Packed `(width << 32) | height`, shared with [`PatternResizer`].
    dims: Arc<AtomicU64>,
    frame: u64,
}

/// Handle for changing a [`PatternSource`]'s geometry while it is owned by
/// a streaming loop; used to exercise segment rotation.
#[derive(Clone)]
pub struct PatternResizer {
    dims: Arc<AtomicU64>,
}

impl PatternResizer {
    pub fn resize(&self, width: u32, height: u32) {
        self.dims.store(pack(width, height), Ordering::Release);
    }
}

const fn pack(width: u32, height: u32) -> u64 {
    ((width as u64) << 32) | height as u64
}

impl PatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            dims: Arc::new(AtomicU64::new(pack(width, height))),
            frame: 0,
        }
    }

    /// A handle that can change this source's geometry from another thread.
    pub fn resizer(&self) -> PatternResizer {
        PatternResizer {
            dims: self.dims.clone(),
        }
    }

    /// Frames captured so far.
    pub fn frames_captured(&self) -> u64 {
        self.frame
    }

    /// The deterministic pixel byte at linear offset `i` of frame `frame`.
    pub fn expected_byte(i: usize, frame: u64) -> u8 {
        (i as u64)
            .wrapping_mul(2654435761)
            .wrapping_add(frame)
            .to_le_bytes()[0]
    }
}

impl CaptureSource for PatternSource {
    fn geometry(&mut self) -> Result<FrameGeometry, Error> {
        let packed = self.dims.load(Ordering::Acquire);
        let width = (packed >> 32) as u32;
        let height = packed as u32;
        Ok(FrameGeometry {
            width,
            height,
            bytes_per_row: width * 4,
            format: PixelFormat::BGRA8888,
        })
    }

    fn capture(&mut self, geometry: &FrameGeometry, dst: &mut [u8]) -> Result<(), Error> {
        debug_assert_eq!(dst.len(), geometry.frame_len());
        let frame = self.frame;
        for (i, b) in dst.iter_mut().enumerate() {
            *b = Self::expected_byte(i, frame);
        }
        self.frame += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_differ_and_are_deterministic() {
        let mut src = PatternSource::new(8, 4);
        let geom = src.geometry().unwrap();
        let mut a = vec![0u8; geom.frame_len()];
        let mut b = vec![0u8; geom.frame_len()];
        src.capture(&geom, &mut a).unwrap();
        src.capture(&geom, &mut b).unwrap();
        assert_ne!(a, b);
        assert!(a.iter().enumerate().all(|(i, v)| *v == PatternSource::expected_byte(i, 0)));
        assert_eq!(src.frames_captured(), 2);
    }

    #[test]
    fn test_resizer_changes_geometry() {
        let mut src = PatternSource::new(8, 4);
        let resizer = src.resizer();
        resizer.resize(16, 2);
        let geom = src.geometry().unwrap();
        assert_eq!((geom.width, geom.height), (16, 2));
        assert_eq!(geom.bytes_per_row, 64);
    }
}
