//! Capture sources and one-shot screenshots for the glimpse transport.
//!
//! A [`CaptureSource`] is the platform seam: it reports the current frame
//! geometry and writes pixels into a caller-supplied buffer. The [`shot`]
//! module builds the shared-memory screenshot operations on top —
//! [`capture_once`] allocates a right-sized segment internally, while
//! [`capture_into`] targets a caller-provided pre-attached segment
//! (zero-copy path) and reports the required size instead of truncating
//! when the target is too small.
//!
//! The format tag in every descriptor reflects the actual captured format;
//! converting to some other pixel format is an external concern.

use glimpse_core::{Error, FrameGeometry};

#[cfg(target_os = "linux")]
pub mod fbdev;
pub mod pattern;
pub mod shot;

#[cfg(target_os = "linux")]
pub use fbdev::FbdevSource;
pub use pattern::{PatternResizer, PatternSource};
pub use shot::{Screenshot, capture_into, capture_into_at, capture_once, capture_once_at};

/// A platform-specific single-shot screen capture surface.
///
/// Implementations are driven by one producer at a time; `capture` writes
/// exactly `geometry.frame_len()` bytes into `dst`.
pub trait CaptureSource: Send {
    /// Geometry of the next captured frame.
    ///
    /// Queried before every capture; a changed geometry makes callers
    /// rotate to a freshly sized segment.
    fn geometry(&mut self) -> Result<FrameGeometry, Error>;

    /// Capture one frame into `dst` (`geometry.frame_len()` bytes).
    fn capture(&mut self, geometry: &FrameGeometry, dst: &mut [u8]) -> Result<(), Error>;
}
