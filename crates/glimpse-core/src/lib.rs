//! Core types for the glimpse shared-memory frame transport.
//!
//! This crate defines the error taxonomy shared by every glimpse component,
//! plus the value types describing captured frames: [`PixelFormat`],
//! [`FrameGeometry`] and [`FrameDescriptor`]. It contains no platform code;
//! the shared-memory plumbing lives in `glimpse-shm` and capture in
//! `glimpse-capture`.

mod error;
mod frame;

pub use error::{Error, ErrorKind};
pub use frame::{FrameDescriptor, FrameGeometry, PixelFormat};

/// Crate version, for cross-boundary diagnostics.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Current wall-clock time as nanoseconds since the Unix epoch.
///
/// Used for frame timestamps. Callers needing per-session monotonicity
/// (the streaming loop) clamp against the previously issued timestamp.
pub fn now_unix_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_semver_ish() {
        let v = version();
        assert!(v.split('.').count() >= 2, "unexpected version: {v}");
    }

    #[test]
    fn test_now_unix_ns_advances() {
        let a = now_unix_ns();
        let b = now_unix_ns();
        assert!(b >= a);
    }
}
