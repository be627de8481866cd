//! Frame geometry and descriptor value types.

use std::fmt;

use crate::Error;

/// Four-character pixel format tag, as captured by the platform.
///
/// The tag always reflects the actual captured format; format conversion is
/// an external concern. Stored little-endian when packed into a `u32` for
/// the shared segment header.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelFormat(pub [u8; 4]);

impl PixelFormat {
    /// 8-bit blue/green/red/alpha, 4 bytes per pixel.
    pub const BGRA8888: Self = Self(*b"BGRA");
    /// 8-bit red/green/blue/alpha, 4 bytes per pixel.
    pub const RGBA8888: Self = Self(*b"RGBA");
    /// 32-bit XRGB little-endian (common framebuffer layout).
    pub const XRGB8888: Self = Self(*b"XR24");
    /// 16-bit RGB 5:6:5.
    pub const RGB565: Self = Self(*b"RG16");

    /// Pack into a `u32` for storage in a shared header field.
    pub const fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Unpack from a shared header field.
    pub const fn from_u32(v: u32) -> Self {
        Self(v.to_le_bytes())
    }

    /// Bytes per pixel for the formats this transport knows about, `None`
    /// for foreign tags (still transported, just not size-checked).
    pub const fn bytes_per_pixel(self) -> Option<u32> {
        match self.0 {
            [b'B', b'G', b'R', b'A'] | [b'R', b'G', b'B', b'A'] | [b'X', b'R', b'2', b'4'] => {
                Some(4)
            }
            [b'R', b'G', b'1', b'6'] => Some(2),
            _ => None,
        }
    }
}

impl fmt::Debug for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PixelFormat({self})")
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            let c = if b.is_ascii_graphic() { b as char } else { '.' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// Geometry of one captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per row. May exceed `width * bytes_per_pixel` due to alignment.
    pub bytes_per_row: u32,
    /// Captured pixel format.
    pub format: PixelFormat,
}

impl FrameGeometry {
    /// Total pixel byte length (`bytes_per_row * height`).
    pub const fn frame_len(&self) -> usize {
        self.bytes_per_row as usize * self.height as usize
    }

    /// Validate caller-supplied geometry.
    pub fn validate(&self) -> Result<(), Error> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidArgument("frame dimensions must be non-zero"));
        }
        if let Some(bpp) = self.format.bytes_per_pixel() {
            let min_stride = self.width as u64 * bpp as u64;
            if (self.bytes_per_row as u64) < min_stride {
                return Err(Error::InvalidArgument(
                    "bytes_per_row smaller than width * bytes_per_pixel",
                ));
            }
        }
        Ok(())
    }
}

/// Metadata describing one captured frame inside a mapped segment.
///
/// A descriptor never outlives the mapping it points into: producers hand
/// out borrowed views for synchronous delivery, and consumers receiving a
/// descriptor out-of-band re-attach via the segment key before reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDescriptor {
    /// Frame geometry.
    pub geometry: FrameGeometry,
    /// Byte offset of pixel data within the segment.
    pub data_offset: usize,
    /// Pixel data length in bytes (`geometry.frame_len()`).
    pub data_len: usize,
    /// Seqlock value at publication (even; increases per frame).
    pub seq: u64,
    /// Capture timestamp, nanoseconds since the Unix epoch.
    pub timestamp_ns: u64,
}
