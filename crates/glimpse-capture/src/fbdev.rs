//! Linux framebuffer capture source.
//!
//! Single-shot reads of `/dev/fb0` (or another fbdev node). The kernel
//! reports geometry through the `FBIOGET_VSCREENINFO` / `FBIOGET_FSCREENINFO`
//! ioctls; pixels are read with `pread` so the device is never mapped into
//! this process.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use glimpse_core::{Error, FrameGeometry, PixelFormat};
use tracing::debug;

use crate::CaptureSource;

const FBIOGET_VSCREENINFO: libc::c_ulong = 0x4600;
const FBIOGET_FSCREENINFO: libc::c_ulong = 0x4602;

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct FbBitfield {
    offset: u32,
    length: u32,
    msb_right: u32,
}

/// `struct fb_var_screeninfo` from `<linux/fb.h>`.
#[repr(C)]
#[derive(Clone, Copy, Default)]
struct FbVarScreeninfo {
    xres: u32,
    yres: u32,
    xres_virtual: u32,
    yres_virtual: u32,
    xoffset: u32,
    yoffset: u32,
    bits_per_pixel: u32,
    grayscale: u32,
    red: FbBitfield,
    green: FbBitfield,
    blue: FbBitfield,
    transp: FbBitfield,
    nonstd: u32,
    activate: u32,
    height: u32,
    width: u32,
    accel_flags: u32,
    pixclock: u32,
    left_margin: u32,
    right_margin: u32,
    upper_margin: u32,
    lower_margin: u32,
    hsync_len: u32,
    vsync_len: u32,
    sync: u32,
    vmode: u32,
    rotate: u32,
    colorspace: u32,
    reserved: [u32; 4],
}

/// `struct fb_fix_screeninfo` from `<linux/fb.h>`.
#[repr(C)]
struct FbFixScreeninfo {
    id: [u8; 16],
    smem_start: libc::c_ulong,
    smem_len: u32,
    type_: u32,
    type_aux: u32,
    visual: u32,
    xpanstep: u16,
    ypanstep: u16,
    ywrapstep: u16,
    line_length: u32,
    mmio_start: libc::c_ulong,
    mmio_len: u32,
    accel: u32,
    capabilities: u16,
    reserved: [u16; 2],
}

/// Capture source backed by a Linux framebuffer device.
#[derive(Debug)]
pub struct FbdevSource {
    file: File,
}

impl FbdevSource {
    /// Open the default framebuffer, `/dev/fb0`.
    pub fn open() -> Result<Self, Error> {
        Self::open_path("/dev/fb0")
    }

    /// Open a specific framebuffer node.
    ///
    /// A missing device (headless host, no session) is reported as
    /// `CaptureUnavailable`; access control as `PermissionDenied`.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.raw_os_error() {
            Some(libc::EACCES) | Some(libc::EPERM) => {
                Error::PermissionDenied(format!("{}: {e}", path.display()))
            }
            _ => Error::CaptureUnavailable(format!("{}: {e}", path.display())),
        })?;
        debug!(path = %path.display(), "opened framebuffer");
        Ok(Self { file })
    }

    fn var_info(&self) -> Result<FbVarScreeninfo, Error> {
        let mut var = FbVarScreeninfo::default();
        // SAFETY: valid fd; the ioctl fills the whole struct.
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                FBIOGET_VSCREENINFO as _,
                &mut var as *mut FbVarScreeninfo,
            )
        };
        if rc != 0 {
            return Err(Error::CaptureUnavailable(format!(
                "FBIOGET_VSCREENINFO: {}",
                io::Error::last_os_error()
            )));
        }
        Ok(var)
    }

    fn fix_info(&self) -> Result<FbFixScreeninfo, Error> {
        // SAFETY: zeroed is a valid bit pattern for this plain-data struct.
        let mut fix: FbFixScreeninfo = unsafe { std::mem::zeroed() };
        // SAFETY: valid fd; the ioctl fills the whole struct.
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                FBIOGET_FSCREENINFO as _,
                &mut fix as *mut FbFixScreeninfo,
            )
        };
        if rc != 0 {
            return Err(Error::CaptureUnavailable(format!(
                "FBIOGET_FSCREENINFO: {}",
                io::Error::last_os_error()
            )));
        }
        Ok(fix)
    }
}

impl CaptureSource for FbdevSource {
    fn geometry(&mut self) -> Result<FrameGeometry, Error> {
        let var = self.var_info()?;
        let fix = self.fix_info()?;

        let format = match var.bits_per_pixel {
            32 if var.red.offset == 0 => PixelFormat::RGBA8888,
            32 => PixelFormat::XRGB8888,
            16 => PixelFormat::RGB565,
            bpp => {
                return Err(Error::CaptureUnavailable(format!(
                    "unsupported framebuffer depth: {bpp} bpp"
                )));
            }
        };
        Ok(FrameGeometry {
            width: var.xres,
            height: var.yres,
            bytes_per_row: fix.line_length,
            format,
        })
    }

    fn capture(&mut self, geometry: &FrameGeometry, dst: &mut [u8]) -> Result<(), Error> {
        debug_assert_eq!(dst.len(), geometry.frame_len());
        // Panning offsets are ignored: we read the visible plane at the
        // start of video memory, which is where fbcon leaves it.
        self.file.read_exact_at(dst, 0).map_err(|e| {
            Error::CaptureUnavailable(format!("framebuffer read: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glimpse_core::ErrorKind;

    #[test]
    fn test_missing_device_is_capture_unavailable() {
        let err = FbdevSource::open_path("/dev/glimpse-no-such-fb").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CaptureUnavailable);
    }

    #[test]
    fn test_struct_sizes_match_kernel_abi() {
        assert_eq!(std::mem::size_of::<FbVarScreeninfo>(), 160);
        assert_eq!(std::mem::size_of::<FbBitfield>(), 12);
    }
}
