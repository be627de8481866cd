//! Cross-process attachment: a forked child locates the segment by key and
//! must observe exactly the bytes the parent published, using the header
//! seqlock to rule out torn reads.

use glimpse_core::{FrameGeometry, PixelFormat};
use glimpse_shm::layout::{init_segment, publish_frame, read_snapshot, required_segment_len};
use glimpse_shm::{Mapping, SegmentManager};

fn expected_byte(i: usize, salt: u8) -> u8 {
    (i as u8).wrapping_mul(31).wrapping_add(salt)
}

#[test]
fn test_forked_child_observes_identical_pixels() {
    let geometry = FrameGeometry {
        width: 64,
        height: 32,
        bytes_per_row: 256,
        format: PixelFormat::BGRA8888,
    };
    let salt = 0x5C;

    let mgr = SegmentManager::new();
    let seg = mgr.create(required_segment_len(&geometry)).unwrap();
    let mapping = seg.attach().unwrap();
    init_segment(&mapping).unwrap();
    publish_frame(&mapping, &geometry, 7_000, |dst| {
        for (i, b) in dst.iter_mut().enumerate() {
            *b = expected_byte(i, salt);
        }
        Ok(())
    })
    .unwrap();

    let key = seg.key().to_string();

    // SAFETY: the child only attaches, reads, and exits; the parent waits.
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");

    if pid == 0 {
        // Child process: attach by the exchanged key and validate.
        let status = match child_check(&key, &geometry, salt) {
            Ok(()) => 0,
            Err(code) => code,
        };
        // SAFETY: terminate without running the parent's atexit handlers.
        unsafe { libc::_exit(status) };
    }

    let mut status = 0;
    // SAFETY: pid is our direct child.
    let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
    assert_eq!(rc, pid);
    assert!(libc::WIFEXITED(status), "child did not exit cleanly");
    assert_eq!(libc::WEXITSTATUS(status), 0, "child observed wrong bytes");

    mapping.detach().unwrap();
    mgr.destroy(&seg).unwrap();
}

fn child_check(key: &str, geometry: &FrameGeometry, salt: u8) -> Result<(), i32> {
    let mapping = Mapping::attach_key(key).map_err(|_| 10)?;
    let snap = read_snapshot(&mapping).map_err(|_| 11)?;
    if snap.descriptor.geometry != *geometry {
        return Err(12);
    }
    if snap.descriptor.seq != 2 || snap.descriptor.timestamp_ns != 7_000 {
        return Err(13);
    }
    for (i, b) in snap.pixels.iter().enumerate() {
        if *b != expected_byte(i, salt) {
            return Err(14);
        }
    }
    Ok(())
}
