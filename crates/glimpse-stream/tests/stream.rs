//! End-to-end streaming behavior: rate limiting, lifecycle idempotence,
//! failure policy, and the subscription feed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use glimpse_capture::{CaptureSource, PatternSource};
use glimpse_core::{Error, ErrorKind, FrameGeometry};
use glimpse_shm::layout::read_snapshot;
use glimpse_shm::Mapping;
use glimpse_stream::{FrameView, Streamer, frame_feed};
use parking_lot::Mutex;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_30fps_for_one_second_delivers_about_30_frames() {
    init_tracing();
    let timestamps: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let in_delivery = Arc::new(AtomicBool::new(false));

    let sink = {
        let timestamps = timestamps.clone();
        let in_delivery = in_delivery.clone();
        move |frame: &FrameView<'_>| {
            // Delivery is serialized per session; overlapping invocations
            // would mean capture N+1 started before delivery of N returned.
            assert!(!in_delivery.swap(true, Ordering::SeqCst));
            timestamps.lock().push(frame.descriptor.timestamp_ns);
            in_delivery.store(false, Ordering::SeqCst);
        }
    };

    let streamer = Streamer::new();
    let handle = streamer.start(PatternSource::new(32, 32), sink, 30).unwrap();
    std::thread::sleep(Duration::from_secs(1));
    handle.stop().unwrap();

    let timestamps = timestamps.lock();
    let count = timestamps.len();
    assert!(
        (10..=40).contains(&count),
        "expected ~30 frames, got {count}"
    );
    assert_eq!(handle.frames_delivered(), count as u64);
    assert!(
        timestamps.windows(2).all(|w| w[0] <= w[1]),
        "timestamps must be non-decreasing"
    );
}

#[test]
fn test_stop_is_idempotent() {
    init_tracing();
    let streamer = Streamer::new();
    let handle = streamer
        .start(PatternSource::new(8, 8), |_: &FrameView<'_>| {}, 30)
        .unwrap();
    std::thread::sleep(Duration::from_millis(100));

    handle.stop().unwrap();
    handle.stop().unwrap();
    streamer.stop().unwrap();
    assert!(!streamer.is_running());
}

#[test]
fn test_double_start_rejected_and_session_continues() {
    init_tracing();
    let streamer = Streamer::new();
    let handle = streamer
        .start(PatternSource::new(8, 8), |_: &FrameView<'_>| {}, 30)
        .unwrap();
    std::thread::sleep(Duration::from_millis(150));

    let err = streamer
        .start(PatternSource::new(8, 8), |_: &FrameView<'_>| {}, 30)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    // The original session keeps delivering after the rejected start.
    let before = handle.frames_delivered();
    std::thread::sleep(Duration::from_millis(300));
    let after = handle.frames_delivered();
    assert!(after > before, "stream stalled: {before} -> {after}");

    handle.stop().unwrap();
}

struct BrokenSource;

impl CaptureSource for BrokenSource {
    fn geometry(&mut self) -> Result<FrameGeometry, Error> {
        Err(Error::CaptureUnavailable("no attached display".into()))
    }

    fn capture(&mut self, _: &FrameGeometry, _: &mut [u8]) -> Result<(), Error> {
        unreachable!("geometry always fails")
    }
}

#[test]
fn test_persistent_capture_failure_force_stops_and_surfaces_once() {
    init_tracing();
    let streamer = Streamer::new();
    let handle = streamer
        .start(BrokenSource, |_: &FrameView<'_>| panic!("must not deliver"), 60)
        .unwrap();

    // Three consecutive failures at ~60fps resolve well within a second.
    let mut waited = Duration::ZERO;
    while handle.is_running() && waited < Duration::from_secs(2) {
        std::thread::sleep(Duration::from_millis(25));
        waited += Duration::from_millis(25);
    }
    assert!(!handle.is_running(), "session should force-stop");
    assert_eq!(handle.frames_delivered(), 0);

    // Surfaced exactly once.
    let err = handle.stop().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CaptureUnavailable);
    handle.stop().unwrap();
}

#[test]
fn test_frame_feed_supports_keyed_attachment() {
    init_tracing();
    let (sink, mut rx) = frame_feed(4);
    let streamer = Streamer::new();
    let handle = streamer.start(PatternSource::new(24, 12), sink, 30).unwrap();

    let frame = rx.blocking_recv().expect("feed closed before first frame");
    assert_eq!(frame.descriptor.geometry.width, 24);

    // A consumer attaches with nothing but the exchanged key and reads a
    // consistent frame under the seqlock.
    let mapping = Mapping::attach_key(&frame.key).unwrap();
    let snap = read_snapshot(&mapping).unwrap();
    assert_eq!(snap.descriptor.geometry, frame.descriptor.geometry);
    assert_eq!(snap.pixels.len(), frame.descriptor.data_len);

    handle.stop().unwrap();
}

#[test]
fn test_geometry_change_rotates_segment() {
    init_tracing();
    let source = PatternSource::new(16, 16);
    let resizer = source.resizer();

    let (sink, mut rx) = frame_feed(16);
    let streamer = Streamer::new();
    let handle = streamer.start(source, sink, 30).unwrap();

    let first = rx.blocking_recv().expect("no first frame");
    assert_eq!(first.descriptor.geometry.width, 16);

    resizer.resize(32, 8);

    // Drain until the rotated segment shows up.
    let mut rotated = None;
    for _ in 0..64 {
        match rx.blocking_recv() {
            Some(frame) if frame.descriptor.geometry.width == 32 => {
                rotated = Some(frame);
                break;
            }
            Some(_) => continue,
            None => break,
        }
    }
    let rotated = rotated.expect("stream never rotated to the new geometry");
    assert_eq!(rotated.descriptor.geometry.height, 8);
    assert_ne!(rotated.key, first.key, "new geometry requires a new segment");

    handle.stop().unwrap();
}
