//! Streaming controller: `Idle -> Running -> Stopping -> Idle`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use glimpse_capture::{CaptureSource, Screenshot, capture_once_at};
use glimpse_core::{Error, now_unix_ns};
use glimpse_shm::SegmentManager;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::sink::{FrameSink, FrameView};

/// Ceiling for `target_fps`; higher requests are clamped, not rejected.
pub const MAX_TARGET_FPS: u32 = 60;

/// Consecutive capture failures tolerated before the session force-stops.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopping,
}

struct Shared {
    phase: Mutex<Phase>,
    phase_cv: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
    frames: AtomicU64,
    /// Terminal error from a force-stopped loop; surfaced exactly once.
    error: Mutex<Option<Error>>,
}

/// Drives a repeating capture loop for one producer.
///
/// At most one session may be running per `Streamer`; `start` while running
/// fails with `InvalidState` and leaves the existing session undisturbed.
pub struct Streamer {
    shared: Arc<Shared>,
}

impl Default for Streamer {
    fn default() -> Self {
        Self::new()
    }
}

impl Streamer {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                phase: Mutex::new(Phase::Idle),
                phase_cv: Condvar::new(),
                worker: Mutex::new(None),
                frames: AtomicU64::new(0),
                error: Mutex::new(None),
            }),
        }
    }

    /// Start a streaming session.
    ///
    /// Spawns a dedicated worker thread that captures at most `target_fps`
    /// frames per second (clamped to [`MAX_TARGET_FPS`]) and delivers each
    /// frame synchronously to `sink`. Returns a cancellable handle.
    pub fn start<S, K>(&self, source: S, sink: K, target_fps: u32) -> Result<StreamHandle, Error>
    where
        S: CaptureSource + 'static,
        K: FrameSink + 'static,
    {
        if target_fps == 0 {
            return Err(Error::InvalidArgument("target_fps must be > 0"));
        }
        let fps = target_fps.min(MAX_TARGET_FPS);
        if fps != target_fps {
            debug!(requested = target_fps, clamped = fps, "clamping target fps");
        }

        {
            let mut phase = self.shared.phase.lock();
            if *phase != Phase::Idle {
                return Err(Error::InvalidState("a stream session is already active"));
            }
            *phase = Phase::Running;
        }

        // Reap the worker of a previous (finished) session, if any.
        if let Some(old) = self.shared.worker.lock().take() {
            let _ = old.join();
        }
        *self.shared.error.lock() = None;
        self.shared.frames.store(0, Ordering::Relaxed);

        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("glimpse-stream".into())
            .spawn(move || run_loop(shared, source, sink, fps));
        match spawned {
            Ok(handle) => {
                *self.shared.worker.lock() = Some(handle);
                info!(fps, "stream session started");
                Ok(StreamHandle {
                    shared: self.shared.clone(),
                })
            }
            Err(e) => {
                *self.shared.phase.lock() = Phase::Idle;
                Err(Error::ResourceExhausted {
                    what: format!("spawning stream worker: {e}"),
                    required: None,
                })
            }
        }
    }

    /// Stop the active session; see [`StreamHandle::stop`].
    pub fn stop(&self) -> Result<(), Error> {
        stop_session(&self.shared)
    }

    /// Whether a session is currently running.
    pub fn is_running(&self) -> bool {
        *self.shared.phase.lock() == Phase::Running
    }

    /// Frames delivered by the current (or last) session.
    pub fn frames_delivered(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }
}

/// Cancellable subscription to a streaming session.
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl StreamHandle {
    /// Stop the session.
    ///
    /// Signals the worker, waits for any in-flight frame delivery to
    /// complete (bounding stop latency to roughly one capture duration),
    /// and returns the session to `Idle`. Calling `stop` when already idle
    /// is a no-op — except that a terminal error which force-stopped the
    /// loop is surfaced here, exactly once.
    pub fn stop(&self) -> Result<(), Error> {
        stop_session(&self.shared)
    }

    /// Whether the session is still running.
    pub fn is_running(&self) -> bool {
        *self.shared.phase.lock() == Phase::Running
    }

    /// Frames delivered so far.
    pub fn frames_delivered(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    /// Take the terminal error of a force-stopped session, if any.
    pub fn take_error(&self) -> Option<Error> {
        self.shared.error.lock().take()
    }
}

fn stop_session(shared: &Shared) -> Result<(), Error> {
    {
        let mut phase = shared.phase.lock();
        if *phase == Phase::Running {
            *phase = Phase::Stopping;
            shared.phase_cv.notify_all();
        }
    }
    // Wait for the worker to finish its in-flight delivery and exit. A
    // concurrent stop finds no handle and returns immediately.
    let worker = shared.worker.lock().take();
    if let Some(handle) = worker {
        let _ = handle.join();
        info!("stream session stopped");
    }
    match shared.error.lock().take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// The capture loop. Runs on the dedicated worker thread; exits on stop
/// request or after too many consecutive capture failures.
fn run_loop<S, K>(shared: Arc<Shared>, mut source: S, mut sink: K, fps: u32)
where
    S: CaptureSource,
    K: FrameSink,
{
    let manager = SegmentManager::new();
    let period = Duration::from_nanos(1_000_000_000 / fps as u64);
    let mut deadline = Instant::now();
    let mut shot: Option<Screenshot> = None;
    let mut failures = 0u32;
    let mut last_ts = 0u64;

    loop {
        if wait_for_deadline_or_stop(&shared, deadline) {
            break;
        }

        // Per-session timestamps never decrease, even across clock steps.
        let ts = now_unix_ns().max(last_ts);
        match tick(&manager, &mut source, &mut shot, ts) {
            Ok(()) => {
                failures = 0;
                last_ts = ts;
                let current = shot.as_ref().expect("tick leaves a screenshot on success");
                sink.deliver(&FrameView {
                    descriptor: current.descriptor(),
                    pixels: current.pixels(),
                    key: current.key(),
                });
                shared.frames.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                failures += 1;
                warn!(error = %e, failures, "capture failed");
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    *shared.error.lock() = Some(e);
                    break;
                }
            }
        }

        // Next deadline; skip periods we already missed instead of queuing.
        deadline += period;
        let now = Instant::now();
        if deadline < now {
            let mut skipped = 0u32;
            while deadline <= now {
                deadline += period;
                skipped += 1;
            }
            debug!(skipped, "capture overran its period");
        }
    }

    let mut phase = shared.phase.lock();
    *phase = Phase::Idle;
    shared.phase_cv.notify_all();
}

/// Sleep until `deadline`, waking early on a stop request. Returns true if
/// the session should stop.
fn wait_for_deadline_or_stop(shared: &Shared, deadline: Instant) -> bool {
    let mut phase = shared.phase.lock();
    loop {
        if *phase == Phase::Stopping {
            return true;
        }
        if shared.phase_cv.wait_until(&mut phase, deadline).timed_out() {
            return *phase == Phase::Stopping;
        }
    }
}

/// Capture one frame, reusing the current segment while geometry is
/// unchanged and rotating to a freshly sized one when it changes.
fn tick<S: CaptureSource>(
    manager: &SegmentManager,
    source: &mut S,
    shot: &mut Option<Screenshot>,
    timestamp_ns: u64,
) -> Result<(), Error> {
    let geometry = source.geometry()?;
    let reuse = shot
        .as_ref()
        .is_some_and(|s| s.descriptor().geometry == geometry);

    if reuse {
        shot.as_mut()
            .expect("reuse implies a current screenshot")
            .recapture_at(source, timestamp_ns)?;
    } else {
        if let Some(old) = shot.take() {
            debug!(
                old_key = %old.key(),
                width = geometry.width,
                height = geometry.height,
                "geometry changed; rotating segment"
            );
            // Previous delivery has returned; the old segment may go away.
            let _ = old.release(manager);
        }
        *shot = Some(capture_once_at(manager, source, timestamp_ns)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glimpse_capture::PatternSource;
    use glimpse_core::ErrorKind;

    #[test]
    fn test_zero_fps_is_invalid() {
        let streamer = Streamer::new();
        let err = streamer
            .start(PatternSource::new(4, 4), |_: &FrameView<'_>| {}, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(!streamer.is_running());
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let streamer = Streamer::new();
        streamer.stop().unwrap();
        streamer.stop().unwrap();
    }

    #[test]
    fn test_excessive_fps_is_clamped_not_rejected() {
        let streamer = Streamer::new();
        let handle = streamer
            .start(PatternSource::new(4, 4), |_: &FrameView<'_>| {}, 100_000)
            .unwrap();
        assert!(handle.is_running());
        handle.stop().unwrap();
        assert!(!handle.is_running());
    }
}
