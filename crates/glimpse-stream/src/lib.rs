//! Bounded-rate streaming of captured frames over shared memory.
//!
//! A [`Streamer`] drives a repeating capture loop on a dedicated worker
//! thread: once per period it captures a frame (reusing the previous
//! segment while geometry is unchanged, rotating to a new one when it
//! changes) and delivers it synchronously to a [`FrameSink`]. Delivery is
//! rate-limited, not rate-guaranteed: when a capture overruns its period,
//! the missed periods are skipped, never queued.
//!
//! `start` returns a [`StreamHandle`] — a cancellable subscription exposing
//! `stop`, `is_running` and delivery counters. For consumers that want a
//! channel instead of a callback, [`frame_feed`] yields a bounded sink/
//! receiver pair carrying [`StreamFrame`] descriptors (plus the segment key
//! for cross-process attachment), dropping frames when the consumer lags.

mod controller;
mod sink;

pub use controller::{MAX_TARGET_FPS, StreamHandle, Streamer};
pub use sink::{FeedSink, FrameReceiver, FrameSink, FrameView, StreamFrame, frame_feed};
