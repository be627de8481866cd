//! Frame delivery: the sink trait and the bounded subscription feed.

use glimpse_core::FrameDescriptor;
use tokio::sync::mpsc;
use tracing::trace;

/// A borrowed view of one delivered frame.
///
/// Valid only for the duration of [`FrameSink::deliver`]; the streaming
/// controller may reuse or destroy the backing segment immediately after
/// delivery returns. A sink that needs the frame longer must copy the
/// pixels or attach to the segment separately via `key`.
pub struct FrameView<'a> {
    /// Descriptor of the delivered frame.
    pub descriptor: &'a FrameDescriptor,
    /// Pixel bytes, borrowed from the producer's mapping.
    pub pixels: &'a [u8],
    /// Key of the backing segment, for cross-process attachment.
    pub key: &'a str,
}

/// Receives frames from a streaming session.
///
/// `deliver` runs on the session's worker thread, serialized with capture:
/// the next capture does not begin until delivery returns. A sink that
/// blocks indefinitely stalls the entire stream.
pub trait FrameSink: Send {
    fn deliver(&mut self, frame: &FrameView<'_>);
}

impl<F> FrameSink for F
where
    F: FnMut(&FrameView<'_>) + Send,
{
    fn deliver(&mut self, frame: &FrameView<'_>) {
        self(frame)
    }
}

/// A frame published to a subscription feed.
///
/// Carries the descriptor by value plus the segment key; a consumer in
/// another process attaches via the key and reads under the segment's
/// seqlock.
#[derive(Debug, Clone)]
pub struct StreamFrame {
    pub descriptor: FrameDescriptor,
    pub key: String,
}

/// Consumer end of a subscription feed.
pub type FrameReceiver = mpsc::Receiver<StreamFrame>;

/// Sink side of a bounded subscription feed.
///
/// Frames are pushed with `try_send`: when the consumer lags and the
/// channel is full, the frame is dropped, preserving the skip-not-queue
/// backpressure policy end to end.
pub struct FeedSink {
    tx: mpsc::Sender<StreamFrame>,
    dropped: u64,
}

impl FeedSink {
    /// Frames dropped because the consumer was behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameSink for FeedSink {
    fn deliver(&mut self, frame: &FrameView<'_>) {
        let item = StreamFrame {
            descriptor: frame.descriptor.clone(),
            key: frame.key.to_string(),
        };
        match self.tx.try_send(item) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped += 1;
                trace!(dropped = self.dropped, "feed full; dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("feed receiver gone; dropping frame");
            }
        }
    }
}

/// Create a bounded subscription feed of at least one frame of capacity.
pub fn frame_feed(capacity: usize) -> (FeedSink, FrameReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FeedSink { tx, dropped: 0 }, rx)
}
