//! Shared-memory segments and frame layout for the glimpse transport.
//!
//! Three layers, leaves first:
//!
//! - [`segment`]: creates, names, and destroys POSIX shared-memory objects.
//!   Each [`Segment`] carries an exchangeable key string that an unrelated
//!   process can use to attach to memory it did not allocate.
//! - [`map`]: maps a segment (by handle or by exchanged key) into the
//!   calling process's address space. A [`Mapping`] is detached exactly once;
//!   ownership makes double-detach unrepresentable.
//! - [`layout`]: the `repr(C)` frame header at the start of every frame
//!   segment, including the seqlock word consumers use to detect torn reads.
//!
//! # Cross-process ownership
//!
//! A segment is logically owned by its creator. Each process performs its
//! own attach, and the design deliberately provides no distributed refcount:
//! a [`SegmentManager`] tracks only mappings held by the calling process.
//! Destroying a segment that is still mapped in *another* process is a
//! caller contract violation and is not detected.

pub mod layout;
pub mod map;
pub mod segment;

pub use layout::{
    FRAME_DATA_OFFSET, FRAME_MAGIC, FrameHeader, FrameSnapshot, LAYOUT_VERSION, publish_frame,
    read_snapshot, required_segment_len,
};
pub use map::Mapping;
pub use segment::{Segment, SegmentManager};
