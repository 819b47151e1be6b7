//! Shared-memory transport.
//!
//! An 8-byte segment mapped by both processes, synchronised by two polled
//! flags and no kernel locking primitive.

pub mod channel;
pub mod event;
pub mod segment;

pub use channel::{ShmChannel, ShmConfig, ShmTransport, serve};
pub use event::{EventLock, EventState, WaitStrategy, WaitTimeout};
pub use segment::{SEGMENT_SIZE, Segment, SegmentHandle, Side, default_segment_dir};
