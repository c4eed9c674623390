//! Channel, link-device, and dispatch layers of the AP/CP shared-memory
//! link.
//!
//! This is the layer that turns the raw rings of `shmlink-shmem` and the
//! header codec of `shmlink-frame` into a working link: per-channel
//! framed send/receive, the link-up/crash command state machine, and the
//! worker that demultiplexes decoded frames to per-channel sinks.

pub mod channel;
pub mod command;
pub mod dispatch;
pub mod error;
pub mod link;

pub use channel::{Channel, ChannelKind, Side};
pub use command::{Command, DoorbellMasks, FMT_MASKS, INT_CMD, INT_VALID, RAW_MASKS};
pub use dispatch::{DecodedFrame, DispatchWorker, FrameSink, IoDevice, QueueSink, SinkTable};
pub use error::{LinkError, Result};
pub use link::{CrashHook, CrashKind, LinkConfig, LinkDevice, LinkState};
