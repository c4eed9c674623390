//! Shared-memory transport primitives for the AP/CP link.
//!
//! This is the lowest layer of shmlink. It owns the one piece of state both
//! processors touch: a fixed-layout memory region holding per-channel ring
//! buffers and their head/tail index words, plus the mailbox/doorbell
//! interface used to signal the peer out of band.
//!
//! Nothing here knows about frames or channels; higher layers build those
//! on top of [`RingQueue`] and [`Mailbox`].

pub mod error;
pub mod layout;
pub mod mailbox;
pub mod region;
pub mod ring;

pub use error::{Result, ShmemError};
pub use layout::{
    ChannelSpan, ChannelSpec, RegionLayout, ACCESS_ENABLED, DEFAULT_FMT_BUF_SIZE,
    DEFAULT_RAW_BUF_SIZE, NV_SAVE_MAGIC, REGION_MAGIC,
};
pub use mailbox::{loopback_pair, DoorbellHandler, LoopbackMailbox, Mailbox};
pub use region::{IndexWord, SharedRegion};
pub use ring::{RingDir, RingQueue};
