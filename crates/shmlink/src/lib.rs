//! Shared-memory IPC link between an application processor and a cellular
//! co-processor.
//!
//! shmlink implements the AP side of a shared-memory modem link: framed
//! per-channel ring buffers over a fixed-layout region, mailbox/doorbell
//! signaling, and the link-up/crash command state machine.
//!
//! # Crate Structure
//!
//! - [`shmem`] — Region layout/accessor, ring queues, mailbox interface
//! - [`frame`] — Link-layer frame header codec
//! - [`link`] — Channels, link device state machine, frame dispatch

/// Re-export shared-memory types.
pub mod shmem {
    pub use shmlink_shmem::*;
}

/// Re-export frame codec types.
pub mod frame {
    pub use shmlink_frame::*;
}

/// Re-export link-layer types.
pub mod link {
    pub use shmlink_link::*;
}
