/// Errors that can occur in shared-memory region operations.
#[derive(Debug, thiserror::Error)]
pub enum ShmemError {
    /// A ring index was observed outside the declared capacity.
    ///
    /// The single-writer-per-index discipline should make this impossible;
    /// seeing it means the peer scribbled the region and the link must come
    /// down.
    #[error("ring corrupt (head={head}, tail={tail}, capacity={capacity})")]
    RingCorrupt { head: u32, tail: u32, capacity: u32 },

    /// A producer wrote more than the free space it confirmed.
    #[error("ring write overrun ({requested} bytes requested, {free} free)")]
    WriteOverrun { requested: u32, free: u32 },

    /// A consumer read past the bytes the producer has published.
    #[error("ring read overrun ({requested} bytes requested, {available} available)")]
    ReadOverrun { requested: u32, available: u32 },

    /// The region magic/access pair does not show a completed peer
    /// initialization. Continuing would mean reading garbage.
    #[error("peer not ready (magic={magic:#010x}, access={access})")]
    PeerNotReady { magic: u32, access: u32 },
}

pub type Result<T> = std::result::Result<T, ShmemError>;
