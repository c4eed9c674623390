/// Errors that can occur during frame header encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The header start magic does not match the sentinel. The consumer has
    /// lost frame sync.
    #[error("invalid frame magic {found:#06x} (expected 0xaa55)")]
    BadMagic { found: u16 },

    /// The header claims a total length shorter than the header itself.
    #[error("invalid frame length {total_len} (header is 12 bytes)")]
    BadLength { total_len: u16 },

    /// The payload does not fit the 16-bit total length field (or the ring
    /// it is destined for).
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
