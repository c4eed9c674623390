//! Link-layer frame header codec.
//!
//! Every message crossing the shared-memory rings is framed with a fixed
//! 12-byte little-endian header:
//! - A 2-byte start magic for frame synchronization
//! - A 2-byte per-channel frame sequence number
//! - A 2-byte fragmentation config (single/multi flags + fragment index)
//! - A 2-byte total length (header + payload, padding excluded)
//! - A 1-byte channel id and 1-byte channel sequence number
//! - 2 reserved bytes
//!
//! Frames are padded so the next header starts on a 4-byte boundary.

pub mod codec;
pub mod error;

pub use codec::{
    encode_frame, padding_for, FrameHeader, FRAG_INDEX_MASK, FRAG_MULTI_LAST, FRAG_MULTI_START,
    FRAG_SINGLE, FRAME_ALIGN, HEADER_SIZE, START_MAGIC,
};
pub use error::{FrameError, Result};
