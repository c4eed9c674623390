//! Shared-memory region layout.
//!
//! The layout is a hardware contract: both processors compute identical
//! offsets from the same constants. Field order is fixed:
//!
//! ```text
//! ┌─────────────┬──────────────┬────────────────────────┬──────────┬──────────────┐
//! │ magic (4B)  │ access (4B)  │ index quads (16B × N)  │ reserved │ buffers ...  │
//! │             │              │ tx_head tx_tail        │ (32B)    │ ch0 TX, ch0  │
//! │             │              │ rx_head rx_tail        │          │ RX, ch1 TX.. │
//! └─────────────┴──────────────┴────────────────────────┴──────────┴──────────────┘
//! ```
//!
//! Index and buffer names follow the AP view: the TX buffer is written by
//! the AP and drained by the CP, RX is the mirror image.

/// Sentinel tagging a live, mutually initialized region.
pub const REGION_MAGIC: u32 = 0x4C4D_4853; // "SHML"

/// Sentinel tagging a region captured by a save request, so a reboot can
/// tell a persisted save area from a clean boot.
pub const NV_SAVE_MAGIC: u32 = 0x5653_564E; // "NVSV"

/// `access` word value once the owning side has finished initialization.
pub const ACCESS_ENABLED: u32 = 1;

/// Offset of the `magic` word.
pub const MAGIC_OFFSET: usize = 0;
/// Offset of the `access` word.
pub const ACCESS_OFFSET: usize = 4;
/// Offset of the first channel's index quadruple.
pub const INDEX_BASE_OFFSET: usize = 8;
/// Bytes per channel index quadruple {tx_head, tx_tail, rx_head, rx_tail}.
pub const INDEX_QUAD_SIZE: usize = 16;
/// Reserved block between the index quadruples and the first buffer.
pub const RESERVED_SIZE: usize = 32;

/// Default control (FMT) buffer size per direction.
pub const DEFAULT_FMT_BUF_SIZE: u32 = 4 * 1024;
/// Default bulk (RAW) buffer size per direction.
pub const DEFAULT_RAW_BUF_SIZE: u32 = 16 * 1024;

/// Requested buffer sizes for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSpec {
    pub tx_len: u32,
    pub rx_len: u32,
}

impl ChannelSpec {
    /// Same capacity in both directions.
    pub fn symmetric(len: u32) -> Self {
        Self {
            tx_len: len,
            rx_len: len,
        }
    }
}

/// Resolved byte offsets for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSpan {
    pub tx_head: usize,
    pub tx_tail: usize,
    pub rx_head: usize,
    pub rx_tail: usize,
    pub tx_buf: usize,
    pub tx_len: u32,
    pub rx_buf: usize,
    pub rx_len: u32,
}

/// Computed offsets for a whole region.
#[derive(Debug, Clone)]
pub struct RegionLayout {
    channels: Vec<ChannelSpan>,
    total_len: usize,
}

impl RegionLayout {
    /// Lay out a region for the given channels. Buffer sizes are rounded up
    /// to the 4-byte frame alignment so ring indices never split a word
    /// across the wrap boundary.
    pub fn new(specs: &[ChannelSpec]) -> Self {
        let mut channels = Vec::with_capacity(specs.len());
        let mut buf_cursor = INDEX_BASE_OFFSET + specs.len() * INDEX_QUAD_SIZE + RESERVED_SIZE;

        for (index, spec) in specs.iter().enumerate() {
            let quad = INDEX_BASE_OFFSET + index * INDEX_QUAD_SIZE;
            let tx_len = align4(spec.tx_len);
            let rx_len = align4(spec.rx_len);

            let tx_buf = buf_cursor;
            buf_cursor += tx_len as usize;
            let rx_buf = buf_cursor;
            buf_cursor += rx_len as usize;

            channels.push(ChannelSpan {
                tx_head: quad,
                tx_tail: quad + 4,
                rx_head: quad + 8,
                rx_tail: quad + 12,
                tx_buf,
                tx_len,
                rx_buf,
                rx_len,
            });
        }

        Self {
            channels,
            total_len: buf_cursor,
        }
    }

    /// The standard two-channel layout: FMT control + RAW bulk data.
    pub fn two_channel_default() -> Self {
        Self::new(&[
            ChannelSpec::symmetric(DEFAULT_FMT_BUF_SIZE),
            ChannelSpec::symmetric(DEFAULT_RAW_BUF_SIZE),
        ])
    }

    /// Per-channel spans, in declaration order.
    pub fn channels(&self) -> &[ChannelSpan] {
        &self.channels
    }

    /// Span of one channel.
    pub fn channel(&self, index: usize) -> &ChannelSpan {
        &self.channels[index]
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Total region size in bytes, control words included.
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    /// Offset of the first byte buffer (everything before it is control
    /// words and reserved padding).
    pub fn data_base(&self) -> usize {
        self.channels
            .first()
            .map(|span| span.tx_buf)
            .unwrap_or(self.total_len)
    }
}

fn align4(len: u32) -> u32 {
    (len + 3) & !3
}
