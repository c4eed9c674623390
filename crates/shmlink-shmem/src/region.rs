//! Shared-region accessor.
//!
//! Both processors mutate this region with no OS-level mutual exclusion;
//! correctness rests on each field having exactly one writer. The accessor
//! keeps all offset arithmetic in one place and pairs every index publish
//! with the barrier the protocol requires: buffer bytes are written before
//! the index is stored with release ordering, and the peer loads the index
//! with acquire ordering before reading the bytes it covers.
//!
//! On real hardware the backing store is a fixed physical window and the
//! release/acquire pairs below must be accompanied by the platform's cache
//! maintenance operations.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::{Result, ShmemError};
use crate::layout::{RegionLayout, ACCESS_ENABLED, NV_SAVE_MAGIC, REGION_MAGIC};
use crate::ring::RingDir;

/// One word of a channel's index quadruple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexWord {
    TxHead,
    TxTail,
    RxHead,
    RxTail,
}

/// The memory window shared between AP and CP.
pub struct SharedRegion {
    layout: RegionLayout,
    magic: AtomicU32,
    access: AtomicU32,
    /// Four words per channel, in quadruple order.
    indices: Box<[AtomicU32]>,
    /// All channel buffers, packed back to back per the layout.
    data: Box<[AtomicU8]>,
}

impl SharedRegion {
    /// Allocate a zeroed region for `layout`. `access` starts cleared, so
    /// [`SharedRegion::verify_ready`] fails until a side brings it up.
    pub fn new(layout: RegionLayout) -> Arc<Self> {
        let index_words = layout.num_channels() * 4;
        let data_len = layout.total_len() - layout.data_base();
        Arc::new(Self {
            magic: AtomicU32::new(0),
            access: AtomicU32::new(0),
            indices: (0..index_words).map(|_| AtomicU32::new(0)).collect(),
            data: (0..data_len).map(|_| AtomicU8::new(0)).collect(),
            layout,
        })
    }

    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }

    pub fn magic(&self) -> u32 {
        self.magic.load(Ordering::Acquire)
    }

    pub fn access(&self) -> u32 {
        self.access.load(Ordering::Acquire)
    }

    /// Local-side bring-up. Ordering matters and is part of the protocol:
    /// clear `access`, zero indices and buffers, write the live magic, set
    /// `access` last.
    pub fn bring_up(&self) {
        self.access.store(0, Ordering::Release);
        self.zero_all_indices();
        for byte in self.data.iter() {
            byte.store(0, Ordering::Relaxed);
        }
        self.magic.store(REGION_MAGIC, Ordering::Release);
        self.access.store(ACCESS_ENABLED, Ordering::Release);
        tracing::debug!(
            total_len = self.layout.total_len(),
            channels = self.layout.num_channels(),
            "shared region brought up"
        );
    }

    /// Re-tag the region as a persisted save area: all ring indices are
    /// zeroed and the save magic replaces the live one.
    pub fn retag_for_save(&self) {
        self.zero_all_indices();
        self.magic.store(NV_SAVE_MAGIC, Ordering::Release);
    }

    /// Check that the region is live from both sides' point of view.
    pub fn verify_ready(&self) -> Result<()> {
        let magic = self.magic();
        let access = self.access();
        if magic != REGION_MAGIC || access != ACCESS_ENABLED {
            return Err(ShmemError::PeerNotReady { magic, access });
        }
        Ok(())
    }

    pub fn load_index(&self, channel: usize, word: IndexWord) -> u32 {
        self.index_cell(channel, word).load(Ordering::Acquire)
    }

    pub fn store_index(&self, channel: usize, word: IndexWord, value: u32) {
        self.index_cell(channel, word).store(value, Ordering::Release);
    }

    /// Zero one channel's index quadruple.
    pub fn reset_indices(&self, channel: usize) {
        for word in [
            IndexWord::TxHead,
            IndexWord::TxTail,
            IndexWord::RxHead,
            IndexWord::RxTail,
        ] {
            self.store_index(channel, word, 0);
        }
    }

    /// Zero every channel's index quadruple.
    pub fn zero_all_indices(&self) {
        for channel in 0..self.layout.num_channels() {
            self.reset_indices(channel);
        }
    }

    /// Capacity of one channel buffer.
    pub fn buf_len(&self, channel: usize, dir: RingDir) -> u32 {
        let span = self.layout.channel(channel);
        match dir {
            RingDir::Tx => span.tx_len,
            RingDir::Rx => span.rx_len,
        }
    }

    /// Contiguous read from a channel buffer. `pos + dst.len()` must stay
    /// within the buffer; ring wraparound is the caller's job.
    pub(crate) fn read_buf(&self, channel: usize, dir: RingDir, pos: u32, dst: &mut [u8]) {
        let base = self.buf_base(channel, dir) + pos as usize;
        for (i, slot) in dst.iter_mut().enumerate() {
            *slot = self.data[base + i].load(Ordering::Relaxed);
        }
    }

    /// Contiguous write into a channel buffer. Same bounds contract as
    /// [`SharedRegion::read_buf`].
    pub(crate) fn write_buf(&self, channel: usize, dir: RingDir, pos: u32, src: &[u8]) {
        let base = self.buf_base(channel, dir) + pos as usize;
        for (i, byte) in src.iter().enumerate() {
            self.data[base + i].store(*byte, Ordering::Relaxed);
        }
    }

    fn buf_base(&self, channel: usize, dir: RingDir) -> usize {
        let span = self.layout.channel(channel);
        let offset = match dir {
            RingDir::Tx => span.tx_buf,
            RingDir::Rx => span.rx_buf,
        };
        offset - self.layout.data_base()
    }

    fn index_cell(&self, channel: usize, word: IndexWord) -> &AtomicU32 {
        let slot = match word {
            IndexWord::TxHead => 0,
            IndexWord::TxTail => 1,
            IndexWord::RxHead => 2,
            IndexWord::RxTail => 3,
        };
        &self.indices[channel * 4 + slot]
    }
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("magic", &format_args!("{:#010x}", self.magic()))
            .field("access", &self.access())
            .field("total_len", &self.layout.total_len())
            .finish()
    }
}
