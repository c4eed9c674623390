//! Single-producer/single-consumer ring queue over one region buffer.
//!
//! The producer only ever writes `head`, the consumer only ever writes
//! `tail`. That single-writer-per-index rule is the sole concurrency-safety
//! mechanism between the two processors; there is no lock to take.
//!
//! One byte is always left unused so `head == tail` unambiguously means
//! empty.

use std::sync::Arc;

use crate::error::{Result, ShmemError};
use crate::region::{IndexWord, SharedRegion};

/// Which ring of a channel pair, named from the AP view: the TX ring is
/// written by the AP and drained by the CP, RX is the mirror image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingDir {
    Tx,
    Rx,
}

/// View over one ring. Whether a holder is the producer or the consumer is
/// decided by which operations it calls; the ring itself is symmetric.
#[derive(Debug, Clone)]
pub struct RingQueue {
    region: Arc<SharedRegion>,
    channel: usize,
    dir: RingDir,
    head_word: IndexWord,
    tail_word: IndexWord,
    capacity: u32,
}

impl RingQueue {
    pub fn new(region: Arc<SharedRegion>, channel: usize, dir: RingDir) -> Self {
        let (head_word, tail_word) = match dir {
            RingDir::Tx => (IndexWord::TxHead, IndexWord::TxTail),
            RingDir::Rx => (IndexWord::RxHead, IndexWord::RxTail),
        };
        let capacity = region.buf_len(channel, dir);
        Self {
            region,
            channel,
            dir,
            head_word,
            tail_word,
            capacity,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Free bytes from the producer's point of view.
    pub fn space_available(&self) -> Result<u32> {
        let (head, tail) = self.load_indices()?;
        Ok((tail + self.capacity - head - 1) % self.capacity)
    }

    /// Published bytes from the consumer's point of view.
    pub fn data_available(&self) -> Result<u32> {
        let (head, tail) = self.load_indices()?;
        Ok((head + self.capacity - tail) % self.capacity)
    }

    /// Producer primitive: copy `src` at `head`, wrapping around capacity,
    /// then publish the advanced `head`. The caller must already have
    /// confirmed `space_available() >= src.len()`; an overrun is a protocol
    /// bug and is surfaced as a distinct fatal error.
    pub fn write(&self, src: &[u8]) -> Result<()> {
        let (head, tail) = self.load_indices()?;
        let len = src.len() as u32;
        let free = (tail + self.capacity - head - 1) % self.capacity;
        if len > free {
            return Err(ShmemError::WriteOverrun {
                requested: len,
                free,
            });
        }

        let first = len.min(self.capacity - head);
        self.region
            .write_buf(self.channel, self.dir, head, &src[..first as usize]);
        if first < len {
            self.region
                .write_buf(self.channel, self.dir, 0, &src[first as usize..]);
        }

        // bytes above happen-before this index publish
        self.region
            .store_index(self.channel, self.head_word, (head + len) % self.capacity);
        Ok(())
    }

    /// Consumer primitive: copy `dst.len()` bytes starting `offset` bytes
    /// past `tail`, without consuming them. Lets a frame be validated
    /// before the drain commits.
    pub fn peek(&self, offset: u32, dst: &mut [u8]) -> Result<()> {
        let (head, tail) = self.load_indices()?;
        let available = (head + self.capacity - tail) % self.capacity;
        let wanted = offset + dst.len() as u32;
        if wanted > available {
            return Err(ShmemError::ReadOverrun {
                requested: wanted,
                available,
            });
        }

        let start = (tail + offset) % self.capacity;
        let first = (dst.len() as u32).min(self.capacity - start);
        self.region
            .read_buf(self.channel, self.dir, start, &mut dst[..first as usize]);
        if (first as usize) < dst.len() {
            self.region
                .read_buf(self.channel, self.dir, 0, &mut dst[first as usize..]);
        }
        Ok(())
    }

    /// Consumer primitive: consume `len` bytes by publishing the advanced
    /// `tail`.
    pub fn advance_tail(&self, len: u32) -> Result<()> {
        let (head, tail) = self.load_indices()?;
        let available = (head + self.capacity - tail) % self.capacity;
        if len > available {
            return Err(ShmemError::ReadOverrun {
                requested: len,
                available,
            });
        }
        self.region
            .store_index(self.channel, self.tail_word, (tail + len) % self.capacity);
        Ok(())
    }

    /// Zero both indices. Only valid during link (re)establishment, when
    /// the peer is known not to be mid-transfer.
    pub fn reset(&self) {
        self.region.store_index(self.channel, self.head_word, 0);
        self.region.store_index(self.channel, self.tail_word, 0);
    }

    /// Raw tail index, for drain-abort assertions and diagnostics.
    pub fn tail(&self) -> u32 {
        self.region.load_index(self.channel, self.tail_word)
    }

    /// Raw head index.
    pub fn head(&self) -> u32 {
        self.region.load_index(self.channel, self.head_word)
    }

    fn load_indices(&self) -> Result<(u32, u32)> {
        let head = self.region.load_index(self.channel, self.head_word);
        let tail = self.region.load_index(self.channel, self.tail_word);
        if head >= self.capacity || tail >= self.capacity {
            return Err(ShmemError::RingCorrupt {
                head,
                tail,
                capacity: self.capacity,
            });
        }
        Ok((head, tail))
    }
}
