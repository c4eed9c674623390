//! Per-channel framed send/receive over one TX/RX ring pair.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use shmlink_frame::{encode_frame, padding_for, FrameError, FrameHeader, HEADER_SIZE};
use shmlink_shmem::{Mailbox, RingDir, RingQueue, SharedRegion};

use crate::command::{DoorbellMasks, FMT_MASKS, INT_VALID, RAW_MASKS};
use crate::dispatch::{DecodedFrame, FrameSink};
use crate::error::Result;

/// Logical pipe class carried by the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Control/formatted messages.
    Fmt,
    /// Bulk data.
    Raw,
}

impl ChannelKind {
    /// Channel id carried in frame headers.
    pub fn wire_id(self) -> u8 {
        match self {
            ChannelKind::Fmt => 1,
            ChannelKind::Raw => 2,
        }
    }

    /// Position of this channel in the region layout.
    pub fn index(self) -> usize {
        match self {
            ChannelKind::Fmt => 0,
            ChannelKind::Raw => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChannelKind::Fmt => "FMT",
            ChannelKind::Raw => "RAW",
        }
    }

    /// Doorbell bits owned by this channel.
    pub fn masks(self) -> DoorbellMasks {
        match self {
            ChannelKind::Fmt => FMT_MASKS,
            ChannelKind::Raw => RAW_MASKS,
        }
    }
}

/// Which processor this link instance runs on. Decides which ring of a
/// channel pair is the local TX: layout names follow the AP view, so the
/// CP's TX is the layout's RX ring and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Ap,
    Cp,
}

#[derive(Default)]
struct TxState {
    frame_seq: u16,
    channel_seq: u8,
}

/// One logical pipe: a TX ring drained by the peer, an RX ring drained
/// locally, and the transmit state serializing local producers.
pub struct Channel {
    kind: ChannelKind,
    tx: RingQueue,
    rx: RingQueue,
    masks: DoorbellMasks,
    mailbox: Arc<dyn Mailbox>,
    tx_state: Mutex<TxState>,
    pending_acks: AtomicU32,
    tx_retry_interval: Duration,
}

impl Channel {
    pub fn new(
        region: Arc<SharedRegion>,
        kind: ChannelKind,
        side: Side,
        mailbox: Arc<dyn Mailbox>,
        tx_retry_interval: Duration,
    ) -> Self {
        let (tx_dir, rx_dir) = match side {
            Side::Ap => (RingDir::Tx, RingDir::Rx),
            Side::Cp => (RingDir::Rx, RingDir::Tx),
        };
        Self {
            kind,
            tx: RingQueue::new(Arc::clone(&region), kind.index(), tx_dir),
            rx: RingQueue::new(region, kind.index(), rx_dir),
            masks: kind.masks(),
            mailbox,
            tx_state: Mutex::new(TxState::default()),
            pending_acks: AtomicU32::new(0),
            tx_retry_interval,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Largest payload a single frame on this channel can carry.
    pub fn max_payload(&self) -> usize {
        let usable = (self.tx.capacity().saturating_sub(1) & !3) as usize;
        usable.saturating_sub(HEADER_SIZE)
    }

    /// Reset both ring index pairs and the transmit sequence state. Called
    /// at construction time and again on every link (re)establishment.
    pub fn init(&self) {
        self.tx.reset();
        self.rx.reset();
        *self.lock_tx() = TxState::default();
    }

    /// Frame `payload` and commit it to the TX ring, then ring the peer's
    /// doorbell.
    ///
    /// If the ring is full the caller is parked and re-polls: the protocol
    /// has no negative acknowledgement for "try again", so backpressure
    /// blocks (without bound) rather than failing.
    pub fn send(&self, payload: &[u8]) -> Result<usize> {
        let max = self.max_payload();
        if payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            }
            .into());
        }

        let total_len = HEADER_SIZE + payload.len();
        let wire_len = total_len + padding_for(total_len);

        let mut tx_state = self.lock_tx();

        loop {
            let free = self.tx.space_available()?;
            if free as usize >= wire_len {
                break;
            }
            tracing::trace!(
                channel = self.kind.name(),
                free,
                wire_len,
                "tx ring full, backing off"
            );
            std::thread::sleep(self.tx_retry_interval);
        }

        let frame_seq = tx_state.frame_seq.wrapping_add(1);
        let channel_seq = tx_state.channel_seq.wrapping_add(1);
        let header = FrameHeader::single(self.kind.wire_id(), frame_seq, channel_seq, payload.len())?;

        let mut wire = BytesMut::with_capacity(wire_len);
        encode_frame(&header, payload, &mut wire);
        // one contiguous commit: head publishes once per frame, so the
        // peer never observes a header without its payload
        self.tx.write(&wire)?;
        tx_state.frame_seq = frame_seq;
        tx_state.channel_seq = channel_seq;
        drop(tx_state);

        // doorbell only after the bytes are committed
        self.mailbox.raise(INT_VALID | self.masks.send);
        tracing::trace!(
            channel = self.kind.name(),
            len = payload.len(),
            channel_seq,
            "frame sent"
        );
        Ok(payload.len())
    }

    /// Drain complete frames from the RX ring into the dispatch queue.
    /// Worker context only, never the doorbell handler.
    ///
    /// A malformed header aborts the whole pass without advancing `tail`,
    /// so a corrupted frame cannot desynchronize reads past it; the next
    /// doorbell retries. Ring corruption is fatal and propagates.
    pub fn receive_pending(&self, sink: &FrameSink) -> Result<usize> {
        let mut delivered = 0usize;

        loop {
            let available = self.rx.data_available()?;
            if available == 0 {
                break;
            }
            if (available as usize) < HEADER_SIZE {
                tracing::warn!(
                    channel = self.kind.name(),
                    available,
                    "partial header in ring, drain aborted"
                );
                break;
            }

            let mut raw = [0u8; HEADER_SIZE];
            self.rx.peek(0, &mut raw)?;
            let header = match FrameHeader::decode(&raw) {
                Ok(header) => header,
                Err(err) => {
                    tracing::warn!(
                        channel = self.kind.name(),
                        %err,
                        "frame desync, drain aborted"
                    );
                    break;
                }
            };

            let wire_len = header.wire_len() as u32;
            if wire_len > available {
                tracing::warn!(
                    channel = self.kind.name(),
                    wire_len,
                    available,
                    "frame claims more bytes than published, drain aborted"
                );
                break;
            }

            let mut payload = vec![0u8; header.payload_len()];
            self.rx.peek(HEADER_SIZE as u32, &mut payload)?;
            self.rx.advance_tail(wire_len)?;

            sink.deliver(DecodedFrame {
                channel_id: header.channel_id,
                channel_seq: header.channel_seq,
                payload: Bytes::from(payload),
            })?;
            delivered += 1;
        }

        Ok(delivered)
    }

    /// Process this channel's ack handshake bits from a doorbell word.
    ///
    /// A `req_ack` is answered with the scoped `res_ack`; an observed
    /// `res_ack` settles one pending ack. This side never originates a
    /// `req_ack` — it only answers them.
    pub fn handle_doorbell(&self, word: u32) {
        if word & self.masks.req_ack != 0 {
            self.mailbox.raise(INT_VALID | self.masks.res_ack);
            tracing::debug!(channel = self.kind.name(), "answered req_ack");
        }
        if word & self.masks.res_ack != 0 {
            let _ = self
                .pending_acks
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            tracing::debug!(channel = self.kind.name(), "res_ack received");
        }
    }

    /// Liveness acknowledgements still awaited from the peer.
    pub fn pending_acks(&self) -> u32 {
        self.pending_acks.load(Ordering::SeqCst)
    }

    /// Local TX ring view, for diagnostics.
    pub fn tx_ring(&self) -> &RingQueue {
        &self.tx
    }

    /// Local RX ring view, for diagnostics.
    pub fn rx_ring(&self) -> &RingQueue {
        &self.rx
    }

    fn lock_tx(&self) -> MutexGuard<'_, TxState> {
        self.tx_state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use shmlink_shmem::{loopback_pair, ChannelSpec, RegionLayout, ShmemError};

    use super::*;
    use crate::dispatch::{DispatchWorker, IoDevice, QueueSink, SinkTable};
    use crate::error::LinkError;

    struct Harness {
        ap: Channel,
        cp: Channel,
        region: Arc<SharedRegion>,
        // sink must drop before worker or the stop join never returns
        sink: FrameSink,
        worker: DispatchWorker,
        fmt_frames: Arc<QueueSink>,
    }

    fn harness_with_capacity(capacity: u32) -> Harness {
        let region = SharedRegion::new(RegionLayout::new(&[
            ChannelSpec::symmetric(capacity),
            ChannelSpec::symmetric(capacity),
        ]));
        region.bring_up();
        let (ap_mb, cp_mb) = loopback_pair();

        let fmt_frames = QueueSink::new();
        let sinks = SinkTable::new().with_sink(
            ChannelKind::Fmt.wire_id(),
            fmt_frames.clone() as Arc<dyn IoDevice>,
        );
        let worker = DispatchWorker::spawn(sinks, 32).unwrap();
        let sink = worker.sink().unwrap();

        let retry = Duration::from_millis(1);
        Harness {
            ap: Channel::new(
                Arc::clone(&region),
                ChannelKind::Fmt,
                Side::Ap,
                ap_mb,
                retry,
            ),
            cp: Channel::new(
                Arc::clone(&region),
                ChannelKind::Fmt,
                Side::Cp,
                cp_mb,
                retry,
            ),
            region,
            sink,
            worker,
            fmt_frames,
        }
    }

    fn harness() -> Harness {
        harness_with_capacity(256)
    }

    #[test]
    fn send_receive_roundtrip() {
        let mut h = harness();

        assert_eq!(h.ap.send(b"hello modem").unwrap(), 11);
        assert_eq!(h.cp.receive_pending(&h.sink).unwrap(), 1);

        drop(h.sink);
        h.worker.stop();

        let frame = h.fmt_frames.try_pop().unwrap();
        assert_eq!(frame.channel_id, ChannelKind::Fmt.wire_id());
        assert_eq!(frame.payload.as_ref(), b"hello modem");
    }

    #[test]
    fn channel_seq_increments_by_one() {
        let mut h = harness();

        for i in 0..5u8 {
            h.ap.send(&[i]).unwrap();
        }
        assert_eq!(h.cp.receive_pending(&h.sink).unwrap(), 5);

        drop(h.sink);
        h.worker.stop();

        for expected in 1..=5u8 {
            let frame = h.fmt_frames.try_pop().unwrap();
            assert_eq!(frame.channel_seq, expected);
        }
    }

    #[test]
    fn send_signals_doorbell_after_commit() {
        let h = harness();
        h.ap.send(b"x").unwrap();

        // bytes were committed and the CP-side mailbox saw the FMT send bit
        assert!(h.cp.rx_ring().data_available().unwrap() > 0);
        let word = h.cp.mailbox.status();
        assert_eq!(word & FMT_MASKS.send, FMT_MASKS.send);
        assert_eq!(word & INT_VALID, INT_VALID);
    }

    #[test]
    fn empty_ring_drains_nothing() {
        let h = harness();
        assert_eq!(h.cp.receive_pending(&h.sink).unwrap(), 0);
    }

    #[test]
    fn oversized_length_aborts_drain_without_advancing_tail() {
        let h = harness();

        // hand-craft a frame whose total_len claims more than is published
        let header = FrameHeader {
            frame_seq: 1,
            frag_cfg: shmlink_frame::FRAG_SINGLE,
            total_len: 200,
            channel_id: ChannelKind::Fmt.wire_id(),
            channel_seq: 1,
        };
        let mut raw = BytesMut::new();
        header.encode(&mut raw);
        raw.resize(16, 0);

        let producer = RingQueue::new(Arc::clone(&h.region), 0, RingDir::Tx);
        producer.write(&raw).unwrap();

        let tail_before = h.cp.rx_ring().tail();
        assert_eq!(h.cp.receive_pending(&h.sink).unwrap(), 0);
        assert_eq!(h.cp.rx_ring().tail(), tail_before);

        // the drain retries identically on the next doorbell
        assert_eq!(h.cp.receive_pending(&h.sink).unwrap(), 0);
        assert_eq!(h.cp.rx_ring().tail(), tail_before);
    }

    #[test]
    fn bad_magic_aborts_drain_and_hides_following_frames() {
        let mut h = harness();

        // corrupt junk first, then a perfectly valid frame behind it
        let producer = RingQueue::new(Arc::clone(&h.region), 0, RingDir::Tx);
        producer.write(&[0xDE, 0xAD, 0, 0, 0, 0, 16, 0, 1, 1, 0, 0]).unwrap();

        let header = FrameHeader::single(1, 1, 1, 0).unwrap();
        let mut wire = BytesMut::new();
        encode_frame(&header, b"", &mut wire);
        producer.write(&wire).unwrap();

        let tail_before = h.cp.rx_ring().tail();
        assert_eq!(h.cp.receive_pending(&h.sink).unwrap(), 0);
        assert_eq!(h.cp.rx_ring().tail(), tail_before);

        drop(h.sink);
        h.worker.stop();
        assert!(h.fmt_frames.is_empty());
    }

    #[test]
    fn ring_corruption_is_fatal() {
        use shmlink_shmem::IndexWord;

        let h = harness();
        // CP's RX ring is the layout TX ring; scribble its head
        h.region.store_index(0, IndexWord::TxHead, 10_000);

        let err = h.cp.receive_pending(&h.sink).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Shmem(ShmemError::RingCorrupt { .. })
        ));
    }

    #[test]
    fn blocked_send_completes_once_peer_drains() {
        let h = harness_with_capacity(64);
        let h = Arc::new(h);

        // fill the ring: 3 frames of wire length 16 leave 15 free bytes
        for _ in 0..3 {
            h.ap.send(&[0xAB, 0xCD, 0xEF]).unwrap();
        }

        let sender = {
            let h = Arc::clone(&h);
            std::thread::spawn(move || h.ap.send(b"blocked").unwrap())
        };

        // give the sender time to park on the full ring
        std::thread::sleep(Duration::from_millis(20));
        assert!(!sender.is_finished());

        assert_eq!(h.cp.receive_pending(&h.sink).unwrap(), 3);
        assert_eq!(sender.join().expect("sender thread should finish"), 7);
    }

    #[test]
    fn payload_larger_than_ring_is_rejected() {
        let h = harness_with_capacity(64);
        let err = h.ap.send(&[0u8; 64]).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Frame(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn req_ack_is_answered_with_res_ack() {
        let h = harness();

        h.ap.handle_doorbell(INT_VALID | FMT_MASKS.req_ack);

        // the AP's answer landed in the CP-side mailbox
        assert_eq!(h.cp.mailbox.status() & FMT_MASKS.res_ack, FMT_MASKS.res_ack);
    }

    #[test]
    fn res_ack_never_underflows_pending_counter() {
        let h = harness();
        assert_eq!(h.ap.pending_acks(), 0);
        h.ap.handle_doorbell(INT_VALID | FMT_MASKS.res_ack);
        assert_eq!(h.ap.pending_acks(), 0);
    }

    #[test]
    fn foreign_channel_bits_are_ignored() {
        let h = harness();
        h.ap.handle_doorbell(INT_VALID | RAW_MASKS.req_ack);
        assert_eq!(h.cp.mailbox.status() & FMT_MASKS.res_ack, 0);
    }

    #[test]
    fn init_resets_rings_and_sequences() {
        let mut h = harness();

        h.ap.send(b"before reset").unwrap();
        assert!(h.ap.tx_ring().head() > 0);

        h.ap.init();
        assert_eq!(h.ap.tx_ring().head(), 0);
        assert_eq!(h.ap.tx_ring().tail(), 0);

        h.ap.send(b"after reset").unwrap();
        assert_eq!(h.cp.receive_pending(&h.sink).unwrap(), 1);

        drop(h.sink);
        h.worker.stop();
        // sequence restarted from 1
        assert_eq!(h.fmt_frames.try_pop().unwrap().channel_seq, 1);
    }

    #[test]
    fn space_restored_after_full_cycle() {
        let h = harness();
        let before = h.ap.tx_ring().space_available().unwrap();

        h.ap.send(b"abc").unwrap();
        h.cp.receive_pending(&h.sink).unwrap();

        assert_eq!(h.ap.tx_ring().space_available().unwrap(), before);
    }
}
