//! The link device: command state machine, doorbell-to-worker handoff,
//! and channel ownership.
//!
//! A `LinkDevice` is constructed explicitly and handed to its workers by
//! reference counting; there are no module-level singletons. Lifecycle is
//! `create → start → stop`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use shmlink_shmem::{Mailbox, SharedRegion, ShmemError};

use crate::channel::{Channel, ChannelKind, Side};
use crate::command::{self, Command};
use crate::dispatch::{DispatchWorker, FrameSink, SinkTable};
use crate::error::{LinkError, Result};

/// Link lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Offline,
    Online,
    /// Capture mode after a save request. Terminal until reboot.
    NvSave,
}

/// Why the link went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashKind {
    /// The peer reported its own crash.
    PeerCrashExit,
    /// A local ring index was observed out of bounds.
    RingCorrupt,
}

/// Notification hook invoked when the link goes down. The surrounding
/// application owns peer restart and higher-level teardown.
pub type CrashHook = Box<dyn Fn(CrashKind) + Send + Sync>;

/// Tunables for a link device.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Cooperative sleep between TX space re-polls.
    pub tx_retry_interval: Duration,
    /// Doorbell words buffered between handler and link worker.
    pub event_queue_depth: usize,
    /// Decoded frames buffered toward the dispatch worker.
    pub dispatch_queue_depth: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            tx_retry_interval: Duration::from_millis(1),
            event_queue_depth: 64,
            dispatch_queue_depth: 256,
        }
    }
}

enum Event {
    Doorbell(u32),
    Shutdown,
}

struct LinkShared {
    region: Arc<SharedRegion>,
    mailbox: Arc<dyn Mailbox>,
    channels: Vec<Arc<Channel>>,
    state: Mutex<LinkState>,
    crash_hook: Option<CrashHook>,
    dropped_doorbells: AtomicU64,
}

/// One side of the shared-memory link.
pub struct LinkDevice {
    shared: Arc<LinkShared>,
    config: LinkConfig,
    sinks: Option<SinkTable>,
    dispatch: Option<DispatchWorker>,
    worker: Option<JoinHandle<()>>,
    event_tx: Option<SyncSender<Event>>,
}

impl LinkDevice {
    /// Build a link device over an already laid-out region. The region
    /// layout must carry the FMT and RAW channels at indices 0 and 1.
    pub fn create(
        region: Arc<SharedRegion>,
        mailbox: Arc<dyn Mailbox>,
        side: Side,
        sinks: SinkTable,
        crash_hook: Option<CrashHook>,
        config: LinkConfig,
    ) -> Self {
        let channels = [ChannelKind::Fmt, ChannelKind::Raw]
            .into_iter()
            .map(|kind| {
                Arc::new(Channel::new(
                    Arc::clone(&region),
                    kind,
                    side,
                    Arc::clone(&mailbox),
                    config.tx_retry_interval,
                ))
            })
            .collect();

        Self {
            shared: Arc::new(LinkShared {
                region,
                mailbox,
                channels,
                state: Mutex::new(LinkState::Offline),
                crash_hook,
                dropped_doorbells: AtomicU64::new(0),
            }),
            config,
            sinks: Some(sinks),
            dispatch: None,
            worker: None,
            event_tx: None,
        }
    }

    /// Verify the region is live, spawn the dispatch and link workers, and
    /// hook the doorbell. A stopped link cannot be restarted; build a new
    /// one.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        self.shared.region.verify_ready()?;

        let sinks = self.sinks.take().ok_or(LinkError::DispatchClosed)?;
        let dispatch = DispatchWorker::spawn(sinks, self.config.dispatch_queue_depth)?;
        let dispatch_sink = dispatch.sink()?;

        let (event_tx, event_rx) = sync_channel(self.config.event_queue_depth);
        let shared = Arc::clone(&self.shared);
        let worker = std::thread::Builder::new()
            .name("shmlink-link".to_string())
            .spawn(move || run_worker(shared, event_rx, dispatch_sink))?;

        let handler_tx = event_tx.clone();
        let handler_shared = Arc::clone(&self.shared);
        // doorbell context: forward the word and return, never block
        self.shared.mailbox.register_handler(Box::new(move |word| {
            if handler_tx.try_send(Event::Doorbell(word)).is_err() {
                handler_shared
                    .dropped_doorbells
                    .fetch_add(1, Ordering::Relaxed);
            }
        }));

        self.dispatch = Some(dispatch);
        self.worker = Some(worker);
        self.event_tx = Some(event_tx);
        tracing::info!("link device started");
        Ok(())
    }

    /// Unhook the doorbell and join both workers.
    pub fn stop(&mut self) {
        self.shared.mailbox.clear_handler();
        if let Some(event_tx) = self.event_tx.take() {
            let _ = event_tx.send(Event::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let Some(mut dispatch) = self.dispatch.take() {
            dispatch.stop();
        }
    }

    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    pub fn channel(&self, kind: ChannelKind) -> &Arc<Channel> {
        self.shared.channel(kind)
    }

    /// Send a payload on a channel. Requires the link to be online.
    pub fn send(&self, kind: ChannelKind, payload: &[u8]) -> Result<usize> {
        let state = self.state();
        if state != LinkState::Online {
            return Err(LinkError::NotOnline { state });
        }
        self.shared.channel(kind).send(payload)
    }

    /// Raise `PHONE_START` toward the peer. On the CP this is the boot
    /// announcement; an AP-only deployment never calls it.
    pub fn announce_ready(&self) {
        self.shared.mailbox.raise(Command::PhoneStart.encode());
    }

    /// Capture the link for a state save: all ring indices are zeroed and
    /// the region is re-tagged with the save magic, so a reboot can tell
    /// the persisted area from a clean boot. Terminal until reboot.
    pub fn request_nv_save(&self) -> Result<()> {
        let mut state = self.shared.lock_state();
        if *state != LinkState::Online {
            return Err(LinkError::NotOnline { state: *state });
        }
        *state = LinkState::NvSave;
        drop(state);

        self.shared.region.zero_all_indices();
        self.shared.region.retag_for_save();
        tracing::info!("link captured for nv save");
        Ok(())
    }

    /// Doorbells dropped because the event queue was full.
    pub fn dropped_doorbells(&self) -> u64 {
        self.shared.dropped_doorbells.load(Ordering::Relaxed)
    }
}

impl Drop for LinkDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(shared: Arc<LinkShared>, events: Receiver<Event>, sink: FrameSink) {
    while let Ok(event) = events.recv() {
        match event {
            Event::Shutdown => break,
            Event::Doorbell(word) => shared.handle_doorbell_word(word, &sink),
        }
    }
    tracing::debug!("link worker exiting");
}

impl LinkShared {
    fn state(&self) -> LinkState {
        *self.lock_state()
    }

    fn lock_state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn channel(&self, kind: ChannelKind) -> &Arc<Channel> {
        &self.channels[kind.index()]
    }

    fn handle_doorbell_word(&self, word: u32, sink: &FrameSink) {
        if !command::is_valid(word) {
            tracing::trace!(
                word = format_args!("{word:#06x}"),
                "doorbell without valid bit ignored"
            );
            return;
        }

        if command::is_command(word) {
            match Command::decode(word) {
                Some(cmd) => self.handle_command(cmd),
                None => tracing::warn!(
                    word = format_args!("{word:#06x}"),
                    "unknown command word ignored"
                ),
            }
            return;
        }

        // one channel's trouble must not starve the others in this event
        let mut corrupted = false;
        for channel in &self.channels {
            channel.handle_doorbell(word);
            match channel.receive_pending(sink) {
                Ok(0) => {}
                Ok(count) => {
                    tracing::trace!(channel = channel.kind().name(), count, "frames dispatched");
                }
                Err(LinkError::Shmem(err @ ShmemError::RingCorrupt { .. })) => {
                    tracing::error!(channel = channel.kind().name(), %err, "ring corruption");
                    corrupted = true;
                }
                Err(err) => {
                    tracing::warn!(channel = channel.kind().name(), %err, "doorbell processing error");
                }
            }
        }
        if corrupted {
            self.crash(CrashKind::RingCorrupt);
        }
    }

    fn handle_command(&self, cmd: Command) {
        match cmd {
            Command::PhoneStart => {
                let mut state = self.lock_state();
                if *state == LinkState::NvSave {
                    tracing::warn!("PHONE_START ignored in NV_SAVE state");
                    return;
                }
                let prev = *state;
                // re-init runs even when already online; frames in flight
                // between the peer's PHONE_START and our INIT_END are lost
                for channel in &self.channels {
                    channel.init();
                }
                *state = LinkState::Online;
                drop(state);

                self.mailbox.raise(Command::InitEnd.encode());
                tracing::info!(?prev, "link online, INIT_END raised");
            }
            Command::CrashExit => self.crash(CrashKind::PeerCrashExit),
            Command::InitEnd => tracing::debug!("peer completed initialization"),
        }
    }

    fn crash(&self, kind: CrashKind) {
        let mut state = self.lock_state();
        if *state == LinkState::Offline {
            tracing::debug!(?kind, "crash signal while already offline");
            return;
        }
        *state = LinkState::Offline;
        drop(state);

        tracing::error!(?kind, "link down");
        if let Some(hook) = &self.crash_hook {
            hook(kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Mutex as StdMutex;
    use std::time::Instant;

    use shmlink_shmem::{loopback_pair, RegionLayout, NV_SAVE_MAGIC};

    use super::*;
    use crate::command::{FMT_MASKS, INT_CMD, INT_VALID};
    use crate::dispatch::{IoDevice, QueueSink};

    fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn live_region() -> Arc<SharedRegion> {
        let region = SharedRegion::new(RegionLayout::two_channel_default());
        region.bring_up();
        region
    }

    struct EndpointSinks {
        fmt: Arc<QueueSink>,
        raw: Arc<QueueSink>,
    }

    fn sink_table() -> (SinkTable, EndpointSinks) {
        let fmt = QueueSink::new();
        let raw = QueueSink::new();
        let table = SinkTable::new()
            .with_sink(ChannelKind::Fmt.wire_id(), fmt.clone() as Arc<dyn IoDevice>)
            .with_sink(ChannelKind::Raw.wire_id(), raw.clone() as Arc<dyn IoDevice>);
        (table, EndpointSinks { fmt, raw })
    }

    fn link_pair() -> (LinkDevice, LinkDevice, EndpointSinks, EndpointSinks) {
        let region = live_region();
        let (ap_mb, cp_mb) = loopback_pair();
        let (ap_table, ap_sinks) = sink_table();
        let (cp_table, cp_sinks) = sink_table();

        let mut ap = LinkDevice::create(
            Arc::clone(&region),
            ap_mb,
            Side::Ap,
            ap_table,
            None,
            LinkConfig::default(),
        );
        let mut cp = LinkDevice::create(
            region,
            cp_mb,
            Side::Cp,
            cp_table,
            None,
            LinkConfig::default(),
        );
        ap.start().unwrap();
        cp.start().unwrap();

        // bring both sides online, as each peer's boot announcement would
        cp.announce_ready();
        ap.announce_ready();
        wait_until("both links online", || {
            ap.state() == LinkState::Online && cp.state() == LinkState::Online
        });

        (ap, cp, ap_sinks, cp_sinks)
    }

    #[test]
    fn start_requires_live_region() {
        let region = SharedRegion::new(RegionLayout::two_channel_default());
        let (ap_mb, _cp_mb) = loopback_pair();
        let mut link = LinkDevice::create(
            region,
            ap_mb,
            Side::Ap,
            SinkTable::new(),
            None,
            LinkConfig::default(),
        );

        let err = link.start().unwrap_err();
        assert!(matches!(
            err,
            LinkError::Shmem(ShmemError::PeerNotReady { .. })
        ));
    }

    #[test]
    fn end_to_end_roundtrip_both_channels() {
        let (ap, _cp, _ap_sinks, cp_sinks) = link_pair();

        ap.send(ChannelKind::Fmt, b"at+cfun?").unwrap();
        ap.send(ChannelKind::Raw, &[0x45, 0x00, 0x00, 0x1c]).unwrap();

        let fmt = cp_sinks
            .fmt
            .pop_timeout(Duration::from_secs(5))
            .expect("FMT frame should arrive");
        assert_eq!(fmt.channel_id, ChannelKind::Fmt.wire_id());
        assert_eq!(fmt.payload.as_ref(), b"at+cfun?");

        let raw = cp_sinks
            .raw
            .pop_timeout(Duration::from_secs(5))
            .expect("RAW frame should arrive");
        assert_eq!(raw.channel_id, ChannelKind::Raw.wire_id());
        assert_eq!(raw.payload.as_ref(), &[0x45, 0x00, 0x00, 0x1c]);
    }

    #[test]
    fn replies_flow_back_to_the_ap() {
        let (ap, cp, ap_sinks, cp_sinks) = link_pair();

        ap.send(ChannelKind::Fmt, b"ping").unwrap();
        let request = cp_sinks.fmt.pop_timeout(Duration::from_secs(5)).unwrap();
        cp.send(ChannelKind::Fmt, request.payload.as_ref()).unwrap();

        let reply = ap_sinks
            .fmt
            .pop_timeout(Duration::from_secs(5))
            .expect("echo should arrive back");
        assert_eq!(reply.payload.as_ref(), b"ping");
    }

    #[test]
    fn send_while_offline_is_rejected() {
        let region = live_region();
        let (ap_mb, _cp_mb) = loopback_pair();
        let mut link = LinkDevice::create(
            region,
            ap_mb,
            Side::Ap,
            SinkTable::new(),
            None,
            LinkConfig::default(),
        );
        link.start().unwrap();

        let err = link.send(ChannelKind::Fmt, b"early").unwrap_err();
        assert!(matches!(
            err,
            LinkError::NotOnline {
                state: LinkState::Offline
            }
        ));
    }

    #[test]
    fn phone_start_raises_exactly_one_init_end() {
        let region = live_region();
        let (ap_mb, cp_mb) = loopback_pair();
        let (table, _sinks) = sink_table();

        let mut ap = LinkDevice::create(
            region,
            ap_mb,
            Side::Ap,
            table,
            None,
            LinkConfig::default(),
        );
        ap.start().unwrap();

        // capture every word the AP raises toward the CP
        let seen: Arc<StdMutex<Vec<u32>>> = Arc::default();
        let seen_clone = Arc::clone(&seen);
        cp_mb.register_handler(Box::new(move |word| {
            seen_clone
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(word);
        }));

        cp_mb.raise(Command::PhoneStart.encode());
        wait_until("link online", || ap.state() == LinkState::Online);

        let init_ends = seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|&&word| Command::decode(word) == Some(Command::InitEnd))
            .count();
        assert_eq!(init_ends, 1);
    }

    #[test]
    fn duplicate_phone_start_rezeroes_ring_indices() {
        let region = live_region();
        let (ap_mb, cp_mb) = loopback_pair();
        let (table, _sinks) = sink_table();

        let mut ap = LinkDevice::create(
            Arc::clone(&region),
            ap_mb,
            Side::Ap,
            table,
            None,
            LinkConfig::default(),
        );
        ap.start().unwrap();

        cp_mb.raise(Command::PhoneStart.encode());
        wait_until("link online", || ap.state() == LinkState::Online);

        // park a frame in the FMT TX ring; nobody drains it
        ap.send(ChannelKind::Fmt, b"in flight").unwrap();
        assert!(ap.channel(ChannelKind::Fmt).tx_ring().head() > 0);

        // duplicate start: state no-op, but the in-flight frame is dropped
        cp_mb.raise(Command::PhoneStart.encode());
        wait_until("ring indices re-zeroed", || {
            ap.channel(ChannelKind::Fmt).tx_ring().head() == 0
        });
        assert_eq!(ap.state(), LinkState::Online);
    }

    #[test]
    fn crash_exit_fires_hook_and_goes_offline() {
        let region = live_region();
        let (ap_mb, cp_mb) = loopback_pair();
        let crashed = Arc::new(AtomicBool::new(false));

        let crashed_clone = Arc::clone(&crashed);
        let mut ap = LinkDevice::create(
            region,
            ap_mb,
            Side::Ap,
            SinkTable::new(),
            Some(Box::new(move |kind| {
                assert_eq!(kind, CrashKind::PeerCrashExit);
                crashed_clone.store(true, Ordering::SeqCst);
            })),
            LinkConfig::default(),
        );
        ap.start().unwrap();

        cp_mb.raise(Command::PhoneStart.encode());
        wait_until("link online", || ap.state() == LinkState::Online);

        cp_mb.raise(Command::CrashExit.encode());
        wait_until("link offline", || ap.state() == LinkState::Offline);
        assert!(crashed.load(Ordering::SeqCst));

        let err = ap.send(ChannelKind::Fmt, b"dead").unwrap_err();
        assert!(matches!(err, LinkError::NotOnline { .. }));
    }

    #[test]
    fn ring_corruption_escalates_to_crash() {
        let region = live_region();
        let (ap_mb, cp_mb) = loopback_pair();
        let crashes = Arc::new(AtomicUsize::new(0));

        let crashes_clone = Arc::clone(&crashes);
        let mut ap = LinkDevice::create(
            Arc::clone(&region),
            ap_mb,
            Side::Ap,
            SinkTable::new(),
            Some(Box::new(move |kind| {
                assert_eq!(kind, CrashKind::RingCorrupt);
                crashes_clone.fetch_add(1, Ordering::SeqCst);
            })),
            LinkConfig::default(),
        );
        ap.start().unwrap();

        cp_mb.raise(Command::PhoneStart.encode());
        wait_until("link online", || ap.state() == LinkState::Online);

        // scribble the AP's FMT RX ring head, then ring the doorbell
        region.store_index(0, shmlink_shmem::IndexWord::RxHead, u32::MAX);
        cp_mb.raise(INT_VALID | FMT_MASKS.send);

        wait_until("link offline", || ap.state() == LinkState::Offline);
        assert_eq!(crashes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nv_save_is_terminal_and_retags_region() {
        let region = live_region();
        let (ap_mb, cp_mb) = loopback_pair();
        let mut ap = LinkDevice::create(
            Arc::clone(&region),
            ap_mb,
            Side::Ap,
            SinkTable::new(),
            None,
            LinkConfig::default(),
        );
        ap.start().unwrap();

        // save requires an online link
        assert!(matches!(
            ap.request_nv_save(),
            Err(LinkError::NotOnline { .. })
        ));

        cp_mb.raise(Command::PhoneStart.encode());
        wait_until("link online", || ap.state() == LinkState::Online);

        ap.request_nv_save().unwrap();
        assert_eq!(ap.state(), LinkState::NvSave);
        assert_eq!(region.magic(), NV_SAVE_MAGIC);
        assert_eq!(region.load_index(0, shmlink_shmem::IndexWord::TxHead), 0);

        // terminal: sends fail and a new PHONE_START is ignored
        assert!(matches!(
            ap.send(ChannelKind::Fmt, b"late"),
            Err(LinkError::NotOnline { .. })
        ));
        cp_mb.raise(Command::PhoneStart.encode());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(ap.state(), LinkState::NvSave);
    }

    #[test]
    fn unknown_command_words_are_ignored() {
        let region = live_region();
        let (ap_mb, cp_mb) = loopback_pair();
        let mut ap = LinkDevice::create(
            region,
            ap_mb,
            Side::Ap,
            SinkTable::new(),
            None,
            LinkConfig::default(),
        );
        ap.start().unwrap();

        cp_mb.raise(INT_VALID | INT_CMD | 0xF);
        cp_mb.raise(0); // no valid bit
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(ap.state(), LinkState::Offline);
    }

    #[test]
    fn stop_is_idempotent_and_restart_is_refused() {
        let (mut ap, _cp, _ap_sinks, _cp_sinks) = link_pair();
        ap.stop();
        ap.stop();
        assert!(matches!(ap.start(), Err(LinkError::DispatchClosed)));
    }
}
