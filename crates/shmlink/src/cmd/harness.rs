//! In-process AP + CP link pair shared by the loopback-style commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use shmlink_link::{
    ChannelKind, IoDevice, LinkConfig, LinkDevice, LinkState, QueueSink, Side, SinkTable,
};
use shmlink_shmem::{loopback_pair, ChannelSpec, Mailbox, RegionLayout, SharedRegion};

use crate::exit::{link_error, CliError, CliResult, TIMEOUT};

const ESTABLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// One side of the pair: its link device plus per-channel sinks.
pub struct Endpoint {
    pub link: LinkDevice,
    pub fmt: Arc<QueueSink>,
    pub raw: Arc<QueueSink>,
}

impl Endpoint {
    pub fn sink(&self, kind: ChannelKind) -> &Arc<QueueSink> {
        match kind {
            ChannelKind::Fmt => &self.fmt,
            ChannelKind::Raw => &self.raw,
        }
    }
}

pub struct LinkPair {
    pub ap: Endpoint,
    /// Shared so an echo worker can hold the CP side across threads.
    pub cp: Arc<Endpoint>,
}

/// Build a region + mailbox pair, start a link device on each side, and
/// wait for the mutual boot announcement to bring both online.
pub fn bring_up(fmt_buf: u32, raw_buf: u32) -> CliResult<LinkPair> {
    let layout = RegionLayout::new(&[
        ChannelSpec::symmetric(fmt_buf),
        ChannelSpec::symmetric(raw_buf),
    ]);
    let region = SharedRegion::new(layout);
    region.bring_up();

    let (ap_mb, cp_mb) = loopback_pair();
    let ap = endpoint(Arc::clone(&region), ap_mb, Side::Ap)?;
    let cp = Arc::new(endpoint(region, cp_mb, Side::Cp)?);

    cp.link.announce_ready();
    ap.link.announce_ready();

    let deadline = Instant::now() + ESTABLISH_TIMEOUT;
    while ap.link.state() != LinkState::Online || cp.link.state() != LinkState::Online {
        if Instant::now() >= deadline {
            return Err(CliError::new(TIMEOUT, "link establishment timed out"));
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    Ok(LinkPair { ap, cp })
}

fn endpoint(
    region: Arc<SharedRegion>,
    mailbox: Arc<dyn Mailbox>,
    side: Side,
) -> CliResult<Endpoint> {
    let fmt = QueueSink::new();
    let raw = QueueSink::new();
    let sinks = SinkTable::new()
        .with_sink(ChannelKind::Fmt.wire_id(), fmt.clone() as Arc<dyn IoDevice>)
        .with_sink(ChannelKind::Raw.wire_id(), raw.clone() as Arc<dyn IoDevice>);

    let mut link = LinkDevice::create(region, mailbox, side, sinks, None, LinkConfig::default());
    link.start()
        .map_err(|err| link_error("link start failed", err))?;
    Ok(Endpoint { link, fmt, raw })
}

/// Background thread echoing every frame the CP receives on one channel
/// straight back to the AP.
pub struct EchoWorker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

pub fn spawn_echo(cp: Arc<Endpoint>, kind: ChannelKind) -> EchoWorker {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    let handle = std::thread::spawn(move || {
        while flag.load(Ordering::SeqCst) {
            if let Some(frame) = cp.sink(kind).pop_timeout(Duration::from_millis(50)) {
                if let Err(err) = cp.link.send(kind, frame.payload.as_ref()) {
                    tracing::warn!(%err, "echo send failed");
                    break;
                }
            }
        }
    });
    EchoWorker {
        running,
        handle: Some(handle),
    }
}

impl EchoWorker {
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EchoWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
