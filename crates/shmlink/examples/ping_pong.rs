//! Minimal two-link demo: the AP pings, the CP pongs.
//!
//! Run with: `cargo run --example ping-pong`

use std::sync::Arc;
use std::time::Duration;

use shmlink::link::{
    ChannelKind, IoDevice, LinkConfig, LinkDevice, LinkState, QueueSink, Side, SinkTable,
};
use shmlink::shmem::{loopback_pair, RegionLayout, SharedRegion};

fn main() {
    let region = SharedRegion::new(RegionLayout::two_channel_default());
    region.bring_up();
    let (ap_mb, cp_mb) = loopback_pair();

    let ap_fmt = QueueSink::new();
    let cp_fmt = QueueSink::new();

    let mut ap = LinkDevice::create(
        Arc::clone(&region),
        ap_mb,
        Side::Ap,
        SinkTable::new().with_sink(
            ChannelKind::Fmt.wire_id(),
            ap_fmt.clone() as Arc<dyn IoDevice>,
        ),
        None,
        LinkConfig::default(),
    );
    let mut cp = LinkDevice::create(
        region,
        cp_mb,
        Side::Cp,
        SinkTable::new().with_sink(
            ChannelKind::Fmt.wire_id(),
            cp_fmt.clone() as Arc<dyn IoDevice>,
        ),
        None,
        LinkConfig::default(),
    );

    ap.start().expect("ap link should start");
    cp.start().expect("cp link should start");

    // mutual boot announcement brings both sides online
    cp.announce_ready();
    ap.announce_ready();
    while ap.state() != LinkState::Online || cp.state() != LinkState::Online {
        std::thread::sleep(Duration::from_millis(1));
    }

    ap.send(ChannelKind::Fmt, b"ping").expect("ping should send");
    let ping = cp_fmt
        .pop_timeout(Duration::from_secs(1))
        .expect("ping should arrive");
    println!("cp received: {}", String::from_utf8_lossy(ping.payload.as_ref()));

    cp.send(ChannelKind::Fmt, b"pong").expect("pong should send");
    let pong = ap_fmt
        .pop_timeout(Duration::from_secs(1))
        .expect("pong should arrive");
    println!("ap received: {}", String::from_utf8_lossy(pong.payload.as_ref()));

    ap.stop();
    cp.stop();
}
