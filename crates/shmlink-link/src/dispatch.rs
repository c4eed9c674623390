//! Cross-channel frame dispatch.
//!
//! Decoded frames from every channel funnel into one bounded queue drained
//! by a single dedicated worker thread. The worker looks up the I/O device
//! sink registered for the frame's channel id and hands the payload over;
//! this is the only place demultiplexing occurs.

use std::collections::VecDeque;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{LinkError, Result};

/// A decoded frame handed from a channel drain to an I/O device sink.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub channel_id: u8,
    pub channel_seq: u8,
    pub payload: Bytes,
}

/// Consumer of decoded application payloads for one channel id.
pub trait IoDevice: Send + Sync {
    fn accept(&self, frame: DecodedFrame);
}

/// Static channel-id → sink table. Fixed at construction; there is no
/// dynamic registration.
#[derive(Default)]
pub struct SinkTable {
    entries: Vec<(u8, Arc<dyn IoDevice>)>,
}

impl SinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sink` for `channel_id`. Later entries never shadow
    /// earlier ones; the first match wins.
    pub fn with_sink(mut self, channel_id: u8, sink: Arc<dyn IoDevice>) -> Self {
        self.entries.push((channel_id, sink));
        self
    }

    fn lookup(&self, channel_id: u8) -> Option<&Arc<dyn IoDevice>> {
        self.entries
            .iter()
            .find(|(id, _)| *id == channel_id)
            .map(|(_, sink)| sink)
    }
}

/// Producer handle into the dispatch queue.
#[derive(Clone)]
pub struct FrameSink {
    tx: SyncSender<DecodedFrame>,
}

impl FrameSink {
    /// Enqueue a decoded frame, blocking if the queue is full (the drain
    /// worker applies backpressure to ring draining, not the other way
    /// around).
    pub fn deliver(&self, frame: DecodedFrame) -> Result<()> {
        self.tx.send(frame).map_err(|_| LinkError::DispatchClosed)
    }
}

/// The dedicated dispatch thread plus its queue.
pub struct DispatchWorker {
    tx: Option<SyncSender<DecodedFrame>>,
    handle: Option<JoinHandle<()>>,
}

impl DispatchWorker {
    /// Spawn the worker over a bounded queue of `queue_depth` frames.
    pub fn spawn(sinks: SinkTable, queue_depth: usize) -> Result<Self> {
        let (tx, rx) = sync_channel(queue_depth);
        let handle = std::thread::Builder::new()
            .name("shmlink-dispatch".to_string())
            .spawn(move || run(sinks, rx))?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// A new producer handle into the queue. Fails once the worker has
    /// been stopped.
    pub fn sink(&self) -> Result<FrameSink> {
        match &self.tx {
            Some(tx) => Ok(FrameSink { tx: tx.clone() }),
            None => Err(LinkError::DispatchClosed),
        }
    }

    /// Stop the worker once every outstanding [`FrameSink`] is gone and
    /// the queue has drained.
    pub fn stop(&mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DispatchWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(sinks: SinkTable, rx: Receiver<DecodedFrame>) {
    // recv fails once every sender is dropped; that is the shutdown signal
    while let Ok(frame) = rx.recv() {
        match sinks.lookup(frame.channel_id) {
            Some(sink) => sink.accept(frame),
            None => {
                tracing::warn!(
                    channel_id = frame.channel_id,
                    len = frame.payload.len(),
                    "no sink registered, frame discarded"
                );
            }
        }
    }
    tracing::debug!("dispatch worker exiting");
}

/// Buffering sink that queues frames for a polling consumer. Used by the
/// CLI and tests.
#[derive(Default)]
pub struct QueueSink {
    frames: Mutex<VecDeque<DecodedFrame>>,
    ready: Condvar,
}

impl QueueSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pop the oldest frame, if any.
    pub fn try_pop(&self) -> Option<DecodedFrame> {
        self.lock().pop_front()
    }

    /// Pop the oldest frame, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<DecodedFrame> {
        let guard = self.lock();
        let (mut guard, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |frames| frames.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        guard.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<DecodedFrame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl IoDevice for QueueSink {
    fn accept(&self, frame: DecodedFrame) {
        self.lock().push_back(frame);
        self.ready.notify_one();
    }
}
