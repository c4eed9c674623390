//! Mailbox/doorbell collaborator interface.
//!
//! The physical mailbox is a small register bank: a status word per
//! direction plus an interrupt line to the peer. The link core needs only
//! the operations below; the register-level driver lives outside this
//! crate.
//!
//! [`loopback_pair`] provides an in-process stand-in for tests and demos.
//! Its `raise` runs the peer's handler synchronously on the caller's
//! thread, which is exactly as hostile as interrupt context: handlers must
//! not block.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Callback invoked with the raised status word. Runs in doorbell
/// (interrupt) context: it must defer real work and never block.
pub type DoorbellHandler = Box<dyn Fn(u32) + Send + Sync>;

/// Abstraction over the mailbox register pair and doorbell interrupt.
pub trait Mailbox: Send + Sync {
    /// Write the local status word visible to the peer, without raising an
    /// interrupt.
    fn set_status(&self, word: u32);

    /// Read the last status word the peer raised or set.
    fn status(&self) -> u32;

    /// Deliver `word` to the peer and trigger its doorbell handler.
    fn raise(&self, word: u32);

    /// Install the local doorbell handler, replacing any previous one.
    fn register_handler(&self, handler: DoorbellHandler);

    /// Remove the local doorbell handler.
    fn clear_handler(&self);
}

struct PairShared {
    /// `words[i]` is the last word delivered toward endpoint `i`.
    words: [AtomicU32; 2],
    handlers: [Mutex<Option<DoorbellHandler>>; 2],
}

/// One endpoint of an in-process mailbox pair.
pub struct LoopbackMailbox {
    shared: Arc<PairShared>,
    side: usize,
}

/// Create a connected pair of in-process mailboxes.
pub fn loopback_pair() -> (Arc<LoopbackMailbox>, Arc<LoopbackMailbox>) {
    let shared = Arc::new(PairShared {
        words: [AtomicU32::new(0), AtomicU32::new(0)],
        handlers: [Mutex::new(None), Mutex::new(None)],
    });
    (
        Arc::new(LoopbackMailbox {
            shared: Arc::clone(&shared),
            side: 0,
        }),
        Arc::new(LoopbackMailbox { shared, side: 1 }),
    )
}

impl LoopbackMailbox {
    fn peer(&self) -> usize {
        1 - self.side
    }
}

impl Mailbox for LoopbackMailbox {
    fn set_status(&self, word: u32) {
        self.shared.words[self.peer()].store(word, Ordering::Release);
    }

    fn status(&self) -> u32 {
        self.shared.words[self.side].load(Ordering::Acquire)
    }

    fn raise(&self, word: u32) {
        let peer = self.peer();
        self.shared.words[peer].store(word, Ordering::Release);
        let guard = self.shared.handlers[peer]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handler) = guard.as_ref() {
            handler(word);
        } else {
            tracing::trace!(word = format_args!("{word:#06x}"), "doorbell with no handler");
        }
    }

    fn register_handler(&self, handler: DoorbellHandler) {
        *self.shared.handlers[self.side]
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn clear_handler(&self) {
        *self.shared.handlers[self.side]
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl std::fmt::Debug for LoopbackMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackMailbox")
            .field("side", &self.side)
            .field("status", &format_args!("{:#06x}", self.status()))
            .finish()
    }
}
