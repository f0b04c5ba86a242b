//! Blocking signals for stop-and-wait flow control and the file handshake.
//!
//! Both types are one-slot bounded channels used as counting signals: the
//! waiting side blocks on a channel receive, the delivery thread refills the
//! slot. No sleep-and-poll loops.

use crossbeam_channel::{bounded, Receiver, Sender};

/// One-permit counting signal backing the pending-acknowledgment wait.
///
/// The slot starts full: the link is free until the first data frame goes
/// out. Each data frame send consumes the permit; each received
/// acknowledgment releases it. This enforces at most one unacknowledged
/// data unit in flight per layer.
pub struct AckSlot {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl AckSlot {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(());
        Self { tx, rx }
    }

    /// Block until the outstanding acknowledgment arrives, consuming the
    /// permit.
    pub fn acquire(&self) {
        // Both endpoints live in self, so this can only fail mid-teardown.
        let _ = self.rx.recv();
    }

    /// Release one permit. Returns `false` for a spurious acknowledgment
    /// (nothing was outstanding).
    pub fn release(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

impl Default for AckSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// One-slot handoff carrying the receiver's accept/deny verdict back to a
/// sender blocked in the file handshake.
pub struct ResponseSlot {
    tx: Sender<bool>,
    rx: Receiver<bool>,
}

impl ResponseSlot {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    /// Block until the peer's verdict arrives.
    pub fn wait(&self) -> bool {
        self.rx.recv().unwrap_or(false)
    }

    /// Post a verdict, waking the waiting sender. Returns `false` if a
    /// verdict was already pending.
    pub fn post(&self, accepted: bool) -> bool {
        self.tx.try_send(accepted).is_ok()
    }
}

impl Default for ResponseSlot {
    fn default() -> Self {
        Self::new()
    }
}
