//! Bounded queue for frames that found no free mailbox, and the drain pass
//! that gives them one more chance.
//!
//! A queued frame is offered to the hardware exactly once. If every mailbox
//! is still busy when it is drained, the frame is discarded: the next cycle
//! produces fresher data for the same message anyway.

use crate::diag::{DiagContext, DiagEvent, DiagSeverity, DiagnosticsSink};
use crate::error::HardwareError;
use crate::frame::CanFrame;
use crate::mailbox::{CanHardware, MailboxIndex, MailboxManager};
use heapless::spsc::Queue;
use tracing::{debug, trace, warn};

/// Queue slots; the SPSC queue keeps one slot free, so this holds 15 frames.
pub const DEFAULT_BACKLOG_CAPACITY: usize = 16;

/// Mailbox-agnostic snapshot of a fully encoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacklogEntry {
    pub frame: CanFrame,
    /// Scheduler tick at which the frame was queued.
    pub queued_at_tick: u32,
}

/// Non-blocking bounded queue with immediate success/failure results.
pub trait BacklogQueue {
    /// Hands the entry back when the queue is full.
    fn try_send(&mut self, entry: BacklogEntry) -> Result<(), BacklogEntry>;

    fn try_receive(&mut self) -> Option<BacklogEntry>;

    fn len(&self) -> usize;

    fn capacity(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct HeaplessBacklog<const N: usize> {
    queue: Queue<BacklogEntry, N>,
}

impl<const N: usize> HeaplessBacklog<N> {
    pub const fn new() -> Self {
        Self {
            queue: Queue::new(),
        }
    }
}

impl<const N: usize> Default for HeaplessBacklog<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> BacklogQueue for HeaplessBacklog<N> {
    fn try_send(&mut self, entry: BacklogEntry) -> Result<(), BacklogEntry> {
        self.queue.enqueue(entry)
    }

    fn try_receive(&mut self) -> Option<BacklogEntry> {
        self.queue.dequeue()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing was queued
    Empty,
    Sent(MailboxIndex),
    /// No mailbox was free, the entry is gone
    Discarded,
    Failed(HardwareError),
}

/// Pops at most one entry and routes it through the mailbox manager exactly
/// like a fresh frame.
pub fn drain_one<H, Q, D>(
    mailboxes: &mut MailboxManager,
    hw: &mut H,
    backlog: &mut Q,
    diagnostics: &mut D,
    tick: u32,
) -> DrainOutcome
where
    H: CanHardware + ?Sized,
    Q: BacklogQueue + ?Sized,
    D: DiagnosticsSink + ?Sized,
{
    let Some(entry) = backlog.try_receive() else {
        return DrainOutcome::Empty;
    };

    let id = entry.frame.message_id();
    let age = tick.wrapping_sub(entry.queued_at_tick);

    let Some(mailbox) = mailboxes.find_free_mailbox(hw) else {
        debug!(%id, age, "backlog frame discarded, all mailboxes pending");
        return DrainOutcome::Discarded;
    };

    match mailboxes.transmit(hw, mailbox, &entry.frame) {
        Ok(()) => {
            trace!(%id, mailbox, age, "backlog frame sent");
            DrainOutcome::Sent(mailbox)
        }
        Err(nb::Error::WouldBlock) => {
            debug!(%id, mailbox, "backlog frame discarded, mailbox became busy");
            DrainOutcome::Discarded
        }
        Err(nb::Error::Other(error)) => {
            warn!(%id, %error, "backlog frame rejected by hardware");
            diagnostics.report(
                DiagEvent::CanTxHardwareError,
                DiagSeverity::NotOk,
                DiagContext::new(tick).with_message(id).with_mailbox(mailbox),
            );
            DrainOutcome::Failed(error)
        }
    }
}
