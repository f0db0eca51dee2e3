use crate::backlog::{drain_one, BacklogEntry, BacklogQueue, DrainOutcome};
use crate::codec::pack_frame;
use crate::diag::{DiagContext, DiagEvent, DiagSeverity, DiagnosticsSink};
use crate::error::HardwareError;
use crate::frame::CanFrame;
use crate::mailbox::{CanHardware, MailboxIndex, MailboxManager};
use crate::message::TxMessageDescriptor;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Sent(MailboxIndex),
    /// Parked in the backlog for a later drain pass
    Queued,
    /// No mailbox and no backlog room
    Dropped,
    Failed(HardwareError),
}

/// Produces wire frames for due messages and places them into mailboxes,
/// diverting to the backlog when every mailbox is busy.
#[derive(Debug, Clone)]
pub struct TransmitDispatcher {
    mailboxes: MailboxManager,
}

impl TransmitDispatcher {
    pub fn new(mailboxes: MailboxManager) -> Self {
        Self { mailboxes }
    }

    pub fn mailboxes(&self) -> &MailboxManager {
        &self.mailboxes
    }

    /// Runs the encoder and packs the payload word in the message's byte
    /// order. Messages without an encoder carry an all-zero payload.
    pub fn encode<S>(descriptor: &TxMessageDescriptor<S>, source: &S) -> CanFrame {
        let properties = &descriptor.properties;
        let word = descriptor
            .encoder
            .map_or(0, |encode| encode(properties, source));

        CanFrame::from_parts(
            properties.id,
            pack_frame(word, properties.endianness),
            properties.dlc,
        )
    }

    pub fn dispatch<S, H, Q, D>(
        &mut self,
        descriptor: &TxMessageDescriptor<S>,
        source: &S,
        hw: &mut H,
        backlog: &mut Q,
        diagnostics: &mut D,
        tick: u32,
    ) -> TxOutcome
    where
        H: CanHardware + ?Sized,
        Q: BacklogQueue + ?Sized,
        D: DiagnosticsSink + ?Sized,
    {
        let frame = Self::encode(descriptor, source);
        self.send_frame(frame, hw, backlog, diagnostics, tick)
    }

    pub fn send_frame<H, Q, D>(
        &mut self,
        frame: CanFrame,
        hw: &mut H,
        backlog: &mut Q,
        diagnostics: &mut D,
        tick: u32,
    ) -> TxOutcome
    where
        H: CanHardware + ?Sized,
        Q: BacklogQueue + ?Sized,
        D: DiagnosticsSink + ?Sized,
    {
        let id = frame.message_id();

        let Some(mailbox) = self.mailboxes.find_free_mailbox(hw) else {
            return Self::enqueue(frame, backlog, diagnostics, tick);
        };

        match self.mailboxes.transmit(hw, mailbox, &frame) {
            Ok(()) => {
                trace!(%id, mailbox, "frame handed to mailbox");
                TxOutcome::Sent(mailbox)
            }
            // Lost the mailbox between the scan and the request
            Err(nb::Error::WouldBlock) => Self::enqueue(frame, backlog, diagnostics, tick),
            Err(nb::Error::Other(error)) => {
                warn!(%id, %error, "transmit request rejected");
                diagnostics.report(
                    DiagEvent::CanTxHardwareError,
                    DiagSeverity::NotOk,
                    DiagContext::new(tick).with_message(id).with_mailbox(mailbox),
                );
                TxOutcome::Failed(error)
            }
        }
    }

    fn enqueue<Q, D>(frame: CanFrame, backlog: &mut Q, diagnostics: &mut D, tick: u32) -> TxOutcome
    where
        Q: BacklogQueue + ?Sized,
        D: DiagnosticsSink + ?Sized,
    {
        let id = frame.message_id();
        let context = DiagContext::new(tick).with_message(id);
        let entry = BacklogEntry {
            frame,
            queued_at_tick: tick,
        };

        if backlog.try_send(entry).is_ok() {
            debug!(%id, queued = backlog.len(), "no free mailbox, frame queued");
            diagnostics.report(DiagEvent::CanTxQueueUsed, DiagSeverity::Ok, context);
            TxOutcome::Queued
        } else {
            warn!(%id, capacity = backlog.capacity(), "backlog full, frame dropped");
            diagnostics.report(DiagEvent::CanTxQueueFull, DiagSeverity::NotOk, context);
            TxOutcome::Dropped
        }
    }

    pub fn drain_backlog<H, Q, D>(
        &mut self,
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
        drain_one(&mut self.mailboxes, hw, backlog, diagnostics, tick)
    }
}
