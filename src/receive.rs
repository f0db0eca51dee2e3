use crate::mailbox::{CanHardware, MailboxIndex, MailboxRange};
use crate::message::RxMessageDescriptor;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Event for a mailbox outside the receive range
    OutsideRxRange,
    /// Spurious event, nothing new in the mailbox
    NoNewData,
    /// Identifier, width or channel matched no table entry
    NoMatch,
    /// Matched an entry without a handler
    NoHandler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxOutcome {
    /// Index of the receive descriptor whose handler ran
    Dispatched(usize),
    Ignored(IgnoreReason),
}

/// Routes a receive event to the handler of the first matching descriptor.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveDispatcher {
    range: MailboxRange,
}

impl ReceiveDispatcher {
    pub fn new(range: MailboxRange) -> Self {
        Self { range }
    }

    pub fn range(&self) -> MailboxRange {
        self.range
    }

    /// Handles one "new data" event. The payload is only read, and the
    /// new-data flag only cleared, when a handler is going to consume it.
    pub fn on_receive_event<S, H>(
        &self,
        descriptors: &[RxMessageDescriptor<S>],
        hw: &mut H,
        mailbox: MailboxIndex,
        sink: &mut S,
    ) -> RxOutcome
    where
        H: CanHardware + ?Sized,
    {
        if !self.range.contains(mailbox) {
            debug!(mailbox, "receive event outside receive mailboxes");
            return RxOutcome::Ignored(IgnoreReason::OutsideRxRange);
        }
        if !hw.has_new_data(mailbox) {
            return RxOutcome::Ignored(IgnoreReason::NoNewData);
        }

        let channel = hw.channel();
        let Some(id) = hw.raw_identifier(mailbox).message_id() else {
            return RxOutcome::Ignored(IgnoreReason::NoMatch);
        };

        let Some((index, descriptor)) = descriptors
            .iter()
            .enumerate()
            .find(|(_, descriptor)| descriptor.matches(id, channel))
        else {
            trace!(%id, %channel, mailbox, "no receive entry for frame");
            return RxOutcome::Ignored(IgnoreReason::NoMatch);
        };

        let Some(handler) = descriptor.handler else {
            trace!(%id, %channel, "receive entry has no handler");
            return RxOutcome::Ignored(IgnoreReason::NoHandler);
        };

        let payload = hw.raw_payload(mailbox);
        handler(&descriptor.properties, &payload, sink);
        trace!(%id, %channel, mailbox, "frame dispatched");

        RxOutcome::Dispatched(index)
    }
}
