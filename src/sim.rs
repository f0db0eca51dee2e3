//! In-memory CAN controller used by the simulator binary and the tests.

use crate::codec::CAN_BYTES;
use crate::error::HardwareError;
use crate::frame::{CanFrame, RawIdentifier};
use crate::mailbox::{CanHardware, MailboxIndex, MAX_MAILBOXES};
use crate::message::CanChannel;
use heapless::Vec;
use tracing::trace;

const SENT_LOG_CAPACITY: usize = 256;

/// Error code reported when a mailbox holds an identifier that cannot be
/// decoded at transmit time.
pub const INVALID_IDENTIFIER_CODE: u8 = 0xFF;
/// Error code reported for mailbox indices the controller does not have.
pub const NO_SUCH_MAILBOX_CODE: u8 = 0xFE;

#[derive(Debug, Clone, Copy, Default)]
struct SimMailbox {
    arbitration: RawIdentifier,
    data: [u8; CAN_BYTES],
    dlc: u8,
    /// Ticks until the current transmission completes
    pending_ticks: u32,
    stalled: bool,
    new_data: bool,
}

impl SimMailbox {
    fn is_pending(&self) -> bool {
        self.stalled || self.pending_ticks > 0
    }
}

#[derive(Debug)]
pub struct SimulatedCan {
    channel: CanChannel,
    mailboxes: [SimMailbox; MAX_MAILBOXES],
    latency_ticks: u32,
    fail_next: Option<u8>,
    sent: Vec<CanFrame, SENT_LOG_CAPACITY>,
    sent_total: u64,
}

impl SimulatedCan {
    /// Controller whose transmissions complete immediately.
    pub fn new(channel: CanChannel) -> Self {
        Self {
            channel,
            mailboxes: [SimMailbox::default(); MAX_MAILBOXES],
            latency_ticks: 0,
            fail_next: None,
            sent: Vec::new(),
            sent_total: 0,
        }
    }

    /// Keeps each mailbox pending for `ticks` calls to [`advance`] after a
    /// transmit request.
    ///
    /// [`advance`]: SimulatedCan::advance
    #[must_use]
    pub fn with_latency(mut self, ticks: u32) -> Self {
        self.latency_ticks = ticks;
        self
    }

    pub fn set_stalled(&mut self, mailbox: MailboxIndex, stalled: bool) {
        if let Some(slot) = self.mailboxes.get_mut(usize::from(mailbox)) {
            slot.stalled = stalled;
        }
    }

    pub fn set_all_stalled(&mut self, stalled: bool) {
        for slot in &mut self.mailboxes {
            slot.stalled = stalled;
        }
    }

    /// Makes the next transmit request fail with `code`.
    pub fn fail_next_transmit(&mut self, code: u8) {
        self.fail_next = Some(code);
    }

    /// Places a received frame into `mailbox` as the controller's acceptance
    /// filter would.
    pub fn inject_receive(
        &mut self,
        mailbox: MailboxIndex,
        raw: RawIdentifier,
        data: [u8; CAN_BYTES],
        dlc: u8,
    ) {
        if let Some(slot) = self.mailboxes.get_mut(usize::from(mailbox)) {
            slot.arbitration = raw;
            slot.data = data;
            slot.dlc = dlc;
            slot.new_data = true;
        }
    }

    pub fn inject_frame(&mut self, mailbox: MailboxIndex, frame: &CanFrame) {
        self.inject_receive(
            mailbox,
            RawIdentifier::from_id(frame.message_id()),
            *frame.bytes(),
            frame.dlc_byte(),
        );
    }

    /// One bus time step: in-flight transmissions move toward completion.
    pub fn advance(&mut self) {
        for slot in &mut self.mailboxes {
            slot.pending_ticks = slot.pending_ticks.saturating_sub(1);
        }
    }

    /// Most recent transmitted frames, oldest first.
    pub fn sent_frames(&self) -> &[CanFrame] {
        &self.sent
    }

    pub fn sent_count(&self) -> u64 {
        self.sent_total
    }

    fn record(&mut self, frame: CanFrame) {
        if self.sent.is_full() {
            self.sent.remove(0);
        }
        // Room was made above
        let _ = self.sent.push(frame);
        self.sent_total += 1;
    }
}

impl CanHardware for SimulatedCan {
    fn channel(&self) -> CanChannel {
        self.channel
    }

    fn is_mailbox_pending(&self, mailbox: MailboxIndex) -> bool {
        self.mailboxes
            .get(usize::from(mailbox))
            .is_none_or(SimMailbox::is_pending)
    }

    fn update_identifier(&mut self, mailbox: MailboxIndex, raw: RawIdentifier) {
        if let Some(slot) = self.mailboxes.get_mut(usize::from(mailbox)) {
            slot.arbitration = raw;
        }
    }

    fn transmit(
        &mut self,
        mailbox: MailboxIndex,
        data: &[u8; CAN_BYTES],
        dlc: u8,
    ) -> nb::Result<(), HardwareError> {
        let latency = self.latency_ticks;
        let Some(slot) = self.mailboxes.get_mut(usize::from(mailbox)) else {
            return Err(nb::Error::Other(HardwareError {
                mailbox,
                code: NO_SUCH_MAILBOX_CODE,
            }));
        };

        if slot.is_pending() {
            return Err(nb::Error::WouldBlock);
        }
        if let Some(code) = self.fail_next.take() {
            return Err(nb::Error::Other(HardwareError { mailbox, code }));
        }

        let Some(id) = slot.arbitration.message_id() else {
            return Err(nb::Error::Other(HardwareError {
                mailbox,
                code: INVALID_IDENTIFIER_CODE,
            }));
        };

        slot.data = *data;
        slot.dlc = dlc;
        slot.pending_ticks = latency;

        trace!(channel = %self.channel, mailbox, %id, dlc, "simulated transmit");
        self.record(CanFrame::from_parts(id, *data, dlc));
        Ok(())
    }

    fn has_new_data(&self, mailbox: MailboxIndex) -> bool {
        self.mailboxes
            .get(usize::from(mailbox))
            .is_some_and(|slot| slot.new_data)
    }

    fn raw_identifier(&self, mailbox: MailboxIndex) -> RawIdentifier {
        self.mailboxes
            .get(usize::from(mailbox))
            .map_or(RawIdentifier::default(), |slot| slot.arbitration)
    }

    fn raw_payload(&mut self, mailbox: MailboxIndex) -> [u8; CAN_BYTES] {
        match self.mailboxes.get_mut(usize::from(mailbox)) {
            Some(slot) => {
                slot.new_data = false;
                slot.data
            }
            None => [0; CAN_BYTES],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageId;

    #[test]
    fn test_latency_keeps_mailbox_pending() {
        let mut hw = SimulatedCan::new(CanChannel(1)).with_latency(2);
        hw.update_identifier(3, RawIdentifier::from_id(MessageId::standard(0x220)));

        assert!(hw.transmit(3, &[1; 8], 8).is_ok());
        assert!(hw.is_mailbox_pending(3));
        assert_eq!(hw.transmit(3, &[2; 8], 8), Err(nb::Error::WouldBlock));

        hw.advance();
        assert!(hw.is_mailbox_pending(3));
        hw.advance();
        assert!(!hw.is_mailbox_pending(3));
        assert_eq!(hw.sent_count(), 1);
    }

    #[test]
    fn test_receive_clears_new_data() {
        let mut hw = SimulatedCan::new(CanChannel(0));
        let frame = CanFrame::from_parts(MessageId::standard(0x230), [9; 8], 8);
        hw.inject_frame(12, &frame);

        assert!(hw.has_new_data(12));
        assert_eq!(hw.raw_identifier(12).message_id(), Some(MessageId::standard(0x230)));
        assert_eq!(hw.raw_payload(12), [9; 8]);
        assert!(!hw.has_new_data(12));
    }

    #[test]
    fn test_unknown_mailbox() {
        let mut hw = SimulatedCan::new(CanChannel(0));
        let outside = MAX_MAILBOXES as MailboxIndex;

        assert!(hw.is_mailbox_pending(outside));
        assert_eq!(
            hw.transmit(outside, &[0; 8], 0),
            Err(nb::Error::Other(HardwareError {
                mailbox: outside,
                code: NO_SUCH_MAILBOX_CODE
            }))
        );
    }
}
