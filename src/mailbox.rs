//! Hardware collaborator interface and transmit mailbox arbitration.

use crate::codec::CAN_BYTES;
use crate::config::MailboxScan;
use crate::error::HardwareError;
use crate::frame::{CanFrame, RawIdentifier};
use crate::message::CanChannel;
use static_assertions::const_assert;

pub type MailboxIndex = u8;

/// Message objects available on one controller node.
pub const MAX_MAILBOXES: usize = 64;

const_assert!(MAX_MAILBOXES <= u8::MAX as usize);

/// Access to one CAN controller node. The hardware is the source of truth
/// for mailbox state; every call is short and non-blocking.
pub trait CanHardware {
    fn channel(&self) -> CanChannel;

    fn is_mailbox_pending(&self, mailbox: MailboxIndex) -> bool;

    fn update_identifier(&mut self, mailbox: MailboxIndex, raw: RawIdentifier);

    /// Requests transmission of the mailbox content. `WouldBlock` means the
    /// mailbox turned out to be occupied.
    fn transmit(
        &mut self,
        mailbox: MailboxIndex,
        data: &[u8; CAN_BYTES],
        dlc: u8,
    ) -> nb::Result<(), HardwareError>;

    fn has_new_data(&self, mailbox: MailboxIndex) -> bool;

    fn raw_identifier(&self, mailbox: MailboxIndex) -> RawIdentifier;

    /// Reads the received payload; clears the new-data flag.
    fn raw_payload(&mut self, mailbox: MailboxIndex) -> [u8; CAN_BYTES];
}

/// Contiguous range of mailboxes on a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxRange {
    pub first: MailboxIndex,
    pub count: u8,
}

impl MailboxRange {
    pub const fn new(first: MailboxIndex, count: u8) -> Self {
        Self { first, count }
    }

    pub fn contains(&self, mailbox: MailboxIndex) -> bool {
        mailbox >= self.first && usize::from(mailbox) < self.end()
    }

    /// One past the last mailbox.
    pub fn end(&self) -> usize {
        usize::from(self.first) + usize::from(self.count)
    }

    pub fn overlaps(&self, other: &MailboxRange) -> bool {
        usize::from(self.first) < other.end() && usize::from(other.first) < self.end()
    }

    pub fn iter(&self) -> impl Iterator<Item = MailboxIndex> {
        let first = self.first;
        (0..self.count).map(move |offset| first + offset)
    }
}

#[derive(Debug, Clone)]
pub struct MailboxManager {
    range: MailboxRange,
    scan: MailboxScan,
    next_offset: u8,
}

impl MailboxManager {
    pub fn new(range: MailboxRange, scan: MailboxScan) -> Self {
        debug_assert!(range.count > 0, "transmit mailbox range is empty");
        debug_assert!(
            range.end() <= MAX_MAILBOXES,
            "mailbox range ends at {} beyond {}",
            range.end(),
            MAX_MAILBOXES
        );

        Self {
            range,
            scan,
            next_offset: 0,
        }
    }

    pub fn range(&self) -> MailboxRange {
        self.range
    }

    /// Returns the first mailbox that is not pending, scanning from the
    /// rotating start index, or `None` when all are busy.
    pub fn find_free_mailbox<H: CanHardware + ?Sized>(&mut self, hw: &H) -> Option<MailboxIndex> {
        let count = self.range.count;
        if count == 0 {
            return None;
        }

        let start = match self.scan {
            MailboxScan::Fixed => 0,
            MailboxScan::RoundRobin => self.next_offset,
        };

        let first = self.range.first;
        let offset = (0..count)
            .map(|step| ((u16::from(start) + u16::from(step)) % u16::from(count)) as u8)
            .find(|&offset| !hw.is_mailbox_pending(first + offset))?;

        self.next_offset = (offset + 1) % count;
        Some(first + offset)
    }

    /// Loads identifier and payload into `mailbox` and requests transmission.
    pub fn transmit<H: CanHardware + ?Sized>(
        &self,
        hw: &mut H,
        mailbox: MailboxIndex,
        frame: &CanFrame,
    ) -> nb::Result<(), HardwareError> {
        debug_assert!(
            self.range.contains(mailbox),
            "mailbox {mailbox} is not a transmit mailbox"
        );

        hw.update_identifier(mailbox, RawIdentifier::from_id(frame.message_id()));
        hw.transmit(mailbox, frame.bytes(), frame.dlc_byte())
    }

    pub fn pending_count<H: CanHardware + ?Sized>(&self, hw: &H) -> usize {
        self.range
            .iter()
            .filter(|&mailbox| hw.is_mailbox_pending(mailbox))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageId;
    use crate::sim::SimulatedCan;

    #[test]
    fn test_range_overlap() {
        let tx = MailboxRange::new(1, 8);
        assert!(tx.contains(1));
        assert!(tx.contains(8));
        assert!(!tx.contains(9));
        assert!(!tx.overlaps(&MailboxRange::new(9, 4)));
        assert!(tx.overlaps(&MailboxRange::new(8, 4)));
        assert_eq!(tx.iter().count(), 8);
    }

    #[test]
    fn test_round_robin_scan() {
        let hw = SimulatedCan::new(CanChannel(0));
        let mut manager = MailboxManager::new(MailboxRange::new(1, 3), MailboxScan::RoundRobin);

        assert_eq!(manager.find_free_mailbox(&hw), Some(1));
        assert_eq!(manager.find_free_mailbox(&hw), Some(2));
        assert_eq!(manager.find_free_mailbox(&hw), Some(3));
        assert_eq!(manager.find_free_mailbox(&hw), Some(1));
    }

    #[test]
    fn test_fixed_scan_skips_pending() {
        let mut hw = SimulatedCan::new(CanChannel(0));
        hw.set_stalled(1, true);
        let mut manager = MailboxManager::new(MailboxRange::new(1, 3), MailboxScan::Fixed);

        assert_eq!(manager.find_free_mailbox(&hw), Some(2));
        assert_eq!(manager.find_free_mailbox(&hw), Some(2));

        hw.set_stalled(2, true);
        hw.set_stalled(3, true);
        assert_eq!(manager.find_free_mailbox(&hw), None);
        assert_eq!(manager.pending_count(&hw), 3);
    }

    #[test]
    fn test_transmit_loads_identifier() {
        let mut hw = SimulatedCan::new(CanChannel(0));
        let manager = MailboxManager::new(MailboxRange::new(1, 2), MailboxScan::Fixed);
        let frame = CanFrame::from_parts(MessageId::extended(0x1234), [0xAA; 8], 4);

        assert!(manager.transmit(&mut hw, 2, &frame).is_ok());
        assert_eq!(hw.raw_identifier(2), RawIdentifier::from_id(MessageId::extended(0x1234)));
        assert_eq!(hw.sent_frames().last(), Some(&frame));
    }

    #[test]
    fn test_round_robin_skips_pending() {
        let mut hw = SimulatedCan::new(CanChannel(0));
        let mut manager = MailboxManager::new(MailboxRange::new(1, 3), MailboxScan::RoundRobin);

        assert_eq!(manager.find_free_mailbox(&hw), Some(1));

        hw.set_stalled(2, true);
        assert_eq!(manager.find_free_mailbox(&hw), Some(3));
        // Wraps past the stalled mailbox back to the start of the range
        assert_eq!(manager.find_free_mailbox(&hw), Some(1));
        assert_eq!(manager.find_free_mailbox(&hw), Some(3));

        hw.set_stalled(2, false);
        assert_eq!(manager.find_free_mailbox(&hw), Some(1));
        assert_eq!(manager.find_free_mailbox(&hw), Some(2));
    }
}
