//! Wire frames and the controller's arbitration-register identifier layout.

use crate::codec::CAN_BYTES;
use crate::message::{IdentifierWidth, MessageId, EXTENDED_ID_MAX, MAX_DLC, STANDARD_ID_MAX};
use embedded_can::{Frame, Id};

const EXTENDED_FLAG: u32 = 1 << 30;
const STANDARD_ID_SHIFT: u32 = 18;

/// Identifier as stored in a mailbox arbitration register: bit 30 flags an
/// extended frame, standard ids live in bits 28..18, extended ids in 28..0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawIdentifier(pub u32);

impl RawIdentifier {
    pub fn from_id(id: MessageId) -> Self {
        match id.width() {
            IdentifierWidth::Standard => Self(id.value() << STANDARD_ID_SHIFT),
            IdentifierWidth::Extended => Self(EXTENDED_FLAG | id.value()),
        }
    }

    pub fn width(self) -> IdentifierWidth {
        if self.0 & EXTENDED_FLAG == 0 {
            IdentifierWidth::Standard
        } else {
            IdentifierWidth::Extended
        }
    }

    /// Masks and shifts the register down to the application-level id.
    pub fn message_id(self) -> Option<MessageId> {
        let width = self.width();
        let value = match width {
            IdentifierWidth::Standard => (self.0 >> STANDARD_ID_SHIFT) & STANDARD_ID_MAX,
            IdentifierWidth::Extended => self.0 & EXTENDED_ID_MAX,
        };
        MessageId::new(value, width).ok()
    }
}

/// A classic CAN data frame with up to eight payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: MessageId,
    dlc: u8,
    data: [u8; CAN_BYTES],
}

impl CanFrame {
    pub fn from_parts(id: MessageId, data: [u8; CAN_BYTES], dlc: u8) -> Self {
        assert!(dlc <= MAX_DLC, "data length {dlc} exceeds a classic CAN frame");
        Self { id, dlc, data }
    }

    pub fn message_id(&self) -> MessageId {
        self.id
    }

    pub fn dlc_byte(&self) -> u8 {
        self.dlc
    }

    /// All eight payload bytes, including the ones past the data length.
    pub fn bytes(&self) -> &[u8; CAN_BYTES] {
        &self.data
    }
}

impl Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > CAN_BYTES {
            return None;
        }
        let mut bytes = [0u8; CAN_BYTES];
        bytes[..data.len()].copy_from_slice(data);

        Some(Self {
            id: MessageId::from(id.into()),
            dlc: data.len() as u8,
            data: bytes,
        })
    }

    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        // Remote frames are not used on the vehicle network
        None
    }

    fn is_extended(&self) -> bool {
        self.id.is_extended()
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        self.id.into()
    }

    fn dlc(&self) -> usize {
        usize::from(self.dlc)
    }

    fn data(&self) -> &[u8] {
        &self.data[..usize::from(self.dlc)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_identifier_layout() {
        let standard = RawIdentifier::from_id(MessageId::standard(0x7FF));
        assert_eq!(standard.0, 0x7FF << 18);
        assert_eq!(standard.width(), IdentifierWidth::Standard);
        assert_eq!(standard.message_id(), Some(MessageId::standard(0x7FF)));

        let extended = RawIdentifier::from_id(MessageId::extended(0x7FF));
        assert_eq!(extended.0, (1 << 30) | 0x7FF);
        assert_eq!(extended.message_id(), Some(MessageId::extended(0x7FF)));
        assert_ne!(standard.message_id(), extended.message_id());
    }

    #[test]
    fn test_raw_identifier_ignores_status_bits() {
        // Message-valid and direction bits sit above the identifier
        let raw = RawIdentifier((1 << 31) | (1 << 29) | (0x123 << 18));
        assert_eq!(raw.message_id(), Some(MessageId::standard(0x123)));
    }

    #[test]
    fn test_frame_trait() {
        let frame = CanFrame::new(MessageId::standard(0x220), &[1, 2, 3]).unwrap();
        assert_eq!(frame.dlc(), 3);
        assert_eq!(frame.data(), &[1, 2, 3]);
        assert_eq!(frame.bytes(), &[1, 2, 3, 0, 0, 0, 0, 0]);
        assert!(!frame.is_extended());
        assert!(CanFrame::new(MessageId::standard(0x220), &[0; 9]).is_none());
        assert!(CanFrame::new_remote(MessageId::standard(0x220), 0).is_none());
    }

    #[test]
    #[should_panic(expected = "exceeds a classic CAN frame")]
    fn test_data_length_above_eight_rejected() {
        CanFrame::from_parts(MessageId::standard(0x100), [0; 8], 12);
    }
}
