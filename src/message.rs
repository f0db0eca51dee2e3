//! Static message table: identifiers and TX/RX descriptors.

use crate::codec::{Endianness, CAN_BYTES};
use crate::error::ConfigError;
use core::fmt;
use embedded_can::{ExtendedId, Id, StandardId};
use serde::{Deserialize, Serialize};

pub const MAX_DLC: u8 = CAN_BYTES as u8;
pub const STANDARD_ID_MAX: u32 = 0x7FF;
pub const EXTENDED_ID_MAX: u32 = 0x1FFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentifierWidth {
    /// 11-bit identifier
    Standard,
    /// 29-bit identifier
    Extended,
}

impl fmt::Display for IdentifierWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierWidth::Standard => write!(f, "standard (11-bit)"),
            IdentifierWidth::Extended => write!(f, "extended (29-bit)"),
        }
    }
}

/// CAN identifier together with its width.
///
/// Two ids with the same numeric value but different widths never compare
/// equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageId(Id);

impl MessageId {
    /// Checked constructor for identifiers that come from data.
    pub fn new(value: u32, width: IdentifierWidth) -> Result<Self, ConfigError> {
        let id = match width {
            IdentifierWidth::Standard => u16::try_from(value)
                .ok()
                .and_then(StandardId::new)
                .map(Id::Standard),
            IdentifierWidth::Extended => ExtendedId::new(value).map(Id::Extended),
        };

        id.map(Self)
            .ok_or(ConfigError::IdentifierOutOfRange { value, width })
    }

    /// Standard identifier for static tables. Out-of-range values fail
    /// constant evaluation.
    pub const fn standard(value: u16) -> Self {
        match StandardId::new(value) {
            Some(id) => Self(Id::Standard(id)),
            None => panic!("standard CAN identifier exceeds 11 bits"),
        }
    }

    /// Extended identifier for static tables.
    pub const fn extended(value: u32) -> Self {
        match ExtendedId::new(value) {
            Some(id) => Self(Id::Extended(id)),
            None => panic!("extended CAN identifier exceeds 29 bits"),
        }
    }

    pub fn value(self) -> u32 {
        match self.0 {
            Id::Standard(id) => u32::from(id.as_raw()),
            Id::Extended(id) => id.as_raw(),
        }
    }

    pub fn width(self) -> IdentifierWidth {
        match self.0 {
            Id::Standard(_) => IdentifierWidth::Standard,
            Id::Extended(_) => IdentifierWidth::Extended,
        }
    }

    pub fn is_extended(self) -> bool {
        matches!(self.0, Id::Extended(_))
    }
}

impl From<Id> for MessageId {
    fn from(id: Id) -> Self {
        Self(id)
    }
}

impl From<MessageId> for Id {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Id::Standard(id) => write!(f, "0x{:03X}", id.as_raw()),
            Id::Extended(id) => write!(f, "0x{:08X}x", id.as_raw()),
        }
    }
}

/// Index of a CAN controller node on the board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanChannel(pub u8);

impl fmt::Display for CanChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CAN{}", self.0)
    }
}

/// Declared properties of a message, handed to every encoder and handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageProperties {
    pub id: MessageId,
    pub dlc: u8,
    pub endianness: Endianness,
}

impl MessageProperties {
    pub const fn new(id: MessageId, dlc: u8, endianness: Endianness) -> Self {
        Self {
            id,
            dlc,
            endianness,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.dlc > MAX_DLC {
            return Err(ConfigError::InvalidDataLength {
                id: self.id,
                dlc: self.dlc,
            });
        }
        Ok(())
    }
}

/// Produces the 64-bit payload word of an outgoing message from the
/// application data source `S`.
pub type TxEncoder<S> = fn(&MessageProperties, &S) -> u64;

/// Consumes a received payload into the application data sink `S`.
pub type RxHandler<S> = fn(&MessageProperties, &[u8; CAN_BYTES], &mut S);

pub struct TxMessageDescriptor<S> {
    pub properties: MessageProperties,
    /// Repetition interval, 0 for messages only sent on demand.
    pub period_ms: u32,
    pub phase_ms: u32,
    pub encoder: Option<TxEncoder<S>>,
}

impl<S> TxMessageDescriptor<S> {
    pub const fn periodic(
        properties: MessageProperties,
        period_ms: u32,
        phase_ms: u32,
        encoder: TxEncoder<S>,
    ) -> Self {
        Self {
            properties,
            period_ms,
            phase_ms,
            encoder: Some(encoder),
        }
    }

    pub const fn on_demand(properties: MessageProperties, encoder: TxEncoder<S>) -> Self {
        Self {
            properties,
            period_ms: 0,
            phase_ms: 0,
            encoder: Some(encoder),
        }
    }

    pub fn is_periodic(&self) -> bool {
        self.period_ms > 0
    }
}

impl<S> fmt::Debug for TxMessageDescriptor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxMessageDescriptor")
            .field("properties", &self.properties)
            .field("period_ms", &self.period_ms)
            .field("phase_ms", &self.phase_ms)
            .field("encoder", &self.encoder.is_some())
            .finish()
    }
}

pub struct RxMessageDescriptor<S> {
    pub properties: MessageProperties,
    /// Controller node the message is expected on.
    pub channel: CanChannel,
    /// `None` keeps the message in the table but marks it unused.
    pub handler: Option<RxHandler<S>>,
}

impl<S> RxMessageDescriptor<S> {
    pub const fn new(
        properties: MessageProperties,
        channel: CanChannel,
        handler: Option<RxHandler<S>>,
    ) -> Self {
        Self {
            properties,
            channel,
            handler,
        }
    }

    pub const fn handled(
        properties: MessageProperties,
        channel: CanChannel,
        handler: RxHandler<S>,
    ) -> Self {
        Self::new(properties, channel, Some(handler))
    }

    pub const fn unused(properties: MessageProperties, channel: CanChannel) -> Self {
        Self::new(properties, channel, None)
    }

    pub fn matches(&self, id: MessageId, channel: CanChannel) -> bool {
        self.properties.id == id && self.channel == channel
    }
}

impl<S> fmt::Debug for RxMessageDescriptor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RxMessageDescriptor")
            .field("properties", &self.properties)
            .field("channel", &self.channel)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// The process-wide, read-only message configuration.
pub struct MessageTable<'a, S> {
    pub tx: &'a [TxMessageDescriptor<S>],
    pub rx: &'a [RxMessageDescriptor<S>],
}

impl<'a, S> MessageTable<'a, S> {
    pub const fn new(tx: &'a [TxMessageDescriptor<S>], rx: &'a [RxMessageDescriptor<S>]) -> Self {
        Self { tx, rx }
    }

    pub fn find_tx(&self, id: MessageId) -> Option<(usize, &'a TxMessageDescriptor<S>)> {
        self.tx
            .iter()
            .enumerate()
            .find(|(_, descriptor)| descriptor.properties.id == id)
    }

    /// Checks data lengths and rejects transmit ids configured twice.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, descriptor) in self.tx.iter().enumerate() {
            descriptor.properties.validate()?;

            let id = descriptor.properties.id;
            if self.tx[..index].iter().any(|other| other.properties.id == id) {
                return Err(ConfigError::DuplicateTxMessage { id });
            }
        }

        for descriptor in self.rx {
            descriptor.properties.validate()?;
        }

        Ok(())
    }
}

impl<S> Clone for MessageTable<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for MessageTable<'_, S> {}

impl<S> fmt::Debug for MessageTable<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageTable")
            .field("tx", &self.tx)
            .field("rx", &self.rx)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero(_: &MessageProperties, _: &()) -> u64 {
        0
    }

    #[test]
    fn test_identifier_width_is_part_of_identity() {
        let standard = MessageId::new(0x120, IdentifierWidth::Standard).unwrap();
        let extended = MessageId::new(0x120, IdentifierWidth::Extended).unwrap();

        assert_eq!(standard.value(), extended.value());
        assert_ne!(standard, extended);
        assert_eq!(standard, MessageId::standard(0x120));
        assert!(extended.is_extended());
    }

    #[test]
    fn test_identifier_out_of_range_is_rejected() {
        assert_eq!(
            MessageId::new(0x800, IdentifierWidth::Standard),
            Err(ConfigError::IdentifierOutOfRange {
                value: 0x800,
                width: IdentifierWidth::Standard
            })
        );
        assert!(MessageId::new(0x2000_0000, IdentifierWidth::Extended).is_err());
        assert!(MessageId::new(0x1FFF_FFFF, IdentifierWidth::Extended).is_ok());
    }

    #[test]
    fn test_embedded_can_conversion() {
        let id = MessageId::extended(0x18FF_50E5);
        let raw: Id = id.into();
        assert_eq!(MessageId::from(raw), id);
        assert_eq!(format!("{id}"), "0x18FF50E5x");
        assert_eq!(format!("{}", MessageId::standard(0x7)), "0x007");
    }

    #[test]
    fn test_table_rejects_duplicate_tx() {
        let props = MessageProperties::new(MessageId::standard(0x100), 8, Endianness::BigEndian);
        let tx = [
            TxMessageDescriptor::periodic(props, 100, 0, zero),
            TxMessageDescriptor::on_demand(props, zero),
        ];
        let table: MessageTable<'_, ()> = MessageTable::new(&tx, &[]);

        assert_eq!(
            table.validate(),
            Err(ConfigError::DuplicateTxMessage {
                id: MessageId::standard(0x100)
            })
        );
    }

    #[test]
    fn test_table_rejects_long_frames() {
        let props = MessageProperties::new(MessageId::standard(0x100), 9, Endianness::BigEndian);
        let tx = [TxMessageDescriptor::periodic(props, 100, 0, zero)];
        let table: MessageTable<'_, ()> = MessageTable::new(&tx, &[]);

        assert!(matches!(
            table.validate(),
            Err(ConfigError::InvalidDataLength { dlc: 9, .. })
        ));
    }
}
