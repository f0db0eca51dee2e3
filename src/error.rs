use crate::message::{IdentifierWidth, MessageId};
use thiserror::Error;

/// Build-time configuration defects. The bus refuses to start on any of
/// these; callers are expected to treat them as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("scheduler tick length must be non-zero")]
    ZeroTick,

    #[error("message {id}: period {period_ms} ms is not a multiple of the {tick_ms} ms tick")]
    PeriodNotMultipleOfTick {
        id: MessageId,
        period_ms: u32,
        tick_ms: u32,
    },

    #[error("message {id}: phase {phase_ms} ms is not a multiple of the {tick_ms} ms tick")]
    PhaseNotMultipleOfTick {
        id: MessageId,
        phase_ms: u32,
        tick_ms: u32,
    },

    #[error("message {id}: phase {phase_ms} ms must be below the period of {period_ms} ms")]
    PhaseNotBelowPeriod {
        id: MessageId,
        phase_ms: u32,
        period_ms: u32,
    },

    #[error("identifier {value:#X} does not fit a {width} identifier")]
    IdentifierOutOfRange { value: u32, width: IdentifierWidth },

    #[error("message {id}: data length {dlc} exceeds 8 bytes")]
    InvalidDataLength { id: MessageId, dlc: u8 },

    #[error("transmit message {id} is configured more than once")]
    DuplicateTxMessage { id: MessageId },

    #[error("{count} transmit messages exceed the table capacity of {capacity}")]
    TooManyMessages { count: usize, capacity: usize },

    #[error("{0} mailbox range is empty or exceeds the controller")]
    InvalidMailboxRange(&'static str),

    #[error("transmit and receive mailbox ranges overlap")]
    OverlappingMailboxRanges,

    #[error("backlog drain rate must be at least one tick")]
    ZeroDrainRate,

    #[error("least common multiple of all periods overflows the cycle counter")]
    CycleOverflow,
}

/// Rejection reported by the CAN controller for a transmit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("CAN controller rejected mailbox {mailbox} (code {code})")]
pub struct HardwareError {
    pub mailbox: u8,
    pub code: u8,
}

/// Failure of an on-demand transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("message {0} is not in the transmit table")]
    UnknownMessage(MessageId),

    #[error("message {0} dropped: no free mailbox and backlog full")]
    Dropped(MessageId),

    #[error("message {id} rejected by hardware")]
    Hardware {
        id: MessageId,
        #[source]
        source: HardwareError,
    },
}
