use crate::error::ConfigError;
use crate::mailbox::{MailboxRange, MAX_MAILBOXES};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

pub const DEFAULT_TICK_MS: u32 = 10;
pub const DEFAULT_TX_MAILBOX_FIRST: u8 = 1;
pub const DEFAULT_TX_MAILBOX_COUNT: u8 = 8;
pub const DEFAULT_RX_MAILBOX_FIRST: u8 = 9;
pub const DEFAULT_RX_MAILBOX_COUNT: u8 = 24;

const_assert!(DEFAULT_TX_MAILBOX_FIRST as usize + DEFAULT_TX_MAILBOX_COUNT as usize <= DEFAULT_RX_MAILBOX_FIRST as usize);
const_assert!(DEFAULT_RX_MAILBOX_FIRST as usize + DEFAULT_RX_MAILBOX_COUNT as usize <= MAX_MAILBOXES);

/// Order in which transmit mailboxes are probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MailboxScan {
    /// Always start at the first mailbox of the range
    Fixed,
    /// Start after the mailbox handed out last
    RoundRobin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanConfig {
    pub tick_ms: u32,
    pub tx_mailbox_first: u8,
    pub tx_mailbox_count: u8,
    pub rx_mailbox_first: u8,
    pub rx_mailbox_count: u8,
    /// Backlog drain rate in scheduler ticks.
    pub drain_every_ticks: u32,
    pub mailbox_scan: MailboxScan,
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_TICK_MS,
            tx_mailbox_first: DEFAULT_TX_MAILBOX_FIRST,
            tx_mailbox_count: DEFAULT_TX_MAILBOX_COUNT,
            rx_mailbox_first: DEFAULT_RX_MAILBOX_FIRST,
            rx_mailbox_count: DEFAULT_RX_MAILBOX_COUNT,
            drain_every_ticks: 1,
            mailbox_scan: MailboxScan::RoundRobin,
        }
    }
}

impl CanConfig {
    pub fn tx_mailboxes(&self) -> MailboxRange {
        MailboxRange::new(self.tx_mailbox_first, self.tx_mailbox_count)
    }

    pub fn rx_mailboxes(&self) -> MailboxRange {
        MailboxRange::new(self.rx_mailbox_first, self.rx_mailbox_count)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }
        if self.drain_every_ticks == 0 {
            return Err(ConfigError::ZeroDrainRate);
        }

        let tx = self.tx_mailboxes();
        let rx = self.rx_mailboxes();
        if tx.count == 0 || tx.end() > MAX_MAILBOXES {
            return Err(ConfigError::InvalidMailboxRange("transmit"));
        }
        if rx.count == 0 || rx.end() > MAX_MAILBOXES {
            return Err(ConfigError::InvalidMailboxRange("receive"));
        }
        if tx.overlaps(&rx) {
            return Err(ConfigError::OverlappingMailboxRanges);
        }

        Ok(())
    }
}
