//! Diagnostic reporting for recoverable transmit conditions.

use crate::mailbox::MailboxIndex;
use crate::message::MessageId;
use core::fmt;
use heapless::HistoryBuffer;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagEvent {
    /// No mailbox was free; the frame went to the backlog
    CanTxQueueUsed,
    /// No mailbox was free and the backlog was full; the frame was dropped
    CanTxQueueFull,
    /// The controller refused a transmit request
    CanTxHardwareError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagSeverity {
    /// Informational, data will still reach the bus
    Ok,
    /// Data was lost
    NotOk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagContext {
    pub tick: u32,
    pub message: Option<MessageId>,
    pub mailbox: Option<MailboxIndex>,
}

impl DiagContext {
    pub const fn new(tick: u32) -> Self {
        Self {
            tick,
            message: None,
            mailbox: None,
        }
    }

    #[must_use]
    pub const fn with_message(mut self, id: MessageId) -> Self {
        self.message = Some(id);
        self
    }

    #[must_use]
    pub const fn with_mailbox(mut self, mailbox: MailboxIndex) -> Self {
        self.mailbox = Some(mailbox);
        self
    }
}

/// Receiver of diagnostic events.
pub trait DiagnosticsSink {
    fn report(&mut self, event: DiagEvent, severity: DiagSeverity, context: DiagContext);
}

/// Forwards every report to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn report(&mut self, event: DiagEvent, severity: DiagSeverity, context: DiagContext) {
        match severity {
            DiagSeverity::Ok => debug!(?event, ?context, "diagnostic event"),
            DiagSeverity::NotOk => warn!(?event, ?context, "diagnostic event"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagRecord {
    pub event: DiagEvent,
    pub severity: DiagSeverity,
    pub context: DiagContext,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagCounts {
    pub queue_used: u32,
    pub queue_full: u32,
    pub hardware_errors: u32,
}

/// Keeps the most recent `N` reports plus running totals per event.
pub struct DiagnosticsLog<const N: usize> {
    recent: HistoryBuffer<DiagRecord, N>,
    counts: DiagCounts,
}

impl<const N: usize> DiagnosticsLog<N> {
    pub const fn new() -> Self {
        Self {
            recent: HistoryBuffer::new(),
            counts: DiagCounts {
                queue_used: 0,
                queue_full: 0,
                hardware_errors: 0,
            },
        }
    }

    pub fn counts(&self) -> DiagCounts {
        self.counts
    }

    pub fn total(&self) -> u32 {
        self.counts.queue_used + self.counts.queue_full + self.counts.hardware_errors
    }

    pub fn last(&self) -> Option<&DiagRecord> {
        self.recent.recent()
    }

    /// Retained records, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &DiagRecord> {
        self.recent.oldest_ordered()
    }
}

impl<const N: usize> fmt::Debug for DiagnosticsLog<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticsLog")
            .field("retained", &self.recent.len())
            .field("counts", &self.counts)
            .finish()
    }
}

impl<const N: usize> Default for DiagnosticsLog<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> DiagnosticsSink for DiagnosticsLog<N> {
    fn report(&mut self, event: DiagEvent, severity: DiagSeverity, context: DiagContext) {
        let counter = match event {
            DiagEvent::CanTxQueueUsed => &mut self.counts.queue_used,
            DiagEvent::CanTxQueueFull => &mut self.counts.queue_full,
            DiagEvent::CanTxHardwareError => &mut self.counts.hardware_errors,
        };
        *counter = counter.saturating_add(1);

        self.recent.write(DiagRecord {
            event,
            severity,
            context,
        });
    }
}
