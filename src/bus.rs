//! The owned context object tying scheduler, dispatchers, backlog and
//! hardware together behind the four runtime entry points.

use crate::backlog::{BacklogQueue, DrainOutcome, HeaplessBacklog, DEFAULT_BACKLOG_CAPACITY};
use crate::config::CanConfig;
use crate::diag::{DiagnosticsSink, TracingDiagnostics};
use crate::error::{ConfigError, SendError};
use crate::mailbox::{CanHardware, MailboxIndex, MailboxManager};
use crate::message::{MessageId, MessageTable};
use crate::receive::{ReceiveDispatcher, RxOutcome};
use crate::schedule::ScheduleEngine;
use crate::transmit::{TransmitDispatcher, TxOutcome};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Running totals since start-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub ticks: u64,
    pub rollovers: u32,
    pub frames_sent: u64,
    pub frames_queued: u64,
    pub frames_dropped: u64,
    pub backlog_drained: u64,
    pub backlog_discarded: u64,
    pub hardware_errors: u64,
    pub frames_received: u64,
    pub frames_ignored: u64,
}

impl BusStats {
    fn record_tx(&mut self, outcome: TxOutcome) {
        match outcome {
            TxOutcome::Sent(_) => self.frames_sent += 1,
            TxOutcome::Queued => self.frames_queued += 1,
            TxOutcome::Dropped => self.frames_dropped += 1,
            TxOutcome::Failed(_) => self.hardware_errors += 1,
        }
    }

    fn record_drain(&mut self, outcome: DrainOutcome) {
        match outcome {
            DrainOutcome::Empty => {}
            DrainOutcome::Sent(_) => {
                self.backlog_drained += 1;
                self.frames_sent += 1;
            }
            DrainOutcome::Discarded => self.backlog_discarded += 1,
            DrainOutcome::Failed(_) => self.hardware_errors += 1,
        }
    }

    fn record_rx(&mut self, outcome: RxOutcome) {
        match outcome {
            RxOutcome::Dispatched(_) => self.frames_received += 1,
            RxOutcome::Ignored(_) => self.frames_ignored += 1,
        }
    }
}

/// What one scheduler tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u32,
    /// `None` when this tick was not a drain tick
    pub drained: Option<DrainOutcome>,
    pub due: usize,
    pub sent: usize,
    pub queued: usize,
    pub dropped: usize,
    pub failed: usize,
}

impl TickReport {
    fn record(&mut self, outcome: TxOutcome) {
        match outcome {
            TxOutcome::Sent(_) => self.sent += 1,
            TxOutcome::Queued => self.queued += 1,
            TxOutcome::Dropped => self.dropped += 1,
            TxOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// CAN layer of one controller node.
///
/// `S` is the application data the encoders read from and the handlers
/// write into. The bus holds no reference to it between calls.
///
/// Every entry point takes `&mut self`. When the receive interrupt and the
/// periodic task run in different contexts, both must reach the bus
/// through one lock, e.g. a `critical_section::Mutex<RefCell<CanBus>>`.
/// A receive interrupt raised during a tick is then deferred until the
/// tick completes.
pub struct CanBus<
    'a,
    S,
    H,
    Q = HeaplessBacklog<DEFAULT_BACKLOG_CAPACITY>,
    D = TracingDiagnostics,
> {
    config: CanConfig,
    table: MessageTable<'a, S>,
    engine: ScheduleEngine,
    tx: TransmitDispatcher,
    rx: ReceiveDispatcher,
    hardware: H,
    backlog: Q,
    diagnostics: D,
    stats: BusStats,
    tick: u32,
}

impl<'a, S, H, Q, D> CanBus<'a, S, H, Q, D>
where
    H: CanHardware,
    Q: BacklogQueue,
    D: DiagnosticsSink,
{
    /// Validates configuration and message table. Any error here is a
    /// build defect; the bus must not be started.
    pub fn new(
        config: CanConfig,
        table: MessageTable<'a, S>,
        hardware: H,
        backlog: Q,
        diagnostics: D,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        table.validate()?;
        let engine = ScheduleEngine::new(table.tx, config.tick_ms)?;

        info!(
            channel = %hardware.channel(),
            tx_messages = table.tx.len(),
            rx_messages = table.rx.len(),
            tick_ms = config.tick_ms,
            cycle_ticks = engine.cycle_ticks(),
            cycle_ms = engine.cycle_ms(),
            "CAN bus configured"
        );

        Ok(Self {
            tx: TransmitDispatcher::new(MailboxManager::new(
                config.tx_mailboxes(),
                config.mailbox_scan,
            )),
            rx: ReceiveDispatcher::new(config.rx_mailboxes()),
            config,
            table,
            engine,
            hardware,
            backlog,
            diagnostics,
            stats: BusStats::default(),
            tick: 0,
        })
    }

    /// Periodic task entry point. Drains the backlog when this tick falls
    /// on the drain rate, then sends every message due this tick in table
    /// order.
    pub fn on_scheduler_tick(&mut self, source: &S) -> TickReport {
        self.tick = self.tick.wrapping_add(1);
        self.stats.ticks += 1;

        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };

        if self.tick.is_multiple_of(self.config.drain_every_ticks) {
            report.drained = Some(self.drain_backlog());
        }

        let due = self.engine.tick();
        self.stats.rollovers = self.engine.rollovers();
        report.due = due.len();

        let table = self.table;
        for index in due {
            let descriptor = &table.tx[index];
            let outcome = self.tx.dispatch(
                descriptor,
                source,
                &mut self.hardware,
                &mut self.backlog,
                &mut self.diagnostics,
                self.tick,
            );
            self.stats.record_tx(outcome);
            report.record(outcome);
        }

        report
    }

    /// Sends one message outside the periodic sweep. Periodic messages
    /// may be sent this way too; their schedule is not affected.
    pub fn send_on_demand(&mut self, id: MessageId, source: &S) -> Result<TxOutcome, SendError> {
        let Some((_, descriptor)) = self.table.find_tx(id) else {
            debug!(%id, "on-demand send for unknown message");
            return Err(SendError::UnknownMessage(id));
        };

        let outcome = self.tx.dispatch(
            descriptor,
            source,
            &mut self.hardware,
            &mut self.backlog,
            &mut self.diagnostics,
            self.tick,
        );
        self.stats.record_tx(outcome);

        match outcome {
            TxOutcome::Dropped => Err(SendError::Dropped(id)),
            TxOutcome::Failed(source) => Err(SendError::Hardware { id, source }),
            sent_or_queued => Ok(sent_or_queued),
        }
    }

    /// Receive interrupt entry point for one mailbox.
    pub fn on_receive_event(&mut self, mailbox: MailboxIndex, sink: &mut S) -> RxOutcome {
        let outcome = self
            .rx
            .on_receive_event(self.table.rx, &mut self.hardware, mailbox, sink);
        self.stats.record_rx(outcome);
        outcome
    }

    /// Offers the oldest queued frame to the hardware once.
    pub fn drain_backlog(&mut self) -> DrainOutcome {
        let outcome = self.tx.drain_backlog(
            &mut self.hardware,
            &mut self.backlog,
            &mut self.diagnostics,
            self.tick,
        );
        self.stats.record_drain(outcome);
        outcome
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    pub fn config(&self) -> &CanConfig {
        &self.config
    }

    pub fn engine(&self) -> &ScheduleEngine {
        &self.engine
    }

    pub fn table(&self) -> MessageTable<'a, S> {
        self.table
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    pub fn backlog(&self) -> &Q {
        &self.backlog
    }

    pub fn diagnostics(&self) -> &D {
        &self.diagnostics
    }

    /// Number of transmit mailboxes currently holding an unsent frame.
    pub fn pending_mailboxes(&self) -> usize {
        self.tx.mailboxes().pending_count(&self.hardware)
    }
}
