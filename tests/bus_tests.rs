use bms_can::backlog::DrainOutcome;
use bms_can::codec::{get_signal, set_signal, unpack_frame, Endianness, CAN_BYTES};
use bms_can::config::MailboxScan;
use bms_can::diag::{DiagEvent, DiagSeverity};
use bms_can::frame::{CanFrame, RawIdentifier};
use bms_can::mailbox::CanHardware;
use bms_can::message::{
    CanChannel, MessageId, MessageProperties, MessageTable, RxMessageDescriptor,
    TxMessageDescriptor,
};
use bms_can::receive::{IgnoreReason, RxOutcome};
use bms_can::transmit::TxOutcome;
use bms_can::{
    BacklogQueue, CanBus, CanConfig, ConfigError, DiagnosticsLog, HeaplessBacklog, SendError,
    SimulatedCan,
};

#[derive(Debug, Default)]
struct Pack {
    soc: u16,
    requested_state: u8,
    last_payload: [u8; CAN_BYTES],
    handler_calls: u32,
}

fn encode_soc(properties: &MessageProperties, pack: &Pack) -> u64 {
    set_signal(0, 7, 16, u64::from(pack.soc), properties.endianness)
}

fn handle_state_request(properties: &MessageProperties, data: &[u8; CAN_BYTES], pack: &mut Pack) {
    let word = unpack_frame(data, properties.endianness);
    pack.requested_state = get_signal(word, 7, 8, properties.endianness) as u8;
    pack.last_payload = *data;
    pack.handler_calls += 1;
}

const SOC_ID: MessageId = MessageId::standard(0x235);
const STATUS_ID: MessageId = MessageId::standard(0x220);
const FAULT_ID: MessageId = MessageId::extended(0x18FF_50E5);
const REQUEST_ID: MessageId = MessageId::standard(0x230);

static TX: [TxMessageDescriptor<Pack>; 3] = [
    TxMessageDescriptor::periodic(
        MessageProperties::new(STATUS_ID, 8, Endianness::BigEndian),
        30,
        0,
        encode_soc,
    ),
    TxMessageDescriptor::periodic(
        MessageProperties::new(SOC_ID, 2, Endianness::BigEndian),
        70,
        10,
        encode_soc,
    ),
    TxMessageDescriptor::on_demand(
        MessageProperties::new(FAULT_ID, 8, Endianness::LittleEndian),
        encode_soc,
    ),
];

static RX: [RxMessageDescriptor<Pack>; 2] = [
    RxMessageDescriptor::handled(
        MessageProperties::new(REQUEST_ID, 8, Endianness::BigEndian),
        CanChannel(0),
        handle_state_request,
    ),
    RxMessageDescriptor::unused(
        MessageProperties::new(MessageId::standard(0x3C2), 8, Endianness::BigEndian),
        CanChannel(0),
    ),
];

type TestBus = CanBus<'static, Pack, SimulatedCan, HeaplessBacklog<4>, DiagnosticsLog<16>>;

fn config() -> CanConfig {
    CanConfig {
        tx_mailbox_first: 1,
        tx_mailbox_count: 2,
        rx_mailbox_first: 8,
        rx_mailbox_count: 4,
        mailbox_scan: MailboxScan::Fixed,
        ..CanConfig::default()
    }
}

fn bus_with(config: CanConfig, channel: CanChannel) -> TestBus {
    CanBus::new(
        config,
        MessageTable::new(&TX, &RX),
        SimulatedCan::new(channel),
        HeaplessBacklog::new(),
        DiagnosticsLog::new(),
    )
    .unwrap()
}

fn bus() -> TestBus {
    bus_with(config(), CanChannel(0))
}

fn stall_tx(bus: &mut TestBus, stalled: bool) {
    bus.hardware_mut().set_stalled(1, stalled);
    bus.hardware_mut().set_stalled(2, stalled);
}

#[test]
fn test_bus_refuses_invalid_timing() {
    let tx = [TxMessageDescriptor::periodic(
        MessageProperties::new(STATUS_ID, 8, Endianness::BigEndian),
        51,
        0,
        encode_soc,
    )];
    let result = CanBus::new(
        config(),
        MessageTable::new(&tx, &[]),
        SimulatedCan::new(CanChannel(0)),
        HeaplessBacklog::<4>::new(),
        DiagnosticsLog::<4>::new(),
    );

    assert!(matches!(
        result.err(),
        Some(ConfigError::PeriodNotMultipleOfTick { period_ms: 51, .. })
    ));
}

#[test]
fn test_bus_refuses_invalid_config() {
    let result = CanBus::new(
        CanConfig {
            rx_mailbox_first: 2,
            ..config()
        },
        MessageTable::new(&TX, &RX),
        SimulatedCan::new(CanChannel(0)),
        HeaplessBacklog::<4>::new(),
        DiagnosticsLog::<4>::new(),
    );

    assert!(matches!(result.err(), Some(ConfigError::OverlappingMailboxRanges)));
}

#[test]
fn test_periodic_frames_on_the_wire() {
    let mut bus = bus();
    let pack = Pack {
        soc: 0x1F40,
        ..Pack::default()
    };

    assert_eq!(bus.engine().cycle_ticks(), 21);
    for _ in 0..21 {
        bus.on_scheduler_tick(&pack);
    }

    // 0x220 every 3 ticks, 0x235 once per 7 ticks
    let sent = bus.hardware().sent_frames();
    assert_eq!(sent.iter().filter(|f| f.message_id() == STATUS_ID).count(), 7);
    assert_eq!(sent.iter().filter(|f| f.message_id() == SOC_ID).count(), 3);
    assert_eq!(sent[0].message_id(), SOC_ID);

    let soc = sent.iter().find(|f| f.message_id() == SOC_ID).unwrap();
    assert_eq!(soc.dlc_byte(), 2);
    assert_eq!(soc.bytes()[..2], [0x1F, 0x40]);
    assert_eq!(bus.stats().frames_sent, 10);
    assert_eq!(bus.stats().rollovers, 1);
}

#[test]
fn test_on_demand_with_all_mailboxes_pending_is_queued() {
    let mut bus = bus();
    stall_tx(&mut bus, true);

    assert_eq!(bus.pending_mailboxes(), 2);

    let outcome = bus.send_on_demand(FAULT_ID, &Pack::default());
    assert_eq!(outcome, Ok(TxOutcome::Queued));

    let record = bus.diagnostics().last().copied().unwrap();
    assert_eq!(record.event, DiagEvent::CanTxQueueUsed);
    assert_eq!(record.severity, DiagSeverity::Ok);
    assert_eq!(record.context.message, Some(FAULT_ID));
    assert!(bus.hardware().sent_frames().is_empty());
}

#[test]
fn test_queued_frame_waits_for_drain() {
    let mut bus = bus();
    stall_tx(&mut bus, true);
    assert_eq!(bus.send_on_demand(FAULT_ID, &Pack::default()), Ok(TxOutcome::Queued));

    // Drain pass with mailboxes still busy discards the entry
    assert_eq!(bus.drain_backlog(), DrainOutcome::Discarded);
    assert_eq!(bus.drain_backlog(), DrainOutcome::Empty);

    assert_eq!(bus.send_on_demand(FAULT_ID, &Pack::default()), Ok(TxOutcome::Queued));
    assert!(bus.hardware().sent_frames().is_empty());

    stall_tx(&mut bus, false);
    assert_eq!(bus.drain_backlog(), DrainOutcome::Sent(1));

    let frame = bus.hardware().sent_frames()[0];
    assert_eq!(frame.message_id(), FAULT_ID);
    assert_eq!(bus.stats().backlog_drained, 1);
    assert_eq!(bus.stats().backlog_discarded, 1);
    assert_eq!(bus.stats().frames_queued, 2);
}

#[test]
fn test_full_backlog_drops_frame() {
    let mut bus = bus();
    stall_tx(&mut bus, true);

    for _ in 0..3 {
        assert_eq!(bus.send_on_demand(FAULT_ID, &Pack::default()), Ok(TxOutcome::Queued));
    }
    assert_eq!(
        bus.send_on_demand(FAULT_ID, &Pack::default()),
        Err(SendError::Dropped(FAULT_ID))
    );

    let counts = bus.diagnostics().counts();
    assert_eq!(counts.queue_used, 3);
    assert_eq!(counts.queue_full, 1);
    assert_eq!(
        bus.diagnostics().last().map(|record| record.severity),
        Some(DiagSeverity::NotOk)
    );
    assert_eq!(bus.stats().frames_dropped, 1);
}

#[test]
fn test_tick_drains_before_sweep() {
    let mut bus = bus_with(
        CanConfig {
            drain_every_ticks: 4,
            ..config()
        },
        CanChannel(0),
    );
    let pack = Pack::default();

    stall_tx(&mut bus, true);
    for _ in 0..3 {
        bus.on_scheduler_tick(&pack);
    }
    assert_eq!(bus.stats().frames_queued, 2);
    assert_eq!(bus.backlog().len(), 2);

    stall_tx(&mut bus, false);
    let report = bus.on_scheduler_tick(&pack);
    assert_eq!(report.due, 0);
    assert_eq!(report.drained, Some(DrainOutcome::Sent(1)));
    assert_eq!(bus.hardware().sent_frames()[0].message_id(), SOC_ID);
    assert_eq!(bus.backlog().len(), 1);
}

#[test]
fn test_hardware_rejection_on_demand() {
    let mut bus = bus();
    bus.hardware_mut().fail_next_transmit(3);

    let result = bus.send_on_demand(FAULT_ID, &Pack::default());
    assert!(matches!(
        result,
        Err(SendError::Hardware { id, .. }) if id == FAULT_ID
    ));
    assert_eq!(bus.diagnostics().counts().hardware_errors, 1);
    assert_eq!(bus.stats().hardware_errors, 1);
}

#[test]
fn test_receive_dispatch_passes_raw_payload() {
    let mut bus = bus();
    let mut pack = Pack::default();
    let payload = [0x02, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x11];

    bus.hardware_mut()
        .inject_frame(8, &CanFrame::from_parts(REQUEST_ID, payload, 8));
    assert_eq!(bus.on_receive_event(8, &mut pack), RxOutcome::Dispatched(0));

    assert_eq!(pack.requested_state, 2);
    assert_eq!(pack.last_payload, payload);
    assert_eq!(pack.handler_calls, 1);
    assert!(!bus.hardware().has_new_data(8));
}

#[test]
fn test_receive_mismatches_invoke_no_handler() {
    let mut bus = bus();
    let mut pack = Pack::default();

    // Same numeric id, other width
    bus.hardware_mut().inject_receive(
        8,
        RawIdentifier::from_id(MessageId::extended(0x230)),
        [1; 8],
        8,
    );
    assert_eq!(
        bus.on_receive_event(8, &mut pack),
        RxOutcome::Ignored(IgnoreReason::NoMatch)
    );

    bus.hardware_mut()
        .inject_frame(9, &CanFrame::from_parts(MessageId::standard(0x231), [1; 8], 8));
    assert_eq!(
        bus.on_receive_event(9, &mut pack),
        RxOutcome::Ignored(IgnoreReason::NoMatch)
    );

    bus.hardware_mut()
        .inject_frame(10, &CanFrame::from_parts(MessageId::standard(0x3C2), [1; 8], 8));
    assert_eq!(
        bus.on_receive_event(10, &mut pack),
        RxOutcome::Ignored(IgnoreReason::NoHandler)
    );

    assert_eq!(
        bus.on_receive_event(11, &mut pack),
        RxOutcome::Ignored(IgnoreReason::NoNewData)
    );
    assert_eq!(
        bus.on_receive_event(1, &mut pack),
        RxOutcome::Ignored(IgnoreReason::OutsideRxRange)
    );

    assert_eq!(pack.handler_calls, 0);
    assert_eq!(bus.stats().frames_ignored, 5);
}

#[test]
fn test_receive_on_other_channel_is_ignored() {
    let mut bus = bus_with(config(), CanChannel(1));
    let mut pack = Pack::default();

    bus.hardware_mut()
        .inject_frame(8, &CanFrame::from_parts(REQUEST_ID, [1; 8], 8));
    assert_eq!(
        bus.on_receive_event(8, &mut pack),
        RxOutcome::Ignored(IgnoreReason::NoMatch)
    );
    assert_eq!(pack.handler_calls, 0);
}

#[test]
fn test_stats_serialize() {
    let mut bus = bus();
    bus.on_scheduler_tick(&Pack::default());

    let json = serde_json::to_value(bus.stats()).unwrap();
    assert_eq!(json["ticks"], 1);
    assert_eq!(json["frames_sent"], 1);
    assert_eq!(json["frames_dropped"], 0);
}
