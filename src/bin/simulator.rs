use bms_can::codec::{unpack_frame, Endianness, SignalSpec, CAN_BYTES};
use bms_can::frame::CanFrame;
use bms_can::mailbox::MailboxIndex;
use bms_can::message::{
    CanChannel, MessageId, MessageProperties, MessageTable, RxMessageDescriptor,
    TxMessageDescriptor,
};
use bms_can::receive::RxOutcome;
use bms_can::{BusStats, CanBus, CanConfig, DiagnosticsLog, HeaplessBacklog, SimulatedCan};
use clap::{App, Arg};
use colored::*;
use serde::Serialize;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, warn};

const BACKLOG_SLOTS: usize = 16;
const DIAG_HISTORY: usize = 32;
const RX_PERIOD_TICKS: u32 = 5;

type SimBus = CanBus<'static, PackState, SimulatedCan, HeaplessBacklog<BACKLOG_SLOTS>, DiagnosticsLog<DIAG_HISTORY>>;

/// Battery data the message table reads from and writes into.
#[derive(Debug, Clone, Copy, Serialize)]
struct PackState {
    pack_voltage_v: f32,
    pack_current_a: f32,
    soc_percent: f32,
    soh_percent: f32,
    max_cell_mv: f32,
    min_cell_mv: f32,
    max_temp_c: f32,
    min_temp_c: f32,
    requested_state: u8,
    measured_current_a: f32,
    fault_flags: u8,
}

impl Default for PackState {
    fn default() -> Self {
        Self {
            pack_voltage_v: 398.4,
            pack_current_a: 0.0,
            soc_percent: 85.0,
            soh_percent: 97.5,
            max_cell_mv: 4152.0,
            min_cell_mv: 4138.0,
            max_temp_c: 27.0,
            min_temp_c: 24.0,
            requested_state: 0,
            measured_current_a: 0.0,
            fault_flags: 0,
        }
    }
}

impl PackState {
    /// Constant-current discharge step.
    fn discharge(&mut self, tick: u32) {
        self.pack_current_a = -42.0 - (tick % 20) as f32 * 0.5;
        self.soc_percent = (self.soc_percent - 0.001).max(0.0);
        self.pack_voltage_v = 330.0 + self.soc_percent * 0.8;
        self.max_cell_mv = 3450.0 + self.soc_percent * 8.4;
        self.min_cell_mv = self.max_cell_mv - 14.0;
        self.max_temp_c = 27.0 + tick as f32 * 0.005;
    }
}

const PACK_VOLTAGE: SignalSpec = SignalSpec::new(7, 16).scaled(0.1, 0.0);
const PACK_CURRENT: SignalSpec = SignalSpec::new(23, 16).scaled(0.1, 0.0).limited(-3276.8, 3276.7);
const STATE_OF_CHARGE: SignalSpec = SignalSpec::new(7, 16).scaled(0.01, 0.0).limited(0.0, 100.0);
const STATE_OF_HEALTH: SignalSpec = SignalSpec::new(23, 16).scaled(0.01, 0.0).limited(0.0, 100.0);
const MAX_CELL: SignalSpec = SignalSpec::new(7, 16);
const MIN_CELL: SignalSpec = SignalSpec::new(23, 16);
const MAX_TEMP: SignalSpec = SignalSpec::new(0, 8).scaled(1.0, -40.0);
const MIN_TEMP: SignalSpec = SignalSpec::new(8, 8).scaled(1.0, -40.0);
const FAULT_FLAGS: SignalSpec = SignalSpec::new(0, 8);
const STATE_REQUEST: SignalSpec = SignalSpec::new(7, 8);
const SENSOR_CURRENT_MA: SignalSpec = SignalSpec::new(23, 32).scaled(0.001, 0.0);

fn encode_pack_status(properties: &MessageProperties, pack: &PackState) -> u64 {
    let e = properties.endianness;
    let word = PACK_VOLTAGE.encode_physical(0, pack.pack_voltage_v, e);
    PACK_CURRENT.encode_physical(word, pack.pack_current_a, e)
}

fn encode_cell_voltages(properties: &MessageProperties, pack: &PackState) -> u64 {
    let e = properties.endianness;
    let word = MAX_CELL.encode_physical(0, pack.max_cell_mv, e);
    MIN_CELL.encode_physical(word, pack.min_cell_mv, e)
}

fn encode_state_of_charge(properties: &MessageProperties, pack: &PackState) -> u64 {
    let e = properties.endianness;
    let word = STATE_OF_CHARGE.encode_physical(0, pack.soc_percent, e);
    STATE_OF_HEALTH.encode_physical(word, pack.soh_percent, e)
}

fn encode_temperatures(properties: &MessageProperties, pack: &PackState) -> u64 {
    let e = properties.endianness;
    let word = MAX_TEMP.encode_physical(0, pack.max_temp_c, e);
    MIN_TEMP.encode_physical(word, pack.min_temp_c, e)
}

fn encode_fault_summary(properties: &MessageProperties, pack: &PackState) -> u64 {
    FAULT_FLAGS.set_raw(0, u64::from(pack.fault_flags), properties.endianness)
}

fn handle_state_request(properties: &MessageProperties, data: &[u8; CAN_BYTES], pack: &mut PackState) {
    let word = unpack_frame(data, properties.endianness);
    pack.requested_state = STATE_REQUEST.get_raw(word, properties.endianness) as u8;
}

fn handle_current_sensor(properties: &MessageProperties, data: &[u8; CAN_BYTES], pack: &mut PackState) {
    let word = unpack_frame(data, properties.endianness);
    pack.measured_current_a = SENSOR_CURRENT_MA.decode_physical_signed(word, properties.endianness);
}

const PACK_STATUS_ID: MessageId = MessageId::standard(0x220);
const FAULT_SUMMARY_ID: MessageId = MessageId::extended(0x18FF_50E5);
const STATE_REQUEST_ID: MessageId = MessageId::standard(0x230);
const CURRENT_SENSOR_ID: MessageId = MessageId::standard(0x521);

static TX_MESSAGES: [TxMessageDescriptor<PackState>; 5] = [
    TxMessageDescriptor::periodic(
        MessageProperties::new(PACK_STATUS_ID, 8, Endianness::BigEndian),
        100,
        0,
        encode_pack_status,
    ),
    TxMessageDescriptor::periodic(
        MessageProperties::new(MessageId::standard(0x221), 8, Endianness::BigEndian),
        100,
        50,
        encode_cell_voltages,
    ),
    TxMessageDescriptor::periodic(
        MessageProperties::new(MessageId::standard(0x235), 8, Endianness::BigEndian),
        1000,
        0,
        encode_state_of_charge,
    ),
    TxMessageDescriptor::periodic(
        MessageProperties::new(MessageId::standard(0x240), 2, Endianness::LittleEndian),
        200,
        20,
        encode_temperatures,
    ),
    TxMessageDescriptor::on_demand(
        MessageProperties::new(FAULT_SUMMARY_ID, 1, Endianness::LittleEndian),
        encode_fault_summary,
    ),
];

static RX_MESSAGES: [RxMessageDescriptor<PackState>; 3] = [
    RxMessageDescriptor::handled(
        MessageProperties::new(STATE_REQUEST_ID, 8, Endianness::BigEndian),
        CanChannel(0),
        handle_state_request,
    ),
    RxMessageDescriptor::handled(
        MessageProperties::new(CURRENT_SENSOR_ID, 6, Endianness::BigEndian),
        CanChannel(0),
        handle_current_sensor,
    ),
    RxMessageDescriptor::unused(
        MessageProperties::new(MessageId::standard(0x3C2), 8, Endianness::BigEndian),
        CanChannel(0),
    ),
];

fn load_config(path: Option<&str>) -> Result<CanConfig, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(CanConfig::default());
    };
    let text = std::fs::read_to_string(path)?;
    let config: CanConfig = serde_json::from_str(&text)?;
    info!("Loaded CAN configuration from {}", path);
    Ok(config)
}

/// Feeds the receive mailboxes the way the vehicle would.
fn inject_vehicle_traffic(bus: &mut SimBus, pack: &mut PackState, tick: u32) {
    let first_rx = bus.config().rx_mailbox_first;
    let request = (tick / 100 % 3) as u8;
    let current_ma = (pack.pack_current_a * 1000.0) as i32;

    let frames: [(MailboxIndex, CanFrame); 2] = [
        (
            first_rx,
            CanFrame::from_parts(STATE_REQUEST_ID, [request, 0, 0, 0, 0, 0, 0, 0], 8),
        ),
        (
            first_rx + 1,
            CanFrame::from_parts(CURRENT_SENSOR_ID, current_sensor_payload(current_ma), 6),
        ),
    ];

    for (mailbox, frame) in &frames {
        bus.hardware_mut().inject_frame(*mailbox, frame);
        match bus.on_receive_event(*mailbox, pack) {
            RxOutcome::Dispatched(index) => debug!("RX {} handled by entry {}", frame.message_id(), index),
            RxOutcome::Ignored(reason) => debug!("RX {} ignored: {:?}", frame.message_id(), reason),
        }
    }
}

fn current_sensor_payload(current_ma: i32) -> [u8; CAN_BYTES] {
    let bytes = current_ma.to_be_bytes();
    [0x00, 0x00, bytes[0], bytes[1], bytes[2], bytes[3], 0, 0]
}

fn print_summary(stats: &BusStats, bus: &SimBus, pack: &PackState) {
    println!();
    println!("{}", "CAN bus summary".bright_cyan().bold());
    println!("{}", "===============".bright_cyan());
    println!("  {} {}", "Ticks:".bold(), stats.ticks);
    println!("  {} {} ({} ms)", "Cycle length:".bold(), bus.engine().cycle_ticks(), bus.engine().cycle_ms());
    println!("  {} {}", "Cycle roll-overs:".bold(), stats.rollovers);
    println!("  {} {}", "Pending mailboxes:".bold(), bus.pending_mailboxes());
    println!("  {} {}", "Frames sent:".bold(), stats.frames_sent.to_string().green());
    println!("  {} {}", "Frames queued:".bold(), stats.frames_queued.to_string().yellow());

    let dropped = stats.frames_dropped.to_string();
    if stats.frames_dropped == 0 {
        println!("  {} {}", "Frames dropped:".bold(), dropped.green());
    } else {
        println!("  {} {}", "Frames dropped:".bold(), dropped.red());
    }

    println!(
        "  {} {} sent, {} discarded",
        "Backlog:".bold(),
        stats.backlog_drained,
        stats.backlog_discarded
    );
    println!(
        "  {} {} handled, {} ignored",
        "Received:".bold(),
        stats.frames_received,
        stats.frames_ignored
    );

    let counts = bus.diagnostics().counts();
    println!(
        "  {} queue used {}, queue full {}, hardware {}",
        "Diagnostics:".bold(),
        counts.queue_used,
        counts.queue_full,
        counts.hardware_errors
    );
    println!(
        "  {} SOC {:.2} %, requested state {}, sensor current {:.1} A",
        "Pack:".bold(),
        pack.soc_percent,
        pack.requested_state,
        pack.measured_current_a
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("bms-can-simulator")
        .version("0.1.0")
        .author("Embedded Systems Engineering Team")
        .about("Runs the BMS CAN message table against a simulated controller")
        .arg(
            Arg::with_name("ticks")
                .short("n")
                .long("ticks")
                .value_name("TICKS")
                .help("Number of scheduler ticks to run")
                .takes_value(true)
                .default_value("500"),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON file with CAN configuration overrides")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("latency")
                .short("l")
                .long("latency")
                .value_name("TICKS")
                .help("Ticks a mailbox stays pending after a transmit request")
                .takes_value(true)
                .default_value("0"),
        )
        .arg(
            Arg::with_name("stall-every")
                .short("s")
                .long("stall-every")
                .value_name("TICKS")
                .help("Stall every mailbox for one tick at this interval")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("realtime")
                .short("r")
                .long("realtime")
                .help("Pace ticks at the configured tick length"),
        )
        .arg(
            Arg::with_name("json")
                .long("json")
                .help("Print statistics as JSON"),
        )
        .get_matches();

    let ticks: u32 = matches.value_of("ticks").unwrap_or("500").parse()?;
    let latency: u32 = matches.value_of("latency").unwrap_or("0").parse()?;
    let stall_every: Option<u32> = matches.value_of("stall-every").map(str::parse).transpose()?;
    let config = load_config(matches.value_of("config"))?;

    println!("{}", "BMS CAN Simulator".bright_cyan().bold());
    println!("{}", "=================".bright_cyan());

    let hardware = SimulatedCan::new(CanChannel(0)).with_latency(latency);
    let mut bus: SimBus = CanBus::new(
        config,
        MessageTable::new(&TX_MESSAGES, &RX_MESSAGES),
        hardware,
        HeaplessBacklog::new(),
        DiagnosticsLog::new(),
    )?;

    let mut pack = PackState::default();
    let mut interval = matches
        .is_present("realtime")
        .then(|| time::interval(Duration::from_millis(u64::from(config.tick_ms))));

    for tick in 1..=ticks {
        if let Some(interval) = interval.as_mut() {
            interval.tick().await;
        }

        let stall = stall_every.is_some_and(|every| every > 0 && tick % every == 0);
        bus.hardware_mut().set_all_stalled(stall);
        bus.hardware_mut().advance();

        pack.discharge(tick);
        let report = bus.on_scheduler_tick(&pack);
        if report.dropped > 0 {
            warn!("Tick {}: {} frame(s) dropped", report.tick, report.dropped);
        }

        if tick % RX_PERIOD_TICKS == 0 {
            bus.hardware_mut().set_all_stalled(false);
            inject_vehicle_traffic(&mut bus, &mut pack, tick);
        }

        // Raise a fault flag once the pack gets warm and report it right away
        if pack.max_temp_c > 27.5 && pack.fault_flags == 0 {
            pack.fault_flags = 0x01;
            match bus.send_on_demand(FAULT_SUMMARY_ID, &pack) {
                Ok(outcome) => info!("Fault summary sent on demand: {:?}", outcome),
                Err(e) => warn!("Fault summary not sent: {}", e),
            }
        }
    }

    let stats = *bus.stats();
    print_summary(&stats, &bus, &pack);

    if matches.is_present("json") {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }

    Ok(())
}
