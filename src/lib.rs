//! # BMS CAN Layer
//!
//! CAN message scheduling, signal encoding and reception dispatch for an
//! embedded battery-management controller.
//!
//! ## Features
//!
//! - **Signal codec**: bit-exact packing of signals into 64-bit message words,
//!   Intel and Motorola bit layouts
//! - **Periodic scheduling**: per-message period and phase on a single global
//!   cycle counter that wraps at the least common multiple of all periods
//! - **Mailbox fallback**: frames that find no free transmit mailbox are kept
//!   in a bounded backlog and offered again on the next drain pass
//! - **Reception dispatch**: incoming frames are matched on identifier, width
//!   and channel against a static table
//! - **Embedded-friendly**: fixed-capacity containers, no heap allocation in
//!   the core
//!
//! ## Quick Start
//!
//! ```rust
//! use bms_can::codec::{set_signal, Endianness};
//! use bms_can::message::{
//!     CanChannel, MessageId, MessageProperties, MessageTable, RxMessageDescriptor,
//!     TxMessageDescriptor,
//! };
//! use bms_can::{CanBus, CanConfig, DiagnosticsLog, HeaplessBacklog, SimulatedCan};
//!
//! fn soc(properties: &MessageProperties, soc: &u16) -> u64 {
//!     set_signal(0, 7, 16, u64::from(*soc), properties.endianness)
//! }
//!
//! static TX: [TxMessageDescriptor<u16>; 1] = [TxMessageDescriptor::periodic(
//!     MessageProperties::new(MessageId::standard(0x235), 8, Endianness::BigEndian),
//!     100,
//!     0,
//!     soc,
//! )];
//! static RX: [RxMessageDescriptor<u16>; 0] = [];
//!
//! let mut bus: CanBus<'_, u16, SimulatedCan, HeaplessBacklog<8>, DiagnosticsLog<16>> =
//!     CanBus::new(
//!         CanConfig::default(),
//!         MessageTable::new(&TX, &RX),
//!         SimulatedCan::new(CanChannel(0)),
//!         HeaplessBacklog::new(),
//!         DiagnosticsLog::new(),
//!     )
//!     .unwrap();
//!
//! for _ in 0..10 {
//!     bus.on_scheduler_tick(&850);
//! }
//! assert_eq!(bus.stats().frames_sent, 1);
//! ```
//!
//! ## Architecture
//!
//! - [`codec`] - Signal packing and frame byte order
//! - [`message`] - Identifiers and the static TX/RX tables
//! - [`schedule`] - Period/phase counters and the global cycle
//! - [`transmit`] - Encoding and mailbox hand-off of due messages
//! - [`mailbox`] - Hardware interface and transmit mailbox arbitration
//! - [`backlog`] - Overflow queue and drain pass
//! - [`receive`] - Receive event matching and handler dispatch
//! - [`bus`] - Owned context exposing the runtime entry points

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]

pub mod backlog;
pub mod bus;
pub mod codec;
pub mod config;
pub mod diag;
pub mod error;
pub mod frame;
pub mod mailbox;
pub mod message;
pub mod receive;
pub mod schedule;
pub mod sim;
pub mod transmit;

// Re-export main public types for convenience
pub use backlog::{BacklogQueue, HeaplessBacklog};
pub use bus::{BusStats, CanBus, TickReport};
pub use config::CanConfig;
pub use diag::{DiagnosticsLog, DiagnosticsSink, TracingDiagnostics};
pub use error::{ConfigError, HardwareError, SendError};
pub use frame::CanFrame;
pub use mailbox::CanHardware;
pub use message::{MessageId, MessageTable};
pub use sim::SimulatedCan;
