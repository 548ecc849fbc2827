//! Zino: a network state monitor for large IP networks
//!
//! This crate continuously polls a configured set of routers over SNMP,
//! derives operational state (reachability, link state, BGP and BFD
//! sessions, chassis alarms, interface flapping) and exposes that state as
//! a stream of durable events over a line-oriented TCP protocol:
//! - Polls devices on per-device intervals with a staggered scheduler
//! - Tracks events with a controlled lifecycle state machine
//! - Detects interface flapping with a decayed-exponential score
//! - Receives and dispatches SNMP traps to policy observers
//! - Serves operators over the legacy command/notification protocol
//! - Suppresses events inside planned maintenance windows

pub mod api;
pub mod config;
pub mod error;
pub mod flaps;
pub mod models;
pub mod pm;
pub mod runtime;
pub mod scheduler;
pub mod snmp;
pub mod state;
pub mod tasks;
pub mod trapd;
pub mod utils;

pub use config::polldevs::PollDevice;
pub use config::Configuration;
pub use error::{ZinoError, ZinoResult};
pub use models::{Event, EventData, EventKind, EventState, SubIndex};
pub use runtime::Runtime;
pub use state::{EventStore, ZinoState};
