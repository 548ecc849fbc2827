//! State models for devices, ports, events and planned maintenance

pub mod devices;
pub mod events;
pub mod pm;

pub use devices::{
    AlarmCounts, BfdSessState, BfdState, BgpAdminStatus, BgpOperState, BgpPeerSession, BgpStyle,
    DeviceState, InterfaceState, Port,
};
pub use events::{
    AlarmColor, Event, EventData, EventKind, EventState, FlapState, LogEntry, ReachabilityState,
    SubIndex,
};
pub use pm::{MatchType, PlannedMaintenance, PmKind};
