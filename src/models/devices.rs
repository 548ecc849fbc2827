//! Device and port state models

use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Juniper's enterprise number, as registered with IANA
pub const ENTERPRISE_JUNIPER: u32 = 2636;
/// Cisco's enterprise number, as registered with IANA
pub const ENTERPRISE_CISCO: u32 = 9;

/// Operational state of an interface, from RFC 2863 (IF-MIB), extended with
/// the Zino-specific `flapping` and `adminDown` pseudo-states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InterfaceState {
    Up,
    Down,
    Testing,
    Unknown,
    Dormant,
    NotPresent,
    LowerLayerDown,
    Flapping,
    AdminDown,
}

impl InterfaceState {
    /// Maps an ifOperStatus integer value to a state
    pub fn from_oper_status(value: i64) -> Self {
        match value {
            1 => InterfaceState::Up,
            2 => InterfaceState::Down,
            3 => InterfaceState::Testing,
            5 => InterfaceState::Dormant,
            6 => InterfaceState::NotPresent,
            7 => InterfaceState::LowerLayerDown,
            _ => InterfaceState::Unknown,
        }
    }
}

impl std::fmt::Display for InterfaceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InterfaceState::Up => "up",
            InterfaceState::Down => "down",
            InterfaceState::Testing => "testing",
            InterfaceState::Unknown => "unknown",
            InterfaceState::Dormant => "dormant",
            InterfaceState::NotPresent => "notPresent",
            InterfaceState::LowerLayerDown => "lowerLayerDown",
            InterfaceState::Flapping => "flapping",
            InterfaceState::AdminDown => "adminDown",
        };
        write!(f, "{}", name)
    }
}

/// BFD session state from BFD-STD-MIB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BfdSessState {
    AdminDown,
    Down,
    Init,
    Up,
    Failing,
}

impl BfdSessState {
    /// Maps a bfdSessState integer value to a state
    pub fn from_value(value: i64) -> Self {
        match value {
            1 => BfdSessState::AdminDown,
            2 => BfdSessState::Down,
            3 => BfdSessState::Init,
            4 => BfdSessState::Up,
            _ => BfdSessState::Failing,
        }
    }
}

impl std::fmt::Display for BfdSessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BfdSessState::AdminDown => "adminDown",
            BfdSessState::Down => "down",
            BfdSessState::Init => "init",
            BfdSessState::Up => "up",
            BfdSessState::Failing => "failing",
        };
        write!(f, "{}", name)
    }
}

/// Polled BFD session attributes for a single port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BfdState {
    pub session_state: BfdSessState,
    pub session_index: u32,
    pub session_discr: Option<u32>,
    pub session_addr: Option<IpAddr>,
}

/// BGP peering session operational state (BGP4-MIB bgpPeerState and friends)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BgpOperState {
    Idle,
    Connect,
    Active,
    OpenSent,
    OpenConfirm,
    Established,
    Down,
    Unknown,
}

impl BgpOperState {
    /// Maps a bgpPeerState integer value to a state
    pub fn from_value(value: i64) -> Self {
        match value {
            1 => BgpOperState::Idle,
            2 => BgpOperState::Connect,
            3 => BgpOperState::Active,
            4 => BgpOperState::OpenSent,
            5 => BgpOperState::OpenConfirm,
            6 => BgpOperState::Established,
            _ => BgpOperState::Unknown,
        }
    }
}

impl std::fmt::Display for BgpOperState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BgpOperState::Idle => "idle",
            BgpOperState::Connect => "connect",
            BgpOperState::Active => "active",
            BgpOperState::OpenSent => "opensent",
            BgpOperState::OpenConfirm => "openconfirm",
            BgpOperState::Established => "established",
            BgpOperState::Down => "down",
            BgpOperState::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// BGP peering session administrative status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BgpAdminStatus {
    Stop,
    Start,
    Halted,
    Running,
    Unknown,
}

impl BgpAdminStatus {
    /// Maps a bgpPeerAdminStatus integer value to a status
    pub fn from_value(value: i64) -> Self {
        match value {
            1 => BgpAdminStatus::Stop,
            2 => BgpAdminStatus::Start,
            _ => BgpAdminStatus::Unknown,
        }
    }
}

impl std::fmt::Display for BgpAdminStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BgpAdminStatus::Stop => "stop",
            BgpAdminStatus::Start => "start",
            BgpAdminStatus::Halted => "halted",
            BgpAdminStatus::Running => "running",
            BgpAdminStatus::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Which family of BGP MIBs a device responds to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BgpStyle {
    Juniper,
    Cisco,
    General,
}

impl std::fmt::Display for BgpStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BgpStyle::Juniper => "juniper",
            BgpStyle::Cisco => "cisco",
            BgpStyle::General => "general",
        };
        write!(f, "{}", name)
    }
}

/// Tracked state of a single BGP peering session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BgpPeerSession {
    /// Peer uptime as reported by the device, in hundredths of a second
    pub uptime: Option<u32>,
    pub admin_status: Option<BgpAdminStatus>,
    pub oper_state: Option<BgpOperState>,
}

/// Keeps the polled state of a single router port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub ifindex: u32,
    pub ifdescr: Option<String>,
    pub ifalias: Option<String>,
    pub state: Option<InterfaceState>,
    pub bfd_state: Option<BfdState>,
}

impl Port {
    pub fn new(ifindex: u32) -> Self {
        Self {
            ifindex,
            ifdescr: None,
            ifalias: None,
            state: None,
            bfd_state: None,
        }
    }
}

/// Chassis alarm counters, currently only collected from Juniper devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AlarmCounts {
    pub yellow: u32,
    pub red: u32,
}

/// Keeps all polled state for a single device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub name: String,
    pub enterprise_id: Option<u32>,
    pub boot_time: Option<DateTime<Utc>>,
    /// Addresses discovered on this device by the address map task
    pub addresses: HashSet<IpAddr>,
    pub ports: BTreeMap<u32, Port>,
    pub bgp_peers: BTreeMap<IpAddr, BgpPeerSession>,
    pub bgp_style: Option<BgpStyle>,
    pub alarms: Option<AlarmCounts>,
}

impl DeviceState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enterprise_id: None,
            boot_time: None,
            addresses: HashSet::new(),
            ports: BTreeMap::new(),
            bgp_peers: BTreeMap::new(),
            bgp_style: None,
            alarms: None,
        }
    }

    pub fn is_juniper(&self) -> bool {
        self.enterprise_id == Some(ENTERPRISE_JUNIPER)
    }

    pub fn is_cisco(&self) -> bool {
        self.enterprise_id == Some(ENTERPRISE_CISCO)
    }

    /// Records the device boot time calculated from a sysUpTime value (in
    /// hundredths of a second).  Returns true if this looks like a restart,
    /// i.e. the boot time moved forward by more than a minute.
    pub fn set_boot_time_from_uptime(&mut self, uptime_ticks: u64, now: DateTime<Utc>) -> bool {
        let uptime = Duration::milliseconds((uptime_ticks * 10) as i64);
        let new_boot_time = now - uptime;
        let restarted = match self.boot_time {
            Some(previous) => new_boot_time - previous > Duration::seconds(60),
            None => false,
        };
        self.boot_time = Some(new_boot_time);
        restarted
    }

    /// Returns the port owning the given interface index, if known
    pub fn get_port(&self, ifindex: u32) -> Option<&Port> {
        self.ports.get(&ifindex)
    }

    /// Returns the port owning the given interface index, creating an empty
    /// entry if none exists
    pub fn get_or_create_port(&mut self, ifindex: u32) -> &mut Port {
        self.ports.entry(ifindex).or_insert_with(|| Port::new(ifindex))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn oper_status_values_map_to_states() {
        assert_eq!(InterfaceState::from_oper_status(1), InterfaceState::Up);
        assert_eq!(InterfaceState::from_oper_status(2), InterfaceState::Down);
        assert_eq!(
            InterfaceState::from_oper_status(7),
            InterfaceState::LowerLayerDown
        );
        assert_eq!(InterfaceState::from_oper_status(42), InterfaceState::Unknown);
    }

    #[test]
    fn boot_time_is_derived_from_uptime() {
        let mut device = DeviceState::new("example-gw");
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        // 1 hour of uptime, expressed in hundredths of a second
        let restarted = device.set_boot_time_from_uptime(360_000, now);
        assert!(!restarted);
        assert_eq!(
            device.boot_time,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap())
        );
    }

    #[test]
    fn uptime_reset_is_reported_as_restart() {
        let mut device = DeviceState::new("example-gw");
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        device.set_boot_time_from_uptime(360_000, now);
        // Ten minutes later the uptime counter says 1 minute: a reboot
        let later = now + Duration::minutes(10);
        assert!(device.set_boot_time_from_uptime(6_000, later));
    }
}
