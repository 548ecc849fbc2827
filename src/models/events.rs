//! Event models and the event lifecycle state machine
//!
//! An event is a persistent record of a detected condition on a device or
//! interface.  Events are identified by the triple (router, sub-index, kind)
//! and move through a controlled set of lifecycle states.  Every state
//! transition is recorded in the event's history for auditing.

use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ZinoError, ZinoResult};
use crate::models::devices::{BfdSessState, BgpAdminStatus, BgpOperState, InterfaceState};

/// The set of allowable event lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventState {
    Embryonic,
    Open,
    Working,
    Waiting,
    #[serde(rename = "confirm-wait")]
    Confirm,
    Ignored,
    Closed,
}

impl EventState {
    /// Parses an operator-supplied state name
    pub fn from_api_name(name: &str) -> Option<Self> {
        match name {
            "open" => Some(EventState::Open),
            "working" => Some(EventState::Working),
            "waiting" => Some(EventState::Waiting),
            "confirm-wait" => Some(EventState::Confirm),
            "ignored" => Some(EventState::Ignored),
            "closed" => Some(EventState::Closed),
            _ => None,
        }
    }

    /// Returns true if the lifecycle graph permits a transition to `to`
    pub fn can_transition_to(self, to: EventState) -> bool {
        use EventState::*;
        if self == Closed {
            return false;
        }
        match (self, to) {
            (Embryonic, Open) => true,
            (Embryonic, _) => false,
            // Any non-terminal state may be ignored or closed
            (_, Ignored) | (_, Closed) => true,
            (Open, Working) | (Open, Waiting) | (Open, Confirm) => true,
            (Working, Open) | (Working, Waiting) | (Working, Confirm) => true,
            (Waiting, Open) | (Waiting, Working) | (Waiting, Confirm) => true,
            (Confirm, Open) | (Confirm, Working) | (Confirm, Waiting) => true,
            (Ignored, Open) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for EventState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventState::Embryonic => "embryonic",
            EventState::Open => "open",
            EventState::Working => "working",
            EventState::Waiting => "waiting",
            EventState::Confirm => "confirm-wait",
            EventState::Ignored => "ignored",
            EventState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// The set of event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    PortState,
    Bgp,
    Bfd,
    Reachability,
    Alarm,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventKind::PortState => "portstate",
            EventKind::Bgp => "bgp",
            EventKind::Bfd => "bfd",
            EventKind::Reachability => "reachability",
            EventKind::Alarm => "alarm",
        };
        write!(f, "{}", name)
    }
}

/// Flap detection state as reported on port events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlapState {
    Flapping,
    Stable,
}

impl std::fmt::Display for FlapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlapState::Flapping => write!(f, "flapping"),
            FlapState::Stable => write!(f, "stable"),
        }
    }
}

/// Reachability probe outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReachabilityState {
    #[serde(rename = "reachable")]
    Reachable,
    #[serde(rename = "no-response")]
    NoResponse,
}

impl std::fmt::Display for ReachabilityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReachabilityState::Reachable => write!(f, "reachable"),
            ReachabilityState::NoResponse => write!(f, "no-response"),
        }
    }
}

/// Chassis alarm color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmColor {
    Yellow,
    Red,
}

impl std::fmt::Display for AlarmColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlarmColor::Yellow => write!(f, "yellow"),
            AlarmColor::Red => write!(f, "red"),
        }
    }
}

/// The polymorphic per-event key within a device: interface index for port
/// and BFD events, peer address for BGP events, alarm color for alarm events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubIndex {
    /// Device-level events (reachability) have no secondary key
    Device,
    Interface(u32),
    Peer(IpAddr),
    Alarm(AlarmColor),
}

impl std::fmt::Display for SubIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubIndex::Device => Ok(()),
            SubIndex::Interface(ifindex) => write!(f, "{}", ifindex),
            SubIndex::Peer(addr) => write!(f, "{}", addr),
            SubIndex::Alarm(color) => write!(f, "{}", color),
        }
    }
}

/// A timestamped entry in an event's log or history list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            message: message.into(),
        }
    }

    /// Formats the entry for the operator protocol: the Unix timestamp and
    /// first line on one line, continuation lines prefixed by a single space
    pub fn api_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (i, line) in self.message.lines().enumerate() {
            if i == 0 {
                lines.push(format!("{} {}", self.timestamp.timestamp(), line));
            } else {
                lines.push(format!(" {}", line));
            }
        }
        if lines.is_empty() {
            lines.push(format!("{} ", self.timestamp.timestamp()));
        }
        lines
    }
}

/// Attributes specific to port state events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PortStateData {
    pub ifindex: Option<u32>,
    pub portstate: Option<InterfaceState>,
    pub flapstate: Option<FlapState>,
    pub flaps: Option<u32>,
    pub descr: Option<String>,
    /// Accumulated downtime across down/up transitions
    pub ac_down: Option<Duration>,
}

/// Attributes specific to BGP events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BgpData {
    pub remote_addr: Option<IpAddr>,
    pub remote_as: Option<u32>,
    /// Peer uptime in hundredths of a second
    pub peer_uptime: Option<u32>,
    pub bgpos: Option<BgpOperState>,
    pub bgpas: Option<BgpAdminStatus>,
}

/// Attributes specific to BFD events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BfdData {
    pub bfdix: Option<u32>,
    pub bfddiscr: Option<u32>,
    pub bfdaddr: Option<IpAddr>,
    pub bfdstate: Option<BfdSessState>,
    pub neigh_rdns: Option<String>,
}

/// Attributes specific to reachability events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReachabilityData {
    pub reachability: Option<ReachabilityState>,
}

/// Attributes specific to chassis alarm events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AlarmData {
    pub alarm_type: Option<AlarmColor>,
    pub alarm_count: Option<u32>,
}

/// Kind-specific event attributes.  The tag is set at construction time and
/// cannot be changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventData {
    PortState(PortStateData),
    Bgp(BgpData),
    Bfd(BfdData),
    Reachability(ReachabilityData),
    Alarm(AlarmData),
}

impl EventData {
    /// Returns an empty payload for the given event kind
    pub fn default_for(kind: EventKind) -> Self {
        match kind {
            EventKind::PortState => EventData::PortState(PortStateData::default()),
            EventKind::Bgp => EventData::Bgp(BgpData::default()),
            EventKind::Bfd => EventData::Bfd(BfdData::default()),
            EventKind::Reachability => EventData::Reachability(ReachabilityData::default()),
            EventKind::Alarm => EventData::Alarm(AlarmData::default()),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            EventData::PortState(_) => EventKind::PortState,
            EventData::Bgp(_) => EventKind::Bgp,
            EventData::Bfd(_) => EventKind::Bfd,
            EventData::Reachability(_) => EventKind::Reachability,
            EventData::Alarm(_) => EventKind::Alarm,
        }
    }

    /// Names of the payload fields that differ between two payloads of the
    /// same kind.  Payloads of different kinds never occur for one event, as
    /// the tag is fixed at construction.
    fn changed_fields(&self, other: &EventData) -> Vec<&'static str> {
        let mut changed = Vec::new();
        match (self, other) {
            (EventData::PortState(a), EventData::PortState(b)) => {
                diff_field(&mut changed, "ifindex", &a.ifindex, &b.ifindex);
                diff_field(&mut changed, "portstate", &a.portstate, &b.portstate);
                diff_field(&mut changed, "flapstate", &a.flapstate, &b.flapstate);
                diff_field(&mut changed, "flaps", &a.flaps, &b.flaps);
                diff_field(&mut changed, "descr", &a.descr, &b.descr);
                diff_field(&mut changed, "ac-down", &a.ac_down, &b.ac_down);
            }
            (EventData::Bgp(a), EventData::Bgp(b)) => {
                diff_field(&mut changed, "remote-addr", &a.remote_addr, &b.remote_addr);
                diff_field(&mut changed, "remote-as", &a.remote_as, &b.remote_as);
                diff_field(&mut changed, "peer-uptime", &a.peer_uptime, &b.peer_uptime);
                diff_field(&mut changed, "bgpos", &a.bgpos, &b.bgpos);
                diff_field(&mut changed, "bgpas", &a.bgpas, &b.bgpas);
            }
            (EventData::Bfd(a), EventData::Bfd(b)) => {
                diff_field(&mut changed, "bfdix", &a.bfdix, &b.bfdix);
                diff_field(&mut changed, "bfddiscr", &a.bfddiscr, &b.bfddiscr);
                diff_field(&mut changed, "bfdaddr", &a.bfdaddr, &b.bfdaddr);
                diff_field(&mut changed, "bfdstate", &a.bfdstate, &b.bfdstate);
                diff_field(&mut changed, "neigh-rdns", &a.neigh_rdns, &b.neigh_rdns);
            }
            (EventData::Reachability(a), EventData::Reachability(b)) => {
                diff_field(&mut changed, "reachability", &a.reachability, &b.reachability);
            }
            (EventData::Alarm(a), EventData::Alarm(b)) => {
                diff_field(&mut changed, "alarm-type", &a.alarm_type, &b.alarm_type);
                diff_field(&mut changed, "alarm-count", &a.alarm_count, &b.alarm_count);
            }
            _ => changed.push("type"),
        }
        changed
    }
}

fn diff_field<T: PartialEq>(changed: &mut Vec<&'static str>, name: &'static str, a: &T, b: &T) {
    if a != b {
        changed.push(name);
    }
}

/// A single event: the shared header plus the kind-specific payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Assigned at first commit; never reused
    pub id: Option<u32>,
    pub router: String,
    pub sub_index: SubIndex,
    pub state: EventState,
    pub opened: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub priority: u32,
    pub polladdr: Option<IpAddr>,
    pub lasttrans: Option<DateTime<Utc>>,
    /// Operator-visible narrative
    pub log: Vec<LogEntry>,
    /// Audit trail; every state transition appends an entry here
    pub history: Vec<LogEntry>,
    #[serde(flatten)]
    pub data: EventData,
}

impl Event {
    /// Creates a new embryonic event for the given identity
    pub fn new(router: impl Into<String>, sub_index: SubIndex, kind: EventKind) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            router: router.into(),
            sub_index,
            state: EventState::Embryonic,
            opened: now,
            updated: now,
            priority: 100,
            polladdr: None,
            lasttrans: None,
            log: Vec::new(),
            history: Vec::new(),
            data: EventData::default_for(kind),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }

    /// Moves the event to a new lifecycle state, recording the transition in
    /// the history.  Illegal transitions are rejected.
    pub fn set_state(&mut self, new_state: EventState, user: &str) -> ZinoResult<()> {
        if self.state == new_state {
            return Ok(());
        }
        if !self.state.can_transition_to(new_state) {
            return Err(ZinoError::InvalidStateTransition {
                from: self.state.to_string(),
                to: new_state.to_string(),
            });
        }
        let message = format!("state change {} -> {} ({})", self.state, new_state, user);
        self.state = new_state;
        self.add_history(message);
        Ok(())
    }

    /// Appends a message to the operator-visible log
    pub fn add_log(&mut self, message: impl Into<String>) {
        self.updated = Utc::now();
        self.log.push(LogEntry::new(message, self.updated));
    }

    /// Appends a message to the audit history
    pub fn add_history(&mut self, message: impl Into<String>) {
        self.updated = Utc::now();
        self.history.push(LogEntry::new(message, self.updated));
    }

    /// Returns the names of all fields that differ from `other`.  Used by the
    /// event store to report commit deltas to observers.
    pub fn changed_fields(&self, other: &Event) -> Vec<&'static str> {
        let mut changed = Vec::new();
        diff_field(&mut changed, "state", &self.state, &other.state);
        diff_field(&mut changed, "opened", &self.opened, &other.opened);
        diff_field(&mut changed, "priority", &self.priority, &other.priority);
        diff_field(&mut changed, "polladdr", &self.polladdr, &other.polladdr);
        diff_field(&mut changed, "lasttrans", &self.lasttrans, &other.lasttrans);
        diff_field(&mut changed, "log", &self.log, &other.log);
        diff_field(&mut changed, "history", &self.history, &other.history);
        changed.extend(self.data.changed_fields(&other.data));
        changed
    }

    /// Dumps the simple attributes for the GETATTRS command.  Timestamps are
    /// Unix seconds, time deltas are seconds, field names use dashes.
    pub fn attrs(&self) -> Vec<(String, String)> {
        let mut attrs: Vec<(String, String)> = Vec::new();
        if let Some(id) = self.id {
            attrs.push(("id".into(), id.to_string()));
        }
        attrs.push(("router".into(), self.router.clone()));
        attrs.push(("type".into(), self.kind().to_string()));
        attrs.push(("state".into(), self.state.to_string()));
        attrs.push(("opened".into(), self.opened.timestamp().to_string()));
        attrs.push(("updated".into(), self.updated.timestamp().to_string()));
        attrs.push(("priority".into(), self.priority.to_string()));
        if let Some(addr) = self.polladdr {
            attrs.push(("polladdr".into(), addr.to_string()));
        }
        if let Some(lasttrans) = self.lasttrans {
            attrs.push(("lasttrans".into(), lasttrans.timestamp().to_string()));
        }
        match &self.data {
            EventData::PortState(data) => {
                push_attr(&mut attrs, "ifindex", &data.ifindex);
                push_attr(&mut attrs, "portstate", &data.portstate);
                push_attr(&mut attrs, "flapstate", &data.flapstate);
                push_attr(&mut attrs, "flaps", &data.flaps);
                push_attr(&mut attrs, "descr", &data.descr);
                if let Some(ac_down) = data.ac_down {
                    attrs.push(("ac-down".into(), ac_down.as_secs().to_string()));
                }
            }
            EventData::Bgp(data) => {
                push_attr(&mut attrs, "remote-addr", &data.remote_addr);
                push_attr(&mut attrs, "remote-AS", &data.remote_as);
                push_attr(&mut attrs, "peer-uptime", &data.peer_uptime);
                push_attr(&mut attrs, "bgpOS", &data.bgpos);
                push_attr(&mut attrs, "bgpAS", &data.bgpas);
            }
            EventData::Bfd(data) => {
                push_attr(&mut attrs, "bfdix", &data.bfdix);
                push_attr(&mut attrs, "bfddiscr", &data.bfddiscr);
                push_attr(&mut attrs, "bfdaddr", &data.bfdaddr);
                push_attr(&mut attrs, "bfdstate", &data.bfdstate);
                push_attr(&mut attrs, "neigh-rdns", &data.neigh_rdns);
            }
            EventData::Reachability(data) => {
                push_attr(&mut attrs, "reachability", &data.reachability);
            }
            EventData::Alarm(data) => {
                push_attr(&mut attrs, "alarm-type", &data.alarm_type);
                push_attr(&mut attrs, "alarm-count", &data.alarm_count);
            }
        }
        attrs
    }

    /// Accessor for port state payloads
    pub fn port_state(&mut self) -> Option<&mut PortStateData> {
        match &mut self.data {
            EventData::PortState(data) => Some(data),
            _ => None,
        }
    }

    /// Accessor for BGP payloads
    pub fn bgp(&mut self) -> Option<&mut BgpData> {
        match &mut self.data {
            EventData::Bgp(data) => Some(data),
            _ => None,
        }
    }

    /// Accessor for BFD payloads
    pub fn bfd(&mut self) -> Option<&mut BfdData> {
        match &mut self.data {
            EventData::Bfd(data) => Some(data),
            _ => None,
        }
    }

    /// Accessor for reachability payloads
    pub fn reachability(&mut self) -> Option<&mut ReachabilityData> {
        match &mut self.data {
            EventData::Reachability(data) => Some(data),
            _ => None,
        }
    }

    /// Accessor for alarm payloads
    pub fn alarm(&mut self) -> Option<&mut AlarmData> {
        match &mut self.data {
            EventData::Alarm(data) => Some(data),
            _ => None,
        }
    }
}

fn push_attr<T: std::fmt::Display>(
    attrs: &mut Vec<(String, String)>,
    name: &str,
    value: &Option<T>,
) {
    if let Some(value) = value {
        attrs.push((name.to_string(), value.to_string()));
    }
}
