//! Planned maintenance models
//!
//! A planned maintenance (PM) is a time-windowed match rule.  While the
//! window is active, matching events are forced into the ignored state; when
//! the window ends they are restored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::devices::DeviceState;
use crate::models::events::{Event, EventData, LogEntry};
use crate::utils::match_at_start;

/// How a PM's match expression is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    #[serde(rename = "exact")]
    Exact,
    #[serde(rename = "regexp")]
    Regexp,
    #[serde(rename = "str")]
    Str,
    #[serde(rename = "intf-regexp")]
    IntfRegexp,
}

impl MatchType {
    pub fn from_api_name(name: &str) -> Option<Self> {
        match name {
            "exact" => Some(MatchType::Exact),
            "regexp" => Some(MatchType::Regexp),
            "str" => Some(MatchType::Str),
            "intf-regexp" => Some(MatchType::IntfRegexp),
            _ => None,
        }
    }
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MatchType::Exact => "exact",
            MatchType::Regexp => "regexp",
            MatchType::Str => "str",
            MatchType::IntfRegexp => "intf-regexp",
        };
        write!(f, "{}", name)
    }
}

/// What class of events a PM suppresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PmKind {
    Device,
    PortState,
}

impl PmKind {
    pub fn from_api_name(name: &str) -> Option<Self> {
        match name {
            "device" => Some(PmKind::Device),
            "portstate" => Some(PmKind::PortState),
            _ => None,
        }
    }
}

impl std::fmt::Display for PmKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PmKind::Device => write!(f, "device"),
            PmKind::PortState => write!(f, "portstate"),
        }
    }
}

/// A single planned maintenance window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedMaintenance {
    pub id: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub pm_kind: PmKind,
    pub match_type: MatchType,
    pub match_expression: String,
    pub match_device: Option<String>,
    /// Ids of events this PM currently suppresses
    pub event_ids: Vec<u32>,
    pub log: Vec<LogEntry>,
}

impl PlannedMaintenance {
    pub fn add_log(&mut self, message: impl Into<String>) {
        self.log.push(LogEntry::new(message, Utc::now()));
    }

    /// Returns true if the window covers the given instant
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.start_time < now && now < self.end_time
    }

    /// Decides whether an event is covered by this PM's match rule.  The
    /// device registry is consulted to find port descriptions that the event
    /// itself does not carry.
    pub fn matches_event(
        &self,
        event: &Event,
        devices: &std::collections::HashMap<String, DeviceState>,
    ) -> bool {
        match self.pm_kind {
            PmKind::Device => self.matches_device(&event.router),
            PmKind::PortState => self.matches_portstate(event, devices),
        }
    }

    fn matches_device(&self, router: &str) -> bool {
        match self.match_type {
            MatchType::Exact => router == self.match_expression,
            MatchType::Regexp => match_at_start(&self.match_expression, router),
            MatchType::Str => router.contains(&self.match_expression),
            // intf-regexp makes no sense for device PMs
            MatchType::IntfRegexp => false,
        }
    }

    fn matches_portstate(
        &self,
        event: &Event,
        devices: &std::collections::HashMap<String, DeviceState>,
    ) -> bool {
        let data = match &event.data {
            EventData::PortState(data) => data,
            _ => return false,
        };
        let ifdescr = data.descr.clone().or_else(|| {
            let device = devices.get(&event.router)?;
            let ifindex = data.ifindex?;
            device.get_port(ifindex)?.ifdescr.clone()
        });
        let ifdescr = match ifdescr {
            Some(descr) => descr,
            None => return false,
        };

        match self.match_type {
            MatchType::Regexp => match_at_start(&self.match_expression, &ifdescr),
            MatchType::Str => ifdescr.contains(&self.match_expression),
            MatchType::IntfRegexp => {
                self.match_device.as_deref() == Some(event.router.as_str())
                    && match_at_start(&self.match_expression, &ifdescr)
            }
            // exact matching is only defined for device PMs
            MatchType::Exact => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::events::{EventKind, SubIndex};
    use std::collections::HashMap;

    fn pm(kind: PmKind, match_type: MatchType, expr: &str, device: Option<&str>) -> PlannedMaintenance {
        PlannedMaintenance {
            id: 1,
            start_time: Utc::now() - chrono::Duration::hours(1),
            end_time: Utc::now() + chrono::Duration::hours(1),
            pm_kind: kind,
            match_type,
            match_expression: expr.to_string(),
            match_device: device.map(str::to_string),
            event_ids: Vec::new(),
            log: Vec::new(),
        }
    }

    #[test]
    fn exact_device_match() {
        let pm = pm(PmKind::Device, MatchType::Exact, "rtr-c", None);
        let event = Event::new("rtr-c", SubIndex::Device, EventKind::Reachability);
        assert!(pm.matches_event(&event, &HashMap::new()));
        let other = Event::new("rtr-c2", SubIndex::Device, EventKind::Reachability);
        assert!(!pm.matches_event(&other, &HashMap::new()));
    }

    #[test]
    fn regexp_matches_port_description() {
        let pm = pm(PmKind::PortState, MatchType::Regexp, "Gi1/", None);
        let mut event = Event::new("rtr-a", SubIndex::Interface(1), EventKind::PortState);
        event.port_state().unwrap().descr = Some("Gi1/1".to_string());
        assert!(pm.matches_event(&event, &HashMap::new()));
    }

    #[test]
    fn intf_regexp_requires_device_match() {
        let pm = pm(PmKind::PortState, MatchType::IntfRegexp, "ae0", Some("rtr-a"));
        let mut event = Event::new("rtr-b", SubIndex::Interface(3), EventKind::PortState);
        event.port_state().unwrap().descr = Some("ae0.100".to_string());
        assert!(!pm.matches_event(&event, &HashMap::new()));
        event.router = "rtr-a".to_string();
        assert!(pm.matches_event(&event, &HashMap::new()));
    }

    #[test]
    fn substring_match_on_device_name() {
        let pm = pm(PmKind::Device, MatchType::Str, "core", None);
        let event = Event::new("oslo-core-gw", SubIndex::Device, EventKind::Reachability);
        assert!(pm.matches_event(&event, &HashMap::new()));
    }
}
