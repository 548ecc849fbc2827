//! Port link-state polling
//!
//! Fetches the base interface columns as one sparse walk, applies the
//! per-device watch/ignore policy, and opens or updates port state events on
//! transitions.  Also provides the single-interface verification poll used
//! by link traps, flap aging and the POLLINTF command.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

use crate::config::polldevs::PollDevice;
use crate::error::ZinoResult;
use crate::models::devices::InterfaceState;
use crate::models::events::{EventKind, SubIndex};
use crate::runtime::Runtime;
use crate::snmp::{SnmpValue, SparseWalkResponse};
use crate::state::ZinoState;
use crate::tasks::check_snmp;
use crate::utils::match_at_start;

const BASE_POLL_LIST: [(&str, &str); 6] = [
    ("IF-MIB", "ifIndex"),
    ("IF-MIB", "ifDescr"),
    ("IF-MIB", "ifAlias"),
    ("IF-MIB", "ifAdminStatus"),
    ("IF-MIB", "ifOperStatus"),
    ("IF-MIB", "ifLastChange"),
];

const ADMIN_STATUS_DOWN: i64 = 2;
const OPER_STATUS_UP: i64 = 1;

/// One row of the base interface table
#[derive(Debug, Clone, Default)]
pub(crate) struct BaseInterfaceRow {
    pub index: u32,
    pub descr: Option<String>,
    pub alias: Option<String>,
    pub admin_status: Option<i64>,
    pub oper_status: Option<i64>,
    pub last_change: Option<u64>,
}

impl BaseInterfaceRow {
    fn from_columns(fallback_index: u32, row: &HashMap<String, SnmpValue>) -> Self {
        Self {
            index: row
                .get("ifIndex")
                .and_then(SnmpValue::as_u32)
                .unwrap_or(fallback_index),
            descr: row.get("ifDescr").and_then(SnmpValue::as_text),
            alias: row.get("ifAlias").and_then(SnmpValue::as_text),
            admin_status: row.get("ifAdminStatus").and_then(SnmpValue::as_i64),
            oper_status: row.get("ifOperStatus").and_then(SnmpValue::as_i64),
            last_change: row.get("ifLastChange").and_then(SnmpValue::as_u64),
        }
    }

    fn is_sane(&self) -> bool {
        self.index > 0 && self.descr.as_deref().map(|d| !d.is_empty()).unwrap_or(false)
    }
}

/// Polls and processes the full interface table of a device
pub async fn run(device: &PollDevice, runtime: &Arc<Runtime>) -> ZinoResult<()> {
    let snmp = runtime.snmp_client(device);
    let attrs = match check_snmp(device, snmp.sparse_walk(&BASE_POLL_LIST).await)? {
        Some(attrs) => attrs,
        None => return Ok(()),
    };
    let sysuptime = match check_snmp(device, snmp.get("SNMPv2-MIB", "sysUpTime", Some(0)).await)? {
        Some(uptime) => uptime.value.as_u64().unwrap_or(0),
        None => return Ok(()),
    };

    let now = Utc::now();
    let mut state = runtime.state.write();
    record_boot_time(&mut state, device, sysuptime, now);
    update_interfaces(&mut state, device, &attrs, sysuptime, now);
    Ok(())
}

/// Polls a single interface, typically to verify a state change reported by
/// a trap
pub async fn poll_single_interface(
    device: &PollDevice,
    runtime: &Arc<Runtime>,
    ifindex: u32,
) -> ZinoResult<()> {
    let snmp = runtime.snmp_client(device);
    let columns: Vec<(&str, &str, u32)> = BASE_POLL_LIST
        .iter()
        .map(|(mib, object)| (*mib, *object, ifindex))
        .collect();
    let response = match check_snmp(device, snmp.get_many(&columns).await)? {
        Some(response) => response,
        None => return Ok(()),
    };
    let sysuptime = match check_snmp(device, snmp.get("SNMPv2-MIB", "sysUpTime", Some(0)).await)? {
        Some(uptime) => uptime.value.as_u64().unwrap_or(0),
        None => return Ok(()),
    };

    let row: HashMap<String, SnmpValue> = response
        .into_iter()
        .filter(|(_, value)| {
            !matches!(
                value,
                SnmpValue::NoSuchObject | SnmpValue::NoSuchInstance | SnmpValue::EndOfMibView
            )
        })
        .map(|(identifier, value)| (identifier.object, value))
        .collect();

    let now = Utc::now();
    let mut state = runtime.state.write();
    let data = BaseInterfaceRow::from_columns(ifindex, &row);
    if !data.is_sane() {
        warn!("{}: ix {} returned no usable interface data", device.name, ifindex);
        return Ok(());
    }
    update_single_interface(&mut state, device, &data, sysuptime, now);
    Ok(())
}

fn record_boot_time(state: &mut ZinoState, device: &PollDevice, sysuptime: u64, now: DateTime<Utc>) {
    let restarted = state
        .get_or_create_device(&device.name)
        .set_boot_time_from_uptime(sysuptime, now);
    if restarted {
        warn!("{} appears to have restarted", device.name);
    }
}

fn update_interfaces(
    state: &mut ZinoState,
    device: &PollDevice,
    attrs: &SparseWalkResponse,
    sysuptime: u64,
    now: DateTime<Utc>,
) {
    for (row_index, row) in attrs {
        let fallback = row_index.0.first().copied().unwrap_or(0);
        let data = BaseInterfaceRow::from_columns(fallback, row);
        if !data.is_sane() {
            error!(
                "collected interface data from {} is not sane enough to process: {:?}",
                device.name, data
            );
            continue;
        }
        update_single_interface(state, device, &data, sysuptime, now);
    }
}

/// Decides whether the device's watch/ignore patterns leave this interface
/// monitored
pub(crate) fn is_interface_watched(device: &PollDevice, ifdescr: &str) -> bool {
    if let Some(watchpat) = &device.watchpat {
        if !match_at_start(watchpat, ifdescr) {
            return false;
        }
    }
    if let Some(ignorepat) = &device.ignorepat {
        if match_at_start(ignorepat, ifdescr) {
            return false;
        }
    }
    true
}

pub(crate) fn update_single_interface(
    state: &mut ZinoState,
    device: &PollDevice,
    data: &BaseInterfaceRow,
    sysuptime: u64,
    now: DateTime<Utc>,
) {
    let descr = data.descr.clone().unwrap_or_default();

    {
        let device_state = state.get_or_create_device(&device.name);
        let port = device_state.get_or_create_port(data.index);
        port.ifdescr = Some(descr.clone());
        update_ifalias(&device.name, data, port);
    }

    if !is_interface_watched(device, &descr) {
        return;
    }

    let (admin_status, oper_status) = match (data.admin_status, data.oper_status) {
        (Some(admin), Some(oper)) => (admin, oper),
        _ => {
            warn!(
                "missing ifAdminStatus or ifOperStatus from {} for port {}",
                device.name, data.index
            );
            return;
        }
    };

    let new_state = if admin_status == ADMIN_STATUS_DOWN {
        InterfaceState::AdminDown
    } else {
        InterfaceState::from_oper_status(oper_status)
    };

    let old_state = {
        let device_state = state.get_or_create_device(&device.name);
        let port = device_state.get_or_create_port(data.index);
        // Report ports found in oper-down (but admin-up) state the first
        // time we see them
        if port.state.is_none()
            && oper_status != OPER_STATUS_UP
            && new_state != InterfaceState::AdminDown
        {
            port.state = Some(InterfaceState::Unknown);
        }
        port.state
    };

    if let Some(old_state) = old_state {
        if old_state != new_state {
            make_or_update_state_event(state, device, data, old_state, new_state, sysuptime, now);
        }
    }

    state
        .get_or_create_device(&device.name)
        .get_or_create_port(data.index)
        .state = Some(new_state);
}

fn update_ifalias(device_name: &str, data: &BaseInterfaceRow, port: &mut crate::models::devices::Port) {
    if data.alias == port.ifalias {
        return;
    }
    match &port.ifalias {
        Some(old) => info!(
            "{}: changing desc for {} from {:?} to {:?}",
            device_name, data.index, old, data.alias
        ),
        None => info!(
            "{}: setting desc for {} to {:?}",
            device_name, data.index, data.alias
        ),
    }
    port.ifalias = data.alias.clone();
}

fn make_or_update_state_event(
    state: &mut ZinoState,
    device: &PollDevice,
    data: &BaseInterfaceRow,
    old_state: InterfaceState,
    new_state: InterfaceState,
    sysuptime: u64,
    now: DateTime<Utc>,
) {
    let (mut event, _created) = state.events.get_or_create(
        &device.name,
        SubIndex::Interface(data.index),
        EventKind::PortState,
    );
    event.priority = device.priority;
    event.polladdr = Some(device.address);

    // The agent's notion of when the interface last moved, in our clock
    let lasttrans = data.last_change.map(|last_change| {
        now - Duration::milliseconds((sysuptime.saturating_sub(last_change) * 10) as i64)
    });

    let previous_state = event.port_state().and_then(|payload| payload.portstate);
    let previous_trans = event.lasttrans;
    let went_up = matches!(
        previous_state,
        Some(InterfaceState::Down) | Some(InterfaceState::LowerLayerDown)
    ) && new_state == InterfaceState::Up;

    if let Some(payload) = event.port_state() {
        payload.ifindex = Some(data.index);
        payload.portstate = Some(new_state);
        payload.descr = data.descr.clone();
        if went_up {
            if let Some(previous_trans) = previous_trans {
                let downtime = (now - previous_trans).to_std().unwrap_or_default();
                payload.ac_down = Some(payload.ac_down.unwrap_or_default() + downtime);
            }
        }
    }
    event.lasttrans = lasttrans.or(Some(now));

    let log = format!(
        "{}: port \"{}\" ix {} ({}) changed state from {} to {} on {}",
        device.name,
        data.descr.as_deref().unwrap_or(""),
        data.index,
        data.alias.as_deref().unwrap_or(""),
        old_state,
        new_state,
        event.lasttrans.map(|t| t.timestamp()).unwrap_or(0),
    );
    info!("{}", log);
    event.add_log(log);

    if let Err(error) = state.events.commit(event, "monitor") {
        warn!("could not commit port state event: {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watched_device(watchpat: Option<&str>, ignorepat: Option<&str>) -> PollDevice {
        PollDevice {
            name: "example-gw".to_string(),
            address: "10.0.0.1".parse().unwrap(),
            watchpat: watchpat.map(str::to_string),
            ignorepat: ignorepat.map(str::to_string),
            ..PollDevice::default()
        }
    }

    #[test]
    fn watch_pattern_restricts_monitoring() {
        let device = watched_device(Some("(ge|xe)-"), None);
        assert!(is_interface_watched(&device, "xe-0/0/0"));
        assert!(!is_interface_watched(&device, "lo0"));
    }

    #[test]
    fn ignore_pattern_wins_over_default() {
        let device = watched_device(None, Some("Vlan"));
        assert!(!is_interface_watched(&device, "Vlan100"));
        assert!(is_interface_watched(&device, "Gi1/1"));
    }

    #[test]
    fn unpatterned_devices_watch_everything() {
        let device = watched_device(None, None);
        assert!(is_interface_watched(&device, "anything-at-all"));
    }

    #[test]
    fn insane_rows_are_skipped() {
        let row = BaseInterfaceRow {
            index: 0,
            ..Default::default()
        };
        assert!(!row.is_sane());
        let row = BaseInterfaceRow {
            index: 3,
            descr: Some("Gi1/3".to_string()),
            ..Default::default()
        };
        assert!(row.is_sane());
    }
}
