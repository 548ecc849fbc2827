//! BFD session polling
//!
//! Walks the vendor BFD session tables and raises events when a session
//! changes state.  Juniper tables are keyed by interface name, Cisco tables
//! by interface index.  Trap handling re-uses the single-session poll path.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::polldevs::PollDevice;
use crate::error::ZinoResult;
use crate::models::devices::{BfdSessState, BfdState};
use crate::models::events::{EventKind, SubIndex};
use crate::runtime::Runtime;
use crate::snmp::{SnmpValue, SparseWalkResponse};
use crate::tasks::check_snmp;
use crate::utils::reverse_dns;

const JUNIPER_BFD_COLUMNS: [(&str, &str); 4] = [
    ("BFD-STD-MIB", "bfdSessState"),
    // Matches ifDescr from the IF-MIB
    ("JUNIPER-BFD-MIB", "jnxBfdSessIntfName"),
    ("BFD-STD-MIB", "bfdSessDiscriminator"),
    ("BFD-STD-MIB", "bfdSessAddr"),
];

const CISCO_BFD_COLUMNS: [(&str, &str); 4] = [
    ("CISCO-IETF-BFD-MIB", "ciscoBfdSessState"),
    // Matches ifIndex from the IF-MIB
    ("CISCO-IETF-BFD-MIB", "ciscoBfdSessInterface"),
    ("CISCO-IETF-BFD-MIB", "ciscoBfdSessDiscriminator"),
    ("CISCO-IETF-BFD-MIB", "ciscoBfdSessAddr"),
];

/// Polls BFD sessions on the device.  With a session index, only that
/// session is refreshed (the path the trap observer uses).
pub async fn run(
    device: &PollDevice,
    runtime: &Arc<Runtime>,
    session_index: Option<u32>,
) -> ZinoResult<()> {
    let (is_juniper, is_cisco) = {
        let state = runtime.state.read();
        match state.devices.get(&device.name) {
            Some(device_state) => (device_state.is_juniper(), device_state.is_cisco()),
            None => return Ok(()),
        }
    };
    if let Some(index) = session_index {
        debug!("{}: polling BFD data for session index {}", device.name, index);
    } else {
        debug!("{}: polling BFD data", device.name);
    }

    if is_juniper {
        let rows = match poll_rows(device, runtime, &JUNIPER_BFD_COLUMNS, session_index).await? {
            Some(rows) => rows,
            None => return Ok(()),
        };
        let by_descr = parse_juniper_rows(&rows);
        update_states_by_descr(device, runtime, by_descr).await;
    } else if is_cisco {
        let rows = match poll_rows(device, runtime, &CISCO_BFD_COLUMNS, session_index).await? {
            Some(rows) => rows,
            None => return Ok(()),
        };
        let by_ifindex = parse_cisco_rows(&rows);
        update_states_by_ifindex(device, runtime, by_ifindex).await;
    }
    Ok(())
}

async fn poll_rows(
    device: &PollDevice,
    runtime: &Arc<Runtime>,
    columns: &[(&str, &str); 4],
    session_index: Option<u32>,
) -> ZinoResult<Option<SparseWalkResponse>> {
    let snmp = runtime.snmp_client(device);
    match session_index {
        None => check_snmp(device, snmp.sparse_walk(columns).await),
        Some(index) => {
            // A single GET of all four columns, shaped like a one-row walk
            let items: Vec<(&str, &str, u32)> = columns
                .iter()
                .map(|(mib, object)| (*mib, *object, index))
                .collect();
            let response = match check_snmp(device, snmp.get_many(&items).await)? {
                Some(response) => response,
                None => return Ok(None),
            };
            let row: HashMap<String, SnmpValue> = response
                .into_iter()
                .map(|(identifier, value)| (identifier.object, value))
                .collect();
            let mut rows = SparseWalkResponse::new();
            rows.insert(crate::snmp::Oid::new(vec![index]), row);
            Ok(Some(rows))
        }
    }
}

fn parse_row(index: u32, row: &HashMap<String, SnmpValue>, state_column: &str, discr_column: &str, addr_column: &str) -> Option<BfdState> {
    let session_state = row.get(state_column).and_then(SnmpValue::as_i64)?;
    Some(BfdState {
        session_state: BfdSessState::from_value(session_state),
        session_index: index,
        session_discr: row.get(discr_column).and_then(SnmpValue::as_u32),
        session_addr: row.get(addr_column).and_then(SnmpValue::as_ip),
    })
}

/// Keyed by the interface's ifDescr value
fn parse_juniper_rows(rows: &SparseWalkResponse) -> HashMap<String, BfdState> {
    let mut states = HashMap::new();
    for (index, row) in rows {
        let interface_name = match row.get("jnxBfdSessIntfName").and_then(SnmpValue::as_text) {
            Some(name) => name,
            None => continue,
        };
        let session_index = index.0.first().copied().unwrap_or(0);
        if let Some(state) = parse_row(session_index, row, "bfdSessState", "bfdSessDiscriminator", "bfdSessAddr") {
            states.insert(interface_name, state);
        }
    }
    states
}

/// Keyed by the interface's ifIndex value
fn parse_cisco_rows(rows: &SparseWalkResponse) -> HashMap<u32, BfdState> {
    let mut states = HashMap::new();
    for (index, row) in rows {
        let ifindex = match row.get("ciscoBfdSessInterface").and_then(SnmpValue::as_u32) {
            Some(ifindex) => ifindex,
            None => continue,
        };
        let session_index = index.0.first().copied().unwrap_or(0);
        if let Some(state) = parse_row(session_index, row, "ciscoBfdSessState", "ciscoBfdSessDiscriminator", "ciscoBfdSessAddr") {
            states.insert(ifindex, state);
        }
    }
    states
}

async fn update_states_by_descr(
    device: &PollDevice,
    runtime: &Arc<Runtime>,
    polled: HashMap<String, BfdState>,
) {
    let changes: Vec<(u32, BfdState)> = {
        let state = runtime.state.read();
        match state.devices.get(&device.name) {
            Some(device_state) => device_state
                .ports
                .values()
                .filter_map(|port| {
                    let descr = port.ifdescr.as_ref()?;
                    let new_state = polled.get(descr)?;
                    Some((port.ifindex, new_state.clone()))
                })
                .collect(),
            None => Vec::new(),
        }
    };
    apply_session_states(device, runtime, changes).await;
}

async fn update_states_by_ifindex(
    device: &PollDevice,
    runtime: &Arc<Runtime>,
    polled: HashMap<u32, BfdState>,
) {
    let changes: Vec<(u32, BfdState)> = {
        let state = runtime.state.read();
        match state.devices.get(&device.name) {
            Some(device_state) => device_state
                .ports
                .values()
                .filter_map(|port| {
                    let new_state = polled.get(&port.ifindex)?;
                    Some((port.ifindex, new_state.clone()))
                })
                .collect(),
            None => Vec::new(),
        }
    };
    apply_session_states(device, runtime, changes).await;
}

/// Applies polled session state to each port, raising events on changes
async fn apply_session_states(
    device: &PollDevice,
    runtime: &Arc<Runtime>,
    changes: Vec<(u32, BfdState)>,
) {
    for (ifindex, new_state) in changes {
        let needs_event = {
            let state = runtime.state.read();
            let port = state
                .devices
                .get(&device.name)
                .and_then(|device_state| device_state.get_port(ifindex));
            match port.and_then(|port| port.bfd_state.as_ref()) {
                Some(old) => old.session_state != new_state.session_state,
                // A session first seen in a non-up state deserves an event
                None => new_state.session_state != BfdSessState::Up,
            }
        };

        if needs_event {
            // Resolve the neighbor name before taking the state lock
            let neigh_rdns = match new_state.session_addr {
                Some(addr) => reverse_dns(addr).await,
                None => None,
            };
            create_or_update_event(device, runtime, ifindex, &new_state, neigh_rdns);
        }

        let mut state = runtime.state.write();
        state
            .get_or_create_device(&device.name)
            .get_or_create_port(ifindex)
            .bfd_state = Some(new_state);
    }
}

fn create_or_update_event(
    device: &PollDevice,
    runtime: &Arc<Runtime>,
    ifindex: u32,
    new_state: &BfdState,
    neigh_rdns: Option<String>,
) {
    let mut state = runtime.state.write();
    let ifdescr = state
        .devices
        .get(&device.name)
        .and_then(|device_state| device_state.get_port(ifindex))
        .and_then(|port| port.ifdescr.clone())
        .unwrap_or_default();

    let (mut event, _created) =
        state
            .events
            .get_or_create(&device.name, SubIndex::Interface(ifindex), EventKind::Bfd);
    event.priority = device.priority;
    event.polladdr = Some(device.address);
    if let Some(payload) = event.bfd() {
        payload.bfdix = Some(new_state.session_index);
        payload.bfddiscr = new_state.session_discr;
        payload.bfdaddr = new_state.session_addr;
        payload.bfdstate = Some(new_state.session_state);
        payload.neigh_rdns = neigh_rdns;
    }
    event.add_log(format!(
        "port {} changed BFD state to {}",
        ifdescr, new_state.session_state
    ));
    if let Err(error) = state.events.commit(event, "monitor") {
        tracing::warn!("could not commit BFD event: {}", error);
    }
}
