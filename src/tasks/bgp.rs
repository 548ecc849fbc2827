//! BGP peering session monitoring
//!
//! Detects which family of BGP MIBs the device speaks, walks the peer
//! table, and raises events on session transitions.  Only external peers
//! (remote AS different from the local AS) are monitored.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::polldevs::PollDevice;
use crate::error::ZinoResult;
use crate::models::devices::{BgpAdminStatus, BgpOperState, BgpPeerSession, BgpStyle};
use crate::models::events::{EventKind, EventState, SubIndex};
use crate::runtime::Runtime;
use crate::snmp::{Oid, SnmpClient, SnmpValue, SparseWalkResponse};
use crate::state::ZinoState;
use crate::tasks::check_snmp;

/// Peer addresses that buggy agents leak into the table
const BUGGY_REMOTE_ADDRESSES: [&str; 2] = [
    // JunOS: info from IPv6 BGP sessions spills over
    "0.0.0.0",
    // Earlier Cisco IOS: info from elsewhere spills over
    "32.1.7.0",
];

/// One row of peer data, normalized across the three MIB families
#[derive(Debug, Clone)]
struct BaseBgpRow {
    peer_state: BgpOperState,
    peer_admin_status: BgpAdminStatus,
    peer_remote_address: IpAddr,
    peer_remote_as: u32,
    peer_fsm_established_time: u32,
}

pub async fn run(device: &PollDevice, runtime: &Arc<Runtime>) -> ZinoResult<()> {
    let snmp = runtime.snmp_client(device);

    let bgp_style = detect_bgp_style(device, &snmp).await?;
    {
        let mut state = runtime.state.write();
        let device_state = state.get_or_create_device(&device.name);
        if device_state.bgp_style != bgp_style {
            debug!(
                "router {} changed its BGP style from {:?} to {:?}",
                device.name, device_state.bgp_style, bgp_style
            );
            device_state.bgp_style = bgp_style;
        }
    }
    let bgp_style = match bgp_style {
        Some(style) => style,
        None => return Ok(()),
    };

    let local_as = match get_local_as(device, &snmp, bgp_style).await? {
        Some(local_as) => local_as,
        None => return Ok(()),
    };

    let rows = match poll_peer_rows(device, &snmp, bgp_style).await? {
        Some(rows) => rows,
        None => return Ok(()),
    };

    let mut state = runtime.state.write();
    for row in rows {
        update_single_bgp_entry(&mut state, device, &row, local_as);
    }
    Ok(())
}

/// Probes the vendor subtrees to find out which BGP MIB family the device
/// supports
async fn detect_bgp_style(device: &PollDevice, snmp: &SnmpClient) -> ZinoResult<Option<BgpStyle>> {
    if check_snmp(device, snmp.subtree_is_supported("BGP4-V2-MIB-JUNIPER", "jnxBgpM2").await)?
        .unwrap_or(false)
    {
        return Ok(Some(BgpStyle::Juniper));
    }
    if check_snmp(device, snmp.subtree_is_supported("CISCO-BGP4-MIB", "cbgpPeer2Table").await)?
        .unwrap_or(false)
    {
        return Ok(Some(BgpStyle::Cisco));
    }
    if check_snmp(device, snmp.subtree_is_supported("BGP4-MIB", "bgp").await)?.unwrap_or(false) {
        return Ok(Some(BgpStyle::General));
    }
    Ok(None)
}

async fn get_local_as(
    device: &PollDevice,
    snmp: &SnmpClient,
    bgp_style: BgpStyle,
) -> ZinoResult<Option<u32>> {
    let (mib, object) = match bgp_style {
        BgpStyle::Juniper => ("BGP4-V2-MIB-JUNIPER", "jnxBgpM2PeerLocalAs"),
        BgpStyle::Cisco => ("CISCO-BGP4-MIB", "cbgpLocalAs"),
        BgpStyle::General => ("BGP4-MIB", "bgpLocalAs"),
    };
    let response = check_snmp(device, snmp.get_next(mib, object).await)?;
    let local_as = response.and_then(|object| object.value.as_u32());
    if local_as.is_none() {
        info!("router {} misses {}", device.name, object);
    }
    Ok(local_as)
}

async fn poll_peer_rows(
    device: &PollDevice,
    snmp: &SnmpClient,
    bgp_style: BgpStyle,
) -> ZinoResult<Option<Vec<BaseBgpRow>>> {
    let rows = match bgp_style {
        BgpStyle::Juniper => {
            let columns = [
                ("BGP4-V2-MIB-JUNIPER", "jnxBgpM2PeerState"),
                ("BGP4-V2-MIB-JUNIPER", "jnxBgpM2PeerStatus"),
                ("BGP4-V2-MIB-JUNIPER", "jnxBgpM2PeerRemoteAddr"),
                ("BGP4-V2-MIB-JUNIPER", "jnxBgpM2PeerRemoteAs"),
                ("BGP4-V2-MIB-JUNIPER", "jnxBgpM2PeerFsmEstablishedTime"),
            ];
            let walked = match check_snmp(device, snmp.sparse_walk(&columns).await)? {
                Some(walked) => walked,
                None => return Ok(None),
            };
            normalize_rows(&walked, "jnxBgpM2PeerState", "jnxBgpM2PeerStatus", "jnxBgpM2PeerRemoteAddr", "jnxBgpM2PeerRemoteAs", "jnxBgpM2PeerFsmEstablishedTime", false)
        }
        BgpStyle::Cisco => {
            let columns = [
                ("CISCO-BGP4-MIB", "cbgpPeer2State"),
                ("CISCO-BGP4-MIB", "cbgpPeer2AdminStatus"),
                ("CISCO-BGP4-MIB", "cbgpPeer2RemoteAs"),
                ("CISCO-BGP4-MIB", "cbgpPeer2FsmEstablishedTime"),
            ];
            let walked = match check_snmp(device, snmp.sparse_walk(&columns).await)? {
                Some(walked) => walked,
                None => return Ok(None),
            };
            // The peer address is the row index, not a column
            normalize_rows(&walked, "cbgpPeer2State", "cbgpPeer2AdminStatus", "", "cbgpPeer2RemoteAs", "cbgpPeer2FsmEstablishedTime", true)
        }
        BgpStyle::General => {
            let columns = [
                ("BGP4-MIB", "bgpPeerState"),
                ("BGP4-MIB", "bgpPeerAdminStatus"),
                ("BGP4-MIB", "bgpPeerRemoteAddr"),
                ("BGP4-MIB", "bgpPeerRemoteAs"),
                ("BGP4-MIB", "bgpPeerFsmEstablishedTime"),
            ];
            let walked = match check_snmp(device, snmp.sparse_walk(&columns).await)? {
                Some(walked) => walked,
                None => return Ok(None),
            };
            normalize_rows(&walked, "bgpPeerState", "bgpPeerAdminStatus", "bgpPeerRemoteAddr", "bgpPeerRemoteAs", "bgpPeerFsmEstablishedTime", false)
        }
    };
    Ok(Some(rows))
}

fn normalize_rows(
    walked: &SparseWalkResponse,
    state_col: &str,
    admin_col: &str,
    addr_col: &str,
    as_col: &str,
    uptime_col: &str,
    addr_from_index: bool,
) -> Vec<BaseBgpRow> {
    let mut rows = Vec::new();
    for (index, row) in walked {
        let peer_remote_address = if addr_from_index {
            address_from_row_index(index)
        } else {
            row.get(addr_col).and_then(SnmpValue::as_ip)
        };
        let peer_remote_address = match peer_remote_address {
            Some(address) => address,
            None => continue,
        };
        let peer_state = match row.get(state_col).and_then(SnmpValue::as_i64) {
            Some(value) => BgpOperState::from_value(value),
            None => continue,
        };
        rows.push(BaseBgpRow {
            peer_state,
            peer_admin_status: row
                .get(admin_col)
                .and_then(SnmpValue::as_i64)
                .map(BgpAdminStatus::from_value)
                .unwrap_or(BgpAdminStatus::Unknown),
            peer_remote_address,
            peer_remote_as: row.get(as_col).and_then(SnmpValue::as_u32).unwrap_or(0),
            peer_fsm_established_time: row.get(uptime_col).and_then(SnmpValue::as_u32).unwrap_or(0),
        });
    }
    rows
}

/// Cisco tables index rows by address type, length and the address octets
fn address_from_row_index(index: &Oid) -> Option<IpAddr> {
    let components = &index.0;
    if components.len() >= 6 && components[0] == 1 {
        let octets: Vec<u8> = components[components.len() - 4..]
            .iter()
            .map(|&c| c as u8)
            .collect();
        let array: [u8; 4] = octets.try_into().ok()?;
        return Some(IpAddr::from(array));
    }
    if components.len() >= 18 && components[0] == 2 {
        let octets: Vec<u8> = components[components.len() - 16..]
            .iter()
            .map(|&c| c as u8)
            .collect();
        let array: [u8; 16] = octets.try_into().ok()?;
        return Some(IpAddr::from(array));
    }
    None
}

fn update_single_bgp_entry(
    state: &mut ZinoState,
    device: &PollDevice,
    row: &BaseBgpRow,
    local_as: u32,
) {
    if BUGGY_REMOTE_ADDRESSES
        .iter()
        .any(|buggy| row.peer_remote_address.to_string() == *buggy)
    {
        return;
    }
    // Internal sessions are not interesting
    if row.peer_remote_as == local_as {
        return;
    }

    let peer = row.peer_remote_address;
    let previous = state
        .devices
        .get(&device.name)
        .and_then(|device_state| device_state.bgp_peers.get(&peer))
        .cloned()
        .unwrap_or_default();

    if row.peer_state != BgpOperState::Established {
        let was_established = previous.oper_state == Some(BgpOperState::Established);
        if was_established {
            if matches!(
                row.peer_admin_status,
                BgpAdminStatus::Stop | BgpAdminStatus::Halted
            ) {
                info!("{}: BGP peer {} is admin down", device.name, peer);
                make_bgp_event(state, device, row, format!("peer {} admin down", peer));
            } else {
                info!(
                    "{}: lost BGP peer {}, state {}",
                    device.name, peer, row.peer_state
                );
                make_bgp_event(state, device, row, format!("lost peer {}, state {}", peer, row.peer_state));
            }
        }
    } else {
        // Uptime counters only move backwards when the session was reset
        // behind our back
        if let Some(previous_uptime) = previous.uptime {
            if row.peer_fsm_established_time < previous_uptime {
                info!("{}: BGP peer {} was reset", device.name, peer);
                make_bgp_event(state, device, row, format!("peer {} was reset", peer));
            }
        }
        if previous.oper_state.is_some() && previous.oper_state != Some(BgpOperState::Established) {
            // Reconcile an existing open event rather than opening one for
            // a healthy session
            update_open_bgp_event(state, device, row);
        }
    }

    let device_state = state.get_or_create_device(&device.name);
    device_state.bgp_peers.insert(
        peer,
        BgpPeerSession {
            uptime: Some(row.peer_fsm_established_time),
            admin_status: Some(row.peer_admin_status),
            oper_state: Some(row.peer_state),
        },
    );
}

fn make_bgp_event(state: &mut ZinoState, device: &PollDevice, row: &BaseBgpRow, log: String) {
    let (mut event, _created) = state.events.get_or_create(
        &device.name,
        SubIndex::Peer(row.peer_remote_address),
        EventKind::Bgp,
    );
    event.priority = device.priority;
    event.polladdr = Some(device.address);
    if let Some(payload) = event.bgp() {
        payload.remote_addr = Some(row.peer_remote_address);
        payload.remote_as = Some(row.peer_remote_as);
        payload.peer_uptime = Some(row.peer_fsm_established_time);
        payload.bgpos = Some(row.peer_state);
        payload.bgpas = Some(row.peer_admin_status);
    }
    event.add_log(format!("{}: {}", device.name, log));
    if let Err(error) = state.events.commit(event, "monitor") {
        warn!("could not commit BGP event: {}", error);
    }
}

/// Updates an already-open BGP event when the session has come back
fn update_open_bgp_event(state: &mut ZinoState, device: &PollDevice, row: &BaseBgpRow) {
    let open = state
        .events
        .get(&device.name, SubIndex::Peer(row.peer_remote_address), EventKind::Bgp)
        .and_then(|event| event.id);
    let id = match open {
        Some(id) => id,
        None => return,
    };
    let mut event = match state.events.checkout(id) {
        Ok(event) => event,
        Err(_) => return,
    };
    if event.state == EventState::Closed {
        return;
    }
    if let Some(payload) = event.bgp() {
        payload.bgpos = Some(BgpOperState::Established);
        payload.peer_uptime = Some(row.peer_fsm_established_time);
    }
    event.add_log(format!(
        "{}: peer {} is back up",
        device.name, row.peer_remote_address
    ));
    if let Err(error) = state.events.commit(event, "monitor") {
        warn!("could not commit BGP event: {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cisco_row_index_decodes_ipv4_addresses() {
        // addrtype 1 (ipv4), length 4, then the octets
        let index = Oid::new(vec![1, 4, 10, 0, 0, 1]);
        assert_eq!(
            address_from_row_index(&index),
            Some("10.0.0.1".parse().unwrap())
        );
    }

    #[test]
    fn junk_row_indexes_yield_nothing() {
        assert_eq!(address_from_row_index(&Oid::new(vec![9, 9])), None);
    }

    #[test]
    fn lost_peer_creates_event_only_after_established() {
        let mut state = ZinoState::new();
        let device = PollDevice {
            name: "example-gw".to_string(),
            address: "10.0.0.1".parse().unwrap(),
            ..PollDevice::default()
        };
        state.get_or_create_device(&device.name);
        let row = BaseBgpRow {
            peer_state: BgpOperState::Active,
            peer_admin_status: BgpAdminStatus::Running,
            peer_remote_address: "10.0.0.2".parse().unwrap(),
            peer_remote_as: 65001,
            peer_fsm_established_time: 0,
        };

        // First sighting in a down state: recorded, no event
        update_single_bgp_entry(&mut state, &device, &row, 65000);
        assert!(state
            .events
            .get(&device.name, SubIndex::Peer(row.peer_remote_address), EventKind::Bgp)
            .is_none());

        // Establish, then lose the session: now there is an event
        let established = BaseBgpRow {
            peer_state: BgpOperState::Established,
            peer_fsm_established_time: 1000,
            ..row.clone()
        };
        update_single_bgp_entry(&mut state, &device, &established, 65000);
        update_single_bgp_entry(&mut state, &device, &row, 65000);

        let event = state
            .events
            .get(&device.name, SubIndex::Peer(row.peer_remote_address), EventKind::Bgp)
            .unwrap();
        assert_eq!(event.state, EventState::Open);
    }

    #[test]
    fn internal_peers_are_skipped() {
        let mut state = ZinoState::new();
        let device = PollDevice {
            name: "example-gw".to_string(),
            address: "10.0.0.1".parse().unwrap(),
            ..PollDevice::default()
        };
        let row = BaseBgpRow {
            peer_state: BgpOperState::Idle,
            peer_admin_status: BgpAdminStatus::Running,
            peer_remote_address: "10.0.0.9".parse().unwrap(),
            peer_remote_as: 65000,
            peer_fsm_established_time: 0,
        };
        update_single_bgp_entry(&mut state, &device, &row, 65000);
        assert!(state.devices.get(&device.name).map(|d| d.bgp_peers.is_empty()).unwrap_or(true));
    }
}
