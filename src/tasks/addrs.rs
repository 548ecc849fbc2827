//! Address map maintenance
//!
//! Walks the interface address table and keeps the global address-to-device
//! index current.  The index is what lets the trap receiver attribute traps
//! sent from addresses other than the management address.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::config::polldevs::PollDevice;
use crate::error::ZinoResult;
use crate::runtime::Runtime;
use crate::tasks::check_snmp;

/// Anycast rendezvous-point addresses that show up on many devices at once
/// and would otherwise thrash the index.  Inherited from operations; should
/// eventually move to the configuration file.
static IGNORE_ADDRS: Lazy<HashSet<IpAddr>> = Lazy::new(|| {
    [
        "128.39.0.85",
        "128.39.0.2",
        "193.10.80.229",
        "193.10.251.1",
        "109.105.96.128",
    ]
    .into_iter()
    .filter_map(|addr| addr.parse().ok())
    .collect()
});

static IGNORE_ADDR_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^10\.",
        r"^127\.",
        r"^128\.0\.",
        r"^172\.(1[6-9]|2[0-9]|3[0-1])\.",
        r"^192\.168\.",
    ]
    .into_iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Returns true for addresses that must never enter the address index
pub fn is_ignored(address: &IpAddr) -> bool {
    IGNORE_ADDRS.contains(address)
        || IGNORE_ADDR_PATTERNS
            .iter()
            .any(|pattern| pattern.is_match(&address.to_string()))
}

/// Walks the address table and diffs it against the current index
pub async fn run(device: &PollDevice, runtime: &Arc<Runtime>) -> ZinoResult<()> {
    let snmp = runtime.snmp_client(device);
    let result = match check_snmp(device, snmp.bulk_walk("IP-MIB", "ipAdEntAddr").await)? {
        Some(result) => result,
        None => return Ok(()),
    };
    let addresses: HashSet<IpAddr> = result
        .iter()
        .filter_map(|object| object.value.as_ip())
        .collect();
    debug!("found addresses for {}: {:?}", device.name, addresses);

    update_address_maps(device, runtime, addresses);
    Ok(())
}

fn update_address_maps(device: &PollDevice, runtime: &Arc<Runtime>, addresses: HashSet<IpAddr>) {
    let mut state = runtime.state.write();

    for address in &addresses {
        if is_ignored(address) {
            continue;
        }
        match state.addresses.get(address) {
            None => info!("{} adds address {}", device.name, address),
            Some(owner) if owner != &device.name => {
                info!("home of {} changed from {} to {}", address, owner, device.name)
            }
            _ => {}
        }
        state.addresses.insert(*address, device.name.clone());
    }

    let missing: Vec<IpAddr> = state
        .addresses
        .iter()
        .filter(|(address, owner)| **owner == device.name && !addresses.contains(*address))
        .map(|(address, _)| *address)
        .collect();
    if !missing.is_empty() {
        info!("{} no longer has these addresses: {:?}", device.name, missing);
        for address in &missing {
            state.addresses.remove(address);
        }
    }

    state.get_or_create_device(&device.name).addresses = addresses;
}
