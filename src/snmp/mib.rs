//! Symbolic MIB object resolution
//!
//! Maps `(mib, object)` names to OIDs and back.  The table is a fixed,
//! pre-loaded dump of the objects the monitor actually uses; resolution is
//! deterministic, and reverse lookups are cached.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::collections::HashMap;

use super::{Identifier, Oid, SnmpError, SnmpResult};

struct MibEntry {
    mib: &'static str,
    object: &'static str,
    oid: &'static [u32],
}

#[rustfmt::skip]
static MIB_OBJECTS: &[MibEntry] = &[
    // SNMPv2-MIB system group and standard notifications
    MibEntry { mib: "SNMPv2-MIB", object: "sysDescr", oid: &[1, 3, 6, 1, 2, 1, 1, 1] },
    MibEntry { mib: "SNMPv2-MIB", object: "sysObjectID", oid: &[1, 3, 6, 1, 2, 1, 1, 2] },
    MibEntry { mib: "SNMPv2-MIB", object: "sysUpTime", oid: &[1, 3, 6, 1, 2, 1, 1, 3] },
    MibEntry { mib: "SNMPv2-MIB", object: "snmpTrapOID", oid: &[1, 3, 6, 1, 6, 3, 1, 1, 4, 1] },
    MibEntry { mib: "SNMPv2-MIB", object: "coldStart", oid: &[1, 3, 6, 1, 6, 3, 1, 1, 5, 1] },
    MibEntry { mib: "SNMPv2-MIB", object: "warmStart", oid: &[1, 3, 6, 1, 6, 3, 1, 1, 5, 2] },
    MibEntry { mib: "SNMPv2-MIB", object: "authenticationFailure", oid: &[1, 3, 6, 1, 6, 3, 1, 1, 5, 5] },
    // IF-MIB interface table columns and link traps
    MibEntry { mib: "IF-MIB", object: "ifIndex", oid: &[1, 3, 6, 1, 2, 1, 2, 2, 1, 1] },
    MibEntry { mib: "IF-MIB", object: "ifDescr", oid: &[1, 3, 6, 1, 2, 1, 2, 2, 1, 2] },
    MibEntry { mib: "IF-MIB", object: "ifAdminStatus", oid: &[1, 3, 6, 1, 2, 1, 2, 2, 1, 7] },
    MibEntry { mib: "IF-MIB", object: "ifOperStatus", oid: &[1, 3, 6, 1, 2, 1, 2, 2, 1, 8] },
    MibEntry { mib: "IF-MIB", object: "ifLastChange", oid: &[1, 3, 6, 1, 2, 1, 2, 2, 1, 9] },
    MibEntry { mib: "IF-MIB", object: "ifAlias", oid: &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 18] },
    MibEntry { mib: "IF-MIB", object: "linkDown", oid: &[1, 3, 6, 1, 6, 3, 1, 1, 5, 3] },
    MibEntry { mib: "IF-MIB", object: "linkUp", oid: &[1, 3, 6, 1, 6, 3, 1, 1, 5, 4] },
    // IP-MIB address table
    MibEntry { mib: "IP-MIB", object: "ipAdEntAddr", oid: &[1, 3, 6, 1, 2, 1, 4, 20, 1, 1] },
    // BGP4-MIB (the standard, style "general")
    MibEntry { mib: "BGP4-MIB", object: "bgp", oid: &[1, 3, 6, 1, 2, 1, 15] },
    MibEntry { mib: "BGP4-MIB", object: "bgpLocalAs", oid: &[1, 3, 6, 1, 2, 1, 15, 2] },
    MibEntry { mib: "BGP4-MIB", object: "bgpPeerState", oid: &[1, 3, 6, 1, 2, 1, 15, 3, 1, 2] },
    MibEntry { mib: "BGP4-MIB", object: "bgpPeerAdminStatus", oid: &[1, 3, 6, 1, 2, 1, 15, 3, 1, 3] },
    MibEntry { mib: "BGP4-MIB", object: "bgpPeerRemoteAddr", oid: &[1, 3, 6, 1, 2, 1, 15, 3, 1, 7] },
    MibEntry { mib: "BGP4-MIB", object: "bgpPeerRemoteAs", oid: &[1, 3, 6, 1, 2, 1, 15, 3, 1, 9] },
    MibEntry { mib: "BGP4-MIB", object: "bgpPeerFsmEstablishedTime", oid: &[1, 3, 6, 1, 2, 1, 15, 3, 1, 16] },
    MibEntry { mib: "BGP4-MIB", object: "bgpBackwardTransition", oid: &[1, 3, 6, 1, 2, 1, 15, 7, 2] },
    // CISCO-BGP4-MIB (style "cisco")
    MibEntry { mib: "CISCO-BGP4-MIB", object: "cbgpLocalAs", oid: &[1, 3, 6, 1, 4, 1, 9, 9, 187, 1, 3, 1] },
    MibEntry { mib: "CISCO-BGP4-MIB", object: "cbgpPeer2Table", oid: &[1, 3, 6, 1, 4, 1, 9, 9, 187, 1, 2, 5] },
    MibEntry { mib: "CISCO-BGP4-MIB", object: "cbgpPeer2State", oid: &[1, 3, 6, 1, 4, 1, 9, 9, 187, 1, 2, 5, 1, 3] },
    MibEntry { mib: "CISCO-BGP4-MIB", object: "cbgpPeer2AdminStatus", oid: &[1, 3, 6, 1, 4, 1, 9, 9, 187, 1, 2, 5, 1, 4] },
    MibEntry { mib: "CISCO-BGP4-MIB", object: "cbgpPeer2RemoteAs", oid: &[1, 3, 6, 1, 4, 1, 9, 9, 187, 1, 2, 5, 1, 11] },
    MibEntry { mib: "CISCO-BGP4-MIB", object: "cbgpPeer2FsmEstablishedTime", oid: &[1, 3, 6, 1, 4, 1, 9, 9, 187, 1, 2, 5, 1, 19] },
    // BGP4-V2-MIB-JUNIPER (style "juniper")
    MibEntry { mib: "BGP4-V2-MIB-JUNIPER", object: "jnxBgpM2", oid: &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1] },
    MibEntry { mib: "BGP4-V2-MIB-JUNIPER", object: "jnxBgpM2PeerState", oid: &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 1, 1, 1, 2] },
    MibEntry { mib: "BGP4-V2-MIB-JUNIPER", object: "jnxBgpM2PeerStatus", oid: &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 1, 1, 1, 3] },
    MibEntry { mib: "BGP4-V2-MIB-JUNIPER", object: "jnxBgpM2PeerLocalAddrType", oid: &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 1, 1, 1, 6] },
    MibEntry { mib: "BGP4-V2-MIB-JUNIPER", object: "jnxBgpM2PeerLocalAddr", oid: &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 1, 1, 1, 7] },
    MibEntry { mib: "BGP4-V2-MIB-JUNIPER", object: "jnxBgpM2PeerRemoteAddrType", oid: &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 1, 1, 1, 10] },
    MibEntry { mib: "BGP4-V2-MIB-JUNIPER", object: "jnxBgpM2PeerRemoteAddr", oid: &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 1, 1, 1, 11] },
    MibEntry { mib: "BGP4-V2-MIB-JUNIPER", object: "jnxBgpM2PeerRemoteAs", oid: &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 1, 1, 1, 13] },
    MibEntry { mib: "BGP4-V2-MIB-JUNIPER", object: "jnxBgpM2PeerLocalAs", oid: &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 1, 1, 1, 14] },
    MibEntry { mib: "BGP4-V2-MIB-JUNIPER", object: "jnxBgpM2PeerLastErrorReceived", oid: &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 2, 1, 1, 1] },
    MibEntry { mib: "BGP4-V2-MIB-JUNIPER", object: "jnxBgpM2PeerFsmEstablishedTime", oid: &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 2, 4, 1, 1, 1] },
    MibEntry { mib: "BGP4-V2-MIB-JUNIPER", object: "jnxBgpM2BackwardTransition", oid: &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 0, 1] },
    MibEntry { mib: "BGP4-V2-MIB-JUNIPER", object: "jnxBgpM2Established", oid: &[1, 3, 6, 1, 4, 1, 2636, 5, 1, 1, 0, 2] },
    // BFD-STD-MIB session table and traps
    MibEntry { mib: "BFD-STD-MIB", object: "bfdSessState", oid: &[1, 3, 6, 1, 2, 1, 222, 1, 2, 1, 8] },
    MibEntry { mib: "BFD-STD-MIB", object: "bfdSessDiscriminator", oid: &[1, 3, 6, 1, 2, 1, 222, 1, 2, 1, 4] },
    MibEntry { mib: "BFD-STD-MIB", object: "bfdSessAddr", oid: &[1, 3, 6, 1, 2, 1, 222, 1, 2, 1, 11] },
    MibEntry { mib: "BFD-STD-MIB", object: "bfdSessDiag", oid: &[1, 3, 6, 1, 2, 1, 222, 1, 2, 1, 7] },
    MibEntry { mib: "BFD-STD-MIB", object: "bfdSessUp", oid: &[1, 3, 6, 1, 2, 1, 222, 0, 1] },
    MibEntry { mib: "BFD-STD-MIB", object: "bfdSessDown", oid: &[1, 3, 6, 1, 2, 1, 222, 0, 2] },
    // Vendor BFD session tables
    MibEntry { mib: "JUNIPER-BFD-MIB", object: "jnxBfdSessIntfName", oid: &[1, 3, 6, 1, 4, 1, 2636, 3, 45, 1, 1, 1, 1, 7] },
    MibEntry { mib: "CISCO-IETF-BFD-MIB", object: "ciscoBfdSessState", oid: &[1, 3, 6, 1, 4, 1, 9, 10, 137, 1, 2, 1, 1, 6] },
    MibEntry { mib: "CISCO-IETF-BFD-MIB", object: "ciscoBfdSessInterface", oid: &[1, 3, 6, 1, 4, 1, 9, 10, 137, 1, 2, 1, 1, 23] },
    MibEntry { mib: "CISCO-IETF-BFD-MIB", object: "ciscoBfdSessDiscriminator", oid: &[1, 3, 6, 1, 4, 1, 9, 10, 137, 1, 2, 1, 1, 2] },
    MibEntry { mib: "CISCO-IETF-BFD-MIB", object: "ciscoBfdSessAddr", oid: &[1, 3, 6, 1, 4, 1, 9, 10, 137, 1, 2, 1, 1, 5] },
    // Juniper chassis alarms
    MibEntry { mib: "JUNIPER-ALARM-MIB", object: "jnxYellowAlarmCount", oid: &[1, 3, 6, 1, 4, 1, 2636, 3, 4, 2, 3, 2] },
    MibEntry { mib: "JUNIPER-ALARM-MIB", object: "jnxRedAlarmCount", oid: &[1, 3, 6, 1, 4, 1, 2636, 3, 4, 2, 2, 2] },
    // Cisco operational traps
    MibEntry { mib: "CISCOTRAP-MIB", object: "reload", oid: &[1, 3, 6, 1, 4, 1, 9, 0, 0] },
    MibEntry { mib: "CISCOTRAP-MIB", object: "tcpConnectionClose", oid: &[1, 3, 6, 1, 4, 1, 9, 0, 1] },
    MibEntry { mib: "CISCO-CONFIG-MAN-MIB", object: "ciscoConfigManEvent", oid: &[1, 3, 6, 1, 4, 1, 9, 9, 43, 2, 0, 1] },
    MibEntry { mib: "CISCO-CONFIG-MAN-MIB", object: "ccmHistoryEventCommandSource", oid: &[1, 3, 6, 1, 4, 1, 9, 9, 43, 1, 1, 6, 1, 3] },
    MibEntry { mib: "CISCO-CONFIG-MAN-MIB", object: "ccmHistoryEventConfigSource", oid: &[1, 3, 6, 1, 4, 1, 9, 9, 43, 1, 1, 6, 1, 4] },
    MibEntry { mib: "CISCO-CONFIG-MAN-MIB", object: "ccmHistoryEventConfigDestination", oid: &[1, 3, 6, 1, 4, 1, 9, 9, 43, 1, 1, 6, 1, 5] },
    // SNMPv2-SMI roots
    MibEntry { mib: "SNMPv2-SMI", object: "enterprises", oid: &[1, 3, 6, 1, 4, 1] },
];

static NAME_INDEX: Lazy<HashMap<(&'static str, &'static str), Oid>> = Lazy::new(|| {
    MIB_OBJECTS
        .iter()
        .map(|entry| ((entry.mib, entry.object), Oid::from(entry.oid)))
        .collect()
});

static REVERSE_CACHE: Lazy<DashMap<Oid, Option<Identifier>>> = Lazy::new(DashMap::new);

/// The OID prefix under which all enterprise-specific objects live
pub static ENTERPRISES: Lazy<Oid> = Lazy::new(|| Oid::from(&[1, 3, 6, 1, 4, 1][..]));

/// Resolves a symbolic `(mib, object)` pair to its OID
pub fn resolve_symbol(mib: &str, object: &str) -> SnmpResult<Oid> {
    NAME_INDEX
        .get(&(mib, object))
        .cloned()
        .ok_or_else(|| SnmpError::MibNotFound(format!("{}::{}", mib, object)))
}

/// Resolves an OID back to the longest-prefix matching symbolic identifier,
/// splitting off the remaining components as the row index
pub fn resolve_oid(oid: &Oid) -> Option<Identifier> {
    if let Some(cached) = REVERSE_CACHE.get(oid) {
        return cached.clone();
    }
    let mut best: Option<&MibEntry> = None;
    for entry in MIB_OBJECTS {
        let entry_oid = Oid::from(entry.oid);
        let covers = entry_oid.is_prefix_of(oid) || entry_oid == *oid;
        if covers && best.map(|current| current.oid.len() < entry.oid.len()).unwrap_or(true) {
            best = Some(entry);
        }
    }
    let resolved = best.map(|entry| {
        let entry_oid = Oid::from(entry.oid);
        let index = oid.strip_prefix(&entry_oid).filter(|index| !index.is_empty());
        Identifier {
            mib: entry.mib.to_string(),
            object: entry.object.to_string(),
            index,
        }
    });
    REVERSE_CACHE.insert(oid.clone(), resolved.clone());
    resolved
}

/// Extracts the enterprise number from a sysObjectID value, if the OID lives
/// under the standard enterprises arc
pub fn enterprise_id(sys_object_id: &Oid) -> Option<u32> {
    sys_object_id
        .strip_prefix(&ENTERPRISES)
        .and_then(|suffix| suffix.0.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_resolution_is_deterministic() {
        let uptime = resolve_symbol("SNMPv2-MIB", "sysUpTime").unwrap();
        assert_eq!(uptime.to_string(), ".1.3.6.1.2.1.1.3");
        assert_eq!(resolve_symbol("SNMPv2-MIB", "sysUpTime").unwrap(), uptime);
    }

    #[test]
    fn unknown_symbol_is_classified() {
        let error = resolve_symbol("NO-SUCH-MIB", "nothing").unwrap_err();
        assert!(matches!(error, SnmpError::MibNotFound(_)));
    }

    #[test]
    fn reverse_resolution_extracts_row_index() {
        let oid = resolve_symbol("IF-MIB", "ifOperStatus").unwrap().child(17);
        let identifier = resolve_oid(&oid).unwrap();
        assert_eq!(identifier.mib, "IF-MIB");
        assert_eq!(identifier.object, "ifOperStatus");
        assert_eq!(identifier.index, Some(Oid::new(vec![17])));
    }

    #[test]
    fn reverse_resolution_prefers_longest_prefix() {
        // bgpPeerState lives under the bgp subtree; the more specific entry wins
        let oid = resolve_symbol("BGP4-MIB", "bgpPeerState").unwrap().child(1);
        let identifier = resolve_oid(&oid).unwrap();
        assert_eq!(identifier.object, "bgpPeerState");
    }

    #[test]
    fn enterprise_id_from_sys_object_id() {
        let juniper = Oid::parse(".1.3.6.1.4.1.2636.1.1.1.2.21").unwrap();
        assert_eq!(enterprise_id(&juniper), Some(2636));
        let off_tree = Oid::parse(".1.3.6.1.2.1.1").unwrap();
        assert_eq!(enterprise_id(&off_tree), None);
    }
}
