//! Shared test harness: a runtime wired to a scripted in-memory SNMP agent
#![allow(dead_code)]

use std::net::IpAddr;
use std::sync::Arc;

use zino::config::Configuration;
use zino::runtime::Runtime;
use zino::snmp::mock::MockBackend;
use zino::snmp::SnmpValue;
use zino::PollDevice;

pub struct TestHarness {
    pub runtime: Arc<Runtime>,
    pub backend: Arc<MockBackend>,
    _dir: tempfile::TempDir,
}

pub fn harness() -> TestHarness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Configuration::default();
    config.persistence.file = dir.path().join("zino-state.json");
    config.archiving.old_events_dir = dir.path().join("old-events");
    config.authentication.file = dir.path().join("secrets");
    config.polling.file = dir.path().join("polldevs.cf");
    std::fs::write(&config.authentication.file, "alice alice-secret\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(
            &config.authentication.file,
            std::fs::Permissions::from_mode(0o600),
        )
        .unwrap();
    }

    let backend = Arc::new(MockBackend::new());
    let runtime = Runtime::with_backend(config, backend.clone()).unwrap();
    TestHarness {
        runtime,
        backend,
        _dir: dir,
    }
}

/// Registers a device in the poll configuration, the address index and the
/// device state, the way a config load would
pub fn add_device(harness: &TestHarness, name: &str, address: &str) -> PollDevice {
    let device = PollDevice {
        name: name.to_string(),
        address: address.parse().unwrap(),
        ..PollDevice::default()
    };
    harness
        .runtime
        .polldevs
        .write()
        .insert(name.to_string(), device.clone());
    let mut state = harness.runtime.state.write();
    state.addresses.insert(device.address, name.to_string());
    state.get_or_create_device(name);
    device
}

pub fn script_uptime(backend: &MockBackend, address: IpAddr, ticks: u32) {
    backend.set(address, "SNMPv2-MIB", "sysUpTime", &[0], SnmpValue::TimeTicks(ticks));
}

#[allow(clippy::too_many_arguments)]
pub fn script_interface(
    backend: &MockBackend,
    address: IpAddr,
    ifindex: u32,
    descr: &str,
    alias: &str,
    admin_status: i64,
    oper_status: i64,
    last_change: u32,
) {
    backend.set(address, "IF-MIB", "ifIndex", &[ifindex], SnmpValue::Integer(ifindex as i64));
    backend.set(
        address,
        "IF-MIB",
        "ifDescr",
        &[ifindex],
        SnmpValue::OctetString(descr.as_bytes().to_vec()),
    );
    backend.set(
        address,
        "IF-MIB",
        "ifAlias",
        &[ifindex],
        SnmpValue::OctetString(alias.as_bytes().to_vec()),
    );
    backend.set(address, "IF-MIB", "ifAdminStatus", &[ifindex], SnmpValue::Integer(admin_status));
    backend.set(address, "IF-MIB", "ifOperStatus", &[ifindex], SnmpValue::Integer(oper_status));
    backend.set(address, "IF-MIB", "ifLastChange", &[ifindex], SnmpValue::TimeTicks(last_change));
}
