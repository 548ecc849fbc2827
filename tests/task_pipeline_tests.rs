//! End-to-end poll cycle behavior against a scripted agent

mod common;

use common::{add_device, harness, script_interface, script_uptime};
use tokio::sync::mpsc;
use zino::api::notify::NotificationRegistry;
use zino::models::devices::InterfaceState;
use zino::models::events::{EventKind, EventState, ReachabilityState, SubIndex};
use zino::models::EventData;
use zino::snmp::{Oid, SnmpValue};
use zino::tasks;

#[tokio::test]
async fn link_state_poll_opens_portstate_event() {
    let harness = harness();
    let device = add_device(&harness, "rtr-a", "10.0.0.1");
    script_uptime(&harness.backend, device.address, 360_000);
    script_interface(&harness.backend, device.address, 1, "Gi1/1", "uplink", 1, 2, 350_000);

    // Tie a notification channel so the commit delta is observable
    let registry = std::sync::Arc::new(NotificationRegistry::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let nonce = registry.register(tx);
    assert!(registry.tie(&nonce));
    {
        let registry = registry.clone();
        let mut state = harness.runtime.state.write();
        state.events.add_observer(Box::new(move |new_event, old_event, changed| {
            let batch = NotificationRegistry::build_notifications(new_event, old_event, changed);
            registry.send_notifications(&batch);
        }));
    }

    tasks::run_all_tasks(&device, &harness.runtime).await;

    let state = harness.runtime.state.read();
    let event = state
        .events
        .get("rtr-a", SubIndex::Interface(1), EventKind::PortState)
        .expect("no port state event was opened");
    assert_eq!(event.state, EventState::Open);
    assert_eq!(event.priority, device.priority);
    match &event.data {
        EventData::PortState(data) => {
            assert_eq!(data.portstate, Some(InterfaceState::Down));
            assert_eq!(data.descr.as_deref(), Some("Gi1/1"));
            assert_eq!(data.ifindex, Some(1));
        }
        other => panic!("wrong payload: {:?}", other),
    }

    let id = event.id.unwrap();
    let first = rx.try_recv().expect("no notification was delivered");
    assert_eq!(first, format!("{} state embryonic open", id));
}

#[tokio::test]
async fn admin_down_beats_oper_status() {
    let harness = harness();
    let device = add_device(&harness, "rtr-a", "10.0.0.1");
    script_uptime(&harness.backend, device.address, 360_000);
    script_interface(&harness.backend, device.address, 7, "Gi1/7", "", 2, 1, 0);

    tasks::linkstate::run(&device, &harness.runtime).await.unwrap();

    let state = harness.runtime.state.read();
    let port = state.devices["rtr-a"].get_port(7).unwrap();
    assert_eq!(port.state, Some(InterfaceState::AdminDown));
    // Going admin-down on first sight is not an event
    assert!(state
        .events
        .get("rtr-a", SubIndex::Interface(7), EventKind::PortState)
        .is_none());
}

#[tokio::test]
async fn ignored_interfaces_never_make_events() {
    let harness = harness();
    let mut device = add_device(&harness, "rtr-a", "10.0.0.1");
    device.ignorepat = Some("Gi1/".to_string());
    script_uptime(&harness.backend, device.address, 360_000);
    script_interface(&harness.backend, device.address, 1, "Gi1/1", "", 1, 2, 0);

    tasks::linkstate::run(&device, &harness.runtime).await.unwrap();

    let state = harness.runtime.state.read();
    // The port itself is still recorded, but carries no monitored state
    let port = state.devices["rtr-a"].get_port(1).unwrap();
    assert_eq!(port.state, None);
    assert!(state
        .events
        .get("rtr-a", SubIndex::Interface(1), EventKind::PortState)
        .is_none());
}

#[tokio::test]
async fn unreachable_device_opens_event_and_schedules_backoff() {
    let harness = harness();
    let device = add_device(&harness, "rtr-b", "10.0.0.2");
    script_uptime(&harness.backend, device.address, 100);
    script_interface(&harness.backend, device.address, 1, "Gi1/1", "", 1, 1, 0);
    harness.backend.set_unreachable(device.address, true);

    tasks::run_all_tasks(&device, &harness.runtime).await;

    {
        let state = harness.runtime.state.read();
        let event = state
            .events
            .get("rtr-b", SubIndex::Device, EventKind::Reachability)
            .expect("no reachability event");
        match &event.data {
            EventData::Reachability(data) => {
                assert_eq!(data.reachability, Some(ReachabilityState::NoResponse))
            }
            other => panic!("wrong payload: {:?}", other),
        }
        // The cycle was aborted before the link state task could run
        assert!(state
            .events
            .get("rtr-b", SubIndex::Interface(1), EventKind::PortState)
            .is_none());
    }
    // One back-off probe per interval
    assert_eq!(harness.runtime.jobs.len(), 5);

    // The device answers again: event flips, pending probes are cancelled
    harness.backend.set_unreachable(device.address, false);
    tasks::reachable::run(&device, &harness.runtime).await.unwrap();

    let state = harness.runtime.state.read();
    let event = state
        .events
        .get("rtr-b", SubIndex::Device, EventKind::Reachability)
        .unwrap();
    match &event.data {
        EventData::Reachability(data) => {
            assert_eq!(data.reachability, Some(ReachabilityState::Reachable))
        }
        other => panic!("wrong payload: {:?}", other),
    }
    assert!(harness.runtime.jobs.is_empty());
}

#[tokio::test]
async fn vendor_task_records_enterprise_id() {
    let harness = harness();
    let device = add_device(&harness, "rtr-a", "10.0.0.1");
    harness.backend.set(
        device.address,
        "SNMPv2-MIB",
        "sysObjectID",
        &[0],
        SnmpValue::ObjectId(Oid::parse(".1.3.6.1.4.1.2636.1.1.1.2.21").unwrap()),
    );

    tasks::vendor::run(&device, &harness.runtime).await.unwrap();

    let state = harness.runtime.state.read();
    let device_state = &state.devices["rtr-a"];
    assert_eq!(device_state.enterprise_id, Some(2636));
    assert!(device_state.is_juniper());
}

#[tokio::test]
async fn juniper_alarm_counters_open_per_color_events() {
    let harness = harness();
    let device = add_device(&harness, "rtr-a", "10.0.0.1");
    {
        let mut state = harness.runtime.state.write();
        state.get_or_create_device("rtr-a").enterprise_id = Some(2636);
    }
    harness
        .backend
        .set(device.address, "JUNIPER-ALARM-MIB", "jnxYellowAlarmCount", &[0], SnmpValue::Gauge32(2));
    harness
        .backend
        .set(device.address, "JUNIPER-ALARM-MIB", "jnxRedAlarmCount", &[0], SnmpValue::Gauge32(0));

    tasks::alarms::run(&device, &harness.runtime).await.unwrap();

    let state = harness.runtime.state.read();
    let yellow = state
        .events
        .get(
            "rtr-a",
            SubIndex::Alarm(zino::models::AlarmColor::Yellow),
            EventKind::Alarm,
        )
        .expect("no yellow alarm event");
    match &yellow.data {
        EventData::Alarm(data) => assert_eq!(data.alarm_count, Some(2)),
        other => panic!("wrong payload: {:?}", other),
    }
    // An unchanged count of zero red alarms is not an event
    assert!(state
        .events
        .get(
            "rtr-a",
            SubIndex::Alarm(zino::models::AlarmColor::Red),
            EventKind::Alarm,
        )
        .is_none());
}

#[tokio::test]
async fn address_map_task_updates_the_index() {
    let harness = harness();
    let device = add_device(&harness, "rtr-a", "10.0.0.1");
    harness.backend.set(
        device.address,
        "IP-MIB",
        "ipAdEntAddr",
        &[128, 39, 70, 1],
        SnmpValue::IpAddress("128.39.70.1".parse().unwrap()),
    );
    harness.backend.set(
        device.address,
        "IP-MIB",
        "ipAdEntAddr",
        &[192, 168, 1, 1],
        SnmpValue::IpAddress("192.168.1.1".parse().unwrap()),
    );

    tasks::addrs::run(&device, &harness.runtime).await.unwrap();

    let state = harness.runtime.state.read();
    // The public address was learned; the RFC1918 one was filtered out
    assert_eq!(
        state.addresses.get(&"128.39.70.1".parse().unwrap()),
        Some(&"rtr-a".to_string())
    );
    assert!(!state
        .addresses
        .contains_key(&"192.168.1.1".parse::<std::net::IpAddr>().unwrap()));
}
