//! Event lifecycle behavior across the runtime: archiving, snapshots and
//! maintenance windows

mod common;

use chrono::{Duration, Utc};
use common::{add_device, harness};
use zino::models::events::{EventKind, EventState, SubIndex};
use zino::models::pm::{MatchType, PmKind};
use zino::pm;

#[tokio::test]
async fn closed_events_are_archived_to_their_own_files() {
    let harness = harness();
    let id = {
        let mut state = harness.runtime.state.write();
        let (event, _) =
            state
                .events
                .get_or_create("rtr-a", SubIndex::Interface(1), EventKind::PortState);
        state.events.commit(event, "monitor").unwrap()
    };
    {
        let mut state = harness.runtime.state.write();
        let mut event = state.events.checkout(id).unwrap();
        event.set_state(EventState::Closed, "alice").unwrap();
        state.events.commit(event, "alice").unwrap();
    }

    // The archiver runs off the main loop; give it a moment
    let path = harness
        .runtime
        .config()
        .archiving
        .old_events_dir
        .join(format!("{}.json", id));
    for _ in 0..50 {
        if path.exists() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let archived: zino::Event =
        serde_json::from_slice(&std::fs::read(&path).expect("closed event was not archived"))
            .unwrap();
    assert_eq!(archived.id, Some(id));
    assert_eq!(archived.state, EventState::Closed);
}

#[tokio::test]
async fn snapshot_survives_a_restart_with_equal_events() {
    let harness = harness();
    let id = {
        let mut state = harness.runtime.state.write();
        state.get_or_create_device("rtr-a");
        let (mut event, _) =
            state
                .events
                .get_or_create("rtr-a", SubIndex::Interface(1), EventKind::PortState);
        event.add_log("some narrative");
        state.events.commit(event, "monitor").unwrap()
    };
    harness.runtime.save_state().await.unwrap();

    let restored = zino::state::persist::load_snapshot(&harness.runtime.config().persistence.file)
        .unwrap()
        .expect("snapshot file missing");
    let state = harness.runtime.state.read();
    assert_eq!(
        state.events.get_by_id(id).unwrap(),
        restored.events.get_by_id(id).unwrap()
    );
    // Identity lookups work again after the index rebuild
    assert!(restored
        .events
        .get("rtr-a", SubIndex::Interface(1), EventKind::PortState)
        .is_some());
}

#[tokio::test]
async fn maintenance_window_suppresses_and_restores_reachability_events() {
    let harness = harness();
    add_device(&harness, "rtr-c", "10.0.0.3");

    let id = {
        let mut state = harness.runtime.state.write();
        let (event, _) =
            state
                .events
                .get_or_create("rtr-c", SubIndex::Device, EventKind::Reachability);
        state.events.commit(event, "monitor").unwrap()
    };

    let now = Utc::now();
    {
        let mut state = harness.runtime.state.write();
        state.planned_maintenances.create(
            now - Duration::hours(1),
            now + Duration::hours(1),
            PmKind::Device,
            MatchType::Exact,
            "rtr-c".to_string(),
            None,
        );
        pm::update_pm_states(&mut state, now);
    }
    {
        let state = harness.runtime.state.read();
        assert_eq!(state.events.get_by_id(id).unwrap().state, EventState::Ignored);
    }

    // Past the window's end the event reopens with a history note
    {
        let mut state = harness.runtime.state.write();
        pm::update_pm_states(&mut state, now + Duration::hours(2));
    }
    let state = harness.runtime.state.read();
    let event = state.events.get_by_id(id).unwrap();
    assert_eq!(event.state, EventState::Open);
    assert!(event
        .history
        .iter()
        .any(|entry| entry.message.contains("ignored -> open")));
}
