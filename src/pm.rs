//! Planned maintenance bookkeeping and the periodic PM engine
//!
//! The engine runs once a minute: it starts windows that have begun,
//! sweeps open events into active windows, restores events whose window
//! ended, and discards long-expired maintenances.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::events::{EventKind, EventState, SubIndex};
use crate::models::pm::{MatchType, PlannedMaintenance, PmKind};
use crate::state::ZinoState;

/// How long an ended PM is kept around before being discarded, in seconds
pub const PM_EXPIRY_SECONDS: i64 = 3 * 24 * 60 * 60;

/// Observer invoked whenever a planned maintenance is added or removed
pub type PmObserver = Box<dyn Fn() + Send + Sync>;

/// The registry of all planned maintenances
#[derive(Serialize, Deserialize, Default)]
pub struct PlannedMaintenances {
    planned_maintenances: BTreeMap<u32, PlannedMaintenance>,
    last_pm_id: u32,
    last_run: Option<DateTime<Utc>>,
    #[serde(skip)]
    observers: Vec<PmObserver>,
}

impl PlannedMaintenances {
    /// Creates a new planned maintenance and returns its id
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &mut self,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        pm_kind: PmKind,
        match_type: MatchType,
        match_expression: String,
        match_device: Option<String>,
    ) -> u32 {
        self.last_pm_id += 1;
        let id = self.last_pm_id;
        self.planned_maintenances.insert(
            id,
            PlannedMaintenance {
                id,
                start_time,
                end_time,
                pm_kind,
                match_type,
                match_expression,
                match_device,
                event_ids: Vec::new(),
                log: Vec::new(),
            },
        );
        self.notify_observers();
        id
    }

    /// Deletes a planned maintenance, noting who asked and why
    pub fn close(&mut self, id: u32, reason: &str, user: &str) -> bool {
        let removed = match self.planned_maintenances.get_mut(&id) {
            Some(pm) => {
                pm.add_log(format!("PM closed by {}: {}", user, reason));
                true
            }
            None => false,
        };
        if removed {
            self.planned_maintenances.remove(&id);
            self.notify_observers();
        }
        removed
    }

    pub fn get(&self, id: u32) -> Option<&PlannedMaintenance> {
        self.planned_maintenances.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut PlannedMaintenance> {
        self.planned_maintenances.get_mut(&id)
    }

    pub fn all(&self) -> impl Iterator<Item = &PlannedMaintenance> {
        self.planned_maintenances.values()
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    pub fn add_observer(&mut self, observer: PmObserver) {
        self.observers.push(observer);
    }

    /// PMs whose window began since the last engine run
    fn started_ids(&self, now: DateTime<Utc>) -> Vec<u32> {
        let last_run = self.last_run.unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.planned_maintenances
            .values()
            .filter(|pm| last_run < pm.start_time && pm.start_time <= now && now < pm.end_time)
            .map(|pm| pm.id)
            .collect()
    }

    /// PMs whose window ended since the last engine run
    fn ended_ids(&self, now: DateTime<Utc>) -> Vec<u32> {
        let last_run = self.last_run.unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.planned_maintenances
            .values()
            .filter(|pm| last_run < pm.end_time && pm.end_time <= now)
            .map(|pm| pm.id)
            .collect()
    }

    /// Ids of all PMs whose window covers `now`
    pub fn active_ids(&self, now: DateTime<Utc>) -> Vec<u32> {
        self.planned_maintenances
            .values()
            .filter(|pm| pm.is_active(now))
            .map(|pm| pm.id)
            .collect()
    }

    fn expired_ids(&self, now: DateTime<Utc>) -> Vec<u32> {
        self.planned_maintenances
            .values()
            .filter(|pm| (now - pm.end_time).num_seconds() > PM_EXPIRY_SECONDS)
            .map(|pm| pm.id)
            .collect()
    }

    fn notify_observers(&self) {
        for observer in &self.observers {
            observer();
        }
    }
}

/// Runs one pass of the planned maintenance engine
pub fn update_pm_states(state: &mut ZinoState, now: DateTime<Utc>) {
    for pm_id in state.planned_maintenances.started_ids(now) {
        start_maintenance(state, pm_id, now);
    }

    sweep_events_into_active_windows(state, now);

    for pm_id in state.planned_maintenances.ended_ids(now) {
        end_maintenance(state, pm_id);
    }

    for pm_id in state.planned_maintenances.expired_ids(now) {
        state
            .planned_maintenances
            .close(pm_id, "timer expiry for old PMs", "zino");
    }

    state.planned_maintenances.last_run = Some(now);
}

/// Begins a maintenance window: matching events are ignored, and device
/// windows make sure a reachability event exists to suppress
fn start_maintenance(state: &mut ZinoState, pm_id: u32, now: DateTime<Utc>) {
    let pm = match state.planned_maintenances.get(pm_id) {
        Some(pm) => pm,
        None => return,
    };
    info!("starting planned maintenance {}", pm_id);

    if pm.pm_kind == PmKind::Device {
        let matching_devices: Vec<String> = state
            .devices
            .keys()
            .filter(|name| {
                let probe = crate::models::events::Event::new(
                    name.as_str(),
                    SubIndex::Device,
                    EventKind::Reachability,
                );
                pm.matches_event(&probe, &state.devices)
            })
            .cloned()
            .collect();
        for device in matching_devices {
            ensure_ignored_reachability_event(state, &device, pm_id);
        }
    }

    sweep_events_into_active_windows(state, now);
}

/// Creates (or keeps) a reachability event for a device under maintenance,
/// in ignored state
fn ensure_ignored_reachability_event(state: &mut ZinoState, device: &str, pm_id: u32) {
    let (mut event, created) =
        state
            .events
            .get_or_create(device, SubIndex::Device, EventKind::Reachability);
    if !created && event.state == EventState::Ignored {
        return;
    }
    if created {
        // Opening happens implicitly on commit; go straight to ignored
        if event.set_state(EventState::Open, "zino").is_err() {
            return;
        }
    }
    if let Err(error) = event.set_state(EventState::Ignored, "zino") {
        warn!("could not ignore reachability event for {}: {}", device, error);
        return;
    }
    event.add_log(format!("device under planned maintenance id {}", pm_id));
    match state.events.commit(event, "zino") {
        Ok(id) => {
            if let Some(pm) = state.planned_maintenances.get_mut(pm_id) {
                if !pm.event_ids.contains(&id) {
                    pm.event_ids.push(id);
                }
            }
        }
        Err(error) => warn!("failed to commit maintenance event for {}: {}", device, error),
    }
}

/// Forces every open event matched by an active window into ignored state
fn sweep_events_into_active_windows(state: &mut ZinoState, now: DateTime<Utc>) {
    let active = state.planned_maintenances.active_ids(now);
    if active.is_empty() {
        return;
    }

    let mut matched: Vec<(u32, u32)> = Vec::new();
    for event in state.events.open_events() {
        if matches!(event.state, EventState::Ignored | EventState::Closed) {
            continue;
        }
        for &pm_id in &active {
            let pm = match state.planned_maintenances.get(pm_id) {
                Some(pm) => pm,
                None => continue,
            };
            if pm.matches_event(event, &state.devices) {
                if let Some(event_id) = event.id {
                    matched.push((event_id, pm_id));
                }
                break;
            }
        }
    }

    for (event_id, pm_id) in matched {
        let mut event = match state.events.checkout(event_id) {
            Ok(event) => event,
            Err(_) => continue,
        };
        if let Err(error) = event.set_state(EventState::Ignored, "zino") {
            warn!("cannot move event {} into maintenance: {}", event_id, error);
            continue;
        }
        event.add_log(format!("entered into existing active PM event id {}", pm_id));
        if state.events.commit(event, "zino").is_ok() {
            if let Some(pm) = state.planned_maintenances.get_mut(pm_id) {
                if !pm.event_ids.contains(&event_id) {
                    pm.event_ids.push(event_id);
                }
            }
        }
    }
}

/// Ends a maintenance window: every event it suppressed that is still
/// ignored goes back to open
fn end_maintenance(state: &mut ZinoState, pm_id: u32) {
    let event_ids = match state.planned_maintenances.get(pm_id) {
        Some(pm) => pm.event_ids.clone(),
        None => return,
    };
    info!("ending planned maintenance {}", pm_id);

    for event_id in event_ids {
        let mut event = match state.events.checkout(event_id) {
            Ok(event) => event,
            Err(_) => continue,
        };
        if event.state != EventState::Ignored {
            continue;
        }
        if event.set_state(EventState::Open, "zino").is_err() {
            continue;
        }
        event.add_log(format!("planned maintenance id {} ended", pm_id));
        if let Err(error) = state.events.commit(event, "zino") {
            warn!("failed to restore event {} after maintenance: {}", event_id, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::models::events::Event;

    fn hour() -> Duration {
        Duration::hours(1)
    }

    fn device_pm(state: &mut ZinoState, expression: &str, now: DateTime<Utc>) -> u32 {
        state.planned_maintenances.create(
            now - hour(),
            now + hour(),
            PmKind::Device,
            MatchType::Exact,
            expression.to_string(),
            None,
        )
    }

    #[test]
    fn active_device_pm_ignores_matching_reachability_event() {
        let mut state = ZinoState::new();
        state.get_or_create_device("rtr-c");
        let (event, _) =
            state
                .events
                .get_or_create("rtr-c", SubIndex::Device, EventKind::Reachability);
        let id = state.events.commit(event, "monitor").unwrap();

        let now = Utc::now();
        device_pm(&mut state, "rtr-c", now);
        update_pm_states(&mut state, now);

        let event = state.events.get_by_id(id).unwrap();
        assert_eq!(event.state, EventState::Ignored);
    }

    #[test]
    fn device_pm_creates_missing_reachability_event_as_ignored() {
        let mut state = ZinoState::new();
        state.get_or_create_device("rtr-c");
        let now = Utc::now();
        device_pm(&mut state, "rtr-c", now);
        update_pm_states(&mut state, now);

        let event = state
            .events
            .get("rtr-c", SubIndex::Device, EventKind::Reachability)
            .unwrap();
        assert_eq!(event.state, EventState::Ignored);
        let pm_id = state.planned_maintenances.all().next().unwrap().id;
        assert!(state
            .planned_maintenances
            .get(pm_id)
            .unwrap()
            .event_ids
            .contains(&event.id.unwrap()));
    }

    #[test]
    fn window_end_restores_ignored_events() {
        let mut state = ZinoState::new();
        state.get_or_create_device("rtr-c");
        let now = Utc::now();
        device_pm(&mut state, "rtr-c", now);
        update_pm_states(&mut state, now);

        let id = state
            .events
            .get("rtr-c", SubIndex::Device, EventKind::Reachability)
            .unwrap()
            .id
            .unwrap();

        // Two hours later the window has passed
        let later = now + Duration::hours(2);
        update_pm_states(&mut state, later);

        let event = state.events.get_by_id(id).unwrap();
        assert_eq!(event.state, EventState::Open);
        assert!(event
            .log
            .iter()
            .any(|entry| entry.message.contains("ended")));
    }

    #[test]
    fn operator_handled_events_are_not_reopened() {
        let mut state = ZinoState::new();
        state.get_or_create_device("rtr-c");
        let now = Utc::now();
        device_pm(&mut state, "rtr-c", now);
        update_pm_states(&mut state, now);

        let id = state
            .events
            .get("rtr-c", SubIndex::Device, EventKind::Reachability)
            .unwrap()
            .id
            .unwrap();
        let mut event = state.events.checkout(id).unwrap();
        event.set_state(EventState::Open, "operator").unwrap();
        event.set_state(EventState::Working, "operator").unwrap();
        state.events.commit(event, "operator").unwrap();

        // Re-running within the window pulls it back into the PM
        update_pm_states(&mut state, now + Duration::minutes(1));
        assert_eq!(
            state.events.get_by_id(id).unwrap().state,
            EventState::Ignored
        );
    }

    #[test]
    fn expired_pms_are_discarded_after_three_days() {
        let mut state = ZinoState::new();
        let now = Utc::now();
        let pm_id = state.planned_maintenances.create(
            now - Duration::days(5),
            now - Duration::days(4),
            PmKind::Device,
            MatchType::Exact,
            "rtr-x".to_string(),
            None,
        );
        update_pm_states(&mut state, now);
        assert!(state.planned_maintenances.get(pm_id).is_none());
    }

    #[test]
    fn portstate_pm_only_touches_matching_ports() {
        let mut state = ZinoState::new();
        state.get_or_create_device("rtr-a");
        let mut event = Event::new("rtr-a", SubIndex::Interface(1), EventKind::PortState);
        event.port_state().unwrap().descr = Some("ae0.100".to_string());
        let matching = state.events.commit(event, "monitor").unwrap();
        let mut event = Event::new("rtr-a", SubIndex::Interface(2), EventKind::PortState);
        event.port_state().unwrap().descr = Some("ge-0/0/0".to_string());
        let other = state.events.commit(event, "monitor").unwrap();

        let now = Utc::now();
        state.planned_maintenances.create(
            now - hour(),
            now + hour(),
            PmKind::PortState,
            MatchType::Regexp,
            "ae0".to_string(),
            None,
        );
        update_pm_states(&mut state, now);

        assert_eq!(
            state.events.get_by_id(matching).unwrap().state,
            EventState::Ignored
        );
        assert_eq!(state.events.get_by_id(other).unwrap().state, EventState::Open);
    }
}
