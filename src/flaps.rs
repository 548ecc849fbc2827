//! Interface flap detection
//!
//! Tracks a decayed-exponential score per (device, ifindex).  Link traps
//! multiply the score; time decays it.  An interface whose score crosses the
//! upper threshold is considered flapping until the score decays below the
//! lower bound, at which point the periodic aging job declares it stable
//! again and re-polls it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const FLAP_THRESHOLD: f64 = 35.0;
pub const FLAP_CEILING: f64 = 256.0;
pub const FLAP_MIN: f64 = 1.5;
pub const FLAP_MULTIPLIER: f64 = 2.0;
pub const FLAP_INIT_VAL: f64 = 2.0;
pub const FLAP_DECREMENT: f64 = 0.5;
pub const FLAP_DECREMENT_INTERVAL_SECONDS: u64 = 300;

/// Identifies a tracked interface: device name and ifindex
pub type PortIndex = (String, u32);

/// Runtime flapping stats for a single port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlappingState {
    pub hist_val: f64,
    pub first_flap: DateTime<Utc>,
    pub last_flap: DateTime<Utc>,
    pub flaps: u32,
    pub last_age: Option<DateTime<Utc>>,
    pub flapped_above_threshold: bool,
    pub in_active_flap_state: bool,
}

impl FlappingState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            hist_val: FLAP_INIT_VAL,
            first_flap: now,
            last_flap: now,
            flaps: 1,
            last_age: None,
            flapped_above_threshold: false,
            in_active_flap_state: false,
        }
    }

    /// Updates flap stats for a single port.  Called when a link trap is
    /// processed.
    pub fn update(&mut self, now: DateTime<Utc>) {
        self.age(now);
        self.hist_val = (self.hist_val * FLAP_MULTIPLIER).min(FLAP_CEILING);
        self.flaps += 1;
        self.last_flap = now;
    }

    /// Decays the score according to the time passed since the last update
    /// or aging
    pub fn age(&mut self, now: DateTime<Utc>) {
        let last = self.last_age.unwrap_or(self.last_flap);
        let delta =
            (now - last).num_milliseconds() as f64 / 1000.0 / FLAP_DECREMENT_INTERVAL_SECONDS as f64;
        self.last_age = Some(now);
        self.hist_val = self.hist_val.powf(FLAP_DECREMENT.powf(delta)).min(FLAP_CEILING);
    }
}

/// All tracked flapping state, keyed by (device, ifindex)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<FlapEntry>", into = "Vec<FlapEntry>")]
pub struct FlappingStates {
    interfaces: HashMap<PortIndex, FlappingState>,
}

/// Snapshot representation of one tracked interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlapEntry {
    pub router: String,
    pub ifindex: u32,
    #[serde(flatten)]
    pub state: FlappingState,
}

impl From<Vec<FlapEntry>> for FlappingStates {
    fn from(entries: Vec<FlapEntry>) -> Self {
        Self {
            interfaces: entries
                .into_iter()
                .map(|entry| ((entry.router, entry.ifindex), entry.state))
                .collect(),
        }
    }
}

impl From<FlappingStates> for Vec<FlapEntry> {
    fn from(states: FlappingStates) -> Self {
        states
            .interfaces
            .into_iter()
            .map(|((router, ifindex), state)| FlapEntry {
                router,
                ifindex,
                state,
            })
            .collect()
    }
}

impl FlappingStates {
    /// Registers a link transition for an interface, creating or bumping its
    /// score
    pub fn update_interface_flap(&mut self, interface: &PortIndex, now: DateTime<Utc>) {
        match self.interfaces.get_mut(interface) {
            Some(flap) => flap.update(now),
            None => {
                self.first_flap(interface.clone(), now);
            }
        }
    }

    fn first_flap(&mut self, interface: PortIndex, now: DateTime<Utc>) -> &mut FlappingState {
        self.interfaces
            .entry(interface)
            .or_insert_with(|| FlappingState::new(now))
    }

    /// Drops the tracking record for an interface, returning it
    pub fn unflap(&mut self, interface: &PortIndex) -> Option<FlappingState> {
        self.interfaces.remove(interface)
    }

    /// Decides whether an interface is currently considered flapping.  Ages
    /// the score first; crossing the upper threshold latches the flapping
    /// verdict until the score decays below the lower bound.
    pub fn is_flapping(&mut self, interface: &PortIndex, now: DateTime<Utc>) -> bool {
        let flap = match self.interfaces.get_mut(interface) {
            Some(flap) => flap,
            None => return false,
        };
        flap.age(now);
        if flap.hist_val < FLAP_MIN {
            return false;
        }
        if flap.hist_val > FLAP_THRESHOLD {
            flap.flapped_above_threshold = true;
        }
        flap.flapped_above_threshold
    }

    /// Whether any tracking stats exist for this interface
    pub fn was_flapping(&self, interface: &PortIndex) -> bool {
        self.interfaces.contains_key(interface)
    }

    pub fn get_flap_count(&self, interface: &PortIndex) -> u32 {
        self.interfaces.get(interface).map(|flap| flap.flaps).unwrap_or(0)
    }

    pub fn get_flap_value(&self, interface: &PortIndex) -> f64 {
        self.interfaces
            .get(interface)
            .map(|flap| flap.hist_val)
            .unwrap_or(0.0)
    }

    pub fn get_mut(&mut self, interface: &PortIndex) -> Option<&mut FlappingState> {
        self.interfaces.get_mut(interface)
    }

    /// All tracked interface keys, for the periodic aging sweep
    pub fn tracked_interfaces(&self) -> Vec<PortIndex> {
        self.interfaces.keys().cloned().collect()
    }

    /// Ages a single interface and reports whether it has decayed out of
    /// flap tracking (score below the lower bound)
    pub fn age_interface(&mut self, interface: &PortIndex, now: DateTime<Utc>) -> bool {
        match self.interfaces.get_mut(interface) {
            Some(flap) => {
                flap.age(now);
                flap.hist_val < FLAP_MIN
            }
            None => false,
        }
    }
}

/// The periodic decay job.  Ages every tracked interface; interfaces whose
/// score has fallen below the lower bound stop flapping: their port state
/// event goes stable, tracking is dropped, and the interface is re-polled to
/// pick up its real state.
pub async fn age_flapping_states(runtime: &std::sync::Arc<crate::runtime::Runtime>) {
    use crate::models::events::{EventKind, FlapState, SubIndex};

    let now = Utc::now();
    let interfaces = runtime.state.read().flapping.tracked_interfaces();

    for index in interfaces {
        let (router, ifindex) = index.clone();
        let decayed_out = {
            let mut state = runtime.state.write();
            state.flapping.age_interface(&index, now)
        };
        if !decayed_out {
            continue;
        }

        let device = runtime.get_polldev(&router);
        let old_port_state = {
            let mut state = runtime.state.write();
            let port = state
                .devices
                .get(&router)
                .and_then(|device_state| device_state.get_port(ifindex))
                .cloned();

            match &port {
                Some(port) => info!(
                    "{}: intf \"{}\" ix {} stopped flapping (aging)",
                    router,
                    port.ifdescr.as_deref().unwrap_or(""),
                    ifindex
                ),
                None => info!("{}: ix {} stopped flapping (aging)", router, ifindex),
            }

            if let (Some(device), Some(port)) = (&device, &port) {
                let flaps = state.flapping.get_flap_count(&index);
                let (mut event, _) =
                    state
                        .events
                        .get_or_create(&router, SubIndex::Interface(ifindex), EventKind::PortState);
                event.priority = device.priority;
                event.polladdr = Some(device.address);
                if let Some(payload) = event.port_state() {
                    payload.ifindex = Some(ifindex);
                    payload.flapstate = Some(FlapState::Stable);
                    payload.flaps = Some(flaps);
                    payload.portstate = port.state;
                    payload.descr = port.ifdescr.clone();
                }
                event.add_log(format!(
                    "{}: intf \"{}\" ix {} stopped flapping (aging)",
                    router,
                    port.ifdescr.as_deref().unwrap_or(""),
                    ifindex
                ));
                if let Err(error) = state.events.commit(event, "monitor") {
                    tracing::warn!("could not commit stable-flap event: {}", error);
                }
            }

            state.flapping.unflap(&index);
            // Forcing the recorded state ensures the verification poll sees
            // a transition and reports the real state
            let old_state = port.as_ref().and_then(|port| port.state);
            if port.is_some() {
                state
                    .get_or_create_device(&router)
                    .get_or_create_port(ifindex)
                    .state = Some(crate::models::devices::InterfaceState::Flapping);
            }
            old_state
        };

        if let Some(device) = device {
            let poll =
                crate::tasks::linkstate::poll_single_interface(&device, runtime, ifindex).await;
            if poll.is_err() {
                let mut state = runtime.state.write();
                state
                    .get_or_create_device(&router)
                    .get_or_create_port(ifindex)
                    .state = old_port_state;
            }
        }
    }
}

/// Logs current flap statistics for an interface.  The link trap observer
/// calls this every 100 flaps while an interface stays in active flap state.
pub fn log_flap_stats(router: &str, ifdescr: &str, flap: &FlappingState) {
    info!(
        "{}: intf \"{}\" is still flapping, {} flaps, penalty {:.1}",
        router, ifdescr, flap.flaps, flap.hist_val
    );
}
