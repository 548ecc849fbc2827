//! Link trap handling, including the flap detection policy

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::flaps::log_flap_stats;
use crate::models::devices::InterfaceState;
use crate::models::events::{EventKind, FlapState, SubIndex};
use crate::runtime::Runtime;
use crate::tasks::linkstate;
use crate::trapd::{TrapMessage, TrapObserver, TrapType};

/// Traps arriving within this long after a device reload are noise
const REBOOT_GRACE_SECONDS: i64 = 300;
/// Delay before the second verification poll of a reported transition
const SECOND_VERIFICATION_DELAY: Duration = Duration::from_secs(120);
/// How often continued flapping is logged
const FLAP_LOG_INTERVAL: u32 = 100;

const WANTED: &[TrapType] = &[("IF-MIB", "linkUp"), ("IF-MIB", "linkDown")];

pub struct LinkTrapObserver {
    runtime: Arc<Runtime>,
}

impl LinkTrapObserver {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// The ignore policy: a trap is dropped when the interface is unknown,
    /// when it arrives right after a reload with no open event, or when it
    /// reports the state we already have recorded and no event is open
    fn is_trap_ignored(&self, trap: &TrapMessage, ifindex: u32, is_up: bool) -> bool {
        let state = self.runtime.state.read();
        let has_open_event = state
            .events
            .get(&trap.router, SubIndex::Interface(ifindex), EventKind::PortState)
            .is_some();
        if has_open_event {
            return false;
        }

        let device_state = match state.devices.get(&trap.router) {
            Some(device_state) => device_state,
            None => return true,
        };
        if let Some(boot_time) = device_state.boot_time {
            if (Utc::now() - boot_time).num_seconds() < REBOOT_GRACE_SECONDS {
                debug!(
                    "{}: ignoring link trap for ix {} right after reload",
                    trap.router, ifindex
                );
                return true;
            }
        }

        let recorded = device_state.get_port(ifindex).and_then(|port| port.state);
        let trap_state = if is_up { InterfaceState::Up } else { InterfaceState::Down };
        if recorded == Some(trap_state) {
            debug!(
                "{}: link trap for ix {} is redundant with recorded state",
                trap.router, ifindex
            );
            return true;
        }
        false
    }

    /// Applies a link transition: bump the flap score, and either fold the
    /// trap into flap tracking or record the new port state and schedule
    /// verification polls
    async fn handle_link_transition(
        &self,
        trap: &TrapMessage,
        ifindex: u32,
        ifdescr: &str,
        is_up: bool,
    ) {
        let device = match self.runtime.get_polldev(&trap.router) {
            Some(device) => device,
            None => return,
        };
        let index = (trap.router.clone(), ifindex);
        let now = Utc::now();

        let currently_flapping = {
            let mut state = self.runtime.state.write();
            state.flapping.update_interface_flap(&index, now);
            let flapping = state.flapping.is_flapping(&index, now);

            if flapping {
                let (newly_active, flaps, hist_val) = match state.flapping.get_mut(&index) {
                    Some(flap) => {
                        let newly_active = !flap.in_active_flap_state;
                        flap.in_active_flap_state = true;
                        (newly_active, flap.flaps, flap.hist_val)
                    }
                    None => (false, 0, 0.0),
                };

                if newly_active {
                    info!(
                        "{}: intf \"{}\" ix {} is flapping, penalty {:.1}",
                        trap.router, ifdescr, ifindex, hist_val
                    );
                    let (mut event, _) = state.events.get_or_create(
                        &trap.router,
                        SubIndex::Interface(ifindex),
                        EventKind::PortState,
                    );
                    event.priority = device.priority;
                    event.polladdr = Some(device.address);
                    if let Some(payload) = event.port_state() {
                        payload.ifindex = Some(ifindex);
                        payload.flapstate = Some(FlapState::Flapping);
                        payload.flaps = Some(flaps);
                        payload.descr = Some(ifdescr.to_string());
                    }
                    event.add_log(format!(
                        "{}: intf \"{}\" ix {} flapping, penalty {:.1}",
                        trap.router, ifdescr, ifindex, hist_val
                    ));
                    if let Err(error) = state.events.commit(event, "monitor") {
                        warn!("could not commit flap event: {}", error);
                    }
                    state
                        .get_or_create_device(&trap.router)
                        .get_or_create_port(ifindex)
                        .state = Some(InterfaceState::Flapping);
                } else if flaps % FLAP_LOG_INTERVAL == 0 {
                    if let Some(flap) = state.flapping.get_mut(&index) {
                        log_flap_stats(&trap.router, ifdescr, flap);
                    }
                    let (mut event, _) = state.events.get_or_create(
                        &trap.router,
                        SubIndex::Interface(ifindex),
                        EventKind::PortState,
                    );
                    if let Some(payload) = event.port_state() {
                        payload.flaps = Some(flaps);
                    }
                    if let Err(error) = state.events.commit(event, "monitor") {
                        warn!("could not commit flap count update: {}", error);
                    }
                }
            } else {
                let new_state = if is_up { InterfaceState::Up } else { InterfaceState::Down };
                info!(
                    "{}: intf \"{}\" ix {} link{}",
                    trap.router,
                    ifdescr,
                    ifindex,
                    if is_up { "Up" } else { "Down" }
                );

                let flaps = state.flapping.get_flap_count(&index);
                let (mut event, _) = state.events.get_or_create(
                    &trap.router,
                    SubIndex::Interface(ifindex),
                    EventKind::PortState,
                );
                event.priority = device.priority;
                event.polladdr = Some(device.address);
                let previous_state = event.port_state().and_then(|payload| payload.portstate);
                let previous_trans = event.lasttrans;
                if let Some(payload) = event.port_state() {
                    payload.ifindex = Some(ifindex);
                    payload.portstate = Some(new_state);
                    payload.flapstate = Some(FlapState::Stable);
                    payload.flaps = Some(flaps);
                    payload.descr = Some(ifdescr.to_string());
                    // A down-to-up transition adds to the accumulated downtime
                    if is_up
                        && matches!(
                            previous_state,
                            Some(InterfaceState::Down) | Some(InterfaceState::LowerLayerDown)
                        )
                    {
                        if let Some(previous_trans) = previous_trans {
                            let downtime = (now - previous_trans).to_std().unwrap_or_default();
                            payload.ac_down = Some(payload.ac_down.unwrap_or_default() + downtime);
                        }
                    }
                }
                event.lasttrans = Some(now);
                event.add_log(format!(
                    "{}: intf \"{}\" ix {} link{}",
                    trap.router,
                    ifdescr,
                    ifindex,
                    if is_up { "Up" } else { "Down" }
                ));
                if let Err(error) = state.events.commit(event, "monitor") {
                    warn!("could not commit link trap event: {}", error);
                }
                state
                    .get_or_create_device(&trap.router)
                    .get_or_create_port(ifindex)
                    .state = Some(new_state);
            }
            flapping
        };

        if !currently_flapping {
            // Verify the reported transition now and again in two minutes
            crate::runtime::queue_interface_poll(&self.runtime, &trap.router, ifindex, Duration::ZERO);
            crate::runtime::queue_interface_poll(
                &self.runtime,
                &trap.router,
                ifindex,
                SECOND_VERIFICATION_DELAY,
            );
        }
    }
}

#[async_trait]
impl TrapObserver for LinkTrapObserver {
    fn wanted_traps(&self) -> &'static [TrapType] {
        WANTED
    }

    async fn handle_trap(&self, trap: &TrapMessage) -> bool {
        let ifindex = trap
            .get("ifIndex")
            .and_then(|var| var.value.as_u32())
            .or_else(|| {
                trap.get("ifIndex")
                    .and_then(|var| var.instance.as_ref())
                    .and_then(|instance| instance.0.first().copied())
            });
        let ifindex = match ifindex {
            Some(ifindex) if ifindex > 0 => ifindex,
            _ => {
                debug!("{}: {} trap without usable ifIndex", trap.router, trap.name);
                return false;
            }
        };

        let ifdescr = {
            let state = self.runtime.state.read();
            state
                .devices
                .get(&trap.router)
                .and_then(|device_state| device_state.get_port(ifindex))
                .and_then(|port| port.ifdescr.clone())
        };
        let ifdescr = match ifdescr {
            Some(ifdescr) => ifdescr,
            None => {
                debug!("{}: link trap for unknown ix {}", trap.router, ifindex);
                return false;
            }
        };

        let device = match self.runtime.get_polldev(&trap.router) {
            Some(device) => device,
            None => {
                debug!("{}: no polling configuration, ignoring link trap", trap.router);
                return false;
            }
        };
        if !linkstate::is_interface_watched(&device, &ifdescr) {
            return false;
        }

        let is_up = trap.name == "linkUp";
        if self.is_trap_ignored(trap, ifindex, is_up) {
            return false;
        }

        self.handle_link_transition(trap, ifindex, &ifdescr, is_up).await;
        false
    }
}
