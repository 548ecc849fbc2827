//! Reachability probing and back-off scheduling

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::polldevs::PollDevice;
use crate::error::{ZinoError, ZinoResult};
use crate::models::events::{EventKind, ReachabilityState, SubIndex};
use crate::runtime::Runtime;
use crate::snmp::SnmpError;

/// Probe delays for an unresponsive device, in seconds.  Each is a one-shot
/// job that cancels itself after running.
pub const BACKOFF_INTERVALS: [u64; 5] = [60, 120, 240, 480, 960];

fn backoff_job_id(device: &str, interval: u64) -> String {
    format!("delayed_reachable:{}:{}", device, interval)
}

/// Probes the device with a sysUpTime GET.  A timeout opens (or refreshes) a
/// reachability event, schedules the back-off probes, and cancels the rest
/// of this poll cycle.
pub async fn run(device: &PollDevice, runtime: &Arc<Runtime>) -> ZinoResult<()> {
    let snmp = runtime.snmp_client(device);
    match snmp.get("SNMPv2-MIB", "sysUpTime", Some(0)).await {
        Ok(_) => {
            debug!("device {} is reachable", device.name);
            mark_reachable(device, runtime);
            deschedule_backoff_jobs(device, runtime);
            Ok(())
        }
        Err(SnmpError::Timeout) => {
            debug!("device {} is not reachable", device.name);
            mark_unreachable(device, runtime);
            schedule_backoff_jobs(device, runtime);
            Err(ZinoError::DeviceUnreachable(device.name.clone()))
        }
        // Any response at all means the device is alive; the error belongs
        // to this probe only
        Err(error) => {
            debug!("reachability probe of {} returned {}", device.name, error);
            mark_reachable(device, runtime);
            deschedule_backoff_jobs(device, runtime);
            Ok(())
        }
    }
}

/// Flips an open reachability event back to `reachable`.  Does nothing when
/// no event is open, so a healthy device creates no noise.
fn mark_reachable(device: &PollDevice, runtime: &Arc<Runtime>) {
    let mut state = runtime.state.write();
    let existing = state
        .events
        .get(&device.name, SubIndex::Device, EventKind::Reachability)
        .and_then(|event| event.id);
    let id = match existing {
        Some(id) => id,
        None => return,
    };
    let mut event = match state.events.checkout(id) {
        Ok(event) => event,
        Err(_) => return,
    };
    let reachability = event.reachability().map(|data| data.reachability);
    if reachability == Some(Some(ReachabilityState::Reachable)) {
        return;
    }
    if let Some(data) = event.reachability() {
        data.reachability = Some(ReachabilityState::Reachable);
    }
    event.add_log(format!("{} reachable again", device.name));
    let _ = state.events.commit(event, "monitor");
}

/// Opens or refreshes the reachability event for an unresponsive device
fn mark_unreachable(device: &PollDevice, runtime: &Arc<Runtime>) {
    let mut state = runtime.state.write();
    let (mut event, created) =
        state
            .events
            .get_or_create(&device.name, SubIndex::Device, EventKind::Reachability);
    let already_known = !created
        && event.reachability().map(|data| data.reachability)
            == Some(Some(ReachabilityState::NoResponse));
    if already_known {
        return;
    }
    event.priority = device.priority;
    event.polladdr = Some(device.address);
    if let Some(data) = event.reachability() {
        data.reachability = Some(ReachabilityState::NoResponse);
    }
    event.add_log(format!("{} no-response", device.name));
    let _ = state.events.commit(event, "monitor");
}

/// Schedules the one-shot back-off probes, unless they are already pending
fn schedule_backoff_jobs(device: &PollDevice, runtime: &Arc<Runtime>) {
    let already_running = BACKOFF_INTERVALS
        .iter()
        .any(|interval| runtime.jobs.contains(&backoff_job_id(&device.name, *interval)));
    if already_running {
        return;
    }
    for interval in BACKOFF_INTERVALS {
        let id = backoff_job_id(&device.name, interval);
        let device = device.clone();
        let runtime_clone = runtime.clone();
        runtime.jobs.add_oneshot_job(&id, Duration::from_secs(interval), async move {
            let _ = run(&device, &runtime_clone).await;
        });
    }
}

/// Cancels any pending back-off probes for a device
fn deschedule_backoff_jobs(device: &PollDevice, runtime: &Arc<Runtime>) {
    for interval in BACKOFF_INTERVALS {
        let id = backoff_job_id(&device.name, interval);
        if runtime.jobs.contains(&id) {
            runtime.jobs.cancel(&id);
        }
    }
}
