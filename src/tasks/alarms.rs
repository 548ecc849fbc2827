//! Juniper chassis alarm polling

use std::sync::Arc;

use tracing::warn;

use crate::config::polldevs::PollDevice;
use crate::error::ZinoResult;
use crate::models::devices::AlarmCounts;
use crate::models::events::{AlarmColor, EventKind, SubIndex};
use crate::runtime::Runtime;
use crate::state::ZinoState;
use crate::tasks::check_snmp;

/// Reads the yellow and red alarm counters and raises one alarm event per
/// color whose count changed
pub async fn run(device: &PollDevice, runtime: &Arc<Runtime>) -> ZinoResult<()> {
    let is_juniper = {
        let state = runtime.state.read();
        state
            .devices
            .get(&device.name)
            .map(|device_state| device_state.is_juniper())
            .unwrap_or(false)
    };
    if !is_juniper {
        return Ok(());
    }

    let snmp = runtime.snmp_client(device);
    let yellow = check_snmp(device, snmp.get("JUNIPER-ALARM-MIB", "jnxYellowAlarmCount", Some(0)).await)?;
    let red = check_snmp(device, snmp.get("JUNIPER-ALARM-MIB", "jnxRedAlarmCount", Some(0)).await)?;

    let (yellow, red) = match (
        yellow.and_then(|object| object.value.as_u32()),
        red.and_then(|object| object.value.as_u32()),
    ) {
        (Some(yellow), Some(red)) => (yellow, red),
        _ => {
            warn!("device {} returned unusable alarm counts", device.name);
            return Ok(());
        }
    };

    let mut state = runtime.state.write();
    let previous = state
        .get_or_create_device(&device.name)
        .alarms
        .unwrap_or_default();

    if previous.yellow != yellow {
        create_alarm_event(&mut state, device, AlarmColor::Yellow, previous.yellow, yellow);
    }
    if previous.red != red {
        create_alarm_event(&mut state, device, AlarmColor::Red, previous.red, red);
    }
    state.get_or_create_device(&device.name).alarms = Some(AlarmCounts { yellow, red });
    Ok(())
}

fn create_alarm_event(
    state: &mut ZinoState,
    device: &PollDevice,
    color: AlarmColor,
    old_count: u32,
    new_count: u32,
) {
    let (mut event, _created) =
        state
            .events
            .get_or_create(&device.name, SubIndex::Alarm(color), EventKind::Alarm);
    event.priority = device.priority;
    event.polladdr = Some(device.address);
    if let Some(payload) = event.alarm() {
        payload.alarm_type = Some(color);
        payload.alarm_count = Some(new_count);
    }
    event.add_log(format!(
        "{} {} alarms went from {} to {}",
        device.name, color, old_count, new_count
    ));
    if let Err(error) = state.events.commit(event, "monitor") {
        warn!("could not commit alarm event: {}", error);
    }
}
