//! Device vendor detection from sysObjectID

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::polldevs::PollDevice;
use crate::error::ZinoResult;
use crate::runtime::Runtime;
use crate::snmp::mib;
use crate::tasks::check_snmp;

/// Reads sysObjectID and records the enterprise number it points into
pub async fn run(device: &PollDevice, runtime: &Arc<Runtime>) -> ZinoResult<()> {
    let snmp = runtime.snmp_client(device);
    let response = match check_snmp(device, snmp.get("SNMPv2-MIB", "sysObjectID", Some(0)).await)? {
        Some(response) => response,
        None => return Ok(()),
    };
    let vendor = response.value.as_oid().and_then(mib::enterprise_id);
    debug!("{} enterprise id: {:?}", device.name, vendor);

    let mut state = runtime.state.write();
    let device_state = state.get_or_create_device(&device.name);
    if device_state.enterprise_id != vendor {
        info!(
            "{} changed enterprise id from {:?} to {:?}",
            device.name, device_state.enterprise_id, vendor
        );
        device_state.enterprise_id = vendor;
    }
    Ok(())
}
