//! The per-device polling task pipeline
//!
//! Tasks run in a fixed order for each device: reachability first, then
//! vendor, address map, link state, BFD, BGP and chassis alarms.  A failed
//! reachability probe cancels the remainder of the cycle; other task
//! failures only abort that task.

pub mod addrs;
pub mod alarms;
pub mod bfd;
pub mod bgp;
pub mod linkstate;
pub mod reachable;
pub mod vendor;

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::polldevs::PollDevice;
use crate::error::{ZinoError, ZinoResult};
use crate::runtime::Runtime;
use crate::snmp::{SnmpError, SnmpResult};

/// Runs a full poll cycle for one device, logging instead of propagating
/// failures
pub async fn run_all_tasks(device: &PollDevice, runtime: &Arc<Runtime>) {
    match run_registered_tasks(device, runtime).await {
        Ok(()) => {}
        Err(ZinoError::DeviceUnreachable(name)) => {
            debug!(
                "device {} could not be reached, any remaining tasks have been cancelled",
                name
            );
        }
        Err(error) => warn!("poll cycle for {} failed: {}", device.name, error),
    }
}

async fn run_registered_tasks(device: &PollDevice, runtime: &Arc<Runtime>) -> ZinoResult<()> {
    reachable::run(device, runtime).await?;
    run_task("vendor", vendor::run(device, runtime)).await?;
    run_task("addressmap", addrs::run(device, runtime)).await?;
    run_task("linkstate", linkstate::run(device, runtime)).await?;
    run_task("bfd", bfd::run(device, runtime, None)).await?;
    if device.do_bgp {
        run_task("bgp", bgp::run(device, runtime)).await?;
    }
    run_task("alarm", alarms::run(device, runtime)).await?;
    Ok(())
}

/// Runs one task: an unreachable device aborts the cycle, any other failure
/// only ends this task
async fn run_task(name: &str, task: impl Future<Output = ZinoResult<()>>) -> ZinoResult<()> {
    match task.await {
        Ok(()) => Ok(()),
        Err(error @ ZinoError::DeviceUnreachable(_)) => Err(error),
        Err(error) => {
            warn!("{} task failed: {}", name, error);
            Ok(())
        }
    }
}

/// Classifies an SNMP result for task use.  Timeouts become the
/// device-unreachable signal that cancels the rest of the cycle; permanent
/// failures are logged and become a null result the task can work around.
pub(crate) fn check_snmp<T>(device: &PollDevice, result: SnmpResult<T>) -> ZinoResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(SnmpError::Timeout) => Err(ZinoError::DeviceUnreachable(device.name.clone())),
        Err(SnmpError::NoSuchObject)
        | Err(SnmpError::NoSuchInstance)
        | Err(SnmpError::EndOfMibView) => Ok(None),
        Err(error) => {
            warn!("{}: {}", device.name, error);
            Ok(None)
        }
    }
}
