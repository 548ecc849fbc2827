//! Process-wide monitor state
//!
//! A single [`ZinoState`] value owns the device registry, the event store,
//! the flap tracker, the address index and the planned maintenances.  It is
//! only ever mutated under the runtime's state lock.

pub mod events;
pub mod persist;

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::flaps::FlappingStates;
use crate::models::devices::DeviceState;
use crate::pm::PlannedMaintenances;

pub use events::{EventObserver, EventStore};

/// All state a running Zino process keeps in memory
#[derive(Serialize, Deserialize, Default)]
pub struct ZinoState {
    pub devices: HashMap<String, DeviceState>,
    /// Maps every address a device has been seen with back to its name
    pub addresses: HashMap<IpAddr, String>,
    pub events: EventStore,
    pub flapping: FlappingStates,
    pub planned_maintenances: PlannedMaintenances,
}

impl ZinoState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state record for a device, creating an empty one if the
    /// device has not been seen before
    pub fn get_or_create_device(&mut self, name: &str) -> &mut DeviceState {
        self.devices
            .entry(name.to_string())
            .or_insert_with(|| DeviceState::new(name))
    }

    /// Resolves a source address to the owning device, via the address index
    pub fn lookup_device_by_address(&self, address: IpAddr) -> Option<&DeviceState> {
        let name = self.addresses.get(&address)?;
        self.devices.get(name)
    }

    /// Restores internal indexes after deserializing a snapshot
    pub fn rebuild_indexes(&mut self) {
        self.events.rebuild_indexes();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_lookup_follows_the_index() {
        let mut state = ZinoState::new();
        state.get_or_create_device("example-gw");
        let address: IpAddr = "10.0.0.1".parse().unwrap();
        state.addresses.insert(address, "example-gw".to_string());

        assert_eq!(
            state.lookup_device_by_address(address).map(|d| d.name.as_str()),
            Some("example-gw")
        );
        let unknown: IpAddr = "192.0.2.1".parse().unwrap();
        assert!(state.lookup_device_by_address(unknown).is_none());
    }
}
