//! SNMP trap reception and dispatch
//!
//! Incoming traps are authenticated by source address against the address
//! index, optionally filtered by community, resolved to symbolic names, and
//! dispatched to the observers registered for the trap identity.  An
//! observer returning false stops the chain.

pub mod observers;

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, error, info};

use crate::runtime::Runtime;
use crate::snmp::transport::{decode_message, PduType};
use crate::snmp::{mib, Oid, SnmpValue};

/// A trap identity: MIB name and trap name
pub type TrapType = (&'static str, &'static str);

/// One resolved trap variable
#[derive(Debug, Clone)]
pub struct TrapVarBind {
    pub oid: Oid,
    pub mib: String,
    pub var: String,
    pub instance: Option<Oid>,
    pub value: SnmpValue,
}

/// A fully resolved trap, ready for observers
#[derive(Debug, Clone)]
pub struct TrapMessage {
    pub source: IpAddr,
    pub source_port: u16,
    /// Name of the device the source address resolved to
    pub router: String,
    pub mib: String,
    pub name: String,
    /// The sender's sysUpTime at trap time, in hundredths of a second
    pub uptime: u32,
    pub variables: Vec<TrapVarBind>,
}

impl TrapMessage {
    pub fn contains(&self, label: &str) -> bool {
        self.variables.iter().any(|var| var.var == label)
    }

    /// The first variable with the given label
    pub fn get(&self, label: &str) -> Option<&TrapVarBind> {
        self.variables.iter().find(|var| var.var == label)
    }

    /// All variables with the given label
    pub fn get_all(&self, label: &str) -> Vec<&TrapVarBind> {
        self.variables.iter().filter(|var| var.var == label).collect()
    }
}

/// A handler for one or more trap identities.  Returning true from
/// `handle_trap` passes the trap on to the next registered observer,
/// returning false consumes it.
#[async_trait]
pub trait TrapObserver: Send + Sync {
    fn wanted_traps(&self) -> &'static [TrapType];

    async fn handle_trap(&self, trap: &TrapMessage) -> bool;
}

/// Receives, verifies and dispatches traps
pub struct TrapReceiver {
    runtime: Arc<Runtime>,
    observers: HashMap<(String, String), Vec<Arc<dyn TrapObserver>>>,
    communities: HashSet<String>,
}

impl TrapReceiver {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            observers: HashMap::new(),
            communities: HashSet::new(),
        }
    }

    /// Registers an observer for every trap identity it declares
    pub fn observe(&mut self, observer: Arc<dyn TrapObserver>) {
        for (mib, name) in observer.wanted_traps() {
            self.observers
                .entry((mib.to_string(), name.to_string()))
                .or_default()
                .push(observer.clone());
        }
    }

    /// Registers the standard observer set, in dispatch order
    pub fn auto_subscribe(&mut self) {
        let runtime = self.runtime.clone();
        self.observe(Arc::new(observers::link::LinkTrapObserver::new(runtime.clone())));
        self.observe(Arc::new(observers::bfd::BfdTrapObserver::new(runtime.clone())));
        self.observe(Arc::new(observers::bgp::BgpTrapObserver::new(runtime.clone())));
        self.observe(Arc::new(observers::logged::RestartTrapLogger));
        self.observe(Arc::new(observers::logged::CiscoReloadTrapLogger));
        self.observe(Arc::new(observers::logged::CiscoConfigManEventLogger));
        self.observe(Arc::new(observers::ignored::IgnoreTraps));
    }

    /// Accepts traps carrying this community string.  With no registered
    /// communities, any community is accepted.
    pub fn add_community(&mut self, community: &str) {
        self.communities.insert(community.to_string());
    }

    /// Receive loop over the trap socket
    pub async fn listen(self: Arc<Self>, socket: UdpSocket) {
        info!(
            "listening for incoming SNMP traps on {:?}",
            socket.local_addr().ok()
        );
        let mut buffer = vec![0u8; 65_535];
        loop {
            let (length, sender) = match socket.recv_from(&mut buffer).await {
                Ok(received) => received,
                Err(error) => {
                    error!("trap receive failed: {}", error);
                    continue;
                }
            };
            if let Some(trap) = self.parse_datagram(&buffer[..length], sender.ip(), sender.port()) {
                self.dispatch(&trap).await;
            }
        }
    }

    /// Verifies and resolves one trap datagram.  Returns None whenever the
    /// trap must be dropped.
    pub fn parse_datagram(&self, data: &[u8], source: IpAddr, source_port: u16) -> Option<TrapMessage> {
        let message = match decode_message(data) {
            Ok(message) => message,
            Err(error) => {
                debug!("undecodable trap datagram from {}: {}", source, error);
                return None;
            }
        };
        if message.pdu_type != PduType::TrapV2 {
            return None;
        }
        if !self.communities.is_empty() && !self.communities.contains(&message.community) {
            debug!("dropping trap from {} with unknown community", source);
            return None;
        }

        let router = {
            let state = self.runtime.state.read();
            state.lookup_device_by_address(source).map(|device| device.name.clone())
        };
        let router = match router {
            Some(router) => router,
            None => {
                debug!("ignored trap from {} (not a box we monitor?)", source);
                return None;
            }
        };

        let mut variables = Vec::with_capacity(message.varbinds.len());
        for varbind in &message.varbinds {
            match mib::resolve_oid(&varbind.oid) {
                Some(identifier) => variables.push(TrapVarBind {
                    oid: varbind.oid.clone(),
                    mib: identifier.mib,
                    var: identifier.object,
                    instance: identifier.index,
                    value: varbind.value.clone(),
                }),
                None => {
                    error!(
                        "could not resolve trap variable {} from {}, ignoring trap",
                        varbind.oid, router
                    );
                    return None;
                }
            }
        }

        let uptime = match variables
            .iter()
            .find(|var| var.var == "sysUpTime")
            .and_then(|var| var.value.as_u32())
        {
            Some(uptime) => uptime,
            None => {
                debug!("trap from {} did not contain sysUpTime, ignoring", router);
                return None;
            }
        };
        let trap_oid = match variables
            .iter()
            .find(|var| var.var == "snmpTrapOID")
            .and_then(|var| var.value.as_oid().cloned())
        {
            Some(oid) => oid,
            None => {
                debug!("trap from {} did not contain a snmpTrapOID value, ignoring", router);
                return None;
            }
        };
        let identity = match mib::resolve_oid(&trap_oid) {
            Some(identity) => identity,
            None => {
                error!("could not resolve trap {} to a symbolic name", trap_oid);
                return None;
            }
        };

        Some(TrapMessage {
            source,
            source_port,
            router,
            mib: identity.mib,
            name: identity.object,
            uptime,
            variables,
        })
    }

    /// Offers a trap to the observers registered for its identity, in
    /// registration order
    pub async fn dispatch(&self, trap: &TrapMessage) {
        let key = (trap.mib.clone(), trap.name.clone());
        let observers = match self.observers.get(&key) {
            Some(observers) if !observers.is_empty() => observers,
            _ => {
                debug!("unknown trap from {}: {}::{}", trap.router, trap.mib, trap.name);
                return;
            }
        };
        for observer in observers {
            if !observer.handle_trap(trap).await {
                return;
            }
        }
    }
}
