//! BGP transition trap handling

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::models::devices::{BgpOperState, BgpPeerSession};
use crate::runtime::Runtime;
use crate::trapd::{TrapMessage, TrapObserver, TrapType};

const WANTED: &[TrapType] = &[
    ("BGP4-MIB", "bgpBackwardTransition"),
    ("BGP4-V2-MIB-JUNIPER", "jnxBgpM2BackwardTransition"),
    ("BGP4-V2-MIB-JUNIPER", "jnxBgpM2Established"),
];

pub struct BgpTrapObserver {
    runtime: Arc<Runtime>,
}

impl BgpTrapObserver {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// Pulls the peer address and new state out of the trap.  Only the
    /// remote address and state variables matter; everything else in the
    /// trap is ballast.
    fn pre_parse(trap: &TrapMessage) -> Option<(IpAddr, BgpOperState)> {
        let (addr_var, state_var) = if trap.mib == "BGP4-V2-MIB-JUNIPER" {
            if !trap.contains("jnxBgpM2PeerLocalAddrType") {
                return None;
            }
            ("jnxBgpM2PeerRemoteAddr", "jnxBgpM2PeerState")
        } else {
            ("bgpPeerRemoteAddr", "bgpPeerState")
        };

        let peer = match trap.get(addr_var).and_then(|var| var.value.as_ip()) {
            Some(peer) => peer,
            None => {
                warn!("BGP transition trap received with invalid peer address");
                return None;
            }
        };
        let state = match trap.get(state_var).and_then(|var| var.value.as_i64()) {
            Some(value) => BgpOperState::from_value(value),
            None => {
                warn!("BGP transition trap received with invalid peer state");
                return None;
            }
        };
        Some((peer, state))
    }

    fn handle_backward_transition(&self, trap: &TrapMessage, peer: IpAddr, state: BgpOperState) {
        debug!("BGP backward transition trap received from {}", trap.router);
        let mut zino_state = self.runtime.state.write();
        let device_state = zino_state.get_or_create_device(&trap.router);
        let previous = device_state
            .bgp_peers
            .get(&peer)
            .and_then(|session| session.oper_state);

        if state != BgpOperState::Established && previous == Some(BgpOperState::Established) {
            info!("{} lost BGP peer: {} state {}", trap.router, peer, state);
        }
        device_state
            .bgp_peers
            .entry(peer)
            .or_insert_with(BgpPeerSession::default)
            .oper_state = Some(state);
    }

    fn handle_established(&self, trap: &TrapMessage, peer: IpAddr, state: BgpOperState) {
        // The peer-session map is reconciled by the next BGP poll
        info!("{} BGP peer up: {} state {}", trap.router, peer, state);
    }
}

#[async_trait]
impl TrapObserver for BgpTrapObserver {
    fn wanted_traps(&self) -> &'static [TrapType] {
        WANTED
    }

    async fn handle_trap(&self, trap: &TrapMessage) -> bool {
        let (peer, state) = match Self::pre_parse(trap) {
            Some(parsed) => parsed,
            None => return false,
        };
        match trap.name.as_str() {
            "bgpBackwardTransition" | "jnxBgpM2BackwardTransition" => {
                self.handle_backward_transition(trap, peer, state)
            }
            "jnxBgpM2Established" => self.handle_established(trap, peer, state),
            other => {
                info!("{}: unknown BGP trap received: {}", trap.router, other);
                return true;
            }
        }
        false
    }
}
