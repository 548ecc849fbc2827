//! Outright suppression of spammy traps

use async_trait::async_trait;

use crate::trapd::{TrapMessage, TrapObserver, TrapType};

/// Trap identities that are dropped without further processing.  The
/// standard BGP backward-transition notification lands here as a fallback;
/// when the BGP observer is registered ahead of this one it consumes the
/// trap first.
const WANTED: &[TrapType] = &[
    ("BGP4-MIB", "bgpBackwardTransition"),
    ("SNMPv2-MIB", "authenticationFailure"),
    ("CISCOTRAP-MIB", "tcpConnectionClose"),
];

pub struct IgnoreTraps;

#[async_trait]
impl TrapObserver for IgnoreTraps {
    fn wanted_traps(&self) -> &'static [TrapType] {
        WANTED
    }

    async fn handle_trap(&self, _trap: &TrapMessage) -> bool {
        // Stop processing here
        false
    }
}
