//! Log-only trap observers: note the trap, take no other action

use async_trait::async_trait;
use tracing::info;

use crate::trapd::{TrapMessage, TrapObserver, TrapType};

pub struct RestartTrapLogger;

#[async_trait]
impl TrapObserver for RestartTrapLogger {
    fn wanted_traps(&self) -> &'static [TrapType] {
        &[("SNMPv2-MIB", "coldStart"), ("SNMPv2-MIB", "warmStart")]
    }

    async fn handle_trap(&self, trap: &TrapMessage) -> bool {
        info!("{}: {}", trap.router, trap.name);
        false
    }
}

pub struct CiscoReloadTrapLogger;

#[async_trait]
impl TrapObserver for CiscoReloadTrapLogger {
    fn wanted_traps(&self) -> &'static [TrapType] {
        &[("CISCOTRAP-MIB", "reload")]
    }

    async fn handle_trap(&self, trap: &TrapMessage) -> bool {
        info!("{}: reload requested", trap.router);
        false
    }
}

pub struct CiscoConfigManEventLogger;

#[async_trait]
impl TrapObserver for CiscoConfigManEventLogger {
    fn wanted_traps(&self) -> &'static [TrapType] {
        &[("CISCO-CONFIG-MAN-MIB", "ciscoConfigManEvent")]
    }

    async fn handle_trap(&self, trap: &TrapMessage) -> bool {
        let value_of = |label: &str| {
            trap.get(label)
                .and_then(|var| var.value.as_i64())
                .map(|value| value.to_string())
                .unwrap_or_else(|| "?".to_string())
        };
        info!(
            "{}: config-change: cmd-src {} conf-src {} dst {}",
            trap.router,
            value_of("ccmHistoryEventCommandSource"),
            value_of("ccmHistoryEventConfigSource"),
            value_of("ccmHistoryEventConfigDestination"),
        );
        false
    }
}
