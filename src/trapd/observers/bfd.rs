//! BFD session trap handling
//!
//! bfdSessUp and bfdSessDown only say which sessions changed state and why,
//! not what the new state is.  The observer extracts the affected session
//! index range and re-polls each session.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::runtime::Runtime;
use crate::tasks::bfd;
use crate::trapd::{TrapMessage, TrapObserver, TrapType};

const WANTED: &[TrapType] = &[("BFD-STD-MIB", "bfdSessUp"), ("BFD-STD-MIB", "bfdSessDown")];

pub struct BfdTrapObserver {
    runtime: Arc<Runtime>,
}

impl BfdTrapObserver {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// The affected sessions are bounded by the instances of the two
    /// bfdSessDiag varbinds the trap must carry
    fn affected_indexes(trap: &TrapMessage) -> Option<std::ops::RangeInclusive<u32>> {
        let diags = trap.get_all("bfdSessDiag");
        if diags.len() < 2 {
            error!(
                "{} sent malformed BFD trap (less than two bfdSessDiag values)",
                trap.router
            );
            return None;
        }
        let instances: Vec<u32> = diags
            .iter()
            .filter_map(|var| var.instance.as_ref())
            .filter_map(|instance| instance.0.first().copied())
            .collect();
        let lower = *instances.iter().min()?;
        let upper = *instances.iter().max()?;
        debug!(
            "{}: {} affects session indexes {}..{}",
            trap.router, trap.name, lower, upper
        );
        Some(lower..=upper)
    }
}

#[async_trait]
impl TrapObserver for BfdTrapObserver {
    fn wanted_traps(&self) -> &'static [TrapType] {
        WANTED
    }

    async fn handle_trap(&self, trap: &TrapMessage) -> bool {
        let indexes = match Self::affected_indexes(trap) {
            Some(indexes) => indexes,
            None => return false,
        };
        let device = match self.runtime.get_polldev(&trap.router) {
            Some(device) => device,
            None => {
                error!("{}: no polldevs config, ignoring BFD trap", trap.router);
                return false;
            }
        };
        for session_index in indexes {
            if let Err(error) = bfd::run(&device, &self.runtime, Some(session_index)).await {
                debug!(
                    "{}: BFD refresh of session {} failed: {}",
                    trap.router, session_index, error
                );
            }
        }
        false
    }
}
