//! The runtime value tying all components together
//!
//! One [`Runtime`] owns the configuration, the device registry, the shared
//! state, the job registry and the SNMP backend.  Components receive an
//! `Arc<Runtime>` and depend only on the slice they need; nothing in the
//! crate is a process-wide singleton.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::polldevs::PollDevice;
use crate::config::{Configuration, SnmpBackendKind};
use crate::error::ZinoResult;
use crate::models::events::{Event, EventState};
use crate::scheduler::JobRegistry;
use crate::snmp::{mock::MockBackend, transport::UdpBackend, SnmpBackend, SnmpClient};
use crate::state::{persist, ZinoState};

pub struct Runtime {
    config: Configuration,
    /// The currently loaded device configuration, by device name
    pub polldevs: RwLock<HashMap<String, PollDevice>>,
    pollfile_mtime: Mutex<Option<SystemTime>>,
    /// All monitor state; the lock is never held across suspension points
    pub state: RwLock<ZinoState>,
    pub jobs: Arc<JobRegistry>,
    snmp_backend: Arc<dyn SnmpBackend>,
}

impl Runtime {
    /// Builds a runtime from configuration, restoring the last state
    /// snapshot if one exists.  Must be called within a tokio runtime.
    pub fn new(config: Configuration) -> ZinoResult<Arc<Self>> {
        let backend: Arc<dyn SnmpBackend> = match config.snmp.backend {
            SnmpBackendKind::Udp => Arc::new(UdpBackend::new()),
            SnmpBackendKind::Mock => Arc::new(MockBackend::new()),
        };
        Self::with_backend(config, backend)
    }

    /// Builds a runtime around a caller-provided SNMP backend.  Tests use
    /// this to keep a scripting handle on the mock agent.
    pub fn with_backend(
        config: Configuration,
        backend: Arc<dyn SnmpBackend>,
    ) -> ZinoResult<Arc<Self>> {
        let mut state = persist::load_snapshot(&config.persistence.file)?.unwrap_or_default();

        // Closed events leave memory for the archive as soon as they are
        // committed; the write happens off the main loop
        let (archive_tx, archive_rx) = mpsc::unbounded_channel();
        state.events.add_observer(Box::new(move |event, _old, _changed| {
            if event.state == EventState::Closed {
                let _ = archive_tx.send(event.clone());
            }
        }));
        tokio::spawn(run_archiver(config.archiving.old_events_dir.clone(), archive_rx));

        Ok(Arc::new(Self {
            config,
            polldevs: RwLock::new(HashMap::new()),
            pollfile_mtime: Mutex::new(None),
            state: RwLock::new(state),
            jobs: Arc::new(JobRegistry::new()),
            snmp_backend: backend,
        }))
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Opens (or reuses) a management session for a device
    pub fn snmp_client(&self, device: &PollDevice) -> SnmpClient {
        SnmpClient::new(device, self.snmp_backend.clone())
    }

    pub fn get_polldev(&self, name: &str) -> Option<PollDevice> {
        self.polldevs.read().get(name).cloned()
    }

    /// Records the device file modification time; returns true if it
    /// differs from the previously recorded one
    pub fn pollfile_changed(&self, modified: SystemTime) -> bool {
        let mut mtime = self.pollfile_mtime.lock();
        if *mtime == Some(modified) {
            return false;
        }
        *mtime = Some(modified);
        true
    }

    /// Writes the state snapshot, serializing under the lock and writing
    /// outside of it
    pub async fn save_state(&self) -> ZinoResult<()> {
        let bytes = {
            let state = self.state.read();
            serde_json::to_vec_pretty(&*state)?
        };
        let path = self.config.persistence.file.clone();
        tokio::task::spawn_blocking(move || persist::write_snapshot_bytes(&path, &bytes))
            .await
            .map_err(|error| crate::error::ZinoError::Internal(error.to_string()))??;
        Ok(())
    }

}

/// Queues an immediate full poll of a device, as its own one-shot job
pub fn queue_device_poll(runtime: &Arc<Runtime>, name: &str) -> bool {
    let device = match runtime.get_polldev(name) {
        Some(device) => device,
        None => return false,
    };
    let runtime = runtime.clone();
    let id = format!("pollrtr:{}:{}", name, next_job_serial());
    runtime
        .jobs
        .clone()
        .add_oneshot_job(&id, std::time::Duration::ZERO, async move {
            crate::tasks::run_all_tasks(&device, &runtime).await;
        });
    true
}

/// Queues a one-shot verification poll of a single interface
pub fn queue_interface_poll(
    runtime: &Arc<Runtime>,
    name: &str,
    ifindex: u32,
    delay: std::time::Duration,
) -> bool {
    let device = match runtime.get_polldev(name) {
        Some(device) => device,
        None => return false,
    };
    let id = format!("pollintf:{}:{}:{}", name, ifindex, next_job_serial());
    let runtime = runtime.clone();
    let jobs = runtime.jobs.clone();
    jobs.add_oneshot_job(&id, delay, async move {
        if let Err(error) =
            crate::tasks::linkstate::poll_single_interface(&device, &runtime, ifindex).await
        {
            info!(
                "verification poll of {} ix {} failed: {}",
                device.name, ifindex, error
            );
        }
    });
    true
}

fn next_job_serial() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SERIAL: AtomicU64 = AtomicU64::new(1);
    SERIAL.fetch_add(1, Ordering::Relaxed)
}

async fn run_archiver(
    directory: std::path::PathBuf,
    mut events: mpsc::UnboundedReceiver<Event>,
) {
    while let Some(event) = events.recv().await {
        let directory = directory.clone();
        let result =
            tokio::task::spawn_blocking(move || persist::archive_closed_event(&directory, &event))
                .await;
        match result {
            Ok(Err(error)) => error!("failed to archive closed event: {}", error),
            Err(error) => error!("archiver task failed: {}", error),
            Ok(Ok(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runtime_restores_saved_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Configuration::default();
        config.persistence.file = dir.path().join("zino-state.json");
        config.snmp.backend = SnmpBackendKind::Mock;

        let runtime = Runtime::new(config.clone()).unwrap();
        {
            let mut state = runtime.state.write();
            state.get_or_create_device("example-gw");
        }
        runtime.save_state().await.unwrap();

        let restored = Runtime::new(config).unwrap();
        assert!(restored.state.read().devices.contains_key("example-gw"));
    }

    #[tokio::test]
    async fn pollfile_mtime_gates_reloads() {
        let mut config = Configuration::default();
        config.snmp.backend = SnmpBackendKind::Mock;
        let runtime = Runtime::new(config).unwrap();
        let stamp = SystemTime::now();
        assert!(runtime.pollfile_changed(stamp));
        assert!(!runtime.pollfile_changed(stamp));
        assert!(runtime.pollfile_changed(stamp + std::time::Duration::from_secs(1)));
    }
}
