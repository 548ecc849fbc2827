//! Job scheduling
//!
//! A small registry of named tokio tasks: recurring per-device poll jobs,
//! periodic housekeeping jobs, and one-shot jobs (reachability back-off,
//! operator-requested polls).  A recurring job never overlaps itself, as the
//! job body runs inline in its interval loop.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::polldevs::{self, PollDevice, DEFAULT_INTERVAL_MINUTES};
use crate::runtime::Runtime;
use crate::tasks;

/// Registry of running jobs by id
#[derive(Default)]
pub struct JobRegistry {
    jobs: Arc<DashMap<String, JoinHandle<()>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a recurring job.  The first run happens after `first_delay`,
    /// subsequent runs every `interval` after the previous run finished
    /// starting.  Replaces any existing job with the same id.
    pub fn add_interval_job<F, Fut>(&self, id: &str, first_delay: Duration, interval: Duration, job: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(first_delay).await;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                job().await;
            }
        });
        if let Some(previous) = self.jobs.insert(id.to_string(), handle) {
            previous.abort();
        }
    }

    /// Starts a job that runs once after `delay` and then unregisters itself
    pub fn add_oneshot_job<Fut>(&self, id: &str, delay: Duration, job: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let jobs = self.jobs.clone();
        let id_owned = id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job.await;
            jobs.remove(&id_owned);
        });
        if let Some(previous) = self.jobs.insert(id.to_string(), handle) {
            previous.abort();
        }
    }

    /// Cancels and removes a job.  Returns true if it existed.
    pub fn cancel(&self, id: &str) -> bool {
        match self.jobs.remove(id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => {
                debug!("job {} could not be found", id);
                false
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

fn poll_job_id(device: &str) -> String {
    format!("poll:{}", device)
}

/// Re-reads the device file if it changed, and adjusts the scheduled jobs to
/// match: new devices are scheduled, removed ones cancelled, changed ones
/// rescheduled.  A file that fails to parse leaves the running configuration
/// untouched.
pub async fn load_and_schedule_polldevs(runtime: &Arc<Runtime>) {
    let path = runtime.config().polling.file.clone();
    let modified = match std::fs::metadata(&path).and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(error) => {
            warn!("cannot stat {}: {}", path.display(), error);
            return;
        }
    };
    if !runtime.pollfile_changed(modified) {
        return;
    }

    let (devices, defaults) = match polldevs::read_polldevs(&path) {
        Ok(parsed) => parsed,
        Err(error) => {
            warn!("{}", error);
            return;
        }
    };

    let (new_devices, deleted_devices, changed_devices) = {
        let current = runtime.polldevs.read();
        let new_names: HashSet<String> = devices.keys().cloned().collect();
        let old_names: HashSet<String> = current.keys().cloned().collect();

        let new_devices: Vec<String> = new_names.difference(&old_names).cloned().collect();
        let deleted_devices: Vec<String> = old_names.difference(&new_names).cloned().collect();
        let changed_devices: Vec<String> = new_names
            .intersection(&old_names)
            .filter(|name| devices.get(*name) != current.get(*name))
            .cloned()
            .collect();
        (new_devices, deleted_devices, changed_devices)
    };

    if !new_devices.is_empty() {
        info!("loaded new devices: {:?}", new_devices);
        init_state_for_devices(runtime, new_devices.iter().filter_map(|name| devices.get(name)));
    }
    if !deleted_devices.is_empty() {
        info!("deleted devices: {:?}", deleted_devices);
    }
    if !changed_devices.is_empty() {
        info!("changed devices: {:?}", changed_devices);
    }

    *runtime.polldevs.write() = devices;

    for name in deleted_devices.iter().chain(&changed_devices) {
        runtime.jobs.cancel(&poll_job_id(name));
    }

    let stagger_interval = defaults
        .get("interval")
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_INTERVAL_MINUTES);
    let to_schedule: Vec<String> = new_devices.into_iter().chain(changed_devices).collect();
    schedule_devices(runtime, to_schedule, stagger_interval);
}

/// Seeds empty state records and the address index for devices that are new
/// to the configuration
fn init_state_for_devices<'a>(
    runtime: &Arc<Runtime>,
    devices: impl Iterator<Item = &'a PollDevice>,
) {
    let mut state = runtime.state.write();
    for device in devices {
        state.addresses.insert(device.address, device.name.clone());
        state.get_or_create_device(&device.name);
    }
}

/// Schedules recurring poll jobs for the given devices, staggering their
/// first runs across the default interval.  Higher-priority devices start
/// first.
pub fn schedule_devices(runtime: &Arc<Runtime>, names: Vec<String>, stagger_interval: u64) {
    let mut devices: Vec<PollDevice> = {
        let polldevs = runtime.polldevs.read();
        names
            .iter()
            .filter_map(|name| polldevs.get(name).cloned())
            .collect()
    };
    if devices.is_empty() {
        return;
    }
    devices.sort_by(|a, b| b.priority.cmp(&a.priority));

    debug!("scheduling {} devices", devices.len());
    let stagger_factor = (stagger_interval * 60) as f64 / devices.len() as f64;

    for (index, device) in devices.into_iter().enumerate() {
        let first_run = Duration::from_secs_f64(index as f64 * stagger_factor);
        let interval = Duration::from_secs(device.interval * 60);
        let id = poll_job_id(&device.name);
        let name = device.name.clone();
        let job_runtime = runtime.clone();
        runtime.jobs.add_interval_job(&id, first_run, interval, move || {
            let runtime = job_runtime.clone();
            let name = name.clone();
            async move {
                // The device record is re-read each cycle so config reloads
                // take effect without restarting the job
                if let Some(device) = runtime.get_polldev(&name) {
                    tasks::run_all_tasks(&device, &runtime).await;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn oneshot_jobs_unregister_after_running() {
        let registry = Arc::new(JobRegistry::new());
        let (tx, rx) = tokio::sync::oneshot::channel();
        registry.add_oneshot_job("probe", Duration::from_millis(5), async move {
            let _ = tx.send(());
        });
        assert!(registry.contains("probe"));
        rx.await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!registry.contains("probe"));
    }

    #[tokio::test]
    async fn cancel_removes_jobs() {
        let registry = Arc::new(JobRegistry::new());
        registry.add_oneshot_job("probe", Duration::from_secs(3600), async {});
        assert!(registry.cancel("probe"));
        assert!(!registry.cancel("probe"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn interval_jobs_do_not_overlap() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let registry = Arc::new(JobRegistry::new());
        let active = Arc::new(AtomicU32::new(0));
        let overlapped = Arc::new(AtomicU32::new(0));
        let (active_clone, overlap_clone) = (active.clone(), overlapped.clone());
        registry.add_interval_job(
            "slow",
            Duration::from_millis(0),
            Duration::from_millis(5),
            move || {
                let active = active_clone.clone();
                let overlapped = overlap_clone.clone();
                async move {
                    if active.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlapped.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(15)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            },
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        registry.cancel("slow");
        assert_eq!(overlapped.load(Ordering::SeqCst), 0);
    }
}
