//! Zino daemon entry point

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::UdpSocket;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use zino::api::ZinoServer;
use zino::config::Configuration;
use zino::runtime::Runtime;
use zino::trapd::TrapReceiver;
use zino::{flaps, pm, scheduler};

/// How often the device file is checked for changes
const POLLFILE_CHECK_PERIOD: Duration = Duration::from_secs(60);
/// How often the planned maintenance engine runs
const PM_ENGINE_PERIOD: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "zino", version, about = "Zino is not OpenView")]
struct Args {
    /// Path to the zino.toml configuration file
    #[arg(long, default_value = "zino.toml", env = "ZINO_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Configuration::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let runtime = Runtime::new(config).context("initializing runtime")?;

    // Load devices and start the poll jobs before anything accepts traffic
    scheduler::load_and_schedule_polldevs(&runtime).await;

    start_housekeeping_jobs(&runtime);
    start_trap_receiver(&runtime).await?;

    let server = ZinoServer::new(runtime.clone());
    let serve = tokio::spawn(server.serve());

    tokio::select! {
        result = serve => {
            result.context("API server task failed")??;
        }
        _ = shutdown_signal() => {
            info!("shutting down");
        }
    }

    if let Err(error) = runtime.save_state().await {
        error!("final state snapshot failed: {}", error);
    }
    Ok(())
}

/// The periodic jobs: device file reload, flap aging, PM engine, snapshots
fn start_housekeeping_jobs(runtime: &Arc<Runtime>) {
    let reload_runtime = runtime.clone();
    runtime.jobs.add_interval_job(
        "load_polldevs",
        POLLFILE_CHECK_PERIOD,
        POLLFILE_CHECK_PERIOD,
        move || {
            let runtime = reload_runtime.clone();
            async move { scheduler::load_and_schedule_polldevs(&runtime).await }
        },
    );

    let decay_interval = Duration::from_secs(runtime.config().polling.decay_interval);
    let flap_runtime = runtime.clone();
    runtime.jobs.add_interval_job(
        "age_flapping_states",
        decay_interval,
        decay_interval,
        move || {
            let runtime = flap_runtime.clone();
            async move { flaps::age_flapping_states(&runtime).await }
        },
    );

    let pm_runtime = runtime.clone();
    runtime.jobs.add_interval_job(
        "planned_maintenance",
        PM_ENGINE_PERIOD,
        PM_ENGINE_PERIOD,
        move || {
            let runtime = pm_runtime.clone();
            async move {
                let now = chrono::Utc::now();
                let mut state = runtime.state.write();
                pm::update_pm_states(&mut state, now);
            }
        },
    );

    let snapshot_period = Duration::from_secs(runtime.config().persistence.period);
    let snapshot_runtime = runtime.clone();
    runtime.jobs.add_interval_job(
        "dump_state",
        snapshot_period,
        snapshot_period,
        move || {
            let runtime = snapshot_runtime.clone();
            async move {
                if let Err(error) = runtime.save_state().await {
                    error!("state snapshot failed: {}", error);
                }
            }
        },
    );
}

/// Binds the trap port and starts the receiver with the standard observers
async fn start_trap_receiver(runtime: &Arc<Runtime>) -> anyhow::Result<()> {
    let listen = &runtime.config().listen;
    let address = format!("{}:{}", listen.address, listen.trap_port);
    let socket = UdpSocket::bind(&address)
        .await
        .with_context(|| format!("cannot bind trap port {}", address))?;

    let mut receiver = TrapReceiver::new(runtime.clone());
    receiver.auto_subscribe();
    for device in runtime.polldevs.read().values() {
        receiver.add_community(&device.community);
    }
    tokio::spawn(Arc::new(receiver).listen(socket));
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate =
        signal(SignalKind::terminate()).expect("failed to install signal handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}
