//! Device file reload and job scheduling behavior

mod common;

use std::time::Duration;

use common::harness;
use zino::scheduler;

const TWO_DEVICES: &str = "\
default interval: 5

name: rtr-a
address: 10.0.0.1
priority: 500

name: rtr-b
address: 10.0.0.2
";

fn write_pollfile(harness: &common::TestHarness, content: &str) {
    std::fs::write(&harness.runtime.config().polling.file, content).unwrap();
}

#[tokio::test]
async fn initial_load_schedules_every_device() {
    let harness = harness();
    write_pollfile(&harness, TWO_DEVICES);
    scheduler::load_and_schedule_polldevs(&harness.runtime).await;

    assert_eq!(harness.runtime.polldevs.read().len(), 2);
    assert_eq!(harness.runtime.jobs.len(), 2);

    // The new devices got state records and address index entries
    let state = harness.runtime.state.read();
    assert!(state.devices.contains_key("rtr-a"));
    assert_eq!(
        state.addresses.get(&"10.0.0.2".parse().unwrap()),
        Some(&"rtr-b".to_string())
    );
}

#[tokio::test]
async fn reload_with_unchanged_file_changes_nothing() {
    let harness = harness();
    write_pollfile(&harness, TWO_DEVICES);
    scheduler::load_and_schedule_polldevs(&harness.runtime).await;
    let jobs_before = harness.runtime.jobs.len();

    // Same mtime: the reload is skipped outright
    scheduler::load_and_schedule_polldevs(&harness.runtime).await;
    assert_eq!(harness.runtime.jobs.len(), jobs_before);
    assert_eq!(harness.runtime.polldevs.read().len(), 2);
}

#[tokio::test]
async fn removed_devices_lose_their_jobs() {
    let harness = harness();
    write_pollfile(&harness, TWO_DEVICES);
    scheduler::load_and_schedule_polldevs(&harness.runtime).await;
    assert_eq!(harness.runtime.jobs.len(), 2);

    tokio::time::sleep(Duration::from_millis(20)).await;
    write_pollfile(&harness, "name: rtr-a\naddress: 10.0.0.1\n");
    // Make sure the mtime moves even on coarse-grained filesystems
    filetime_bump(&harness);
    scheduler::load_and_schedule_polldevs(&harness.runtime).await;

    assert_eq!(harness.runtime.polldevs.read().len(), 1);
    assert_eq!(harness.runtime.jobs.len(), 1);
}

#[tokio::test]
async fn broken_reload_keeps_the_previous_configuration() {
    let harness = harness();
    write_pollfile(&harness, TWO_DEVICES);
    scheduler::load_and_schedule_polldevs(&harness.runtime).await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    write_pollfile(&harness, "name rtr-a is broken\n");
    filetime_bump(&harness);
    scheduler::load_and_schedule_polldevs(&harness.runtime).await;

    // The bad file was rejected; devices and jobs are untouched
    assert_eq!(harness.runtime.polldevs.read().len(), 2);
    assert_eq!(harness.runtime.jobs.len(), 2);
}

fn filetime_bump(harness: &common::TestHarness) {
    let path = &harness.runtime.config().polling.file;
    let content = std::fs::read(path).unwrap();
    std::fs::write(path, content).unwrap();
}
