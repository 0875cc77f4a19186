// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: viornd end-to-end harvesting on host threads
//! OWNERS: @runtime @security
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 7 integration tests
//!
//! TEST_SCOPE:
//!   - Periodic harvests reach the pool from several devices
//!   - Detach under load leaves no timer, handler or queue behind
//!   - A consumer hold blocks detach without disturbing harvesting
//!   - A device never has more than one timer pending
//!   - Harness errors carry the driver's refusal
//!
//! DEPENDENCIES:
//!   - viorndd::{ThreadTimers, SimulatedRng, KernelCryptoRegistry, EntropyPool}

use std::time::Duration;

use viornd::provider::FuncGroup;
use viornd::{AttachError, DetachCmd, DetachError, LifecycleState};
use viornd_hal::AttachmentId;
use viornd_e2e::{quick_device, wait_for, PlugError, Rig};
use viorndd::SimConfig;

const PATIENCE: Duration = Duration::from_secs(10);

#[test]
fn harvests_from_every_device_reach_the_pool() {
    let rig = Rig::new().expect("rig");
    rig.plug(0, quick_device(1)).expect("attach 0");
    rig.plug(1, quick_device(2)).expect("attach 1");

    let both_harvesting = wait_for(PATIENCE, || {
        [0, 1].iter().all(|id| {
            rig.driver.device(AttachmentId(*id)).is_some_and(|dev| dev.stats().harvests >= 3)
        })
    });
    assert!(both_harvesting, "both devices should harvest repeatedly");
    assert!(wait_for(PATIENCE, || rig.pool.deliveries() >= 6));
    assert!(rig.pool.entropy_bits() > 0);

    for id in rig.driver.attached() {
        let stats = rig.driver.device(id).expect("attached").stats();
        assert_eq!(stats.bytes_delivered, stats.harvests * 16);
        assert_eq!(stats.entropy_bits, stats.bytes_delivered * 2);
        assert_eq!(stats.stray_completions, 0);
        rig.driver.detach(id, DetachCmd::Detach).expect("detach should succeed");
    }
    rig.driver.remove().expect("unload");
}

#[test]
fn detach_under_load_releases_everything() {
    let rig = Rig::new().expect("rig");
    let sim = rig.plug(0, quick_device(3)).expect("attach");
    let device = rig.driver.device(AttachmentId(0)).expect("attached");
    assert!(wait_for(PATIENCE, || device.stats().harvests >= 2));

    rig.driver.detach(AttachmentId(0), DetachCmd::Detach).expect("detach should succeed");
    assert_eq!(device.state(), LifecycleState::Detached);
    assert!(!device.timer_armed());
    assert!(!device.is_request_outstanding());
    assert!(!sim.has_handler());
    assert!(!sim.queue_allocated());
    assert!(rig.registry.is_empty());
    assert_eq!(rig.timers.pending(), 0);

    let harvests = device.stats().harvests;
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(device.stats().harvests, harvests, "no harvest after detach");
}

#[test]
fn held_provider_blocks_detach_until_released() {
    let rig = Rig::new().expect("rig");
    rig.plug(0, quick_device(4)).expect("attach");
    let device = rig.driver.device(AttachmentId(0)).expect("attached");

    let handle = rig.registry.acquire(FuncGroup::RANDOM).expect("provider registered");
    let mut buf = [0u8; 32];
    rig.registry.generate(handle, &mut buf).expect("pull path accepted");

    let err = rig.driver.detach(AttachmentId(0), DetachCmd::Detach).unwrap_err();
    assert!(matches!(err, DetachError::ProviderBusy));
    assert_eq!(device.state(), LifecycleState::Running);
    let before = device.stats().harvests;
    assert!(wait_for(PATIENCE, || device.stats().harvests > before), "harvesting continues");

    rig.registry.release(handle);
    rig.driver.detach(AttachmentId(0), DetachCmd::Detach).expect("detach after release");
    assert!(rig.driver.attached().is_empty());
}

#[test]
fn one_device_never_has_two_timers_pending() {
    let rig = Rig::new().expect("rig");
    rig.plug(0, SimConfig { latency: Duration::ZERO, ..quick_device(5) }).expect("attach");
    let device = rig.driver.device(AttachmentId(0)).expect("attached");

    for _ in 0..200 {
        assert!(rig.timers.pending() <= 1);
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(device.stats().harvests > 0);
    rig.driver.detach(AttachmentId(0), DetachCmd::Detach).expect("detach");
}

#[test]
fn attested_device_is_credited_full_entropy() {
    let rig = Rig::new().expect("rig");
    let sim = SimConfig { attest_hardware: true, ..quick_device(6) };
    rig.plug(0, sim).expect("attach");
    let device = rig.driver.device(AttachmentId(0)).expect("attached");
    assert_eq!(device.bits_per_byte(), 8);

    assert!(wait_for(PATIENCE, || device.stats().harvests >= 2));
    rig.driver.detach(AttachmentId(0), DetachCmd::Detach).expect("detach");
    let stats = device.stats();
    assert_eq!(stats.entropy_bits, stats.bytes_delivered * 8);
    assert!(wait_for(PATIENCE, || rig.pool.entropy_bits() >= 128));
    assert!(rig.pool.extract(16).is_some(), "one harvest credits 128 bits");
}

#[test]
fn reattach_after_detach_resumes_harvesting() {
    let rig = Rig::new().expect("rig");
    let first = rig.plug(0, quick_device(7)).expect("attach");
    assert!(wait_for(PATIENCE, || rig.pool.deliveries() >= 1));
    rig.driver.detach(AttachmentId(0), DetachCmd::Detach).expect("detach");
    first.power_off();

    let delivered = rig.pool.deliveries();
    rig.plug(0, quick_device(8)).expect("reattach");
    assert!(wait_for(PATIENCE, || rig.pool.deliveries() > delivered));
    assert_eq!(rig.registry.len(), 1);
    rig.driver.detach(AttachmentId(0), DetachCmd::Detach).expect("detach");
}

#[test]
fn plugging_an_attached_id_reports_the_driver_error() {
    let rig = Rig::new().expect("rig");
    rig.plug(0, quick_device(9)).expect("attach");

    let err = rig.plug(0, quick_device(10)).unwrap_err();
    assert!(matches!(err, PlugError::Attach(AttachError::AlreadyAttached(AttachmentId(0)))));
    assert_eq!(err.to_string(), "attach: dev0 already attached");
    assert_eq!(rig.registry.len(), 1);
    rig.driver.detach(AttachmentId(0), DetachCmd::Detach).expect("detach");
}
