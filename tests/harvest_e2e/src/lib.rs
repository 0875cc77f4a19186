// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: viornd end-to-end test harness library
//! OWNERS: @runtime @security
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: `tests/host_harvest.rs`
//!
//! Wires the driver to real host collaborators: a threaded timer facility,
//! simulated devices, the in-memory crypto registry and the entropy pool.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use viornd::{AttachCmd, AttachError, HarvestConfig, Viornd};
use viornd_hal::AttachmentId;
use viorndd::{EntropyPool, KernelCryptoRegistry, SimConfig, SimulatedRng, ThreadTimers};

/// Harvest interval short enough for tests.
pub const FAST_INTERVAL: Duration = Duration::from_millis(10);

/// Failure to bring up a simulated device.
#[derive(Debug, Error)]
pub enum PlugError {
    /// The device thread could not be started.
    #[error("device thread: {0}")]
    Spawn(#[from] io::Error),
    /// The driver refused the device.
    #[error("attach: {0}")]
    Attach(#[from] AttachError),
}

/// Driver plus host collaborators.
pub struct Rig {
    /// Driver under test.
    pub driver: Viornd,
    /// Entropy sink.
    pub pool: Arc<EntropyPool>,
    /// Crypto registry.
    pub registry: Arc<KernelCryptoRegistry>,
    /// Timer facility.
    pub timers: Arc<ThreadTimers>,
}

impl Rig {
    /// Builds a rig harvesting every [`FAST_INTERVAL`].
    pub fn new() -> io::Result<Self> {
        Self::with_config(fast_config())
    }

    /// Builds a rig with an explicit driver configuration.
    pub fn with_config(config: HarvestConfig) -> io::Result<Self> {
        let pool = Arc::new(EntropyPool::new());
        let registry = Arc::new(KernelCryptoRegistry::new());
        let timers = Arc::new(ThreadTimers::new()?);
        let driver = Viornd::new(config, registry.clone(), pool.clone(), timers.clone())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        Ok(Self { driver, pool, registry, timers })
    }

    /// Powers up a simulated device and attaches it.
    pub fn plug(&self, id: u32, sim: SimConfig) -> Result<Arc<SimulatedRng>, PlugError> {
        let device = SimulatedRng::spawn(AttachmentId(id), sim)?;
        self.driver.attach(device.clone(), AttachCmd::Attach)?;
        Ok(device)
    }
}

/// [`FAST_INTERVAL`] with a short drain timeout.
pub fn fast_config() -> HarvestConfig {
    HarvestConfig {
        interval: FAST_INTERVAL,
        drain_timeout: Duration::from_millis(200),
        ..HarvestConfig::default()
    }
}

/// Seeded device with a 1ms fill latency.
pub fn quick_device(seed: u64) -> SimConfig {
    SimConfig { latency: Duration::from_millis(1), attest_hardware: false, seed: Some(seed) }
}

/// Polls `cond` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}
