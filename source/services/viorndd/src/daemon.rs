// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Daemon assembly: collaborators, device bring-up, run loop and shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info, warn};
use thiserror::Error;
use viornd::{AttachCmd, AttachError, DetachCmd, DetachError, InvalidConfig, RemoveError, Viornd};
use viornd_hal::AttachmentId;

use crate::config::{ConfigError, DaemonConfig};
use crate::pool::EntropyPool;
use crate::registry::KernelCryptoRegistry;
use crate::simdev::{SimConfig, SimulatedRng};
use crate::timer::ThreadTimers;

/// Errors from the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration could not be loaded or validated.
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    /// The driver rejected its configuration.
    #[error("driver config: {0}")]
    Driver(#[from] InvalidConfig),
    /// A worker thread could not be started.
    #[error("spawn failed: {0}")]
    Spawn(#[from] std::io::Error),
    /// A device failed to attach.
    #[error("attach: {0}")]
    Attach(#[from] AttachError),
    /// A device failed to detach.
    #[error("detach {id}: {source}")]
    Detach {
        /// Device that refused.
        id: AttachmentId,
        /// Driver error.
        source: DetachError,
    },
    /// The driver still had devices at unload.
    #[error("unload: {0}")]
    Remove(#[from] RemoveError),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Notifies init once the service reports readiness.
pub struct ReadyNotifier(Box<dyn FnOnce() + Send>);

impl ReadyNotifier {
    /// Creates a notifier from the provided closure.
    pub fn new<F>(func: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(Box::new(func))
    }

    /// Signals readiness to the caller.
    pub fn notify(self) {
        (self.0)();
    }
}

/// A running driver with its host collaborators.
pub struct Daemon {
    driver: Viornd,
    pool: Arc<EntropyPool>,
    registry: Arc<KernelCryptoRegistry>,
    timers: Arc<ThreadTimers>,
    devices: Vec<Arc<SimulatedRng>>,
}

impl Daemon {
    /// Builds the collaborators and attaches `[device] count` devices.
    pub fn start(config: &DaemonConfig) -> DaemonResult<Self> {
        config.validate()?;
        let pool = Arc::new(EntropyPool::new());
        let registry = Arc::new(KernelCryptoRegistry::new());
        let timers = Arc::new(ThreadTimers::new()?);
        let driver = Viornd::new(
            config.harvest_config()?,
            registry.clone(),
            pool.clone(),
            timers.clone(),
        )?;

        let mut daemon = Self { driver, pool, registry, timers, devices: Vec::new() };
        daemon.attach_devices((0..config.device.count).map(|index| {
            let sim = SimConfig {
                latency: config.device_latency(),
                attest_hardware: config.device.attest_hardware,
                seed: config.device.seed.map(|seed| seed.wrapping_add(u64::from(index))),
            };
            (AttachmentId(index), sim)
        }))?;
        info!(
            "viorndd: {} device(s) attached, {} provider(s) registered",
            daemon.devices.len(),
            daemon.registry.len()
        );
        Ok(daemon)
    }

    /// The driver.
    pub fn driver(&self) -> &Viornd {
        &self.driver
    }

    /// The host entropy pool.
    pub fn pool(&self) -> &Arc<EntropyPool> {
        &self.pool
    }

    /// The crypto registry.
    pub fn registry(&self) -> &Arc<KernelCryptoRegistry> {
        &self.registry
    }

    /// Attached simulated devices.
    pub fn devices(&self) -> &[Arc<SimulatedRng>] {
        &self.devices
    }

    /// Logs one statistics line per device.
    pub fn log_stats(&self) {
        for id in self.driver.attached() {
            if let Some(device) = self.driver.device(id) {
                let stats = device.stats();
                info!(
                    "viorndd: {id}: {} harvests, {} bytes, {} bits, {} spurious, pool {} bits",
                    stats.harvests,
                    stats.bytes_delivered,
                    stats.entropy_bits,
                    stats.spurious_interrupts,
                    self.pool.entropy_bits()
                );
            }
        }
    }

    /// Detaches every device, unloads the driver and stops the workers.
    pub fn shutdown(mut self) -> DaemonResult<()> {
        let mut first_error = None;
        for id in self.driver.attached() {
            if let Err(source) = self.driver.detach(id, DetachCmd::Detach) {
                error!("viorndd: {id}: detach failed: {source}");
                first_error.get_or_insert(DaemonError::Detach { id, source });
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }
        self.driver.remove()?;
        self.stop_devices();
        self.timers.shutdown();
        info!("viorndd: stopped, pool credit {} bits", self.pool.entropy_bits());
        Ok(())
    }

    /// Attaches every device in order. On the first failure the devices
    /// attached so far are detached again and powered off.
    fn attach_devices(
        &mut self,
        devices: impl IntoIterator<Item = (AttachmentId, SimConfig)>,
    ) -> DaemonResult<()> {
        for (id, sim) in devices {
            let device = match SimulatedRng::spawn(id, sim) {
                Ok(device) => device,
                Err(err) => {
                    self.abort_start();
                    return Err(err.into());
                }
            };
            if let Err(err) = self.driver.attach(device.clone(), AttachCmd::Attach) {
                device.power_off();
                self.abort_start();
                return Err(err.into());
            }
            self.devices.push(device);
        }
        Ok(())
    }

    fn abort_start(&mut self) {
        for id in self.driver.attached() {
            if let Err(err) = self.driver.detach(id, DetachCmd::Detach) {
                error!("viorndd: {id}: detach during failed start: {err}");
            }
        }
        self.stop_devices();
    }

    fn stop_devices(&mut self) {
        for device in self.devices.drain(..) {
            device.power_off();
        }
    }
}

/// Runs the daemon until `[daemon] harvest_limit` deliveries reached the pool,
/// or forever when no limit is configured.
pub fn service_main_loop(config: DaemonConfig, notifier: ReadyNotifier) -> DaemonResult<()> {
    let daemon = Daemon::start(&config)?;
    notifier.notify();

    let stats_interval = config.stats_interval();
    match config.daemon.harvest_limit {
        Some(limit) => {
            let started = Instant::now();
            while !daemon.pool().wait_for_deliveries(limit, stats_interval) {
                daemon.log_stats();
            }
            info!("viorndd: {limit} harvest(s) in {:?}", started.elapsed());
        }
        None => loop {
            std::thread::sleep(stats_interval);
            daemon.log_stats();
        },
    }

    daemon.log_stats();
    if let Err(err) = daemon.shutdown() {
        warn!("viorndd: shutdown incomplete: {err}");
        return Err(err);
    }
    Ok(())
}

/// How long a caller may reasonably wait for `count` harvests.
pub fn harvest_deadline(config: &DaemonConfig, count: u64) -> Duration {
    let per_round =
        Duration::from_millis(config.harvest.interval_ms.saturating_add(config.device.latency_ms));
    per_round.saturating_mul(u32::try_from(count).unwrap_or(u32::MAX)) + Duration::from_secs(5)
}
