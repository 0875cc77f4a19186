// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: viorndd host daemon running the viornd harvester
//! OWNERS: @runtime @security
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests per module + `tests/daemon.rs`
//!
//! PUBLIC API:
//!   - service_main_loop(config, notifier): run until the harvest limit
//!   - Daemon: driver plus collaborators, start()/shutdown()
//!   - DaemonConfig: TOML configuration
//!   - EntropyPool / KernelCryptoRegistry / ThreadTimers / SimulatedRng
//!
//! SECURITY INVARIANTS:
//!   - Entropy bytes MUST NOT be logged
//!   - Pool credit is capped at POOL_CAPACITY_BITS

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod config;
pub mod daemon;
pub mod pool;
pub mod registry;
pub mod simdev;
pub mod timer;

pub use config::{ConfigError, DaemonConfig};
pub use daemon::{
    harvest_deadline, service_main_loop, Daemon, DaemonError, DaemonResult, ReadyNotifier,
};
pub use pool::{EntropyPool, POOL_CAPACITY_BITS};
pub use registry::KernelCryptoRegistry;
pub use simdev::{SimConfig, SimulatedRng};
pub use timer::ThreadTimers;
